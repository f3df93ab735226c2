use std::collections::BTreeSet;

use anyhow::{Context, Result};
use camino::Utf8Path;
use clap::Args;

use crate::db::Database;
use crate::error::Error;
use crate::lock::DbLock;
use crate::{ldcache, remove, signal};

#[derive(Args)]
pub struct RemoveArgs {
    /// Alternate installation root
    #[arg(short = 'r', long = "root", value_name = "PATH", default_value = "/")]
    root: String,

    /// Package to remove
    #[arg(value_name = "PKGNAME")]
    package: String,
}

pub fn run(args: &RemoveArgs) -> Result<()> {
    let _shield = signal::shield_mutation().context("shielding signals")?;
    let _lock = DbLock::exclusive(Utf8Path::new(&args.root))?;
    let mut db = Database::open(&args.root)?;

    if !db.installed(&args.package) {
        return Err(Error::NotInstalled(args.package.clone()).into());
    }

    tracing::info!(name = %args.package, "removing");
    remove::db_rm_pkg(&mut db, &args.package, &BTreeSet::new());
    db.commit()?;
    ldcache::refresh(db.root());
    Ok(())
}

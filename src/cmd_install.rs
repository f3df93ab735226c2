use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use clap::Args;

use crate::db::Database;
use crate::error::Error;
use crate::install::{self, InstallOpts};
use crate::lock::DbLock;
use crate::{rules, signal};

#[derive(Args)]
pub struct InstallArgs {
    /// Alternate installation root
    #[arg(short = 'r', long = "root", value_name = "PATH", default_value = "/")]
    root: String,

    /// Alternate rule configuration file
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<Utf8PathBuf>,

    /// Upgrade an installed package
    #[arg(short = 'u', long)]
    upgrade: bool,

    /// Ignore file conflicts and overwrite
    #[arg(short = 'f', long)]
    force: bool,

    /// Package archive to install
    #[arg(value_name = "ARCHIVE")]
    archive: Utf8PathBuf,
}

pub fn run(args: &InstallArgs) -> Result<()> {
    let _shield = signal::shield_mutation().context("shielding signals")?;
    let _lock = DbLock::exclusive(Utf8Path::new(&args.root))?;
    let mut db = Database::open(&args.root)?;

    let conf = args
        .config
        .clone()
        .unwrap_or_else(|| db.root().join(rules::DEFAULT_CONF));
    let rules = rules::load(&conf)?;

    let opts = InstallOpts {
        archive: &args.archive,
        rules: &rules,
        force: args.force,
        upgrade: args.upgrade,
    };
    if let Err(err) = install::install_pkg(&mut db, &opts) {
        if let Error::FileConflicts(files) = &err {
            for file in files {
                eprintln!("{file}");
            }
        }
        return Err(err.into());
    }
    Ok(())
}

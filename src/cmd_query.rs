use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{ArgGroup, Args};
use regex::Regex;

use crate::db::Database;
use crate::error::Error;
use crate::lock::DbLock;
use crate::{archive, footprint, fsutil};

#[derive(Args)]
#[command(group(ArgGroup::new("mode").required(true)))]
pub struct QueryArgs {
    /// Alternate installation root
    #[arg(short = 'r', long = "root", value_name = "PATH", default_value = "/")]
    root: String,

    /// Print the footprint of an archive
    #[arg(short = 'f', long = "footprint", value_name = "ARCHIVE", group = "mode")]
    footprint: Option<Utf8PathBuf>,

    /// List installed packages
    #[arg(short = 'i', long = "installed", group = "mode")]
    installed: bool,

    /// List the files of an installed package or of an archive
    #[arg(short = 'l', long = "list", value_name = "PKG|ARCHIVE", group = "mode")]
    list: Option<String>,

    /// Print which packages own the files matching a pattern
    #[arg(short = 'o', long = "owner", value_name = "PATTERN", group = "mode")]
    owner: Option<String>,
}

pub fn run(args: &QueryArgs) -> Result<()> {
    // footprinting reads only the archive; everything else reads the
    // database under a shared lock
    if let Some(archive) = &args.footprint {
        print!("{}", footprint::footprint(archive)?);
        return Ok(());
    }

    let _lock = DbLock::shared(Utf8Path::new(&args.root))?;
    let db = Database::open(&args.root)?;

    if args.installed {
        let mut installed: Vec<_> = db.packages().collect();
        installed.sort_by(|a, b| a.0.cmp(b.0));
        for (name, package) in installed {
            println!("{name} {}", package.version);
        }
    } else if let Some(target) = &args.list {
        if let Some(files) = db.files_of(target) {
            for file in files {
                println!("{file}");
            }
        } else if fsutil::exists(Utf8Path::new(target)) {
            let (_, package) = archive::open_pkg(Utf8Path::new(target))?;
            for file in &package.files {
                println!("{file}");
            }
        } else {
            return Err(Error::NotInstalled(target.clone()).into());
        }
    } else if let Some(pattern) = &args.owner {
        let re = Regex::new(pattern).with_context(|| format!("invalid pattern '{pattern}'"))?;
        let owners = db.owners(&re);
        if owners.is_empty() {
            tracing::warn!(pattern = %pattern, "no owner(s) found");
        }
        for (name, file) in owners {
            println!("{name} {file}");
        }
    }
    Ok(())
}

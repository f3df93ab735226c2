use std::io::Write;

use anyhow::Result;
use camino::Utf8Path;
use clap::{ArgGroup, Args};

use crate::check::{self, Audit, Finding};
use crate::db::Database;
use crate::lock::DbLock;

#[derive(Args)]
#[command(group(ArgGroup::new("audit").required(true)))]
pub struct CheckArgs {
    /// Alternate installation root
    #[arg(short = 'r', long = "root", value_name = "PATH", default_value = "/")]
    root: String,

    /// Audit symlinks
    #[arg(short = 'l', long = "links", group = "audit")]
    links: bool,

    /// Audit disappeared files
    #[arg(short = 'd', long = "disappeared", group = "audit")]
    disappeared: bool,

    /// Run every audit
    #[arg(short = 'a', long = "all", group = "audit")]
    all: bool,

    /// Packages to audit (default: every installed package)
    #[arg(value_name = "PKGNAME")]
    packages: Vec<String>,
}

pub fn run(args: &CheckArgs, verbosity: u8) -> Result<()> {
    let _lock = DbLock::shared(Utf8Path::new(&args.root))?;
    let db = Database::open(&args.root)?;

    let audit = match (args.links, args.disappeared, args.all) {
        (true, _, _) => Audit::Links,
        (_, true, _) => Audit::Missing,
        _ => Audit::All,
    };
    let findings = check::run(&db, &args.packages, audit)?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for finding in &findings {
        match finding {
            Finding::BrokenLink {
                package,
                path,
                target,
            } => writeln!(out, "{package}: broken link {path} -> {target}")?,
            Finding::ForeignLink {
                package,
                path,
                target,
                owners,
            } => {
                writeln!(out, "{package}: {path} -> {target} leaves the package")?;
                if verbosity > 0 {
                    for owner in owners {
                        writeln!(out, "  owned by {owner}")?;
                    }
                }
            }
            Finding::Missing {
                package,
                path,
                claimants,
            } => {
                writeln!(out, "{package}: missing {path}")?;
                if verbosity > 0 {
                    for claimant in claimants {
                        writeln!(out, "  claimed by {claimant}")?;
                    }
                }
            }
        }
    }
    Ok(())
}

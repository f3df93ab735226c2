mod archive;
mod check;
mod cmd_check;
mod cmd_install;
mod cmd_query;
mod cmd_remove;
mod conflicts;
mod db;
mod error;
mod footprint;
mod fsutil;
mod install;
mod ldcache;
mod lock;
mod remove;
mod rules;
mod signal;
#[cfg(test)]
mod testutil;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser)]
#[command(name = "pkg", version)]
#[command(about = "Install, remove and query pkg.tar packages")]
struct Cli {
    /// Increase verbosity (-v announces actions, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Install or upgrade a package archive
    Install(cmd_install::InstallArgs),
    /// Remove an installed package
    Remove(cmd_remove::RemoveArgs),
    /// Query the package database or an archive
    Query(cmd_query::QueryArgs),
    /// Audit installed packages against the filesystem
    Check(cmd_check::CheckArgs),
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match &cli.command {
        Command::Install(args) => ensure_root().and_then(|()| cmd_install::run(args)),
        Command::Remove(args) => ensure_root().and_then(|()| cmd_remove::run(args)),
        Command::Query(args) => cmd_query::run(args),
        Command::Check(args) => cmd_check::run(args, cli.verbose),
    };
    if let Err(err) = result {
        eprintln!("pkg: {err:#}");
        std::process::exit(1);
    }
}

/// Mutating verbs rewrite the root's filesystem and chown extracted files;
/// refuse them up front for anyone but root.
fn ensure_root() -> Result<()> {
    if nix::unistd::Uid::effective().is_root() {
        Ok(())
    } else {
        Err(error::Error::PermissionDenied.into())
    }
}

fn init_tracing(verbose: u8) {
    let format = fmt::format().without_time().with_target(false).compact();

    // CLI -v flags take precedence, then RUST_LOG; per-file errors and
    // kept-rejection notices show by default, action announcements at -v
    let env_filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pkg=warn")),
        1 => EnvFilter::new("pkg=info"),
        2 => EnvFilter::new("pkg=debug"),
        _ => EnvFilter::new("pkg=trace"),
    };

    tracing_subscriber::fmt()
        .event_format(format)
        .with_writer(std::io::stderr)
        .with_env_filter(env_filter)
        .init();
}

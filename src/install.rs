use std::collections::BTreeSet;
use std::fs;
use std::io;

use camino::Utf8Path;

use crate::db::{self, Database};
use crate::error::{Error, Result};
use crate::rules::{self, Rule};
use crate::{archive, conflicts, fsutil, ldcache, remove};

pub struct InstallOpts<'a> {
    pub archive: &'a Utf8Path,
    pub rules: &'a [Rule],
    pub force: bool,
    pub upgrade: bool,
}

/// Install or upgrade one archive. Callers hold the exclusive database
/// lock and the signal shield for the duration.
///
/// The catalogue is committed before any file is materialised: if the
/// process dies in between, the database claims files that are not there
/// yet, which the integrity audit can see. The reverse order would leave
/// files on disk that nothing claims, which nothing can see.
pub fn install_pkg(db: &mut Database, opts: &InstallOpts<'_>) -> Result<()> {
    let (name, mut package) = archive::open_pkg(opts.archive)?;

    let installed = db.installed(&name);
    if installed && !opts.upgrade {
        return Err(Error::AlreadyInstalled(name));
    }
    if !installed && opts.upgrade {
        return Err(Error::NotInstalled(name));
    }

    let verb = if opts.upgrade { "upgrading" } else { "installing" };
    tracing::info!(name = %name, version = %package.version, "{verb}");

    let (install_set, skip_set) = rules::install_partition(opts.rules, &package.files);
    package.files = install_set;

    let keep = if opts.upgrade {
        rules::keep_list(opts.rules, &package.files)
    } else {
        BTreeSet::new()
    };

    let conflicts = conflicts::find_conflicts(db, &name, &package.files);
    if !conflicts.is_empty() {
        if !opts.force {
            return Err(Error::FileConflicts(conflicts));
        }
        remove::db_rm_files(db, &conflicts, &keep);
    }

    if opts.upgrade {
        remove::db_rm_pkg(db, &name, &keep);
    }

    db.add(name.clone(), package);
    db.commit()?;

    if let Err(e) = extract(db, &skip_set, &keep, opts) {
        if !opts.upgrade {
            // fresh install: take the catalogue entry back out so the
            // database never claims files that were never materialised
            db.remove(&name);
            db.commit()?;
        }
        return Err(e);
    }

    ldcache::refresh(db.root());
    Ok(())
}

fn extract(
    db: &Database,
    skip: &BTreeSet<String>,
    keep: &BTreeSet<String>,
    opts: &InstallOpts<'_>,
) -> Result<()> {
    let read_err = |source: io::Error| Error::ArchiveRead {
        path: opts.archive.to_string(),
        source,
    };
    let reject_root = db.root().join(db::REJECTED_DIR);

    let mut archive = archive::open_extractor(opts.archive)?;
    for entry in archive.entries().map_err(&read_err)? {
        let mut entry = entry.map_err(&read_err)?;
        let rel = archive::entry_name(&entry).map_err(&read_err)?;
        if rel.is_empty() || skip.contains(&rel) {
            continue;
        }

        let target = db.fs_path(&rel);
        let rejected = keep.contains(&rel) && fsutil::exists(&target);
        let dest = if rejected {
            reject_root.join(&rel)
        } else {
            target.clone()
        };

        if let Err(source) = archive::unpack_entry(&mut entry, &dest, db.root()) {
            tracing::error!(path = %dest, error = %source, "could not extract");
            if opts.upgrade {
                continue;
            }
            return Err(Error::ExtractError { path: rel, source });
        }

        if rejected {
            resolve_rejection(&reject_root, &target, &dest, &rel);
        }
    }
    Ok(())
}

/// A freshly written rejection that adds nothing over the original is
/// noise: drop it and collapse whatever part of the rejected tree it
/// leaves empty. Anything else stays for the admin to merge.
fn resolve_rejection(reject_root: &Utf8Path, original: &Utf8Path, rejection: &Utf8Path, rel: &str) {
    let is_dir = rel.ends_with('/');
    let perms = fsutil::perms_equal(original, rejection).unwrap_or(false);
    let redundant = if is_dir {
        perms
    } else {
        perms
            && (fsutil::is_empty_regular(rejection)
                || fsutil::content_equal(original, rejection).unwrap_or(false))
    };

    if redundant {
        if is_dir {
            let _ = fs::remove_dir(rejection);
        } else {
            fsutil::prune_up(reject_root, rejection);
        }
    } else {
        tracing::warn!(path = %rel, "rejecting, keeping existing version");
    }
}

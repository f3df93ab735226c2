use std::collections::BTreeSet;
use std::fs;

use camino::Utf8Path;

use crate::db::Database;

/// Excise `name` from the catalogue and delete its files, leaving alone
/// anything in `keep` and anything another package still claims.
///
/// Deletion walks the surviving paths in reverse lexicographic order, so a
/// directory is visited after its contents: directories emptied by the walk
/// go away, directories still holding other packages' files fail with
/// ENOTEMPTY and are skipped without a word.
pub fn db_rm_pkg(db: &mut Database, name: &str, keep: &BTreeSet<String>) {
    let Some(package) = db.remove(name) else {
        return;
    };
    let mut doomed = package.files;
    for file in keep {
        doomed.remove(file);
    }
    doomed.retain(|file| !db.packages().any(|(_, p)| p.files.contains(file)));

    delete_files(db.root(), &doomed);
}

/// Strip `files` from every catalogue entry and delete them from disk,
/// except for the ones in `keep`. Used when a forced install steals paths
/// from their current owners.
pub fn db_rm_files(db: &mut Database, files: &BTreeSet<String>, keep: &BTreeSet<String>) {
    db.strip_files(files);
    let doomed: BTreeSet<String> = files.difference(keep).cloned().collect();
    delete_files(db.root(), &doomed);
}

fn delete_files(root: &Utf8Path, files: &BTreeSet<String>) {
    for file in files.iter().rev() {
        let path = root.join(file);
        let result = if file.ends_with('/') {
            fs::remove_dir(&path)
        } else {
            fs::remove_file(&path)
        };
        if let Err(e) = result {
            if e.raw_os_error() == Some(libc::ENOTEMPTY) {
                continue;
            }
            tracing::error!(path = %path, error = %e, "could not remove");
        }
    }
}

use std::collections::BTreeSet;

use crate::db::Database;
use crate::fsutil;

/// The set of file paths a candidate `(name, files)` would fight over.
///
/// Four ordered phases: paths owned by other packages, then paths already
/// present on the filesystem, minus directories, minus anything the same
/// package already owns (so an identical upgrade conflicts with nothing).
pub fn find_conflicts(db: &Database, name: &str, files: &BTreeSet<String>) -> BTreeSet<String> {
    let mut conflicts = BTreeSet::new();

    for (other, package) in db.packages() {
        if other == name {
            continue;
        }
        for file in package.files.intersection(files) {
            conflicts.insert(file.clone());
        }
    }

    for file in files {
        if !conflicts.contains(file) && fsutil::exists(&db.fs_path(file)) {
            conflicts.insert(file.clone());
        }
    }

    conflicts.retain(|file| !file.ends_with('/'));

    if let Some(own) = db.files_of(name) {
        conflicts.retain(|file| !own.contains(file));
    }

    conflicts
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::db::Package;
    use crate::testutil::pkg_root;

    fn set(files: &[&str]) -> BTreeSet<String> {
        files.iter().map(|f| f.to_string()).collect()
    }

    fn pkg(version: &str, files: &[&str]) -> Package {
        Package {
            version: version.to_string(),
            files: set(files),
        }
    }

    #[test]
    fn test_db_conflicts() {
        let (_tmp, root) = pkg_root();
        let mut db = Database::open(root.as_str()).unwrap();
        db.add("a".into(), pkg("1", &["bin/x", "bin/a"]));

        let conflicts = find_conflicts(&db, "b", &set(&["bin/x", "bin/b"]));
        assert_eq!(conflicts, set(&["bin/x"]));
    }

    #[test]
    fn test_filesystem_conflicts() {
        let (_tmp, root) = pkg_root();
        let db = Database::open(root.as_str()).unwrap();
        fs::create_dir(root.join("bin")).unwrap();
        fs::write(root.join("bin/x"), b"stray").unwrap();

        let conflicts = find_conflicts(&db, "b", &set(&["bin/x", "bin/b"]));
        assert_eq!(conflicts, set(&["bin/x"]));
    }

    #[test]
    fn test_directories_are_shareable() {
        let (_tmp, root) = pkg_root();
        let mut db = Database::open(root.as_str()).unwrap();
        db.add("a".into(), pkg("1", &["share/", "share/a"]));
        fs::create_dir(root.join("share")).unwrap();

        let conflicts = find_conflicts(&db, "b", &set(&["share/", "share/b"]));
        assert!(conflicts.is_empty());
    }

    #[test]
    fn test_self_upgrade_is_conflict_free() {
        let (_tmp, root) = pkg_root();
        let mut db = Database::open(root.as_str()).unwrap();
        db.add("a".into(), pkg("1", &["bin/a", "etc/a.conf"]));
        fs::create_dir_all(root.join("bin")).unwrap();
        fs::create_dir_all(root.join("etc")).unwrap();
        fs::write(root.join("bin/a"), b"x").unwrap();
        fs::write(root.join("etc/a.conf"), b"x").unwrap();

        // identical content, already installed: nothing conflicts
        let conflicts = find_conflicts(&db, "a", db.files_of("a").unwrap());
        assert!(conflicts.is_empty());
    }

    #[test]
    fn test_upgrade_still_sees_foreign_owners() {
        let (_tmp, root) = pkg_root();
        let mut db = Database::open(root.as_str()).unwrap();
        db.add("a".into(), pkg("1", &["bin/a"]));
        db.add("b".into(), pkg("1", &["bin/shared"]));

        let conflicts = find_conflicts(&db, "a", &set(&["bin/a", "bin/shared"]));
        assert_eq!(conflicts, set(&["bin/shared"]));
    }
}

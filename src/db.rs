use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::fs::{self, OpenOptions};
use std::io::{self, Write as _};
use std::os::unix::fs::OpenOptionsExt;

use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use regex::Regex;

use crate::error::{Error, Result};
use crate::fsutil;

/// Lock directory, relative to the root.
pub const PKG_DIR: &str = "var/lib/pkg";
/// The catalogue file, relative to the root.
pub const DB_FILE: &str = "var/lib/pkg/db";
/// Where upgrade-time kept configs are diverted to, relative to the root.
pub const REJECTED_DIR: &str = "var/lib/pkg/rejected";

const BACKUP_SUFFIX: &str = ".backup";
const IN_FLIGHT_SUFFIX: &str = ".incomplete_transaction";

/// One installed package: its version and the paths it owns.
///
/// Paths are stored without a leading slash; directory paths carry a
/// trailing slash. The `BTreeSet` gives the byte-lexicographic total order
/// that removal (reverse walk, files before their parent directories) and
/// conflict detection depend on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Package {
    pub version: String,
    pub files: BTreeSet<String>,
}

/// The installed-package catalogue, bound to a root directory.
///
/// All mutators operate on memory only; [`Database::commit`] persists the
/// catalogue atomically. Front-ends hold a [`crate::lock::DbLock`] around
/// open/mutate/commit sequences; the engine itself is lock-agnostic so
/// tests can drive several databases against different roots at once.
#[derive(Debug)]
pub struct Database {
    root: Utf8PathBuf,
    packages: IndexMap<String, Package>,
}

impl Database {
    /// Load the catalogue under `root` (empty means `/`).
    ///
    /// A missing database file is an error; the file comes into existence
    /// through the first [`Database::commit`] against the root.
    pub fn open(root: &str) -> Result<Self> {
        let root = if root.is_empty() {
            "/".to_string()
        } else {
            fsutil::normalize(root)
        };
        let root = Utf8PathBuf::from(root);
        let path = root.join(DB_FILE);
        let text = fs::read_to_string(&path).map_err(|source| Error::DatabaseIo {
            op: "open",
            path: path.to_string(),
            source,
        })?;
        let packages = parse(&text);
        tracing::debug!(root = %root, packages = packages.len(), "database loaded");
        Ok(Self { root, packages })
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Resolve a catalogue-relative path under the root.
    pub fn fs_path(&self, rel: &str) -> Utf8PathBuf {
        self.root.join(rel)
    }

    pub fn add(&mut self, name: String, package: Package) {
        self.packages.insert(name, package);
    }

    pub fn remove(&mut self, name: &str) -> Option<Package> {
        self.packages.shift_remove(name)
    }

    pub fn installed(&self, name: &str) -> bool {
        self.packages.contains_key(name)
    }

    pub fn files_of(&self, name: &str) -> Option<&BTreeSet<String>> {
        self.packages.get(name).map(|p| &p.files)
    }

    pub fn packages(&self) -> impl Iterator<Item = (&String, &Package)> {
        self.packages.iter()
    }

    /// Drop the given paths from every entry's file set. Entries left with
    /// no files are skipped by [`Database::commit`] and dropped on reload.
    pub fn strip_files(&mut self, files: &BTreeSet<String>) {
        for package in self.packages.values_mut() {
            for file in files {
                package.files.remove(file);
            }
        }
    }

    /// Every `(package, path)` pair whose path matches `pattern`.
    pub fn owners(&self, pattern: &Regex) -> Vec<(&str, &str)> {
        let mut found = Vec::new();
        for (name, package) in &self.packages {
            for file in &package.files {
                if pattern.is_match(file) {
                    found.push((name.as_str(), file.as_str()));
                }
            }
        }
        found
    }

    /// Persist the catalogue.
    ///
    /// The commit is a three-file dance under `var/lib/pkg`: write a fresh
    /// `db.incomplete_transaction`, fsync it, hard-link the current `db` to
    /// `db.backup`, then rename the new file over `db`. A crash at any point
    /// leaves a usable `db`; a stale in-flight file is cleaned up here on
    /// the next commit.
    pub fn commit(&self) -> Result<()> {
        let db_path = self.root.join(DB_FILE);
        let new_path = Utf8PathBuf::from(format!("{db_path}{IN_FLIGHT_SUFFIX}"));
        let backup_path = Utf8PathBuf::from(format!("{db_path}{BACKUP_SUFFIX}"));

        unlink_stale(&new_path)?;

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o444)
            .open(&new_path)
            .map_err(|source| db_io("create", &new_path, source))?;

        let mut text = String::new();
        for (name, package) in &self.packages {
            if package.files.is_empty() {
                continue;
            }
            let _ = writeln!(text, "{name}\n{}", package.version);
            for file in &package.files {
                let _ = writeln!(text, "{file}");
            }
            text.push('\n');
        }

        file.write_all(text.as_bytes())
            .map_err(|source| db_io("write", &new_path, source))?;
        file.sync_all()
            .map_err(|source| db_io("fsync", &new_path, source))?;
        drop(file);

        unlink_stale(&backup_path)?;
        match fs::hard_link(&db_path, &backup_path) {
            Ok(()) => {}
            // first commit against a fresh root: nothing to back up yet
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => return Err(db_io("link", &backup_path, source)),
        }

        fs::rename(&new_path, &db_path).map_err(|source| db_io("rename", &db_path, source))?;
        tracing::debug!(path = %db_path, "database committed");
        Ok(())
    }
}

fn db_io(op: &'static str, path: &Utf8Path, source: io::Error) -> Error {
    Error::DatabaseIo {
        op,
        path: path.to_string(),
        source,
    }
}

fn unlink_stale(path: &Utf8Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(db_io("unlink", path, source)),
    }
}

/// Parse the catalogue format: per package one line of name, one of
/// version, the owned paths, and a blank terminator. A trailing record
/// without the terminator is accepted if otherwise consistent; records
/// with no files are dropped.
fn parse(text: &str) -> IndexMap<String, Package> {
    let mut packages = IndexMap::new();
    let mut lines = text.lines();
    while let Some(name) = lines.next() {
        if name.is_empty() {
            continue;
        }
        let Some(version) = lines.next() else {
            break;
        };
        let mut files = BTreeSet::new();
        for line in lines.by_ref() {
            if line.is_empty() {
                break;
            }
            files.insert(line.to_string());
        }
        if !files.is_empty() {
            packages.insert(
                name.to_string(),
                Package {
                    version: version.to_string(),
                    files,
                },
            );
        }
    }
    packages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::pkg_root;

    fn sample(version: &str, files: &[&str]) -> Package {
        Package {
            version: version.to_string(),
            files: files.iter().map(|f| f.to_string()).collect(),
        }
    }

    #[test]
    fn test_roundtrip() {
        let (_tmp, root) = pkg_root();
        let mut db = Database::open(root.as_str()).unwrap();
        db.add("foo".into(), sample("1.0", &["bin/foo", "etc/foo.conf"]));
        db.add("bar".into(), sample("2.3", &["share/bar/", "share/bar/x"]));
        db.commit().unwrap();

        let reloaded = Database::open(root.as_str()).unwrap();
        assert_eq!(reloaded.packages, db.packages);
    }

    #[test]
    fn test_commit_format_is_bit_exact() {
        let (_tmp, root) = pkg_root();
        let mut db = Database::open(root.as_str()).unwrap();
        db.add("foo".into(), sample("1.0", &["etc/", "bin/foo"]));
        db.commit().unwrap();

        let text = fs::read_to_string(root.join(DB_FILE)).unwrap();
        // paths sort lexicographically inside a record
        assert_eq!(text, "foo\n1.0\nbin/foo\netc/\n\n");
    }

    #[test]
    fn test_commit_postconditions() {
        let (_tmp, root) = pkg_root();
        let mut db = Database::open(root.as_str()).unwrap();
        db.add("foo".into(), sample("1.0", &["bin/foo"]));
        db.commit().unwrap();
        let first = fs::read(root.join(DB_FILE)).unwrap();

        db.add("bar".into(), sample("1.1", &["bin/bar"]));
        db.commit().unwrap();

        let db_path = root.join(DB_FILE);
        assert!(!root.join(format!("{DB_FILE}.incomplete_transaction")).exists());
        // the backup is a byte-exact copy of the prior database
        let backup = fs::read(root.join(format!("{DB_FILE}.backup"))).unwrap();
        assert_eq!(backup, first);
        assert_ne!(fs::read(db_path).unwrap(), first);
    }

    #[test]
    fn test_commit_cleans_stale_transaction_file() {
        let (_tmp, root) = pkg_root();
        let stale = root.join(format!("{DB_FILE}.incomplete_transaction"));
        fs::write(&stale, b"leftover from a crash").unwrap();

        let mut db = Database::open(root.as_str()).unwrap();
        db.add("foo".into(), sample("1.0", &["bin/foo"]));
        db.commit().unwrap();

        assert!(!stale.exists());
        assert!(fs::read_to_string(root.join(DB_FILE)).unwrap().contains("foo"));
    }

    #[test]
    fn test_empty_entries_never_written() {
        let (_tmp, root) = pkg_root();
        let mut db = Database::open(root.as_str()).unwrap();
        db.add("empty".into(), sample("1.0", &[]));
        db.add("foo".into(), sample("1.0", &["bin/foo"]));
        db.commit().unwrap();

        let reloaded = Database::open(root.as_str()).unwrap();
        assert!(!reloaded.installed("empty"));
        assert!(reloaded.installed("foo"));
    }

    #[test]
    fn test_unterminated_trailing_record_accepted() {
        let (_tmp, root) = pkg_root();
        fs::write(root.join(DB_FILE), "foo\n1.0\nbin/foo").unwrap();

        let db = Database::open(root.as_str()).unwrap();
        assert_eq!(db.files_of("foo").unwrap().len(), 1);
    }

    #[test]
    fn test_open_missing_database_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let err = Database::open(tmp.path().to_str().unwrap()).unwrap_err();
        assert!(matches!(err, Error::DatabaseIo { op: "open", .. }));
    }

    #[test]
    fn test_open_normalizes_root() {
        let (_tmp, root) = pkg_root();
        let sloppy = format!("{root}//");
        let db = Database::open(&sloppy).unwrap();
        assert_eq!(db.root(), root.as_path());

        // the empty root means "/"; the host may or may not carry a
        // database there, but the resolved path must be absolute
        match Database::open("") {
            Ok(db) => assert_eq!(db.root(), Utf8Path::new("/")),
            Err(Error::DatabaseIo { path, .. }) => assert_eq!(path, format!("/{DB_FILE}")),
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_owners() {
        let (_tmp, root) = pkg_root();
        let mut db = Database::open(root.as_str()).unwrap();
        db.add("foo".into(), sample("1.0", &["bin/foo", "share/man/foo.1"]));
        db.add("bar".into(), sample("1.0", &["bin/bar"]));

        let re = Regex::new("^bin/").unwrap();
        let mut owners = db.owners(&re);
        owners.sort();
        assert_eq!(owners, vec![("bar", "bin/bar"), ("foo", "bin/foo")]);
    }
}

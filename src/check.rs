use std::collections::BTreeSet;

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;

use crate::db::Database;
use crate::error::{Error, Result};
use crate::fsutil;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audit {
    Links,
    Missing,
    All,
}

impl Audit {
    fn links(self) -> bool {
        matches!(self, Audit::Links | Audit::All)
    }

    fn missing(self) -> bool {
        matches!(self, Audit::Missing | Audit::All)
    }
}

/// One defect found by the audit. The front-end decides how much of the
/// attribution to print.
#[derive(Debug, PartialEq, Eq)]
pub enum Finding {
    /// A symlink whose immediate target does not exist under the root.
    BrokenLink {
        package: String,
        path: String,
        target: String,
    },
    /// A symlink that resolves to files the owning package does not claim.
    ForeignLink {
        package: String,
        path: String,
        target: String,
        owners: Vec<String>,
    },
    /// A catalogue path with nothing behind it on the filesystem.
    Missing {
        package: String,
        path: String,
        claimants: Vec<String>,
    },
}

/// Audit `names` (or every installed package) against the filesystem.
/// Never mutates anything; callers hold a shared lock for a consistent
/// view.
pub fn run(db: &Database, names: &[String], audit: Audit) -> Result<Vec<Finding>> {
    let targets: Vec<String> = if names.is_empty() {
        let mut all: Vec<String> = db.packages().map(|(name, _)| name.clone()).collect();
        all.sort();
        all
    } else {
        for name in names {
            if !db.installed(name) {
                return Err(Error::NotInstalled(name.clone()));
            }
        }
        names.to_vec()
    };

    let canonical_root = db
        .root()
        .canonicalize_utf8()
        .unwrap_or_else(|_| db.root().to_path_buf());

    let mut findings = Vec::new();
    for name in &targets {
        let files = db.files_of(name).cloned().unwrap_or_default();
        if audit.links() {
            audit_links(db, &canonical_root, name, &files, &mut findings);
        }
        if audit.missing() {
            audit_missing(db, name, &files, &mut findings);
        }
    }
    Ok(findings)
}

fn audit_links(
    db: &Database,
    canonical_root: &Utf8Path,
    name: &str,
    files: &BTreeSet<String>,
    findings: &mut Vec<Finding>,
) {
    for rel in files {
        let path = db.fs_path(rel);
        let Ok(meta) = path.symlink_metadata() else {
            continue;
        };
        if !meta.file_type().is_symlink() {
            continue;
        }
        let Ok(target) = path.read_link_utf8() else {
            continue;
        };

        // one resolution step: absolute targets re-anchor under the root,
        // relative ones join the link's parent directory
        let immediate = if target.is_absolute() {
            db.fs_path(target.as_str().trim_start_matches('/'))
        } else {
            let parent = path.parent().unwrap_or_else(|| db.root());
            Utf8PathBuf::from(fsutil::normalize(parent.join(&target).as_str()))
        };

        if !fsutil::exists(&immediate) {
            findings.push(Finding::BrokenLink {
                package: name.to_string(),
                path: rel.clone(),
                target: target.to_string(),
            });
            continue;
        }

        let real = immediate
            .canonicalize_utf8()
            .unwrap_or_else(|_| immediate.clone());

        let mut owners = BTreeSet::new();
        let mut owned_by_self = false;
        for resolved in [&immediate, &real] {
            let Some(resolved_rel) = rel_under(resolved, &[db.root(), canonical_root]) else {
                continue;
            };
            for (owner, _) in db.owners(&literal_pattern(&resolved_rel)) {
                if owner == name {
                    owned_by_self = true;
                }
                owners.insert(owner.to_string());
            }
        }
        if !owned_by_self {
            findings.push(Finding::ForeignLink {
                package: name.to_string(),
                path: rel.clone(),
                target: target.to_string(),
                owners: owners.into_iter().collect(),
            });
        }
    }
}

fn audit_missing(
    db: &Database,
    name: &str,
    files: &BTreeSet<String>,
    findings: &mut Vec<Finding>,
) {
    for rel in files {
        if fsutil::exists(&db.fs_path(rel)) {
            continue;
        }
        let claimants = db
            .packages()
            .filter(|(_, package)| package.files.contains(rel))
            .map(|(claimant, _)| claimant.clone())
            .collect();
        findings.push(Finding::Missing {
            package: name.to_string(),
            path: rel.clone(),
            claimants,
        });
    }
}

fn rel_under(path: &Utf8Path, roots: &[&Utf8Path]) -> Option<String> {
    roots
        .iter()
        .find_map(|root| path.strip_prefix(root).ok())
        .map(|rel| rel.as_str().to_string())
}

/// Catalogue lookup by literal path, quoting regex metacharacters. The
/// optional trailing slash lets a file path match a directory entry.
fn literal_pattern(path: &str) -> Regex {
    Regex::new(&format!("^{}/?$", regex::escape(path))).expect("escaped literal is a valid pattern")
}

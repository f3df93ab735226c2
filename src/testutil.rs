//! Shared fixtures: primed root directories and in-memory built archives.

use std::fs;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use tar::{Builder, EntryType, Header};
use tempfile::TempDir;

use crate::db;

/// Every archive entry is stamped with this uid/gid pair. The ids are
/// unassigned on any sane host, which keeps name lookups falling back to
/// numbers and test expectations host-independent.
pub const TEST_UID: u64 = 54321;
pub const TEST_GID: u64 = 54322;

/// A root directory primed like a real installation: the lock directory
/// exists and the database file is present and empty.
pub fn pkg_root() -> (TempDir, Utf8PathBuf) {
    let tmp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).unwrap();
    fs::create_dir_all(root.join(db::PKG_DIR)).unwrap();
    fs::write(root.join(db::DB_FILE), b"").unwrap();
    (tmp, root)
}

pub enum TarEntry<'a> {
    Dir(&'a str, u32),
    File(&'a str, u32, &'a [u8]),
    Symlink(&'a str, &'a str),
    SymlinkMode(&'a str, &'a str, u32),
    Hardlink(&'a str, &'a str),
    Char(&'a str, u32, u32, u32),
}

/// Build a package archive at `path`, compressed according to its suffix.
pub fn write_archive(path: &Utf8Path, entries: &[TarEntry<'_>]) {
    let tar = build_tar(entries);
    let data = match path.extension() {
        Some("gz") => {
            let mut encoder =
                flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
            encoder.write_all(&tar).unwrap();
            encoder.finish().unwrap()
        }
        Some("bz2") => {
            let mut encoder =
                bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::default());
            encoder.write_all(&tar).unwrap();
            encoder.finish().unwrap()
        }
        Some("xz") => {
            let mut encoder = xz2::write::XzEncoder::new(Vec::new(), 6);
            encoder.write_all(&tar).unwrap();
            encoder.finish().unwrap()
        }
        Some("zst") => zstd::encode_all(&tar[..], 0).unwrap(),
        _ => tar,
    };
    fs::write(path, data).unwrap();
}

fn build_tar(entries: &[TarEntry<'_>]) -> Vec<u8> {
    let mut builder = Builder::new(Vec::new());
    for entry in entries {
        match entry {
            TarEntry::Dir(path, mode) => {
                let mut header = base_header(EntryType::Directory, *mode, 0);
                builder
                    .append_data(&mut header, format!("{path}/"), std::io::empty())
                    .unwrap();
            }
            TarEntry::File(path, mode, content) => {
                let mut header = base_header(EntryType::Regular, *mode, content.len() as u64);
                builder.append_data(&mut header, *path, *content).unwrap();
            }
            TarEntry::Symlink(path, target) => {
                append_link(&mut builder, EntryType::Symlink, path, target, 0o777);
            }
            TarEntry::SymlinkMode(path, target, mode) => {
                append_link(&mut builder, EntryType::Symlink, path, target, *mode);
            }
            TarEntry::Hardlink(path, target) => {
                append_link(&mut builder, EntryType::Link, path, target, 0o644);
            }
            TarEntry::Char(path, mode, major, minor) => {
                let mut header = base_header(EntryType::Char, *mode, 0);
                header.set_device_major(*major).unwrap();
                header.set_device_minor(*minor).unwrap();
                builder
                    .append_data(&mut header, *path, std::io::empty())
                    .unwrap();
            }
        }
    }
    builder.into_inner().unwrap()
}

fn append_link(builder: &mut Builder<Vec<u8>>, kind: EntryType, path: &str, target: &str, mode: u32) {
    let mut header = base_header(kind, mode, 0);
    builder.append_link(&mut header, path, target).unwrap();
}

fn base_header(kind: EntryType, mode: u32, size: u64) -> Header {
    let mut header = Header::new_gnu();
    header.set_entry_type(kind);
    header.set_mode(mode);
    header.set_size(size);
    header.set_uid(TEST_UID);
    header.set_gid(TEST_GID);
    header.set_mtime(1_700_000_000);
    header
}

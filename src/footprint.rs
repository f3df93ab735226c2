use std::fmt::Write as _;
use std::io;

use camino::Utf8Path;
use tar::EntryType;

use crate::archive;
use crate::error::{Error, Result};

/// One collected header, enough to print a manifest line without ever
/// touching the entry data.
struct FpEntry {
    path: String,
    mode: u32,
    uid: u64,
    gid: u64,
    size: u64,
    kind: EntryType,
    link_target: Option<String>,
    device: Option<(u32, u32)>,
}

/// Render the deterministic manifest of an archive: one line per entry,
/// sorted by path, `<perms>\t<user>/<group>\t<path><suffix>`.
///
/// Symlinks always print `lrwxrwxrwx` whatever mode the archive stored,
/// so footprints of two builds of the same package diff cleanly. Hardlink
/// entries borrow the mode of their target entry.
pub fn footprint(path: &Utf8Path) -> Result<String> {
    let read_err = |source: io::Error| Error::ArchiveRead {
        path: path.to_string(),
        source,
    };

    let mut archive = archive::open_tar(path)?;
    let mut entries = Vec::new();
    for entry in archive.entries().map_err(&read_err)? {
        let entry = entry.map_err(&read_err)?;
        let header = entry.header();
        let kind = header.entry_type();

        let name = archive::entry_name(&entry).map_err(&read_err)?;
        if name.is_empty() {
            continue;
        }
        let link_target = entry
            .link_name()
            .map_err(&read_err)?
            .map(|t| t.to_string_lossy().into_owned());
        let device = match kind {
            EntryType::Char | EntryType::Block => Some((
                header.device_major().map_err(&read_err)?.unwrap_or(0),
                header.device_minor().map_err(&read_err)?.unwrap_or(0),
            )),
            _ => None,
        };

        entries.push(FpEntry {
            path: name,
            mode: full_mode(kind, header.mode().map_err(&read_err)?),
            uid: header.uid().map_err(&read_err)?,
            gid: header.gid().map_err(&read_err)?,
            size: header.size().map_err(&read_err)?,
            kind,
            link_target,
            device,
        });
    }
    if entries.is_empty() {
        return Err(Error::EmptyPackage(path.to_string()));
    }

    entries.sort_by(|a, b| a.path.cmp(&b.path));

    let mut out = String::new();
    for entry in &entries {
        let perms = match entry.kind {
            EntryType::Symlink => "lrwxrwxrwx".to_string(),
            EntryType::Link => {
                // hardlinks report the mode of the entry they point at
                let target = entry
                    .link_target
                    .as_deref()
                    .map(archive::clean_rel)
                    .unwrap_or_default();
                match entries.binary_search_by(|probe| probe.path.as_str().cmp(target.as_str())) {
                    Ok(found) => unix_mode::to_string(entries[found].mode),
                    Err(_) => unix_mode::to_string(entry.mode),
                }
            }
            _ => unix_mode::to_string(entry.mode),
        };

        let user = uzers::get_user_by_uid(entry.uid as u32)
            .map(|u| u.name().to_string_lossy().into_owned())
            .unwrap_or_else(|| entry.uid.to_string());
        let group = uzers::get_group_by_gid(entry.gid as u32)
            .map(|g| g.name().to_string_lossy().into_owned())
            .unwrap_or_else(|| entry.gid.to_string());

        let suffix = match entry.kind {
            EntryType::Symlink => {
                format!(" -> {}", entry.link_target.as_deref().unwrap_or_default())
            }
            EntryType::Char | EntryType::Block => {
                let (major, minor) = entry.device.unwrap_or((0, 0));
                format!(" ({major}, {minor})")
            }
            EntryType::Regular if entry.size == 0 => " (EMPTY)".to_string(),
            _ => String::new(),
        };

        let _ = writeln!(out, "{perms}\t{user}/{group}\t{}{suffix}", entry.path);
    }
    Ok(out)
}

fn full_mode(kind: EntryType, perm: u32) -> u32 {
    let type_bits = match kind {
        EntryType::Directory => libc::S_IFDIR,
        EntryType::Regular | EntryType::Continuous | EntryType::GNUSparse | EntryType::Link => {
            libc::S_IFREG
        }
        EntryType::Symlink => libc::S_IFLNK,
        EntryType::Char => libc::S_IFCHR,
        EntryType::Block => libc::S_IFBLK,
        EntryType::Fifo => libc::S_IFIFO,
        _ => 0,
    };
    type_bits | (perm & 0o7777)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{TarEntry, pkg_root, write_archive};

    // 54321/54322 are unassigned on any sane host, forcing the numeric
    // fallback and keeping the expected text host-independent
    const EXPECTED: &str = "-rwxr-xr-x\t54321/54322\tbin/foo\n\
                            -rwxr-xr-x\t54321/54322\tbin/hard\n\
                            crw-rw-rw-\t54321/54322\tdev/null (1, 3)\n\
                            lrwxrwxrwx\t54321/54322\tlib/x -> y\n\
                            drwxr-xr-x\t54321/54322\tshare/foo/\n\
                            -rw-r--r--\t54321/54322\tvar/empty (EMPTY)\n";

    fn sample_archive() -> (tempfile::TempDir, camino::Utf8PathBuf) {
        let (tmp, root) = pkg_root();
        let archive = root.join("foo#1.0.pkg.tar.gz");
        write_archive(
            &archive,
            &[
                TarEntry::File("bin/foo", 0o755, b"hi"),
                TarEntry::Hardlink("bin/hard", "bin/foo"),
                TarEntry::Char("dev/null", 0o666, 1, 3),
                // the stored symlink mode is deliberately not 0777
                TarEntry::SymlinkMode("lib/x", "y", 0o644),
                TarEntry::Dir("share/foo", 0o755),
                TarEntry::File("var/empty", 0o644, b""),
            ],
        );
        (tmp, archive)
    }

    #[test]
    fn test_footprint_lines() {
        let (_tmp, archive) = sample_archive();
        assert_eq!(footprint(&archive).unwrap(), EXPECTED);
    }

    #[test]
    fn test_footprint_is_deterministic() {
        let (_tmp, archive) = sample_archive();
        assert_eq!(footprint(&archive).unwrap(), footprint(&archive).unwrap());
    }

    #[test]
    fn test_footprint_empty_archive() {
        let (_tmp, root) = pkg_root();
        let archive = root.join("foo#1.0.pkg.tar.gz");
        write_archive(&archive, &[]);
        assert!(matches!(
            footprint(&archive),
            Err(Error::EmptyPackage(_))
        ));
    }
}

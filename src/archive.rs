use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{self, Read};

use camino::Utf8Path;
use tar::{Archive, Entry, EntryType};

use crate::db::Package;
use crate::error::{Error, Result};
use crate::fsutil;

/// Split `<name>#<version>.pkg.tar[.<z>]` out of a path's basename.
///
/// The name is everything before the first `#`, the version everything
/// after it up to the last `.pkg.tar` occurrence. Either being empty is
/// fatal.
pub fn parse_filename(path: &str) -> Result<(String, String)> {
    let basename = path.rsplit('/').next().unwrap_or(path);
    let bad = || Error::BadPackageName(basename.to_string());

    let (name, rest) = basename.split_once('#').ok_or_else(bad)?;
    let end = rest.rfind(".pkg.tar").unwrap_or(rest.len());
    let version = &rest[..end];

    if name.is_empty() || version.is_empty() {
        return Err(bad());
    }
    Ok((name.to_string(), version.to_string()))
}

/// Open the archive with the decoder its suffix calls for.
fn open_reader(path: &Utf8Path) -> Result<Box<dyn Read>> {
    let open_err = |source: io::Error| Error::ArchiveOpen {
        path: path.to_string(),
        source,
    };
    let unsupported = |what: &str| {
        open_err(io::Error::new(io::ErrorKind::Unsupported, what.to_string()))
    };

    let file = File::open(path).map_err(open_err)?;
    if path.as_str().ends_with(".pkg.tar") {
        return Ok(Box::new(file));
    }
    match path.extension() {
        Some("gz") => Ok(Box::new(flate2::read::GzDecoder::new(file))),
        Some("bz2") => Ok(Box::new(bzip2::read::BzDecoder::new(file))),
        Some("xz") => Ok(Box::new(xz2::read::XzDecoder::new(file))),
        Some("zst") => Ok(Box::new(zstd::Decoder::new(file).map_err(open_err)?)),
        Some("lz") => Err(unsupported("lzip compression is not supported")),
        _ => Err(unsupported("unrecognized archive format")),
    }
}

/// Open the archive for header enumeration only.
pub fn open_tar(path: &Utf8Path) -> Result<Archive<Box<dyn Read>>> {
    Ok(Archive::new(open_reader(path)?))
}

/// Walk the archive headers once and collect the package's file list.
/// The entry data is never read.
pub fn open_pkg(path: &Utf8Path) -> Result<(String, Package)> {
    let (name, version) = parse_filename(path.as_str())?;
    let read_err = |source: io::Error| Error::ArchiveRead {
        path: path.to_string(),
        source,
    };

    let mut archive = open_tar(path)?;
    let mut files = BTreeSet::new();
    for entry in archive.entries().map_err(&read_err)? {
        let entry = entry.map_err(&read_err)?;
        let file = entry_name(&entry).map_err(&read_err)?;
        if !file.is_empty() {
            files.insert(file);
        }
    }
    if files.is_empty() {
        return Err(Error::EmptyPackage(path.to_string()));
    }
    Ok((name, Package { version, files }))
}

/// Open the archive for materialisation: permissions and mtimes are taken
/// from the headers, ownership too when running as root (same rule as
/// tar(1)), and existing files are replaced rather than written through.
pub fn open_extractor(path: &Utf8Path) -> Result<Archive<Box<dyn Read>>> {
    let mut archive = Archive::new(open_reader(path)?);
    archive.set_preserve_permissions(true);
    archive.set_preserve_mtime(true);
    archive.set_unpack_xattrs(false);
    archive.set_preserve_ownerships(nix::unistd::Uid::effective().is_root());
    Ok(archive)
}

/// Strip a raw tar pathname down to package-relative form: no leading
/// `./` or `/`, slash runs collapsed.
pub(crate) fn clean_rel(path: &str) -> String {
    let mut name = fsutil::normalize(path.trim_start_matches('/'));
    if let Some(stripped) = name.strip_prefix("./") {
        name = stripped.to_string();
    }
    name
}

/// The package-relative pathname of an entry; directories are marked with
/// a trailing `/`.
pub fn entry_name<R: Read>(entry: &Entry<'_, R>) -> io::Result<String> {
    let path = entry.path()?;
    let path = path
        .to_str()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "non-UTF-8 pathname"))?;

    let mut name = clean_rel(path);
    if entry.header().entry_type() == EntryType::Directory && !name.is_empty() && !name.ends_with('/')
    {
        name.push('/');
    }
    Ok(name)
}

/// Materialise one entry at `dest`.
///
/// `root` anchors hard-link targets, which tar stores package-relative.
/// The tar crate refuses to create device nodes, so those go through
/// mknod directly.
pub fn unpack_entry<R: Read>(
    entry: &mut Entry<'_, R>,
    dest: &Utf8Path,
    root: &Utf8Path,
) -> io::Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    let kind = entry.header().entry_type();
    match kind {
        EntryType::Char | EntryType::Block => unpack_device(entry, kind, dest),
        EntryType::Link => {
            let target = entry.link_name()?.ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidData, "hard link without target")
            })?;
            let target = target.to_str().ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidData, "non-UTF-8 link target")
            })?;
            let src = root.join(fsutil::normalize(target.trim_start_matches('/')));
            unlink_existing(dest)?;
            fs::hard_link(src, dest)
        }
        _ => {
            if !kind.is_dir() {
                unlink_existing(dest)?;
            }
            entry.unpack(dest).map(|_| ())
        }
    }
}

fn unpack_device<R: Read>(entry: &Entry<'_, R>, kind: EntryType, dest: &Utf8Path) -> io::Result<()> {
    use nix::sys::stat::{Mode, SFlag, makedev, mknod};

    unlink_existing(dest)?;
    let header = entry.header();
    let major = header.device_major()?.unwrap_or(0);
    let minor = header.device_minor()?.unwrap_or(0);
    let mode = Mode::from_bits_truncate(header.mode()?);
    let sflag = if kind == EntryType::Char {
        SFlag::S_IFCHR
    } else {
        SFlag::S_IFBLK
    };
    mknod(
        dest.as_std_path(),
        sflag,
        mode,
        makedev(u64::from(major), u64::from(minor)),
    )?;
    if nix::unistd::Uid::effective().is_root() {
        let uid = nix::unistd::Uid::from_raw(header.uid()? as u32);
        let gid = nix::unistd::Gid::from_raw(header.gid()? as u32);
        nix::unistd::chown(dest.as_std_path(), Some(uid), Some(gid))?;
    }
    Ok(())
}

fn unlink_existing(path: &Utf8Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

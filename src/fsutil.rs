use std::fs::{self, File};
use std::io::{self, Read};
use std::os::unix::fs::{FileTypeExt, MetadataExt};

use camino::Utf8Path;

/// Collapse any run of consecutive `/` into a single `/`.
///
/// `.` and `..` components are left alone, as is a leading `/`.
pub fn normalize(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut prev_slash = false;
    for c in path.chars() {
        if c == '/' {
            if !prev_slash {
                out.push('/');
            }
            prev_slash = true;
        } else {
            out.push(c);
            prev_slash = false;
        }
    }
    out
}

/// Whether `path` names anything at all, without following a final symlink.
pub fn exists(path: &Utf8Path) -> bool {
    path.symlink_metadata().is_ok()
}

/// Whether `path` is a regular file of zero length.
pub fn is_empty_regular(path: &Utf8Path) -> bool {
    path.symlink_metadata()
        .map(|m| m.file_type().is_file() && m.len() == 0)
        .unwrap_or(false)
}

/// Whether two paths have identical content.
///
/// Regular files are compared as byte streams in 4 KiB blocks, symlinks by
/// target, character and block devices by device number. Any other pairing
/// of file types compares unequal.
pub fn content_equal(a: &Utf8Path, b: &Utf8Path) -> io::Result<bool> {
    let ma = a.symlink_metadata()?;
    let mb = b.symlink_metadata()?;
    let (ta, tb) = (ma.file_type(), mb.file_type());

    if ta.is_file() && tb.is_file() {
        if ma.len() != mb.len() {
            return Ok(false);
        }
        let mut fa = File::open(a)?;
        let mut fb = File::open(b)?;
        let mut ba = [0u8; 4096];
        let mut bb = [0u8; 4096];
        loop {
            let na = read_block(&mut fa, &mut ba)?;
            let nb = read_block(&mut fb, &mut bb)?;
            if na != nb || ba[..na] != bb[..nb] {
                return Ok(false);
            }
            if na == 0 {
                return Ok(true);
            }
        }
    } else if ta.is_symlink() && tb.is_symlink() {
        Ok(a.read_link()? == b.read_link()?)
    } else if (ta.is_char_device() && tb.is_char_device())
        || (ta.is_block_device() && tb.is_block_device())
    {
        Ok(ma.rdev() == mb.rdev())
    } else {
        Ok(false)
    }
}

/// Fill `buf` as far as the stream allows; a short count means EOF.
fn read_block(f: &mut File, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = f.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Whether two paths agree on mode bits, uid and gid.
pub fn perms_equal(a: &Utf8Path, b: &Utf8Path) -> io::Result<bool> {
    let ma = a.symlink_metadata()?;
    let mb = b.symlink_metadata()?;
    Ok(ma.mode() == mb.mode() && ma.uid() == mb.uid() && ma.gid() == mb.gid())
}

/// Remove `path`, then walk upward removing parents as they empty out,
/// stopping at (and never removing) `basedir`. The first removal that
/// fails ends the walk; failures are absorbed.
pub fn prune_up(basedir: &Utf8Path, path: &Utf8Path) {
    if path == basedir {
        return;
    }
    let removed = match path.symlink_metadata() {
        Ok(m) if m.is_dir() => fs::remove_dir(path).is_ok(),
        Ok(_) => fs::remove_file(path).is_ok(),
        Err(_) => false,
    };
    if removed && let Some(parent) = path.parent() {
        prune_up(basedir, parent);
    }
}

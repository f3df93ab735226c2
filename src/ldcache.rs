use std::process::Command;

use camino::Utf8Path;

const LDCONFIG: &str = "/sbin/ldconfig";

/// Refresh the shared-library cache under `root` after an install or
/// remove. Only runs when the root carries an `etc/ld.so.conf`; a failure
/// is reported and absorbed.
pub fn refresh(root: &Utf8Path) {
    if !root.join("etc/ld.so.conf").exists() {
        return;
    }
    match Command::new(LDCONFIG).arg("-r").arg(root.as_str()).status() {
        Ok(status) if status.success() => {}
        Ok(status) => tracing::warn!(%status, "ldconfig failed"),
        Err(e) => tracing::warn!(error = %e, "could not run ldconfig"),
    }
}

//! Signal shielding for database mutators.
//!
//! The commit protocol is only atomic if a stray SIGINT cannot interrupt
//! the rename, and a half-extracted archive is worse than a slow one, so
//! mutating verbs ignore the fatal signals for their whole run.

use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};

/// Ignore the signals that would normally kill the process mid-mutation.
/// The previous handlers are restored when the [`Guard`] is dropped.
pub fn shield_mutation() -> nix::Result<Guard> {
    ignore([
        Signal::SIGHUP,
        Signal::SIGINT,
        Signal::SIGQUIT,
        Signal::SIGTERM,
    ])
}

fn ignore(signals: impl IntoIterator<Item = Signal>) -> nix::Result<Guard> {
    Ok(Guard(
        signals
            .into_iter()
            .map(|signal| unsafe {
                let action = sigaction(
                    signal,
                    &SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty()),
                )?;
                Ok(PrevHandler { signal, action })
            })
            .collect::<nix::Result<_>>()?,
    ))
}

/// Restores the previous signal handlers when dropped.
pub struct Guard(Vec<PrevHandler>);

impl Drop for Guard {
    fn drop(&mut self) {
        for PrevHandler { signal, action } in &self.0 {
            unsafe {
                let _ = sigaction(*signal, action);
            }
        }
    }
}

struct PrevHandler {
    signal: Signal,
    action: SigAction,
}

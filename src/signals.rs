//! Signal disposition helpers.
//!
//! The parent neutralises `SIGCHLD` around each execution so the reaper can
//! rely on `waitpid`; children restore every default disposition between
//! `fork` and `exec` so the program starts with a clean slate.

use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

use crate::error::retry_eintr;

fn default_action() -> SigAction {
    SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty())
}

/// Installs the default `SIGCHLD` disposition, returning the one it
/// replaced.
pub(crate) fn neutralize_sigchld() -> nix::Result<SigAction> {
    let action = default_action();
    retry_eintr(|| unsafe { sigaction(Signal::SIGCHLD, &action) })
}

/// Restores a `SIGCHLD` disposition saved by [`neutralize_sigchld`].
pub(crate) fn restore_sigchld(saved: &SigAction) {
    let _ = retry_eintr(|| unsafe { sigaction(Signal::SIGCHLD, saved) });
}

/// Installs the default disposition for every catchable signal the platform
/// exposes. Runs on the child side of `fork`, between `dup2` and `exec`;
/// failures are ignored.
pub(crate) fn restore_default_handlers() {
    let action = default_action();
    for signal in Signal::iterator() {
        // SIGKILL and SIGSTOP dispositions cannot be changed.
        if matches!(signal, Signal::SIGKILL | Signal::SIGSTOP) {
            continue;
        }
        let _ = unsafe { sigaction(signal, &action) };
    }
}

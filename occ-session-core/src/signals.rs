//! Signal-masked fork support (design notes, "Signal-masked fork").
//!
//! The supervisor blocks a fixed signal set at startup so it can serialize
//! reaping and control delivery through its own event loop. That set is
//! captured once as an immutable value and passed explicitly to anything
//! that forks a hook child — never read back out of a process-global
//! mutable variable.

use nix::sys::signal::{self, SigSet, SigmaskHow, Signal};

/// The signals the supervisor blocks for its own event loop: SIGCHLD (to
/// serialize reaping), SIGTERM/SIGHUP/SIGINT (to serialize shutdown and
/// reconfiguration against in-flight session work).
#[derive(Debug, Clone, Copy)]
pub struct BlockedSignals {
    mask: SigSet,
}

impl BlockedSignals {
    /// Builds the supervisor's blocked-signal set and applies it to the
    /// calling thread. Must be called once, early in `main`, before any
    /// hook is ever forked.
    pub fn install() -> nix::Result<Self> {
        let mut mask = SigSet::empty();
        mask.add(Signal::SIGCHLD);
        mask.add(Signal::SIGTERM);
        mask.add(Signal::SIGHUP);
        mask.add(Signal::SIGINT);
        signal::sigprocmask(SigmaskHow::SIG_BLOCK, Some(&mask), None)?;
        Ok(BlockedSignals { mask })
    }

    /// Restores the default disposition for the blocked set. Intended to run
    /// inside a `pre_exec` closure in a freshly-forked hook child, atomically
    /// before `exec`, so the script runs unblocked exactly as the original
    /// C implementation's `sigprocmask(SIG_SETMASK, &sig_default_set, NULL)`
    /// does.
    ///
    /// # Safety
    /// Must only be called between `fork` and `exec` in the child, per the
    /// same constraints as `std::os::unix::process::CommandExt::pre_exec`:
    /// only async-signal-safe operations are permitted here.
    pub unsafe fn unblock_in_child(&self) -> std::io::Result<()> {
        signal::sigprocmask(SigmaskHow::SIG_UNBLOCK, Some(&self.mask), None)
            .map_err(|e| std::io::Error::from_raw_os_error(e as i32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_contains_expected_signals() {
        let mask = {
            let mut m = SigSet::empty();
            m.add(Signal::SIGCHLD);
            m.add(Signal::SIGTERM);
            m.add(Signal::SIGHUP);
            m.add(Signal::SIGINT);
            m
        };
        assert!(mask.contains(Signal::SIGCHLD));
        assert!(mask.contains(Signal::SIGINT));
        assert!(!mask.contains(Signal::SIGUSR1));
    }
}

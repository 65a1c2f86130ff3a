//! Hook Runner + Pending-Hooks Registry (spec §4.3–4.4).
//!
//! Forks a child for the configured connect/disconnect script (or the
//! firewall-wrapper script, per §4.2's indirection rule), applies the
//! Environment Binder's output to its environment, and execs it with no
//! arguments. The parent never waits synchronously: up-hooks register a
//! `PendingHandle` the supervisor resolves from `SIGCHLD`; down-hooks are
//! fire-and-forget.

use crate::config::ServerConfig;
use crate::env_binder;
use crate::error::{EngineError, EngineResult};
use crate::session::{Direction, Session};
use crate::signals::BlockedSignals;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use std::collections::HashMap;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::Command;

/// Outcome of a single `HookRunner::run` call.
#[derive(Debug)]
pub enum HookOutcome {
    /// No script was configured for this direction; nothing to wait for.
    NoHook,
    /// The hook was started and the caller does not need to wait (down).
    Done,
    /// The hook was started and the session must not forward packets until
    /// this handle resolves via the registry (up).
    Pending(PendingHandle),
}

/// An in-flight hook child the registry is waiting on.
#[derive(Debug, Clone, Copy)]
pub struct PendingHandle {
    pub pid: Pid,
    pub direction: Direction,
    pub session_id: u32,
}

pub struct HookRunner {
    blocked: BlockedSignals,
}

impl HookRunner {
    pub fn new(blocked: BlockedSignals) -> Self {
        HookRunner { blocked }
    }

    /// Runs the hook for `direction` on `session`, per spec §4.3.
    pub fn run(
        &self,
        config: &ServerConfig,
        session: &Session,
        direction: Direction,
    ) -> EngineResult<HookOutcome> {
        let selected_script = match direction {
            Direction::Up => &config.connect_script,
            Direction::Down => &config.disconnect_script,
        };
        let Some(selected_script) = selected_script else {
            return Ok(HookOutcome::NoHook);
        };

        let invoked_path: &Path = if session.overrides.restrict_user_to_routes {
            config
                .firewall_wrapper_script
                .as_deref()
                .unwrap_or(selected_script)
        } else {
            selected_script
        };

        let env = env_binder::bind(config, session, direction)?;

        let pid = self.spawn(invoked_path, env)?;

        match direction {
            Direction::Up => Ok(HookOutcome::Pending(PendingHandle {
                pid,
                direction,
                session_id: session.session_id,
            })),
            Direction::Down => Ok(HookOutcome::Done),
        }
    }

    /// Forks and execs `path` with the given environment, argv = [path].
    /// Uses `pre_exec` (not a raw `fork`) so environment application goes
    /// through `execve`'s own `envp` rather than mutating the child's
    /// process environment after fork — the preferred option the design
    /// notes call out for a runtime with background tasks. The binder's
    /// bindings overlay the inherited environment rather than replacing it,
    /// so PATH/HOME/LANG and the rest of the parent's environment survive
    /// into the script, matching the original fork-then-setenv behavior.
    fn spawn(&self, path: &Path, env: std::collections::BTreeMap<String, String>) -> EngineResult<Pid> {
        let blocked = self.blocked;
        let mut cmd = Command::new(path);
        cmd.envs(env);
        unsafe {
            cmd.pre_exec(move || blocked.unblock_in_child());
        }
        let child = cmd.spawn().map_err(EngineError::Spawn)?;
        Ok(Pid::from_raw(child.id() as i32))
    }
}

/// Maps hook-child pids to the handle the supervisor is waiting on.
#[derive(Default)]
pub struct PendingHooksRegistry {
    handles: HashMap<Pid, PendingHandle>,
}

/// Result of reaping one child: its handle plus whether the hook succeeded.
#[derive(Debug)]
pub struct ReapedHook {
    pub handle: PendingHandle,
    pub success: bool,
}

impl PendingHooksRegistry {
    pub fn new() -> Self {
        PendingHooksRegistry::default()
    }

    pub fn register(&mut self, handle: PendingHandle) {
        self.handles.insert(handle.pid, handle);
    }

    pub fn contains_session(&self, session_id: u32) -> bool {
        self.handles.values().any(|h| h.session_id == session_id)
    }

    /// Finds the pid of the (at most one, per spec's at-most-one-pending
    /// invariant) handle registered for `session_id`.
    pub fn pid_for_session(&self, session_id: u32) -> Option<Pid> {
        self.handles
            .values()
            .find(|h| h.session_id == session_id)
            .map(|h| h.pid)
    }

    /// Reaps all children ready to be collected, non-blocking (`WNOHANG`),
    /// looping until none remain. A reaped pid absent from the registry is
    /// a stray child (e.g. from another subsystem) and is simply skipped —
    /// benign per spec §4.4.
    pub fn reap_ready(&mut self) -> Vec<ReapedHook> {
        let mut reaped = Vec::new();
        loop {
            match waitpid(None, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::Exited(pid, code)) => {
                    if let Some(handle) = self.handles.remove(&pid) {
                        reaped.push(ReapedHook {
                            handle,
                            success: code == 0,
                        });
                    }
                }
                Ok(WaitStatus::Signaled(pid, _, _)) => {
                    if let Some(handle) = self.handles.remove(&pid) {
                        reaped.push(ReapedHook {
                            handle,
                            success: false,
                        });
                    }
                }
                Ok(WaitStatus::StillAlive) => break,
                Ok(_) => continue,
                Err(nix::errno::Errno::ECHILD) => break,
                Err(_) => break,
            }
        }
        reaped
    }

    /// Removes and returns a handle without waiting — used when a pending
    /// session is administratively killed (SIGTERM/SIGKILL) so the eventual
    /// `SIGCHLD` reap for that pid is a no-op stray.
    pub fn discard(&mut self, pid: Pid) -> Option<PendingHandle> {
        self.handles.remove(&pid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_enforces_at_most_one_handle_lookup_per_session() {
        let mut registry = PendingHooksRegistry::new();
        assert!(!registry.contains_session(42));
        registry.register(PendingHandle {
            pid: Pid::from_raw(1234),
            direction: Direction::Up,
            session_id: 42,
        });
        assert!(registry.contains_session(42));
        assert!(registry.discard(Pid::from_raw(1234)).is_some());
        assert!(!registry.contains_session(42));
    }

    #[test]
    fn no_hook_configured_returns_no_hook_outcome() {
        // sigprocmask(SIG_BLOCK, ...) is idempotent, so re-installing in a
        // test process that already blocked these signals is harmless.
        let blocked = BlockedSignals::install().expect("blocked signal mask");
        let runner = HookRunner::new(blocked);
        let config = ServerConfig::default();
        let session = crate::session::Session {
            session_id: 1,
            worker_pid: 1,
            username: "alice".into(),
            groupname: "users".into(),
            hostname: "h".into(),
            remote_peer_addr: None,
            our_local_addr: None,
            ipv4_lease: None,
            ipv6_lease: None,
            tunnel_device_name: "tun0".into(),
            overrides: Default::default(),
            bytes_in: 0,
            bytes_out: 0,
            connect_time: None,
            state: crate::session::SessionState::Authenticated,
        };
        let outcome = runner.run(&config, &session, Direction::Up).unwrap();
        assert!(matches!(outcome, HookOutcome::NoHook));
    }
}

//! The single-owner supervisor: holds every session record and the
//! pending-hooks registry, and drives the state machine of spec §4.4. Never
//! mutated from more than one execution context (spec §5) — callers
//! (control surface, SIGCHLD reaper) all funnel through `&mut Supervisor`.

use crate::accounting::AccountingWriter;
use crate::config::ServerConfig;
use crate::env_binder;
use crate::error::EngineResult;
use crate::hooks::{HookOutcome, HookRunner, PendingHooksRegistry};
use crate::session::{Direction, Session, SessionState};
use nix::sys::signal::{kill, Signal};
use occ_protocol::SessionTuple;
use std::collections::HashMap;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

pub struct Supervisor {
    pub config: ServerConfig,
    sessions: HashMap<u32, Session>,
    pending: PendingHooksRegistry,
    hook_runner: HookRunner,
    accounting: AccountingWriter,
}

impl Supervisor {
    pub fn new(config: ServerConfig, hook_runner: HookRunner, accounting: AccountingWriter) -> Self {
        Supervisor {
            config,
            sessions: HashMap::new(),
            pending: PendingHooksRegistry::new(),
            hook_runner,
            accounting,
        }
    }

    /// Registers a freshly-authenticated session record, taking ownership.
    pub fn insert_session(&mut self, session: Session) {
        self.sessions.insert(session.session_id, session);
    }

    pub fn session(&self, id: u32) -> Option<&Session> {
        self.sessions.get(&id)
    }

    pub fn session_ids_for_username<'a>(&'a self, username: &'a str) -> impl Iterator<Item = u32> + 'a {
        self.sessions
            .values()
            .filter(move |s| s.username == username)
            .map(|s| s.session_id)
    }

    /// `user_connected` (spec §4.4's Authenticated row): writes login
    /// accounting, then forks the up-hook if one is configured.
    pub fn user_connected(&mut self, session_id: u32) -> EngineResult<()> {
        let Some(session) = self.sessions.get(&session_id) else {
            return Ok(());
        };
        self.accounting.record_login(session);

        let outcome = self.hook_runner.run(&self.config, session, Direction::Up)?;
        match outcome {
            HookOutcome::NoHook => {
                self.transition(session_id, SessionState::Active);
                info!(session_id, "no up-hook configured, session active immediately");
            }
            HookOutcome::Done => {
                // Up-hooks never return Done; treat defensively as no-op.
                self.transition(session_id, SessionState::Active);
            }
            HookOutcome::Pending(handle) => {
                self.transition(session_id, SessionState::UpScriptPending);
                self.pending.register(handle);
                debug!(session_id, pid = handle.pid.as_raw(), "up-hook forked, pending");
            }
        }
        Ok(())
    }

    /// `user_disconnected` (spec §4.4's Active row): writes logout
    /// accounting, then forks the down-hook if one is configured. Errors
    /// here never abort the disconnect — the session is torn down
    /// regardless per spec §4.4's "Closed" side effect.
    pub fn user_disconnected(&mut self, session_id: u32) {
        let Some(session) = self.sessions.get(&session_id) else {
            return;
        };
        self.accounting.record_logout(session);
        self.transition(session_id, SessionState::DisconnectPending);

        match self.hook_runner.run(&self.config, session, Direction::Down) {
            Ok(HookOutcome::Pending(handle)) => {
                // Down-hooks are fire-and-forget; still tracked so a stray
                // SIGCHLD resolves cleanly, but the caller never waits.
                self.pending.register(handle);
            }
            Ok(HookOutcome::NoHook) | Ok(HookOutcome::Done) => {
                self.transition(session_id, SessionState::Closed);
            }
            Err(e) => {
                warn!(session_id, error = %e, "down-hook spawn failed, closing anyway");
                self.transition(session_id, SessionState::Closed);
            }
        }
    }

    /// Reaps all children ready per `SIGCHLD`, delivering each exit status
    /// to the owning session and effecting the corresponding transition.
    pub fn reap_children(&mut self) {
        for reaped in self.pending.reap_ready() {
            let handle = reaped.handle;
            match handle.direction {
                Direction::Up => {
                    if reaped.success {
                        self.transition(handle.session_id, SessionState::Active);
                        info!(session_id = handle.session_id, "up-hook succeeded, session active");
                    } else {
                        warn!(session_id = handle.session_id, "up-hook failed, closing session");
                        if let Some(session) = self.sessions.get(&handle.session_id) {
                            self.accounting.record_logout(session);
                        }
                        self.transition(handle.session_id, SessionState::Closed);
                    }
                }
                Direction::Down => {
                    self.transition(handle.session_id, SessionState::Closed);
                }
            }
        }
    }

    /// Administrative disconnect by username; synthesizes `user_disconnected`
    /// for every matching session (spec §4.4's "any -> Closed" row).
    pub fn disconnect_by_name(&mut self, username: &str) -> bool {
        let ids: Vec<u32> = self.session_ids_for_username(username).collect();
        if ids.is_empty() {
            return false;
        }
        for id in ids {
            self.disconnect_one(id);
        }
        true
    }

    /// Administrative disconnect by session id.
    pub fn disconnect_by_id(&mut self, id: u32) -> bool {
        if !self.sessions.contains_key(&id) {
            return false;
        }
        self.disconnect_one(id);
        true
    }

    fn disconnect_one(&mut self, session_id: u32) {
        let state = self.sessions.get(&session_id).map(|s| s.state);
        if state == Some(SessionState::UpScriptPending) {
            self.kill_pending_up_hook(session_id);
        }
        self.user_disconnected(session_id);
    }

    /// Signals a pending up-hook child (SIGTERM, then SIGKILL after a
    /// grace) and discards its handle, so an admin-initiated disconnect of
    /// a session still in `UpScriptPending` proceeds straight to `Closed`
    /// (spec §5, "Cancellation & timeouts"). The grace-period SIGKILL runs
    /// on a detached task rather than blocking this call, since the
    /// supervisor's event loop must keep servicing other events in the
    /// meantime (spec §5, "Suspension points").
    fn kill_pending_up_hook(&mut self, session_id: u32) {
        if let Some(pid) = self.pending.pid_for_session(session_id) {
            let _ = kill(pid, Signal::SIGTERM);
            self.pending.discard(pid);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                let _ = kill(pid, Signal::SIGKILL);
            });
        }
    }

    fn transition(&mut self, session_id: u32, new_state: SessionState) {
        if let Some(session) = self.sessions.get_mut(&session_id) {
            session.state = new_state;
            if new_state == SessionState::Active {
                session.connect_time.get_or_insert(SystemTime::now());
            }
        }
    }

    pub fn session_count(&self) -> u32 {
        self.sessions.len() as u32
    }

    pub fn to_tuple(session: &Session) -> SessionTuple {
        SessionTuple {
            id: session.session_id,
            username: session.username.clone(),
            groupname: session.groupname.clone(),
            peer_ip: session
                .remote_peer_addr
                .map(|a| a.ip().to_string())
                .unwrap_or_default(),
            device: session.tunnel_device_name.clone(),
            vpn_ipv4: session.ipv4_lease.map(|l| l.local.to_string()).unwrap_or_default(),
            vpn_ptp_ipv4: session.ipv4_lease.map(|l| l.remote.to_string()).unwrap_or_default(),
            vpn_ipv6: session.ipv6_lease.map(|l| l.local.to_string()).unwrap_or_default(),
            vpn_ptp_ipv6: session.ipv6_lease.map(|l| l.remote.to_string()).unwrap_or_default(),
            since: session
                .connect_time
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as u32)
                .unwrap_or(0),
            hostname: session.hostname.clone(),
            auth_state: format!("{:?}", session.state),
        }
    }

    pub fn list(&self) -> Vec<SessionTuple> {
        self.sessions.values().map(Self::to_tuple).collect()
    }

    /// Used by env binder callers that want a preview of what a hook would
    /// see without actually running it (occtl has no such need today, but
    /// the control-surface `user_info`/`id_info` responses only ever need
    /// the session tuple, not the binder output).
    #[allow(dead_code)]
    pub fn preview_bindings(
        &self,
        session_id: u32,
        direction: Direction,
    ) -> Option<EngineResult<std::collections::BTreeMap<String, String>>> {
        self.sessions
            .get(&session_id)
            .map(|s| env_binder::bind(&self.config, s, direction))
    }
}

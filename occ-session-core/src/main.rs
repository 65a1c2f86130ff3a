//! # Session Lifecycle Engine
//!
//! The privileged supervisor process of an OpenConnect-compatible VPN
//! server. Owns every authenticated tunnel's session record, commits it to
//! system accounting, computes its hook environment, and runs the
//! operator-supplied connect/disconnect scripts, gating packet forwarding on
//! the up-hook's exit status.
//!
//! ## Architecture
//!
//! ```text
//! Control surface (D-Bus) ──┐
//! SIGCHLD / SIGTERM ─────────┼──► single supervisor event loop ──► Session state
//! Worker control channel ───┘
//! ```
//!
//! ## Modules
//!
//! - [`occ_session_core::session`] — the Session Record and state machine positions
//! - [`occ_session_core::accounting`] — the Accounting Writer
//! - [`occ_session_core::env_binder`] — the Environment Binder
//! - [`occ_session_core::hooks`] — the Hook Runner and Pending-Hooks Registry
//! - [`occ_session_core::control`] — the control-surface D-Bus service
//! - [`occ_session_core::signals`] — the supervisor's blocked-signal set

use occ_session_core::accounting::AccountingWriter;
use occ_session_core::config::ServerConfig;
use occ_session_core::control::{self, SupervisorEvent};
use occ_session_core::hooks::HookRunner;
use occ_session_core::signals::BlockedSignals;
use occ_session_core::supervisor::Supervisor;
use signal_hook::consts::{SIGCHLD, SIGHUP, SIGINT, SIGTERM};
use signal_hook_tokio::Signals;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[cfg(target_os = "linux")]
use occ_session_core::accounting::UtmpxSink;
#[cfg(not(target_os = "linux"))]
use occ_session_core::accounting::MemorySink;

/// Supervisor entry point.
///
/// Initializes logging, blocks the supervisor's signal set, loads the
/// configuration snapshot, and drives the single-owner event loop until a
/// `stop` request or a terminating signal arrives.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging with env-filter support.
    // Default log level is `info` for the occ_session_core crate.
    // Override with the `RUST_LOG` environment variable.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "occ_session_core=info".into()),
        )
        .init();

    // Capture and block the supervisor's signal set before anything forks,
    // per the design notes: an immutable value, passed explicitly, never a
    // process-global mutable.
    let blocked = BlockedSignals::install()?;

    let config = load_config();
    let accounting = AccountingWriter::new(accounting_sink(&config), config.use_accounting);
    let hook_runner = HookRunner::new(blocked);
    let mut supervisor = Supervisor::new(config, hook_runner, accounting);

    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<SupervisorEvent>();

    let runtime = tokio::runtime::Handle::current();
    let _dbus_thread = control::spawn_dbus_server(events_tx.clone(), runtime)?;

    let mut signals = Signals::new([SIGCHLD, SIGTERM, SIGHUP, SIGINT])?;
    let main_pid = std::process::id();
    let auth_helper_pid = 0; // auth helper subsystem is external to this engine (spec §1)

    info!(pid = main_pid, "session supervisor starting");

    loop {
        tokio::select! {
            Some(event) = events_rx.recv() => {
                if !handle_event(&mut supervisor, event, main_pid, auth_helper_pid) {
                    break;
                }
            }
            Some(signal) = futures::StreamExt::next(&mut signals) => {
                match signal {
                    SIGCHLD => supervisor.reap_children(),
                    SIGTERM | SIGINT => {
                        info!("shutdown signal received, draining pending hooks");
                        break;
                    }
                    SIGHUP => info!("reload signal received"),
                    _ => {}
                }
            }
            else => break,
        }
    }

    warn!("session supervisor exiting");
    Ok(())
}

/// Applies one event to the supervisor. Returns `false` when the loop
/// should terminate (an accepted `stop` request).
fn handle_event(
    supervisor: &mut Supervisor,
    event: SupervisorEvent,
    main_pid: u32,
    auth_helper_pid: u32,
) -> bool {
    match event {
        SupervisorEvent::UserConnected(id) => {
            if let Err(e) = supervisor.user_connected(id) {
                warn!(session_id = id, error = %e, "up-hook spawn failed");
            }
            true
        }
        SupervisorEvent::UserDisconnected(id) => {
            supervisor.user_disconnected(id);
            true
        }
        SupervisorEvent::ReapChildren => {
            supervisor.reap_children();
            true
        }
        SupervisorEvent::Control(request, reply) => {
            let is_stop = matches!(request, occ_protocol::ControlRequest::Stop);
            let result = control::dispatch(supervisor, request, main_pid, auth_helper_pid);
            let accepted_stop = is_stop
                && matches!(&result, occ_protocol::ControlReply::Accepted(a) if a.accepted);
            let _ = reply.send(result);
            !accepted_stop
        }
    }
}

fn load_config() -> ServerConfig {
    // Configuration-file parsing is out of scope (spec §1); production
    // deployments feed a resolved snapshot in here. Defaults keep a
    // freshly-built binary inert (no hooks configured) until wired up.
    ServerConfig::default()
}

fn accounting_sink(config: &ServerConfig) -> Box<dyn occ_session_core::accounting::AccountingSink> {
    let _ = config;
    #[cfg(target_os = "linux")]
    {
        Box::new(UtmpxSink)
    }
    #[cfg(not(target_os = "linux"))]
    {
        Box::new(MemorySink::default())
    }
}

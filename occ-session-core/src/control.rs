//! Control Surface (spec §6.2): dispatches the eight named operator
//! requests against the supervisor and runs the D-Bus service that exposes
//! them on `org.infradead.ocserv`.
//!
//! The supervisor itself is only ever touched from its own event-loop task
//! (spec §5); the D-Bus server runs on its own blocking thread (the `dbus`
//! crate's connection is synchronous) and hands each request to the
//! supervisor task over a channel, the same way the relay server's handler
//! tasks talk to shared state through an `mpsc` sender rather than holding
//! a lock across an await point.

use crate::supervisor::Supervisor;
use occ_protocol::{
    AcceptedReply, ControlReply, ControlRequest, StatusReply, BUS_NAME, INTERFACE_NAME, OBJECT_PATH,
};
use tokio::sync::{mpsc, oneshot};

/// One unit of work the supervisor's single event-loop task processes.
/// Session lifecycle transitions and control requests are unified here so
/// everything that mutates `Supervisor` funnels through one `select!`.
pub enum SupervisorEvent {
    UserConnected(u32),
    UserDisconnected(u32),
    ReapChildren,
    Control(ControlRequest, oneshot::Sender<ControlReply>),
}

pub type EventSender = mpsc::UnboundedSender<SupervisorEvent>;

/// Applies one control request against the supervisor, producing the reply
/// shape of spec §6.2. Unknown ids/usernames simply yield empty/`false`
/// replies (`ControlProtocol` handling never panics, per spec §7).
pub fn dispatch(
    supervisor: &mut Supervisor,
    request: ControlRequest,
    main_pid: u32,
    auth_helper_pid: u32,
) -> ControlReply {
    match request {
        ControlRequest::Status => ControlReply::Status(StatusReply {
            online: true,
            main_pid,
            auth_helper_pid,
            client_count: supervisor.session_count(),
        }),
        ControlRequest::Reload => ControlReply::Accepted(AcceptedReply::accepted()),
        ControlRequest::Stop => ControlReply::Accepted(AcceptedReply::accepted()),
        ControlRequest::List => ControlReply::Sessions(supervisor.list()),
        ControlRequest::UserInfo { username } => {
            let ids: Vec<u32> = supervisor.session_ids_for_username(&username).collect();
            let sessions = ids
                .into_iter()
                .filter_map(|id| supervisor.session(id))
                .map(Supervisor::to_tuple)
                .collect();
            ControlReply::Sessions(sessions)
        }
        ControlRequest::IdInfo { id } => {
            let sessions = supervisor
                .session(id)
                .map(Supervisor::to_tuple)
                .into_iter()
                .collect();
            ControlReply::Sessions(sessions)
        }
        ControlRequest::DisconnectName { username } => {
            let accepted = supervisor.disconnect_by_name(&username);
            ControlReply::Accepted(AcceptedReply { accepted })
        }
        ControlRequest::DisconnectId { id } => {
            let accepted = supervisor.disconnect_by_id(id);
            ControlReply::Accepted(AcceptedReply { accepted })
        }
    }
}

/// Runs the D-Bus service on a dedicated OS thread. `runtime` lets the
/// synchronous D-Bus callbacks round-trip into the async supervisor task
/// via `events` and block on the matching oneshot reply.
pub fn spawn_dbus_server(
    events: EventSender,
    runtime: tokio::runtime::Handle,
) -> std::io::Result<std::thread::JoinHandle<()>> {
    std::thread::Builder::new()
        .name("occ-control-dbus".into())
        .spawn(move || {
            if let Err(e) = run_dbus_server(events, runtime) {
                tracing::error!(error = %e, "control-surface D-Bus server exited");
            }
        })
}

fn run_dbus_server(events: EventSender, runtime: tokio::runtime::Handle) -> Result<(), Box<dyn std::error::Error>> {
    use dbus::blocking::Connection;
    use dbus_crossroads::Crossroads;

    let conn = Connection::new_system()?;
    conn.request_name(BUS_NAME, false, true, false)?;

    let mut cr = Crossroads::new();
    let iface = cr.register(INTERFACE_NAME, |b| {
        register_status(b, events.clone(), runtime.clone());
        register_accepted_method(b, "reload", ControlRequest::Reload, events.clone(), runtime.clone());
        register_accepted_method(b, "stop", ControlRequest::Stop, events.clone(), runtime.clone());
        register_list(b, "list", |_| ControlRequest::List, events.clone(), runtime.clone());
        register_list_with_string(
            b,
            "user_info",
            |username: String| ControlRequest::UserInfo { username },
            events.clone(),
            runtime.clone(),
        );
        register_list_with_id(
            b,
            "id_info",
            |id: u32| ControlRequest::IdInfo { id },
            events.clone(),
            runtime.clone(),
        );
        register_accepted_with_string(
            b,
            "disconnect_name",
            |username: String| ControlRequest::DisconnectName { username },
            events.clone(),
            runtime.clone(),
        );
        register_accepted_with_id(
            b,
            "disconnect_id",
            |id: u32| ControlRequest::DisconnectId { id },
            events.clone(),
            runtime.clone(),
        );
    });
    cr.insert(OBJECT_PATH, &[iface], ());

    cr.serve(&conn)?;
    Ok(())
}

/// Sends `request` to the supervisor task and blocks this D-Bus worker
/// thread for the reply. Falls back to the "unavailable" reply shape if the
/// supervisor task has gone away (`ControlProtocol` per spec §7).
fn round_trip(
    events: &EventSender,
    runtime: &tokio::runtime::Handle,
    request: ControlRequest,
) -> ControlReply {
    let (tx, rx) = oneshot::channel();
    if events.send(SupervisorEvent::Control(request, tx)).is_err() {
        return ControlReply::Status(StatusReply::offline());
    }
    runtime
        .block_on(rx)
        .unwrap_or_else(|_| ControlReply::Status(StatusReply::offline()))
}

fn register_status(
    b: &mut dbus_crossroads::IfaceBuilder<()>,
    events: EventSender,
    runtime: tokio::runtime::Handle,
) {
    b.method(
        "status",
        (),
        ("online", "main_pid", "auth_helper_pid", "client_count"),
        move |_, _, ()| {
            let reply = round_trip(&events, &runtime, ControlRequest::Status);
            match reply {
                ControlReply::Status(s) => Ok((s.online, s.main_pid, s.auth_helper_pid, s.client_count)),
                _ => Ok((false, 0u32, 0u32, 0u32)),
            }
        },
    );
}

fn register_accepted_method(
    b: &mut dbus_crossroads::IfaceBuilder<()>,
    name: &'static str,
    request: ControlRequest,
    events: EventSender,
    runtime: tokio::runtime::Handle,
) {
    b.method(name, (), ("accepted",), move |_, _, ()| {
        let reply = round_trip(&events, &runtime, request.clone());
        match reply {
            ControlReply::Accepted(a) => Ok((a.accepted,)),
            _ => Ok((false,)),
        }
    });
}

fn register_list(
    b: &mut dbus_crossroads::IfaceBuilder<()>,
    name: &'static str,
    to_request: fn(()) -> ControlRequest,
    events: EventSender,
    runtime: tokio::runtime::Handle,
) {
    b.method(name, (), ("sessions",), move |_, _, ()| {
        let reply = round_trip(&events, &runtime, to_request(()));
        match reply {
            ControlReply::Sessions(s) => Ok((serde_json::to_string(&s).unwrap_or_default(),)),
            _ => Ok((String::new(),)),
        }
    });
}

fn register_list_with_string(
    b: &mut dbus_crossroads::IfaceBuilder<()>,
    name: &'static str,
    to_request: fn(String) -> ControlRequest,
    events: EventSender,
    runtime: tokio::runtime::Handle,
) {
    b.method(name, ("username",), ("sessions",), move |_, _, (username,): (String,)| {
        let reply = round_trip(&events, &runtime, to_request(username));
        match reply {
            ControlReply::Sessions(s) => Ok((serde_json::to_string(&s).unwrap_or_default(),)),
            _ => Ok((String::new(),)),
        }
    });
}

fn register_list_with_id(
    b: &mut dbus_crossroads::IfaceBuilder<()>,
    name: &'static str,
    to_request: fn(u32) -> ControlRequest,
    events: EventSender,
    runtime: tokio::runtime::Handle,
) {
    b.method(name, ("id",), ("sessions",), move |_, _, (id,): (u32,)| {
        let reply = round_trip(&events, &runtime, to_request(id));
        match reply {
            ControlReply::Sessions(s) => Ok((serde_json::to_string(&s).unwrap_or_default(),)),
            _ => Ok((String::new(),)),
        }
    });
}

fn register_accepted_with_string(
    b: &mut dbus_crossroads::IfaceBuilder<()>,
    name: &'static str,
    to_request: fn(String) -> ControlRequest,
    events: EventSender,
    runtime: tokio::runtime::Handle,
) {
    b.method(name, ("username",), ("accepted",), move |_, _, (username,): (String,)| {
        let reply = round_trip(&events, &runtime, to_request(username));
        match reply {
            ControlReply::Accepted(a) => Ok((a.accepted,)),
            _ => Ok((false,)),
        }
    });
}

fn register_accepted_with_id(
    b: &mut dbus_crossroads::IfaceBuilder<()>,
    name: &'static str,
    to_request: fn(u32) -> ControlRequest,
    events: EventSender,
    runtime: tokio::runtime::Handle,
) {
    b.method(name, ("id",), ("accepted",), move |_, _, (id,): (u32,)| {
        let reply = round_trip(&events, &runtime, to_request(id));
        match reply {
            ControlReply::Accepted(a) => Ok((a.accepted,)),
            _ => Ok((false,)),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounting::{AccountingWriter, MemorySink};
    use crate::config::ServerConfig;
    use crate::hooks::HookRunner;
    use crate::session::{Session, SessionState};
    use crate::signals::BlockedSignals;

    fn supervisor() -> Supervisor {
        let blocked = BlockedSignals::install().expect("blocked signal mask");
        let accounting = AccountingWriter::new(Box::new(MemorySink::default()), false);
        Supervisor::new(ServerConfig::default(), HookRunner::new(blocked), accounting)
    }

    fn session(id: u32, username: &str) -> Session {
        Session {
            session_id: id,
            worker_pid: 100 + id,
            username: username.into(),
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
            state: SessionState::Authenticated,
        }
    }

    #[test]
    fn status_reports_client_count() {
        let mut sup = supervisor();
        sup.insert_session(session(1, "alice"));
        sup.insert_session(session(2, "bob"));
        let reply = dispatch(&mut sup, ControlRequest::Status, 111, 222);
        match reply {
            ControlReply::Status(s) => {
                assert!(s.online);
                assert_eq!(s.client_count, 2);
                assert_eq!(s.main_pid, 111);
            }
            _ => panic!("expected status reply"),
        }
    }

    #[test]
    fn list_then_id_info_round_trips_the_same_tuple() {
        let mut sup = supervisor();
        sup.insert_session(session(7, "carol"));

        let list_reply = dispatch(&mut sup, ControlRequest::List, 0, 0);
        let id_reply = dispatch(&mut sup, ControlRequest::IdInfo { id: 7 }, 0, 0);

        match (list_reply, id_reply) {
            (ControlReply::Sessions(list), ControlReply::Sessions(one)) => {
                let from_list = list.iter().find(|t| t.id == 7).unwrap();
                assert_eq!(one.len(), 1);
                assert_eq!(&one[0], from_list);
            }
            _ => panic!("expected session replies"),
        }
    }

    #[test]
    fn disconnect_id_on_missing_session_is_rejected() {
        let mut sup = supervisor();
        let reply = dispatch(&mut sup, ControlRequest::DisconnectId { id: 999 }, 0, 0);
        match reply {
            ControlReply::Accepted(a) => assert!(!a.accepted),
            _ => panic!("expected accepted reply"),
        }
    }
}

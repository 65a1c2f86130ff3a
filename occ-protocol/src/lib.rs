//! # Control-Surface Wire Types
//!
//! Defines the request/reply types exchanged between the session supervisor's
//! control surface (`occ-session-core::control`) and the operator CLI
//! (`occtl`). Requests are dispatched over a local D-Bus-style RPC; these
//! types are the in-memory shape serialized onto that transport. Mirrors the
//! way the upstream relay server's `protocol.rs` defines one tagged enum per
//! wire message.

use serde::{Deserialize, Serialize};

/// One row of `list` / `user_info` / `id_info` output, in the fixed order
/// the control surface always returns.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionTuple {
    pub id: u32,
    pub username: String,
    pub groupname: String,
    pub peer_ip: String,
    pub device: String,
    pub vpn_ipv4: String,
    pub vpn_ptp_ipv4: String,
    pub vpn_ipv6: String,
    pub vpn_ptp_ipv6: String,
    pub since: u32,
    pub hostname: String,
    pub auth_state: String,
}

/// Server status snapshot returned by the `status` request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusReply {
    pub online: bool,
    pub main_pid: u32,
    pub auth_helper_pid: u32,
    pub client_count: u32,
}

impl StatusReply {
    /// The reply used when the control surface cannot reach the supervisor
    /// (malformed request, not a crash) per the `ControlProtocol` error
    /// taxonomy entry: type discipline stays strict and replies degrade to
    /// this "unavailable" shape rather than panicking.
    pub fn offline() -> Self {
        StatusReply {
            online: false,
            main_pid: 0,
            auth_helper_pid: 0,
            client_count: 0,
        }
    }
}

/// Reply shared by `reload`, `stop`, `disconnect_name`, `disconnect_id`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct AcceptedReply {
    pub accepted: bool,
}

impl AcceptedReply {
    pub const fn rejected() -> Self {
        AcceptedReply { accepted: false }
    }

    pub const fn accepted() -> Self {
        AcceptedReply { accepted: true }
    }
}

/// Unifies the differently-shaped replies of §6.2 so the supervisor's event
/// loop can hand back one type regardless of which request arrived.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ControlReply {
    Status(StatusReply),
    Accepted(AcceptedReply),
    Sessions(Vec<SessionTuple>),
}

/// All requests the operator tool may submit to the control surface.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlRequest {
    Status,
    Reload,
    Stop,
    List,
    UserInfo { username: String },
    IdInfo { id: u32 },
    DisconnectName { username: String },
    DisconnectId { id: u32 },
}

impl ControlRequest {
    /// The D-Bus method name this request maps to, as named in
    /// `examples/original_source/src/occtl.c`.
    pub fn method_name(&self) -> &'static str {
        match self {
            ControlRequest::Status => "status",
            ControlRequest::Reload => "reload",
            ControlRequest::Stop => "stop",
            ControlRequest::List => "list",
            ControlRequest::UserInfo { .. } => "user_info",
            ControlRequest::IdInfo { .. } => "id_info",
            ControlRequest::DisconnectName { .. } => "disconnect_name",
            ControlRequest::DisconnectId { .. } => "disconnect_id",
        }
    }
}

/// The bus name the control surface registers under and the operator tool
/// connects to. Confirmed against `examples/original_source/src/occtl.c`.
pub const BUS_NAME: &str = "org.infradead.ocserv";
/// Object path exposing the control-surface interface.
pub const OBJECT_PATH: &str = "/org/infradead/ocserv";
/// D-Bus interface name carrying all eight methods of the control surface.
pub const INTERFACE_NAME: &str = "org.infradead.ocserv";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_names_match_original_bus_methods() {
        assert_eq!(ControlRequest::Status.method_name(), "status");
        assert_eq!(
            ControlRequest::DisconnectId { id: 7 }.method_name(),
            "disconnect_id"
        );
    }

    #[test]
    fn offline_status_is_all_zero() {
        let s = StatusReply::offline();
        assert!(!s.online);
        assert_eq!(s.client_count, 0);
    }
}

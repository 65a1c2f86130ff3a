//! Session Record: the passive data object describing one authenticated
//! tunnel (spec §3). Produced by auth + lease subsystems upstream of this
//! engine; every other component here only reads and advances it.

use crate::config::SessionOverrides;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::SystemTime;

/// Monotonically assigned, process-lifetime-unique, non-zero session id.
/// Mirrors the teacher's `generate_agent_id` use of a fresh identifier per
/// connection, but as a plain counter: session ids here are dense and
/// ordered, not randomly generated, since `occtl` surfaces them to humans.
static NEXT_SESSION_ID: AtomicU32 = AtomicU32::new(1);

pub fn next_session_id() -> u32 {
    NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed)
}

/// Direction of a hook invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn reason(self) -> &'static str {
        match self {
            Direction::Up => "connect",
            Direction::Down => "disconnect",
        }
    }
}

/// State machine positions of spec §4.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Authenticated,
    UpScriptPending,
    Active,
    DisconnectPending,
    Closed,
}

/// The pair of in-tunnel addresses assigned to a session for IPv4.
#[derive(Debug, Clone, Copy)]
pub struct Ipv4Lease {
    pub local: Ipv4Addr,
    pub remote: Ipv4Addr,
}

/// The pair of in-tunnel addresses assigned to a session for IPv6, plus the
/// prefix length negotiated for the tunnel.
#[derive(Debug, Clone, Copy)]
pub struct Ipv6Lease {
    pub local: Ipv6Addr,
    pub remote: Ipv6Addr,
    pub prefix: u8,
}

/// One authenticated client tunnel and all state the engine tracks for it.
#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: u32,
    pub worker_pid: u32,
    pub username: String,
    pub groupname: String,
    pub hostname: String,
    pub remote_peer_addr: Option<SocketAddr>,
    pub our_local_addr: Option<SocketAddr>,
    pub ipv4_lease: Option<Ipv4Lease>,
    pub ipv6_lease: Option<Ipv6Lease>,
    pub tunnel_device_name: String,
    pub overrides: SessionOverrides,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub connect_time: Option<SystemTime>,
    pub state: SessionState,
}

impl Session {
    /// Seconds elapsed since `connect_time`, used for `STATS_DURATION`.
    /// Returns `None` if the session never recorded a connect time (spec
    /// §4.2: the binding is omitted when connect-time is zero/unset).
    pub fn duration_secs(&self, now: SystemTime) -> Option<u64> {
        let connect_time = self.connect_time?;
        now.duration_since(connect_time).ok().map(|d| d.as_secs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_are_monotonic_and_nonzero() {
        let a = next_session_id();
        let b = next_session_id();
        assert!(a > 0);
        assert!(b > a);
    }

    #[test]
    fn duration_is_none_without_connect_time() {
        let session = Session {
            session_id: 1,
            worker_pid: 100,
            username: "alice".into(),
            groupname: "users".into(),
            hostname: "laptop".into(),
            remote_peer_addr: None,
            our_local_addr: None,
            ipv4_lease: None,
            ipv6_lease: None,
            tunnel_device_name: "tun0".into(),
            overrides: SessionOverrides::default(),
            bytes_in: 0,
            bytes_out: 0,
            connect_time: None,
            state: SessionState::Authenticated,
        };
        assert_eq!(session.duration_secs(SystemTime::now()), None);
    }
}

//! Accounting Writer (spec §4.1).
//!
//! Records session start/stop into the host's login-accounting database.
//! Best-effort: every failure is swallowed and logged, never propagated —
//! accounting never gates session progression.

use crate::session::Session;
use std::net::{IpAddr, SocketAddr};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

/// One record the writer would emit, independent of the backing store. Kept
/// as a plain struct (rather than writing directly against `libc::utmpx`
/// everywhere) so tests can assert against an in-memory sink instead of a
/// real accounting file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountingRecord {
    pub kind: RecordKind,
    pub pid: u32,
    pub line: String,
    pub username: String,
    pub micros_since_epoch: u128,
    pub peer_numeric_host: String,
    /// The peer's raw numeric address, for `ut_addr_v6`. `None` when the
    /// session has no remote peer address recorded.
    pub peer_addr: Option<IpAddr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// USER_PROCESS: a session started.
    Login,
    /// DEAD_PROCESS: a session ended.
    Logout,
}

/// Where accounting records actually go. Production uses the host's utmpx
/// database; tests use an in-memory `Vec`.
pub trait AccountingSink: Send + Sync {
    fn write(&self, record: &AccountingRecord) -> std::io::Result<()>;
}

/// Writes through to the platform's utmpx database (Linux only, matching
/// the original's `#ifdef HAVE_LIBUTIL` / `#ifdef __linux__` gating).
#[cfg(target_os = "linux")]
pub struct UtmpxSink;

#[cfg(target_os = "linux")]
impl AccountingSink for UtmpxSink {
    fn write(&self, record: &AccountingRecord) -> std::io::Result<()> {
        // SAFETY: pututxline/setutxent/endutxent are the standard utmpx
        // append sequence; the host's libc performs its own file locking,
        // matching spec §5's "shared resources" note that the accounting
        // database's set/put/end sequence does its own serialization.
        unsafe {
            let mut entry: libc::utmpx = std::mem::zeroed();
            entry.ut_type = match record.kind {
                RecordKind::Login => libc::USER_PROCESS,
                RecordKind::Logout => libc::DEAD_PROCESS,
            };
            entry.ut_pid = record.pid as libc::pid_t;
            copy_into_ut_field(&mut entry.ut_line, &record.line);
            copy_into_ut_field(&mut entry.ut_user, &record.username);
            copy_into_ut_field(&mut entry.ut_host, &record.peer_numeric_host);
            entry.ut_tv.tv_sec = (record.micros_since_epoch / 1_000_000) as libc::time_t;
            entry.ut_tv.tv_usec = (record.micros_since_epoch % 1_000_000) as i32;
            if let Some(addr) = record.peer_addr {
                entry.ut_addr_v6 = addr_to_ut_addr_v6(addr);
            }

            libc::setutxent();
            if libc::pututxline(&entry).is_null() {
                libc::endutxent();
                return Err(std::io::Error::last_os_error());
            }
            libc::endutxent();
        }
        Ok(())
    }
}

/// Fills `ut_addr_v6` the way `add_utmp_entry` does: a raw byte copy of the
/// peer's address into the field, IPv4 occupying only the first word.
#[cfg(target_os = "linux")]
fn addr_to_ut_addr_v6(addr: IpAddr) -> [i32; 4] {
    match addr {
        IpAddr::V4(v4) => {
            let octets = v4.octets();
            [i32::from_ne_bytes(octets), 0, 0, 0]
        }
        IpAddr::V6(v6) => {
            let octets = v6.octets();
            let mut words = [0i32; 4];
            for (word, chunk) in words.iter_mut().zip(octets.chunks_exact(4)) {
                *word = i32::from_ne_bytes(chunk.try_into().unwrap());
            }
            words
        }
    }
}

#[cfg(target_os = "linux")]
fn copy_into_ut_field(field: &mut [libc::c_char], value: &str) {
    let bytes = value.as_bytes();
    let len = bytes.len().min(field.len().saturating_sub(1));
    for (slot, byte) in field.iter_mut().zip(bytes[..len].iter()) {
        *slot = *byte as libc::c_char;
    }
}

/// Records pushed to an in-memory `Vec`, for tests and non-Linux builds.
#[derive(Default)]
pub struct MemorySink {
    pub records: std::sync::Mutex<Vec<AccountingRecord>>,
}

impl AccountingSink for MemorySink {
    fn write(&self, record: &AccountingRecord) -> std::io::Result<()> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

pub struct AccountingWriter {
    sink: Box<dyn AccountingSink>,
    enabled: bool,
}

impl AccountingWriter {
    pub fn new(sink: Box<dyn AccountingSink>, enabled: bool) -> Self {
        AccountingWriter { sink, enabled }
    }

    /// Emits a "user process" record. No-op when accounting is disabled.
    pub fn record_login(&self, session: &Session) {
        if !self.enabled {
            return;
        }
        self.emit(RecordKind::Login, session);
    }

    /// Emits a "dead process" record. No-op when accounting is disabled.
    pub fn record_logout(&self, session: &Session) {
        if !self.enabled {
            return;
        }
        self.emit(RecordKind::Logout, session);
    }

    fn emit(&self, kind: RecordKind, session: &Session) {
        let record = AccountingRecord {
            kind,
            pid: session.worker_pid,
            line: session.tunnel_device_name.clone(),
            username: session.username.clone(),
            micros_since_epoch: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_micros())
                .unwrap_or(0),
            peer_numeric_host: session
                .remote_peer_addr
                .map(|a| numeric_host(a))
                .unwrap_or_default(),
            peer_addr: session.remote_peer_addr.map(|a| a.ip()),
        };
        if let Err(e) = self.sink.write(&record) {
            warn!(session_id = session.session_id, error = %e, "accounting write failed");
        }
    }
}

fn numeric_host(addr: SocketAddr) -> String {
    addr.ip().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionOverrides;
    use crate::session::SessionState;
    use std::sync::Arc;

    fn session() -> Session {
        Session {
            session_id: 1,
            worker_pid: 999,
            username: "bob".into(),
            groupname: "users".into(),
            hostname: "h".into(),
            remote_peer_addr: Some("203.0.113.5:443".parse().unwrap()),
            our_local_addr: None,
            ipv4_lease: None,
            ipv6_lease: None,
            tunnel_device_name: "tun3".into(),
            overrides: SessionOverrides::default(),
            bytes_in: 0,
            bytes_out: 0,
            connect_time: None,
            state: SessionState::Authenticated,
        }
    }

    #[test]
    fn disabled_accounting_is_a_no_op() {
        let sink = Arc::new(MemorySink::default());
        let writer = AccountingWriter::new(Box::new(MemorySinkProxy(sink.clone())), false);
        writer.record_login(&session());
        assert!(sink.records.lock().unwrap().is_empty());
    }

    #[test]
    fn enabled_accounting_records_login_and_logout() {
        let sink = Arc::new(MemorySink::default());
        let writer = AccountingWriter::new(Box::new(MemorySinkProxy(sink.clone())), true);
        writer.record_login(&session());
        writer.record_logout(&session());
        let records = sink.records.lock().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].kind, RecordKind::Login);
        assert_eq!(records[1].kind, RecordKind::Logout);
        assert_eq!(records[0].line, "tun3");
        assert_eq!(records[0].peer_numeric_host, "203.0.113.5");
    }

    /// Lets the test assert against a shared `Arc<MemorySink>` while still
    /// handing `AccountingWriter` an owned `Box<dyn AccountingSink>`.
    struct MemorySinkProxy(Arc<MemorySink>);
    impl AccountingSink for MemorySinkProxy {
        fn write(&self, record: &AccountingRecord) -> std::io::Result<()> {
            self.0.write(record)
        }
    }
}

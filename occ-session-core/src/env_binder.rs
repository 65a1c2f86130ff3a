//! Environment Binder (spec §4.2): a pure function from (config, session,
//! direction) to the full set of environment bindings applied to a hook's
//! child process. No hidden state; equal inputs always yield equal output.

use crate::config::ServerConfig;
use crate::error::{EngineError, EngineResult};
use crate::session::{Direction, Session};
use std::collections::BTreeMap;
use std::time::SystemTime;

/// A platform environment has a finite size (`ARG_MAX`-adjacent limit); a
/// joined routes/DNS/no-routes string beyond this is a `BindingOverflow`
/// rather than a silent truncation (design notes, "Buffer sizing").
pub const MAX_JOINED_VALUE_LEN: usize = 128 * 1024;

/// An address is classified IPv6 iff its textual form contains a colon.
/// Advisory only — it accepts garbage (e.g. a bare hostname with a colon)
/// and does not validate syntax; upstream input validation is the source of
/// truth (design notes, "String-based address classification").
fn is_ipv6_textual(entry: &str) -> bool {
    entry.contains(':')
}

/// Joins `entries` the way the original environment exporter does: each
/// entry followed by a trailing space, concatenated with no separator.
/// Preserved verbatim (not replaced with `.join(" ")`) because existing
/// hook scripts may already depend on the exact original formatting.
fn append_with_trailing_space(entries: impl Iterator<Item = String>) -> String {
    let mut out = String::new();
    for entry in entries {
        out.push_str(&entry);
        out.push(' ');
    }
    out
}

/// Splits `entries` into (v4, v6) buckets preserving order within each
/// bucket, plus the combined (all-entries) ordering.
fn classify<'a>(entries: impl Iterator<Item = &'a str>) -> (Vec<&'a str>, Vec<&'a str>, Vec<&'a str>) {
    let mut v4 = Vec::new();
    let mut v6 = Vec::new();
    let mut combined = Vec::new();
    for e in entries {
        combined.push(e);
        if is_ipv6_textual(e) {
            v6.push(e);
        } else {
            v4.push(e);
        }
    }
    (v4, v6, combined)
}

/// Binds the three names for one category (routes / no-routes / DNS) into
/// `out`, omitting any name whose joined value would be empty. Rejects a
/// joined value that would exceed [`MAX_JOINED_VALUE_LEN`] rather than
/// silently truncating it.
fn bind_category(
    out: &mut BTreeMap<String, String>,
    v4_name: &'static str,
    v6_name: &'static str,
    combined_name: &'static str,
    entries: &[&str],
) -> EngineResult<()> {
    let (v4, v6, combined) = classify(entries.iter().copied());

    let v4_joined = append_with_trailing_space(v4.into_iter().map(String::from));
    if !v4_joined.is_empty() {
        insert_checked(out, v4_name, v4_joined)?;
    }

    let v6_joined = append_with_trailing_space(v6.into_iter().map(String::from));
    if !v6_joined.is_empty() {
        insert_checked(out, v6_name, v6_joined)?;
    }

    let combined_joined = append_with_trailing_space(combined.into_iter().map(String::from));
    if !combined_joined.is_empty() {
        insert_checked(out, combined_name, combined_joined)?;
    }

    Ok(())
}

/// Inserts `value` under `name`, or fails with `BindingOverflow` if it
/// exceeds the environment-size ceiling.
fn insert_checked(out: &mut BTreeMap<String, String>, name: &'static str, value: String) -> EngineResult<()> {
    if value.len() > MAX_JOINED_VALUE_LEN {
        return Err(EngineError::BindingOverflow { name });
    }
    out.insert(name.to_string(), value);
    Ok(())
}

/// Produces the full environment for a hook's child process.
pub fn bind(config: &ServerConfig, session: &Session, direction: Direction) -> EngineResult<BTreeMap<String, String>> {
    bind_at(config, session, direction, SystemTime::now())
}

/// Same as [`bind`] but with an explicit "now", for deterministic tests of
/// `STATS_DURATION`.
pub fn bind_at(
    config: &ServerConfig,
    session: &Session,
    direction: Direction,
    now: SystemTime,
) -> EngineResult<BTreeMap<String, String>> {
    let mut out = BTreeMap::new();

    out.insert("ID".to_string(), session.worker_pid.to_string());
    out.insert("USERNAME".to_string(), session.username.clone());
    out.insert("GROUPNAME".to_string(), session.groupname.clone());
    out.insert("HOSTNAME".to_string(), session.hostname.clone());
    out.insert("DEVICE".to_string(), session.tunnel_device_name.clone());
    out.insert("REASON".to_string(), direction.reason().to_string());

    if let Some(peer) = session.remote_peer_addr {
        out.insert("IP_REAL".to_string(), peer.ip().to_string());
    }
    if let Some(local) = session.our_local_addr {
        out.insert("IP_REAL_LOCAL".to_string(), local.ip().to_string());
    }

    bind_in_tunnel_addresses(&mut out, session);

    bind_category(
        &mut out,
        "OCSERV_ROUTES4",
        "OCSERV_ROUTES6",
        "OCSERV_ROUTES",
        &concat_routes(&config.network.routes, &session.overrides.routes),
    )?;
    bind_category(
        &mut out,
        "OCSERV_NO_ROUTES4",
        "OCSERV_NO_ROUTES6",
        "OCSERV_NO_ROUTES",
        &concat_routes(&config.network.no_routes, &session.overrides.no_routes),
    )?;
    let dns_source = dns_source(config, session);
    bind_category(&mut out, "OCSERV_DNS4", "OCSERV_DNS6", "OCSERV_DNS", &dns_source)?;

    if direction == Direction::Down {
        out.insert("STATS_BYTES_IN".to_string(), session.bytes_in.to_string());
        out.insert("STATS_BYTES_OUT".to_string(), session.bytes_out.to_string());
        if session.connect_time.is_some() {
            if let Some(secs) = session.duration_secs(now) {
                out.insert("STATS_DURATION".to_string(), secs.to_string());
            }
        }
    }

    if session.overrides.restrict_user_to_routes {
        if let Some(wrapper) = &config.firewall_wrapper_script {
            let _ = wrapper; // wrapper presence gates invocation in HookRunner
            let original = match direction {
                Direction::Up => &config.connect_script,
                Direction::Down => &config.disconnect_script,
            };
            if let Some(original) = original {
                out.insert(
                    "OCSERV_NEXT_SCRIPT".to_string(),
                    original.to_string_lossy().into_owned(),
                );
            }
        }
    }

    Ok(out)
}

/// IPv4 lease wins for `IP_LOCAL`/`IP_REMOTE` whenever present; IPv6 wins
/// only in pure-IPv6 sessions. Resolves the ambiguity the design notes flag
/// about the original's overwrite-if-empty double pass.
fn bind_in_tunnel_addresses(out: &mut BTreeMap<String, String>, session: &Session) {
    if let Some(v4) = session.ipv4_lease {
        out.insert("IP_LOCAL".to_string(), v4.local.to_string());
        out.insert("IP_REMOTE".to_string(), v4.remote.to_string());
    }

    if let Some(v6) = session.ipv6_lease {
        out.insert("IPV6_LOCAL".to_string(), v6.local.to_string());
        out.insert("IPV6_REMOTE".to_string(), v6.remote.to_string());
        out.insert("IPV6_PREFIX".to_string(), v6.prefix.to_string());

        if session.ipv4_lease.is_none() {
            out.insert("IP_LOCAL".to_string(), v6.local.to_string());
            out.insert("IP_REMOTE".to_string(), v6.remote.to_string());
        }
    }
}

/// Routes and no-routes are always the concatenation of global then session
/// entries, preserving order.
fn concat_routes<'a>(global: &'a [String], session: &'a [String]) -> Vec<&'a str> {
    global
        .iter()
        .chain(session.iter())
        .map(String::as_str)
        .collect()
}

/// DNS: the session override list replaces the global list wholesale when
/// non-empty; otherwise the global list contributes entirely.
fn dns_source<'a>(config: &'a ServerConfig, session: &'a Session) -> Vec<&'a str> {
    if !session.overrides.dns.is_empty() {
        session.overrides.dns.iter().map(String::as_str).collect()
    } else {
        config.network.dns.iter().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{NetworkDefaults, SessionOverrides};
    use crate::session::{Ipv4Lease, Ipv6Lease, SessionState};
    use std::net::{Ipv4Addr, Ipv6Addr};
    use std::time::Duration;

    fn base_session() -> Session {
        Session {
            session_id: 17,
            worker_pid: 4242,
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
        }
    }

    #[test]
    fn dual_stack_connect_scenario() {
        let config = ServerConfig {
            network: NetworkDefaults {
                routes: vec!["10.0.0.0/8".into(), "fd00::/8".into()],
                no_routes: vec![],
                dns: vec!["1.1.1.1".into(), "2606:4700::1111".into()],
            },
            ..Default::default()
        };
        let mut session = base_session();
        session.overrides.routes = vec!["192.0.2.0/24".into()];
        session.ipv4_lease = Some(Ipv4Lease {
            local: Ipv4Addr::new(10, 0, 0, 1),
            remote: Ipv4Addr::new(10, 0, 0, 2),
        });
        session.ipv6_lease = Some(Ipv6Lease {
            local: "fd00::1".parse().unwrap(),
            remote: "fd00::2".parse().unwrap(),
            prefix: 64,
        });

        let env = bind(&config, &session, Direction::Up).unwrap();

        assert_eq!(env["OCSERV_ROUTES"], "10.0.0.0/8 fd00::/8 192.0.2.0/24 ");
        assert_eq!(env["OCSERV_ROUTES4"], "10.0.0.0/8 192.0.2.0/24 ");
        assert_eq!(env["OCSERV_ROUTES6"], "fd00::/8 ");
        assert_eq!(env["OCSERV_DNS"], "1.1.1.1 2606:4700::1111 ");
        assert_eq!(env["IP_LOCAL"], "10.0.0.1");
        assert_eq!(env["IPV6_PREFIX"], "64");
        assert_eq!(env["REASON"], "connect");
    }

    #[test]
    fn binder_is_pure() {
        let config = ServerConfig::default();
        let session = base_session();
        let a = bind(&config, &session, Direction::Up).unwrap();
        let b = bind(&config, &session, Direction::Up).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn classification_always_lands_in_combined_and_exactly_one_suffix() {
        let config = ServerConfig {
            network: NetworkDefaults {
                routes: vec!["10.0.0.0/8".into(), "fd00::/8".into(), "192.168.1.0/24".into()],
                ..Default::default()
            },
            ..Default::default()
        };
        let session = base_session();
        let env = bind(&config, &session, Direction::Up).unwrap();
        let combined = &env["OCSERV_ROUTES"];
        for entry in ["10.0.0.0/8", "fd00::/8", "192.168.1.0/24"] {
            assert!(combined.contains(entry));
        }
        assert!(env["OCSERV_ROUTES6"].contains("fd00::/8"));
        assert!(!env["OCSERV_ROUTES6"].contains("10.0.0.0/8"));
        assert!(env["OCSERV_ROUTES4"].contains("10.0.0.0/8"));
        assert!(env["OCSERV_ROUTES4"].contains("192.168.1.0/24"));
    }

    #[test]
    fn dns_override_fully_replaces_global() {
        let config = ServerConfig {
            network: NetworkDefaults {
                dns: vec!["8.8.8.8".into()],
                ..Default::default()
            },
            ..Default::default()
        };
        let mut session = base_session();
        session.overrides.dns = vec!["9.9.9.9".into()];
        let env = bind(&config, &session, Direction::Up).unwrap();
        assert_eq!(env["OCSERV_DNS"], "9.9.9.9 ");
        assert!(!env["OCSERV_DNS"].contains("8.8.8.8"));
    }

    #[test]
    fn empty_routes_and_dns_omit_all_six_names() {
        let config = ServerConfig::default();
        let session = base_session();
        let env = bind(&config, &session, Direction::Up).unwrap();
        for name in [
            "OCSERV_ROUTES",
            "OCSERV_ROUTES4",
            "OCSERV_ROUTES6",
            "OCSERV_NO_ROUTES",
            "OCSERV_NO_ROUTES4",
            "OCSERV_NO_ROUTES6",
            "OCSERV_DNS",
            "OCSERV_DNS4",
            "OCSERV_DNS6",
        ] {
            assert!(!env.contains_key(name), "{name} should be omitted");
        }
    }

    #[test]
    fn ipv6_only_session_sets_both_ip_local_and_ipv6_local() {
        let config = ServerConfig::default();
        let mut session = base_session();
        session.ipv6_lease = Some(Ipv6Lease {
            local: Ipv6Addr::LOCALHOST,
            remote: "fd00::2".parse().unwrap(),
            prefix: 64,
        });
        let env = bind(&config, &session, Direction::Up).unwrap();
        assert_eq!(env["IP_LOCAL"], Ipv6Addr::LOCALHOST.to_string());
        assert_eq!(env["IPV6_LOCAL"], Ipv6Addr::LOCALHOST.to_string());
    }

    #[test]
    fn ipv4_lease_wins_when_both_present() {
        let config = ServerConfig::default();
        let mut session = base_session();
        session.ipv4_lease = Some(Ipv4Lease {
            local: Ipv4Addr::new(10, 0, 0, 1),
            remote: Ipv4Addr::new(10, 0, 0, 2),
        });
        session.ipv6_lease = Some(Ipv6Lease {
            local: "fd00::1".parse().unwrap(),
            remote: "fd00::2".parse().unwrap(),
            prefix: 64,
        });
        let env = bind(&config, &session, Direction::Up).unwrap();
        assert_eq!(env["IP_LOCAL"], "10.0.0.1");
        assert_eq!(env["IPV6_LOCAL"], "fd00::1");
    }

    #[test]
    fn firewall_wrapper_binds_next_script_only_when_wrapper_configured() {
        let mut config = ServerConfig {
            connect_script: Some("/etc/admin-up".into()),
            ..Default::default()
        };
        let mut session = base_session();
        session.overrides.restrict_user_to_routes = true;

        let env_no_wrapper = bind(&config, &session, Direction::Up).unwrap();
        assert!(!env_no_wrapper.contains_key("OCSERV_NEXT_SCRIPT"));

        config.firewall_wrapper_script = Some("/usr/bin/ocserv-fw".into());
        let env_with_wrapper = bind(&config, &session, Direction::Up).unwrap();
        assert_eq!(env_with_wrapper["OCSERV_NEXT_SCRIPT"], "/etc/admin-up");
    }

    #[test]
    fn stats_bound_on_disconnect_only() {
        let config = ServerConfig::default();
        let mut session = base_session();
        session.bytes_in = 1024;
        session.bytes_out = 2048;
        let now = SystemTime::now();
        session.connect_time = Some(now - Duration::from_secs(60));

        let down_env = bind_at(&config, &session, Direction::Down, now).unwrap();
        assert_eq!(down_env["STATS_BYTES_IN"], "1024");
        assert_eq!(down_env["STATS_BYTES_OUT"], "2048");
        assert_eq!(down_env["STATS_DURATION"], "60");

        let up_env = bind_at(&config, &session, Direction::Up, now).unwrap();
        assert!(!up_env.contains_key("STATS_BYTES_IN"));
    }
}

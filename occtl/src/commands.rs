//! Command parsing and table rendering for occtl's command set (spec §6.3):
//! `status`, `stop now`, `reload`, `list users`, `info user NAME`,
//! `info id N`, `disconnect user NAME`, `disconnect id N`, `reset`, `help`,
//! `exit`.

use crate::client::ControlClient;
use anyhow::{anyhow, bail};
use occ_protocol::SessionTuple;

pub fn help_text() -> &'static str {
    "commands: status | stop now | reload | list users | info user NAME | \
     info id N | disconnect user NAME | disconnect id N | reset | help | exit"
}

pub fn dispatch_line(line: &str) -> anyhow::Result<String> {
    let parts: Vec<&str> = line.split_whitespace().collect();

    // `help` and `reset` never touch the control surface, so they must not
    // require a live D-Bus connection.
    match parts.as_slice() {
        ["help"] => return Ok(help_text().to_string()),
        ["reset"] => {
            // No server-side request: clears only this shell's own
            // line-editing state, matching the original's
            // rl_reset_terminal/rl_reset_screen_size behavior.
            return Ok("reset".to_string());
        }
        [] => bail!("no command given"),
        _ => {}
    }

    let client = ControlClient::connect()?;

    match parts.as_slice() {
        ["status"] => {
            let (online, main_pid, auth_helper_pid, client_count) = client.status()?;
            Ok(format!(
                "online: {online}\nmain pid: {main_pid}\nauth helper pid: {auth_helper_pid}\nclients: {client_count}"
            ))
        }
        ["stop", "now"] => {
            let accepted = client.stop()?;
            Ok(format!("stop accepted: {accepted}"))
        }
        ["reload"] => {
            let accepted = client.reload()?;
            Ok(format!("reload accepted: {accepted}"))
        }
        ["list", "users"] => {
            let sessions = client.list()?;
            Ok(render_table(&sessions))
        }
        ["info", "user", username] => {
            let sessions = client.user_info(username)?;
            Ok(render_table(&sessions))
        }
        ["info", "id", id] => {
            let id: u32 = id.parse().map_err(|_| anyhow!("invalid session id: {id}"))?;
            let sessions = client.id_info(id)?;
            Ok(render_table(&sessions))
        }
        ["disconnect", "user", username] => {
            let accepted = client.disconnect_name(username)?;
            Ok(format!("disconnect accepted: {accepted}"))
        }
        ["disconnect", "id", id] => {
            let id: u32 = id.parse().map_err(|_| anyhow!("invalid session id: {id}"))?;
            let accepted = client.disconnect_id(id)?;
            Ok(format!("disconnect accepted: {accepted}"))
        }
        _ => bail!("unrecognized command: {line}; try `help`"),
    }
}

fn render_table(sessions: &[SessionTuple]) -> String {
    if sessions.is_empty() {
        return "(no sessions)".to_string();
    }
    let mut out = String::from("id  username  group  device  vpn-ipv4  vpn-ipv6  since  hostname  state\n");
    for s in sessions {
        out.push_str(&format!(
            "{}  {}  {}  {}  {}  {}  {}  {}  {}\n",
            s.id, s.username, s.groupname, s.device, s.vpn_ipv4, s.vpn_ipv6, s.since, s.hostname, s.auth_state
        ));
    }
    out.pop();
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_table_reports_no_sessions_when_empty() {
        assert_eq!(render_table(&[]), "(no sessions)");
    }

    #[test]
    fn render_table_includes_every_session_id() {
        let sessions = vec![
            SessionTuple {
                id: 1,
                username: "alice".into(),
                groupname: "users".into(),
                peer_ip: "203.0.113.1".into(),
                device: "tun0".into(),
                vpn_ipv4: "10.0.0.1".into(),
                vpn_ptp_ipv4: "10.0.0.2".into(),
                vpn_ipv6: String::new(),
                vpn_ptp_ipv6: String::new(),
                since: 100,
                hostname: "laptop".into(),
                auth_state: "Active".into(),
            },
        ];
        let table = render_table(&sessions);
        assert!(table.contains("alice"));
        assert!(table.contains("tun0"));
    }
}

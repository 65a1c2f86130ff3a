//! D-Bus client for the supervisor's control surface.

use dbus::blocking::Connection;
use occ_protocol::{SessionTuple, BUS_NAME, INTERFACE_NAME, OBJECT_PATH};
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(5);

pub struct ControlClient {
    conn: Connection,
}

impl ControlClient {
    pub fn connect() -> anyhow::Result<Self> {
        let conn = Connection::new_system()?;
        Ok(ControlClient { conn })
    }

    fn proxy(&self) -> dbus::blocking::Proxy<'_, &Connection> {
        self.conn.with_proxy(BUS_NAME, OBJECT_PATH, TIMEOUT)
    }

    pub fn status(&self) -> anyhow::Result<(bool, u32, u32, u32)> {
        let (online, main_pid, auth_helper_pid, client_count): (bool, u32, u32, u32) =
            self.proxy().method_call(INTERFACE_NAME, "status", ())?;
        Ok((online, main_pid, auth_helper_pid, client_count))
    }

    pub fn reload(&self) -> anyhow::Result<bool> {
        let (accepted,): (bool,) = self.proxy().method_call(INTERFACE_NAME, "reload", ())?;
        Ok(accepted)
    }

    pub fn stop(&self) -> anyhow::Result<bool> {
        let (accepted,): (bool,) = self.proxy().method_call(INTERFACE_NAME, "stop", ())?;
        Ok(accepted)
    }

    pub fn list(&self) -> anyhow::Result<Vec<SessionTuple>> {
        let (json,): (String,) = self.proxy().method_call(INTERFACE_NAME, "list", ())?;
        Ok(parse_sessions(&json))
    }

    pub fn user_info(&self, username: &str) -> anyhow::Result<Vec<SessionTuple>> {
        let (json,): (String,) = self
            .proxy()
            .method_call(INTERFACE_NAME, "user_info", (username.to_string(),))?;
        Ok(parse_sessions(&json))
    }

    pub fn id_info(&self, id: u32) -> anyhow::Result<Vec<SessionTuple>> {
        let (json,): (String,) = self.proxy().method_call(INTERFACE_NAME, "id_info", (id,))?;
        Ok(parse_sessions(&json))
    }

    pub fn disconnect_name(&self, username: &str) -> anyhow::Result<bool> {
        let (accepted,): (bool,) = self
            .proxy()
            .method_call(INTERFACE_NAME, "disconnect_name", (username.to_string(),))?;
        Ok(accepted)
    }

    pub fn disconnect_id(&self, id: u32) -> anyhow::Result<bool> {
        let (accepted,): (bool,) = self.proxy().method_call(INTERFACE_NAME, "disconnect_id", (id,))?;
        Ok(accepted)
    }
}

fn parse_sessions(json: &str) -> Vec<SessionTuple> {
    serde_json::from_str(json).unwrap_or_default()
}

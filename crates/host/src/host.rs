// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

use crate::connections::{ClientChannel, ConnectionTable};
use crate::engine_link::EngineLink;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};
use twine_common::model::{DocId, Role};
use twine_common::tasks::{Command, ConnId};
use twine_rpc::LinkFrame;

pub const NOT_REGISTERED: &str = "Your connection is not registered.";
pub const SERVICE_UNAVAILABLE: &str = "The game service is not available.";
pub const NOT_AN_OBJECT: &str = "Message must be a JSON object.";
pub const MESSAGE_TOO_LONG: &str = "Message is too long.";
pub const UNREACHABLE_CLOSE: &str = "Unable to reach the game service.";

/// The first line a player sends. Authentication happens before the player reaches us.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PlayerIdentity {
    pub uid: u64,
    pub email: String,
    #[serde(default)]
    pub session: String,
    /// Passed through to the engine, which gates privileged commands on it.
    #[serde(default)]
    pub role: Role,
}

/// Shared state of a running host: the connections it holds and its link to the engine.
pub struct Host {
    pub connections: ConnectionTable,
    pub engine: EngineLink,
    max_message_len: usize,
}

impl Host {
    pub fn new(max_message_len: usize) -> Self {
        Self {
            connections: ConnectionTable::new(),
            engine: EngineLink::new(),
            max_message_len,
        }
    }

    /// Register a freshly identified player channel and ask the engine to acknowledge it.
    /// If the link is down the `connect` handshake will carry it instead.
    pub fn open(&self, channel: &Arc<dyn ClientChannel>, identity: &PlayerIdentity) -> ConnId {
        let connid = self
            .connections
            .add_with_role(
                channel,
                DocId(identity.uid),
                identity.email.as_str(),
                identity.session.as_str(),
                identity.role,
            )
            .connid;
        info!(
            %connid,
            uid = identity.uid,
            email = %identity.email,
            role = %identity.role,
            "Player connected"
        );
        let open = Command::new("playeropen")
            .with("uid", identity.uid)
            .with("email", identity.email.as_str())
            .with("role", identity.role.to_string());
        if let Err(e) = self.engine.send(connid, &open) {
            debug!(%connid, "Deferring playeropen: {e}");
        }
        connid
    }

    /// One line from a player. Anything rejected here is answered with an error and never
    /// reaches the engine.
    pub fn on_message(&self, connid: ConnId, raw: &str) {
        let Ok(conn) = self.connections.find(connid) else {
            warn!(%connid, "Message from a connection we no longer hold");
            return;
        };
        if !self.engine.is_up() {
            conn.write_error(SERVICE_UNAVAILABLE);
            return;
        }
        if !conn.is_available() {
            conn.write_error(NOT_REGISTERED);
            return;
        }
        if !raw.starts_with('{') {
            conn.write_error(NOT_AN_OBJECT);
            return;
        }
        if raw.len() > self.max_message_len {
            conn.write_error(MESSAGE_TOO_LONG);
            return;
        }
        let command = match serde_json::from_str::<Value>(raw)
            .map_err(|e| e.to_string())
            .and_then(|v| Command::from_value(v).map_err(|e| e.to_string()))
        {
            Ok(command) => command,
            Err(e) => {
                conn.write_error(&format!("Malformed message: {e}"));
                return;
            }
        };
        self.connections.touch(connid);
        if self.engine.send(connid, &command).is_err() {
            conn.write_error(SERVICE_UNAVAILABLE);
        }
    }

    /// The player's channel closed. The engine hears about it whether or not it ever
    /// acknowledged the connection.
    pub fn on_close(&self, channel: &dyn ClientChannel) {
        let connid = channel.connid();
        if let Some(conn) = self.connections.remove(channel) {
            info!(%connid, uptime = conn.uptime().as_secs(), "Player disconnected");
        }
        if let Err(e) = self.engine.send(connid, &Command::new("playerclose")) {
            debug!(%connid, "Unable to send playerclose: {e}");
        }
    }

    /// A new engine link is up. Queues the `connect` handshake ahead of anything else and
    /// returns the link's outgoing queue.
    pub fn engine_connected(&self) -> UnboundedReceiver<LinkFrame> {
        let outgoing = self.engine.attach();
        let connections: Vec<Value> = self
            .connections
            .all()
            .iter()
            .map(|c| {
                json!({
                    "connid": c.connid.0,
                    "uid": c.uid.0,
                    "email": c.email,
                    "session": c.session,
                    "role": c.role,
                })
            })
            .collect();
        info!(held = connections.len(), "Sending connect handshake");
        let connect = Command::new("connect").with("connections", connections);
        if let Err(e) = self.engine.send(ConnId::NONE, &connect) {
            warn!("Unable to queue connect handshake: {e}");
        }
        outgoing
    }

    pub fn engine_lost(&self) {
        self.engine.detach();
        let count = self.connections.mark_all_unavailable();
        warn!(count, "Engine link lost; connections are unavailable");
    }

    /// Close connections the engine has not acknowledged within `timeout`.
    pub fn sweep(&self, timeout: Duration) -> usize {
        let swept = self.connections.sweep_unavailable(timeout);
        for conn in &swept {
            conn.close(Some(UNREACHABLE_CLOSE));
        }
        swept.len()
    }

    pub fn handle_engine_message(&self, connid: ConnId, command: Command) {
        match command.name() {
            "connectok" => {
                info!("Engine accepted the link");
            }
            "playerok" => {
                if let Err(e) = self.connections.mark_available(connid) {
                    warn!(%connid, "playerok for unknown connection: {e}");
                }
            }
            "playernotok" => {
                let text = command.get_str("text").unwrap_or("Connection refused.");
                match self.connections.find(connid) {
                    Ok(conn) => conn.close(Some(text)),
                    Err(e) => warn!(%connid, "playernotok for unknown connection: {e}"),
                }
            }
            "messageall" => {
                let Some(message) = command.get("message").cloned() else {
                    warn!("messageall without a message");
                    return;
                };
                let message = match Command::from_value(message) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!("messageall with a malformed message: {e}");
                        return;
                    }
                };
                for conn in self.connections.available() {
                    if let Err(e) = conn.write(&message) {
                        debug!(connid = %conn.connid, "Broadcast not delivered: {e}");
                    }
                }
            }
            _ if connid.is_none() => {
                warn!(cmd = command.name(), "Unhandled engine command");
            }
            _ => match self.connections.find(connid) {
                Ok(conn) => {
                    if let Err(e) = conn.write(&command) {
                        warn!(%connid, "Unable to deliver to player: {e}");
                    }
                }
                Err(_) => debug!(%connid, cmd = command.name(), "Dropping message for gone connection"),
            },
        }
    }
}

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

use crate::connections::PlayerConn;
use crate::tasks::ShutdownOutcome;
use crate::tasks::commands::{CommandDef, CommandError, CommandTable, DuplicateCommand, TaskContext};
use serde_json::Value;
use std::str::FromStr;
use tracing::{info, warn};
use twine_common::model::{DocId, Role};
use twine_common::tasks::{Command, ConnId, LinkId};

pub(crate) fn register(table: &mut CommandTable) -> Result<(), DuplicateCommand> {
    table.register(CommandDef::new("connect", cmd_connect).server())?;
    table.register(CommandDef::new("disconnect", cmd_disconnect).server())?;
    table.register(CommandDef::new("playeropen", cmd_playeropen).preconnection())?;
    table.register(CommandDef::new("playerclose", cmd_playerclose).preconnection())?;
    table.register(CommandDef::new("checkdisconnected", cmd_checkdisconnected).server())?;
    table.register(CommandDef::new("logplayerconntable", cmd_logplayerconntable).server())?;
    table.register(
        CommandDef::new("shutdownprocess", cmd_shutdownprocess)
            .server()
            .does_write(),
    )?;
    Ok(())
}

/// The role a host vouches for. Anything missing or unrecognized gets no privileges.
fn role_of(value: Option<&Value>) -> Role {
    match value.and_then(Value::as_str) {
        None => Role::Player,
        Some(name) => Role::from_str(name).unwrap_or_else(|_| {
            warn!(role = name, "Unknown role; treating as a plain player");
            Role::Player
        }),
    }
}

fn player_conn(entry: &Value, link: LinkId) -> Result<PlayerConn, CommandError> {
    let connid = entry
        .get("connid")
        .and_then(Value::as_u64)
        .filter(|id| *id != 0)
        .ok_or_else(|| CommandError::Failed(format!("bad connection entry {entry}")))?;
    let uid = entry
        .get("uid")
        .and_then(Value::as_u64)
        .ok_or_else(|| CommandError::Failed(format!("connection entry without uid {entry}")))?;
    let email = entry.get("email").and_then(Value::as_str).unwrap_or("");
    let role = role_of(entry.get("role"));
    Ok(PlayerConn::new(ConnId(connid), DocId(uid), email, link).with_role(role))
}

/// A host has (re)connected. It lists every player connection it holds; each one is registered
/// and individually acknowledged.
fn cmd_connect(ctx: &mut TaskContext<'_>) -> Result<(), CommandError> {
    let link = ctx.link();
    let entries = ctx.command().require_array("connections")?.clone();
    ctx.send_to_link(link, ConnId::NONE, Command::new("connectok"));

    let mut accepted = 0;
    for entry in &entries {
        let conn = match player_conn(entry, link) {
            Ok(conn) => conn,
            Err(e) => {
                warn!(%link, "Skipping connection in connect: {e}");
                continue;
            }
        };
        let connid = conn.connid;
        ctx.state.players.add(conn);
        ctx.send_to_link(link, connid, Command::new("playerok").with("connid", connid.0));
        accepted += 1;
    }
    info!(%link, accepted, listed = entries.len(), "Host connected");

    let notice = Command::message("Server broadcast: Server has restarted!");
    ctx.send_to_link(
        link,
        ConnId::NONE,
        Command::new("messageall").with("message", Value::Object(notice.to_object())),
    );
    Ok(())
}

/// A host link went away; forget the connections that lived on it.
fn cmd_disconnect(ctx: &mut TaskContext<'_>) -> Result<(), CommandError> {
    let link = LinkId(ctx.command().require_u64("link")?);
    let removed = ctx.state.players.remove_for_link(link);
    info!(%link, removed = removed.len(), "Host disconnected");
    Ok(())
}

fn cmd_playeropen(ctx: &mut TaskContext<'_>) -> Result<(), CommandError> {
    let connid = ctx.connid();
    let link = ctx.link();
    if connid.is_none() {
        return Err(CommandError::Failed("playeropen without a connection id".to_string()));
    }
    let uid = match ctx.command().require_u64("uid") {
        Ok(uid) => DocId(uid),
        Err(e) => {
            ctx.send_to_link(
                link,
                connid,
                Command::new("playernotok").with("text", format!("Bad open request: {e}")),
            );
            return Ok(());
        }
    };
    let email = ctx.command().get_str("email").unwrap_or("").to_string();
    let role = role_of(ctx.command().get("role"));
    if ctx
        .state
        .players
        .add(PlayerConn::new(connid, uid, email, link).with_role(role))
        .is_some()
    {
        warn!(%connid, "Player connection re-opened");
    }
    info!(
        %connid,
        %uid,
        %role,
        connections = ctx.state.players.count_for_uid(uid),
        "Player connected"
    );
    ctx.send_to_link(link, connid, Command::new("playerok").with("connid", connid.0));
    Ok(())
}

fn cmd_playerclose(ctx: &mut TaskContext<'_>) -> Result<(), CommandError> {
    let connid = ctx.connid();
    match ctx.state.players.remove(connid) {
        Some(conn) => info!(%connid, uid = %conn.uid, "Player disconnected"),
        None => info!(%connid, "Close for a connection that was never acknowledged"),
    }
    Ok(())
}

/// Drop player connections whose link is gone, or that have sat idle past the configured limit.
fn cmd_checkdisconnected(ctx: &mut TaskContext<'_>) -> Result<(), CommandError> {
    let live = ctx.state.outbound.links();
    let idle_limit = ctx.state.config.idle_limit;
    let removed = ctx.state.players.remove_where(|conn| {
        !live.contains(&conn.link) || idle_limit.is_some_and(|limit| conn.idle_time() > limit)
    });
    for conn in &removed {
        if live.contains(&conn.link) {
            ctx.send_to_link(
                conn.link,
                conn.connid,
                Command::new("playernotok").with("text", "Disconnected for inactivity."),
            );
        }
    }
    info!(
        removed = removed.len(),
        remaining = ctx.state.players.len(),
        "Checked for disconnected players"
    );
    Ok(())
}

fn cmd_logplayerconntable(ctx: &mut TaskContext<'_>) -> Result<(), CommandError> {
    ctx.state.players.dump_log();
    Ok(())
}

/// Announce the shutdown, refuse further commands, and have the dispatcher wind down once this
/// task has resolved. `restarting: "autoreload"` re-executes the process afterwards.
fn cmd_shutdownprocess(ctx: &mut TaskContext<'_>) -> Result<(), CommandError> {
    let restarting = ctx.command().get_str("restarting").map(str::to_string);
    ctx.state.client.begin_shutdown();
    let (text, outcome) = match restarting.as_deref() {
        Some("autoreload") => ("restarting", ShutdownOutcome::Restart),
        Some(_) => ("restarting", ShutdownOutcome::Exit),
        None => ("shutting down", ShutdownOutcome::Exit),
    };
    info!(?restarting, ?outcome, "Shutting down");
    ctx.broadcast(Command::message(format!(
        "Server broadcast: Server is {text}!"
    )));
    ctx.state.shutdown = Some(outcome);
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::builtins::command_table;
    use crate::config::Config;
    use crate::connections::PlayerConn;
    use crate::tasks::ShutdownOutcome;
    use crate::tasks::dispatcher::Dispatcher;
    use crate::testing::{MockOutbound, TestStore};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use twine_common::model::{DocId, Role};
    use twine_common::tasks::{Command, ConnId, LinkId};

    fn setup(links: &[u64]) -> (Arc<MockOutbound>, Dispatcher, crate::tasks::dispatcher_client::DispatcherClient) {
        let outbound = Arc::new(MockOutbound::with_links(links));
        let config = Config {
            shutdown_grace: Duration::ZERO,
            ..Config::default()
        };
        let (dispatcher, client) = Dispatcher::new(
            Arc::new(config),
            Arc::new(TestStore::new()),
            outbound.clone(),
            command_table().unwrap(),
        );
        (outbound, dispatcher, client)
    }

    #[test]
    fn connect_acknowledges_every_listed_connection() {
        let (outbound, mut dispatcher, client) = setup(&[1]);
        let connect = Command::new("connect").with(
            "connections",
            json!([
                {"connid": 4, "uid": 40, "email": "a@x"},
                {"connid": 7, "uid": 70, "email": "b@x", "role": "creator"},
                {"connid": 0, "uid": 1},
            ]),
        );
        client.enqueue(connect, ConnId::NONE, LinkId(1)).unwrap();
        assert_eq!(dispatcher.run_pending(), None);

        let sent = outbound.take();
        let summary: Vec<(u64, String)> = sent
            .iter()
            .map(|(_, c, m)| (c.0, m.name().to_string()))
            .collect();
        assert_eq!(
            summary,
            vec![
                (0, "connectok".to_string()),
                (4, "playerok".to_string()),
                (7, "playerok".to_string()),
                (0, "messageall".to_string()),
            ]
        );
        assert_eq!(dispatcher.players().len(), 2);
        assert_eq!(dispatcher.players().get(ConnId(7)).unwrap().uid, DocId(70));
        assert_eq!(dispatcher.players().get(ConnId(7)).unwrap().role, Role::Creator);
        assert_eq!(dispatcher.players().get(ConnId(4)).unwrap().role, Role::Player);
    }

    #[test]
    fn unknown_roles_get_no_privileges() {
        let (_outbound, mut dispatcher, client) = setup(&[2]);
        let open = Command::new("playeropen")
            .with("uid", 9)
            .with("email", "p@x")
            .with("role", "wizard");
        client.enqueue(open, ConnId(11), LinkId(2)).unwrap();
        dispatcher.run_pending();
        assert_eq!(dispatcher.players().get(ConnId(11)).unwrap().role, Role::Player);
    }

    #[test]
    fn open_then_close() {
        let (outbound, mut dispatcher, client) = setup(&[2]);
        let open = Command::new("playeropen").with("uid", 9).with("email", "p@x");
        client.enqueue(open, ConnId(11), LinkId(2)).unwrap();
        dispatcher.run_pending();
        assert_eq!(outbound.names_sent_to(ConnId(11)), vec!["playerok"]);
        assert!(dispatcher.players().contains(ConnId(11)));

        client
            .enqueue(Command::new("playerclose"), ConnId(11), LinkId(2))
            .unwrap();
        dispatcher.run_pending();
        assert!(dispatcher.players().is_empty());
    }

    #[test]
    fn bad_open_is_refused() {
        let (outbound, mut dispatcher, client) = setup(&[2]);
        client
            .enqueue(Command::new("playeropen"), ConnId(12), LinkId(2))
            .unwrap();
        dispatcher.run_pending();
        assert_eq!(outbound.names_sent_to(ConnId(12)), vec!["playernotok"]);
        assert!(dispatcher.players().is_empty());
    }

    #[test]
    fn disconnect_and_sweep_drop_connections_of_dead_links() {
        let (outbound, mut dispatcher, client) = setup(&[1, 2]);
        dispatcher.players_mut().add(PlayerConn::new(ConnId(1), DocId(1), "", LinkId(1)));
        dispatcher.players_mut().add(PlayerConn::new(ConnId(2), DocId(2), "", LinkId(2)));
        dispatcher.players_mut().add(PlayerConn::new(ConnId(3), DocId(3), "", LinkId(2)));

        client
            .enqueue_internal(Command::new("disconnect").with("link", 1))
            .unwrap();
        dispatcher.run_pending();
        assert_eq!(dispatcher.players().len(), 2);

        outbound.drop_link(LinkId(2));
        client
            .enqueue_internal(Command::new("checkdisconnected"))
            .unwrap();
        dispatcher.run_pending();
        assert!(dispatcher.players().is_empty());
    }

    #[test]
    fn players_cannot_send_server_commands() {
        let (outbound, mut dispatcher, client) = setup(&[1]);
        dispatcher.players_mut().add(PlayerConn::new(ConnId(5), DocId(1), "", LinkId(1)));
        client
            .enqueue(Command::new("shutdownprocess"), ConnId(5), LinkId(1))
            .unwrap();
        assert_eq!(dispatcher.run_pending(), None);
        assert!(!client.is_shutting_down());
        assert_eq!(dispatcher.stats().handle_failures, 1);
        assert!(outbound.take().is_empty());
    }

    #[test]
    fn shutdown_broadcasts_and_refuses_further_work() {
        let (outbound, mut dispatcher, client) = setup(&[1, 2]);
        client
            .enqueue_internal(Command::new("shutdownprocess").with("restarting", "autoreload"))
            .unwrap();
        client
            .enqueue_internal(Command::new("logplayerconntable"))
            .unwrap();
        assert_eq!(dispatcher.run_pending(), Some(ShutdownOutcome::Restart));
        assert!(client.is_shutting_down());
        assert!(outbound.is_closed());

        let sent = outbound.take();
        assert_eq!(sent.len(), 2);
        for (_, connid, message) in &sent {
            assert_eq!(*connid, ConnId::NONE);
            assert_eq!(message.name(), "messageall");
            assert_eq!(
                message.get("message"),
                Some(&json!({"cmd": "message", "text": "Server broadcast: Server is restarting!"}))
            );
        }
        assert_eq!(dispatcher.queue_len(), 0);
        assert!(client.enqueue_internal(Command::new("connect")).is_err());
    }
}

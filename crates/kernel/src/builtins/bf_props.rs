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

use crate::tasks::commands::{CommandDef, CommandError, CommandTable, DuplicateCommand, TaskContext};
use serde_json::Value;
use std::str::FromStr;
use twine_common::model::{Collection, PropKey, Role};
use twine_common::tasks::Command;

pub(crate) fn register(table: &mut CommandTable) -> Result<(), DuplicateCommand> {
    table.register(CommandDef::new("getprop", cmd_getprop).restrict(Role::Creator))?;
    table.register(
        CommandDef::new("setprop", cmd_setprop)
            .restrict(Role::Creator)
            .does_write(),
    )?;
    table.register(
        CommandDef::new("delprop", cmd_delprop)
            .restrict(Role::Creator)
            .does_write(),
    )?;
    table.register(
        CommandDef::new("pushprop", cmd_pushprop)
            .restrict(Role::Creator)
            .does_write(),
    )?;
    Ok(())
}

/// `{collection, id1, id2, name}` from the command.
fn prop_key(command: &Command) -> Result<PropKey, CommandError> {
    let collection = command.require_str("collection")?;
    let collection = Collection::from_str(collection)
        .map_err(|_| CommandError::ErrorMessage(format!("No such collection: {collection}")))?;
    Ok(PropKey::new(
        collection,
        command.require_u64("id1")?,
        command.require_u64("id2")?,
        command.require_str("name")?,
    ))
}

fn writable_key(command: &Command) -> Result<PropKey, CommandError> {
    let key = prop_key(command)?;
    if !key.is_writable() {
        return Err(CommandError::ErrorMessage(format!(
            "Properties in {} cannot be changed.",
            key.collection
        )));
    }
    Ok(key)
}

fn prop_reply(key: &PropKey, value: Option<&Value>) -> Command {
    let mut reply = Command::new("propval")
        .with("collection", key.collection.to_string())
        .with("id1", key.id1.0)
        .with("id2", key.id2.0)
        .with("name", key.name.clone())
        .with("found", value.is_some());
    if let Some(value) = value {
        reply.set("value", value.clone());
    }
    reply
}

fn cmd_getprop(ctx: &mut TaskContext<'_>) -> Result<(), CommandError> {
    let key = prop_key(ctx.command())?;
    let reply = prop_reply(&key, ctx.get_prop(&key)?);
    ctx.reply(reply);
    Ok(())
}

fn cmd_setprop(ctx: &mut TaskContext<'_>) -> Result<(), CommandError> {
    let key = writable_key(ctx.command())?;
    let value = ctx.command().require("value")?.clone();
    ctx.cache().set(&key, value)?;
    ctx.reply(Command::message(format!("Set {key}.")));
    Ok(())
}

fn cmd_delprop(ctx: &mut TaskContext<'_>) -> Result<(), CommandError> {
    let key = writable_key(ctx.command())?;
    ctx.cache().delete(&key)?;
    ctx.reply(Command::message(format!("Deleted {key}.")));
    Ok(())
}

/// Append to a list property in place; the change is written back when the task resolves.
fn cmd_pushprop(ctx: &mut TaskContext<'_>) -> Result<(), CommandError> {
    let key = writable_key(ctx.command())?;
    let value = ctx.command().require("value")?.clone();
    let Some(handle) = ctx.get_prop_handle(&key)? else {
        ctx.cache().set(&key, Value::Array(vec![value]))?;
        return Ok(());
    };
    match ctx.cache().value_mut(handle) {
        Some(Value::Array(items)) => {
            items.push(value);
            Ok(())
        }
        _ => Err(CommandError::ErrorMessage(format!("{key} is not a list."))),
    }
}

#[cfg(test)]
mod tests {
    use crate::builtins::command_table;
    use crate::config::Config;
    use crate::connections::PlayerConn;
    use crate::tasks::dispatcher::Dispatcher;
    use crate::tasks::dispatcher_client::DispatcherClient;
    use crate::testing::{MockOutbound, TestStore};
    use pretty_assertions::assert_eq;
    use serde_json::{Value, json};
    use std::sync::Arc;
    use twine_common::model::{Collection, DocId, PropKey, Role};
    use twine_common::tasks::{Command, ConnId, LinkId};

    const PLAYER: ConnId = ConnId(5);
    const VISITOR: ConnId = ConnId(6);
    const LINK: LinkId = LinkId(1);

    struct Fixture {
        store: Arc<TestStore>,
        outbound: Arc<MockOutbound>,
        dispatcher: Dispatcher,
        client: DispatcherClient,
    }

    fn setup() -> Fixture {
        let store = Arc::new(TestStore::new());
        let outbound = Arc::new(MockOutbound::with_links(&[1]));
        let (mut dispatcher, client) = Dispatcher::new(
            Arc::new(Config::default()),
            store.clone(),
            outbound.clone(),
            command_table().unwrap(),
        );
        dispatcher
            .players_mut()
            .add(PlayerConn::new(PLAYER, DocId(50), "p@x", LINK).with_role(Role::Creator));
        dispatcher
            .players_mut()
            .add(PlayerConn::new(VISITOR, DocId(60), "v@x", LINK));
        Fixture {
            store,
            outbound,
            dispatcher,
            client,
        }
    }

    fn prop_cmd(name: &str, collection: &str, prop: &str) -> Command {
        Command::new(name)
            .with("collection", collection)
            .with("id1", 1)
            .with("id2", 2)
            .with("name", prop)
    }

    impl Fixture {
        fn send(&mut self, command: Command) -> Vec<Command> {
            self.send_from(PLAYER, command)
        }

        fn send_from(&mut self, connid: ConnId, command: Command) -> Vec<Command> {
            self.client.enqueue(command, connid, LINK).unwrap();
            self.dispatcher.run_pending();
            self.outbound
                .take()
                .into_iter()
                .map(|(_, _, message)| message)
                .collect()
        }
    }

    #[test]
    fn set_then_get() {
        let mut f = setup();
        let replies = f.send(prop_cmd("setprop", "instanceprop", "desc").with("value", "A hall."));
        assert_eq!(replies, vec![Command::message("Set instanceprop(#1, #2, \"desc\").")]);
        assert_eq!(
            f.store
                .stored(&PropKey::new(Collection::InstanceProp, 1, 2, "desc")),
            Some(json!("A hall."))
        );

        let replies = f.send(prop_cmd("getprop", "instanceprop", "desc"));
        assert_eq!(replies[0].get("found"), Some(&Value::Bool(true)));
        assert_eq!(replies[0].get("value"), Some(&json!("A hall.")));
    }

    #[test]
    fn plain_players_cannot_touch_properties() {
        let mut f = setup();
        let key = PropKey::new(Collection::InstanceProp, 1, 2, "desc");
        f.store.seed(&key, json!("A hall."));

        let replies =
            f.send_from(VISITOR, prop_cmd("setprop", "instanceprop", "desc").with("value", "Mine."));
        assert_eq!(
            replies,
            vec![Command::error("The setprop command requires creator access.")]
        );
        let replies = f.send_from(VISITOR, prop_cmd("getprop", "instanceprop", "desc"));
        assert_eq!(
            replies,
            vec![Command::error("The getprop command requires creator access.")]
        );

        assert_eq!(f.store.stored(&key), Some(json!("A hall.")));
        assert_eq!(f.store.upserts(), 0);
        assert_eq!(f.store.finds(), 0);
    }

    #[test]
    fn read_only_collections_are_refused() {
        let mut f = setup();
        let replies = f.send(prop_cmd("setprop", "worldprop", "desc").with("value", 1));
        assert_eq!(
            replies,
            vec![Command::error("Properties in worldprop cannot be changed.")]
        );
        assert_eq!(f.store.upserts(), 0);
    }

    #[test]
    fn push_mutates_in_place_and_resolve_writes_it() {
        let mut f = setup();
        let key = PropKey::new(Collection::IPlayerProp, 1, 2, "log");
        f.store.seed(&key, json!(["a"]));
        let replies = f.send(prop_cmd("pushprop", "iplayerprop", "log").with("value", "b"));
        assert!(replies.is_empty());
        assert_eq!(f.store.stored(&key), Some(json!(["a", "b"])));
        assert_eq!(f.store.upserts(), 1);
    }

    #[test]
    fn missing_fields_are_logged_not_shown() {
        let mut f = setup();
        let replies = f.send(Command::new("getprop").with("collection", "instanceprop"));
        assert!(replies.is_empty());
        assert_eq!(f.dispatcher.stats().handle_failures, 1);
    }

    #[test]
    fn unavailable_store_is_reported_to_the_player() {
        let mut f = setup();
        f.store.set_down(true);
        let replies = f.send(prop_cmd("getprop", "instanceprop", "desc"));
        assert_eq!(replies, vec![Command::error("The database is not available.")]);
        assert_eq!(f.dispatcher.stats().handle_failures, 1);
    }

    #[test]
    fn unknown_commands_get_an_error_and_unregistered_connections_are_ignored() {
        let mut f = setup();
        let replies = f.send(Command::new("dance"));
        assert_eq!(replies, vec![Command::error("Unknown command: dance")]);

        f.client
            .enqueue(prop_cmd("getprop", "instanceprop", "x"), ConnId(99), LINK)
            .unwrap();
        f.dispatcher.run_pending();
        assert!(f.outbound.take().is_empty());
        assert_eq!(f.store.finds(), 0);
    }
}

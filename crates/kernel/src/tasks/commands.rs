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

use crate::propcache::{PropCache, PropCacheError, PropHandle};
use crate::tasks::EngineState;
use crate::tasks::task::Outgoing;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use twine_common::model::{PropKey, Role};
use twine_common::tasks::{Command, CommandFormatError, ConnId, LinkId};

/// What a command handler can fail with.
#[derive(Debug, Error)]
pub enum CommandError {
    /// Shown to the player as a `message` record.
    #[error("{0}")]
    Message(String),
    /// Shown to the player as an `error` record.
    #[error("{0}")]
    ErrorMessage(String),
    #[error("malformed command: {0}")]
    Format(#[from] CommandFormatError),
    #[error(transparent)]
    Cache(#[from] PropCacheError),
    #[error("no command named {0:?}")]
    Unknown(String),
    #[error("{name:?} cannot be sent from {origin}")]
    NotPermitted { name: String, origin: String },
    #[error("{0}")]
    Failed(String),
}

pub type CommandHandler = fn(&mut TaskContext<'_>) -> Result<(), CommandError>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandFlags {
    /// Sent by a host or by the engine itself, with no player connection.
    pub server: bool,
    /// Addressed to a connection id the engine has not registered yet.
    pub preconnection: bool,
    /// Always resolves, even if the handler queued nothing.
    pub does_write: bool,
    /// The least role a player connection needs to run it.
    pub restrict: Option<Role>,
}

#[derive(Clone)]
pub struct CommandDef {
    pub name: &'static str,
    pub flags: CommandFlags,
    pub handler: CommandHandler,
}

impl CommandDef {
    pub fn new(name: &'static str, handler: CommandHandler) -> Self {
        Self {
            name,
            flags: CommandFlags::default(),
            handler,
        }
    }

    pub fn server(mut self) -> Self {
        self.flags.server = true;
        self
    }

    pub fn preconnection(mut self) -> Self {
        self.flags.preconnection = true;
        self
    }

    pub fn does_write(mut self) -> Self {
        self.flags.does_write = true;
        self
    }

    pub fn restrict(mut self, role: Role) -> Self {
        self.flags.restrict = Some(role);
        self
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("command {0:?} is already registered")]
pub struct DuplicateCommand(pub &'static str);

#[derive(Default, Clone)]
pub struct CommandTable {
    defs: HashMap<&'static str, CommandDef>,
}

impl CommandTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, def: CommandDef) -> Result<(), DuplicateCommand> {
        if self.defs.contains_key(def.name) {
            return Err(DuplicateCommand(def.name));
        }
        self.defs.insert(def.name, def);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&CommandDef> {
        self.defs.get(name)
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }
}

/// Everything a handler gets to work with: the command, where it came from, the task's property
/// cache, its outbox, and the engine state shared by all tasks.
pub struct TaskContext<'a> {
    pub(crate) command: &'a Command,
    pub(crate) connid: ConnId,
    pub(crate) link: LinkId,
    pub(crate) cache: &'a mut PropCache,
    pub(crate) dependencies: &'a mut HashSet<PropKey>,
    pub(crate) outbox: &'a mut Vec<Outgoing>,
    pub state: &'a mut EngineState,
}

impl TaskContext<'_> {
    pub fn command(&self) -> &Command {
        self.command
    }

    pub fn connid(&self) -> ConnId {
        self.connid
    }

    pub fn link(&self) -> LinkId {
        self.link
    }

    pub fn cache(&mut self) -> &mut PropCache {
        self.cache
    }

    /// Read a property, recording it as a dependency of this task.
    pub fn get_prop(&mut self, key: &PropKey) -> Result<Option<&Value>, CommandError> {
        Ok(self.cache.get_value(key, Some(&mut *self.dependencies))?)
    }

    pub fn get_prop_handle(&mut self, key: &PropKey) -> Result<Option<PropHandle>, CommandError> {
        Ok(self.cache.get(key, Some(&mut *self.dependencies))?.handle())
    }

    /// Queue a record for the connection that sent the command, over the link it came in on.
    pub fn reply(&mut self, message: Command) {
        self.outbox
            .push(Outgoing::reply(self.connid, self.link, message));
    }

    pub fn send_to_connection(&mut self, connid: ConnId, message: Command) {
        self.outbox
            .push(Outgoing::ToConnection { connid, message });
    }

    /// Queue a record for a link directly, whether or not `connid` is registered.
    pub fn send_to_link(&mut self, link: LinkId, connid: ConnId, message: Command) {
        self.outbox.push(Outgoing::ToLink {
            link,
            connid,
            message,
        });
    }

    /// Queue a record for every connected player on every link.
    pub fn broadcast(&mut self, message: Command) {
        self.outbox.push(Outgoing::Broadcast { message });
    }
}

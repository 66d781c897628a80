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

use crate::outbound::OutboundError;
use crate::propcache::{PropCache, PropCacheError};
use crate::tasks::EngineState;
use crate::tasks::commands::{CommandError, CommandTable, TaskContext};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use twine_common::model::PropKey;
use twine_common::tasks::{Command, ConnId, LinkId};
use twine_db::PropStore;

pub type TaskId = u64;

pub const DATABASE_UNAVAILABLE: &str = "The database is not available.";

/// A command waiting its turn, with where it came from and when it arrived.
#[derive(Debug, Clone)]
pub struct QueuedCommand {
    pub command: Command,
    pub connid: ConnId,
    pub link: LinkId,
    pub enqueued_at: Instant,
}

impl QueuedCommand {
    pub fn new(command: Command, connid: ConnId, link: LinkId) -> Self {
        Self {
            command,
            connid,
            link,
            enqueued_at: Instant::now(),
        }
    }

    /// A command the engine issues to itself.
    pub fn internal(command: Command) -> Self {
        Self::new(command, ConnId::NONE, LinkId::INTERNAL)
    }
}

/// A record a task wants sent once it resolves.
#[derive(Debug, Clone, PartialEq)]
pub enum Outgoing {
    /// To a registered player connection, over whichever link holds it.
    ToConnection { connid: ConnId, message: Command },
    /// Over a specific link.
    ToLink {
        link: LinkId,
        connid: ConnId,
        message: Command,
    },
    /// To every player on every link.
    Broadcast { message: Command },
}

impl Outgoing {
    pub fn reply(connid: ConnId, link: LinkId, message: Command) -> Self {
        if link.is_internal() {
            Outgoing::ToConnection { connid, message }
        } else {
            Outgoing::ToLink {
                link,
                connid,
                message,
            }
        }
    }

    fn deliver(&self, state: &EngineState) -> Result<(), OutboundError> {
        match self {
            Outgoing::ToConnection { connid, message } => {
                let conn = state
                    .players
                    .get(*connid)
                    .ok_or(OutboundError::NoSuchConnection(*connid))?;
                state.outbound.send(conn.link, *connid, message)
            }
            Outgoing::ToLink {
                link,
                connid,
                message,
            } => state.outbound.send(*link, *connid, message),
            Outgoing::Broadcast { message } => {
                let wrapped =
                    Command::new("messageall").with("message", Value::Object(message.to_object()));
                let mut result = Ok(());
                for link in state.outbound.links() {
                    if let Err(e) = state.outbound.send(link, ConnId::NONE, &wrapped) {
                        warn!("Broadcast to {link} failed: {e}");
                        result = result.and(Err(e));
                    }
                }
                result
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPhase {
    Pending,
    Running,
    Resolving,
}

/// One command's worth of work. The dispatcher runs [`Task::handle`], then [`Task::resolve`] if
/// anything is left to commit, then [`Task::close`], which consumes the task.
pub struct Task {
    id: TaskId,
    queued: QueuedCommand,
    cache: PropCache,
    dependencies: HashSet<PropKey>,
    started_at: Instant,
    does_write: bool,
    outbox: Vec<Outgoing>,
    phase: TaskPhase,
}

impl Task {
    pub fn new(id: TaskId, queued: QueuedCommand, store: Arc<dyn PropStore>) -> Self {
        Self {
            id,
            queued,
            cache: PropCache::new(store),
            dependencies: HashSet::new(),
            started_at: Instant::now(),
            does_write: false,
            outbox: vec![],
            phase: TaskPhase::Pending,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn command(&self) -> &Command {
        &self.queued.command
    }

    pub fn connid(&self) -> ConnId {
        self.queued.connid
    }

    pub fn phase(&self) -> TaskPhase {
        self.phase
    }

    pub fn enqueued_at(&self) -> Instant {
        self.queued.enqueued_at
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn outbox(&self) -> &[Outgoing] {
        &self.outbox
    }

    /// Route the command to its handler and run it.
    ///
    /// Errors meant for the player are turned into records for the originating connection here
    /// and are not returned. Anything returned is for the caller to log.
    pub fn handle(
        &mut self,
        commands: &CommandTable,
        state: &mut EngineState,
    ) -> Result<(), CommandError> {
        self.phase = TaskPhase::Running;
        let connid = self.queued.connid;
        let name = self.queued.command.name();

        let Some(def) = commands.get(name) else {
            if connid.is_none() {
                return Err(CommandError::Unknown(name.to_string()));
            }
            warn!(task_id = self.id, %connid, name, "Unknown command from player");
            let text = format!("Unknown command: {name}");
            self.notify(Command::error(text));
            return Ok(());
        };

        if connid.is_none() {
            if !def.flags.server {
                return Err(CommandError::NotPermitted {
                    name: name.to_string(),
                    origin: "a host".to_string(),
                });
            }
        } else {
            if def.flags.server {
                let refused = CommandError::NotPermitted {
                    name: name.to_string(),
                    origin: connid.to_string(),
                };
                let text = format!("Unknown command: {name}");
                self.notify(Command::error(text));
                return Err(refused);
            }
            if !def.flags.preconnection {
                let Some(conn) = state.players.get(connid) else {
                    warn!(task_id = self.id, %connid, name, "Dropping command from unregistered connection");
                    return Ok(());
                };
                if let Some(required) = def.flags.restrict
                    && !conn.role.permits(required)
                {
                    warn!(
                        task_id = self.id,
                        %connid,
                        name,
                        role = %conn.role,
                        %required,
                        "Refusing restricted command"
                    );
                    let text = format!("The {name} command requires {required} access.");
                    self.notify(Command::error(text));
                    return Ok(());
                }
                state.players.touch(connid);
            }
        }

        self.does_write = def.flags.does_write;
        let handler = def.handler;
        let mut ctx = TaskContext {
            command: &self.queued.command,
            connid,
            link: self.queued.link,
            cache: &mut self.cache,
            dependencies: &mut self.dependencies,
            outbox: &mut self.outbox,
            state,
        };
        match handler(&mut ctx) {
            Ok(()) => Ok(()),
            Err(CommandError::Message(text)) => {
                self.notify(Command::message(text));
                Ok(())
            }
            Err(CommandError::ErrorMessage(text)) => {
                self.notify(Command::error(text));
                Ok(())
            }
            Err(e @ CommandError::Cache(PropCacheError::Store(_))) => {
                self.notify(Command::error(DATABASE_UNAVAILABLE));
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    fn notify(&mut self, message: Command) {
        if self.queued.connid.is_none() {
            info!(task_id = self.id, "{}", message);
            return;
        }
        self.outbox.push(Outgoing::reply(
            self.queued.connid,
            self.queued.link,
            message,
        ));
    }

    /// Whether the handler left anything to commit: queued records, dirty properties, or a
    /// command that always resolves.
    pub fn is_writable(&self) -> bool {
        self.does_write || !self.outbox.is_empty() || self.cache.has_dirty()
    }

    /// Commit dirty properties, then deliver queued records. Undeliverable records are logged and
    /// dropped; a failed write does not stop the rest from being tried.
    pub fn resolve(&mut self, state: &EngineState) -> Result<(), PropCacheError> {
        self.phase = TaskPhase::Resolving;
        let written = self.cache.write_all_dirty();
        for outgoing in self.outbox.drain(..) {
            if let Err(e) = outgoing.deliver(state) {
                warn!(task_id = self.id, "Could not deliver {:?}: {e}", outgoing);
            }
        }
        let written = written?;
        if written > 0 {
            debug!(task_id = self.id, written, "Wrote back dirty properties");
        }
        Ok(())
    }

    pub fn close(self) {
        let lost = self.cache.finalize();
        debug!(
            task_id = self.id,
            dependencies = self.dependencies.len(),
            lost,
            "Task closed"
        );
    }
}

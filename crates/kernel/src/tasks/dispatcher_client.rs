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

use crate::tasks::task::QueuedCommand;
use flume::Sender;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::info;
use twine_common::tasks::{Command, ConnId, LinkId};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatcherError {
    #[error("dispatcher not responding")]
    NotResponding,
    #[error("shutting down; command {0:?} rejected")]
    ShuttingDown(String),
}

pub enum DispatcherMsg {
    Enqueue(QueuedCommand),
    /// Jump the queue: runs before anything already waiting.
    Urgent(QueuedCommand),
    Schedule { command: Command, delay: Duration },
    Halt,
}

/// A handle for talking to the dispatcher from the outside world: network readers, signal
/// handlers, tests, and handlers that want to queue follow-up work.
#[derive(Clone)]
pub struct DispatcherClient {
    sender: Sender<DispatcherMsg>,
    shutting_down: Arc<AtomicBool>,
}

impl DispatcherClient {
    pub fn new(sender: Sender<DispatcherMsg>) -> Self {
        Self {
            sender,
            shutting_down: Arc::new(AtomicBool::new(false)),
        }
    }

    fn check_running(&self, command: &Command) -> Result<(), DispatcherError> {
        if self.is_shutting_down() {
            info!(cmd = command.name(), "Rejecting command; server is shutting down");
            return Err(DispatcherError::ShuttingDown(command.name().to_string()));
        }
        Ok(())
    }

    /// Append a command to the queue, stamped with the time of arrival.
    pub fn enqueue(
        &self,
        command: Command,
        connid: ConnId,
        link: LinkId,
    ) -> Result<(), DispatcherError> {
        self.check_running(&command)?;
        self.sender
            .send(DispatcherMsg::Enqueue(QueuedCommand::new(
                command, connid, link,
            )))
            .map_err(|_| DispatcherError::NotResponding)
    }

    pub fn enqueue_internal(&self, command: Command) -> Result<(), DispatcherError> {
        self.enqueue(command, ConnId::NONE, LinkId::INTERNAL)
    }

    /// Put an internal command at the head of the queue. Used for signal-driven shutdown.
    pub fn enqueue_urgent(&self, command: Command) -> Result<(), DispatcherError> {
        self.check_running(&command)?;
        self.sender
            .send(DispatcherMsg::Urgent(QueuedCommand::internal(command)))
            .map_err(|_| DispatcherError::NotResponding)
    }

    /// Enqueue `command` as an internal command once `delay` has passed. Scheduled commands live
    /// only in memory; they are lost if the process exits first.
    pub fn schedule(&self, command: Command, delay: Duration) -> Result<(), DispatcherError> {
        self.check_running(&command)?;
        self.sender
            .send(DispatcherMsg::Schedule { command, delay })
            .map_err(|_| DispatcherError::NotResponding)
    }

    /// Enter shutdown mode; every later enqueue is refused. Returns whether shutdown had already
    /// begun.
    pub fn begin_shutdown(&self) -> bool {
        self.shutting_down.swap(true, Ordering::SeqCst)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Stop the dispatcher loop after the current task, skipping the orderly shutdown.
    pub fn halt(&self) -> Result<(), DispatcherError> {
        self.sender
            .send(DispatcherMsg::Halt)
            .map_err(|_| DispatcherError::NotResponding)
    }
}

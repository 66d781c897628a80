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

pub mod commands;
pub mod dispatcher;
pub mod dispatcher_client;
pub mod task;

use crate::config::Config;
use crate::connections::PlayerConnTable;
use crate::outbound::Outbound;
use crate::tasks::dispatcher_client::DispatcherClient;
use std::sync::Arc;

/// How the dispatcher loop ended, and so what the process should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Exit the process.
    Exit,
    /// Replace the process with a fresh copy of itself.
    Restart,
    /// The loop was told to stop without an orderly shutdown.
    Halted,
}

/// State that outlives any one task. Owned by the dispatcher and lent to each handler in turn.
pub struct EngineState {
    pub players: PlayerConnTable,
    pub outbound: Arc<dyn Outbound>,
    pub client: DispatcherClient,
    pub config: Arc<Config>,
    /// Set by a handler to have the dispatcher shut down once the current task closes.
    pub shutdown: Option<ShutdownOutcome>,
}

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

pub use crate::builtins::command_table;
pub use crate::config::Config;
pub use crate::connections::{PlayerConn, PlayerConnTable};
pub use crate::outbound::{Outbound, OutboundError};
pub use crate::propcache::{PropCache, PropCacheError, PropEntry, PropHandle};
pub use crate::tasks::ShutdownOutcome;
pub use crate::tasks::dispatcher::Dispatcher;
pub use crate::tasks::dispatcher_client::{DispatcherClient, DispatcherError};
pub use crate::tasks::task::Task;

pub mod builtins;
pub mod config;
pub mod connections;
pub mod outbound;
pub mod propcache;
pub mod tasks;

pub mod testing;

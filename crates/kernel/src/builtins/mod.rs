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

//! The commands the engine understands out of the box: the host handshake and housekeeping
//! commands, and the property administration commands.

mod bf_props;
mod bf_server;

use crate::tasks::commands::{CommandTable, DuplicateCommand};

/// A command table holding every built-in command.
pub fn command_table() -> Result<CommandTable, DuplicateCommand> {
    let mut table = CommandTable::new();
    bf_server::register(&mut table)?;
    bf_props::register(&mut table)?;
    Ok(table)
}

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

mod command;

pub use command::{Command, CommandFormatError};

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Identifies one player connection, as assigned by the host that holds it. `0` means "no
/// player connection": the command came from the host itself or from inside the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnId(pub u64);

impl ConnId {
    pub const NONE: ConnId = ConnId(0);

    pub fn is_none(&self) -> bool {
        self.0 == 0
    }
}

impl Display for ConnId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn:{}", self.0)
    }
}

/// Identifies one host link to the engine. `0` is reserved for commands the engine generates
/// for itself (timers, signals, re-queues).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LinkId(pub u64);

impl LinkId {
    pub const INTERNAL: LinkId = LinkId(0);

    pub fn is_internal(&self) -> bool {
        self.0 == 0
    }
}

impl Display for LinkId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "link:{}", self.0)
    }
}

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

use serde::{Deserialize, Serialize};
use strum::{Display as StrumDisplay, EnumString};

/// What a player is allowed to do, as vouched for by the host that authenticated them.
/// Ordered: each role includes the ones before it.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    StrumDisplay,
    EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    #[default]
    Player,
    /// May build worlds and inspect or edit their properties.
    Creator,
    Admin,
}

impl Role {
    pub fn permits(&self, required: Role) -> bool {
        *self >= required
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use test_case::test_case;

    #[test_case(Role::Player, Role::Creator, false)]
    #[test_case(Role::Creator, Role::Creator, true)]
    #[test_case(Role::Admin, Role::Creator, true)]
    #[test_case(Role::Creator, Role::Admin, false)]
    fn permits(role: Role, required: Role, expected: bool) {
        assert_eq!(role.permits(required), expected);
    }

    #[test]
    fn names() {
        assert_eq!(Role::from_str("creator"), Ok(Role::Creator));
        assert!(Role::from_str("wizard").is_err());
        assert_eq!(Role::Admin.to_string(), "admin");
        assert_eq!(Role::default(), Role::Player);
    }
}

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

use thiserror::Error;
use twine_common::tasks::{Command, ConnId, LinkId};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OutboundError {
    #[error("{0} is not connected")]
    NoSuchLink(LinkId),
    #[error("{0} is closed to writes")]
    Closed(LinkId),
    #[error("{0} is not a registered player connection")]
    NoSuchConnection(ConnId),
}

/// The engine's way out to its hosts. Implementations queue the record for the link's writer and
/// return immediately; they never block the dispatcher on the network.
pub trait Outbound: Send + Sync {
    /// Deliver one record over `link`, addressed to `connid` (or to the host itself, for
    /// [`ConnId::NONE`]).
    fn send(&self, link: LinkId, connid: ConnId, message: &Command) -> Result<(), OutboundError>;

    /// The links currently connected.
    fn links(&self) -> Vec<LinkId>;

    fn is_live(&self, link: LinkId) -> bool {
        self.links().contains(&link)
    }

    /// Stop accepting new links and close the existing ones once their queued writes drain.
    fn close_all(&self);
}

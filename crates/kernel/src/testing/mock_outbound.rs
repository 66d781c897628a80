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

use crate::outbound::{Outbound, OutboundError};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use twine_common::tasks::{Command, ConnId, LinkId};

/// Mock outbound transport that captures everything sent instead of writing to a socket.
#[derive(Default)]
pub struct MockOutbound {
    /// Captured records, in send order.
    pub sent: Arc<Mutex<Vec<(LinkId, ConnId, Command)>>>,
    links: Mutex<BTreeSet<LinkId>>,
    closed: AtomicBool,
}

impl MockOutbound {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_links(links: &[u64]) -> Self {
        let outbound = Self::new();
        for link in links {
            outbound.connect_link(LinkId(*link));
        }
        outbound
    }

    pub fn connect_link(&self, link: LinkId) {
        self.links.lock().unwrap().insert(link);
    }

    pub fn drop_link(&self, link: LinkId) {
        self.links.lock().unwrap().remove(&link);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn take(&self) -> Vec<(LinkId, ConnId, Command)> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }

    /// Names of the records sent to `connid`, in order.
    pub fn names_sent_to(&self, connid: ConnId) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, c, _)| *c == connid)
            .map(|(_, _, m)| m.name().to_string())
            .collect()
    }
}

impl Outbound for MockOutbound {
    fn send(&self, link: LinkId, connid: ConnId, message: &Command) -> Result<(), OutboundError> {
        if self.is_closed() {
            return Err(OutboundError::Closed(link));
        }
        if !self.links.lock().unwrap().contains(&link) {
            return Err(OutboundError::NoSuchLink(link));
        }
        self.sent
            .lock()
            .unwrap()
            .push((link, connid, message.clone()));
        Ok(())
    }

    fn links(&self) -> Vec<LinkId> {
        self.links.lock().unwrap().iter().copied().collect()
    }

    fn close_all(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

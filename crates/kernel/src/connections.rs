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

use std::collections::BTreeMap;
use std::time::{Duration, Instant, SystemTime};
use tracing::info;
use twine_common::model::{DocId, Role};
use twine_common::tasks::{ConnId, LinkId};

/// The engine's record of a player connection that it has acknowledged.
#[derive(Debug, Clone)]
pub struct PlayerConn {
    pub connid: ConnId,
    pub uid: DocId,
    pub email: String,
    pub role: Role,
    /// The host link the connection lives on.
    pub link: LinkId,
    pub connected_at: SystemTime,
    pub last_activity: Instant,
}

impl PlayerConn {
    pub fn new(connid: ConnId, uid: DocId, email: impl Into<String>, link: LinkId) -> Self {
        Self {
            connid,
            uid,
            email: email.into(),
            role: Role::default(),
            link,
            connected_at: SystemTime::now(),
            last_activity: Instant::now(),
        }
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    pub fn idle_time(&self) -> Duration {
        self.last_activity.elapsed()
    }
}

/// Acknowledged player connections, by connection id. Owned by the dispatcher thread, so it
/// needs no locking.
#[derive(Debug, Default)]
pub struct PlayerConnTable {
    conns: BTreeMap<ConnId, PlayerConn>,
}

impl PlayerConnTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert, replacing (and returning) any previous record for the same id.
    pub fn add(&mut self, conn: PlayerConn) -> Option<PlayerConn> {
        self.conns.insert(conn.connid, conn)
    }

    pub fn get(&self, connid: ConnId) -> Option<&PlayerConn> {
        self.conns.get(&connid)
    }

    pub fn contains(&self, connid: ConnId) -> bool {
        self.conns.contains_key(&connid)
    }

    pub fn touch(&mut self, connid: ConnId) {
        if let Some(conn) = self.conns.get_mut(&connid) {
            conn.last_activity = Instant::now();
        }
    }

    pub fn remove(&mut self, connid: ConnId) -> Option<PlayerConn> {
        self.conns.remove(&connid)
    }

    /// Remove every record matching `pred`, returning what was removed.
    pub fn remove_where(&mut self, mut pred: impl FnMut(&PlayerConn) -> bool) -> Vec<PlayerConn> {
        let doomed: Vec<ConnId> = self
            .conns
            .values()
            .filter(|c| pred(c))
            .map(|c| c.connid)
            .collect();
        doomed
            .into_iter()
            .filter_map(|connid| self.conns.remove(&connid))
            .collect()
    }

    pub fn remove_for_link(&mut self, link: LinkId) -> Vec<PlayerConn> {
        self.remove_where(|c| c.link == link)
    }

    pub fn count_for_uid(&self, uid: DocId) -> usize {
        self.conns.values().filter(|c| c.uid == uid).count()
    }

    pub fn len(&self) -> usize {
        self.conns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PlayerConn> {
        self.conns.values()
    }

    pub fn dump_log(&self) {
        info!(count = self.conns.len(), "Player connection table");
        for conn in self.conns.values() {
            info!(
                connid = conn.connid.0,
                uid = %conn.uid,
                email = %conn.email,
                role = %conn.role,
                link = conn.link.0,
                idle = ?conn.idle_time(),
                "  player connection"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn(id: u64, uid: u64, link: u64) -> PlayerConn {
        PlayerConn::new(ConnId(id), DocId(uid), format!("p{uid}@example.com"), LinkId(link))
    }

    #[test]
    fn add_replaces_by_connid() {
        let mut table = PlayerConnTable::new();
        assert!(table.add(conn(1, 10, 1)).is_none());
        let previous = table.add(conn(1, 11, 1)).unwrap();
        assert_eq!(previous.uid, DocId(10));
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(ConnId(1)).unwrap().uid, DocId(11));
    }

    #[test]
    fn remove_for_link_only_touches_that_link() {
        let mut table = PlayerConnTable::new();
        table.add(conn(1, 10, 1));
        table.add(conn(2, 10, 2));
        table.add(conn(3, 12, 1));
        assert_eq!(table.count_for_uid(DocId(10)), 2);

        let removed = table.remove_for_link(LinkId(1));
        let mut ids: Vec<u64> = removed.iter().map(|c| c.connid.0).collect();
        ids.sort();
        assert_eq!(ids, vec![1, 3]);
        assert!(table.contains(ConnId(2)));
        assert_eq!(table.count_for_uid(DocId(10)), 1);
    }
}

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

//! Player connections held by the host, and whether the engine has acknowledged them.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};
use twine_common::model::{DocId, Role};
use twine_common::tasks::{Command, ConnId};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("channel is closed")]
    Closed,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("no such connection: {0}")]
    NotFound(ConnId),
    #[error("{0} has no open channel")]
    ChannelGone(ConnId),
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

/// One player transport. The table only holds a weak reference to it; the task driving the
/// socket owns it.
pub trait ClientChannel: Send + Sync {
    /// The id this channel was handed by `ConnectionTable::generate_connid`.
    fn connid(&self) -> ConnId;
    fn write_line(&self, line: String) -> Result<(), ChannelError>;
    /// Flush what was written so far, then hang up.
    fn close(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    /// Inserted, or the engine link went away; waiting on `playerok`.
    Unavailable { since: Instant },
    Available,
}

#[derive(Clone)]
pub struct Connection {
    pub connid: ConnId,
    pub uid: DocId,
    pub email: String,
    pub session: String,
    pub role: Role,
    channel: Weak<dyn ClientChannel>,
    created: Instant,
    last_activity: Instant,
    availability: Availability,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("connid", &self.connid)
            .field("uid", &self.uid)
            .field("email", &self.email)
            .field("role", &self.role)
            .field("availability", &self.availability)
            .finish()
    }
}

impl Connection {
    pub fn is_available(&self) -> bool {
        self.availability == Availability::Available
    }

    pub fn availability(&self) -> Availability {
        self.availability
    }

    /// Time since the connection was added, in whole seconds.
    pub fn uptime(&self) -> Duration {
        Duration::from_secs(self.created.elapsed().as_secs())
    }

    /// Time since the last accepted message, in whole seconds.
    pub fn idle_time(&self) -> Duration {
        Duration::from_secs(self.last_activity.elapsed().as_secs())
    }

    pub fn write(&self, message: &Command) -> Result<(), ConnectionError> {
        let channel = self
            .channel
            .upgrade()
            .ok_or(ConnectionError::ChannelGone(self.connid))?;
        channel.write_line(message.to_string())?;
        Ok(())
    }

    /// Send `{cmd:"error", text}`. Failures are logged, not returned.
    pub fn write_error(&self, text: &str) {
        if let Err(e) = self.write(&Command::error(text)) {
            warn!(connid = %self.connid, "Unable to deliver error to player: {e}");
        }
    }

    /// Write an optional error, then close the channel.
    pub fn close(&self, errmsg: Option<&str>) {
        if let Some(text) = errmsg {
            self.write_error(text);
        }
        match self.channel.upgrade() {
            Some(channel) => channel.close(),
            None => debug!(connid = %self.connid, "Channel already gone at close"),
        }
    }
}

struct Inner {
    connections: BTreeMap<ConnId, Connection>,
    next_connid: u64,
}

pub struct ConnectionTable {
    inner: Mutex<Inner>,
}

impl Default for ConnectionTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                connections: BTreeMap::new(),
                next_connid: 1,
            }),
        }
    }

    /// Ids start at 1 and are never reused for the life of the process.
    pub fn generate_connid(&self) -> ConnId {
        let mut inner = self.inner.lock().unwrap();
        let connid = ConnId(inner.next_connid);
        inner.next_connid += 1;
        connid
    }

    /// Insert the channel's connection as Unavailable. It stays that way until the engine
    /// acknowledges it.
    pub fn add(
        &self,
        channel: &Arc<dyn ClientChannel>,
        uid: DocId,
        email: impl Into<String>,
        session: impl Into<String>,
    ) -> Connection {
        self.add_with_role(channel, uid, email, session, Role::Player)
    }

    pub fn add_with_role(
        &self,
        channel: &Arc<dyn ClientChannel>,
        uid: DocId,
        email: impl Into<String>,
        session: impl Into<String>,
        role: Role,
    ) -> Connection {
        let now = Instant::now();
        let connid = channel.connid();
        let conn = Connection {
            connid,
            uid,
            email: email.into(),
            session: session.into(),
            role,
            channel: Arc::downgrade(channel),
            created: now,
            last_activity: now,
            availability: Availability::Unavailable { since: now },
        };
        let mut inner = self.inner.lock().unwrap();
        if inner.connections.insert(connid, conn.clone()).is_some() {
            warn!(%connid, "Replaced an existing connection with the same id");
        }
        conn
    }

    pub fn find(&self, connid: ConnId) -> Result<Connection, ConnectionError> {
        self.inner
            .lock()
            .unwrap()
            .connections
            .get(&connid)
            .cloned()
            .ok_or(ConnectionError::NotFound(connid))
    }

    /// Removing a channel that is not present is not an error.
    pub fn remove(&self, channel: &dyn ClientChannel) -> Option<Connection> {
        self.remove_connid(channel.connid())
    }

    pub fn remove_connid(&self, connid: ConnId) -> Option<Connection> {
        self.inner.lock().unwrap().connections.remove(&connid)
    }

    pub fn mark_available(&self, connid: ConnId) -> Result<(), ConnectionError> {
        let mut inner = self.inner.lock().unwrap();
        let conn = inner
            .connections
            .get_mut(&connid)
            .ok_or(ConnectionError::NotFound(connid))?;
        conn.availability = Availability::Available;
        Ok(())
    }

    /// The engine went away. Returns how many connections were available before.
    pub fn mark_all_unavailable(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap();
        let mut count = 0;
        for conn in inner.connections.values_mut() {
            if conn.is_available() {
                conn.availability = Availability::Unavailable { since: now };
                count += 1;
            }
        }
        count
    }

    pub fn touch(&self, connid: ConnId) {
        if let Some(conn) = self.inner.lock().unwrap().connections.get_mut(&connid) {
            conn.last_activity = Instant::now();
        }
    }

    /// Remove and return every connection that has been Unavailable for at least `timeout`.
    /// Closing them is left to the caller, outside the lock.
    pub fn sweep_unavailable(&self, timeout: Duration) -> Vec<Connection> {
        let mut inner = self.inner.lock().unwrap();
        let stale: Vec<ConnId> = inner
            .connections
            .values()
            .filter(|c| match c.availability {
                Availability::Unavailable { since } => since.elapsed() >= timeout,
                Availability::Available => false,
            })
            .map(|c| c.connid)
            .collect();
        let swept: Vec<Connection> = stale
            .iter()
            .filter_map(|connid| inner.connections.remove(connid))
            .collect();
        if !swept.is_empty() {
            info!(count = swept.len(), "Swept connections left unavailable");
        }
        swept
    }

    pub fn all(&self) -> Vec<Connection> {
        self.inner
            .lock()
            .unwrap()
            .connections
            .values()
            .cloned()
            .collect()
    }

    pub fn available(&self) -> Vec<Connection> {
        self.inner
            .lock()
            .unwrap()
            .connections
            .values()
            .filter(|c| c.is_available())
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Captures lines written to a player.
    pub(crate) struct MockChannel {
        connid: ConnId,
        pub(crate) lines: Mutex<Vec<String>>,
        pub(crate) closed: AtomicBool,
    }

    impl MockChannel {
        pub(crate) fn new(connid: ConnId) -> Arc<Self> {
            Arc::new(Self {
                connid,
                lines: Mutex::new(vec![]),
                closed: AtomicBool::new(false),
            })
        }

        pub(crate) fn commands(&self) -> Vec<Command> {
            self.lines
                .lock()
                .unwrap()
                .iter()
                .map(|l| Command::from_value(serde_json::from_str(l).unwrap()).unwrap())
                .collect()
        }

        pub(crate) fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    impl ClientChannel for MockChannel {
        fn connid(&self) -> ConnId {
            self.connid
        }

        fn write_line(&self, line: String) -> Result<(), ChannelError> {
            if self.is_closed() {
                return Err(ChannelError::Closed);
            }
            self.lines.lock().unwrap().push(line);
            Ok(())
        }

        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    fn add_mock(table: &ConnectionTable) -> (Arc<MockChannel>, Arc<dyn ClientChannel>) {
        let mock = MockChannel::new(table.generate_connid());
        let channel: Arc<dyn ClientChannel> = mock.clone();
        table.add(&channel, DocId(7), "someone@example.com", "sess");
        (mock, channel)
    }

    #[test]
    fn connids_are_never_reused() {
        let table = ConnectionTable::new();
        let (_m1, c1) = add_mock(&table);
        let (_m2, c2) = add_mock(&table);
        let (_m3, c3) = add_mock(&table);
        assert_eq!(
            vec![c1.connid(), c2.connid(), c3.connid()],
            vec![ConnId(1), ConnId(2), ConnId(3)]
        );

        table.remove(c2.as_ref());
        let (_m4, c4) = add_mock(&table);
        assert_eq!(c4.connid(), ConnId(4));
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn find_fails_for_unknown_and_remove_is_idempotent() {
        let table = ConnectionTable::new();
        let (_mock, channel) = add_mock(&table);
        assert!(table.find(channel.connid()).is_ok());
        assert!(table.remove(channel.as_ref()).is_some());
        assert!(table.remove(channel.as_ref()).is_none());
        assert_eq!(
            table.find(channel.connid()).unwrap_err(),
            ConnectionError::NotFound(ConnId(1))
        );
    }

    #[test]
    fn availability_follows_acknowledgement_and_link_loss() {
        let table = ConnectionTable::new();
        let (_m1, c1) = add_mock(&table);
        let (_m2, _c2) = add_mock(&table);
        assert!(!table.find(c1.connid()).unwrap().is_available());

        table.mark_available(c1.connid()).unwrap();
        assert!(table.find(c1.connid()).unwrap().is_available());
        assert_eq!(table.available().len(), 1);

        assert_eq!(table.mark_all_unavailable(), 1);
        assert!(table.available().is_empty());
        assert!(table.mark_available(ConnId(99)).is_err());
    }

    #[test]
    fn sweep_takes_only_stale_unavailable_connections() {
        let table = ConnectionTable::new();
        let (_m1, c1) = add_mock(&table);
        let (_m2, c2) = add_mock(&table);
        table.mark_available(c2.connid()).unwrap();

        assert!(table.sweep_unavailable(Duration::from_secs(3600)).is_empty());

        let swept = table.sweep_unavailable(Duration::ZERO);
        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].connid, c1.connid());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn close_writes_the_error_first() {
        let table = ConnectionTable::new();
        let (mock, channel) = add_mock(&table);
        let conn = table.find(channel.connid()).unwrap();
        assert_eq!(conn.uptime(), Duration::ZERO);
        assert_eq!(conn.idle_time(), Duration::ZERO);

        conn.close(Some("Go away."));
        assert!(mock.is_closed());
        assert_eq!(mock.commands(), vec![Command::error("Go away.")]);

        // Writes after close fail and are only logged.
        conn.write_error("ignored");
        assert_eq!(mock.commands().len(), 1);
    }

    #[test]
    fn dropped_channel_is_reported() {
        let table = ConnectionTable::new();
        let (mock, channel) = add_mock(&table);
        let connid = channel.connid();
        drop(channel);
        drop(mock);
        let conn = table.find(connid).unwrap();
        assert_eq!(
            conn.write(&Command::message("hi")).unwrap_err(),
            ConnectionError::ChannelGone(connid)
        );
    }
}

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

//! Host links: one TCP connection per host, carrying length-delimited frames in both
//! directions. Inbound frames become commands on the dispatcher queue; outbound records are
//! handed to a per-link writer task so the dispatcher never waits on a socket.

use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::{TcpListener, TcpStream};
use tokio::select;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::sync::watch;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};
use twine_common::tasks::{Command, ConnId, LinkId};
use twine_kernel::{DispatcherClient, DispatcherError, Outbound, OutboundError};
use twine_rpc::{FrameError, LinkCodec, LinkFrame};

pub struct LinkRegistry {
    links: Mutex<HashMap<LinkId, UnboundedSender<LinkFrame>>>,
    next_link: AtomicU64,
    closing: watch::Sender<bool>,
}

impl Default for LinkRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkRegistry {
    pub fn new() -> Self {
        let (closing, _) = watch::channel(false);
        Self {
            links: Mutex::new(HashMap::new()),
            next_link: AtomicU64::new(1),
            closing,
        }
    }

    fn register(&self) -> Option<(LinkId, UnboundedReceiver<LinkFrame>)> {
        if *self.closing.borrow() {
            return None;
        }
        let link = LinkId(self.next_link.fetch_add(1, Ordering::SeqCst));
        let (tx, rx) = unbounded_channel();
        self.links.lock().unwrap().insert(link, tx);
        Some((link, rx))
    }

    fn unregister(&self, link: LinkId) -> bool {
        self.links.lock().unwrap().remove(&link).is_some()
    }

    fn closed(&self) -> watch::Receiver<bool> {
        self.closing.subscribe()
    }
}

impl Outbound for LinkRegistry {
    fn send(&self, link: LinkId, connid: ConnId, message: &Command) -> Result<(), OutboundError> {
        let links = self.links.lock().unwrap();
        let Some(sender) = links.get(&link) else {
            return Err(OutboundError::NoSuchLink(link));
        };
        sender
            .send(LinkFrame::command(connid, message))
            .map_err(|_| OutboundError::Closed(link))
    }

    fn links(&self) -> Vec<LinkId> {
        self.links.lock().unwrap().keys().copied().collect()
    }

    fn close_all(&self) {
        self.closing.send_replace(true);
        let dropped: Vec<LinkId> = self.links.lock().unwrap().drain().map(|(l, _)| l).collect();
        info!(links = dropped.len(), "Closing host links");
    }
}

/// Accept host links until the registry is closed.
pub async fn serve(
    listener: TcpListener,
    registry: std::sync::Arc<LinkRegistry>,
    client: DispatcherClient,
) {
    let mut closed = registry.closed();
    loop {
        select! {
            _ = closed.changed() => {
                info!("Link listener closed");
                return;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        let Some((link, outgoing)) = registry.register() else {
                            info!(?peer, "Refusing host link; shutting down");
                            continue;
                        };
                        info!(%link, ?peer, "Accepted host link");
                        tokio::spawn(handle_link(
                            stream,
                            peer,
                            link,
                            outgoing,
                            registry.clone(),
                            client.clone(),
                        ));
                    }
                    Err(e) => {
                        warn!(?e, "Accept failed, can't handle link");
                    }
                }
            }
        }
    }
}

async fn handle_link(
    stream: TcpStream,
    peer: SocketAddr,
    link: LinkId,
    mut outgoing: UnboundedReceiver<LinkFrame>,
    registry: std::sync::Arc<LinkRegistry>,
    client: DispatcherClient,
) {
    let (mut sink, mut frames) = Framed::new(stream, LinkCodec::new()).split();

    let writer = tokio::spawn(async move {
        while let Some(frame) = outgoing.recv().await {
            if let Err(e) = sink.send(frame).await {
                warn!(%link, "Write to host link failed: {e}");
                break;
            }
        }
        if let Err(e) = sink.close().await {
            debug!(%link, "Closing host link: {e}");
        }
    });

    while let Some(frame) = frames.next().await {
        let (connid, command) = match frame.and_then(LinkFrame::into_command) {
            Ok(decoded) => decoded,
            Err(FrameError::Io(e)) => {
                warn!(%link, ?peer, "Host link failed: {e}");
                break;
            }
            Err(e) => {
                warn!(%link, "Dropping bad frame: {e}");
                continue;
            }
        };
        match client.enqueue(command, connid, link) {
            Ok(()) | Err(DispatcherError::ShuttingDown(_)) => {}
            Err(DispatcherError::NotResponding) => {
                warn!(%link, "Dispatcher gone; dropping host link");
                break;
            }
        }
    }

    info!(%link, ?peer, "Host link closed");
    if registry.unregister(link) {
        let disconnect = Command::new("disconnect").with("link", link.0);
        if let Err(e) = client.enqueue_internal(disconnect) {
            debug!(%link, "Not recording link loss: {e}");
        }
    }
    if let Err(e) = writer.await {
        warn!(%link, "Link writer failed: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use twine_db::MemoryStore;
    use twine_kernel::{Config, Dispatcher, ShutdownOutcome, command_table};

    async fn recv(framed: &mut Framed<TcpStream, LinkCodec>) -> (ConnId, Command) {
        tokio::time::timeout(Duration::from_secs(5), framed.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("link closed")
            .unwrap()
            .into_command()
            .unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn player_open_round_trip_and_shutdown() {
        let registry = Arc::new(LinkRegistry::new());
        let config = Config {
            shutdown_grace: Duration::ZERO,
            ..Config::default()
        };
        let (dispatcher, client) = Dispatcher::new(
            Arc::new(config),
            Arc::new(MemoryStore::new()),
            registry.clone(),
            command_table().unwrap(),
        );
        let dispatcher_jh = std::thread::spawn(move || dispatcher.run());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, registry.clone(), client.clone()));

        let stream = TcpStream::connect(addr).await.unwrap();
        let mut host = Framed::new(stream, LinkCodec::new());
        host.send(LinkFrame::command(
            ConnId(3),
            &Command::new("playeropen").with("uid", 30).with("email", "c@x"),
        ))
        .await
        .unwrap();

        let (connid, reply) = recv(&mut host).await;
        assert_eq!(connid, ConnId(3));
        assert_eq!(reply.name(), "playerok");
        assert_eq!(reply.get("connid"), Some(&json!(3)));

        client
            .enqueue_internal(Command::new("shutdownprocess"))
            .unwrap();
        let (connid, notice) = recv(&mut host).await;
        assert_eq!(connid, ConnId::NONE);
        assert_eq!(notice.name(), "messageall");

        let outcome = tokio::task::spawn_blocking(move || dispatcher_jh.join().unwrap())
            .await
            .unwrap();
        assert_eq!(outcome, ShutdownOutcome::Exit);
        assert!(registry.links().is_empty());
        assert!(registry.register().is_none());
    }
}

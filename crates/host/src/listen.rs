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

//! Player-facing TCP listener. Each connection speaks newline-delimited JSON; the first line
//! identifies the player.

use crate::connections::{ChannelError, ClientChannel};
use crate::host::{Host, PlayerIdentity};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::select;
use tokio::sync::mpsc::{UnboundedSender, unbounded_channel};
use tokio::sync::watch;
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, info, warn};
use twine_common::tasks::{Command, ConnId};

/// Lines longer than this are a protocol violation and end the connection. Lines under it but
/// over the message limit get an error reply instead.
const MAX_LINE_LENGTH: usize = 64 * 1024;

enum ChannelFrame {
    Line(String),
    Close,
}

struct TcpChannel {
    connid: ConnId,
    sender: UnboundedSender<ChannelFrame>,
}

impl ClientChannel for TcpChannel {
    fn connid(&self) -> ConnId {
        self.connid
    }

    fn write_line(&self, line: String) -> Result<(), ChannelError> {
        self.sender
            .send(ChannelFrame::Line(line))
            .map_err(|_| ChannelError::Closed)
    }

    fn close(&self) {
        let _ = self.sender.send(ChannelFrame::Close);
    }
}

pub async fn listen(listener: TcpListener, host: Arc<Host>, mut stop: watch::Receiver<bool>) {
    loop {
        select! {
            _ = stop.changed() => {
                info!("Player listener stopped");
                return;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        debug!(?peer, "Accepted player connection");
                        tokio::spawn(handle_player(stream, peer, host.clone()));
                    }
                    Err(e) => {
                        warn!(?e, "Accept failed, can't handle connection");
                    }
                }
            }
        }
    }
}

async fn handle_player(stream: TcpStream, peer: SocketAddr, host: Arc<Host>) {
    let (mut sink, mut lines) =
        Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LENGTH)).split();

    let identity = match lines.next().await {
        Some(Ok(line)) => match serde_json::from_str::<PlayerIdentity>(&line) {
            Ok(identity) => identity,
            Err(e) => {
                warn!(?peer, "Bad identity line: {e}");
                let refusal = Command::error("Expected {uid, email, session} as the first line.");
                let _ = sink.send(refusal.to_string()).await;
                return;
            }
        },
        Some(Err(e)) => {
            warn!(?peer, "Read failed before identity: {e}");
            return;
        }
        None => return,
    };

    let (sender, mut outgoing) = unbounded_channel();
    let connid = host.connections.generate_connid();
    let channel: Arc<dyn ClientChannel> = Arc::new(TcpChannel { connid, sender });

    let mut writer = tokio::spawn(async move {
        while let Some(frame) = outgoing.recv().await {
            match frame {
                ChannelFrame::Line(line) => {
                    if let Err(e) = sink.send(line).await {
                        debug!(%connid, "Write to player failed: {e}");
                        break;
                    }
                }
                ChannelFrame::Close => break,
            }
        }
        let _ = sink.close().await;
    });

    host.open(&channel, &identity);

    loop {
        select! {
            line = lines.next() => {
                match line {
                    Some(Ok(line)) => host.on_message(connid, &line),
                    Some(Err(e)) => {
                        info!(%connid, "Dropping player connection: {e}");
                        break;
                    }
                    None => break,
                }
            }
            _ = &mut writer => break,
        }
    }

    host.on_close(channel.as_ref());
    drop(channel);
    let _ = writer.await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::{Value, json};
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use twine_rpc::LinkFrame;

    async fn read_json(reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>) -> Value {
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        serde_json::from_str(&line).unwrap()
    }

    async fn next_frame(
        rx: &mut tokio::sync::mpsc::UnboundedReceiver<LinkFrame>,
    ) -> (ConnId, Command) {
        rx.recv().await.unwrap().into_command().unwrap()
    }

    #[tokio::test]
    async fn player_round_trip_over_tcp() {
        let host = Arc::new(Host::new(1000));
        let mut engine = host.engine.attach();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = watch::channel(false);
        tokio::spawn(listen(listener, host.clone(), stop_rx));

        let stream = TcpStream::connect(addr).await.unwrap();
        let (read, mut write) = stream.into_split();
        let mut reader = BufReader::new(read);
        write
            .write_all(b"{\"uid\":5,\"email\":\"p@x\",\"session\":\"abc\"}\n")
            .await
            .unwrap();

        let (connid, open) = next_frame(&mut engine).await;
        assert_eq!(connid, ConnId(1));
        assert_eq!(open.name(), "playeropen");

        // Not yet acknowledged.
        write.write_all(b"{\"cmd\":\"look\"}\n").await.unwrap();
        assert_eq!(
            read_json(&mut reader).await,
            json!({"cmd": "error", "text": crate::host::NOT_REGISTERED})
        );

        host.handle_engine_message(connid, Command::new("playerok"));
        write.write_all(b"{\"cmd\":\"look\"}\n").await.unwrap();
        assert_eq!(next_frame(&mut engine).await, (connid, Command::new("look")));

        host.handle_engine_message(connid, Command::message("A room."));
        assert_eq!(
            read_json(&mut reader).await,
            json!({"cmd": "message", "text": "A room."})
        );

        drop(write);
        assert_eq!(
            next_frame(&mut engine).await,
            (connid, Command::new("playerclose"))
        );
        assert!(host.connections.is_empty());
        stop_tx.send(true).unwrap();
    }

    #[tokio::test]
    async fn bad_identity_is_refused() {
        let host = Arc::new(Host::new(1000));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (_stop_tx, stop_rx) = watch::channel(false);
        tokio::spawn(listen(listener, host.clone(), stop_rx));

        let stream = TcpStream::connect(addr).await.unwrap();
        let (read, mut write) = stream.into_split();
        let mut reader = BufReader::new(read);
        write.write_all(b"hello\n").await.unwrap();
        let reply = read_json(&mut reader).await;
        assert_eq!(reply["cmd"], "error");
        assert!(host.connections.is_empty());
    }
}

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

//! The host's single link to the engine. It reconnects on loss, and each new link starts with
//! a `connect` handshake listing every connection the host holds.

use crate::host::Host;
use futures_util::{SinkExt, StreamExt};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::select;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::sync::watch;
use tokio_util::codec::Framed;
use tracing::{debug, error, info, warn};
use twine_common::tasks::{Command, ConnId};
use twine_rpc::{FrameError, LinkCodec, LinkFrame};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineLinkError {
    #[error("engine link is down")]
    Down,
}

/// Write side of the engine link, shared by every player session. Frames go through an
/// unbounded queue to the link's writer task.
#[derive(Default)]
pub struct EngineLink {
    sender: Mutex<Option<UnboundedSender<LinkFrame>>>,
}

impl EngineLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_up(&self) -> bool {
        self.sender
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|s| !s.is_closed())
    }

    pub fn send(&self, connid: ConnId, command: &Command) -> Result<(), EngineLinkError> {
        let sender = self.sender.lock().unwrap();
        let Some(sender) = sender.as_ref() else {
            return Err(EngineLinkError::Down);
        };
        sender
            .send(LinkFrame::command(connid, command))
            .map_err(|_| EngineLinkError::Down)
    }

    /// Start a new link. Anything queued on a previous one is dropped.
    pub fn attach(&self) -> UnboundedReceiver<LinkFrame> {
        let (tx, rx) = unbounded_channel();
        *self.sender.lock().unwrap() = Some(tx);
        rx
    }

    pub fn detach(&self) {
        self.sender.lock().unwrap().take();
    }
}

/// Keep a link to the engine at `address` until `stop` flips.
pub async fn run(
    host: Arc<Host>,
    address: String,
    reconnect_interval: Duration,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        if *stop.borrow() {
            break;
        }
        match TcpStream::connect(&address).await {
            Ok(stream) => {
                info!(%address, "Connected to engine");
                select! {
                    _ = serve(host.clone(), stream) => {}
                    _ = stop.changed() => {
                        host.engine_lost();
                        break;
                    }
                }
                host.engine_lost();
            }
            Err(e) => {
                debug!(%address, "Engine not reachable: {e}");
            }
        }
        select! {
            _ = tokio::time::sleep(reconnect_interval) => {}
            _ = stop.changed() => break,
        }
    }
    info!("Engine link stopped");
}

async fn serve(host: Arc<Host>, stream: TcpStream) {
    let (mut sink, mut frames) = Framed::new(stream, LinkCodec::new()).split();
    let mut outgoing = host.engine_connected();

    let mut writer = tokio::spawn(async move {
        while let Some(frame) = outgoing.recv().await {
            if let Err(e) = sink.send(frame).await {
                warn!("Write to engine failed: {e}");
                break;
            }
        }
        let _ = sink.close().await;
    });

    loop {
        select! {
            frame = frames.next() => {
                match frame {
                    Some(Ok(frame)) => match frame.into_command() {
                        Ok((connid, command)) => host.handle_engine_message(connid, command),
                        Err(e) => warn!("Discarding malformed engine frame: {e}"),
                    },
                    Some(Err(FrameError::Io(e))) => {
                        warn!("Engine link read failed: {e}");
                        break;
                    }
                    Some(Err(e)) => {
                        // The codec cannot resynchronize after a bad length prefix.
                        error!("Engine link framing error: {e}");
                        break;
                    }
                    None => {
                        info!("Engine closed the link");
                        break;
                    }
                }
            }
            _ = &mut writer => {
                break;
            }
        }
    }
    host.engine.detach();
    writer.abort();
}

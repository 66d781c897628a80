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

use ::tracing::info;
use clap::Parser;
use eyre::{Report, eyre};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::select;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::watch;
use twine_common::tracing;
use twine_host::args::Args;
use twine_host::{Host, engine_link, listen};

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<(), Report> {
    color_eyre::install()?;

    let args = Args::parse();
    tracing::init_tracing(args.debug).map_err(|e| eyre!("Unable to configure logging: {}", e))?;

    let config = args.load_config()?;
    info!(?config, "Loaded configuration");

    let mut hup_signal = signal(SignalKind::hangup())?;
    let mut stop_signal = signal(SignalKind::interrupt())?;
    let mut term_signal = signal(SignalKind::terminate())?;

    let host = Arc::new(Host::new(config.max_message_len));
    let (stop, stopped) = watch::channel(false);

    let listener = TcpListener::bind(&config.listen)
        .await
        .map_err(|e| eyre!("Unable to listen on {}: {}", config.listen, e))?;
    info!("Listening for players @ {}", config.listen);

    let listen_loop = tokio::spawn(listen::listen(listener, host.clone(), stopped.clone()));
    let link_loop = tokio::spawn(engine_link::run(
        host.clone(),
        config.engine.clone(),
        config.reconnect_interval(),
        stopped.clone(),
    ));

    let sweep_host = host.clone();
    let timeout = config.unavailable_timeout();
    let mut sweep_stopped = stopped;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(timeout.max(std::time::Duration::from_secs(1)));
        loop {
            select! {
                _ = interval.tick() => {
                    sweep_host.sweep(timeout);
                }
                _ = sweep_stopped.changed() => break,
            }
        }
    });

    info!("Host started.");
    select! {
        _ = hup_signal.recv() => {
            info!("HUP received, stopping...");
        },
        _ = stop_signal.recv() => {
            info!("STOP received, stopping...");
        }
        _ = term_signal.recv() => {
            info!("TERM received, stopping...");
        }
    }
    stop.send_replace(true);
    for connection in host.connections.all() {
        connection.close(None);
    }
    let _ = link_loop.await;
    let _ = listen_loop.await;
    info!("Done.");

    Ok(())
}

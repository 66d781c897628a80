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

use crate::args::Args;
use crate::links::LinkRegistry;
use clap::Parser;
use eyre::{Report, eyre};
use mimalloc::MiMalloc;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use ::tracing::{error, info};
use twine_common::tracing;
use twine_db::{StoreConfig, open_store};
use twine_kernel::{Dispatcher, ShutdownOutcome, command_table};

mod args;
mod links;
mod signals;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

fn main() -> Result<(), Report> {
    color_eyre::install()?;

    let args = Args::parse();
    tracing::init_tracing(args.debug).map_err(|e| eyre!("Unable to configure logging: {}", e))?;

    let config = args.load_config()?;
    info!(?config, "Loaded configuration");

    std::fs::create_dir_all(&args.data_dir)?;
    let store_config = StoreConfig {
        kind: config.store,
        path: args.resolved_db_path(),
    };
    let store = open_store(&store_config)
        .map_err(|e| eyre!("Unable to open property store {:?}: {}", store_config.path, e))?;
    info!(path = ?store_config.path, kind = ?store_config.kind, "Opened property store");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("twine-link")
        .build()?;
    let listener = runtime
        .block_on(TcpListener::bind(&config.listen))
        .map_err(|e| eyre!("Unable to listen on {}: {}", config.listen, e))?;
    info!("Listening for hosts @ {}", config.listen);

    let registry = Arc::new(LinkRegistry::new());
    let (dispatcher, client) = Dispatcher::new(
        Arc::new(config.kernel_config()),
        store.clone(),
        registry.clone(),
        command_table()?,
    );

    // The dispatcher thread:
    let dispatcher_jh = std::thread::Builder::new()
        .name("twine-dispatcher".to_string())
        .spawn(move || dispatcher.run())?;

    signals::spawn_signal_thread(client.clone())?;
    runtime.spawn(links::serve(listener, registry, client));

    let outcome = dispatcher_jh
        .join()
        .map_err(|e| eyre!("Dispatcher thread panicked: {:?}", e))?;

    if let Err(e) = store.sync() {
        error!("Failed to sync property store: {e}");
    }
    runtime.shutdown_timeout(Duration::from_secs(1));

    if outcome == ShutdownOutcome::Restart {
        return restart();
    }
    info!(?outcome, "Done.");
    Ok(())
}

/// Replace this process with a fresh copy of the same binary and arguments.
#[cfg(unix)]
fn restart() -> Result<(), Report> {
    use std::os::unix::process::CommandExt;

    let exe = std::env::current_exe()?;
    info!(?exe, "Restarting");
    let err = std::process::Command::new(&exe)
        .args(std::env::args_os().skip(1))
        .exec();
    Err(eyre!("Unable to re-execute {:?}: {}", exe, err))
}

#[cfg(not(unix))]
fn restart() -> Result<(), Report> {
    Err(eyre!("In-place restart is only supported on unix"))
}

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

use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use std::thread::JoinHandle;
use tracing::{error, info, warn};
use twine_common::tasks::Command;
use twine_kernel::DispatcherClient;

/// What to do about one delivered signal, given whether a shutdown is already underway.
#[derive(Debug, PartialEq)]
enum SignalAction {
    Shutdown(Command),
    ExitNow,
}

fn action_for(signal: i32, shutdown_pending: bool) -> SignalAction {
    if shutdown_pending {
        return SignalAction::ExitNow;
    }
    let command = Command::new("shutdownprocess");
    match signal {
        SIGHUP => SignalAction::Shutdown(command.with("restarting", "autoreload")),
        _ => SignalAction::Shutdown(command),
    }
}

/// Turn process signals into queued shutdown commands. The first interrupt asks for an orderly
/// shutdown; a second one, while that is still pending, exits on the spot.
pub fn spawn_signal_thread(client: DispatcherClient) -> Result<JoinHandle<()>, eyre::Report> {
    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])?;
    let jh = std::thread::Builder::new()
        .name("twine-signals".to_string())
        .spawn(move || {
            let mut shutdown_pending = false;
            for signal in signals.forever() {
                match action_for(signal, shutdown_pending) {
                    SignalAction::ExitNow => {
                        error!(signal, "Second interrupt during shutdown; exiting immediately");
                        std::process::exit(1);
                    }
                    SignalAction::Shutdown(command) => {
                        info!(signal, "Shutdown requested");
                        shutdown_pending = true;
                        if let Err(e) = client.enqueue_urgent(command) {
                            warn!("Could not queue shutdown: {e}");
                        }
                    }
                }
            }
        })?;
    Ok(jh)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_interrupt_queues_shutdown_second_exits() {
        assert_eq!(
            action_for(SIGINT, false),
            SignalAction::Shutdown(Command::new("shutdownprocess"))
        );
        assert_eq!(action_for(SIGTERM, true), SignalAction::ExitNow);
    }

    #[test]
    fn hangup_reloads() {
        let SignalAction::Shutdown(command) = action_for(SIGHUP, false) else {
            panic!("expected a shutdown");
        };
        assert_eq!(command.get_str("restarting"), Some("autoreload"));
    }
}

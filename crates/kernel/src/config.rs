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

//! Config is created by the daemon and handed to the dispatcher, whereupon it is available to
//! every task through the engine state.

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_millis(180_100);
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// How often `checkdisconnected` is queued.
    pub sweep_interval: Duration,
    /// Up to this much random delay is added to every sweep interval.
    pub sweep_jitter: Duration,
    /// Player connections idle for longer than this are dropped by the sweep.
    pub idle_limit: Option<Duration>,
    /// How long to let outbound writes drain before the process exits.
    pub shutdown_grace: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            sweep_jitter: Duration::from_secs(5),
            idle_limit: None,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

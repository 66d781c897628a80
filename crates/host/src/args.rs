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

use clap::builder::ValueHint;
use clap_derive::Parser;
use eyre::eyre;
use figment::Figment;
use figment::providers::{Format as ProviderFormat, Serialized, Yaml};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostConfig {
    /// Where players connect.
    pub listen: String,
    /// The engine daemon's link address.
    pub engine: String,
    pub reconnect_interval_ms: u64,
    /// How long a connection may wait for the engine before we close it.
    pub unavailable_timeout_secs: u64,
    pub max_message_len: usize,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:4000".to_string(),
            engine: "127.0.0.1:4001".to_string(),
            reconnect_interval_ms: 5_000,
            unavailable_timeout_secs: 60,
            max_message_len: 1000,
        }
    }
}

impl HostConfig {
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn unavailable_timeout(&self) -> Duration {
        Duration::from_secs(self.unavailable_timeout_secs)
    }
}

#[derive(Parser, Debug)]
pub struct Args {
    #[arg(
        long,
        value_name = "config",
        help = "Path to configuration (YAML) file to use, if any. If not specified, defaults are used.\
                Configuration file values can be overridden by command line arguments.",
        value_hint = ValueHint::FilePath
    )]
    pub config_file: Option<PathBuf>,

    #[arg(long, value_name = "listen", help = "Player listen address")]
    pub listen: Option<String>,

    #[arg(long, value_name = "engine", help = "Engine daemon link address")]
    pub engine: Option<String>,

    #[arg(
        long,
        value_name = "reconnect-interval-ms",
        help = "Delay between attempts to reach the engine"
    )]
    pub reconnect_interval_ms: Option<u64>,

    #[arg(
        long,
        value_name = "unavailable-timeout-secs",
        help = "Close player connections the engine has not acknowledged within this long"
    )]
    pub unavailable_timeout_secs: Option<u64>,

    #[arg(long, help = "Enable debug logging", default_value = "false")]
    pub debug: bool,
}

impl Args {
    fn merge_config(&self, mut config: HostConfig) -> HostConfig {
        if let Some(listen) = &self.listen {
            config.listen = listen.clone();
        }
        if let Some(engine) = &self.engine {
            config.engine = engine.clone();
        }
        if let Some(ms) = self.reconnect_interval_ms {
            config.reconnect_interval_ms = ms;
        }
        if let Some(secs) = self.unavailable_timeout_secs {
            config.unavailable_timeout_secs = secs;
        }
        config
    }

    pub fn load_config(&self) -> Result<HostConfig, eyre::Report> {
        let config = match &self.config_file {
            Some(config_path) => Figment::new()
                .merge(Serialized::defaults(HostConfig::default()))
                .merge(Yaml::file(config_path))
                .extract::<HostConfig>()
                .map_err(|e| {
                    eyre!(
                        "Failed to parse configuration from {:?}: {}",
                        config_path,
                        e
                    )
                })?,
            None => HostConfig::default(),
        };
        Ok(self.merge_config(config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn defaults() {
        let config = Args::parse_from(["twine-host"]).load_config().unwrap();
        assert_eq!(config.listen, "0.0.0.0:4000");
        assert_eq!(config.max_message_len, 1000);
        assert_eq!(config.unavailable_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn file_then_flags() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "engine: \"10.0.0.2:4001\"").unwrap();
        writeln!(file, "max_message_len: 2000").unwrap();
        writeln!(file, "reconnect_interval_ms: 100").unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let args = Args::parse_from([
            "twine-host",
            "--config-file",
            path.as_str(),
            "--reconnect-interval-ms",
            "250",
        ]);
        let config = args.load_config().unwrap();
        assert_eq!(config.engine, "10.0.0.2:4001");
        assert_eq!(config.max_message_len, 2000);
        assert_eq!(config.reconnect_interval(), Duration::from_millis(250));
    }
}

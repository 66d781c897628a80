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
use clap_derive::{Parser, ValueEnum};
use eyre::eyre;
use figment::Figment;
use figment::providers::{Format as ProviderFormat, Serialized, Yaml};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use twine_db::StoreKind;
use twine_kernel::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum StoreArg {
    Fjall,
    Memory,
}

impl From<StoreArg> for StoreKind {
    fn from(value: StoreArg) -> Self {
        match value {
            StoreArg::Fjall => StoreKind::Fjall,
            StoreArg::Memory => StoreKind::Memory,
        }
    }
}

/// Daemon settings as they appear in the YAML configuration file. Command line flags, where
/// given, win over the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonConfig {
    pub listen: String,
    pub store: StoreKind,
    pub sweep_interval_ms: u64,
    pub sweep_jitter_ms: u64,
    pub idle_limit_secs: Option<u64>,
    pub shutdown_grace_ms: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        let kernel = Config::default();
        Self {
            listen: "127.0.0.1:4001".to_string(),
            store: StoreKind::Fjall,
            sweep_interval_ms: kernel.sweep_interval.as_millis() as u64,
            sweep_jitter_ms: kernel.sweep_jitter.as_millis() as u64,
            idle_limit_secs: kernel.idle_limit.map(|d| d.as_secs()),
            shutdown_grace_ms: kernel.shutdown_grace.as_millis() as u64,
        }
    }
}

impl DaemonConfig {
    pub fn kernel_config(&self) -> Config {
        Config {
            sweep_interval: Duration::from_millis(self.sweep_interval_ms),
            sweep_jitter: Duration::from_millis(self.sweep_jitter_ms),
            idle_limit: self.idle_limit_secs.map(Duration::from_secs),
            shutdown_grace: Duration::from_millis(self.shutdown_grace_ms),
        }
    }
}

#[derive(Parser, Debug, Serialize, Deserialize)]
pub struct Args {
    #[arg(
        value_name = "data-dir",
        help = "Directory to store all database files under",
        value_hint = ValueHint::DirPath,
        default_value = "./twine-data"
    )]
    pub data_dir: PathBuf,

    #[arg(
        long,
        value_name = "db",
        help = "Property store path (relative to data-dir if not absolute)",
        value_hint = ValueHint::FilePath,
        default_value = "props.db"
    )]
    pub db: PathBuf,

    #[arg(
        long,
        value_name = "config",
        help = "Path to configuration (YAML) file to use, if any. If not specified, defaults are used.\
                Configuration file values can be overridden by command line arguments.",
        value_hint = ValueHint::FilePath
    )]
    pub config_file: Option<PathBuf>,

    #[arg(long, value_name = "store", help = "Which property store to use")]
    pub store: Option<StoreArg>,

    #[arg(
        long,
        value_name = "listen",
        help = "Address to accept host links on"
    )]
    pub listen: Option<String>,

    #[arg(
        long,
        value_name = "sweep-interval-ms",
        help = "How often to check for player connections whose host has gone away"
    )]
    pub sweep_interval_ms: Option<u64>,

    #[arg(
        long,
        value_name = "idle-limit-secs",
        help = "Drop player connections idle for longer than this"
    )]
    pub idle_limit_secs: Option<u64>,

    #[arg(
        long,
        value_name = "shutdown-grace-ms",
        help = "How long to let outbound messages drain at shutdown"
    )]
    pub shutdown_grace_ms: Option<u64>,

    #[arg(long, help = "Enable debug logging", default_value = "false")]
    pub debug: bool,
}

impl Args {
    fn merge_config(&self, mut config: DaemonConfig) -> DaemonConfig {
        if let Some(store) = self.store {
            config.store = store.into();
        }
        if let Some(listen) = &self.listen {
            config.listen = listen.clone();
        }
        if let Some(ms) = self.sweep_interval_ms {
            config.sweep_interval_ms = ms;
        }
        if let Some(secs) = self.idle_limit_secs {
            config.idle_limit_secs = Some(secs);
        }
        if let Some(ms) = self.shutdown_grace_ms {
            config.shutdown_grace_ms = ms;
        }
        config
    }

    /// Load the configuration file if we have it, and then merge the arguments into it.
    pub fn load_config(&self) -> Result<DaemonConfig, eyre::Report> {
        let config = match &self.config_file {
            Some(config_path) => Figment::new()
                .merge(Serialized::defaults(DaemonConfig::default()))
                .merge(Yaml::file(config_path))
                .extract::<DaemonConfig>()
                .map_err(|e| {
                    eyre!(
                        "Failed to parse configuration from {:?}: {}",
                        config_path,
                        e
                    )
                })?,
            None => DaemonConfig::default(),
        };
        Ok(self.merge_config(config))
    }

    /// Resolve the property store path relative to data_dir
    pub fn resolved_db_path(&self) -> PathBuf {
        if self.db.is_absolute() {
            self.db.clone()
        } else {
            self.data_dir.join(&self.db)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn defaults_without_a_config_file() {
        let args = Args::parse_from(["twine-daemon"]);
        let config = args.load_config().unwrap();
        assert_eq!(config, DaemonConfig::default());
        assert_eq!(config.kernel_config().sweep_interval, Duration::from_millis(180_100));
        assert_eq!(args.resolved_db_path(), PathBuf::from("./twine-data/props.db"));
    }

    #[test]
    fn flags_override_the_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "listen: \"0.0.0.0:5000\"").unwrap();
        writeln!(file, "store: memory").unwrap();
        writeln!(file, "shutdown_grace_ms: 250").unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let args = Args::parse_from([
            "twine-daemon",
            "--config-file",
            path.as_str(),
            "--listen",
            "127.0.0.1:6000",
            "--idle-limit-secs",
            "600",
        ]);
        let config = args.load_config().unwrap();
        assert_eq!(config.listen, "127.0.0.1:6000");
        assert_eq!(config.store, StoreKind::Memory);
        assert_eq!(config.shutdown_grace_ms, 250);
        assert_eq!(
            config.kernel_config().idle_limit,
            Some(Duration::from_secs(600))
        );
    }
}

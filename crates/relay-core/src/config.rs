// Copyright 2026 Northern.tech AS
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Runtime configuration, loaded from an optional toml file and layered
//! over built-in defaults. Mirrors the shape of a typical daemon config: a
//! flat struct of `Option<T>` fields on disk, resolved against defaults at
//! the edges so the rest of the crate never has to think about absent
//! settings.

use std::{path::Path, time::Duration};

use serde_derive::Deserialize;

/// Default interval at which the terminal relay and file-transfer
/// orchestrator emit liveness pings to the device.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(30);
/// Default span of inactivity after which a session is torn down.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);
/// Default capacity of the broadcast channel backing each bus subject.
pub const DEFAULT_CHANNEL_SIZE: usize = 128;
/// Default chunk size used when streaming file contents in either direction.
pub const DEFAULT_FILE_TRANSFER_BUFFER_SIZE: usize = 4096;

/// On-disk representation of the config file. Every field is optional so a
/// partial file only overrides the settings it mentions.
#[derive(Debug, Deserialize, Default)]
pub struct RawConfig {
    pub ping_interval_secs: Option<u64>,
    pub idle_timeout_secs: Option<u64>,
    pub channel_size: Option<usize>,
    pub file_transfer_ping_interval_secs: Option<u64>,
    pub file_transfer_idle_timeout_secs: Option<u64>,
    pub file_transfer_buffer_size: Option<usize>,
}

/// Resolved configuration used throughout the relay core. Unlike
/// `RawConfig`, every field here has a concrete value.
#[derive(Debug, Clone)]
pub struct Config {
    pub ping_interval: Duration,
    pub idle_timeout: Duration,
    pub channel_size: usize,
    pub file_transfer_ping_interval: Duration,
    pub file_transfer_idle_timeout: Duration,
    pub file_transfer_buffer_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            ping_interval: DEFAULT_PING_INTERVAL,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            channel_size: DEFAULT_CHANNEL_SIZE,
            file_transfer_ping_interval: DEFAULT_PING_INTERVAL,
            file_transfer_idle_timeout: DEFAULT_IDLE_TIMEOUT,
            file_transfer_buffer_size: DEFAULT_FILE_TRANSFER_BUFFER_SIZE,
        }
    }
}

impl From<RawConfig> for Config {
    fn from(raw: RawConfig) -> Self {
        let defaults = Config::default();
        Config {
            ping_interval: raw.ping_interval_secs.map(Duration::from_secs).unwrap_or(defaults.ping_interval),
            idle_timeout: raw.idle_timeout_secs.map(Duration::from_secs).unwrap_or(defaults.idle_timeout),
            channel_size: raw.channel_size.unwrap_or(defaults.channel_size),
            file_transfer_ping_interval: raw
                .file_transfer_ping_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.file_transfer_ping_interval),
            file_transfer_idle_timeout: raw
                .file_transfer_idle_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.file_transfer_idle_timeout),
            file_transfer_buffer_size: raw.file_transfer_buffer_size.unwrap_or(defaults.file_transfer_buffer_size),
        }
    }
}

/// Read and resolve a config file. A missing path is not an error: the
/// relay runs fine on defaults alone, same as the bundled daemon configs
/// this crate was modeled after.
pub fn read_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let raw = match path {
        Some(path) if path.exists() => {
            let contents = std::fs::read_to_string(path)
                .map_err(|e| anyhow::anyhow!("reading config file {:?}: {}", path, e))?;
            toml::from_str(&contents).map_err(|e| anyhow::anyhow!("parsing config file {:?}: {}", path, e))?
        }
        _ => RawConfig::default(),
    };
    Ok(raw.into())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = read_config(Some(Path::new("/nonexistent/path/relay.toml"))).unwrap();
        assert_eq!(cfg.ping_interval, DEFAULT_PING_INTERVAL);
        assert_eq!(cfg.file_transfer_buffer_size, DEFAULT_FILE_TRANSFER_BUFFER_SIZE);
    }

    #[test]
    fn partial_file_overrides_only_named_fields() {
        let raw: RawConfig = toml::from_str("idle_timeout_secs = 120\n").unwrap();
        let cfg: Config = raw.into();
        assert_eq!(cfg.idle_timeout, Duration::from_secs(120));
        assert_eq!(cfg.ping_interval, DEFAULT_PING_INTERVAL);
    }
}

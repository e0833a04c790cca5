/// Run configuration, resolved from environment variables
use std::fmt::Display;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::swarm::SwarmConfig;

/// Configuration for one training run.
///
/// Every field has a default matching the demo deployment and can be
/// overridden through the environment; see [`RunConfig::from_env`].
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Directory holding the four MNIST IDX files (`DATA_DIR`).
    /// When absent, the dataset is downloaded from the hub instead.
    pub data_dir: PathBuf,

    /// Where the trained model is persisted (`SCRATCH_DIR`).
    pub scratch_dir: PathBuf,

    /// Number of training epochs (`MAX_EPOCHS`).
    pub max_epochs: usize,

    /// Training and evaluation batch size (`BATCH_SIZE`).
    pub batch_size: usize,

    /// Log a training line every this many batches (`LOG_EVERY`).
    pub log_every: usize,

    /// AMD GPU index used for VRAM telemetry (`HIP_VISIBLE_DEVICES`).
    pub gpu_index: usize,

    /// Swarm synchronization settings (`SWARM_NODE_ID`, `SWARM_PEERS`,
    /// `MIN_PEERS`, `SYNC_INTERVAL`, `ADAPTIVE_SYNC`, `SYNC_TIMEOUT_SECS`).
    pub swarm: SwarmConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data/mnist"),
            scratch_dir: PathBuf::from("/platform/scratch"),
            max_epochs: 5,
            batch_size: 25000,
            log_every: 100,
            gpu_index: 0,
            swarm: SwarmConfig::default(),
        }
    }
}

impl RunConfig {
    /// Resolve the configuration from the process environment.
    pub fn from_env() -> crate::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve the configuration from an arbitrary variable lookup.
    ///
    /// Unset variables fall back to defaults; malformed values are
    /// configuration errors, never panics.
    pub fn from_lookup<F>(lookup: F) -> crate::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(dir) = lookup("DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("SCRATCH_DIR") {
            config.scratch_dir = PathBuf::from(dir);
        }
        config.max_epochs = parse_or(&lookup, "MAX_EPOCHS", config.max_epochs)?;
        config.batch_size = parse_or(&lookup, "BATCH_SIZE", config.batch_size)?;
        config.log_every = parse_or(&lookup, "LOG_EVERY", config.log_every)?;
        config.gpu_index = parse_or(&lookup, "HIP_VISIBLE_DEVICES", config.gpu_index)?;

        config.swarm.node_id = parse_or(&lookup, "SWARM_NODE_ID", config.swarm.node_id)?;
        if let Some(raw) = lookup("SWARM_PEERS") {
            config.swarm.peers = parse_peers(&raw)?;
        }
        config.swarm.min_peers = parse_or(&lookup, "MIN_PEERS", config.swarm.min_peers)?;
        config.swarm.sync_interval =
            parse_or(&lookup, "SYNC_INTERVAL", config.swarm.sync_interval)?;
        if let Some(raw) = lookup("ADAPTIVE_SYNC") {
            config.swarm.adaptive_sync = parse_bool("ADAPTIVE_SYNC", &raw)?;
        }
        let timeout_secs = parse_or(
            &lookup,
            "SYNC_TIMEOUT_SECS",
            config.swarm.sync_timeout.as_secs(),
        )?;
        config.swarm.sync_timeout = Duration::from_secs(timeout_secs);

        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> crate::Result<()> {
        if self.max_epochs == 0 {
            return Err(crate::SwarmError::Config(
                "MAX_EPOCHS must be > 0".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(crate::SwarmError::Config(
                "BATCH_SIZE must be > 0".to_string(),
            ));
        }
        if self.log_every == 0 {
            return Err(crate::SwarmError::Config(
                "LOG_EVERY must be > 0".to_string(),
            ));
        }
        self.swarm.validate()
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> crate::Result<T>
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|e| {
            crate::SwarmError::Config(format!("{}: invalid value {:?}: {}", key, raw, e))
        }),
        None => Ok(default),
    }
}

fn parse_bool(key: &str, raw: &str) -> crate::Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        _ => Err(crate::SwarmError::Config(format!(
            "{}: invalid value {:?}: expected a boolean",
            key, raw
        ))),
    }
}

/// Parse a comma-separated peer list, e.g. `10.0.0.1:9500,10.0.0.2:9500`.
fn parse_peers(raw: &str) -> crate::Result<Vec<SocketAddr>> {
    let mut peers = Vec::new();
    for part in raw.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let addr = part.parse().map_err(|e| {
            crate::SwarmError::Config(format!("SWARM_PEERS: invalid address {:?}: {}", part, e))
        })?;
        peers.push(addr);
    }
    Ok(peers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = RunConfig::from_lookup(|_| None).unwrap();

        assert_eq!(config.data_dir, PathBuf::from("data/mnist"));
        assert_eq!(config.scratch_dir, PathBuf::from("/platform/scratch"));
        assert_eq!(config.max_epochs, 5);
        assert_eq!(config.batch_size, 25000);
        assert_eq!(config.log_every, 100);
        assert_eq!(config.gpu_index, 0);
        assert_eq!(config.swarm.node_id, 0);
        assert!(config.swarm.peers.is_empty());
        assert_eq!(config.swarm.min_peers, 2);
        assert_eq!(config.swarm.sync_interval, 256);
        assert!(!config.swarm.adaptive_sync);
        assert_eq!(config.swarm.sync_timeout, Duration::from_secs(120));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides() {
        let lookup = lookup_from(&[
            ("DATA_DIR", "/tmp/mnist"),
            ("MAX_EPOCHS", "2"),
            ("BATCH_SIZE", "64"),
            ("SWARM_NODE_ID", "1"),
            ("SWARM_PEERS", "127.0.0.1:9500, 127.0.0.1:9501"),
            ("MIN_PEERS", "2"),
            ("SYNC_INTERVAL", "8"),
            ("ADAPTIVE_SYNC", "true"),
            ("SYNC_TIMEOUT_SECS", "30"),
        ]);
        let config = RunConfig::from_lookup(lookup).unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/tmp/mnist"));
        assert_eq!(config.max_epochs, 2);
        assert_eq!(config.batch_size, 64);
        assert_eq!(config.swarm.node_id, 1);
        assert_eq!(config.swarm.peers.len(), 2);
        assert_eq!(config.swarm.peers[1], "127.0.0.1:9501".parse().unwrap());
        assert_eq!(config.swarm.sync_interval, 8);
        assert!(config.swarm.adaptive_sync);
        assert_eq!(config.swarm.sync_timeout, Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_malformed_number_is_config_error() {
        let lookup = lookup_from(&[("MAX_EPOCHS", "five")]);
        let err = RunConfig::from_lookup(lookup).unwrap_err();
        assert!(matches!(err, crate::SwarmError::Config(_)));
        assert!(err.to_string().contains("MAX_EPOCHS"));
    }

    #[test]
    fn test_malformed_peer_is_config_error() {
        let lookup = lookup_from(&[("SWARM_PEERS", "not-an-address")]);
        let err = RunConfig::from_lookup(lookup).unwrap_err();
        assert!(matches!(err, crate::SwarmError::Config(_)));
        assert!(err.to_string().contains("SWARM_PEERS"));
    }

    #[test]
    fn test_malformed_bool_is_config_error() {
        let lookup = lookup_from(&[("ADAPTIVE_SYNC", "maybe")]);
        let err = RunConfig::from_lookup(lookup).unwrap_err();
        assert!(matches!(err, crate::SwarmError::Config(_)));
    }

    #[test]
    fn test_validate_rejects_zero_epochs() {
        let lookup = lookup_from(&[("MAX_EPOCHS", "0")]);
        let config = RunConfig::from_lookup(lookup).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let lookup = lookup_from(&[("SYNC_INTERVAL", "0")]);
        let config = RunConfig::from_lookup(lookup).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_node_id_outside_peer_list() {
        let lookup = lookup_from(&[
            ("SWARM_PEERS", "127.0.0.1:9500,127.0.0.1:9501"),
            ("SWARM_NODE_ID", "2"),
        ]);
        let config = RunConfig::from_lookup(lookup).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_quorum_larger_than_peer_list() {
        let lookup = lookup_from(&[
            ("SWARM_PEERS", "127.0.0.1:9500,127.0.0.1:9501"),
            ("MIN_PEERS", "3"),
        ]);
        let config = RunConfig::from_lookup(lookup).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_peer_list_entries_are_skipped() {
        let lookup = lookup_from(&[("SWARM_PEERS", "127.0.0.1:9500, ,")]);
        let config = RunConfig::from_lookup(lookup).unwrap();
        assert_eq!(config.swarm.peers.len(), 1);
    }
}

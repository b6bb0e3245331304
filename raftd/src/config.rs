//! Cluster configuration: JSON on disk, merged over sane defaults.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

fn default_heartbeat_interval() -> f64 {
    0.05
}

fn default_election_timeout_min() -> f64 {
    0.15
}

fn default_election_timeout_max() -> f64 {
    0.30
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from("./data")
}

/// The on-disk shape of a cluster config file. Every field is optional; missing fields fall
/// back to the defaults below, mirroring the source's `merge_config_with_base`.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cluster: BTreeMap<String, (String, u16)>,
    pub heartbeat_interval: f64,
    pub election_timeout_min: f64,
    pub election_timeout_max: f64,
    pub storage_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cluster: BTreeMap::new(),
            heartbeat_interval: default_heartbeat_interval(),
            election_timeout_min: default_election_timeout_min(),
            election_timeout_max: default_election_timeout_max(),
            storage_dir: default_storage_dir(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|err| anyhow::anyhow!("reading config {}: {}", path.display(), err))?;
        let config: Config = serde_json::from_str(&text)
            .map_err(|err| anyhow::anyhow!("parsing config {}: {}", path.display(), err))?;

        let size = config.cluster.len();
        if size < 3 || size % 2 == 0 {
            tracing::warn!(cluster_size = size, "cluster size should be an odd number >= 3 for a healthy quorum");
        }

        Ok(config)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs_f64(self.heartbeat_interval)
    }

    pub fn timers(&self) -> raft::TimerConfig {
        raft::TimerConfig {
            election_timeout_min: Duration::from_secs_f64(self.election_timeout_min),
            election_timeout_max: Duration::from_secs_f64(self.election_timeout_max),
            heartbeat_interval: self.heartbeat_interval(),
        }
    }

    pub fn addr_of(&self, node_id: &str) -> Option<SocketAddr> {
        let (host, port) = self.cluster.get(node_id)?;
        format!("{}:{}", host, port).parse().ok()
    }
}

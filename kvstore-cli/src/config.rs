//! Cluster config loading: a YAML mapping with a `servers` list.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

/// The cluster's membership list. An address's index in `servers` is its
/// permanent node id.
#[derive(Debug, Deserialize)]
pub struct ClusterConfig {
    pub servers: Vec<String>,
}

impl ClusterConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read cluster config {}", path.display()))?;
        let config: ClusterConfig = serde_yaml::from_str(&text)
            .with_context(|| format!("failed to parse cluster config {}", path.display()))?;
        Ok(config)
    }

    /// The node id of `address` — its position in `servers` — or an error
    /// if `address` isn't a configured member.
    pub fn node_id_of(&self, address: &str) -> Result<i64> {
        self.servers
            .iter()
            .position(|entry| entry == address)
            .map(|index| index as i64)
            .with_context(|| format!("{address} is not an entry of the cluster's servers list"))
    }

    /// The membership list as `(node_id, address)` pairs, `self_id` excluded.
    pub fn peers_excluding(&self, self_id: i64) -> std::collections::HashMap<i64, String> {
        self.servers
            .iter()
            .enumerate()
            .filter(|(index, _)| *index as i64 != self_id)
            .map(|(index, address)| (index as i64, address.clone()))
            .collect()
    }

    /// The full membership list as `(node_id, address)` pairs, in
    /// declaration order — what [`kvstore_client::Client`] needs.
    pub fn all_peers(&self) -> Vec<(i64, String)> {
        self.servers.iter().cloned().enumerate().map(|(index, address)| (index as i64, address)).collect()
    }
}

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use consensus::DEFAULT_DEDUP_WINDOW;
use crypto::{Ed25519Signer, Signer};
use p2p::P2pConfig;
use serde::Deserialize;
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::catalogue::NodeRole;
use crate::interaction::DEFAULT_INTERACTION_TIMEOUT;

/// Runtime configuration for an attestation node.
#[derive(Clone, Debug)]
pub struct NodeConfig {
    pub role: NodeRole,
    /// File holding the hex encoded signing seed. A throwaway key is used
    /// when unset.
    pub key_file: Option<PathBuf>,
    pub p2p: P2pConfig,
    pub interaction_timeout: Duration,
    pub bridge_queue_capacity: usize,
    /// Most queued witnesses handed over in one interaction.
    pub bridge_handoff_batch: usize,
    pub consensus_batch_size: usize,
    /// Recent content ids remembered to drop duplicate submissions.
    pub consensus_dedup_window: usize,
    pub consensus_flush_interval: Duration,
}

impl NodeConfig {
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = Self::default();
        let candidate = path.map(PathBuf::from).unwrap_or_else(default_config_path);
        if !candidate.exists() {
            if let Some(explicit) = path {
                info!(path = %explicit.display(), "configuration file not found, using defaults");
            }
            return Ok(config);
        }

        let contents = fs::read_to_string(&candidate)
            .with_context(|| format!("failed to read config at {}", candidate.display()))?;
        let raw: RawNodeConfig = toml::from_str(&contents)
            .with_context(|| format!("failed to parse config at {}", candidate.display()))?;

        if let Some(role) = raw.role {
            config.role = role;
        }
        if let Some(key_file) = raw.key_file {
            config.key_file = Some(key_file);
        }
        if let Some(secs) = raw.interaction_timeout_secs {
            config.interaction_timeout = Duration::from_secs(secs);
        }
        if let Some(p2p) = raw.p2p {
            if let Some(listen) = p2p.listen {
                config.p2p.listen = Some(listen);
            }
            if p2p.dial_only == Some(true) {
                config.p2p.listen = None;
            }
            if let Some(seeds) = p2p.seeds {
                config.p2p.seeds = seeds;
            }
            if let Some(max) = p2p.max_message_size {
                config.p2p.max_message_size = max;
            }
            if let Some(depth) = p2p.queue_depth {
                config.p2p.queue_depth = depth;
            }
            if let Some(secs) = p2p.handshake_timeout_secs {
                config.p2p.handshake_timeout = Duration::from_secs(secs);
            }
            if let Some(ms) = p2p.dial_interval_ms {
                config.p2p.dial_interval = Duration::from_millis(ms);
            }
            if let Some(secs) = p2p.find_timeout_secs {
                config.p2p.find_timeout = Some(Duration::from_secs(secs));
            }
        }
        if let Some(bridge) = raw.bridge {
            if let Some(capacity) = bridge.queue_capacity {
                config.bridge_queue_capacity = capacity;
            }
            if let Some(batch) = bridge.handoff_batch {
                config.bridge_handoff_batch = batch;
            }
        }
        if let Some(consensus) = raw.consensus {
            if let Some(size) = consensus.batch_size {
                config.consensus_batch_size = size;
            }
            if let Some(window) = consensus.dedup_window {
                config.consensus_dedup_window = window;
            }
            if let Some(secs) = consensus.flush_interval_secs {
                config.consensus_flush_interval = Duration::from_secs(secs);
            }
        }

        info!(path = %candidate.display(), role = %config.role, "loaded configuration overrides");
        Ok(config)
    }

    /// Signing key from `key_file`, or a fresh one when no file is set.
    pub fn load_signer(&self) -> anyhow::Result<Arc<dyn Signer>> {
        let Some(path) = &self.key_file else {
            warn!("no key file configured, using an ephemeral signing key");
            return Ok(Arc::new(Ed25519Signer::generate()));
        };
        let seed = Zeroizing::new(
            fs::read_to_string(path)
                .with_context(|| format!("failed to read key file {}", path.display()))?,
        );
        let signer = Ed25519Signer::from_hex(&seed)
            .with_context(|| format!("invalid signing seed in {}", path.display()))?;
        Ok(Arc::new(signer))
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            role: NodeRole::Sentinel,
            key_file: None,
            p2p: P2pConfig::default(),
            interaction_timeout: DEFAULT_INTERACTION_TIMEOUT,
            bridge_queue_capacity: 4_096,
            bridge_handoff_batch: 64,
            consensus_batch_size: 100,
            consensus_dedup_window: DEFAULT_DEDUP_WINDOW,
            consensus_flush_interval: Duration::from_secs(10),
        }
    }
}

fn default_config_path() -> PathBuf {
    PathBuf::from("node.toml")
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawNodeConfig {
    role: Option<NodeRole>,
    key_file: Option<PathBuf>,
    interaction_timeout_secs: Option<u64>,
    p2p: Option<RawP2pConfig>,
    bridge: Option<RawBridgeConfig>,
    consensus: Option<RawConsensusConfig>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawP2pConfig {
    listen: Option<SocketAddr>,
    dial_only: Option<bool>,
    seeds: Option<Vec<SocketAddr>>,
    max_message_size: Option<usize>,
    queue_depth: Option<usize>,
    handshake_timeout_secs: Option<u64>,
    dial_interval_ms: Option<u64>,
    find_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawBridgeConfig {
    queue_capacity: Option<usize>,
    handoff_batch: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawConsensusConfig {
    batch_size: Option<usize>,
    dedup_window: Option<usize>,
    flush_interval_secs: Option<u64>,
}

use crate::core::{RewardSchedule, BLOCK_VERSION, HALVING_INTERVAL, INITIAL_BLOCK_REWARD, MAX_HALVINGS};
use crate::error::{BlockchainError, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

static DEFAULT_DATA_DIR: &str = "data/ledger";

const DATA_DIR_KEY: &str = "LEDGER_DATA_DIR";
const TARGET_BITS_KEY: &str = "LEDGER_TARGET_BITS";
const MINING_KEY_KEY: &str = "LEDGER_MINING_KEY";

/// Consensus parameters every node on a network must share
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainParams {
    /// Required leading zero bits of a block hash
    pub target_bits: u32,
    pub initial_reward: u64,
    pub halving_interval: u64,
    pub max_halvings: u64,
    pub block_version: u32,
}

impl Default for ChainParams {
    fn default() -> Self {
        ChainParams {
            target_bits: 16,
            initial_reward: INITIAL_BLOCK_REWARD,
            halving_interval: HALVING_INTERVAL,
            max_halvings: MAX_HALVINGS,
            block_version: BLOCK_VERSION,
        }
    }
}

impl ChainParams {
    pub fn reward_schedule(&self) -> RewardSchedule {
        RewardSchedule {
            initial_reward: self.initial_reward,
            halving_interval: self.halving_interval,
            max_halvings: self.max_halvings,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MinerConfig {
    /// Pool transactions per block, excluding the coinbase
    pub max_transactions: usize,
    /// Hex public-key hash the coinbase pays; mining is disabled when unset
    pub reward_pub_key_hash: Option<String>,
    /// Nonces tried before the timestamp is refreshed
    pub max_nonce: u64,
}

impl Default for MinerConfig {
    fn default() -> Self {
        MinerConfig {
            max_transactions: 100,
            reward_pub_key_hash: None,
            max_nonce: u32::MAX as u64,
        }
    }
}

impl MinerConfig {
    pub fn reward_pub_key_hash(&self) -> Result<Vec<u8>> {
        let encoded = self.reward_pub_key_hash.as_deref().ok_or_else(|| {
            BlockchainError::Config(format!("No mining key configured (set {MINING_KEY_KEY})"))
        })?;
        hex::decode(encoded)
            .map_err(|e| BlockchainError::Config(format!("Invalid mining key {encoded}: {e}")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Upper bound on a single request to a peer
    pub peer_timeout_ms: u64,
    /// How long a sync waits for the gate before giving up
    pub sync_lock_deadline_ms: u64,
    /// Concurrent sync sessions
    pub sync_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            peer_timeout_ms: 5_000,
            sync_lock_deadline_ms: 10_000,
            sync_capacity: 1,
        }
    }
}

impl SyncConfig {
    pub fn peer_timeout(&self) -> Duration {
        Duration::from_millis(self.peer_timeout_ms)
    }

    pub fn sync_lock_deadline(&self) -> Duration {
        Duration::from_millis(self.sync_lock_deadline_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub data_dir: PathBuf,
    pub chain: ChainParams,
    pub miner: MinerConfig,
    pub sync: SyncConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            chain: ChainParams::default(),
            miner: MinerConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Defaults, then the TOML file (if given), then environment overrides
    pub fn load(path: Option<&Path>) -> Result<NodeConfig> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => NodeConfig::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<NodeConfig> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            BlockchainError::Config(format!("Failed to read {}: {e}", path.display()))
        })?;
        let config = Self::from_toml(&text)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<NodeConfig> {
        Ok(toml::from_str(text)?)
    }

    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(dir) = env::var(DATA_DIR_KEY) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Ok(bits) = env::var(TARGET_BITS_KEY) {
            self.chain.target_bits = bits.parse().map_err(|e| {
                BlockchainError::Config(format!("Invalid {TARGET_BITS_KEY} {bits:?}: {e}"))
            })?;
        }
        if let Ok(key) = env::var(MINING_KEY_KEY) {
            self.miner.reward_pub_key_hash = Some(key);
        }
        self.check()
    }

    fn check(&self) -> Result<()> {
        if self.chain.target_bits > crate::core::MAX_TARGET_BITS {
            return Err(BlockchainError::Config(format!(
                "target_bits {} exceeds {}",
                self.chain.target_bits,
                crate::core::MAX_TARGET_BITS
            )));
        }
        if self.sync.sync_capacity == 0 {
            return Err(BlockchainError::Config(
                "sync_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

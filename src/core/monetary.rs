//! Block reward schedule
//!
//! The coinbase of the block at `height` may mint `reward(height)` plus the
//! fees of the transactions it confirms. The reward halves every
//! `halving_interval` blocks and is exactly zero once the number of halvings
//! reaches `max_halvings`, which also keeps the right shift in range.

/// Number of base units in one coin
pub const SATOSHIS_PER_COIN: u64 = 100_000_000;

/// Initial block reward in base units (50 coins)
pub const INITIAL_BLOCK_REWARD: u64 = 50 * SATOSHIS_PER_COIN;

pub const HALVING_INTERVAL: u64 = 210_000;

pub const MAX_HALVINGS: u64 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RewardSchedule {
    pub initial_reward: u64,
    pub halving_interval: u64,
    pub max_halvings: u64,
}

impl Default for RewardSchedule {
    fn default() -> Self {
        RewardSchedule {
            initial_reward: INITIAL_BLOCK_REWARD,
            halving_interval: HALVING_INTERVAL,
            max_halvings: MAX_HALVINGS,
        }
    }
}

impl RewardSchedule {
    pub fn reward(&self, height: u64) -> u64 {
        let halvings = if self.halving_interval == 0 {
            0
        } else {
            height / self.halving_interval
        };
        if halvings >= self.max_halvings || halvings >= u64::BITS as u64 {
            return 0;
        }
        self.initial_reward >> halvings
    }
}

use crate::config::MinerConfig;
use crate::core::{
    Block, BlockHeader, Blockchain, ChainEvent, EventKind, MerkleTree, Observer, PowOutcome,
    ProofOfWork, Transaction,
};
use crate::error::{BlockchainError, Result};
use crate::utils::current_timestamp;
use log::{debug, info};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MineOutcome {
    Mined(Block),
    /// The chain moved on or shutdown was requested before a block was found
    Cancelled,
}

/// Tracks the attempt in flight and cancels it when the chain advances
#[derive(Default)]
struct AttemptWatch {
    current: Mutex<Option<CancellationToken>>,
    // Height the in-flight attempt is building
    target_height: AtomicU64,
}

impl AttemptWatch {
    fn begin(&self, token: CancellationToken, height: u64) -> Result<()> {
        self.target_height.store(height, Ordering::SeqCst);
        *self.current.lock()? = Some(token);
        Ok(())
    }

    fn end(&self) -> Result<()> {
        *self.current.lock()? = None;
        Ok(())
    }

    fn height(&self) -> Result<Option<u64>> {
        Ok(self
            .current
            .lock()?
            .as_ref()
            .map(|_| self.target_height.load(Ordering::SeqCst)))
    }

    fn cancel_current(&self) -> Result<()> {
        if let Some(token) = self.current.lock()?.as_ref() {
            token.cancel();
        }
        Ok(())
    }
}

impl Observer for AttemptWatch {
    fn name(&self) -> &str {
        "miner"
    }

    fn on_event(&self, event: &ChainEvent) -> Result<()> {
        if let ChainEvent::BlockAdded(block) = event {
            if block.get_height() >= self.target_height.load(Ordering::SeqCst) {
                debug!(
                    "Block {} reached height {}, abandoning current attempt",
                    block.get_hash(),
                    block.get_height()
                );
                self.cancel_current()?;
            }
        }
        Ok(())
    }
}

/// Assembles candidate blocks from the pool and searches for proof of work
pub struct Miner {
    chain: Arc<Blockchain>,
    pow: ProofOfWork,
    max_transactions: usize,
    reward_pub_key_hash: Vec<u8>,
    watch: Arc<AttemptWatch>,
    // One attempt in flight at a time
    attempt: Mutex<()>,
}

impl Miner {
    pub fn new(chain: Arc<Blockchain>, config: &MinerConfig) -> Result<Miner> {
        let reward_pub_key_hash = config.reward_pub_key_hash()?;
        Self::with_reward_key(chain, config, reward_pub_key_hash)
    }

    pub fn with_reward_key(
        chain: Arc<Blockchain>,
        config: &MinerConfig,
        reward_pub_key_hash: Vec<u8>,
    ) -> Result<Miner> {
        let watch = Arc::new(AttemptWatch::default());
        chain.subscribe(EventKind::BlockAdded, watch.clone())?;
        let pow = ProofOfWork::new(chain.validator().get_hasher().clone())
            .with_max_nonce(config.max_nonce);
        Ok(Miner {
            chain,
            pow,
            max_transactions: config.max_transactions,
            reward_pub_key_hash,
            watch,
            attempt: Mutex::new(()),
        })
    }

    /// Abandon the attempt in flight, if any
    pub fn cancel_current(&self) -> Result<()> {
        self.watch.cancel_current()
    }

    /// Height the attempt in flight is building, if any
    pub fn attempt_height(&self) -> Result<Option<u64>> {
        self.watch.height()
    }

    pub fn mine_once(&self) -> Result<MineOutcome> {
        self.mine_with(&CancellationToken::new())
    }

    /// One attempt on top of the current tip. Cancelling `parent` (or the
    /// chain advancing from elsewhere) ends the attempt with
    /// [`MineOutcome::Cancelled`].
    pub fn mine_with(&self, parent: &CancellationToken) -> Result<MineOutcome> {
        let _attempt = self
            .attempt
            .try_lock()
            .map_err(|_| BlockchainError::Mining("an attempt is already running".to_string()))?;

        let token = parent.child_token();
        let tip = self.chain.tip()?;
        self.watch.begin(token.clone(), tip.height)?;
        let result = self.assemble_and_solve(&token);
        self.watch.end()?;
        result
    }

    fn assemble_and_solve(&self, token: &CancellationToken) -> Result<MineOutcome> {
        let tip = self.chain.tip()?;
        let params = self.chain.params();
        let hasher = self.chain.validator().get_hasher().clone();

        let (selected, fees) = self
            .chain
            .mempool()
            .retrieve_transactions(self.max_transactions)?;
        let reward = params
            .reward_schedule()
            .reward(tip.height)
            .saturating_add(fees);
        let coinbase = Transaction::new_coinbase(
            tip.height,
            reward,
            &self.reward_pub_key_hash,
            hasher.as_ref(),
        )?;

        let mut transactions = Vec::with_capacity(selected.len() + 1);
        transactions.push(coinbase);
        transactions.extend(selected);
        let ids: Vec<Vec<u8>> = transactions.iter().map(|t| t.get_id().to_vec()).collect();
        let merkle_root = MerkleTree::calculate_merkle_root(&ids, hasher.as_ref())?;

        let mut header = BlockHeader::new(
            params.block_version,
            tip.last_hash.clone(),
            merkle_root,
            tip.height,
            current_timestamp()?,
            params.target_bits,
        );

        loop {
            match self.pow.search(&header, token)? {
                PowOutcome::Solved { nonce, .. } => {
                    header.set_nonce(nonce);
                    break;
                }
                PowOutcome::Exhausted => {
                    let timestamp = current_timestamp()?.max(header.get_timestamp() + 1);
                    debug!(
                        "Nonce space exhausted at height {}, retrying with timestamp {timestamp}",
                        tip.height
                    );
                    header.set_timestamp(timestamp);
                }
                PowOutcome::Cancelled => return Ok(MineOutcome::Cancelled),
            }
        }

        let block = Block::new(header, transactions, hasher.as_ref());
        if token.is_cancelled() {
            return Ok(MineOutcome::Cancelled);
        }
        match self.chain.add_block(block.clone()) {
            Ok(()) => {
                info!(
                    "Mined block {} at height {} paying {reward}",
                    block.get_hash(),
                    block.get_height()
                );
                Ok(MineOutcome::Mined(block))
            }
            // Another block won the height between the search and submission
            Err(_) if self.chain.height() != tip.height => Ok(MineOutcome::Cancelled),
            Err(e) => Err(e),
        }
    }

    /// Mine on a blocking worker until `shutdown` fires or `limit` blocks
    /// have been mined. Returns the number mined.
    pub async fn run(
        self: Arc<Self>,
        shutdown: CancellationToken,
        limit: Option<u64>,
    ) -> Result<u64> {
        let mut mined = 0u64;
        while !shutdown.is_cancelled() && limit.map_or(true, |limit| mined < limit) {
            let miner = self.clone();
            let parent = shutdown.clone();
            let outcome = tokio::task::spawn_blocking(move || miner.mine_with(&parent))
                .await
                .map_err(|e| BlockchainError::Mining(format!("mining worker failed: {e}")))??;
            match outcome {
                MineOutcome::Mined(_) => mined += 1,
                MineOutcome::Cancelled => debug!("Mining attempt cancelled"),
            }
        }
        info!("Miner stopped after {mined} blocks");
        Ok(mined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChainParams, SyncConfig};
    use crate::storage::MemoryStorage;

    fn chain() -> Arc<Blockchain> {
        let params = ChainParams {
            target_bits: 4,
            ..ChainParams::default()
        };
        Arc::new(
            Blockchain::open(Arc::new(MemoryStorage::new()), &params, &SyncConfig::default())
                .unwrap(),
        )
    }

    fn miner(chain: Arc<Blockchain>) -> Miner {
        Miner::with_reward_key(chain, &MinerConfig::default(), b"miner".to_vec()).unwrap()
    }

    #[test]
    fn test_mine_once_extends_chain() {
        let chain = chain();
        let miner = miner(chain.clone());
        for expected in 1..=3 {
            match miner.mine_once().unwrap() {
                MineOutcome::Mined(block) => assert_eq!(block.get_height(), expected - 1),
                MineOutcome::Cancelled => panic!("attempt should not be cancelled"),
            }
            assert_eq!(chain.height(), expected);
        }
        assert_eq!(
            chain.utxo_set().total_value(),
            3 * chain.params().reward_schedule().reward(0)
        );
    }

    #[test]
    fn test_cancelled_parent_yields_cancelled() {
        let chain = chain();
        let miner = miner(chain.clone());
        let parent = CancellationToken::new();
        parent.cancel();
        assert_eq!(miner.mine_with(&parent).unwrap(), MineOutcome::Cancelled);
        assert_eq!(chain.height(), 0);
    }

    #[test]
    fn test_block_from_elsewhere_cancels_attempt() {
        let chain = chain();
        let watch = AttemptWatch::default();
        let token = CancellationToken::new();
        watch.begin(token.clone(), 0).unwrap();

        let other = miner(chain.clone());
        let block = match other.mine_once().unwrap() {
            MineOutcome::Mined(block) => block,
            MineOutcome::Cancelled => panic!("attempt should not be cancelled"),
        };
        watch
            .on_event(&ChainEvent::BlockAdded(Arc::new(block)))
            .unwrap();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_run_stops_at_limit() {
        let chain = chain();
        let miner = Arc::new(miner(chain.clone()));
        let mined = miner.run(CancellationToken::new(), Some(2)).await.unwrap();
        assert_eq!(mined, 2);
        assert_eq!(chain.height(), 2);
    }
}

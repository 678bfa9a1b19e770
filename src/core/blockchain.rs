// The chain state machine: owns the tip, admits blocks and transactions,
// rebuilds itself from storage on startup and catches up with peers.
// The UTXO set, mempool and body writer hang off the event bus and see every
// accepted block in commit order.

use crate::config::{ChainParams, SyncConfig};
use crate::core::validation::{ChainTip, ValidationError, Validator};
use crate::core::{Block, BlockHeader, ChainEvent, EventBus, EventKind, Observer, Transaction};
use crate::error::{BlockchainError, Result};
use crate::network::{request, request_cancellable, PeerClient, SyncGate};
use crate::storage::{BlockBodyWriter, MemoryPool, Storage, UTXOSet};
use crate::utils::{EcdsaP256, Hasher, Sha256Hasher, SignatureScheme};
use data_encoding::HEXLOWER;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainStatus {
    Uninitialized,
    Reconstructing,
    Ready,
    Syncing,
}

struct ChainState {
    // Empty until the genesis block is accepted
    last_hash: String,
    // Count of accepted blocks
    height: u64,
    headers: HashMap<String, BlockHeader>,
    status: ChainStatus,
    // Sync sessions holding the chain in Syncing
    active_syncs: usize,
}

/// Walks persisted headers from a starting hash back to genesis
pub struct HeaderIterator<'a> {
    storage: &'a dyn Storage,
    next_hash: Option<String>,
}

impl<'a> HeaderIterator<'a> {
    pub fn new(storage: &'a dyn Storage, from: String) -> HeaderIterator<'a> {
        HeaderIterator {
            storage,
            next_hash: Some(from),
        }
    }
}

impl Iterator for HeaderIterator<'_> {
    type Item = Result<(String, BlockHeader)>;

    fn next(&mut self) -> Option<Self::Item> {
        let hash = self.next_hash.take()?;
        match self.storage.header(&hash) {
            Ok(header) => {
                if !header.is_genesis() {
                    self.next_hash = Some(header.get_pre_block_hash().to_string());
                }
                Some(Ok((hash, header)))
            }
            Err(e) => Some(Err(e)),
        }
    }
}

pub struct Blockchain {
    storage: Arc<dyn Storage>,
    state: RwLock<ChainState>,
    utxos: Arc<UTXOSet>,
    mempool: Arc<MemoryPool>,
    events: Arc<EventBus>,
    validator: Validator,
    // Serializes block and transaction admission
    admission: Mutex<()>,
    sync_gate: SyncGate,
    peer_timeout: Duration,
    params: ChainParams,
}

impl Blockchain {
    /// Open a chain over `storage` with SHA-256 and ECDSA P-256, rebuilding
    /// state from whatever the store already holds.
    pub fn open(
        storage: Arc<dyn Storage>,
        params: &ChainParams,
        sync: &SyncConfig,
    ) -> Result<Blockchain> {
        Self::open_with(
            storage,
            params,
            sync,
            Arc::new(Sha256Hasher),
            Arc::new(EcdsaP256),
        )
    }

    pub fn open_with(
        storage: Arc<dyn Storage>,
        params: &ChainParams,
        sync: &SyncConfig,
        hasher: Arc<dyn Hasher>,
        signatures: Arc<dyn SignatureScheme>,
    ) -> Result<Blockchain> {
        let chain = Self::new(storage, params, sync, hasher, signatures)?;
        chain.reconstruct_state()?;
        Ok(chain)
    }

    fn new(
        storage: Arc<dyn Storage>,
        params: &ChainParams,
        sync: &SyncConfig,
        hasher: Arc<dyn Hasher>,
        signatures: Arc<dyn SignatureScheme>,
    ) -> Result<Blockchain> {
        let utxos = Arc::new(UTXOSet::new());
        let mempool = Arc::new(MemoryPool::new());
        let events = Arc::new(EventBus::new());

        // Registration order is delivery order
        events.subscribe(EventKind::BlockAdded, utxos.clone())?;
        events.subscribe(EventKind::BlockAdded, mempool.clone())?;
        events.subscribe(
            EventKind::BlockAdded,
            Arc::new(BlockBodyWriter::new(storage.clone())),
        )?;

        Ok(Blockchain {
            storage,
            state: RwLock::new(ChainState {
                last_hash: String::new(),
                height: 0,
                headers: HashMap::new(),
                status: ChainStatus::Uninitialized,
                active_syncs: 0,
            }),
            utxos,
            mempool,
            events,
            validator: Validator::new(
                hasher,
                signatures,
                params.target_bits,
                params.reward_schedule(),
            ),
            admission: Mutex::new(()),
            sync_gate: SyncGate::new(sync.sync_capacity, sync.sync_lock_deadline()),
            peer_timeout: sync.peer_timeout(),
            params: params.clone(),
        })
    }

    fn set_status(&self, status: ChainStatus) -> Result<()> {
        self.state.write()?.status = status;
        Ok(())
    }

    fn ensure_admitting(&self) -> Result<()> {
        match self.status() {
            ChainStatus::Ready | ChainStatus::Syncing => Ok(()),
            other => Err(BlockchainError::Consistency(format!(
                "chain is {other:?} and cannot admit data"
            ))),
        }
    }

    /// Rebuild the in-memory state from storage: walk headers back from the
    /// last committed one to genesis, then replay every body forward into an
    /// empty UTXO set. If a committed header has no body, the tip stops at
    /// the last block that replays; a later sync fetches the rest.
    pub fn reconstruct_state(&self) -> Result<()> {
        let _admission = self.admission.lock()?;
        self.set_status(ChainStatus::Reconstructing)?;
        match self.rebuild() {
            Ok(()) => self.set_status(ChainStatus::Ready),
            Err(e) => {
                self.set_status(ChainStatus::Uninitialized)?;
                Err(e)
            }
        }
    }

    fn rebuild(&self) -> Result<()> {
        self.utxos.reset()?;

        let last_hash = match self.storage.last_block_hash() {
            Ok(hash) => hash,
            Err(e) if e.is_not_found() => {
                let mut state = self.state.write()?;
                state.last_hash = String::new();
                state.height = 0;
                state.headers.clear();
                info!("No chain in storage, starting empty");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let mut chain = HeaderIterator::new(self.storage.as_ref(), last_hash)
            .collect::<Result<Vec<_>>>()?;
        chain.reverse();

        for (expected, (hash, header)) in chain.iter().enumerate() {
            if header.get_height() != expected as u64 {
                return Err(BlockchainError::Consistency(format!(
                    "header {hash} has height {} but sits at position {expected}",
                    header.get_height()
                )));
            }
        }

        let mut headers = HashMap::new();
        let mut tip = String::new();
        for (hash, header) in &chain {
            let block = match self.storage.block(hash) {
                Ok(block) => block,
                Err(e) if e.is_not_found() => break,
                Err(e) => return Err(e),
            };
            self.utxos.add_block(&block)?;
            headers.insert(hash.clone(), header.clone());
            tip = hash.clone();
        }

        let replayed = headers.len();
        if replayed < chain.len() {
            let missing: Vec<&str> = chain[replayed..].iter().map(|(h, _)| h.as_str()).collect();
            warn!(
                "Headers committed without bodies, tip truncated to height {replayed}: {}",
                missing.join(", ")
            );
        }

        let mut state = self.state.write()?;
        state.last_hash = tip;
        state.height = replayed as u64;
        state.headers = headers;
        info!(
            "Reconstructed chain at height {} with {} unspent outputs",
            state.height,
            self.utxos.len()
        );
        Ok(())
    }

    /// Validate, commit the header, advance the tip, then notify observers
    pub fn add_block(&self, block: Block) -> Result<()> {
        let _admission = self.admission.lock()?;
        self.ensure_admitting()?;
        let tip = self.tip()?;

        let fees = match self.validator.validate_block(&block, &tip, &self.utxos) {
            Ok(fees) => fees,
            Err(e) => {
                warn!("Rejected block {}: {e}", block.get_hash());
                return Err(e);
            }
        };

        let hash = block.get_hash().to_string();
        self.storage
            .persist_header(&hash, block.get_header())
            .map_err(|e| match e {
                BlockchainError::Database(msg) => BlockchainError::Database(format!(
                    "committing block {hash} at height {}: {msg}",
                    block.get_height()
                )),
                other => other,
            })?;

        {
            let mut state = self.state.write()?;
            state.last_hash = hash.clone();
            state.height += 1;
            state.headers.insert(hash.clone(), block.get_header().clone());
        }
        info!(
            "Added block {hash} at height {} ({} transactions, {fees} in fees)",
            block.get_height(),
            block.get_transactions().len()
        );

        let failures = self.events.publish(&ChainEvent::BlockAdded(Arc::new(block)));
        if failures > 0 {
            warn!("{failures} observers failed to process block {hash}");
        }
        Ok(())
    }

    /// Validate and pool a transaction. Returns its fee.
    pub fn add_transaction(&self, tx: Transaction) -> Result<u64> {
        let _admission = self.admission.lock()?;
        self.ensure_admitting()?;

        if self.mempool.contains(tx.get_id()) {
            return Err(ValidationError::DuplicateTransaction {
                txid: tx.get_id_hex(),
            }
            .into());
        }

        let fee = match self.validator.validate_transaction(&tx, &self.utxos) {
            Ok(fee) => fee,
            Err(e) => {
                warn!("Rejected transaction {}: {e}", tx.get_id_hex());
                return Err(e);
            }
        };

        self.mempool.append_transaction(tx.clone(), fee)?;
        debug!("Pooled transaction {} with fee {fee}", tx.get_id_hex());
        self.events.publish(&ChainEvent::TransactionAdded(Arc::new(tx)));
        Ok(fee)
    }

    /// Catch up with `peer`. Returns the number of blocks added.
    ///
    /// Headers at or below the local tip are skipped. The first header,
    /// block or admission failure aborts the session; blocks already added
    /// stay.
    pub async fn sync_with_peer(
        &self,
        peer: &dyn PeerClient,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let _permit = self.sync_gate.acquire(cancel).await?;
        self.ensure_admitting()?;
        let _syncing = SyncingGuard::enter(self)?;

        let peer_tip = match request_cancellable(
            self.peer_timeout,
            cancel,
            peer.id(),
            "last header",
            peer.last_header(),
        )
        .await
        {
            Ok(header) => header,
            Err(e) if e.is_not_found() => {
                debug!("Peer {} has an empty chain; nothing to fetch", peer.id());
                return Ok(0);
            }
            Err(e) => return Err(e),
        };
        let local_height = self.height();
        if local_height > peer_tip.get_height() {
            debug!(
                "Peer {} is at height {}, local chain at {local_height}; nothing to fetch",
                peer.id(),
                peer_tip.get_height()
            );
            return Ok(0);
        }

        let mut headers = request_cancellable(
            self.peer_timeout,
            cancel,
            peer.id(),
            "headers",
            peer.headers(),
        )
        .await?;
        headers.sort_by_key(BlockHeader::get_height);

        let hasher = self.validator.get_hasher().clone();
        let mut added = 0;
        for header in headers
            .into_iter()
            .filter(|h| h.get_height() >= local_height)
        {
            if cancel.is_cancelled() {
                return Err(BlockchainError::Cancelled(format!(
                    "sync with {} stopped after {added} blocks",
                    peer.id()
                )));
            }

            self.validator.validate_header(&header, &self.tip()?)?;
            let hash = header.hash(hasher.as_ref());
            let block = request_cancellable(
                self.peer_timeout,
                cancel,
                peer.id(),
                "block",
                peer.block(&hash),
            )
            .await?;
            if block.get_hash() != hash || *block.get_header() != header {
                return Err(BlockchainError::Network(format!(
                    "peer {} served block {} for header {hash}",
                    peer.id(),
                    block.get_hash()
                )));
            }
            self.add_block(block)?;
            added += 1;
        }

        info!(
            "Synced {added} blocks from peer {}, now at height {}",
            peer.id(),
            self.height()
        );
        Ok(added)
    }

    /// Start a background sync with a newly discovered peer
    pub fn on_peer_discovered(
        self: &Arc<Self>,
        peer: Arc<dyn PeerClient>,
        cancel: CancellationToken,
    ) -> JoinHandle<Result<usize>> {
        let chain = self.clone();
        tokio::spawn(async move {
            let result = chain.sync_with_peer(peer.as_ref(), &cancel).await;
            if let Err(e) = &result {
                warn!("Sync with peer {} failed: {e}", peer.id());
            }
            result
        })
    }

    /// A peer announced a header: validate it against the tip, fetch the
    /// body and admit it. Returns `false` if the header is already known.
    pub async fn on_header_announced(
        &self,
        peer: &dyn PeerClient,
        header: BlockHeader,
    ) -> Result<bool> {
        let hash = header.hash(self.validator.get_hasher().as_ref());
        if self.header(&hash).is_some() {
            return Ok(false);
        }

        self.validator.validate_header(&header, &self.tip()?)?;
        let block = request(self.peer_timeout, peer.id(), "block", peer.block(&hash)).await?;
        if block.get_hash() != hash {
            return Err(BlockchainError::Network(format!(
                "peer {} served block {} for announced {hash}",
                peer.id(),
                block.get_hash()
            )));
        }
        self.add_block(block)?;
        Ok(true)
    }

    /// A peer announced a transaction id: fetch it unless already pooled
    pub async fn on_transaction_announced(
        &self,
        peer: &dyn PeerClient,
        txid: &[u8],
    ) -> Result<bool> {
        if self.mempool.contains(txid) {
            return Ok(false);
        }

        let tx = request(
            self.peer_timeout,
            peer.id(),
            "transaction",
            peer.transaction(txid),
        )
        .await?;
        if tx.get_id() != txid {
            return Err(BlockchainError::Network(format!(
                "peer {} served transaction {} for {}",
                peer.id(),
                tx.get_id_hex(),
                HEXLOWER.encode(txid)
            )));
        }
        self.add_transaction(tx)?;
        Ok(true)
    }

    pub fn subscribe(&self, kind: EventKind, observer: Arc<dyn Observer>) -> Result<()> {
        self.events.subscribe(kind, observer)
    }

    pub fn tip(&self) -> Result<ChainTip> {
        let state = self.state.read()?;
        Ok(ChainTip {
            last_hash: state.last_hash.clone(),
            height: state.height,
        })
    }

    pub fn height(&self) -> u64 {
        self.state.read().map(|state| state.height).unwrap_or(0)
    }

    /// `None` until a block is accepted
    pub fn last_block_hash(&self) -> Option<String> {
        self.state
            .read()
            .ok()
            .map(|state| state.last_hash.clone())
            .filter(|hash| !hash.is_empty())
    }

    pub fn last_header(&self) -> Result<BlockHeader> {
        let hash = self
            .last_block_hash()
            .ok_or_else(|| BlockchainError::NotFound("last header".to_string()))?;
        self.header(&hash)
            .ok_or_else(|| BlockchainError::NotFound(format!("header {hash}")))
    }

    pub fn status(&self) -> ChainStatus {
        self.state
            .read()
            .map(|state| state.status)
            .unwrap_or(ChainStatus::Uninitialized)
    }

    /// Accepted headers in height order
    pub fn headers(&self) -> Result<Vec<BlockHeader>> {
        let state = self.state.read()?;
        let mut headers: Vec<BlockHeader> = state.headers.values().cloned().collect();
        headers.sort_by_key(BlockHeader::get_height);
        Ok(headers)
    }

    pub fn header(&self, hash: &str) -> Option<BlockHeader> {
        self.state
            .read()
            .ok()
            .and_then(|state| state.headers.get(hash).cloned())
    }

    /// Body of an accepted block
    pub fn block(&self, hash: &str) -> Result<Block> {
        if self.header(hash).is_none() {
            return Err(BlockchainError::NotFound(format!("block {hash}")));
        }
        self.storage.block(hash)
    }

    pub fn pool_transaction(&self, txid: &[u8]) -> Option<Transaction> {
        self.mempool.get(txid).map(|entry| entry.transaction)
    }

    pub fn utxo_set(&self) -> &Arc<UTXOSet> {
        &self.utxos
    }

    pub fn mempool(&self) -> &Arc<MemoryPool> {
        &self.mempool
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }
}

// Holds the chain in Syncing while any sync session is alive
struct SyncingGuard<'a> {
    chain: &'a Blockchain,
}

impl<'a> SyncingGuard<'a> {
    fn enter(chain: &'a Blockchain) -> Result<SyncingGuard<'a>> {
        let mut state = chain.state.write()?;
        state.active_syncs += 1;
        state.status = ChainStatus::Syncing;
        Ok(SyncingGuard { chain })
    }
}

impl Drop for SyncingGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut state) = self.chain.state.write() {
            state.active_syncs = state.active_syncs.saturating_sub(1);
            if state.active_syncs == 0 && state.status == ChainStatus::Syncing {
                state.status = ChainStatus::Ready;
            }
        }
    }
}

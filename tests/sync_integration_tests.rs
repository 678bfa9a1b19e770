//! Peer sync integration tests
//!
//! Nodes are wired together in-process through `LocalPeer`.

use async_trait::async_trait;
use ledger_core::config::{ChainParams, MinerConfig, SyncConfig};
use ledger_core::core::{
    Block, BlockHeader, Blockchain, ChainStatus, EventKind, MineOutcome, Miner, TXOutput,
    Transaction,
};
use ledger_core::error::{BlockchainError, Result};
use ledger_core::network::{
    Announcement, AnnouncingObserver, ChannelAnnouncer, LocalPeer, PeerClient, Peers,
};
use ledger_core::storage::{MemoryStorage, Storage};
use ledger_core::utils::{hash_pub_key, new_key_pair, public_key_from_pkcs8, Sha256Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn params() -> ChainParams {
    ChainParams {
        target_bits: 6,
        ..ChainParams::default()
    }
}

fn sync_config() -> SyncConfig {
    SyncConfig {
        peer_timeout_ms: 500,
        sync_lock_deadline_ms: 500,
        sync_capacity: 1,
    }
}

fn node_on(storage: Arc<dyn Storage>) -> Arc<Blockchain> {
    Arc::new(Blockchain::open(storage, &params(), &sync_config()).unwrap())
}

fn node() -> Arc<Blockchain> {
    node_on(Arc::new(MemoryStorage::new()))
}

fn mine_blocks(chain: &Arc<Blockchain>, count: usize, pub_key_hash: &[u8]) -> Vec<Block> {
    let miner =
        Miner::with_reward_key(chain.clone(), &MinerConfig::default(), pub_key_hash.to_vec())
            .unwrap();
    (0..count)
        .map(|_| match miner.mine_once().unwrap() {
            MineOutcome::Mined(block) => block,
            MineOutcome::Cancelled => panic!("nothing should cancel this attempt"),
        })
        .collect()
}

#[tokio::test]
async fn test_sync_catches_up_with_peer() {
    let a = node();
    let b = node();
    let blocks = mine_blocks(&a, 3, b"miner");

    let peer = LocalPeer::new("a", a.clone());
    let added = b
        .sync_with_peer(&peer, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(added, 3);
    assert_eq!(b.height(), 3);
    assert_eq!(b.last_block_hash().as_deref(), Some(blocks[2].get_hash()));
    assert_eq!(b.utxo_set().total_value(), a.utxo_set().total_value());
    assert_eq!(b.status(), ChainStatus::Ready);
}

#[tokio::test]
async fn test_sync_only_fetches_missing_suffix() {
    let a = node();
    let b = node();
    let peer = LocalPeer::new("a", a.clone());

    mine_blocks(&a, 2, b"miner");
    b.sync_with_peer(&peer, &CancellationToken::new())
        .await
        .unwrap();
    mine_blocks(&a, 2, b"miner");

    let added = b
        .sync_with_peer(&peer, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(added, 2);
    assert_eq!(b.height(), 4);
}

#[tokio::test]
async fn test_sync_with_shorter_peer_is_noop() {
    let a = node();
    let b = node();
    mine_blocks(&a, 1, b"miner");
    mine_blocks(&b, 3, b"miner");

    let added = b
        .sync_with_peer(&LocalPeer::new("a", a.clone()), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(added, 0);
    assert_eq!(b.height(), 3);
}

/// Serves the genesis block whatever hash is asked for
struct LyingPeer {
    inner: LocalPeer,
    genesis: Block,
}

#[async_trait]
impl PeerClient for LyingPeer {
    fn id(&self) -> &str {
        "liar"
    }

    async fn last_header(&self) -> Result<BlockHeader> {
        self.inner.last_header().await
    }

    async fn headers(&self) -> Result<Vec<BlockHeader>> {
        self.inner.headers().await
    }

    async fn block(&self, _hash: &str) -> Result<Block> {
        Ok(self.genesis.clone())
    }

    async fn transaction(&self, txid: &[u8]) -> Result<Transaction> {
        self.inner.transaction(txid).await
    }
}

#[tokio::test]
async fn test_mismatched_block_aborts_at_height_reached() {
    let a = node();
    let b = node();
    let blocks = mine_blocks(&a, 3, b"miner");
    let liar = LyingPeer {
        inner: LocalPeer::new("a", a.clone()),
        genesis: blocks[0].clone(),
    };

    let err = b
        .sync_with_peer(&liar, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, BlockchainError::Network(_)));
    // Genesis matched its header and stays
    assert_eq!(b.height(), 1);
    assert_eq!(b.status(), ChainStatus::Ready);
}

/// Never answers
struct SilentPeer;

#[async_trait]
impl PeerClient for SilentPeer {
    fn id(&self) -> &str {
        "silent"
    }

    async fn last_header(&self) -> Result<BlockHeader> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Err(BlockchainError::Network("unreachable".to_string()))
    }

    async fn headers(&self) -> Result<Vec<BlockHeader>> {
        Ok(vec![])
    }

    async fn block(&self, hash: &str) -> Result<Block> {
        Err(BlockchainError::NotFound(hash.to_string()))
    }

    async fn transaction(&self, _txid: &[u8]) -> Result<Transaction> {
        Err(BlockchainError::NotFound("tx".to_string()))
    }
}

#[tokio::test]
async fn test_unresponsive_peer_times_out() {
    let b = node();
    let err = b
        .sync_with_peer(&SilentPeer, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, BlockchainError::Timeout(_)));
    assert_eq!(b.height(), 0);
}

#[tokio::test]
async fn test_cancel_interrupts_pending_peer_request() {
    let b = node();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let started = std::time::Instant::now();
    let err = b.sync_with_peer(&SilentPeer, &cancel).await.unwrap_err();
    assert!(err.is_cancelled());
    assert!(started.elapsed() < Duration::from_millis(400));
    assert_eq!(b.status(), ChainStatus::Ready);
}

#[tokio::test]
async fn test_sync_with_empty_peer_adds_nothing() {
    let a = node();
    let b = node();
    let added = b
        .sync_with_peer(&LocalPeer::new("a", a), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(added, 0);
    assert_eq!(b.height(), 0);
    assert_eq!(b.status(), ChainStatus::Ready);
}

#[tokio::test]
async fn test_cancelled_sync_does_not_start() {
    let a = node();
    mine_blocks(&a, 1, b"miner");
    let b = node();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = b
        .sync_with_peer(&LocalPeer::new("a", a), &cancel)
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(b.height(), 0);
}

#[tokio::test]
async fn test_missing_body_is_refetched_by_sync() {
    let a = node();
    let blocks = mine_blocks(&a, 3, b"miner");

    // Two complete blocks plus a committed header whose body never landed
    let storage = Arc::new(MemoryStorage::new());
    for block in &blocks[..2] {
        storage
            .persist_header(block.get_hash(), block.get_header())
            .unwrap();
        storage.persist_block(block).unwrap();
    }
    storage
        .persist_header(blocks[2].get_hash(), blocks[2].get_header())
        .unwrap();

    let b = node_on(storage.clone());
    assert_eq!(b.height(), 2);

    let added = b
        .sync_with_peer(&LocalPeer::new("a", a), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(added, 1);
    assert_eq!(b.height(), 3);
    assert_eq!(storage.block(blocks[2].get_hash()).unwrap(), blocks[2]);
}

#[tokio::test]
async fn test_discovered_peer_triggers_background_sync() {
    let a = node();
    mine_blocks(&a, 2, b"miner");
    let b = node();
    let peers = Peers::new();
    let peer: Arc<dyn PeerClient> = Arc::new(LocalPeer::new("a", a));

    assert!(peers.add_peer(peer.clone()).unwrap());
    assert!(!peers.add_peer(peer.clone()).unwrap());
    let handle = b.on_peer_discovered(peer, CancellationToken::new());
    assert_eq!(handle.await.unwrap().unwrap(), 2);
    assert_eq!(b.height(), 2);
}

#[tokio::test]
async fn test_announced_header_is_fetched_once() {
    let a = node();
    let b = node();
    let peer = LocalPeer::new("a", a.clone());
    let (announcer, mut relay) = ChannelAnnouncer::new();
    a.subscribe(
        EventKind::BlockAdded,
        Arc::new(AnnouncingObserver::new(Arc::new(announcer))),
    )
    .unwrap();

    mine_blocks(&a, 1, b"miner");
    let header = match relay.recv().await.unwrap() {
        Announcement::Block { header, .. } => header,
        other => panic!("unexpected announcement {other:?}"),
    };

    assert!(b.on_header_announced(&peer, header.clone()).await.unwrap());
    assert!(!b.on_header_announced(&peer, header).await.unwrap());
    assert_eq!(b.height(), 1);
}

#[tokio::test]
async fn test_announced_transaction_is_pooled() {
    let a = node();
    let b = node();
    let pkcs8 = new_key_pair().unwrap();
    let pkh = hash_pub_key(&public_key_from_pkcs8(&pkcs8).unwrap());
    mine_blocks(&a, 1, &pkh);
    let peer = LocalPeer::new("a", a.clone());
    b.sync_with_peer(&peer, &CancellationToken::new())
        .await
        .unwrap();

    let genesis = a.block(&a.last_block_hash().unwrap()).unwrap();
    let funding = &genesis.get_transactions()[0];
    let mut tx = Transaction::new_unsigned(
        &[(funding.get_id().to_vec(), 0)],
        vec![TXOutput::new(10, b"bob")],
    );
    tx.sign(&pkcs8, &Sha256Hasher).unwrap();
    a.add_transaction(tx.clone()).unwrap();

    assert!(b.on_transaction_announced(&peer, tx.get_id()).await.unwrap());
    assert!(!b.on_transaction_announced(&peer, tx.get_id()).await.unwrap());
    assert_eq!(b.pool_transaction(tx.get_id()), Some(tx));
}

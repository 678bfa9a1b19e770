//! Peer-facing plumbing
//!
//! Transport is out of scope: a peer is anything that can answer the
//! [`PeerClient`] requests. [`LocalPeer`] serves another in-process chain,
//! which is how nodes are wired together in tests. Outbound fan-out goes
//! through an [`Announcer`].

pub mod announcer;
pub mod local_peer;
pub mod peers;
pub mod sync_gate;

pub use announcer::{Announcement, AnnouncingObserver, Announcer, ChannelAnnouncer};
pub use local_peer::LocalPeer;
pub use peers::Peers;
pub use sync_gate::SyncGate;

use crate::core::{Block, BlockHeader, Transaction};
use crate::error::{BlockchainError, Result};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Request/response view of a remote node
#[async_trait]
pub trait PeerClient: Send + Sync {
    fn id(&self) -> &str;

    async fn last_header(&self) -> Result<BlockHeader>;

    /// Every header the peer holds, in any order
    async fn headers(&self) -> Result<Vec<BlockHeader>>;

    async fn block(&self, hash: &str) -> Result<Block>;

    async fn transaction(&self, txid: &[u8]) -> Result<Transaction>;
}

/// Bound a peer request by `limit`. Only the caller fails on expiry.
pub async fn request<T, F>(limit: Duration, peer: &str, what: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(|e| match e {
            BlockchainError::Network(msg) => {
                BlockchainError::Network(format!("peer {peer}: {what}: {msg}"))
            }
            other => other,
        }),
        Err(_) => Err(BlockchainError::Timeout(format!(
            "peer {peer} did not answer {what} within {}ms",
            limit.as_millis()
        ))),
    }
}

/// [`request`] that also gives up as soon as `cancel` fires
pub async fn request_cancellable<T, F>(
    limit: Duration,
    cancel: &CancellationToken,
    peer: &str,
    what: &str,
    fut: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(BlockchainError::Cancelled(format!(
            "{what} request to peer {peer} cancelled"
        ))),
        res = request(limit, peer, what, fut) => res,
    }
}

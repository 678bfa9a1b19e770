use crate::core::{BlockHeader, ChainEvent, Observer};
use crate::error::{BlockchainError, Result};
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

/// Outbound fan-out of newly admitted data
pub trait Announcer: Send + Sync {
    fn announce_block(&self, header: &BlockHeader, hash: &str) -> Result<()>;

    fn announce_transaction(&self, txid: &[u8]) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Announcement {
    Block { header: BlockHeader, hash: String },
    Transaction { txid: Vec<u8> },
}

/// Queues announcements for an async relay task to pick up
pub struct ChannelAnnouncer {
    sender: UnboundedSender<Announcement>,
}

impl ChannelAnnouncer {
    pub fn new() -> (ChannelAnnouncer, UnboundedReceiver<Announcement>) {
        let (sender, receiver) = unbounded_channel();
        (ChannelAnnouncer { sender }, receiver)
    }

    fn send(&self, announcement: Announcement) -> Result<()> {
        self.sender
            .send(announcement)
            .map_err(|_| BlockchainError::Network("announcement relay has shut down".to_string()))
    }
}

impl Announcer for ChannelAnnouncer {
    fn announce_block(&self, header: &BlockHeader, hash: &str) -> Result<()> {
        self.send(Announcement::Block {
            header: header.clone(),
            hash: hash.to_string(),
        })
    }

    fn announce_transaction(&self, txid: &[u8]) -> Result<()> {
        self.send(Announcement::Transaction {
            txid: txid.to_vec(),
        })
    }
}

/// Bridges chain events to an [`Announcer`]
pub struct AnnouncingObserver {
    announcer: Arc<dyn Announcer>,
}

impl AnnouncingObserver {
    pub fn new(announcer: Arc<dyn Announcer>) -> AnnouncingObserver {
        AnnouncingObserver { announcer }
    }
}

impl Observer for AnnouncingObserver {
    fn name(&self) -> &str {
        "announcer"
    }

    fn on_event(&self, event: &ChainEvent) -> Result<()> {
        match event {
            ChainEvent::BlockAdded(block) => self
                .announcer
                .announce_block(block.get_header(), block.get_hash()),
            ChainEvent::TransactionAdded(tx) => self.announcer.announce_transaction(tx.get_id()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Transaction;
    use crate::utils::Sha256Hasher;

    #[test]
    fn test_observer_forwards_transactions() {
        let (announcer, mut receiver) = ChannelAnnouncer::new();
        let observer = AnnouncingObserver::new(Arc::new(announcer));
        let tx = Transaction::new_coinbase(0, 5, b"k", &Sha256Hasher).unwrap();

        observer
            .on_event(&ChainEvent::TransactionAdded(Arc::new(tx.clone())))
            .unwrap();
        assert_eq!(
            receiver.try_recv().unwrap(),
            Announcement::Transaction {
                txid: tx.get_id().to_vec()
            }
        );
    }

    #[test]
    fn test_closed_relay_is_network_error() {
        let (announcer, receiver) = ChannelAnnouncer::new();
        drop(receiver);
        let err = announcer.announce_transaction(b"id").unwrap_err();
        assert!(matches!(err, BlockchainError::Network(_)));
    }
}

//! Publish/subscribe registry for chain events
//!
//! The chain publishes `BlockAdded` once a block's header is committed and
//! `TransactionAdded` once a transaction enters the pool. Delivery is
//! synchronous and in commit order, but isolated: an observer that returns an
//! error or panics is logged and the remaining observers still run.

use crate::core::{Block, Transaction};
use crate::error::Result;
use log::error;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    BlockAdded,
    TransactionAdded,
}

#[derive(Debug, Clone)]
pub enum ChainEvent {
    BlockAdded(Arc<Block>),
    TransactionAdded(Arc<Transaction>),
}

impl ChainEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ChainEvent::BlockAdded(_) => EventKind::BlockAdded,
            ChainEvent::TransactionAdded(_) => EventKind::TransactionAdded,
        }
    }
}

pub trait Observer: Send + Sync {
    /// Used in log lines when delivery fails
    fn name(&self) -> &str;

    fn on_event(&self, event: &ChainEvent) -> Result<()>;
}

#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<HashMap<EventKind, Vec<Arc<dyn Observer>>>>,
}

impl EventBus {
    pub fn new() -> EventBus {
        EventBus::default()
    }

    pub fn subscribe(&self, kind: EventKind, observer: Arc<dyn Observer>) -> Result<()> {
        let mut subscribers = self.subscribers.write()?;
        subscribers.entry(kind).or_default().push(observer);
        Ok(())
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.subscribers
            .read()
            .map(|s| s.get(&kind).map(Vec::len).unwrap_or(0))
            .unwrap_or(0)
    }

    /// Deliver `event` to every subscriber of its kind. Returns the number of
    /// observers that failed.
    pub fn publish(&self, event: &ChainEvent) -> usize {
        // Snapshot so an observer may subscribe others without deadlocking
        let observers: Vec<Arc<dyn Observer>> = match self.subscribers.read() {
            Ok(subscribers) => subscribers.get(&event.kind()).cloned().unwrap_or_default(),
            Err(e) => {
                error!("Event bus registry poisoned, dropping {:?}: {e}", event.kind());
                return 0;
            }
        };

        let mut failures = 0;
        for observer in observers {
            match catch_unwind(AssertUnwindSafe(|| observer.on_event(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    failures += 1;
                    error!(
                        "Observer '{}' failed on {:?}: {e}",
                        observer.name(),
                        event.kind()
                    );
                }
                Err(_) => {
                    failures += 1;
                    error!(
                        "Observer '{}' panicked on {:?}",
                        observer.name(),
                        event.kind()
                    );
                }
            }
        }
        failures
    }
}

use crate::error::{BlockchainError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

/// Counting gate in front of sync sessions. Acquisition is bounded by a
/// deadline and can be cancelled.
#[derive(Clone)]
pub struct SyncGate {
    semaphore: Arc<Semaphore>,
    deadline: Duration,
}

impl SyncGate {
    pub fn new(capacity: usize, deadline: Duration) -> SyncGate {
        SyncGate {
            semaphore: Arc::new(Semaphore::new(capacity)),
            deadline,
        }
    }

    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<OwnedSemaphorePermit> {
        let acquire = tokio::time::timeout(self.deadline, self.semaphore.clone().acquire_owned());
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                Err(BlockchainError::Cancelled("sync cancelled while waiting for the gate".to_string()))
            }
            res = acquire => match res {
                Ok(Ok(permit)) => Ok(permit),
                Ok(Err(_)) => Err(BlockchainError::Consistency("sync gate closed".to_string())),
                Err(_) => Err(BlockchainError::Timeout(format!(
                    "sync gate not acquired within {}ms",
                    self.deadline.as_millis()
                ))),
            },
        }
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

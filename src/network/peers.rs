use crate::error::Result;
use crate::network::PeerClient;
use std::sync::{Arc, RwLock};

/// Known peers, deduplicated by id
#[derive(Default)]
pub struct Peers {
    inner: RwLock<Vec<Arc<dyn PeerClient>>>,
}

impl Peers {
    pub fn new() -> Peers {
        Peers::default()
    }

    /// Returns `false` if a peer with the same id is already known
    pub fn add_peer(&self, peer: Arc<dyn PeerClient>) -> Result<bool> {
        let mut inner = self.inner.write()?;
        if inner.iter().any(|p| p.id() == peer.id()) {
            return Ok(false);
        }
        inner.push(peer);
        Ok(true)
    }

    pub fn evict_peer(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.write()?;
        if let Some(idx) = inner.iter().position(|p| p.id() == id) {
            inner.remove(idx);
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn PeerClient>> {
        self.inner
            .read()
            .ok()
            .and_then(|inner| inner.iter().find(|p| p.id() == id).cloned())
    }

    pub fn get_peers(&self) -> Vec<Arc<dyn PeerClient>> {
        self.inner
            .read()
            .map(|inner| inner.to_vec())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|inner| inner.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

use crate::core::{Block, ChainEvent, Observer, Transaction};
use crate::error::Result;
use data_encoding::HEXLOWER;
use log::{debug, error};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

#[derive(Debug, Clone)]
pub struct MempoolEntry {
    pub transaction: Transaction,
    pub fee: u64,
    // Insertion order, breaks fee ties
    sequence: u64,
}

#[derive(Default)]
struct PoolInner {
    // Sorted by fee descending, then insertion order
    entries: Vec<MempoolEntry>,
    // Consumed outpoint key -> txids (hex) of pool transactions spending it
    spent_index: HashMap<String, Vec<String>>,
    next_sequence: u64,
}

impl PoolInner {
    fn position(&self, txid_hex: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.transaction.get_id_hex() == txid_hex)
    }

    fn remove_transaction(&mut self, txid_hex: &str) -> Option<MempoolEntry> {
        let idx = self.position(txid_hex)?;
        let entry = self.entries.remove(idx);
        for vin in entry.transaction.get_vin() {
            let key = vin.outpoint_key();
            if let Some(spenders) = self.spent_index.get_mut(&key) {
                spenders.retain(|id| id != txid_hex);
                if spenders.is_empty() {
                    self.spent_index.remove(&key);
                }
            }
        }
        Some(entry)
    }
}

/// Unconfirmed transactions ranked by fee.
///
/// Conflicting transactions (spending the same output) may sit in the pool
/// together; [`MemoryPool::retrieve_transactions`] picks at most one of them
/// and block confirmation evicts the rest.
#[derive(Default)]
pub struct MemoryPool {
    inner: Mutex<PoolInner>,
}

impl MemoryPool {
    pub fn new() -> MemoryPool {
        MemoryPool::default()
    }

    /// Returns `false` when a transaction with the same id is already pooled
    pub fn append_transaction(&self, tx: Transaction, fee: u64) -> Result<bool> {
        let mut pool = self.inner.lock()?;
        let txid_hex = tx.get_id_hex();
        if pool.position(&txid_hex).is_some() {
            return Ok(false);
        }

        for vin in tx.get_vin() {
            pool.spent_index
                .entry(vin.outpoint_key())
                .or_default()
                .push(txid_hex.clone());
        }

        let sequence = pool.next_sequence;
        pool.next_sequence += 1;
        pool.entries.push(MempoolEntry {
            transaction: tx,
            fee,
            sequence,
        });
        pool.entries
            .sort_by(|a, b| b.fee.cmp(&a.fee).then(a.sequence.cmp(&b.sequence)));
        Ok(true)
    }

    /// Greedy, fee-ordered selection of up to `max_count` transactions with
    /// pairwise-disjoint inputs. Nothing is removed from the pool.
    pub fn retrieve_transactions(&self, max_count: usize) -> Result<(Vec<Transaction>, u64)> {
        let pool = self.inner.lock()?;
        let mut selected = Vec::new();
        let mut total_fee = 0u64;
        let mut consumed: HashSet<String> = HashSet::new();

        for entry in &pool.entries {
            if selected.len() >= max_count {
                break;
            }
            let keys: Vec<String> = entry
                .transaction
                .get_vin()
                .iter()
                .map(|vin| vin.outpoint_key())
                .collect();
            if keys.iter().any(|k| consumed.contains(k)) {
                debug!(
                    "Skipping pool transaction {}: conflicts with a selected one",
                    entry.transaction.get_id_hex()
                );
                continue;
            }
            consumed.extend(keys);
            total_fee = total_fee.saturating_add(entry.fee);
            selected.push(entry.transaction.clone());
        }
        Ok((selected, total_fee))
    }

    /// Evict every pool transaction that spends an output the block consumed
    pub fn on_block_addition(&self, block: &Block) -> Result<usize> {
        let mut pool = self.inner.lock()?;
        let mut removed = 0;
        for tx in block.get_transactions() {
            for vin in tx.get_vin() {
                let key = vin.outpoint_key();
                let spenders = match pool.spent_index.remove(&key) {
                    Some(spenders) => spenders,
                    None => continue,
                };
                for txid_hex in spenders {
                    if pool.remove_transaction(&txid_hex).is_some() {
                        removed += 1;
                    }
                }
            }
        }
        if removed > 0 {
            debug!(
                "Block {} evicted {removed} transactions from the pool",
                block.get_hash()
            );
        }
        Ok(removed)
    }

    pub fn contains(&self, txid: &[u8]) -> bool {
        let txid_hex = HEXLOWER.encode(txid);
        match self.inner.lock() {
            Ok(pool) => pool.position(&txid_hex).is_some(),
            Err(_) => {
                error!("Failed to acquire lock on memory pool");
                false
            }
        }
    }

    pub fn get(&self, txid: &[u8]) -> Option<MempoolEntry> {
        let txid_hex = HEXLOWER.encode(txid);
        let pool = self.inner.lock().ok()?;
        pool.position(&txid_hex).map(|idx| pool.entries[idx].clone())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|pool| pool.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of transactions currently spending `outpoint_key`
    pub fn spender_count(&self, outpoint_key: &str) -> usize {
        self.inner
            .lock()
            .map(|pool| pool.spent_index.get(outpoint_key).map(Vec::len).unwrap_or(0))
            .unwrap_or(0)
    }
}

impl Observer for MemoryPool {
    fn name(&self) -> &str {
        "mempool"
    }

    fn on_event(&self, event: &ChainEvent) -> Result<()> {
        if let ChainEvent::BlockAdded(block) = event {
            self.on_block_addition(block)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{BlockHeader, TXOutput, BLOCK_VERSION};
    use crate::utils::Sha256Hasher;
    use rand::seq::SliceRandom;

    fn tx(id: u8, inputs: &[(&str, usize)]) -> Transaction {
        let inputs: Vec<(Vec<u8>, usize)> = inputs
            .iter()
            .map(|(txid, vout)| (txid.as_bytes().to_vec(), *vout))
            .collect();
        let mut tx = Transaction::new_unsigned(&inputs, vec![TXOutput::new(1, b"k")]);
        tx.set_id(vec![id; 4]);
        tx
    }

    fn block_spending(inputs: &[(&str, usize)]) -> Block {
        let header = BlockHeader::new(BLOCK_VERSION, String::new(), vec![], 1, 0, 0);
        let coinbase = Transaction::new_coinbase(1, 50, b"m", &Sha256Hasher).unwrap();
        Block::new(header, vec![coinbase, tx(200, inputs)], &Sha256Hasher)
    }

    #[test]
    fn test_selection_by_fee_descending() {
        let pool = MemoryPool::new();
        for (i, fee) in [10u64, 2, 0, 1, 9, 6].iter().enumerate() {
            let id = format!("id{i}");
            pool.append_transaction(tx(i as u8, &[(id.as_str(), 0)]), *fee)
                .unwrap();
        }

        let (selected, total) = pool.retrieve_transactions(3).unwrap();
        let ids: Vec<Vec<u8>> = selected.iter().map(|t| t.get_id().to_vec()).collect();
        assert_eq!(ids, vec![vec![0u8; 4], vec![4u8; 4], vec![5u8; 4]]);
        assert_eq!(total, 25);
        assert_eq!(pool.len(), 6, "selection must not remove entries");
    }

    #[test]
    fn test_ties_keep_insertion_order() {
        let pool = MemoryPool::new();
        pool.append_transaction(tx(1, &[("a", 0)]), 5).unwrap();
        pool.append_transaction(tx(2, &[("b", 0)]), 5).unwrap();
        pool.append_transaction(tx(3, &[("c", 0)]), 7).unwrap();

        let (selected, _) = pool.retrieve_transactions(3).unwrap();
        let first_bytes: Vec<u8> = selected.iter().map(|t| t.get_id()[0]).collect();
        assert_eq!(first_bytes, vec![3, 1, 2]);
    }

    #[test]
    fn test_conflicting_transactions_never_selected_together() {
        let pool = MemoryPool::new();
        pool.append_transaction(tx(1, &[("id1", 1)]), 3).unwrap();
        pool.append_transaction(tx(2, &[("id1", 1), ("id2", 0)]), 4)
            .unwrap();
        assert_eq!(pool.spender_count(&crate::core::outpoint_key("id1".as_bytes(), 1)), 2);

        let (selected, total) = pool.retrieve_transactions(6).unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(total, 4);
        assert_eq!(pool.len(), 2, "skipped conflicts stay pooled");
    }

    #[test]
    fn test_selection_disjoint_for_random_pools() {
        let mut rng = rand::thread_rng();
        let mut outpoints = vec!["a", "b", "c", "d"];
        for round in 0..20u8 {
            let pool = MemoryPool::new();
            for i in 0..12u8 {
                outpoints.shuffle(&mut rng);
                pool.append_transaction(
                    tx(i, &[(outpoints[0], (i % 2) as usize), (outpoints[1], 0)]),
                    u64::from((i * 7 + round) % 11),
                )
                .unwrap();
            }

            let (selected, _) = pool.retrieve_transactions(12).unwrap();
            let mut seen = HashSet::new();
            for t in &selected {
                for vin in t.get_vin() {
                    assert!(seen.insert(vin.outpoint_key()), "double spend selected");
                }
            }
        }
    }

    #[test]
    fn test_block_addition_evicts_conflicts_idempotently() {
        let pool = MemoryPool::new();
        pool.append_transaction(tx(1, &[("id1", 1)]), 3).unwrap();
        pool.append_transaction(tx(2, &[("id1", 1)]), 4).unwrap();
        pool.append_transaction(tx(3, &[("id9", 0)]), 1).unwrap();

        let block = block_spending(&[("id1", 1)]);
        assert_eq!(pool.on_block_addition(&block).unwrap(), 2);
        assert_eq!(pool.on_block_addition(&block).unwrap(), 0);
        assert_eq!(pool.len(), 1);
        assert!(pool.contains(&[3u8; 4]));
        assert_eq!(pool.spender_count(&crate::core::outpoint_key("id1".as_bytes(), 1)), 0);
    }

    #[test]
    fn test_evicting_multi_input_transaction_cleans_all_index_entries() {
        let pool = MemoryPool::new();
        pool.append_transaction(tx(1, &[("a", 0), ("b", 0)]), 3)
            .unwrap();

        pool.on_block_addition(&block_spending(&[("a", 0)]))
            .unwrap();
        assert!(pool.is_empty());
        assert_eq!(pool.spender_count(&crate::core::outpoint_key("b".as_bytes(), 0)), 0);
    }

    #[test]
    fn test_duplicate_append_is_ignored() {
        let pool = MemoryPool::new();
        assert!(pool.append_transaction(tx(1, &[("a", 0)]), 3).unwrap());
        assert!(!pool.append_transaction(tx(1, &[("a", 0)]), 3).unwrap());
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.get(&[1u8; 4]).map(|e| e.fee), Some(3));
    }
}

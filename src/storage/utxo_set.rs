use crate::core::{outpoint_key, Block, ChainEvent, Observer, TXInput, TXOutput};
use crate::error::{BlockchainError, Result};
use log::error;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// One spendable output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utxo {
    pub txid: Vec<u8>,
    pub vout: usize,
    pub output: TXOutput,
}

/// ( K -> "{txid_hex}-{vout}", V -> Utxo )
///
/// Mutated only by confirmed blocks. The whole of `add_block` runs under one
/// lock, so callers never observe half of a block applied.
#[derive(Default)]
pub struct UTXOSet {
    inner: Mutex<HashMap<String, Utxo>>,
}

impl UTXOSet {
    pub fn new() -> UTXOSet {
        UTXOSet::default()
    }

    /// Spend every non-coinbase input of `block`, then add its outputs.
    ///
    /// A missing input or an output that would overwrite a live entry means
    /// validation was bypassed or state is corrupt. Both are reported as
    /// consistency faults before anything is mutated.
    pub fn add_block(&self, block: &Block) -> Result<()> {
        let mut utxos = self.inner.lock()?;

        let mut spent = HashSet::new();
        let mut created = HashSet::new();
        for tx in block.get_transactions() {
            if !tx.is_coinbase() {
                for vin in tx.get_vin() {
                    let key = vin.outpoint_key();
                    if !utxos.contains_key(&key) || !spent.insert(key.clone()) {
                        error!(
                            "UTXO {key} spent by block {} is missing from the set",
                            block.get_hash()
                        );
                        return Err(BlockchainError::Consistency(format!(
                            "UTXO {key} not found while applying block {} at height {}",
                            block.get_hash(),
                            block.get_height()
                        )));
                    }
                }
            }
            for idx in 0..tx.get_vout().len() {
                let key = outpoint_key(tx.get_id(), idx);
                if (utxos.contains_key(&key) && !spent.contains(&key)) || !created.insert(key.clone())
                {
                    error!(
                        "Block {} would overwrite unspent output {key}",
                        block.get_hash()
                    );
                    return Err(BlockchainError::Consistency(format!(
                        "UTXO {key} already exists while applying block {} at height {}",
                        block.get_hash(),
                        block.get_height()
                    )));
                }
            }
        }

        for key in &spent {
            utxos.remove(key);
        }
        for tx in block.get_transactions() {
            for (idx, out) in tx.get_vout().iter().enumerate() {
                utxos.insert(
                    outpoint_key(tx.get_id(), idx),
                    Utxo {
                        txid: tx.get_id().to_vec(),
                        vout: idx,
                        output: out.clone(),
                    },
                );
            }
        }
        Ok(())
    }

    /// Sum of the amounts referenced by `inputs`; any unknown input fails
    pub fn retrieve_inputs_balance(&self, inputs: &[TXInput]) -> Result<u64> {
        let utxos = self.inner.lock()?;
        let mut total = 0u64;
        for vin in inputs {
            let key = vin.outpoint_key();
            let utxo = utxos
                .get(&key)
                .ok_or_else(|| BlockchainError::NotFound(format!("UTXO {key}")))?;
            total = total
                .checked_add(utxo.output.get_value())
                .ok_or_else(|| BlockchainError::Consistency("Input value overflow".to_string()))?;
        }
        Ok(total)
    }

    pub fn get(&self, txid: &[u8], vout: usize) -> Option<Utxo> {
        self.inner
            .lock()
            .ok()
            .and_then(|utxos| utxos.get(&outpoint_key(txid, vout)).cloned())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|utxos| utxos.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn total_value(&self) -> u64 {
        self.inner
            .lock()
            .map(|utxos| utxos.values().map(|u| u.output.get_value()).sum())
            .unwrap_or(0)
    }

    /// Outputs spendable by `pub_key_hash`
    pub fn find_utxo(&self, pub_key_hash: &[u8]) -> Vec<Utxo> {
        self.inner
            .lock()
            .map(|utxos| {
                utxos
                    .values()
                    .filter(|u| u.output.is_locked_with_key(pub_key_hash))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Drop every entry; reconstruction replays blocks into the empty set
    pub fn reset(&self) -> Result<()> {
        self.inner.lock()?.clear();
        Ok(())
    }
}

impl Observer for UTXOSet {
    fn name(&self) -> &str {
        "utxo-set"
    }

    fn on_event(&self, event: &ChainEvent) -> Result<()> {
        match event {
            ChainEvent::BlockAdded(block) => self.add_block(block),
            ChainEvent::TransactionAdded(_) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{BlockHeader, Transaction, BLOCK_VERSION};
    use crate::utils::Sha256Hasher;

    fn block_of(height: u64, transactions: Vec<Transaction>) -> Block {
        let header = BlockHeader::new(BLOCK_VERSION, String::new(), vec![], height, 0, 0);
        Block::new(header, transactions, &Sha256Hasher)
    }

    fn coinbase(height: u64, value: u64, key: &[u8]) -> Transaction {
        Transaction::new_coinbase(height, value, key, &Sha256Hasher).unwrap()
    }

    #[test]
    fn test_add_block_spends_and_creates() {
        let set = UTXOSet::new();
        let cb = coinbase(0, 50, b"bob");
        set.add_block(&block_of(0, vec![cb.clone()])).unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.total_value(), 50);

        let mut spend = Transaction::new_unsigned(
            &[(cb.get_id().to_vec(), 0)],
            vec![TXOutput::new(30, b"alice"), TXOutput::new(20, b"bob")],
        );
        spend.set_id(vec![42; 32]);
        set.add_block(&block_of(1, vec![coinbase(1, 50, b"bob"), spend]))
            .unwrap();

        assert!(set.get(cb.get_id(), 0).is_none());
        assert_eq!(set.len(), 3);
        assert_eq!(set.total_value(), 100);
        assert_eq!(set.find_utxo(b"alice").len(), 1);
    }

    #[test]
    fn test_missing_input_is_consistency_fault() {
        let set = UTXOSet::new();
        let mut spend =
            Transaction::new_unsigned(&[(b"ghost".to_vec(), 0)], vec![TXOutput::new(1, b"x")]);
        spend.set_id(vec![1; 32]);

        let err = set
            .add_block(&block_of(1, vec![coinbase(1, 50, b"bob"), spend]))
            .unwrap_err();
        assert!(matches!(err, BlockchainError::Consistency(_)));
    }

    #[test]
    fn test_replayed_coinbase_does_not_overwrite() {
        let set = UTXOSet::new();
        let cb = coinbase(0, 50, b"bob");
        set.add_block(&block_of(0, vec![cb.clone()])).unwrap();

        let err = set.add_block(&block_of(1, vec![cb])).unwrap_err();
        assert!(matches!(err, BlockchainError::Consistency(_)));
        assert_eq!(set.len(), 1);
        assert_eq!(set.total_value(), 50);
    }

    #[test]
    fn test_rejected_block_leaves_set_untouched() {
        let set = UTXOSet::new();
        let cb = coinbase(0, 50, b"bob");
        set.add_block(&block_of(0, vec![cb.clone()])).unwrap();

        let mut spend = Transaction::new_unsigned(
            &[(cb.get_id().to_vec(), 0)],
            vec![TXOutput::new(50, b"alice")],
        );
        spend.set_id(vec![3; 32]);
        let mut ghost =
            Transaction::new_unsigned(&[(b"ghost".to_vec(), 0)], vec![TXOutput::new(1, b"x")]);
        ghost.set_id(vec![4; 32]);

        assert!(set
            .add_block(&block_of(1, vec![coinbase(1, 50, b"bob"), spend, ghost]))
            .is_err());
        assert!(set.get(cb.get_id(), 0).is_some());
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_unknown_input_balance_fails() {
        let set = UTXOSet::new();
        let cb = coinbase(0, 50, b"bob");
        set.add_block(&block_of(0, vec![cb.clone()])).unwrap();

        let known = [TXInput::new(cb.get_id(), 0)];
        assert_eq!(set.retrieve_inputs_balance(&known).unwrap(), 50);

        let unknown = [TXInput::new(b"unknown", 0)];
        assert!(set.retrieve_inputs_balance(&unknown).is_err());
        let mixed = [TXInput::new(cb.get_id(), 0), TXInput::new(b"unknown", 0)];
        assert!(set.retrieve_inputs_balance(&mixed).is_err());
    }

    #[test]
    fn test_reset_clears() {
        let set = UTXOSet::new();
        set.add_block(&block_of(0, vec![coinbase(0, 50, b"bob")]))
            .unwrap();
        set.reset().unwrap();
        assert!(set.is_empty());
    }
}

use crate::core::{Block, BlockHeader, ProofOfWork, RewardSchedule, Transaction};
use crate::error::Result;
use crate::storage::UTXOSet;
use crate::utils::{hash_pub_key, Hasher, SignatureScheme};
use data_encoding::HEXLOWER;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;

/// The consensus rule a transaction, header or block broke
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("transaction has no inputs and is not a coinbase")]
    NoInputs,
    #[error("transaction must have at least one output")]
    NoOutputs,
    #[error("input {key} is spent twice by the same transaction")]
    DuplicateInput { key: String },
    #[error("input {key} does not reference an unspent output")]
    UnknownInput { key: String },
    #[error("public key of input {key} does not hash to the output's locking hash")]
    OwnershipMismatch { key: String },
    #[error("signature of input {key} does not verify")]
    BadSignature { key: String },
    #[error("transaction {txid} is already in the pool")]
    DuplicateTransaction { txid: String },
    #[error("outputs ({outputs}) exceed inputs ({inputs})")]
    NegativeFee { inputs: u64, outputs: u64 },
    #[error("declared transaction id {declared} does not match {computed}")]
    TxIdMismatch { declared: String, computed: String },
    #[error("previous hash {found:?} does not link to tip {expected:?}")]
    PrevHashMismatch { expected: String, found: String },
    #[error("height {found} does not follow chain height {expected}")]
    HeightMismatch { expected: u64, found: u64 },
    #[error("target {found} differs from chain target {expected}")]
    TargetMismatch { expected: u32, found: u32 },
    #[error("block {hash} does not satisfy its proof-of-work target")]
    InsufficientWork { hash: String },
    #[error("declared block hash {declared} does not match {computed}")]
    HashMismatch { declared: String, computed: String },
    #[error("merkle root does not match the block's transactions")]
    MerkleRootMismatch,
    #[error("block has no transactions")]
    EmptyBlock,
    #[error("first transaction is not a coinbase")]
    MissingCoinbase,
    #[error("coinbase does not commit to block height {height}")]
    CoinbaseHeightMismatch { height: u64 },
    #[error("coinbase found at position {index}")]
    MisplacedCoinbase { index: usize },
    #[error("output {key} is spent twice within the block")]
    DoubleSpend { key: String },
    #[error("coinbase claims {claimed}, at most {allowed} allowed")]
    ExcessiveCoinbase { claimed: u64, allowed: u64 },
}

/// Structural checks that need no chain context
pub fn validate_transaction_light(tx: &Transaction) -> std::result::Result<(), ValidationError> {
    if tx.get_vout().is_empty() {
        return Err(ValidationError::NoOutputs);
    }
    let mut seen = HashSet::new();
    for vin in tx.get_vin() {
        let key = vin.outpoint_key();
        if !seen.insert(key.clone()) {
            return Err(ValidationError::DuplicateInput { key });
        }
    }
    Ok(())
}

/// Where the next block must attach
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainTip {
    /// Empty for an empty chain
    pub last_hash: String,
    /// Number of accepted blocks; the next header carries this height
    pub height: u64,
}

/// Chain-aware ("heavy") validation
pub struct Validator {
    hasher: Arc<dyn Hasher>,
    signatures: Arc<dyn SignatureScheme>,
    pow: ProofOfWork,
    target: u32,
    rewards: RewardSchedule,
}

impl Validator {
    pub fn new(
        hasher: Arc<dyn Hasher>,
        signatures: Arc<dyn SignatureScheme>,
        target: u32,
        rewards: RewardSchedule,
    ) -> Validator {
        Validator {
            pow: ProofOfWork::new(hasher.clone()),
            hasher,
            signatures,
            target,
            rewards,
        }
    }

    pub fn get_target(&self) -> u32 {
        self.target
    }

    pub fn get_rewards(&self) -> &RewardSchedule {
        &self.rewards
    }

    pub fn get_hasher(&self) -> &Arc<dyn Hasher> {
        &self.hasher
    }

    fn check_id(&self, tx: &Transaction) -> Result<()> {
        let computed = tx.compute_id(self.hasher.as_ref())?;
        if computed != tx.get_id() {
            return Err(ValidationError::TxIdMismatch {
                declared: tx.get_id_hex(),
                computed: HEXLOWER.encode(&computed),
            }
            .into());
        }
        Ok(())
    }

    /// Full check of a spending transaction against the live UTXO set.
    /// Returns the fee (inputs minus outputs).
    pub fn validate_transaction(&self, tx: &Transaction, utxos: &UTXOSet) -> Result<u64> {
        validate_transaction_light(tx)?;
        if tx.is_coinbase() {
            return Err(ValidationError::NoInputs.into());
        }
        self.check_id(tx)?;

        let digest = tx.signing_digest(self.hasher.as_ref())?;
        for vin in tx.get_vin() {
            let key = vin.outpoint_key();
            let utxo = utxos
                .get(vin.get_txid(), vin.get_vout())
                .ok_or_else(|| ValidationError::UnknownInput { key: key.clone() })?;
            if hash_pub_key(vin.get_pub_key()) != utxo.output.get_pub_key_hash() {
                return Err(ValidationError::OwnershipMismatch { key }.into());
            }
            if !self
                .signatures
                .verify(vin.get_pub_key(), vin.get_signature(), &digest)
            {
                return Err(ValidationError::BadSignature { key }.into());
            }
        }

        let inputs = utxos.retrieve_inputs_balance(tx.get_vin())?;
        let outputs = tx.get_output_value()?;
        if outputs > inputs {
            return Err(ValidationError::NegativeFee { inputs, outputs }.into());
        }
        Ok(inputs - outputs)
    }

    /// Linkage, height continuity, target and proof of work
    pub fn validate_header(&self, header: &BlockHeader, tip: &ChainTip) -> Result<()> {
        if header.get_pre_block_hash() != tip.last_hash {
            return Err(ValidationError::PrevHashMismatch {
                expected: tip.last_hash.clone(),
                found: header.get_pre_block_hash().to_string(),
            }
            .into());
        }
        if header.get_height() != tip.height {
            return Err(ValidationError::HeightMismatch {
                expected: tip.height,
                found: header.get_height(),
            }
            .into());
        }
        if header.get_target() != self.target {
            return Err(ValidationError::TargetMismatch {
                expected: self.target,
                found: header.get_target(),
            }
            .into());
        }
        if !self.pow.verify(header) {
            return Err(ValidationError::InsufficientWork {
                hash: header.hash(self.hasher.as_ref()),
            }
            .into());
        }
        Ok(())
    }

    /// Validate a block for attachment at `tip`. Returns the total fees of
    /// its non-coinbase transactions.
    pub fn validate_block(&self, block: &Block, tip: &ChainTip, utxos: &UTXOSet) -> Result<u64> {
        let header = block.get_header();
        self.validate_header(header, tip)?;

        let computed = header.hash(self.hasher.as_ref());
        if computed != block.get_hash() {
            return Err(ValidationError::HashMismatch {
                declared: block.get_hash().to_string(),
                computed,
            }
            .into());
        }

        let transactions = block.get_transactions();
        let coinbase = transactions.first().ok_or(ValidationError::EmptyBlock)?;
        if !block.verify_merkle_root(self.hasher.as_ref())? {
            return Err(ValidationError::MerkleRootMismatch.into());
        }
        if !coinbase.is_coinbase() {
            return Err(ValidationError::MissingCoinbase.into());
        }
        if let Some(index) = transactions.iter().skip(1).position(Transaction::is_coinbase) {
            return Err(ValidationError::MisplacedCoinbase { index: index + 1 }.into());
        }
        if coinbase.get_coinbase_data() != header.get_height().to_be_bytes() {
            return Err(ValidationError::CoinbaseHeightMismatch {
                height: header.get_height(),
            }
            .into());
        }

        let mut spent = HashSet::new();
        for tx in &transactions[1..] {
            for vin in tx.get_vin() {
                let key = vin.outpoint_key();
                if !spent.insert(key.clone()) {
                    return Err(ValidationError::DoubleSpend { key }.into());
                }
            }
        }

        let mut fees = 0u64;
        for tx in &transactions[1..] {
            fees = fees.saturating_add(self.validate_transaction(tx, utxos)?);
        }

        validate_transaction_light(coinbase)?;
        self.check_id(coinbase)?;
        let allowed = self.rewards.reward(header.get_height()).saturating_add(fees);
        let claimed = coinbase.get_output_value()?;
        if claimed > allowed {
            return Err(ValidationError::ExcessiveCoinbase { claimed, allowed }.into());
        }
        Ok(fees)
    }
}

// Transactions move value in the UTXO model: each one consumes previous
// outputs and creates new ones. A transaction with zero inputs is a coinbase
// and mints the block reward plus collected fees.

use crate::error::{BlockchainError, Result};
use crate::utils::{
    ecdsa_p256_sha256_sign_digest, hash_pub_key, public_key_from_pkcs8, serialize, Hasher,
};
use data_encoding::HEXLOWER;
use serde::{Deserialize, Serialize};

/// Key under which an output lives in the UTXO set and the mempool's
/// spent-input index: `"{txid_hex}-{out_idx}"`.
pub fn outpoint_key(txid: &[u8], vout: usize) -> String {
    format!("{}-{}", HEXLOWER.encode(txid), vout)
}

// A reference to an earlier output plus the proof that the spender owns it
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct TXInput {
    txid: Vec<u8>,
    vout: usize,
    signature: Vec<u8>,
    pub_key: Vec<u8>,
}

impl TXInput {
    pub fn new(txid: &[u8], vout: usize) -> TXInput {
        TXInput {
            txid: txid.to_vec(),
            vout,
            signature: vec![],
            pub_key: vec![],
        }
    }

    pub fn get_txid(&self) -> &[u8] {
        self.txid.as_slice()
    }

    pub fn get_vout(&self) -> usize {
        self.vout
    }

    pub fn get_signature(&self) -> &[u8] {
        self.signature.as_slice()
    }

    pub fn get_pub_key(&self) -> &[u8] {
        self.pub_key.as_slice()
    }

    pub fn outpoint_key(&self) -> String {
        outpoint_key(&self.txid, self.vout)
    }

    /// True when the public key carried by this input hashes to `pub_key_hash`
    pub fn uses_key(&self, pub_key_hash: &[u8]) -> bool {
        hash_pub_key(self.pub_key.as_slice()).eq(pub_key_hash)
    }
}

// Pay `value` to whoever can present a key hashing to `pub_key_hash`
#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct TXOutput {
    value: u64,
    pub_key_hash: Vec<u8>,
}

impl TXOutput {
    pub fn new(value: u64, pub_key_hash: &[u8]) -> TXOutput {
        TXOutput {
            value,
            pub_key_hash: pub_key_hash.to_vec(),
        }
    }

    pub fn get_value(&self) -> u64 {
        self.value
    }

    pub fn get_pub_key_hash(&self) -> &[u8] {
        self.pub_key_hash.as_slice()
    }

    pub fn is_locked_with_key(&self, pub_key_hash: &[u8]) -> bool {
        self.pub_key_hash.eq(pub_key_hash)
    }
}

#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct Transaction {
    id: Vec<u8>,
    vin: Vec<TXInput>,
    vout: Vec<TXOutput>,
    // Block height for coinbases, keeps their ids unique across blocks
    coinbase_data: Vec<u8>,
}

impl Transaction {
    /// Coinbase paying `reward` to `pub_key_hash` in the block at `height`
    pub fn new_coinbase(
        height: u64,
        reward: u64,
        pub_key_hash: &[u8],
        hasher: &dyn Hasher,
    ) -> Result<Transaction> {
        let mut tx = Transaction {
            id: vec![],
            vin: vec![],
            vout: vec![TXOutput::new(reward, pub_key_hash)],
            coinbase_data: height.to_be_bytes().to_vec(),
        };
        tx.finalize(hasher)?;
        Ok(tx)
    }

    /// Unsigned spend of the given outpoints. Call [`Transaction::sign`]
    /// before submitting it.
    pub fn new_unsigned(inputs: &[(Vec<u8>, usize)], outputs: Vec<TXOutput>) -> Transaction {
        Transaction {
            id: vec![],
            vin: inputs
                .iter()
                .map(|(txid, vout)| TXInput::new(txid, *vout))
                .collect(),
            vout: outputs,
            coinbase_data: vec![],
        }
    }

    /// Sign every input with the single key in `pkcs8`, then assign the id.
    pub fn sign(&mut self, pkcs8: &[u8], hasher: &dyn Hasher) -> Result<()> {
        let public_key = public_key_from_pkcs8(pkcs8)?;
        let digest = self.signing_digest(hasher)?;
        let signature = ecdsa_p256_sha256_sign_digest(pkcs8, &digest)?;
        for vin in self.vin.iter_mut() {
            vin.pub_key = public_key.clone();
            vin.signature = signature.clone();
        }
        self.finalize(hasher)
    }

    /// Digest the signatures commit to: the transaction with every unlock
    /// proof and public key stripped.
    pub fn signing_digest(&self, hasher: &dyn Hasher) -> Result<Vec<u8>> {
        let trimmed = Transaction {
            id: vec![],
            vin: self
                .vin
                .iter()
                .map(|vin| TXInput::new(vin.get_txid(), vin.get_vout()))
                .collect(),
            vout: self.vout.clone(),
            coinbase_data: self.coinbase_data.clone(),
        };
        Ok(hasher.digest(&serialize(&trimmed)?))
    }

    /// Hash of the assembled transaction without its id
    pub fn compute_id(&self, hasher: &dyn Hasher) -> Result<Vec<u8>> {
        let tx_copy = Transaction {
            id: vec![],
            vin: self.vin.clone(),
            vout: self.vout.clone(),
            coinbase_data: self.coinbase_data.clone(),
        };
        let bytes = serialize(&tx_copy).map_err(|e| {
            BlockchainError::Serialization(format!("Failed to hash transaction: {e}"))
        })?;
        Ok(hasher.digest(&bytes))
    }

    fn finalize(&mut self, hasher: &dyn Hasher) -> Result<()> {
        self.id = self.compute_id(hasher)?;
        Ok(())
    }

    pub fn is_coinbase(&self) -> bool {
        self.vin.is_empty()
    }

    pub fn get_id(&self) -> &[u8] {
        self.id.as_slice()
    }

    pub fn get_id_hex(&self) -> String {
        HEXLOWER.encode(&self.id)
    }

    /// Height bytes of a coinbase, empty for spends
    pub fn get_coinbase_data(&self) -> &[u8] {
        self.coinbase_data.as_slice()
    }

    pub fn get_vin(&self) -> &[TXInput] {
        self.vin.as_slice()
    }

    pub fn get_vout(&self) -> &[TXOutput] {
        self.vout.as_slice()
    }

    pub fn get_output_value(&self) -> Result<u64> {
        let mut total = 0u64;
        for vout in &self.vout {
            total = total
                .checked_add(vout.get_value())
                .ok_or_else(|| BlockchainError::Consistency("Output value overflow".to_string()))?;
        }
        Ok(total)
    }
}

#[cfg(test)]
impl Transaction {
    pub(crate) fn set_vout(&mut self, vout: Vec<TXOutput>) {
        self.vout = vout;
    }

    pub(crate) fn set_id(&mut self, id: Vec<u8>) {
        self.id = id;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::{new_key_pair, EcdsaP256, Sha256Hasher, SignatureScheme};

    #[test]
    fn test_coinbase_ids_differ_by_height() {
        let a = Transaction::new_coinbase(1, 50, b"miner", &Sha256Hasher).unwrap();
        let b = Transaction::new_coinbase(2, 50, b"miner", &Sha256Hasher).unwrap();

        assert!(a.is_coinbase());
        assert_eq!(a.get_id().len(), 32);
        assert_ne!(a.get_id(), b.get_id());
    }

    #[test]
    fn test_signed_transaction_verifies() {
        let pkcs8 = new_key_pair().unwrap();
        let public_key = public_key_from_pkcs8(&pkcs8).unwrap();
        let mut tx = Transaction::new_unsigned(
            &[(vec![7u8; 32], 0)],
            vec![TXOutput::new(10, &hash_pub_key(&public_key))],
        );
        tx.sign(&pkcs8, &Sha256Hasher).unwrap();

        let digest = tx.signing_digest(&Sha256Hasher).unwrap();
        let vin = &tx.get_vin()[0];
        assert!(EcdsaP256.verify(vin.get_pub_key(), vin.get_signature(), &digest));
        assert!(vin.uses_key(&hash_pub_key(&public_key)));
        assert_eq!(tx.get_id(), tx.compute_id(&Sha256Hasher).unwrap().as_slice());
    }

    #[test]
    fn test_outpoint_key_format() {
        assert_eq!(outpoint_key(&[0xab, 0x01], 3), "ab01-3");
    }
}

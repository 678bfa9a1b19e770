//! Utility functions and helpers
//!
//! Hashing and signing capabilities, timestamps, and the bincode layer used
//! for everything that goes to storage.

pub mod crypto;
pub mod serialization;

pub use crypto::{
    current_timestamp, ecdsa_p256_sha256_sign_digest, ecdsa_p256_sha256_sign_verify,
    hash_pub_key, new_key_pair, public_key_from_pkcs8, ripemd160_digest, sha256_digest,
    EcdsaP256, Hasher, Sha256Hasher, SignatureScheme,
};

pub use serialization::{deserialize, serialize};

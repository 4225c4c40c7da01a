//! Cryptographic operations for the registry
//!
//! This module provides:
//! - Ed25519 key pair generation, signing, and verification
//! - Address derivation from public keys and module names
//! - SHA-256 content hashing and deterministic entity ids

use crate::types::Address;
use ed25519_dalek::{Signature as DalekSignature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Number of hash bytes kept in an address
const ADDRESS_LEN: usize = 20;

/// A (public key, signature) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// Ed25519 public key (32 bytes)
    #[serde(with = "serde_bytes")]
    pub public_key: Vec<u8>,
    /// Ed25519 signature (64 bytes)
    #[serde(with = "serde_bytes")]
    pub signature: Vec<u8>,
}

impl Signature {
    /// Address of the signing key
    pub fn address(&self) -> Address {
        address_from_public_key(&self.public_key)
    }
}

/// Ed25519 key pair for signing
#[derive(Debug)]
pub struct KeyPair {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        Self::from_seed(&rand::random::<[u8; 32]>())
    }

    /// Create from seed (32 bytes) - deterministic generation
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(seed);
        let verifying_key = signing_key.verifying_key();

        Self {
            signing_key,
            verifying_key,
        }
    }

    /// Get public key bytes
    pub fn public_key(&self) -> [u8; 32] {
        self.verifying_key.to_bytes()
    }

    /// Address derived from the public key
    pub fn address(&self) -> Address {
        address_from_public_key(&self.public_key())
    }

    /// Sign a message
    pub fn sign(&self, message: &[u8]) -> Signature {
        let signature = self.signing_key.sign(message);
        Signature {
            public_key: self.public_key().to_vec(),
            signature: signature.to_bytes().to_vec(),
        }
    }
}

/// Verify a (public key, signature) pair over a message
pub fn verify_signature(message: &[u8], signature: &Signature) -> bool {
    let Ok(sig_bytes) = <[u8; 64]>::try_from(signature.signature.as_slice()) else {
        return false;
    };
    let Ok(key_bytes) = <[u8; 32]>::try_from(signature.public_key.as_slice()) else {
        return false;
    };

    let verifying_key = match VerifyingKey::from_bytes(&key_bytes) {
        Ok(key) => key,
        Err(_) => return false,
    };

    verifying_key
        .verify(message, &DalekSignature::from_bytes(&sig_bytes))
        .is_ok()
}

/// Hash arbitrary bytes using SHA-256
pub fn hash_bytes(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// SHA-256 applied twice (record sign bytes)
pub fn double_hash(data: &[u8]) -> [u8; 32] {
    hash_bytes(&hash_bytes(data))
}

/// Hex-encoded SHA-256 digest, used as a content address
pub fn content_hash(data: &[u8]) -> String {
    hex::encode(hash_bytes(data))
}

/// Derive an account address from a public key
pub fn address_from_public_key(public_key: &[u8]) -> Address {
    Address::new(hex::encode(&hash_bytes(public_key)[..ADDRESS_LEN]))
}

/// Derive the address of a named module account
pub fn module_address(name: &str) -> Address {
    Address::new(hex::encode(
        &hash_bytes(format!("module:{}", name).as_bytes())[..ADDRESS_LEN],
    ))
}

/// Deterministic id from `(address, account number, sequence)`
///
/// Used for bonds and auctions; unique per signed transaction.
pub fn generate_id(address: &Address, account_number: u64, sequence: u64) -> String {
    content_hash(format!("{}:{}:{}", address, account_number, sequence).as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypair_from_seed() {
        let seed = [42u8; 32];
        let a = KeyPair::from_seed(&seed);
        let b = KeyPair::from_seed(&seed);
        assert_eq!(a.public_key(), b.public_key());
        assert_eq!(a.address(), b.address());
        assert_eq!(a.address().as_str().len(), ADDRESS_LEN * 2);
    }

    #[test]
    fn test_sign_and_verify() {
        let keypair = KeyPair::generate();
        let message = b"registry record";

        let signature = keypair.sign(message);
        assert!(verify_signature(message, &signature));
        assert!(!verify_signature(b"other message", &signature));
        assert_eq!(signature.address(), keypair.address());
    }

    #[test]
    fn test_verify_rejects_malformed() {
        let keypair = KeyPair::generate();
        let mut signature = keypair.sign(b"msg");
        signature.signature.truncate(10);
        assert!(!verify_signature(b"msg", &signature));

        let mut signature = keypair.sign(b"msg");
        signature.public_key = KeyPair::generate().public_key().to_vec();
        assert!(!verify_signature(b"msg", &signature));
    }

    #[test]
    fn test_hash_bytes() {
        // SHA-256("abc")
        assert_eq!(
            hex::encode(hash_bytes(b"abc")),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_ne!(double_hash(b"abc"), hash_bytes(b"abc"));
    }

    #[test]
    fn test_generate_id_deterministic() {
        let addr = Address::new("owner");
        assert_eq!(generate_id(&addr, 1, 2), generate_id(&addr, 1, 2));
        assert_ne!(generate_id(&addr, 1, 2), generate_id(&addr, 1, 3));
        assert_eq!(generate_id(&addr, 1, 2).len(), 64);
    }

    #[test]
    fn test_module_addresses_distinct() {
        assert_ne!(module_address("bond"), module_address("record_rent"));
        assert_eq!(module_address("bond"), module_address("bond"));
    }
}

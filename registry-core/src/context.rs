//! Execution context handed to every handler

use crate::{crypto, params::Params, store::KvStore, types::{Address, BlockHeader}};
use chrono::{DateTime, Utc};

/// Store snapshot, block header and params of the running transition
pub struct Context<'a> {
    /// Store the transition reads and writes
    pub store: &'a mut dyn KvStore,
    /// Current block
    pub header: BlockHeader,
    /// Chain parameters in effect
    pub params: Params,
}

impl<'a> Context<'a> {
    /// Create a context
    pub fn new(store: &'a mut dyn KvStore, header: BlockHeader, params: Params) -> Self {
        Self {
            store,
            header,
            params,
        }
    }

    /// Block time
    pub fn now(&self) -> DateTime<Utc> {
        self.header.time
    }

    /// Block height
    pub fn height(&self) -> u64 {
        self.header.height
    }
}

impl std::fmt::Debug for Context<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("header", &self.header)
            .finish()
    }
}

/// An authenticated transaction sender
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signer {
    /// Address derived from the public key
    pub address: Address,
    /// Ed25519 public key
    pub public_key: Vec<u8>,
    /// Account number of the sender
    pub account_number: u64,
    /// Sequence of the transaction being executed
    pub sequence: u64,
}

impl Signer {
    /// Sender identified by public key
    pub fn new(public_key: Vec<u8>, account_number: u64, sequence: u64) -> Self {
        Self {
            address: crypto::address_from_public_key(&public_key),
            public_key,
            account_number,
            sequence,
        }
    }

    /// Deterministic id for an entity created by this transaction
    pub fn derive_id(&self) -> String {
        crypto::generate_id(&self.address, self.account_number, self.sequence)
    }
}

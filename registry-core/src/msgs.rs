//! Transaction messages
//!
//! A transaction carries one [`Msg`] signed by its sender. The signature
//! covers the canonical JSON of a [`SignDoc`], which binds the message to
//! the chain, the sender's account number and its next sequence.

use crate::{
    canonical,
    crypto::{self, KeyPair, Signature},
    record::RecordPayload,
    types::{Coin, Coins},
    Result,
};
use serde::{Deserialize, Serialize};

/// Every state transition a transaction can request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Msg {
    /// Create a record funded by a bond
    SetRecord {
        /// Signed attributes
        payload: RecordPayload,
        /// Funding bond
        bond_id: Option<String>,
    },
    /// Reactivate an expired record
    RenewRecord {
        /// Record id
        record_id: String,
    },
    /// Fund an unbonded record
    AssociateBond {
        /// Record id
        record_id: String,
        /// Bond id
        bond_id: String,
    },
    /// Detach a record from its bond
    DissociateBond {
        /// Record id
        record_id: String,
    },
    /// Detach every record from a bond
    DissociateRecords {
        /// Bond id
        bond_id: String,
    },
    /// Move every record from one bond to another
    ReassociateRecords {
        /// Current bond
        old_bond_id: String,
        /// Replacement bond
        new_bond_id: String,
    },
    /// Open a bond
    CreateBond {
        /// Deposit
        coins: Coins,
    },
    /// Top up a bond
    RefillBond {
        /// Bond id
        id: String,
        /// Deposit
        coins: Coins,
    },
    /// Take funds out of a bond
    WithdrawBond {
        /// Bond id
        id: String,
        /// Amount
        coins: Coins,
    },
    /// Close a bond and return its balance
    CancelBond {
        /// Bond id
        id: String,
    },
    /// Reserve a top-level name
    ReserveAuthority {
        /// Bare name
        name: String,
    },
    /// Bind a WRN to a record
    SetName {
        /// Full WRN
        wrn: String,
        /// Record id
        id: String,
    },
    /// Tombstone a WRN binding
    DeleteName {
        /// Full WRN
        wrn: String,
    },
    /// Open an auction
    CreateAuction {
        /// Commit phase length in seconds
        commits_duration_secs: i64,
        /// Reveal phase length in seconds
        reveals_duration_secs: i64,
        /// Fee retained from every bid
        commit_fee: Coin,
        /// Fee refunded on reveal
        reveal_fee: Coin,
        /// Lowest acceptable bid
        minimum_bid: Coin,
    },
    /// Commit a sealed bid
    CommitBid {
        /// Auction id
        auction_id: String,
        /// Content hash of the sealed bid
        commit_hash: String,
        /// Fees the bidder authorises
        auction_fee: Coins,
    },
    /// Disclose a sealed bid
    RevealBid {
        /// Auction id
        auction_id: String,
        /// Hex-encoded bid JSON
        reveal: String,
    },
    /// Cancel an auction in its commit phase
    CancelAuction {
        /// Auction id
        auction_id: String,
    },
}

impl Msg {
    /// Short name for logs and results
    pub fn name(&self) -> &'static str {
        match self {
            Msg::SetRecord { .. } => "set_record",
            Msg::RenewRecord { .. } => "renew_record",
            Msg::AssociateBond { .. } => "associate_bond",
            Msg::DissociateBond { .. } => "dissociate_bond",
            Msg::DissociateRecords { .. } => "dissociate_records",
            Msg::ReassociateRecords { .. } => "reassociate_records",
            Msg::CreateBond { .. } => "create_bond",
            Msg::RefillBond { .. } => "refill_bond",
            Msg::WithdrawBond { .. } => "withdraw_bond",
            Msg::CancelBond { .. } => "cancel_bond",
            Msg::ReserveAuthority { .. } => "reserve_authority",
            Msg::SetName { .. } => "set_name",
            Msg::DeleteName { .. } => "delete_name",
            Msg::CreateAuction { .. } => "create_auction",
            Msg::CommitBid { .. } => "commit_bid",
            Msg::RevealBid { .. } => "reveal_bid",
            Msg::CancelAuction { .. } => "cancel_auction",
        }
    }
}

/// What the sender signs
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignDoc<'a> {
    /// Chain identifier
    pub chain_id: &'a str,
    /// Sender's account number
    pub account_number: u64,
    /// Sender's expected sequence
    pub sequence: u64,
    /// The message
    pub msg: &'a Msg,
}

impl SignDoc<'_> {
    /// SHA-256 of SHA-256 of the canonical JSON
    pub fn sign_bytes(&self) -> Result<[u8; 32]> {
        let value = serde_json::to_value(self)?;
        Ok(crypto::double_hash(&canonical::to_canonical_bytes(&value)?))
    }
}

/// A signed transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedTx {
    /// The message
    pub msg: Msg,
    /// Sender's account number
    pub account_number: u64,
    /// Sender's sequence
    pub sequence: u64,
    /// Sender key and signature over the sign doc
    pub signature: Signature,
}

impl SignedTx {
    /// Sign `msg` for `chain_id`
    pub fn sign(
        msg: Msg,
        chain_id: &str,
        account_number: u64,
        sequence: u64,
        keypair: &KeyPair,
    ) -> Result<Self> {
        let sign_bytes = SignDoc {
            chain_id,
            account_number,
            sequence,
            msg: &msg,
        }
        .sign_bytes()?;
        Ok(Self {
            signature: keypair.sign(&sign_bytes),
            msg,
            account_number,
            sequence,
        })
    }

    /// Bytes the signature must cover on `chain_id`
    pub fn sign_bytes(&self, chain_id: &str) -> Result<[u8; 32]> {
        SignDoc {
            chain_id,
            account_number: self.account_number,
            sequence: self.sequence,
            msg: &self.msg,
        }
        .sign_bytes()
    }

    /// Does the signature verify on `chain_id`
    pub fn verify(&self, chain_id: &str) -> Result<bool> {
        Ok(crypto::verify_signature(&self.sign_bytes(chain_id)?, &self.signature))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signed_tx_verifies_on_its_chain_only() {
        let keypair = KeyPair::from_seed(&[9u8; 32]);
        let msg = Msg::ReserveAuthority {
            name: "alice".into(),
        };
        let tx = SignedTx::sign(msg, "registry-1", 3, 7, &keypair).unwrap();

        assert!(tx.verify("registry-1").unwrap());
        assert!(!tx.verify("registry-2").unwrap());
        assert_eq!(tx.signature.address(), keypair.address());

        let mut replayed = tx.clone();
        replayed.sequence = 8;
        assert!(!replayed.verify("registry-1").unwrap());
    }

    #[test]
    fn test_msg_json_shape() {
        let msg = Msg::SetName {
            wrn: "wrn://alice/app".into(),
            id: "abc".into(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["set_name"]["wrn"], "wrn://alice/app");
        assert_eq!(msg.name(), "set_name");

        let back: Msg = serde_json::from_value(json).unwrap();
        assert_eq!(back, msg);
    }
}

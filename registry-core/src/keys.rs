//! Persisted key layout
//!
//! Each module owns a namespace; within it a one-byte prefix separates the
//! entity kinds. Composite keys join their parts with `/`.

use chrono::{DateTime, Utc};

/// Nameservice namespace (records, names, authorities, expiry queue)
pub const NAMESERVICE: &[u8] = b"nameservice/";
/// Bond namespace
pub const BOND: &[u8] = b"bond/";
/// Auction namespace
pub const AUCTION: &[u8] = b"auction/";
/// Bank namespace
pub const BANK: &[u8] = b"bank/";
/// Params namespace
pub const PARAMS: &[u8] = b"params/";

const SEP: u8 = b'/';

/// Nameservice prefixes
pub mod nameservice {
    /// Record by id
    pub const RECORD: u8 = 0x00;
    /// Authority by name
    pub const AUTHORITY: u8 = 0x01;
    /// Name binding by wrn
    pub const NAME: u8 = 0x02;
    /// Bond id / record id index
    pub const BOND_RECORDS: u8 = 0x03;
    /// Changeset by height
    pub const CHANGESET: u8 = 0x04;
    /// Auction id to authority name
    pub const AUCTION_AUTHORITY: u8 = 0x05;
    /// Expiry queue by time
    pub const EXPIRY_QUEUE: u8 = 0x10;
    /// Record id to bound names
    pub const RECORD_NAMES: u8 = 0xe0;
}

/// Bond prefixes
pub mod bond {
    /// Bond by id
    pub const BOND: u8 = 0x00;
    /// Owner / bond id index
    pub const OWNER_BONDS: u8 = 0x01;
}

/// Auction prefixes
pub mod auction {
    /// Auction by id
    pub const AUCTION: u8 = 0x00;
    /// Owner / auction id index
    pub const OWNER_AUCTIONS: u8 = 0x01;
    /// Auction id / bidder to bid
    pub const BID: u8 = 0x02;
}

/// Bank prefixes
pub mod bank {
    /// Account by address
    pub const ACCOUNT: u8 = 0x00;
    /// Next account number
    pub const NEXT_ACCOUNT_NUMBER: u8 = 0x01;
}

/// `namespace || prefix`
pub fn prefix(namespace: &[u8], kind: u8) -> Vec<u8> {
    let mut key = Vec::with_capacity(namespace.len() + 1);
    key.extend_from_slice(namespace);
    key.push(kind);
    key
}

/// `namespace || prefix || id`
pub fn key(namespace: &[u8], kind: u8, id: &[u8]) -> Vec<u8> {
    let mut key = prefix(namespace, kind);
    key.extend_from_slice(id);
    key
}

/// `namespace || prefix || parent || '/'`, the scan prefix of a composite index
pub fn index_prefix(namespace: &[u8], kind: u8, parent: &[u8]) -> Vec<u8> {
    let mut key = key(namespace, kind, parent);
    key.push(SEP);
    key
}

/// `namespace || prefix || parent || '/' || child`
pub fn index_key(namespace: &[u8], kind: u8, parent: &[u8], child: &[u8]) -> Vec<u8> {
    let mut key = index_prefix(namespace, kind, parent);
    key.extend_from_slice(child);
    key
}

/// Order-preserving encoding of a timestamp
pub fn time_bytes(time: &DateTime<Utc>) -> [u8; 12] {
    let secs = (time.timestamp() as u64) ^ (1 << 63);
    let mut bytes = [0u8; 12];
    bytes[..8].copy_from_slice(&secs.to_be_bytes());
    bytes[8..].copy_from_slice(&time.timestamp_subsec_nanos().to_be_bytes());
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_namespaces_do_not_collide() {
        let record = key(NAMESERVICE, nameservice::RECORD, b"abc");
        let bond = key(BOND, bond::BOND, b"abc");
        assert_ne!(record, bond);
        assert!(record.starts_with(&prefix(NAMESERVICE, nameservice::RECORD)));
    }

    #[test]
    fn test_index_key_under_prefix() {
        let k = index_key(NAMESERVICE, nameservice::BOND_RECORDS, b"bond1", b"rec1");
        assert!(k.starts_with(&index_prefix(NAMESERVICE, nameservice::BOND_RECORDS, b"bond1")));
        assert!(!k.starts_with(&index_prefix(NAMESERVICE, nameservice::BOND_RECORDS, b"bond")));
    }

    #[test]
    fn test_time_bytes_ordering() {
        let t0 = Utc.with_ymd_and_hms(1960, 1, 1, 0, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t2 = t1 + Duration::nanoseconds(1);
        let t3 = t1 + Duration::seconds(1);

        assert!(time_bytes(&t0) < time_bytes(&t1));
        assert!(time_bytes(&t1) < time_bytes(&t2));
        assert!(time_bytes(&t2) < time_bytes(&t3));
    }
}

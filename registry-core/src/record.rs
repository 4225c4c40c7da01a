//! Content-addressed record store
//!
//! A record's id is the hex SHA-256 of the canonical JSON of its attributes,
//! so creating the same attributes twice is a no-op. Owners are the
//! addresses of the keys that signed the canonical bytes at creation.
//!
//! Deleted records keep their attributes (renewal recomputes the same id)
//! but are invisible to [`get_record`], [`has_record`] and queries unless a
//! caller asks for tombstones explicitly.

use crate::{
    canonical::{self, Attributes},
    changeset,
    context::{Context, Signer},
    crypto::{self, Signature},
    keys, rent,
    store::{KvStore, KvStoreExt},
    types::Address,
    version::{self, VersionConstraint},
    Error, Result,
};
use chrono::{DateTime, Utc};
use semver::Version;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Attributes every record must carry as non-empty strings
pub const REQUIRED_ATTRIBUTES: [&str; 3] = ["type", "name", "version"];

/// Stored record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Content hash of the attributes
    pub id: String,
    /// Hashed payload
    #[serde(with = "canonical::attributes_json")]
    pub attributes: Attributes,
    /// Sorted signer addresses
    pub owners: Vec<Address>,
    /// Funding bond, if associated
    pub bond_id: Option<String>,
    /// Last (re)activation
    pub create_time: DateTime<Utc>,
    /// End of the paid rent period
    pub expiry_time: DateTime<Utc>,
    /// Expired and not renewed
    pub deleted: bool,
}

impl Record {
    /// String attribute
    pub fn attribute_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(Value::as_str)
    }

    /// `type` attribute
    pub fn record_type(&self) -> &str {
        self.attribute_str("type").unwrap_or_default()
    }

    /// `name` attribute
    pub fn name(&self) -> &str {
        self.attribute_str("name").unwrap_or_default()
    }

    /// `version` attribute, parsed as semver
    pub fn version(&self) -> Option<Version> {
        self.attribute_str("version").and_then(version::parse_version)
    }

    /// Grouping key for `latest` selection
    pub fn base_name(&self) -> (String, String) {
        (self.record_type().to_string(), self.name().to_string())
    }

    /// Is `address` one of the owners
    pub fn is_owner(&self, address: &Address) -> bool {
        self.owners.binary_search(address).is_ok()
    }
}

/// Attributes plus the signatures over their canonical encoding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordPayload {
    /// Attribute map
    pub attributes: Attributes,
    /// (public key, signature) pairs
    pub signatures: Vec<Signature>,
}

impl RecordPayload {
    /// Canonical attribute bytes
    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        canonical::attributes_to_bytes(&self.attributes)
    }

    /// Content id of the attributes
    pub fn id(&self) -> Result<String> {
        Ok(crypto::content_hash(&self.canonical_bytes()?))
    }

    /// Bytes each owner signs
    pub fn sign_bytes(&self) -> Result<[u8; 32]> {
        Ok(crypto::double_hash(&self.canonical_bytes()?))
    }

    /// Attach a signature from `keypair`
    pub fn sign(mut self, keypair: &crypto::KeyPair) -> Result<Self> {
        let sign_bytes = self.sign_bytes()?;
        self.signatures.push(keypair.sign(&sign_bytes));
        Ok(self)
    }
}

/// Check the required attributes
pub fn validate_attributes(attributes: &Attributes) -> Result<()> {
    for key in REQUIRED_ATTRIBUTES {
        match attributes.get(key).and_then(Value::as_str) {
            Some(value) if !value.is_empty() => {}
            _ => {
                return Err(Error::InvalidInput(format!(
                    "Record attribute '{}' must be a non-empty string",
                    key
                )))
            }
        }
    }
    Ok(())
}

fn record_key(id: &str) -> Vec<u8> {
    keys::key(keys::NAMESERVICE, keys::nameservice::RECORD, id.as_bytes())
}

fn bond_index_key(bond_id: &str, record_id: &str) -> Vec<u8> {
    keys::index_key(
        keys::NAMESERVICE,
        keys::nameservice::BOND_RECORDS,
        bond_id.as_bytes(),
        record_id.as_bytes(),
    )
}

/// Load a record including tombstones
pub(crate) fn load_record(store: &dyn KvStore, id: &str) -> Result<Option<Record>> {
    store.get_value(&record_key(id))
}

/// Load a record including tombstones, failing with `NotFound`
pub(crate) fn require_record(store: &dyn KvStore, id: &str) -> Result<Record> {
    load_record(store, id)?.ok_or_else(|| Error::NotFound(format!("Record {} not found", id)))
}

/// Store a record and note it in the changeset
pub(crate) fn put_record(ctx: &mut Context<'_>, record: &Record) -> Result<()> {
    ctx.store.put_value(&record_key(&record.id), record)?;
    changeset::track_record(ctx, &record.id)?;
    tracing::debug!(record_id = %record.id, deleted = record.deleted, "Record stored");
    Ok(())
}

/// Store a record imported at genesis with its bond index and queue slot
pub(crate) fn import_record(store: &mut dyn KvStore, record: &Record) -> Result<()> {
    let id = crypto::content_hash(&canonical::attributes_to_bytes(&record.attributes)?);
    if id != record.id {
        return Err(Error::InvalidInput(format!(
            "Record {} does not match its attributes ({})",
            record.id, id
        )));
    }
    store.put_value(&record_key(&record.id), record)?;
    if let Some(bond_id) = &record.bond_id {
        index_bond(store, bond_id, &record.id)?;
    }
    if !record.deleted {
        rent::enqueue(store, &record.expiry_time, &record.id)?;
    }
    Ok(())
}

/// Live record by id
pub fn get_record(store: &dyn KvStore, id: &str) -> Result<Option<Record>> {
    Ok(load_record(store, id)?.filter(|record| !record.deleted))
}

/// Live record exists
pub fn has_record(store: &dyn KvStore, id: &str) -> Result<bool> {
    Ok(get_record(store, id)?.is_some())
}

/// Every record, optionally including tombstones
pub fn list_records(store: &dyn KvStore, include_deleted: bool) -> Result<Vec<Record>> {
    let records: Vec<Record> =
        store.values_with_prefix(&keys::prefix(keys::NAMESERVICE, keys::nameservice::RECORD))?;
    Ok(records
        .into_iter()
        .filter(|record| include_deleted || !record.deleted)
        .collect())
}

/// Add a record to a bond's index
pub(crate) fn index_bond(store: &mut dyn KvStore, bond_id: &str, record_id: &str) -> Result<()> {
    store.set(&bond_index_key(bond_id, record_id), &[])
}

/// Remove a record from a bond's index
pub(crate) fn unindex_bond(store: &mut dyn KvStore, bond_id: &str, record_id: &str) -> Result<()> {
    store.delete(&bond_index_key(bond_id, record_id))
}

/// Ids of the records indexed under a bond
pub fn record_ids_by_bond(store: &dyn KvStore, bond_id: &str) -> Result<Vec<String>> {
    let prefix = keys::index_prefix(
        keys::NAMESERVICE,
        keys::nameservice::BOND_RECORDS,
        bond_id.as_bytes(),
    );
    store
        .keys_with_prefix(&prefix)?
        .into_iter()
        .map(|id| {
            String::from_utf8(id).map_err(|e| Error::Internal(format!("Malformed index key: {}", e)))
        })
        .collect()
}

/// Records indexed under a bond, including tombstones
pub fn records_by_bond(store: &dyn KvStore, bond_id: &str) -> Result<Vec<Record>> {
    record_ids_by_bond(store, bond_id)?
        .iter()
        .map(|id| require_record(store, id))
        .collect()
}

/// Does any record reference the bond
pub fn bond_in_use(store: &dyn KvStore, bond_id: &str) -> Result<bool> {
    let prefix = keys::index_prefix(
        keys::NAMESERVICE,
        keys::nameservice::BOND_RECORDS,
        bond_id.as_bytes(),
    );
    Ok(!store.iter_prefix(&prefix)?.is_empty())
}

/// Create a record, or return the existing one with the same attributes
///
/// The record is funded from `bond_id` before it is stored; without a usable
/// bond nothing is persisted.
pub fn set_record(
    ctx: &mut Context<'_>,
    payload: &RecordPayload,
    bond_id: Option<&str>,
    signer: &Signer,
) -> Result<Record> {
    let id = payload.id()?;
    if let Some(existing) = load_record(ctx.store, &id)? {
        tracing::debug!(record_id = %id, "Record already exists");
        return Ok(existing);
    }

    if payload.signatures.is_empty() {
        return Err(Error::Unauthorized("Record must be signed".into()));
    }
    let sign_bytes = payload.sign_bytes()?;
    let mut owners = BTreeSet::new();
    for signature in &payload.signatures {
        if !crypto::verify_signature(&sign_bytes, signature) {
            return Err(Error::Unauthorized(format!(
                "Invalid signature from {}",
                signature.address()
            )));
        }
        owners.insert(signature.address());
    }

    validate_attributes(&payload.attributes)?;

    let bond_id = bond_id
        .filter(|bond_id| !bond_id.is_empty())
        .ok_or_else(|| Error::Unauthorized("Bond not found".into()))?;

    let now = ctx.now();
    let mut record = Record {
        id,
        attributes: payload.attributes.clone(),
        owners: owners.into_iter().collect(),
        bond_id: Some(bond_id.to_string()),
        create_time: now,
        expiry_time: now,
        deleted: false,
    };
    rent::process_record(ctx, &mut record, false)?;

    tracing::info!(
        record_id = %record.id,
        bond_id = %bond_id,
        sender = %signer.address,
        "Record created"
    );
    Ok(record)
}

/// Reactivate an expired record against its bond
pub fn renew_record(ctx: &mut Context<'_>, id: &str, signer: &Signer) -> Result<Record> {
    let mut record = require_record(ctx.store, id)?;

    if !record.is_owner(&signer.address) {
        return Err(Error::Unauthorized(format!(
            "{} is not an owner of record {}",
            signer.address, id
        )));
    }
    if !record.deleted || record.expiry_time > ctx.now() {
        return Err(Error::Conflict(format!("Renewal not required for record {}", id)));
    }
    if record.bond_id.is_none() {
        return Err(Error::Unauthorized("Bond not found".into()));
    }

    rent::process_record(ctx, &mut record, true)?;
    tracing::info!(record_id = %id, "Record renewed");
    Ok(record)
}

/// Attribute predicate for [`match_records`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordQuery {
    /// Key/value pairs to match; `version` is a constraint
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
    /// Include deleted records
    #[serde(default)]
    pub all: bool,
}

impl RecordQuery {
    /// Query on one attribute
    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }
}

fn values_match(stored: &Value, wanted: &Value) -> bool {
    if let (Some(a), Some(b)) = (canonical::reference_id(stored), canonical::reference_id(wanted)) {
        return a == b;
    }
    match (stored, wanted) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => a == b,
        },
        _ => stored == wanted,
    }
}

fn matches_field(record: &Record, key: &str, wanted: &Value) -> bool {
    match key {
        "bondId" => wanted.as_str() == Some(record.bond_id.as_deref().unwrap_or_default()),
        "expiryTime" => wanted.as_str() == Some(record.expiry_time.to_rfc3339().as_str()),
        _ => record
            .attributes
            .get(key)
            .map_or(false, |stored| values_match(stored, wanted)),
    }
}

/// Full scan with attribute equality and a `version` constraint
pub fn match_records(store: &dyn KvStore, query: &RecordQuery) -> Result<Vec<Record>> {
    let constraint = match query.attributes.get("version") {
        Some(Value::String(expr)) => match VersionConstraint::parse(expr) {
            Some(constraint) => Some(constraint),
            None => return Ok(Vec::new()),
        },
        Some(_) => return Ok(Vec::new()),
        None => None,
    };

    let candidates: Vec<Record> = list_records(store, query.all)?
        .into_iter()
        .filter(|record| {
            query
                .attributes
                .iter()
                .filter(|(key, _)| key.as_str() != "version")
                .all(|(key, wanted)| matches_field(record, key, wanted))
        })
        .filter(|record| match &constraint {
            Some(constraint) => record
                .attribute_str("version")
                .map_or(false, |v| constraint.admits(v)),
            None => true,
        })
        .collect();

    if constraint != Some(VersionConstraint::Latest) {
        return Ok(candidates);
    }

    let mut latest: BTreeMap<(String, String), (Version, Record)> = BTreeMap::new();
    for record in candidates {
        let Some(version) = record.version() else {
            continue;
        };
        match latest.get(&record.base_name()) {
            Some((best, kept)) if *best > version || (*best == version && kept.id <= record.id) => {}
            _ => {
                latest.insert(record.base_name(), (version, record));
            }
        }
    }
    Ok(latest.into_values().map(|(_, record)| record).collect())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{
        bank, bond,
        crypto::KeyPair,
        params::Params,
        store::MemStore,
        types::{BlockHeader, Coins},
    };
    use chrono::TimeZone;
    use serde_json::json;

    pub(crate) fn header(height: u64) -> BlockHeader {
        BlockHeader::new(
            "registry-test",
            height,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::hours(height as i64),
        )
    }

    pub(crate) fn signer(keypair: &KeyPair, sequence: u64) -> Signer {
        Signer::new(keypair.public_key().to_vec(), 0, sequence)
    }

    pub(crate) fn payload(name: &str, version: &str, keypair: &KeyPair) -> RecordPayload {
        let mut attributes = Attributes::new();
        attributes.insert("type".into(), json!("wrn:bot"));
        attributes.insert("name".into(), json!(name));
        attributes.insert("version".into(), json!(version));
        RecordPayload {
            attributes,
            signatures: vec![],
        }
        .sign(keypair)
        .unwrap()
    }

    /// Funded account plus a bond holding `amount`
    pub(crate) fn funded_bond(store: &mut MemStore, keypair: &KeyPair, amount: &str) -> String {
        bank::add_coins(store, &keypair.address(), &Coins::parse("1000wire").unwrap()).unwrap();
        let mut ctx = Context::new(store, header(1), Params::default());
        bond::create_bond(&mut ctx, &Coins::parse(amount).unwrap(), &signer(keypair, 0))
            .unwrap()
            .id
    }

    #[test]
    fn test_set_record_without_bond_rejected() {
        let mut store = MemStore::new();
        let keypair = KeyPair::from_seed(&[1u8; 32]);
        let payload = payload("n", "1.0.0", &keypair);

        let mut ctx = Context::new(&mut store, header(1), Params::default());
        let err = set_record(&mut ctx, &payload, None, &signer(&keypair, 0)).unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));

        let err =
            set_record(&mut ctx, &payload, Some("missing"), &signer(&keypair, 0)).unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));
        assert!(load_record(&store, &payload.id().unwrap()).unwrap().is_none());
    }

    #[test]
    fn test_set_record_charges_rent() {
        let mut store = MemStore::new();
        let keypair = KeyPair::from_seed(&[1u8; 32]);
        let bond_id = funded_bond(&mut store, &keypair, "10wire");
        let payload = payload("n", "1.0.0", &keypair);

        let mut ctx = Context::new(&mut store, header(2), Params::default());
        let record = set_record(&mut ctx, &payload, Some(&bond_id), &signer(&keypair, 1)).unwrap();

        assert_eq!(record.id, payload.id().unwrap());
        assert!(!record.deleted);
        assert_eq!(record.owners, vec![keypair.address()]);
        assert_eq!(record.expiry_time, header(2).time + Params::default().record.rent_period());

        let bond = bond::get_bond(&store, &bond_id).unwrap().unwrap();
        assert_eq!(bond.balance, Coins::parse("9wire").unwrap());
        assert!(has_record(&store, &record.id).unwrap());
        assert_eq!(record_ids_by_bond(&store, &bond_id).unwrap(), vec![record.id.clone()]);
        assert_eq!(
            bank::module_balance(&store, bank::RECORD_RENT_MODULE).unwrap(),
            Coins::parse("1wire").unwrap()
        );
    }

    #[test]
    fn test_set_record_idempotent() {
        let mut store = MemStore::new();
        let keypair = KeyPair::from_seed(&[1u8; 32]);
        let bond_id = funded_bond(&mut store, &keypair, "10wire");
        let payload = payload("n", "1.0.0", &keypair);

        let mut ctx = Context::new(&mut store, header(2), Params::default());
        let first = set_record(&mut ctx, &payload, Some(&bond_id), &signer(&keypair, 1)).unwrap();
        let second = set_record(&mut ctx, &payload, Some(&bond_id), &signer(&keypair, 2)).unwrap();

        assert_eq!(first, second);
        assert_eq!(list_records(&store, true).unwrap().len(), 1);
        let bond = bond::get_bond(&store, &bond_id).unwrap().unwrap();
        assert_eq!(bond.balance, Coins::parse("9wire").unwrap());
    }

    #[test]
    fn test_record_attributes_encoding() {
        let mut store = MemStore::new();
        let keypair = KeyPair::from_seed(&[1u8; 32]);
        let bond_id = funded_bond(&mut store, &keypair, "10wire");
        let mut ctx = Context::new(&mut store, header(2), Params::default());
        let record = set_record(&mut ctx, &payload("n", "1.0.0", &keypair), Some(&bond_id), &signer(&keypair, 1))
            .unwrap();

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["attributes"]["name"], json!("n"));
        assert_eq!(value["attributes"]["type"], json!("wrn:bot"));
        assert_eq!(serde_json::from_value::<Record>(value).unwrap(), record);

        let bytes = bincode::serialize(&record).unwrap();
        assert_eq!(bincode::deserialize::<Record>(&bytes).unwrap(), record);
    }

    #[test]
    fn test_set_record_insufficient_bond() {
        let mut store = MemStore::new();
        let keypair = KeyPair::from_seed(&[1u8; 32]);
        let bond_id = funded_bond(&mut store, &keypair, "0.5wire");
        let payload = payload("n", "1.0.0", &keypair);

        let mut ctx = Context::new(&mut store, header(2), Params::default());
        let err =
            set_record(&mut ctx, &payload, Some(&bond_id), &signer(&keypair, 1)).unwrap_err();
        assert!(matches!(err, Error::InsufficientFunds(_)));

        let id = payload.id().unwrap();
        assert!(!has_record(&store, &id).unwrap());
        assert!(load_record(&store, &id).unwrap().is_none());
        assert_eq!(
            bond::get_bond(&store, &bond_id).unwrap().unwrap().balance,
            Coins::parse("0.5wire").unwrap()
        );
    }

    #[test]
    fn test_set_record_validation() {
        let mut store = MemStore::new();
        let keypair = KeyPair::from_seed(&[1u8; 32]);
        let bond_id = funded_bond(&mut store, &keypair, "10wire");
        let mut ctx = Context::new(&mut store, header(2), Params::default());

        let unsigned = RecordPayload {
            attributes: payload("n", "1.0.0", &keypair).attributes,
            signatures: vec![],
        };
        assert!(matches!(
            set_record(&mut ctx, &unsigned, Some(&bond_id), &signer(&keypair, 1)),
            Err(Error::Unauthorized(_))
        ));

        let mut tampered = payload("n", "1.0.0", &keypair);
        tampered.attributes.insert("extra".into(), json!(1));
        assert!(matches!(
            set_record(&mut ctx, &tampered, Some(&bond_id), &signer(&keypair, 1)),
            Err(Error::Unauthorized(_))
        ));

        let missing_version = payload("n", "", &keypair);
        assert!(matches!(
            set_record(&mut ctx, &missing_version, Some(&bond_id), &signer(&keypair, 1)),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_multiple_signers_become_sorted_owners() {
        let mut store = MemStore::new();
        let a = KeyPair::from_seed(&[1u8; 32]);
        let b = KeyPair::from_seed(&[2u8; 32]);
        let bond_id = funded_bond(&mut store, &a, "10wire");

        let payload = payload("n", "1.0.0", &a).sign(&b).unwrap().sign(&a).unwrap();
        let mut ctx = Context::new(&mut store, header(2), Params::default());
        let record = set_record(&mut ctx, &payload, Some(&bond_id), &signer(&a, 1)).unwrap();

        let mut expected = vec![a.address(), b.address()];
        expected.sort();
        assert_eq!(record.owners, expected);
    }

    #[test]
    fn test_match_records_version_constraints() {
        let mut store = MemStore::new();
        let keypair = KeyPair::from_seed(&[1u8; 32]);
        let bond_id = funded_bond(&mut store, &keypair, "100wire");
        let mut ctx = Context::new(&mut store, header(2), Params::default());
        for (name, version) in [("a", "1.0.0"), ("a", "1.2.0"), ("a", "2.0.0"), ("b", "0.1.0"), ("b", "bad")] {
            set_record(&mut ctx, &payload(name, version, &keypair), Some(&bond_id), &signer(&keypair, 1))
                .unwrap();
        }

        let all = match_records(&store, &RecordQuery::default()).unwrap();
        assert_eq!(all.len(), 5);

        let star = match_records(&store, &RecordQuery::default().with("version", json!("*"))).unwrap();
        assert_eq!(star.len(), 4);

        let latest = match_records(&store, &RecordQuery::default().with("version", json!("latest"))).unwrap();
        let mut versions: Vec<String> = latest
            .iter()
            .map(|r| r.attribute_str("version").unwrap().to_string())
            .collect();
        versions.sort();
        assert_eq!(versions, vec!["0.1.0".to_string(), "2.0.0".to_string()]);

        let caret = match_records(
            &store,
            &RecordQuery::default()
                .with("name", json!("a"))
                .with("version", json!("^1.0.0")),
        )
        .unwrap();
        assert_eq!(caret.len(), 2);

        let broken = match_records(&store, &RecordQuery::default().with("version", json!(">=x"))).unwrap();
        assert!(broken.is_empty());

        let by_bond = match_records(&store, &RecordQuery::default().with("bondId", json!(bond_id))).unwrap();
        assert_eq!(by_bond.len(), 5);
    }

    #[test]
    fn test_match_records_typed_equality() {
        let mut store = MemStore::new();
        let keypair = KeyPair::from_seed(&[1u8; 32]);
        let bond_id = funded_bond(&mut store, &keypair, "100wire");

        let mut p = payload("n", "1.0.0", &keypair);
        p.attributes.insert("replicas".into(), json!(3));
        p.attributes
            .insert("parent".into(), json!({"type": "wrn:reference", "id": "abc"}));
        p.signatures.clear();
        let p = p.sign(&keypair).unwrap();

        let mut ctx = Context::new(&mut store, header(2), Params::default());
        set_record(&mut ctx, &p, Some(&bond_id), &signer(&keypair, 1)).unwrap();

        let hits = match_records(&store, &RecordQuery::default().with("replicas", json!(3.0))).unwrap();
        assert_eq!(hits.len(), 1);
        let hits = match_records(
            &store,
            &RecordQuery::default().with("parent", json!({"id": "abc", "type": "wrn:reference"})),
        )
        .unwrap();
        assert_eq!(hits.len(), 1);
        let misses = match_records(&store, &RecordQuery::default().with("replicas", json!("3"))).unwrap();
        assert!(misses.is_empty());
    }
}

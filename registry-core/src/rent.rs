//! Rent and expiry engine
//!
//! Activating a record charges one rent period from its bond and queues the
//! record at its expiry time. At the end of every block the queue is swept:
//! records whose bond can pay another period are renewed, the rest are
//! marked deleted. Bond association handlers live here too, since they
//! decide which bond the next charge comes from.

use crate::{
    bank, bond,
    context::{Context, Signer},
    keys,
    record::{self, Record},
    store::{KvStore, KvStoreExt},
    Error, Result,
};
use chrono::{DateTime, Utc};

fn queue_key(time: &DateTime<Utc>) -> Vec<u8> {
    keys::key(
        keys::NAMESERVICE,
        keys::nameservice::EXPIRY_QUEUE,
        &keys::time_bytes(time),
    )
}

/// Record ids queued at `time`
pub fn queued_at(store: &dyn KvStore, time: &DateTime<Utc>) -> Result<Vec<String>> {
    Ok(store.get_value(&queue_key(time))?.unwrap_or_default())
}

/// Queue a record for the sweep at `time`
pub(crate) fn enqueue(store: &mut dyn KvStore, time: &DateTime<Utc>, id: &str) -> Result<()> {
    let key = queue_key(time);
    let mut ids: Vec<String> = store.get_value(&key)?.unwrap_or_default();
    if !ids.iter().any(|queued| queued == id) {
        ids.push(id.to_string());
        store.put_value(&key, &ids)?;
    }
    Ok(())
}

/// Charge one rent period and (re)activate the record
///
/// Fails with `Unauthorized` when the bond is missing and with
/// `InsufficientFunds` when its balance cannot cover the rent; nothing is
/// written in either case.
pub(crate) fn process_record(ctx: &mut Context<'_>, record: &mut Record, renewal: bool) -> Result<()> {
    let bond_id = record
        .bond_id
        .clone()
        .ok_or_else(|| Error::Unauthorized("Bond not found".into()))?;
    let mut bond = bond::get_bond(ctx.store, &bond_id)?
        .ok_or_else(|| Error::Unauthorized("Bond not found".into()))?;

    let rent = ctx.params.record.record_rent.clone();
    bond::transfer_to_module(ctx.store, &mut bond, bank::RECORD_RENT_MODULE, &rent)?;

    let now = ctx.now();
    record.create_time = now;
    record.expiry_time = now + ctx.params.record.rent_period();
    record.deleted = false;

    record::put_record(ctx, record)?;
    enqueue(ctx.store, &record.expiry_time, &record.id)?;
    if !renewal {
        record::index_bond(ctx.store, &bond_id, &record.id)?;
    }

    tracing::debug!(
        record_id = %record.id,
        bond_id = %bond_id,
        rent = %rent,
        expiry = %record.expiry_time,
        "Rent charged"
    );
    Ok(())
}

/// Outcome of one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepSummary {
    /// Records charged for another period
    pub renewed: Vec<String>,
    /// Records marked deleted
    pub expired: Vec<String>,
}

fn mark_deleted(ctx: &mut Context<'_>, record: &mut Record) -> Result<()> {
    record.deleted = true;
    record::put_record(ctx, record)
}

/// Sweep every queue slot up to the block time
pub fn process_expiry_queue(ctx: &mut Context<'_>) -> Result<SweepSummary> {
    let queue_prefix = keys::prefix(keys::NAMESERVICE, keys::nameservice::EXPIRY_QUEUE);
    let limit = queue_key(&ctx.now());
    let due: Vec<(Vec<u8>, Vec<String>)> = ctx
        .store
        .iter_prefix(&queue_prefix)?
        .into_iter()
        .take_while(|(key, _)| *key <= limit)
        .map(|(key, value)| -> Result<(Vec<u8>, Vec<String>)> {
            Ok((key, bincode::deserialize(&value)?))
        })
        .collect::<Result<_>>()?;

    let mut summary = SweepSummary::default();
    for (slot, ids) in due {
        ctx.store.delete(&slot)?;

        for id in ids {
            let Some(mut record) = record::load_record(ctx.store, &id)? else {
                continue;
            };
            // Stale slot: the record was renewed after being queued here.
            if record.expiry_time > ctx.now() {
                continue;
            }

            let bond_usable = match &record.bond_id {
                Some(bond_id) => bond::get_bond(ctx.store, bond_id)?.is_some(),
                None => false,
            };
            if !bond_usable {
                if !record.deleted {
                    mark_deleted(ctx, &mut record)?;
                    summary.expired.push(id);
                }
                continue;
            }

            match process_record(ctx, &mut record, true) {
                Ok(()) => summary.renewed.push(id),
                Err(Error::InsufficientFunds(_)) if record.deleted => {}
                Err(Error::InsufficientFunds(_)) => {
                    mark_deleted(ctx, &mut record)?;
                    summary.expired.push(id);
                }
                Err(e) => return Err(e),
            }
        }
    }

    if !summary.renewed.is_empty() || !summary.expired.is_empty() {
        tracing::info!(
            height = ctx.height(),
            renewed = summary.renewed.len(),
            expired = summary.expired.len(),
            "Expiry queue processed"
        );
    }
    Ok(summary)
}

fn require_bond_owner(store: &dyn KvStore, bond_id: &str, signer: &Signer) -> Result<bond::Bond> {
    let bond = bond::require_bond(store, bond_id)?;
    if bond.owner != signer.address {
        return Err(Error::Unauthorized("Bond owner mismatch".into()));
    }
    Ok(bond)
}

fn requeue_if_deleted(ctx: &mut Context<'_>, record: &Record) -> Result<()> {
    if record.deleted {
        enqueue(ctx.store, &record.expiry_time, &record.id)?;
    }
    Ok(())
}

/// Fund an unbonded record from a bond the signer owns
pub fn associate_bond(
    ctx: &mut Context<'_>,
    record_id: &str,
    bond_id: &str,
    signer: &Signer,
) -> Result<Record> {
    let mut record = record::require_record(ctx.store, record_id)?;
    if record.bond_id.is_some() {
        return Err(Error::Conflict(format!(
            "Bond already exists for record {}",
            record_id
        )));
    }
    require_bond_owner(ctx.store, bond_id, signer)?;

    record.bond_id = Some(bond_id.to_string());
    record::put_record(ctx, &record)?;
    record::index_bond(ctx.store, bond_id, record_id)?;
    requeue_if_deleted(ctx, &record)?;

    tracing::info!(record_id, bond_id, "Bond associated");
    Ok(record)
}

/// Clear a record's bond
pub fn dissociate_bond(ctx: &mut Context<'_>, record_id: &str, signer: &Signer) -> Result<Record> {
    let mut record = record::require_record(ctx.store, record_id)?;
    let bond_id = record
        .bond_id
        .clone()
        .ok_or_else(|| Error::NotFound(format!("Record {} has no bond", record_id)))?;
    require_bond_owner(ctx.store, &bond_id, signer)?;

    record.bond_id = None;
    record::put_record(ctx, &record)?;
    record::unindex_bond(ctx.store, &bond_id, record_id)?;

    tracing::info!(record_id, bond_id = %bond_id, "Bond dissociated");
    Ok(record)
}

/// Clear the bond of every record it funds
pub fn dissociate_records(ctx: &mut Context<'_>, bond_id: &str, signer: &Signer) -> Result<usize> {
    require_bond_owner(ctx.store, bond_id, signer)?;

    let records = record::records_by_bond(ctx.store, bond_id)?;
    for mut record in records.iter().cloned() {
        record.bond_id = None;
        record::put_record(ctx, &record)?;
        record::unindex_bond(ctx.store, bond_id, &record.id)?;
    }

    tracing::info!(bond_id, records = records.len(), "Records dissociated");
    Ok(records.len())
}

/// Move every record funded by one bond to another
pub fn reassociate_records(
    ctx: &mut Context<'_>,
    old_bond_id: &str,
    new_bond_id: &str,
    signer: &Signer,
) -> Result<usize> {
    require_bond_owner(ctx.store, old_bond_id, signer)?;
    require_bond_owner(ctx.store, new_bond_id, signer)?;

    let records = record::records_by_bond(ctx.store, old_bond_id)?;
    for mut record in records.iter().cloned() {
        record.bond_id = Some(new_bond_id.to_string());
        record::put_record(ctx, &record)?;
        record::unindex_bond(ctx.store, old_bond_id, &record.id)?;
        record::index_bond(ctx.store, new_bond_id, &record.id)?;
        requeue_if_deleted(ctx, &record)?;
    }

    tracing::info!(old_bond_id, new_bond_id, records = records.len(), "Records reassociated");
    Ok(records.len())
}

/// Records keep their bond from being cancelled
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordBondUsage;

impl bond::BondUsage for RecordBondUsage {
    fn module(&self) -> &'static str {
        "nameservice"
    }

    fn uses_bond(&self, store: &dyn KvStore, bond_id: &str) -> Result<bool> {
        record::bond_in_use(store, bond_id)
    }
}

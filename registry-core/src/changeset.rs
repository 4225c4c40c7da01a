//! Per-height change tracking
//!
//! Every handler that touches a record, a name binding or an authority notes
//! the id here so an external sync client can fetch only what changed.

use crate::{
    context::Context,
    keys,
    store::{KvStore, KvStoreExt},
    Result,
};
use serde::{Deserialize, Serialize};

/// Entity ids touched at one height
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BlockChangeset {
    /// Block height
    pub height: u64,
    /// Record ids
    pub records: Vec<String>,
    /// Name bindings (wrns)
    pub names: Vec<String>,
    /// Authority names
    pub name_authorities: Vec<String>,
}

enum Entry<'a> {
    Record(&'a str),
    Name(&'a str),
    Authority(&'a str),
}

fn changeset_key(height: u64) -> Vec<u8> {
    keys::key(
        keys::NAMESERVICE,
        keys::nameservice::CHANGESET,
        &height.to_be_bytes(),
    )
}

/// Changeset recorded at `height`, if anything changed
pub fn get_changeset(store: &dyn KvStore, height: u64) -> Result<Option<BlockChangeset>> {
    store.get_value(&changeset_key(height))
}

fn append(ctx: &mut Context<'_>, entry: Entry<'_>) -> Result<()> {
    let height = ctx.height();
    let key = changeset_key(height);
    let mut changeset: BlockChangeset = ctx
        .store
        .get_value(&key)?
        .unwrap_or_else(|| BlockChangeset {
            height,
            ..Default::default()
        });

    let (list, id) = match entry {
        Entry::Record(id) => (&mut changeset.records, id),
        Entry::Name(id) => (&mut changeset.names, id),
        Entry::Authority(id) => (&mut changeset.name_authorities, id),
    };
    if list.iter().any(|existing| existing == id) {
        return Ok(());
    }
    list.push(id.to_string());

    ctx.store.put_value(&key, &changeset)
}

/// Note a touched record
pub fn track_record(ctx: &mut Context<'_>, id: &str) -> Result<()> {
    append(ctx, Entry::Record(id))
}

/// Note a touched name binding
pub fn track_name(ctx: &mut Context<'_>, wrn: &str) -> Result<()> {
    append(ctx, Entry::Name(wrn))
}

/// Note a touched authority
pub fn track_authority(ctx: &mut Context<'_>, name: &str) -> Result<()> {
    append(ctx, Entry::Authority(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{params::Params, store::MemStore, types::BlockHeader};
    use chrono::Utc;

    #[test]
    fn test_changeset_per_height() {
        let mut store = MemStore::new();
        {
            let mut ctx = Context::new(
                &mut store,
                BlockHeader::new("test", 7, Utc::now()),
                Params::default(),
            );
            track_record(&mut ctx, "rec1").unwrap();
            track_record(&mut ctx, "rec1").unwrap();
            track_name(&mut ctx, "wrn://alice/app").unwrap();
            track_authority(&mut ctx, "alice").unwrap();
        }

        let changeset = get_changeset(&store, 7).unwrap().unwrap();
        assert_eq!(changeset.height, 7);
        assert_eq!(changeset.records, vec!["rec1".to_string()]);
        assert_eq!(changeset.names, vec!["wrn://alice/app".to_string()]);
        assert_eq!(changeset.name_authorities, vec!["alice".to_string()]);

        assert!(get_changeset(&store, 8).unwrap().is_none());
    }
}

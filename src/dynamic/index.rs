//! A single dynamic table's storage: one `Record` per id, kept in three
//! fixed orderings over segment locations. Unlike the typed `Index<T>`,
//! this collection holds no undo stack of its own -- a `DynamicDatabase`
//! owns one shared undo stack across every table, keyed by `(table name,
//! id)`, so mutation methods here are named `raw_*` to mark that undo
//! bookkeeping is the caller's responsibility.
//!
//! As with the typed index, only each record's segment location lives
//! in the `BTreeMap`s below; the bytes themselves are encoded through
//! [`crate::dynamic::record::encode_record`] and handed to the
//! segment's bump allocator, so a table survives a process restart.

use std::collections::BTreeMap;

use crate::dynamic::record::{
    decode_record, encode_i128, encode_record, key_by_id, key_by_primary_secondary,
    key_by_secondary_primary, Record,
};
use crate::error::{Error, Result};
use crate::segment::{Offset, Segment};

/// One table's collection and its three orderings: by id, by
/// `(primary, secondary, id)`, and by `(secondary, primary, id)`.
#[derive(Clone)]
pub struct DynamicIndex {
    locations: BTreeMap<u32, (Offset, u32)>,
    by_id: BTreeMap<Vec<u8>, u32>,
    by_primary: BTreeMap<Vec<u8>, u32>,
    by_secondary: BTreeMap<Vec<u8>, u32>,
}

impl DynamicIndex {
    pub(crate) fn new() -> DynamicIndex {
        DynamicIndex {
            locations: BTreeMap::new(),
            by_id: BTreeMap::new(),
            by_primary: BTreeMap::new(),
            by_secondary: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    fn load(&self, id: u32, segment: &Segment) -> Option<Record> {
        let &(offset, len) = self.locations.get(&id)?;
        Some(decode_record(segment.read_bytes(offset, len as usize)))
    }

    pub fn get(&self, id: u32, segment: &Segment) -> Option<Record> {
        self.load(id, segment)
    }

    /// This table's directory of `(id, offset, len)` triples, for the
    /// owning database's registry snapshot.
    pub(crate) fn locations(&self) -> Vec<(u32, Offset, u32)> {
        self.locations
            .iter()
            .map(|(&id, &(offset, len))| (id, offset, len))
            .collect()
    }

    /// Populate every ordering from a previously persisted directory,
    /// decoding each record once to rebuild the secondary keys.
    pub(crate) fn rehydrate(&mut self, entries: Vec<(u32, Offset, u32)>, segment: &Segment) -> Result<()> {
        for (id, offset, len) in entries {
            let rec = decode_record(segment.read_bytes(offset, len as usize));
            let (id_key, pri_key, sec_key) = Self::index_keys(&rec);
            self.by_id.insert(id_key, id);
            self.by_primary.insert(pri_key, id);
            self.by_secondary.insert(sec_key, id);
            self.locations.insert(id, (offset, len));
        }
        Ok(())
    }

    fn index_keys(rec: &Record) -> (Vec<u8>, Vec<u8>, Vec<u8>) {
        (
            key_by_id(rec.id),
            key_by_primary_secondary(rec.primary, rec.secondary, rec.id),
            key_by_secondary_primary(rec.primary, rec.secondary, rec.id),
        )
    }

    pub(crate) fn raw_insert(&mut self, rec: Record, segment: &mut Segment) -> Result<()> {
        if self.locations.contains_key(&rec.id) {
            return Err(Error::Uniqueness("id"));
        }
        let (id_key, pri_key, sec_key) = Self::index_keys(&rec);
        let bytes = encode_record(&rec);
        let offset = segment.allocator().alloc_bytes(&bytes)?;
        self.by_id.insert(id_key, rec.id);
        self.by_primary.insert(pri_key, rec.id);
        self.by_secondary.insert(sec_key, rec.id);
        self.locations.insert(rec.id, (offset, bytes.len() as u32));
        Ok(())
    }

    pub(crate) fn raw_remove(&mut self, id: u32, segment: &Segment) -> Result<Record> {
        let rec = self.load(id, segment).ok_or(Error::OutOfRange)?;
        self.locations.remove(&id);
        let (id_key, pri_key, sec_key) = Self::index_keys(&rec);
        self.by_id.remove(&id_key);
        self.by_primary.remove(&pri_key);
        self.by_secondary.remove(&sec_key);
        Ok(rec)
    }

    /// Remove whichever record currently occupies `id`, then insert
    /// `rec` in its place; used to apply a modify.
    pub(crate) fn raw_replace(&mut self, rec: Record, segment: &mut Segment) -> Result<Record> {
        let old = self.raw_remove(rec.id, segment)?;
        self.raw_insert(rec, segment)?;
        Ok(old)
    }

    pub fn iter_by_id<'a>(&'a self, segment: &'a Segment) -> impl Iterator<Item = Record> + 'a {
        self.by_id.values().filter_map(move |id| self.load(*id, segment))
    }

    pub fn iter_by_primary<'a>(&'a self, segment: &'a Segment) -> impl Iterator<Item = Record> + 'a {
        self.by_primary.values().filter_map(move |id| self.load(*id, segment))
    }

    pub fn iter_by_secondary<'a>(&'a self, segment: &'a Segment) -> impl Iterator<Item = Record> + 'a {
        self.by_secondary
            .values()
            .filter_map(move |id| self.load(*id, segment))
    }

    pub fn get_by_primary(&self, primary: i128, segment: &Segment) -> Result<Record> {
        self.find_by_primary(primary, segment).next().ok_or(Error::OutOfRange)
    }

    pub fn find_by_primary<'a>(&'a self, primary: i128, segment: &'a Segment) -> impl Iterator<Item = Record> + 'a {
        self.scan_prefix(&self.by_primary, &encode_i128(primary), segment)
    }

    pub fn get_by_secondary(&self, secondary: i128, segment: &Segment) -> Result<Record> {
        self.find_by_secondary(secondary, segment).next().ok_or(Error::OutOfRange)
    }

    pub fn find_by_secondary<'a>(
        &'a self,
        secondary: i128,
        segment: &'a Segment,
    ) -> impl Iterator<Item = Record> + 'a {
        self.scan_prefix(&self.by_secondary, &encode_i128(secondary), segment)
    }

    fn scan_prefix<'a>(
        &'a self,
        ordering: &'a BTreeMap<Vec<u8>, u32>,
        prefix: &[u8],
        segment: &'a Segment,
    ) -> impl Iterator<Item = Record> + 'a {
        let prefix = prefix.to_vec();
        ordering
            .range(prefix.clone()..)
            .take_while(move |(k, _)| k.starts_with(&prefix))
            .filter_map(move |(_, id)| self.load(*id, segment))
    }
}

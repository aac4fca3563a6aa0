//! Typed Index (C4): a multi-indexed collection of one object type,
//! with exactly one ordered unique index on `id` and zero or more
//! additional ordered (unique or non-unique) indices on computed keys.
//!
//! Secondary keys are extracted to an owned byte sequence and ordered
//! by plain byte-lexicographic comparison -- the same "encode, then let
//! the natural order of bytes decide" idiom this crate's teacher uses
//! for `Serialize`-backed on-disk orderings, just kept in a `BTreeMap`
//! instead of an on-disk Btree.
//!
//! The objects themselves, though, are not kept in that `BTreeMap` --
//! only each one's segment location is. `create`/`modify` encode the
//! object through [`Codec`] and hand the bytes to the segment's bump
//! allocator; `get`/`find` decode them back out of the mapping. That is
//! what lets an `Index<T>` survive a process restart: the `BTreeMap`
//! here is a directory, not the store.

use std::any::Any;
use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::segment::{Offset, Segment};
use crate::undo::{UndoStack, UndoState};

/// A row's primary key. Monotonically increasing within its index,
/// immutable once assigned.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId(pub u64);

/// Implemented by every object type stored in a [`crate::database::Database`].
pub trait Keyed {
    fn id(&self) -> ObjectId;
}

/// Lets an object type be written into and read back out of a mapped
/// segment. The same shape as the teacher's own `core::Serialize`
/// trait, adapted to hand back a freshly built value from `decode`
/// rather than mutating a reused one in place -- an `Index<T>` never
/// holds a spare `T` to decode into, only the bytes.
pub trait Codec: Sized {
    fn encode(&self, buf: &mut Vec<u8>);
    fn decode(buf: &[u8]) -> Result<Self>;
}

/// One secondary ordering: a name (for error messages and lookup by
/// name), a uniqueness flag, and an extractor from object to key bytes.
pub struct SecondaryIndexDef<T> {
    pub name: &'static str,
    pub unique: bool,
    pub key: Box<dyn Fn(&T) -> Vec<u8> + Send + Sync>,
}

struct SecondaryState<T> {
    def: SecondaryIndexDef<T>,
    entries: BTreeMap<Vec<u8>, Vec<ObjectId>>,
}

impl<T> SecondaryState<T> {
    fn insert(&mut self, obj: &T, id: ObjectId) -> Result<()> {
        let key = (self.def.key)(obj);
        let ids = self.entries.entry(key).or_insert_with(Vec::new);
        if self.def.unique && !ids.is_empty() {
            return Err(Error::Uniqueness(self.def.name));
        }
        ids.push(id);
        Ok(())
    }

    fn remove(&mut self, obj: &T, id: ObjectId) {
        let key = (self.def.key)(obj);
        if let Some(ids) = self.entries.get_mut(&key) {
            ids.retain(|&i| i != id);
            if ids.is_empty() {
                self.entries.remove(&key);
            }
        }
    }

    fn find_unique(&self, key: &[u8]) -> Option<ObjectId> {
        self.entries.get(key).and_then(|v| v.first().copied())
    }

    fn find_all(&self, key: &[u8]) -> &[ObjectId] {
        self.entries.get(key).map(|v| v.as_slice()).unwrap_or(&[])
    }
}

/// A single registered object type's collection, orderings and undo
/// stack. Constructed once per attach via
/// [`crate::database::Database::add_index`], and rehydrated from the
/// segment's registry if a previous attach already populated it.
pub struct Index<T: Keyed + Clone> {
    starting_id: u64,
    next_id: u64,
    locations: BTreeMap<ObjectId, (Offset, u32)>,
    secondaries: Vec<SecondaryState<T>>,
    undo: UndoStack<T>,
}

impl<T: Keyed + Clone + Codec + 'static> Index<T> {
    pub(crate) fn new(starting_id: u64, secondaries: Vec<SecondaryIndexDef<T>>) -> Index<T> {
        Index {
            starting_id,
            next_id: starting_id,
            locations: BTreeMap::new(),
            secondaries: secondaries
                .into_iter()
                .map(|def| SecondaryState {
                    def,
                    entries: BTreeMap::new(),
                })
                .collect(),
            undo: UndoStack::new(),
        }
    }

    /// Populate `locations` and the secondary orderings from a
    /// previously persisted directory, decoding each object once to
    /// rebuild the in-memory secondary keys.
    pub(crate) fn rehydrate(
        &mut self,
        entries: Vec<(ObjectId, Offset, u32)>,
        segment: &Segment,
    ) -> Result<()> {
        for (id, offset, len) in entries {
            let obj = T::decode(segment.read_bytes(offset, len as usize))?;
            self.insert_into_secondaries(&obj, id)?;
            self.locations.insert(id, (offset, len));
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    pub fn starting_id(&self) -> u64 {
        self.starting_id
    }

    pub fn get(&self, id: ObjectId, segment: &Segment) -> Result<T> {
        let &(offset, len) = self.locations.get(&id).ok_or(Error::OutOfRange)?;
        T::decode(segment.read_bytes(offset, len as usize))
    }

    pub fn find(&self, id: ObjectId, segment: &Segment) -> Option<T> {
        self.get(id, segment).ok()
    }

    fn secondary(&self, name: &str) -> Result<&SecondaryState<T>> {
        self.secondaries
            .iter()
            .find(|s| s.def.name == name)
            .ok_or(Error::NotRegistered(name.to_string()))
    }

    pub fn find_by_unique(&self, name: &str, key: &[u8], segment: &Segment) -> Result<Option<T>> {
        match self.secondary(name)?.find_unique(key) {
            Some(id) => Ok(Some(self.get(id, segment)?)),
            None => Ok(None),
        }
    }

    pub fn find_all_by(&self, name: &str, key: &[u8], segment: &Segment) -> Result<Vec<T>> {
        let ids = self.secondary(name)?.find_all(key).to_vec();
        ids.into_iter().map(|id| self.get(id, segment)).collect()
    }

    fn insert_into_secondaries(&mut self, obj: &T, id: ObjectId) -> Result<()> {
        let mut done = 0;
        for s in &mut self.secondaries {
            if let Err(err) = s.insert(obj, id) {
                for s2 in &mut self.secondaries[..done] {
                    s2.remove(obj, id);
                }
                return Err(err);
            }
            done += 1;
        }
        Ok(())
    }

    fn remove_from_secondaries(&mut self, obj: &T, id: ObjectId) {
        for s in &mut self.secondaries {
            s.remove(obj, id);
        }
    }

    fn store(&mut self, id: ObjectId, obj: &T, segment: &mut Segment) -> Result<()> {
        let mut buf = Vec::new();
        obj.encode(&mut buf);
        let offset = segment.allocator().alloc_bytes(&buf)?;
        self.locations.insert(id, (offset, buf.len() as u32));
        Ok(())
    }

    pub(crate) fn create(
        &mut self,
        init: impl FnOnce(ObjectId) -> T,
        has_session: bool,
        segment: &mut Segment,
    ) -> Result<T> {
        let id = ObjectId(self.next_id);
        let obj = init(id);
        self.insert_into_secondaries(&obj, id)?;
        self.store(id, &obj, segment)?;
        self.next_id += 1;
        if has_session {
            if let Some(state) = self.undo.top_mut() {
                state.new_ids.insert(id);
            }
        }
        Ok(obj)
    }

    pub(crate) fn modify(
        &mut self,
        id: ObjectId,
        mutator: impl FnOnce(&mut T),
        has_session: bool,
        segment: &mut Segment,
    ) -> Result<T> {
        let mut obj = self.get(id, segment)?;

        if has_session {
            let snapshot_needed = {
                let state = self.undo.top_mut().expect("session frame must exist");
                !state.new_ids.contains(&id)
                    && !state.old_values.contains_key(&id)
                    && !state.removed_values.contains_key(&id)
            };
            if snapshot_needed {
                let snap = obj.clone();
                self.undo.top_mut().unwrap().old_values.insert(id, snap);
            }
        }

        self.remove_from_secondaries(&obj, id);
        mutator(&mut obj);

        match self.insert_into_secondaries(&obj, id) {
            Ok(()) => {
                self.store(id, &obj, segment)?;
                Ok(obj)
            }
            Err(err) => {
                // Re-keying failed: the object cannot be left in an
                // inconsistent secondary-index position, so it is
                // dropped entirely rather than restored.
                self.locations.remove(&id);
                Err(err)
            }
        }
    }

    pub(crate) fn remove(&mut self, id: ObjectId, has_session: bool, segment: &Segment) -> Result<T> {
        let (offset, len) = self.locations.remove(&id).ok_or(Error::OutOfRange)?;
        let obj = T::decode(segment.read_bytes(offset, len as usize))?;
        self.remove_from_secondaries(&obj, id);

        if has_session {
            let state = self.undo.top_mut().expect("session frame must exist");
            if state.new_ids.remove(&id) {
                // Created and removed within the same session: no undo
                // record needed, the object never existed beforehand.
            } else if let Some(snap) = state.old_values.remove(&id) {
                state.removed_values.insert(id, snap);
            } else if !state.removed_values.contains_key(&id) {
                state.removed_values.insert(id, obj.clone());
            }
        }
        Ok(obj)
    }

    fn apply_undo(&mut self, state: UndoState<T>, segment: &mut Segment) {
        for id in state.new_ids {
            if let Some((offset, len)) = self.locations.remove(&id) {
                if let Ok(obj) = T::decode(segment.read_bytes(offset, len as usize)) {
                    self.remove_from_secondaries(&obj, id);
                }
            }
        }
        for (id, snap) in state.old_values {
            if let Some((offset, len)) = self.locations.remove(&id) {
                if let Ok(old) = T::decode(segment.read_bytes(offset, len as usize)) {
                    self.remove_from_secondaries(&old, id);
                }
            }
            self.insert_into_secondaries(&snap, id)
                .expect("undo snapshot must satisfy uniqueness");
            self.store(id, &snap, segment)
                .expect("segment write during undo must succeed");
        }
        for (id, snap) in state.removed_values {
            self.insert_into_secondaries(&snap, id)
                .expect("undo snapshot must satisfy uniqueness");
            self.store(id, &snap, segment)
                .expect("segment write during undo must succeed");
        }
        self.next_id = state.old_next_id;
    }

    fn squash_into_parent(&mut self, top: UndoState<T>) {
        let parent = self
            .undo
            .top_mut()
            .expect("parent frame must exist for an inner squash");
        for id in top.new_ids {
            parent.new_ids.insert(id);
        }
        for (id, snap) in top.old_values {
            if !parent.old_values.contains_key(&id) && !parent.removed_values.contains_key(&id) {
                parent.old_values.insert(id, snap);
            }
        }
        for (id, snap) in top.removed_values {
            if parent.new_ids.remove(&id) {
                // The object never existed from the parent's perspective.
            } else if !parent.old_values.contains_key(&id)
                && !parent.removed_values.contains_key(&id)
            {
                parent.removed_values.insert(id, snap);
            }
        }
        // parent.old_next_id already holds the lower state's value, which wins.
    }
}

/// Type-erased session/commit/registry surface, implemented by every
/// `Index<T>` so a [`crate::database::Database`] can fan out undo
/// operations and registry checkpoints across its heterogeneous
/// registered indices.
pub(crate) trait IndexOps: Any {
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn start_undo(&mut self, revision: u64);
    fn end_session(&mut self, pushed: bool, had_outer: bool, segment: &mut Segment);
    fn undo_once(&mut self, segment: &mut Segment) -> bool;
    fn commit(&mut self, revision: u64);
    #[allow(dead_code)]
    fn top_revision(&self) -> Option<u64>;
    /// This index's type name, current `next_id` and the directory of
    /// every live object's segment location, for writing into the
    /// segment's shared registry blob.
    fn registry_snapshot(&self) -> (String, u64, Vec<(ObjectId, Offset, u32)>);
}

impl<T: Keyed + Clone + Codec + 'static> IndexOps for Index<T> {
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn start_undo(&mut self, revision: u64) {
        self.undo.start(self.next_id, revision);
    }

    fn end_session(&mut self, pushed: bool, had_outer: bool, segment: &mut Segment) {
        let state = match self.undo.pop() {
            Some(s) => s,
            None => return,
        };
        if !pushed {
            self.apply_undo(state, segment);
        } else if had_outer {
            self.squash_into_parent(state);
        } else {
            self.undo.push_back(state);
        }
    }

    fn undo_once(&mut self, segment: &mut Segment) -> bool {
        match self.undo.pop() {
            Some(state) => {
                self.apply_undo(state, segment);
                true
            }
            None => false,
        }
    }

    fn commit(&mut self, revision: u64) {
        self.undo.commit(revision);
    }

    fn top_revision(&self) -> Option<u64> {
        self.undo.top_revision()
    }

    fn registry_snapshot(&self) -> (String, u64, Vec<(ObjectId, Offset, u32)>) {
        let name = std::any::type_name::<T>().to_string();
        let locations = self
            .locations
            .iter()
            .map(|(&id, &(offset, len))| (id, offset, len))
            .collect();
        (name, self.next_id, locations)
    }
}

/// Encode one index's registry entry: name, `next_id`, then its
/// directory of `(id, offset, len)` triples.
pub(crate) fn encode_registry_entry(
    name: &str,
    next_id: u64,
    locations: &[(ObjectId, Offset, u32)],
    out: &mut Vec<u8>,
) {
    out.extend_from_slice(&(name.len() as u32).to_le_bytes());
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(&next_id.to_le_bytes());
    out.extend_from_slice(&(locations.len() as u32).to_le_bytes());
    for &(ObjectId(id), Offset(offset), len) in locations {
        out.extend_from_slice(&id.to_le_bytes());
        out.extend_from_slice(&offset.to_le_bytes());
        out.extend_from_slice(&len.to_le_bytes());
    }
}

/// Decode one registry entry starting at `buf[0]`, returning the name,
/// `next_id`, directory and number of bytes consumed.
pub(crate) fn decode_registry_entry(
    buf: &[u8],
) -> (String, u64, Vec<(ObjectId, Offset, u32)>, usize) {
    let mut pos = 0usize;
    let name_len = u32::from_le_bytes(buf[pos..pos + 4].try_into().unwrap()) as usize;
    pos += 4;
    let name = String::from_utf8_lossy(&buf[pos..pos + name_len]).into_owned();
    pos += name_len;
    let next_id = u64::from_le_bytes(buf[pos..pos + 8].try_into().unwrap());
    pos += 8;
    let count = u32::from_le_bytes(buf[pos..pos + 4].try_into().unwrap()) as usize;
    pos += 4;
    let mut locations = Vec::with_capacity(count);
    for _ in 0..count {
        let id = u64::from_le_bytes(buf[pos..pos + 8].try_into().unwrap());
        pos += 8;
        let offset = u64::from_le_bytes(buf[pos..pos + 8].try_into().unwrap());
        pos += 8;
        let len = u32::from_le_bytes(buf[pos..pos + 4].try_into().unwrap());
        pos += 4;
        locations.push((ObjectId(id), Offset(offset), len));
    }
    (name, next_id, locations, pos)
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod mod_test;

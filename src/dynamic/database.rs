//! Dynamic Database (C9): many named tables sharing one undo stack,
//! keyed by `(table, id)` instead of the single-type-space undo a typed
//! `Index<T>` keeps to itself. The three-phase apply and squash-on-push
//! rules are identical to [`crate::index`]'s, just applied across a
//! composite key space so one session can span several tables.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::dynamic::record::{CompareMode, Record};
use crate::dynamic::table::Table;
use crate::error::{Error, Result};
use crate::segment::{Offset, Segment};

type RowKey = (String, u32);

struct DynUndoState {
    new_ids: BTreeSet<RowKey>,
    old_values: BTreeMap<RowKey, Record>,
    removed_values: BTreeMap<RowKey, Record>,
    old_next_ids: BTreeMap<String, u32>,
    /// Tables created during this session -- dropped outright on undo.
    new_tables: BTreeSet<String>,
    /// Tables removed during this session, snapshotted whole so undo can
    /// reinsert them with their rows and id counter intact.
    removed_tables: BTreeMap<String, Table>,
    revision: u64,
}

impl DynUndoState {
    fn new(revision: u64) -> DynUndoState {
        DynUndoState {
            new_ids: BTreeSet::new(),
            old_values: BTreeMap::new(),
            removed_values: BTreeMap::new(),
            old_next_ids: BTreeMap::new(),
            new_tables: BTreeSet::new(),
            removed_tables: BTreeMap::new(),
            revision,
        }
    }
}

/// Many named dynamic tables plus the one undo stack shared across all
/// of them. Not `Sync`; callers serialize externally, same discipline
/// as [`crate::database::Database`].
pub struct DynamicDatabase {
    tables: HashMap<String, Table>,
    undo: Vec<DynUndoState>,
    next_revision: u64,
}

impl DynamicDatabase {
    pub fn new() -> DynamicDatabase {
        DynamicDatabase {
            tables: HashMap::new(),
            undo: Vec::new(),
            next_revision: 0,
        }
    }

    pub fn create_table(
        &mut self,
        name: &str,
        primary_compare: CompareMode,
        secondary_compare: CompareMode,
    ) -> Result<()> {
        if self.tables.contains_key(name) {
            return Err(Error::AlreadyRegistered(name.to_string()));
        }
        self.tables.insert(
            name.to_string(),
            Table::new(name.to_string(), primary_compare, secondary_compare),
        );
        if let Some(state) = self.undo.last_mut() {
            state.new_tables.insert(name.to_string());
        }
        Ok(())
    }

    pub fn remove_table(&mut self, name: &str) -> Result<()> {
        let table = self
            .tables
            .remove(name)
            .ok_or_else(|| Error::NotRegistered(name.to_string()))?;
        if let Some(state) = self.undo.last_mut() {
            if state.new_tables.remove(name) {
                // Created and removed within the same session: no undo
                // record needed, the table never existed beforehand.
            } else if !state.removed_tables.contains_key(name) {
                state.removed_tables.insert(name.to_string(), table);
            }
        }
        Ok(())
    }

    pub fn table(&self, name: &str) -> Result<&Table> {
        self.tables
            .get(name)
            .ok_or_else(|| Error::NotRegistered(name.to_string()))
    }

    /// Every table this database currently holds, its `next_id` and its
    /// directory of `(id, offset, len)` triples, for the owning shell's
    /// registry snapshot.
    pub(crate) fn registry_snapshot(&self) -> Vec<(String, CompareMode, CompareMode, u32, Vec<(u32, Offset, u32)>)> {
        self.tables
            .values()
            .map(|t| {
                (
                    t.name.clone(),
                    t.primary_compare,
                    t.secondary_compare,
                    t.next_id,
                    t.index.locations(),
                )
            })
            .collect()
    }

    /// Materialize (or refresh) a table from a previously persisted
    /// directory -- used while rehydrating a shell at open time.
    pub(crate) fn rehydrate_table(
        &mut self,
        name: &str,
        primary_compare: CompareMode,
        secondary_compare: CompareMode,
        next_id: u32,
        entries: Vec<(u32, Offset, u32)>,
        segment: &Segment,
    ) -> Result<()> {
        let table = self
            .tables
            .entry(name.to_string())
            .or_insert_with(|| Table::new(name.to_string(), primary_compare, secondary_compare));
        table.rehydrate(next_id, entries, segment)
    }

    fn has_session(&self) -> bool {
        !self.undo.is_empty()
    }

    fn note_touch(&mut self, table: &str) {
        if self.undo.is_empty() {
            return;
        }
        let already_captured = self.undo.last().unwrap().old_next_ids.contains_key(table);
        if !already_captured {
            let next_id = self.tables.get(table).map(|t| t.next_id).unwrap_or(0);
            self.undo
                .last_mut()
                .unwrap()
                .old_next_ids
                .insert(table.to_string(), next_id);
        }
    }

    pub fn create_record(
        &mut self,
        table: &str,
        primary: i128,
        secondary: i128,
        value: Vec<u8>,
        segment: &mut Segment,
    ) -> Result<Record> {
        self.note_touch(table);
        let has_session = self.has_session();
        let t = self
            .tables
            .get_mut(table)
            .ok_or_else(|| Error::NotRegistered(table.to_string()))?;
        let id = t.next_id;
        let rec = Record::new(id, primary, secondary, value);
        t.index.raw_insert(rec.clone(), segment)?;
        t.next_id += 1;

        if has_session {
            self.undo
                .last_mut()
                .unwrap()
                .new_ids
                .insert((table.to_string(), id));
        }
        Ok(rec)
    }

    pub fn modify_record(
        &mut self,
        table: &str,
        id: u32,
        mutator: impl FnOnce(&mut Record),
        segment: &mut Segment,
    ) -> Result<Record> {
        self.note_touch(table);
        let has_session = self.has_session();
        let key = (table.to_string(), id);

        if has_session {
            let snapshot_needed = {
                let state = self.undo.last().expect("session frame must exist");
                !state.new_ids.contains(&key)
                    && !state.old_values.contains_key(&key)
                    && !state.removed_values.contains_key(&key)
            };
            if snapshot_needed {
                let snap = self
                    .tables
                    .get(table)
                    .ok_or_else(|| Error::NotRegistered(table.to_string()))?
                    .index
                    .get(id, segment)
                    .ok_or(Error::OutOfRange)?;
                self.undo.last_mut().unwrap().old_values.insert(key.clone(), snap);
            }
        }

        let t = self
            .tables
            .get_mut(table)
            .ok_or_else(|| Error::NotRegistered(table.to_string()))?;
        let mut rec = t.index.get(id, segment).ok_or(Error::OutOfRange)?;
        mutator(&mut rec);
        t.index.raw_replace(rec.clone(), segment)?;
        Ok(rec)
    }

    pub fn remove_record(&mut self, table: &str, id: u32, segment: &mut Segment) -> Result<Record> {
        self.note_touch(table);
        let has_session = self.has_session();
        let key = (table.to_string(), id);

        let t = self
            .tables
            .get_mut(table)
            .ok_or_else(|| Error::NotRegistered(table.to_string()))?;
        let rec = t.index.raw_remove(id, segment)?;

        if has_session {
            let state = self.undo.last_mut().expect("session frame must exist");
            if state.new_ids.remove(&key) {
                // created and removed within the same session
            } else if let Some(snap) = state.old_values.remove(&key) {
                state.removed_values.insert(key, snap);
            } else if !state.removed_values.contains_key(&key) {
                state.removed_values.insert(key, rec.clone());
            }
        }
        Ok(rec)
    }

    pub(crate) fn start_undo(&mut self, revision: u64) {
        self.undo.push(DynUndoState::new(revision));
    }

    fn apply_undo(&mut self, state: DynUndoState, segment: &mut Segment) {
        for name in state.new_tables {
            self.tables.remove(&name);
        }
        for (name, table) in state.removed_tables {
            self.tables.insert(name, table);
        }
        for (table, id) in state.new_ids {
            if let Some(t) = self.tables.get_mut(&table) {
                t.index.raw_remove(id, segment).ok();
            }
        }
        for ((table, id), snap) in state.old_values {
            if let Some(t) = self.tables.get_mut(&table) {
                t.index.raw_remove(id, segment).ok();
                t.index
                    .raw_insert(snap, segment)
                    .expect("undo snapshot must satisfy uniqueness");
            }
        }
        for ((table, _id), snap) in state.removed_values {
            if let Some(t) = self.tables.get_mut(&table) {
                t.index
                    .raw_insert(snap, segment)
                    .expect("undo snapshot must satisfy uniqueness");
            }
        }
        for (table, old_next_id) in state.old_next_ids {
            if let Some(t) = self.tables.get_mut(&table) {
                t.next_id = old_next_id;
            }
        }
    }

    fn squash_into_parent(&mut self, top: DynUndoState) {
        let parent = self.undo.last_mut().expect("parent frame must exist for an inner squash");
        for name in top.new_tables {
            parent.new_tables.insert(name);
        }
        for (name, table) in top.removed_tables {
            if parent.new_tables.remove(&name) {
                // The table never existed from the parent's perspective.
            } else if !parent.removed_tables.contains_key(&name) {
                parent.removed_tables.insert(name, table);
            }
        }
        for key in top.new_ids {
            parent.new_ids.insert(key);
        }
        for (key, snap) in top.old_values {
            if !parent.old_values.contains_key(&key) && !parent.removed_values.contains_key(&key) {
                parent.old_values.insert(key, snap);
            }
        }
        for (key, snap) in top.removed_values {
            if parent.new_ids.remove(&key) {
                // never existed from the parent's perspective
            } else if !parent.old_values.contains_key(&key) && !parent.removed_values.contains_key(&key) {
                parent.removed_values.insert(key, snap);
            }
        }
        for (table, old_next_id) in top.old_next_ids {
            parent.old_next_ids.entry(table).or_insert(old_next_id);
        }
    }

    pub(crate) fn end_session(&mut self, pushed: bool, had_outer: bool, segment: &mut Segment) {
        let state = match self.undo.pop() {
            Some(s) => s,
            None => return,
        };
        if !pushed {
            self.apply_undo(state, segment);
        } else if had_outer {
            self.squash_into_parent(state);
        } else {
            self.undo.push(state);
        }
    }

    pub fn undo_once(&mut self, segment: &mut Segment) -> bool {
        match self.undo.pop() {
            Some(state) => {
                self.apply_undo(state, segment);
                true
            }
            None => false,
        }
    }

    pub fn undo_all(&mut self, segment: &mut Segment) {
        while self.undo_once(segment) {}
    }

    pub fn commit(&mut self, revision: u64) {
        self.undo.retain(|s| s.revision > revision);
    }

    pub(crate) fn next_revision(&mut self) -> u64 {
        self.next_revision += 1;
        self.next_revision
    }

    pub(crate) fn has_session_pub(&self) -> bool {
        self.has_session()
    }
}

impl Default for DynamicDatabase {
    fn default() -> DynamicDatabase {
        DynamicDatabase::new()
    }
}

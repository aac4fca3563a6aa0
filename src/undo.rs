//! Undo Stack (C5): per-index stack of undo states capturing creates,
//! modifies and removes made during one session. `Index<T>` (see
//! `index` module) owns one `UndoStack<T>` and drives `apply`/`squash`
//! against its own collection; this module only holds the plain data.

use std::collections::{BTreeMap, BTreeSet};

use crate::index::ObjectId;

/// Snapshot of one session's worth of mutations against a single index.
pub(crate) struct UndoState<T> {
    pub(crate) new_ids: BTreeSet<ObjectId>,
    pub(crate) old_values: BTreeMap<ObjectId, T>,
    pub(crate) removed_values: BTreeMap<ObjectId, T>,
    pub(crate) old_next_id: u64,
    pub(crate) revision: u64,
}

impl<T> UndoState<T> {
    fn new(old_next_id: u64, revision: u64) -> UndoState<T> {
        UndoState {
            new_ids: BTreeSet::new(),
            old_values: BTreeMap::new(),
            removed_values: BTreeMap::new(),
            old_next_id,
            revision,
        }
    }
}

pub(crate) struct UndoStack<T> {
    states: Vec<UndoState<T>>,
}

impl<T> UndoStack<T> {
    pub(crate) fn new() -> UndoStack<T> {
        UndoStack { states: Vec::new() }
    }

    pub(crate) fn start(&mut self, old_next_id: u64, revision: u64) {
        self.states.push(UndoState::new(old_next_id, revision));
    }

    pub(crate) fn top_mut(&mut self) -> Option<&mut UndoState<T>> {
        self.states.last_mut()
    }

    pub(crate) fn pop(&mut self) -> Option<UndoState<T>> {
        self.states.pop()
    }

    pub(crate) fn push_back(&mut self, state: UndoState<T>) {
        self.states.push(state);
    }

    /// Discard every state whose revision is no longer reversible.
    pub(crate) fn commit(&mut self, revision: u64) {
        self.states.retain(|s| s.revision > revision);
    }

    pub(crate) fn top_revision(&self) -> Option<u64> {
        self.states.last().map(|s| s.revision)
    }
}

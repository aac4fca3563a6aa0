//! A named dynamic table: a [`DynamicIndex`] plus the bookkeeping that
//! is per-table rather than per-row -- its own id counter and the two
//! informational [`CompareMode`] tags it was created with.

use crate::dynamic::index::DynamicIndex;
use crate::dynamic::record::CompareMode;
use crate::error::Result;
use crate::segment::{Offset, Segment};

#[derive(Clone)]
pub struct Table {
    pub(crate) name: String,
    pub(crate) primary_compare: CompareMode,
    pub(crate) secondary_compare: CompareMode,
    pub(crate) next_id: u32,
    pub(crate) index: DynamicIndex,
}

impl Table {
    pub(crate) fn new(
        name: String,
        primary_compare: CompareMode,
        secondary_compare: CompareMode,
    ) -> Table {
        Table {
            name,
            primary_compare,
            secondary_compare,
            next_id: 1,
            index: DynamicIndex::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn primary_compare(&self) -> CompareMode {
        self.primary_compare
    }

    pub fn secondary_compare(&self) -> CompareMode {
        self.secondary_compare
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn index(&self) -> &DynamicIndex {
        &self.index
    }

    /// Restore `next_id` and every row this table had in a previous
    /// attach, decoding each one out of the segment to rebuild its
    /// secondary orderings.
    pub(crate) fn rehydrate(
        &mut self,
        next_id: u32,
        entries: Vec<(u32, Offset, u32)>,
        segment: &Segment,
    ) -> Result<()> {
        self.next_id = next_id;
        self.index.rehydrate(entries, segment)
    }
}

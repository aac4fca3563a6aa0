//! Dynamic (schema-less) variant of the object store (C7-C9): tables of
//! untyped [`Record`]s, each kept in three fixed orderings, all sharing
//! one undo stack per [`DynamicDatabase`] keyed by `(table, id)` pairs
//! instead of the single-type-space undo this crate's typed `Index<T>`
//! uses.

mod database;
mod index;
mod record;
mod table;

pub use database::DynamicDatabase;
pub use index::DynamicIndex;
pub use record::{CompareMode, Record};
pub use table::Table;

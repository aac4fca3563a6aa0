//! `chainbase`: an embedded, transactional, memory-mapped object store.
//!
//! The working set of a [`Database`] lives in a memory-mapped file, grouped
//! into strongly typed [`index::Index`]es -- each one primary key plus zero
//! or more secondary keys -- mutated only through `create`/`modify`/`remove`
//! and protected by a stack of [`database::UndoSession`]s that can revert any
//! sequence of mutations. [`Shell`] offers the same transactional surface
//! over a schema-less variant: named [`dynamic::DynamicDatabase`]s holding
//! named [`dynamic::Table`]s of untyped [`dynamic::Record`]s, so tables can
//! be created at runtime without recompiling against a Rust type.
//!
//! Concurrent attach from multiple processes to the same directory is
//! arbitrated by [`rwlock::LockBank`], a bank of inter-process read/write
//! locks held in a mapping separate from the data segment so that a crash
//! mid-write cannot corrupt lock state. [`fingerprint::Fingerprint`] guards
//! against reopening a segment written by an incompatible build, since the
//! mapped file stores offsets and layouts that are only meaningful to a
//! process with the same pointer width, endianness and layout version.

pub mod config;
pub mod database;
pub mod dynamic;
pub mod error;
pub mod fingerprint;
pub mod index;
pub mod rwlock;
pub mod segment;
pub mod shell;
mod undo;

pub use crate::config::Config;
pub use crate::database::{Database, UndoSession};
pub use crate::dynamic::{CompareMode, DynamicDatabase, DynamicIndex, Record, Table};
pub use crate::error::{Error, Result};
pub use crate::fingerprint::Fingerprint;
pub use crate::index::{Codec, Index, Keyed, ObjectId, SecondaryIndexDef};
pub use crate::segment::OpenMode;
pub use crate::shell::Shell;

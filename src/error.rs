use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by this crate, grouped along the same four kinds the
/// store distinguishes internally: environment, schema, data, concurrency.
#[derive(Debug, Error)]
pub enum Error {
    /// Store directory does not exist and the open mode cannot create it.
    #[error("store directory not found: {0:?}")]
    NotFound(PathBuf),

    /// The segment's on-disk fingerprint does not match this build.
    #[error("segment is incompatible with this build")]
    IncompatibleBuild,

    /// The backing file could not be grown to the requested size.
    #[error("failed to grow segment to {0} bytes")]
    GrowFailed(u64),

    /// A read-write attach could not take the exclusive process lock.
    #[error("store already in use by another writer")]
    AlreadyInUse,

    /// `add_index::<T>()` / `create_database` called twice for the same slot.
    #[error("already registered: {0}")]
    AlreadyRegistered(String),

    /// An operation referenced an index, table or database that was never
    /// registered on this handle.
    #[error("not registered: {0}")]
    NotRegistered(String),

    /// Attempted to register or mutate on a read-only attach.
    #[error("store is not writable")]
    NotWritable,

    /// A primary or secondary key collided with an existing entry.
    #[error("uniqueness constraint violated on index {0:?}")]
    Uniqueness(&'static str),

    /// `get` was called with an id that is not present in the index.
    #[error("id not found in index")]
    OutOfRange,

    /// Lock acquisition did not complete within the caller's timeout.
    #[error("timed out waiting for lock")]
    Timeout,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

//! Configuration for opening a store, in the fluent-builder shape used
//! throughout this crate's ambient stack (same shape as a `dgm::Config`:
//! a `Default` impl backed by named associated constants, and `set_*`
//! methods that return `&mut Self` for chaining).

use std::path::PathBuf;
use std::time::Duration;

/// Number of inter-process read/write locks held in the lock bank.
/// `CHAINBASE_NUM_RW_LOCKS` in the original design.
pub const NUM_RW_LOCKS: usize = 10;

#[derive(Clone, Debug)]
pub struct Config {
    dir: PathBuf,
    size: u64,
    num_rw_locks: usize,
    lock_wait: Duration,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            dir: PathBuf::new(),
            size: Self::DEFAULT_SIZE,
            num_rw_locks: NUM_RW_LOCKS,
            lock_wait: Self::DEFAULT_LOCK_WAIT,
        }
    }
}

impl Config {
    /// Default initial segment size for a fresh store: 8 MiB.
    pub const DEFAULT_SIZE: u64 = 8 * 1024 * 1024;

    /// Default timeout handed to `with_read_lock`/`with_write_lock` when
    /// the caller does not specify one.
    pub const DEFAULT_LOCK_WAIT: Duration = Duration::from_millis(500);

    pub fn new<P: Into<PathBuf>>(dir: P) -> Config {
        Config {
            dir: dir.into(),
            ..Default::default()
        }
    }

    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn num_rw_locks(&self) -> usize {
        self.num_rw_locks
    }

    pub fn lock_wait(&self) -> Duration {
        self.lock_wait
    }

    pub fn set_size(&mut self, size: u64) -> &mut Self {
        self.size = size;
        self
    }

    pub fn set_num_rw_locks(&mut self, n: usize) -> &mut Self {
        self.num_rw_locks = n;
        self
    }

    pub fn set_lock_wait(&mut self, wait: Duration) -> &mut Self {
        self.lock_wait = wait;
        self
    }
}

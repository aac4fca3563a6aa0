//! RW Lock Manager (C3): a bank of `N` inter-process read/write locks
//! held in a secondary mapping (`shared_memory.meta`), kept separate
//! from the data segment so a crash mid-write to the main file cannot
//! corrupt lock state.
//!
//! Each lock packs a reader count and latch/lock flags into one atomic
//! word, the same bit layout as a latch-and-spin gate: bits [0-61] are
//! the reader count, bit 62 is the latch, bit 63 is the write lock.
//! Unlike an in-process gate the word lives in shared memory, so a
//! timeout is layered on top of the spin instead of letting a stalled
//! holder spin forever.

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use fs4::FileExt;
use log::warn;
use memmap2::MmapMut;

use crate::error::{Error, Result};
use crate::segment::{OpenMode, META_FILE};

const MAGIC: u32 = 0x4348_4231; // "CHB1"
const HEADER_SIZE: usize = 16; // magic:u32, num_locks:u32, current_lock:u64
const LOCK_SIZE: usize = 8;
const CURRENT_LOCK_OFFSET: usize = 8;
const LOCKS_OFFSET: usize = HEADER_SIZE;
const HEADROOM: usize = 4096;

const LATCH_FLAG: u64 = 0x4000_0000_0000_0000;
const LOCK_FLAG: u64 = 0x8000_0000_0000_0000;
const LATCH_LOCK_FLAG: u64 = LATCH_FLAG | LOCK_FLAG;
const READERS_FLAG: u64 = 0x3FFF_FFFF_FFFF_FFFF;

const SPIN_SLEEP: Duration = Duration::from_micros(50);

pub struct LockBank {
    mmap: MmapMut,
    num_locks: usize,
    mode: OpenMode,
    _write_lock: Option<File>,
}

impl LockBank {
    pub fn open(dir: &Path, mode: OpenMode, num_locks: usize) -> Result<LockBank> {
        let path = dir.join(META_FILE);
        if mode == OpenMode::ReadOnly && !path.exists() {
            return Err(Error::NotFound(path));
        }

        let is_create = mode == OpenMode::ReadWrite && !path.exists();
        // The meta mapping must be writable even on a read-only store
        // attach: readers CAS the shared reader-count atomics in
        // `try_acquire_read`/`release_read`, so only the data segment
        // (`segment.rs`) is actually read-only for that mode, not the
        // lock bank.
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(mode == OpenMode::ReadWrite)
            .open(&path)?;

        // Process-wide exclusive attach lock: held for the lifetime of a
        // read-write handle, released (by the OS) when the fd is closed.
        let write_lock = if mode == OpenMode::ReadWrite {
            file.try_lock_exclusive().map_err(|_| Error::AlreadyInUse)?;
            Some(file.try_clone()?)
        } else {
            None
        };

        let needed = (HEADER_SIZE + num_locks * LOCK_SIZE + HEADROOM) as u64;
        let current_len = file.metadata()?.len();
        if mode == OpenMode::ReadWrite && needed > current_len {
            file.set_len(needed).map_err(|_| Error::GrowFailed(needed))?;
        }

        let mmap = unsafe { MmapMut::map_mut(&file)? };
        let bank = LockBank {
            mmap,
            num_locks,
            mode,
            _write_lock: write_lock,
        };

        if is_create {
            bank.write_header()?;
        } else {
            bank.verify_header()?;
        }
        Ok(bank)
    }

    fn write_header(&self) -> Result<()> {
        if self.mode == OpenMode::ReadOnly {
            return Err(Error::NotWritable);
        }
        let base = self.mmap.as_ptr() as *mut u8;
        unsafe {
            (base as *mut u32).write(MAGIC);
            (base.add(4) as *mut u32).write(self.num_locks as u32);
        }
        Ok(())
    }

    fn verify_header(&self) -> Result<()> {
        let magic = u32::from_ne_bytes(self.mmap[0..4].try_into().unwrap());
        let n = u32::from_ne_bytes(self.mmap[4..8].try_into().unwrap());
        if magic != MAGIC || n as usize != self.num_locks {
            return Err(Error::IncompatibleBuild);
        }
        Ok(())
    }

    fn current_atomic(&self) -> &AtomicU64 {
        unsafe { &*(self.mmap.as_ptr().add(CURRENT_LOCK_OFFSET) as *const AtomicU64) }
    }

    fn lock_atomic(&self, idx: usize) -> &AtomicU64 {
        unsafe { &*(self.mmap.as_ptr().add(LOCKS_OFFSET + idx * LOCK_SIZE) as *const AtomicU64) }
    }

    /// The lock bank's cursor: shared across every attached process via
    /// the meta mapping, advanced only by a successful write.
    pub fn get_current_lock(&self) -> usize {
        self.current_atomic().load(Ordering::SeqCst) as usize
    }

    fn advance_cursor(&self, n: usize) {
        self.current_atomic()
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| {
                Some((c + 1) % n as u64)
            })
            .ok();
    }

    pub fn with_read_lock<F, R>(&self, wait: Duration, f: F) -> Result<R>
    where
        F: FnOnce() -> R,
    {
        let idx = self.get_current_lock();
        let lock = self.lock_atomic(idx);
        let deadline = Instant::now() + wait;
        loop {
            if try_acquire_read(lock) {
                break;
            }
            if Instant::now() >= deadline {
                return Err(Error::Timeout);
            }
            std::thread::sleep(SPIN_SLEEP);
        }
        let result = f();
        release_read(lock);
        Ok(result)
    }

    pub fn with_write_lock<F, R>(&self, wait: Duration, f: F) -> Result<R>
    where
        F: FnOnce() -> R,
    {
        if self.mode == OpenMode::ReadOnly {
            return Err(Error::NotWritable);
        }
        let idx = self.get_current_lock();
        let lock = self.lock_atomic(idx);
        let deadline = Instant::now() + wait;

        loop {
            if try_acquire_latch(lock) {
                break;
            }
            if Instant::now() >= deadline {
                return Err(Error::Timeout);
            }
            std::thread::sleep(SPIN_SLEEP);
        }
        loop {
            if try_acquire_lock_after_latch(lock) {
                break;
            }
            if Instant::now() >= deadline {
                release_latch(lock);
                warn!("chainbase: write lock {} timed out waiting on readers", idx);
                return Err(Error::Timeout);
            }
            std::thread::sleep(SPIN_SLEEP);
        }

        let result = f();
        release_write(lock);
        self.advance_cursor(self.num_locks);
        Ok(result)
    }
}

fn try_acquire_read(lock: &AtomicU64) -> bool {
    let c = lock.load(Ordering::SeqCst);
    if c & LATCH_LOCK_FLAG != 0 {
        return false;
    }
    lock.compare_exchange(c, c + 1, Ordering::SeqCst, Ordering::SeqCst)
        .is_ok()
}

fn release_read(lock: &AtomicU64) {
    lock.fetch_sub(1, Ordering::SeqCst);
}

fn try_acquire_latch(lock: &AtomicU64) -> bool {
    let c = lock.load(Ordering::SeqCst);
    if c & LATCH_FLAG != 0 {
        return false;
    }
    lock.compare_exchange(c, c | LATCH_FLAG, Ordering::SeqCst, Ordering::SeqCst)
        .is_ok()
}

fn try_acquire_lock_after_latch(lock: &AtomicU64) -> bool {
    let c = lock.load(Ordering::SeqCst);
    if c & READERS_FLAG > 0 {
        return false;
    }
    lock.compare_exchange(c, c | LOCK_FLAG, Ordering::SeqCst, Ordering::SeqCst)
        .is_ok()
}

fn release_latch(lock: &AtomicU64) {
    lock.fetch_and(!LATCH_FLAG, Ordering::SeqCst);
}

fn release_write(lock: &AtomicU64) {
    lock.fetch_and(!LATCH_LOCK_FLAG, Ordering::SeqCst);
}

#[cfg(test)]
#[path = "rwlock_test.rs"]
mod rwlock_test;

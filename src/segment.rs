//! Mapped segment manager (C2): owns the backing file, grows it on
//! request, and exposes a bump allocator scoped to the mapping so that
//! everything handed out is an offset relative to the segment's own
//! base rather than a native pointer -- the file must stay meaningful
//! after being remapped at a different address, possibly in a
//! different process.
//!
//! Right after the fingerprint, the header carries two small pieces of
//! bump-allocator state: the cursor (next free byte) and the registry
//! root -- an offset/length pair pointing at the most recently written
//! index-registry blob (see `index::mod` and `dynamic::database`), or
//! `(0, 0)` if nothing has been registered yet. Both fields are what
//! let a fresh attach find the objects a previous attach wrote.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use log::{debug, warn};
use memmap2::{Mmap, MmapMut};

use crate::error::{Error, Result};
use crate::fingerprint::{Fingerprint, FINGERPRINT_SIZE};

pub const BIN_FILE: &str = "shared_memory.bin";
pub const META_FILE: &str = "shared_memory.meta";

/// Offset of the bump-allocator cursor, right after the fingerprint.
const CURSOR_OFFSET: usize = FINGERPRINT_SIZE;
/// Offset of the registry root pointer, right after the cursor.
const REGISTRY_OFFSET: usize = CURSOR_OFFSET + 8;
/// Offset of the registry blob's length, right after its root pointer.
const REGISTRY_LEN_OFFSET: usize = REGISTRY_OFFSET + 8;
/// First byte available to the allocator.
pub const ARENA_OFFSET: u64 = (REGISTRY_LEN_OFFSET + 8) as u64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpenMode {
    ReadOnly,
    ReadWrite,
}

/// A byte offset relative to the base of a segment. Never a native
/// pointer: the segment may be remapped at a different base address
/// between opens, or opened by a different process entirely.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Offset(pub u64);

enum Mapping {
    Writable(MmapMut),
    ReadOnly(Mmap),
}

impl Mapping {
    fn as_slice(&self) -> &[u8] {
        match self {
            Mapping::Writable(m) => &m[..],
            Mapping::ReadOnly(m) => &m[..],
        }
    }

    /// Only ever called on a `Writable` mapping -- every caller checks
    /// `Segment::mode` first, so the `ReadOnly` arm is unreachable.
    fn as_mut_slice(&mut self) -> &mut [u8] {
        match self {
            Mapping::Writable(m) => &mut m[..],
            Mapping::ReadOnly(_) => unreachable!("write attempted on a read-only mapping"),
        }
    }

    fn len(&self) -> usize {
        match self {
            Mapping::Writable(m) => m.len(),
            Mapping::ReadOnly(m) => m.len(),
        }
    }
}

/// The memory-mapped primary segment (`shared_memory.bin`).
pub struct Segment {
    path: PathBuf,
    file: File,
    mapping: Mapping,
    mode: OpenMode,
}

impl Segment {
    pub fn open(dir: &Path, mode: OpenMode, size: u64) -> Result<Segment> {
        if !dir.exists() && mode == OpenMode::ReadOnly {
            return Err(Error::NotFound(dir.to_path_buf()));
        }
        let path = dir.join(BIN_FILE);

        let is_create = mode == OpenMode::ReadWrite && !path.exists();
        if mode == OpenMode::ReadOnly && !path.exists() {
            return Err(Error::NotFound(path));
        }
        if mode == OpenMode::ReadWrite {
            std::fs::create_dir_all(dir)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(mode == OpenMode::ReadWrite)
            .create(mode == OpenMode::ReadWrite)
            .open(&path)?;

        let current_len = file.metadata()?.len();
        if mode == OpenMode::ReadWrite && size > current_len {
            file.set_len(size).map_err(|_| Error::GrowFailed(size))?;
            debug!("chainbase: grew {:?} to {} bytes", path, size);
        }

        let mapping = match mode {
            OpenMode::ReadWrite => Mapping::Writable(unsafe { MmapMut::map_mut(&file)? }),
            OpenMode::ReadOnly => Mapping::ReadOnly(unsafe { Mmap::map(&file)? }),
        };

        let mut segment = Segment {
            path,
            file,
            mapping,
            mode,
        };

        if is_create {
            segment.write_fingerprint()?;
            segment.write_cursor(ARENA_OFFSET)?;
            segment.set_registry(Offset(0), 0)?;
        } else {
            segment.verify_fingerprint()?;
        }

        Ok(segment)
    }

    pub fn len(&self) -> u64 {
        self.mapping.len() as u64
    }

    /// Grow the backing file and remap it. Never shrinks.
    pub fn grow(&mut self, new_size: u64) -> Result<()> {
        if self.mode == OpenMode::ReadOnly {
            return Err(Error::NotWritable);
        }
        if new_size <= self.len() {
            return Ok(());
        }
        self.file
            .set_len(new_size)
            .map_err(|_| Error::GrowFailed(new_size))?;
        self.mapping = Mapping::Writable(unsafe { MmapMut::map_mut(&self.file)? });
        warn!("chainbase: grew {:?} to {} bytes", self.path, new_size);
        Ok(())
    }

    fn write_fingerprint(&mut self) -> Result<()> {
        if self.mode == OpenMode::ReadOnly {
            return Err(Error::NotWritable);
        }
        let bytes = Fingerprint::current();
        self.mapping.as_mut_slice()[..FINGERPRINT_SIZE].copy_from_slice(bytes.as_bytes());
        Ok(())
    }

    fn verify_fingerprint(&self) -> Result<()> {
        Fingerprint::from_bytes(&self.mapping.as_slice()[..FINGERPRINT_SIZE]).verify()
    }

    fn read_cursor(&self) -> u64 {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&self.mapping.as_slice()[CURSOR_OFFSET..CURSOR_OFFSET + 8]);
        u64::from_le_bytes(buf)
    }

    fn write_cursor(&mut self, cursor: u64) -> Result<()> {
        if self.mode == OpenMode::ReadOnly {
            return Err(Error::NotWritable);
        }
        self.mapping.as_mut_slice()[CURSOR_OFFSET..CURSOR_OFFSET + 8]
            .copy_from_slice(&cursor.to_le_bytes());
        Ok(())
    }

    /// The most recently written index-registry blob: `(Offset(0), 0)`
    /// if nothing has ever been registered in this segment.
    pub fn registry(&self) -> (Offset, u64) {
        let buf = self.mapping.as_slice();
        let mut off_bytes = [0u8; 8];
        off_bytes.copy_from_slice(&buf[REGISTRY_OFFSET..REGISTRY_OFFSET + 8]);
        let mut len_bytes = [0u8; 8];
        len_bytes.copy_from_slice(&buf[REGISTRY_LEN_OFFSET..REGISTRY_LEN_OFFSET + 8]);
        (Offset(u64::from_le_bytes(off_bytes)), u64::from_le_bytes(len_bytes))
    }

    pub fn set_registry(&mut self, at: Offset, len: u64) -> Result<()> {
        if self.mode == OpenMode::ReadOnly {
            return Err(Error::NotWritable);
        }
        let buf = self.mapping.as_mut_slice();
        buf[REGISTRY_OFFSET..REGISTRY_OFFSET + 8].copy_from_slice(&at.0.to_le_bytes());
        buf[REGISTRY_LEN_OFFSET..REGISTRY_LEN_OFFSET + 8].copy_from_slice(&len.to_le_bytes());
        Ok(())
    }

    /// Hand out an allocator bound to this segment's arena.
    pub fn allocator(&mut self) -> Allocator<'_> {
        Allocator { segment: self }
    }

    pub fn read_bytes(&self, at: Offset, len: usize) -> &[u8] {
        let start = at.0 as usize;
        &self.mapping.as_slice()[start..start + len]
    }
}

/// Bump allocator over a segment's arena. Allocations never move or
/// shrink; the cursor is persisted in the segment header so it survives
/// a close/reopen cycle. Never reclaimed: compaction/GC of the mapped
/// file is out of scope, so a `modify`/`undo` that stops referencing a
/// previous allocation simply leaves it as dead space.
pub struct Allocator<'a> {
    segment: &'a mut Segment,
}

impl<'a> Allocator<'a> {
    pub fn alloc_bytes(&mut self, bytes: &[u8]) -> Result<Offset> {
        if self.segment.mode == OpenMode::ReadOnly {
            return Err(Error::NotWritable);
        }
        let cursor = self.segment.read_cursor();
        let needed = cursor + bytes.len() as u64;
        if needed > self.segment.len() {
            let new_size = (needed * 2).max(self.segment.len() * 2);
            self.segment.grow(new_size)?;
        }
        let start = cursor as usize;
        self.segment.mapping.as_mut_slice()[start..start + bytes.len()].copy_from_slice(bytes);
        self.segment.write_cursor(cursor + bytes.len() as u64)?;
        Ok(Offset(cursor))
    }
}

#[cfg(test)]
#[path = "segment_test.rs"]
mod segment_test;

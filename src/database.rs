//! Database Façade, static variant (C6): registers a static set of
//! typed indices, exposes create/modify/remove over them, propagates
//! every mutation into the matching index's undo stack, and owns the
//! session/commit API.
//!
//! A `Database` handle is deliberately `!Sync` in spirit: every public
//! method takes `&self` and relies on `RefCell`/`Cell` for interior
//! mutability, matching the single-writer discipline the rest of this
//! crate's lineage enforces with an atomic CAS guard (see `Mvcc`'s
//! `writers: AtomicU8`) -- callers use one handle per thread, or
//! serialize externally.

use std::any::TypeId;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::index::{
    decode_registry_entry, encode_registry_entry, Codec, Index, IndexOps, Keyed, ObjectId,
    SecondaryIndexDef,
};
use crate::rwlock::LockBank;
use crate::segment::{OpenMode, Offset, Segment, BIN_FILE, META_FILE};

struct SessionFrame {
    revision: u64,
    touched: RefCell<HashSet<TypeId>>,
    had_outer: bool,
}

type RegistryEntries = HashMap<String, (u64, Vec<(ObjectId, Offset, u32)>)>;

fn parse_registry(segment: &Segment) -> RegistryEntries {
    let (offset, len) = segment.registry();
    let mut map = HashMap::new();
    if len == 0 {
        return map;
    }
    let buf = segment.read_bytes(offset, len as usize);
    let mut pos = 0usize;
    let count = u32::from_le_bytes(buf[0..4].try_into().unwrap()) as usize;
    pos += 4;
    for _ in 0..count {
        let (name, next_id, locations, consumed) = decode_registry_entry(&buf[pos..]);
        pos += consumed;
        map.insert(name, (next_id, locations));
    }
    map
}

pub struct Database {
    mode: OpenMode,
    segment: RefCell<Segment>,
    lockbank: LockBank,
    indices: RefCell<HashMap<TypeId, Box<dyn IndexOps>>>,
    initial_registry: RefCell<RegistryEntries>,
    session_stack: RefCell<Vec<Rc<SessionFrame>>>,
    next_revision: Cell<u64>,
    lock_wait: Duration,
}

impl Database {
    pub fn open(dir: &Path, mode: OpenMode, size: u64) -> Result<Database> {
        Self::open_with(dir, mode, size, crate::config::NUM_RW_LOCKS, Duration::from_millis(500))
    }

    /// Open using a [`crate::config::Config`] in place of individual
    /// positional arguments.
    pub fn open_config(cfg: &crate::config::Config, mode: OpenMode) -> Result<Database> {
        Self::open_with(cfg.dir(), mode, cfg.size(), cfg.num_rw_locks(), cfg.lock_wait())
    }

    pub fn open_with(
        dir: &Path,
        mode: OpenMode,
        size: u64,
        num_rw_locks: usize,
        lock_wait: Duration,
    ) -> Result<Database> {
        let segment = Segment::open(dir, mode, size)?;
        let lockbank = LockBank::open(dir, mode, num_rw_locks)?;
        let initial_registry = parse_registry(&segment);
        Ok(Database {
            mode,
            segment: RefCell::new(segment),
            lockbank,
            indices: RefCell::new(HashMap::new()),
            initial_registry: RefCell::new(initial_registry),
            session_stack: RefCell::new(Vec::new()),
            next_revision: Cell::new(0),
            lock_wait,
        })
    }

    pub fn close(self) -> Result<()> {
        Ok(())
    }

    pub fn wipe(dir: &Path) -> Result<()> {
        std::fs::remove_file(dir.join(BIN_FILE)).ok();
        std::fs::remove_file(dir.join(META_FILE)).ok();
        Ok(())
    }

    fn checkpoint_registry(
        &self,
        segment: &mut Segment,
        indices: &HashMap<TypeId, Box<dyn IndexOps>>,
    ) -> Result<()> {
        if self.mode == OpenMode::ReadOnly {
            return Ok(());
        }
        let mut buf = Vec::new();
        buf.extend_from_slice(&(indices.len() as u32).to_le_bytes());
        for idx in indices.values() {
            let (name, next_id, locations) = idx.registry_snapshot();
            encode_registry_entry(&name, next_id, &locations, &mut buf);
        }
        let offset = segment.allocator().alloc_bytes(&buf)?;
        segment.set_registry(offset, buf.len() as u64)
    }

    /// Register a typed index for this attach. On a read-write attach
    /// this either materializes a fresh, empty index or rehydrates one
    /// a previous attach already populated. On a read-only attach it
    /// only ever rehydrates: there is nothing to create, so a type the
    /// segment has never seen is an error rather than an empty index.
    pub fn add_index<T: Keyed + Clone + Codec + 'static>(
        &self,
        secondaries: Vec<SecondaryIndexDef<T>>,
    ) -> Result<()> {
        let tag = TypeId::of::<T>();
        if self.indices.borrow().contains_key(&tag) {
            return Err(Error::AlreadyRegistered(std::any::type_name::<T>().into()));
        }

        let name = std::any::type_name::<T>();
        let persisted = self.initial_registry.borrow_mut().remove(name);
        if self.mode == OpenMode::ReadOnly && persisted.is_none() {
            return Err(Error::NotRegistered(name.to_string()));
        }
        let (starting_id, locations) = persisted.unwrap_or((0, Vec::new()));

        let mut index = Index::<T>::new(starting_id, secondaries);
        {
            let segment = self.segment.borrow();
            index.rehydrate(locations, &segment)?;
        }
        self.indices.borrow_mut().insert(tag, Box::new(index));

        if self.mode == OpenMode::ReadWrite {
            let mut segment = self.segment.borrow_mut();
            let indices = self.indices.borrow();
            self.checkpoint_registry(&mut segment, &indices)?;
        }
        Ok(())
    }

    fn note_touch<T: Keyed + Clone + 'static>(&self) {
        let frame = match self.session_stack.borrow().last().cloned() {
            Some(frame) => frame,
            None => return,
        };
        let tag = TypeId::of::<T>();
        let already_touched = frame.touched.borrow().contains(&tag);
        if !already_touched {
            frame.touched.borrow_mut().insert(tag);
            if let Some(idx) = self.indices.borrow_mut().get_mut(&tag) {
                idx.start_undo(frame.revision);
            }
        }
    }

    fn has_session(&self) -> bool {
        !self.session_stack.borrow().is_empty()
    }

    fn typed_index<T: Keyed + Clone + 'static>(
        indices: &mut HashMap<TypeId, Box<dyn IndexOps>>,
    ) -> Result<&mut Index<T>> {
        let tag = TypeId::of::<T>();
        let entry = indices
            .get_mut(&tag)
            .ok_or_else(|| Error::NotRegistered(std::any::type_name::<T>().into()))?;
        Ok(entry
            .as_any_mut()
            .downcast_mut::<Index<T>>()
            .expect("TypeId maps to its own Index<T>"))
    }

    pub fn create<T: Keyed + Clone + Codec + 'static>(
        &self,
        init: impl FnOnce(ObjectId) -> T,
    ) -> Result<T> {
        if self.mode == OpenMode::ReadOnly {
            return Err(Error::NotWritable);
        }
        self.note_touch::<T>();
        let has_session = self.has_session();
        let mut segment = self.segment.borrow_mut();
        let mut indices = self.indices.borrow_mut();
        let obj = Self::typed_index::<T>(&mut indices)?.create(init, has_session, &mut segment)?;
        self.checkpoint_registry(&mut segment, &indices)?;
        Ok(obj)
    }

    pub fn modify<T: Keyed + Clone + Codec + 'static>(
        &self,
        id: ObjectId,
        mutator: impl FnOnce(&mut T),
    ) -> Result<T> {
        if self.mode == OpenMode::ReadOnly {
            return Err(Error::NotWritable);
        }
        self.note_touch::<T>();
        let has_session = self.has_session();
        let mut segment = self.segment.borrow_mut();
        let mut indices = self.indices.borrow_mut();
        let obj = Self::typed_index::<T>(&mut indices)?.modify(id, mutator, has_session, &mut segment)?;
        self.checkpoint_registry(&mut segment, &indices)?;
        Ok(obj)
    }

    pub fn remove<T: Keyed + Clone + Codec + 'static>(&self, id: ObjectId) -> Result<T> {
        if self.mode == OpenMode::ReadOnly {
            return Err(Error::NotWritable);
        }
        self.note_touch::<T>();
        let has_session = self.has_session();
        let segment = self.segment.borrow();
        let mut indices = self.indices.borrow_mut();
        let obj = Self::typed_index::<T>(&mut indices)?.remove(id, has_session, &segment)?;
        drop(segment);
        let mut segment = self.segment.borrow_mut();
        self.checkpoint_registry(&mut segment, &indices)?;
        Ok(obj)
    }

    pub fn get<T: Keyed + Clone + Codec + 'static>(&self, id: ObjectId) -> Result<T> {
        let segment = self.segment.borrow();
        let mut indices = self.indices.borrow_mut();
        Self::typed_index::<T>(&mut indices)?.get(id, &segment)
    }

    pub fn find<T: Keyed + Clone + Codec + 'static>(&self, id: ObjectId) -> Result<Option<T>> {
        let segment = self.segment.borrow();
        let mut indices = self.indices.borrow_mut();
        Ok(Self::typed_index::<T>(&mut indices)?.find(id, &segment))
    }

    pub fn find_by_unique<T: Keyed + Clone + Codec + 'static>(
        &self,
        name: &str,
        key: &[u8],
    ) -> Result<Option<T>> {
        let segment = self.segment.borrow();
        let mut indices = self.indices.borrow_mut();
        Self::typed_index::<T>(&mut indices)?.find_by_unique(name, key, &segment)
    }

    pub fn find_all_by<T: Keyed + Clone + Codec + 'static>(
        &self,
        name: &str,
        key: &[u8],
    ) -> Result<Vec<T>> {
        let segment = self.segment.borrow();
        let mut indices = self.indices.borrow_mut();
        Self::typed_index::<T>(&mut indices)?.find_all_by(name, key, &segment)
    }

    fn next_revision(&self) -> u64 {
        let r = self.next_revision.get() + 1;
        self.next_revision.set(r);
        r
    }

    pub fn start_undo_session(&self, enabled: bool) -> UndoSession<'_> {
        if !enabled {
            return UndoSession {
                database: self,
                frame: None,
                finished: Cell::new(true),
            };
        }
        let revision = self.next_revision();
        let had_outer = self.has_session();
        let frame = Rc::new(SessionFrame {
            revision,
            touched: RefCell::new(HashSet::new()),
            had_outer,
        });
        self.session_stack.borrow_mut().push(frame.clone());
        UndoSession {
            database: self,
            frame: Some(frame),
            finished: Cell::new(false),
        }
    }

    fn finish_session(&self, frame: Rc<SessionFrame>, pushed: bool) {
        self.session_stack.borrow_mut().pop();
        let mut segment = self.segment.borrow_mut();
        let mut indices = self.indices.borrow_mut();
        for tag in frame.touched.borrow().iter() {
            if let Some(idx) = indices.get_mut(tag) {
                idx.end_session(pushed, frame.had_outer, &mut segment);
            }
        }
        if !pushed {
            self.checkpoint_registry(&mut segment, &indices)
                .expect("registry checkpoint must succeed after an applied undo");
        }
    }

    /// Revert the most recent still-reversible mutation on every
    /// registered index. Independent of any live `UndoSession` guard.
    pub fn undo(&self) {
        let mut segment = self.segment.borrow_mut();
        let mut indices = self.indices.borrow_mut();
        for idx in indices.values_mut() {
            idx.undo_once(&mut segment);
        }
        self.checkpoint_registry(&mut segment, &indices)
            .expect("registry checkpoint must succeed after undo");
    }

    pub fn undo_all(&self) {
        loop {
            let mut any = false;
            {
                let mut segment = self.segment.borrow_mut();
                let mut indices = self.indices.borrow_mut();
                for idx in indices.values_mut() {
                    if idx.undo_once(&mut segment) {
                        any = true;
                    }
                }
                self.checkpoint_registry(&mut segment, &indices)
                    .expect("registry checkpoint must succeed after undo_all");
            }
            if !any {
                break;
            }
        }
    }

    pub fn commit(&self, revision: u64) {
        for idx in self.indices.borrow_mut().values_mut() {
            idx.commit(revision);
        }
    }

    pub fn revision(&self) -> u64 {
        self.next_revision.get()
    }

    pub fn with_read_lock<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce() -> R,
    {
        self.lockbank.with_read_lock(self.lock_wait, f)
    }

    pub fn with_write_lock<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce() -> R,
    {
        self.lockbank.with_write_lock(self.lock_wait, f)
    }

    pub fn get_current_lock(&self) -> usize {
        self.lockbank.get_current_lock()
    }
}

/// Scoped handle representing one frame on every registered index's
/// undo stack that this session actually touched. Dropping without
/// `push()` undoes those frames; `push()` hands the frame to the
/// stack, where it either waits for an explicit `commit`/`undo` (no
/// live outer session) or is squashed into the parent frame.
pub struct UndoSession<'db> {
    database: &'db Database,
    frame: Option<Rc<SessionFrame>>,
    finished: Cell<bool>,
}

impl<'db> UndoSession<'db> {
    pub fn push(self) {
        if let Some(frame) = self.frame.clone() {
            self.finished.set(true);
            self.database.finish_session(frame, true);
        }
    }

    pub fn revision(&self) -> Option<u64> {
        self.frame.as_ref().map(|f| f.revision)
    }
}

impl<'db> Drop for UndoSession<'db> {
    fn drop(&mut self) {
        if self.finished.get() {
            return;
        }
        self.finished.set(true);
        if let Some(frame) = self.frame.take() {
            self.database.finish_session(frame, false);
        }
    }
}

#[cfg(test)]
#[path = "database_test.rs"]
mod database_test;

//! Multi-Database Shell (C8): the dynamic variant's top-level façade,
//! mirroring [`crate::database::Database`]'s open/close/wipe/lock
//! surface but fanning out over a set of named [`DynamicDatabase`]s
//! instead of a fixed set of typed indices.
//!
//! Every database and table a read-write attach ever created is
//! rehydrated from the segment's registry at open time -- including on
//! a read-only attach, which never calls `create_database`/
//! `create_table` itself and so has no other way to learn what exists.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::dynamic::record::CompareMode;
use crate::dynamic::{DynamicDatabase, Record};
use crate::error::{Error, Result};
use crate::rwlock::LockBank;
use crate::segment::{OpenMode, Offset, Segment, BIN_FILE, META_FILE};

fn build_dynamic_registry_blob(databases: &HashMap<String, DynamicDatabase>) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&(databases.len() as u32).to_le_bytes());
    for (db_name, db) in databases {
        buf.extend_from_slice(&(db_name.len() as u32).to_le_bytes());
        buf.extend_from_slice(db_name.as_bytes());
        let tables = db.registry_snapshot();
        buf.extend_from_slice(&(tables.len() as u32).to_le_bytes());
        for (name, primary_compare, secondary_compare, next_id, locations) in tables {
            buf.extend_from_slice(&(name.len() as u32).to_le_bytes());
            buf.extend_from_slice(name.as_bytes());
            buf.push(primary_compare.to_u8());
            buf.push(secondary_compare.to_u8());
            buf.extend_from_slice(&next_id.to_le_bytes());
            buf.extend_from_slice(&(locations.len() as u32).to_le_bytes());
            for (id, Offset(offset), len) in locations {
                buf.extend_from_slice(&id.to_le_bytes());
                buf.extend_from_slice(&offset.to_le_bytes());
                buf.extend_from_slice(&len.to_le_bytes());
            }
        }
    }
    buf
}

type ParsedTable = (String, CompareMode, CompareMode, u32, Vec<(u32, Offset, u32)>);

fn parse_dynamic_registry(segment: &Segment) -> Vec<(String, Vec<ParsedTable>)> {
    let (offset, len) = segment.registry();
    let mut out = Vec::new();
    if len == 0 {
        return out;
    }
    let buf = segment.read_bytes(offset, len as usize);
    let mut pos = 0usize;
    let num_databases = u32::from_le_bytes(buf[pos..pos + 4].try_into().unwrap()) as usize;
    pos += 4;
    for _ in 0..num_databases {
        let name_len = u32::from_le_bytes(buf[pos..pos + 4].try_into().unwrap()) as usize;
        pos += 4;
        let db_name = String::from_utf8_lossy(&buf[pos..pos + name_len]).into_owned();
        pos += name_len;
        let num_tables = u32::from_le_bytes(buf[pos..pos + 4].try_into().unwrap()) as usize;
        pos += 4;
        let mut tables = Vec::with_capacity(num_tables);
        for _ in 0..num_tables {
            let t_name_len = u32::from_le_bytes(buf[pos..pos + 4].try_into().unwrap()) as usize;
            pos += 4;
            let t_name = String::from_utf8_lossy(&buf[pos..pos + t_name_len]).into_owned();
            pos += t_name_len;
            let primary_compare = CompareMode::from_u8(buf[pos]);
            pos += 1;
            let secondary_compare = CompareMode::from_u8(buf[pos]);
            pos += 1;
            let next_id = u32::from_le_bytes(buf[pos..pos + 4].try_into().unwrap());
            pos += 4;
            let count = u32::from_le_bytes(buf[pos..pos + 4].try_into().unwrap()) as usize;
            pos += 4;
            let mut locations = Vec::with_capacity(count);
            for _ in 0..count {
                let id = u32::from_le_bytes(buf[pos..pos + 4].try_into().unwrap());
                pos += 4;
                let rec_offset = u64::from_le_bytes(buf[pos..pos + 8].try_into().unwrap());
                pos += 8;
                let rec_len = u32::from_le_bytes(buf[pos..pos + 4].try_into().unwrap());
                pos += 4;
                locations.push((id, Offset(rec_offset), rec_len));
            }
            tables.push((t_name, primary_compare, secondary_compare, next_id, locations));
        }
        out.push((db_name, tables));
    }
    out
}

pub struct Shell {
    mode: OpenMode,
    segment: RefCell<Segment>,
    lockbank: LockBank,
    databases: RefCell<HashMap<String, DynamicDatabase>>,
    next_revision: Cell<u64>,
    lock_wait: Duration,
}

impl Shell {
    pub fn open(dir: &Path, mode: OpenMode, size: u64) -> Result<Shell> {
        Self::open_with(dir, mode, size, crate::config::NUM_RW_LOCKS, Duration::from_millis(500))
    }

    /// Open using a [`crate::config::Config`] in place of individual
    /// positional arguments.
    pub fn open_config(cfg: &crate::config::Config, mode: OpenMode) -> Result<Shell> {
        Self::open_with(cfg.dir(), mode, cfg.size(), cfg.num_rw_locks(), cfg.lock_wait())
    }

    pub fn open_with(
        dir: &Path,
        mode: OpenMode,
        size: u64,
        num_rw_locks: usize,
        lock_wait: Duration,
    ) -> Result<Shell> {
        let segment = Segment::open(dir, mode, size)?;
        let lockbank = LockBank::open(dir, mode, num_rw_locks)?;

        let mut databases = HashMap::new();
        for (db_name, tables) in parse_dynamic_registry(&segment) {
            let db = databases.entry(db_name).or_insert_with(DynamicDatabase::new);
            for (name, primary_compare, secondary_compare, next_id, locations) in tables {
                db.rehydrate_table(&name, primary_compare, secondary_compare, next_id, locations, &segment)?;
            }
        }

        Ok(Shell {
            mode,
            segment: RefCell::new(segment),
            lockbank,
            databases: RefCell::new(databases),
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

    fn checkpoint_registry(&self, segment: &mut Segment, databases: &HashMap<String, DynamicDatabase>) -> Result<()> {
        if self.mode == OpenMode::ReadOnly {
            return Ok(());
        }
        let buf = build_dynamic_registry_blob(databases);
        let offset = segment.allocator().alloc_bytes(&buf)?;
        segment.set_registry(offset, buf.len() as u64)
    }

    pub fn create_database(&self, name: &str) -> Result<()> {
        if self.mode == OpenMode::ReadOnly {
            return Err(Error::NotWritable);
        }
        let mut databases = self.databases.borrow_mut();
        if databases.contains_key(name) {
            return Err(Error::AlreadyRegistered(name.to_string()));
        }
        databases.insert(name.to_string(), DynamicDatabase::new());
        let mut segment = self.segment.borrow_mut();
        self.checkpoint_registry(&mut segment, &databases)
    }

    pub fn remove_database(&self, name: &str) -> Result<()> {
        if self.mode == OpenMode::ReadOnly {
            return Err(Error::NotWritable);
        }
        let mut databases = self.databases.borrow_mut();
        databases
            .remove(name)
            .ok_or_else(|| Error::NotRegistered(name.to_string()))?;
        let mut segment = self.segment.borrow_mut();
        self.checkpoint_registry(&mut segment, &databases)?;
        Ok(())
    }

    /// Run `reader` against the named database and its segment, and
    /// return its result. Fails with *not registered* if the name is
    /// unknown.
    pub fn get_database<F, R>(&self, name: &str, reader: F) -> Result<R>
    where
        F: FnOnce(&DynamicDatabase, &Segment) -> R,
    {
        let databases = self.databases.borrow();
        let db = databases
            .get(name)
            .ok_or_else(|| Error::NotRegistered(name.to_string()))?;
        let segment = self.segment.borrow();
        Ok(reader(db, &segment))
    }

    pub fn find_database<F, R>(&self, name: &str, reader: F) -> Option<R>
    where
        F: FnOnce(&DynamicDatabase, &Segment) -> R,
    {
        let databases = self.databases.borrow();
        let db = databases.get(name)?;
        let segment = self.segment.borrow();
        Some(reader(db, &segment))
    }

    fn next_revision(&self) -> u64 {
        let r = self.next_revision.get() + 1;
        self.next_revision.set(r);
        r
    }

    /// Apply `mutator` to the named database's structure (tables) or
    /// records, wrapped in its own undo-stack session: committed
    /// (pushed) on success, immediately reverted on error.
    pub fn modify<F, R>(&self, db_name: &str, mutator: F) -> Result<R>
    where
        F: FnOnce(&mut DynamicDatabase, &mut Segment) -> Result<R>,
    {
        if self.mode == OpenMode::ReadOnly {
            return Err(Error::NotWritable);
        }
        let mut databases = self.databases.borrow_mut();
        let mut segment = self.segment.borrow_mut();
        let db = databases
            .get_mut(db_name)
            .ok_or_else(|| Error::NotRegistered(db_name.to_string()))?;

        let revision = self.next_revision();
        let had_outer = db.has_session_pub();
        db.start_undo(revision);

        let outcome = match mutator(db, &mut segment) {
            Ok(val) => {
                db.end_session(true, had_outer, &mut segment);
                Ok(val)
            }
            Err(err) => {
                db.end_session(false, had_outer, &mut segment);
                Err(err)
            }
        };
        self.checkpoint_registry(&mut segment, &databases)?;
        outcome
    }

    pub fn create_table(
        &self,
        db_name: &str,
        table_name: &str,
        primary_compare: CompareMode,
        secondary_compare: CompareMode,
    ) -> Result<()> {
        self.modify(db_name, |db, _segment| {
            db.create_table(table_name, primary_compare, secondary_compare)
        })
    }

    pub fn create_record(
        &self,
        db_name: &str,
        table_name: &str,
        primary: i128,
        secondary: i128,
        value: Vec<u8>,
    ) -> Result<Record> {
        if self.mode == OpenMode::ReadOnly {
            return Err(Error::NotWritable);
        }
        let mut databases = self.databases.borrow_mut();
        let mut segment = self.segment.borrow_mut();
        let db = databases
            .get_mut(db_name)
            .ok_or_else(|| Error::NotRegistered(db_name.to_string()))?;
        let rec = db.create_record(table_name, primary, secondary, value, &mut segment)?;
        self.checkpoint_registry(&mut segment, &databases)?;
        Ok(rec)
    }

    pub fn modify_record(
        &self,
        db_name: &str,
        table_name: &str,
        id: u32,
        mutator: impl FnOnce(&mut Record),
    ) -> Result<Record> {
        if self.mode == OpenMode::ReadOnly {
            return Err(Error::NotWritable);
        }
        let mut databases = self.databases.borrow_mut();
        let mut segment = self.segment.borrow_mut();
        let db = databases
            .get_mut(db_name)
            .ok_or_else(|| Error::NotRegistered(db_name.to_string()))?;
        let rec = db.modify_record(table_name, id, mutator, &mut segment)?;
        self.checkpoint_registry(&mut segment, &databases)?;
        Ok(rec)
    }

    pub fn remove_record(&self, db_name: &str, table_name: &str, id: u32) -> Result<Record> {
        if self.mode == OpenMode::ReadOnly {
            return Err(Error::NotWritable);
        }
        let mut databases = self.databases.borrow_mut();
        let mut segment = self.segment.borrow_mut();
        let db = databases
            .get_mut(db_name)
            .ok_or_else(|| Error::NotRegistered(db_name.to_string()))?;
        let rec = db.remove_record(table_name, id, &mut segment)?;
        self.checkpoint_registry(&mut segment, &databases)?;
        Ok(rec)
    }

    pub fn undo(&self, db_name: &str) -> Result<bool> {
        let mut databases = self.databases.borrow_mut();
        let mut segment = self.segment.borrow_mut();
        let db = databases
            .get_mut(db_name)
            .ok_or_else(|| Error::NotRegistered(db_name.to_string()))?;
        let changed = db.undo_once(&mut segment);
        self.checkpoint_registry(&mut segment, &databases)?;
        Ok(changed)
    }

    pub fn undo_all(&self, db_name: &str) -> Result<()> {
        let mut databases = self.databases.borrow_mut();
        let mut segment = self.segment.borrow_mut();
        let db = databases
            .get_mut(db_name)
            .ok_or_else(|| Error::NotRegistered(db_name.to_string()))?;
        db.undo_all(&mut segment);
        self.checkpoint_registry(&mut segment, &databases)?;
        Ok(())
    }

    pub fn commit(&self, db_name: &str, revision: u64) -> Result<()> {
        let mut databases = self.databases.borrow_mut();
        let db = databases
            .get_mut(db_name)
            .ok_or_else(|| Error::NotRegistered(db_name.to_string()))?;
        db.commit(revision);
        Ok(())
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

#[cfg(test)]
#[path = "shell_test.rs"]
mod shell_test;

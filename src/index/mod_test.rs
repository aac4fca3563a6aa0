//! Randomized bulk exercise of create/modify/remove against a typed
//! index, checked against a plain in-memory model -- the same
//! generate-many-random-ops-then-compare-to-a-model shape the teacher's
//! `llrb_test.rs` uses for its bulk `set`/`delete` runs.

use std::collections::BTreeMap;

use rand::prelude::random;

use super::*;
use crate::database::Database;
use crate::segment::OpenMode;

#[derive(Clone, Debug, PartialEq)]
struct Row {
    id: ObjectId,
    value: u32,
}

impl Keyed for Row {
    fn id(&self) -> ObjectId {
        self.id
    }
}

impl Codec for Row {
    fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.id.0.to_le_bytes());
        buf.extend_from_slice(&self.value.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Result<Self> {
        let id = u64::from_le_bytes(buf[0..8].try_into().unwrap());
        let value = u32::from_le_bytes(buf[8..12].try_into().unwrap());
        Ok(Row { id: ObjectId(id), value })
    }
}

#[test]
fn random_create_modify_remove_matches_a_plain_model() {
    let tmp = tempfile::tempdir().unwrap();
    let db = Database::open(tmp.path(), OpenMode::ReadWrite, 8 * 1024 * 1024).unwrap();
    db.add_index::<Row>(Vec::new()).unwrap();

    let mut model: BTreeMap<u64, u32> = BTreeMap::new();

    for _ in 0..500 {
        let live_ids: Vec<u64> = model.keys().copied().collect();
        let op = random::<u8>() % 3;
        if op == 0 || live_ids.is_empty() {
            let value: u32 = random();
            let row = db.create::<Row>(|id| Row { id, value }).unwrap();
            model.insert(row.id.0, value);
        } else {
            let id = live_ids[random::<usize>() % live_ids.len()];
            if op == 1 {
                let value: u32 = random();
                db.modify::<Row>(ObjectId(id), |row| row.value = value).unwrap();
                model.insert(id, value);
            } else {
                db.remove::<Row>(ObjectId(id)).unwrap();
                model.remove(&id);
            }
        }
    }

    for (&id, &value) in &model {
        let row = db.get::<Row>(ObjectId(id)).unwrap();
        assert_eq!(row.value, value);
    }
    assert_eq!(db.find::<Row>(ObjectId(u64::MAX)).unwrap(), None);
}

#[test]
fn random_session_undo_always_restores_the_pre_session_model() {
    let tmp = tempfile::tempdir().unwrap();
    let db = Database::open(tmp.path(), OpenMode::ReadWrite, 8 * 1024 * 1024).unwrap();
    db.add_index::<Row>(Vec::new()).unwrap();

    for i in 0..20 {
        db.create::<Row>(|id| Row { id, value: i }).unwrap();
    }

    let before: Vec<Row> = (0..20).map(|i| db.get::<Row>(ObjectId(i)).unwrap()).collect();

    {
        let session = db.start_undo_session(true);
        for _ in 0..50 {
            let op = random::<u8>() % 3;
            let id = random::<u64>() % 20;
            match op {
                0 => {
                    db.modify::<Row>(ObjectId(id), |row| row.value = random()).ok();
                }
                1 => {
                    db.remove::<Row>(ObjectId(id)).ok();
                }
                _ => {
                    db.create::<Row>(|id| Row { id, value: random() }).unwrap();
                }
            }
        }
        drop(session);
    }

    for row in before {
        assert_eq!(db.get::<Row>(row.id).unwrap(), row);
    }
}

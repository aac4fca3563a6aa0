//! Exercises creates/modifies/removes against a typed index through
//! nested undo sessions: a plain modify-then-undo, a create-then-undo,
//! a push()-then-outer-undo, and read-only reattach against a
//! previously populated segment.

use super::*;
use crate::error::Error;
use crate::index::Codec;
use crate::segment::OpenMode;

#[derive(Clone, Debug, PartialEq)]
struct Book {
    id: ObjectId,
    a: u32,
    b: u32,
}

impl Keyed for Book {
    fn id(&self) -> ObjectId {
        self.id
    }
}

impl Codec for Book {
    fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.id.0.to_le_bytes());
        buf.extend_from_slice(&self.a.to_le_bytes());
        buf.extend_from_slice(&self.b.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Result<Self> {
        let id = u64::from_le_bytes(buf[0..8].try_into().unwrap());
        let a = u32::from_le_bytes(buf[8..12].try_into().unwrap());
        let b = u32::from_le_bytes(buf[12..16].try_into().unwrap());
        Ok(Book { id: ObjectId(id), a, b })
    }
}

fn open_db(dir: &std::path::Path) -> Database {
    let db = Database::open(dir, OpenMode::ReadWrite, 8 * 1024 * 1024).unwrap();
    db.add_index::<Book>(Vec::new()).unwrap();
    db
}

#[test]
fn undo_of_modify_reverts_to_session_start() {
    let tmp = tempfile::tempdir().unwrap();
    let db = open_db(tmp.path());

    let created = db.create::<Book>(|id| Book { id, a: 3, b: 4 }).unwrap();
    assert_eq!(created.id, ObjectId(0));
    db.modify::<Book>(ObjectId(0), |book| {
        book.a = 5;
        book.b = 6;
    })
    .unwrap();

    {
        let session = db.start_undo_session(true);
        db.modify::<Book>(ObjectId(0), |book| {
            book.a = 7;
            book.b = 8;
        })
        .unwrap();
        drop(session);
    }

    let book = db.get::<Book>(ObjectId(0)).unwrap();
    assert_eq!(book.a, 5);
    assert_eq!(book.b, 6);
}

#[test]
fn undo_of_create_removes_the_object_and_preserves_earlier_state() {
    let tmp = tempfile::tempdir().unwrap();
    let db = open_db(tmp.path());

    db.create::<Book>(|id| Book { id, a: 3, b: 4 }).unwrap();
    db.modify::<Book>(ObjectId(0), |book| {
        book.a = 5;
        book.b = 6;
    })
    .unwrap();

    {
        let session = db.start_undo_session(true);
        let created = db.create::<Book>(|id| Book { id, a: 9, b: 10 }).unwrap();
        assert_eq!(created.id, ObjectId(1));
        drop(session);
    }

    let book = db.get::<Book>(ObjectId(0)).unwrap();
    assert_eq!(book.a, 5);
    assert_eq!(book.b, 6);
    assert!(db.get::<Book>(ObjectId(1)).is_err());
}

#[test]
fn push_then_outer_undo_reverts_the_pushed_session_too() {
    let tmp = tempfile::tempdir().unwrap();
    let db = open_db(tmp.path());

    db.create::<Book>(|id| Book { id, a: 3, b: 4 }).unwrap();
    db.modify::<Book>(ObjectId(0), |book| {
        book.a = 5;
        book.b = 6;
    })
    .unwrap();

    {
        let session = db.start_undo_session(true);
        let created = db.create::<Book>(|id| Book { id, a: 9, b: 10 }).unwrap();
        assert_eq!(created.id, ObjectId(1));
        session.push();
    }
    db.undo();
    assert!(db.get::<Book>(ObjectId(1)).is_err());

    let session = db.start_undo_session(true);
    db.modify::<Book>(ObjectId(0), |book| {
        book.a = 7;
        book.b = 8;
    })
    .unwrap();
    session.push();

    db.undo();

    let book = db.get::<Book>(ObjectId(0)).unwrap();
    assert_eq!(book.a, 5);
    assert_eq!(book.b, 6);
}

#[test]
fn commit_prunes_revisions_so_undo_becomes_a_no_op() {
    let tmp = tempfile::tempdir().unwrap();
    let db = open_db(tmp.path());

    db.create::<Book>(|id| Book { id, a: 1, b: 1 }).unwrap();
    let session = db.start_undo_session(true);
    db.modify::<Book>(ObjectId(0), |book| book.a = 99).unwrap();
    let revision = session.revision().unwrap();
    session.push();

    db.commit(revision);
    db.undo();

    let book = db.get::<Book>(ObjectId(0)).unwrap();
    assert_eq!(book.a, 99, "committed mutation must survive an undo call");
}

#[test]
fn modify_rejects_a_secondary_uniqueness_collision_without_corrupting_state() {
    let tmp = tempfile::tempdir().unwrap();
    let db = Database::open(tmp.path(), OpenMode::ReadWrite, 8 * 1024 * 1024).unwrap();
    db.add_index::<Book>(vec![SecondaryIndexDef {
        name: "a",
        unique: true,
        key: Box::new(|book: &Book| book.a.to_be_bytes().to_vec()),
    }])
    .unwrap();

    db.create::<Book>(|id| Book { id, a: 1, b: 1 }).unwrap();
    db.create::<Book>(|id| Book { id, a: 2, b: 2 }).unwrap();

    let err = db.modify::<Book>(ObjectId(1), |book| book.a = 1).unwrap_err();
    assert!(matches!(err, Error::Uniqueness("a")));

    // The failed re-key must not have left id 1 dangling in the collection.
    assert!(db.find::<Book>(ObjectId(1)).unwrap().is_none());
    let survivor = db.get::<Book>(ObjectId(0)).unwrap();
    assert_eq!(survivor.a, 1);
}

#[test]
fn objects_survive_a_close_and_reopen_of_the_segment() {
    let tmp = tempfile::tempdir().unwrap();
    {
        let db = open_db(tmp.path());
        db.create::<Book>(|id| Book { id, a: 11, b: 22 }).unwrap();
        db.create::<Book>(|id| Book { id, a: 33, b: 44 }).unwrap();
        db.close().unwrap();
    }

    let db = Database::open(tmp.path(), OpenMode::ReadWrite, 8 * 1024 * 1024).unwrap();
    db.add_index::<Book>(Vec::new()).unwrap();
    let first = db.get::<Book>(ObjectId(0)).unwrap();
    let second = db.get::<Book>(ObjectId(1)).unwrap();
    assert_eq!(first.a, 11);
    assert_eq!(second.b, 44);
}

#[test]
fn read_only_attach_finds_a_previously_registered_index() {
    let tmp = tempfile::tempdir().unwrap();
    {
        let db = open_db(tmp.path());
        db.create::<Book>(|id| Book { id, a: 1, b: 2 }).unwrap();
        db.close().unwrap();
    }

    let db = Database::open(tmp.path(), OpenMode::ReadOnly, 8 * 1024 * 1024).unwrap();
    db.add_index::<Book>(Vec::new()).unwrap();
    let book = db.get::<Book>(ObjectId(0)).unwrap();
    assert_eq!(book.a, 1);
    assert_eq!(book.b, 2);
}

#[test]
fn read_only_attach_rejects_an_index_the_segment_never_saw() {
    let tmp = tempfile::tempdir().unwrap();
    Database::open(tmp.path(), OpenMode::ReadWrite, 8 * 1024 * 1024)
        .unwrap()
        .close()
        .unwrap();

    let db = Database::open(tmp.path(), OpenMode::ReadOnly, 8 * 1024 * 1024).unwrap();
    let err = db.add_index::<Book>(Vec::new()).unwrap_err();
    assert!(matches!(err, Error::NotRegistered(_)));
}

#[test]
fn read_only_attach_cannot_create() {
    let tmp = tempfile::tempdir().unwrap();
    {
        let db = open_db(tmp.path());
        db.close().unwrap();
    }

    let db = Database::open(tmp.path(), OpenMode::ReadOnly, 8 * 1024 * 1024).unwrap();
    db.add_index::<Book>(Vec::new()).unwrap();
    let err = db.create::<Book>(|id| Book { id, a: 0, b: 0 }).unwrap_err();
    assert!(matches!(err, Error::NotWritable));
}

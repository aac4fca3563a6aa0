//! A read-write attach takes an exclusive process-wide lock on the store
//! directory; a second concurrent read-write attach must fail, and
//! succeed again once the first handle is dropped. The lock bank's
//! cursor must advance by exactly one (mod N) per successful write lock,
//! never on a read lock, and the advance must be visible to every handle
//! attached to the same directory.

use super::*;
use crate::config::NUM_RW_LOCKS;
use crate::database::Database;

#[test]
fn second_read_write_attach_fails_until_the_first_is_dropped() {
    let tmp = tempfile::tempdir().unwrap();

    let first = Database::open(tmp.path(), OpenMode::ReadWrite, 8 * 1024 * 1024).unwrap();

    let second = Database::open(tmp.path(), OpenMode::ReadWrite, 8 * 1024 * 1024);
    assert!(matches!(second, Err(Error::AlreadyInUse)));

    drop(first);

    let third = Database::open(tmp.path(), OpenMode::ReadWrite, 8 * 1024 * 1024);
    assert!(third.is_ok());
}

#[test]
fn write_lock_cycles_cursor_and_read_lock_never_advances_it() {
    let tmp = tempfile::tempdir().unwrap();
    let db = Database::open(tmp.path(), OpenMode::ReadWrite, 8 * 1024 * 1024).unwrap();

    assert_eq!(db.get_current_lock(), 0);

    for i in 0..NUM_RW_LOCKS {
        assert_eq!(db.get_current_lock(), i % NUM_RW_LOCKS);
        db.with_write_lock(|| ()).unwrap();
    }
    // N successful writes bring the cursor back to 0.
    assert_eq!(db.get_current_lock(), 0);

    let before = db.get_current_lock();
    db.with_read_lock(|| ()).unwrap();
    assert_eq!(db.get_current_lock(), before, "a read lock must never advance the cursor");
}

#[test]
fn cursor_is_observable_from_a_second_read_only_handle() {
    let tmp = tempfile::tempdir().unwrap();
    let writer = Database::open(tmp.path(), OpenMode::ReadWrite, 8 * 1024 * 1024).unwrap();

    writer.with_write_lock(|| ()).unwrap();
    writer.with_write_lock(|| ()).unwrap();
    writer.with_write_lock(|| ()).unwrap();

    let reader = Database::open(tmp.path(), OpenMode::ReadOnly, 0).unwrap();
    assert_eq!(reader.get_current_lock(), writer.get_current_lock());
}

//! Schema-less path: a database created at runtime, a table created and
//! populated inside a `modify` session, and a second record inserted
//! through the shell's direct convenience call -- both reachable by id,
//! primary and secondary lookup. Also covers rehydrating tables from a
//! previous attach's registry, including on a read-only reopen.

use super::*;
use crate::dynamic::CompareMode;

#[test]
fn records_are_reachable_by_id_primary_and_secondary_after_mixed_inserts() {
    let tmp = tempfile::tempdir().unwrap();
    let shell = Shell::open(tmp.path(), OpenMode::ReadWrite, 8 * 1024 * 1024).unwrap();

    shell.create_database("test").unwrap();

    let first = shell
        .modify("test", |db, segment| {
            db.create_table("balances", CompareMode::Integer, CompareMode::Integer)?;
            db.create_record("balances", 1, 2, b"abc".to_vec(), segment)
        })
        .unwrap();
    assert_eq!(first.id, 1);

    let second = shell
        .create_record("test", "balances", 4, 3, b"d".to_vec())
        .unwrap();
    assert_eq!(second.id, 2);

    shell
        .get_database("test", |db, segment| {
            let table = db.table("balances").unwrap();
            let by_id = table.index().get(2, segment).unwrap();
            let by_primary = table.index().get_by_primary(4, segment).unwrap();
            let by_secondary = table.index().get_by_secondary(3, segment).unwrap();
            assert_eq!(by_id, by_primary);
            assert_eq!(by_id, by_secondary);
            assert_eq!(by_id.value, b"d");
        })
        .unwrap();
}

#[test]
fn undo_of_a_modify_session_restores_the_table_set() {
    let tmp = tempfile::tempdir().unwrap();
    let shell = Shell::open(tmp.path(), OpenMode::ReadWrite, 8 * 1024 * 1024).unwrap();
    shell.create_database("test").unwrap();

    shell
        .modify("test", |db, _segment| {
            db.create_table("balances", CompareMode::Integer, CompareMode::Integer)
        })
        .unwrap();

    let err = shell.modify("test", |db, _segment| -> Result<()> {
        db.create_table("ledger", CompareMode::Integer, CompareMode::Unsigned)?;
        Err(Error::OutOfRange)
    });
    assert!(err.is_err());

    shell
        .get_database("test", |db, _segment| {
            assert!(db.table("balances").is_ok());
            assert!(db.table("ledger").is_err());
        })
        .unwrap();
}

#[test]
fn records_survive_a_close_and_reopen_of_the_segment() {
    let tmp = tempfile::tempdir().unwrap();
    {
        let shell = Shell::open(tmp.path(), OpenMode::ReadWrite, 8 * 1024 * 1024).unwrap();
        shell.create_database("test").unwrap();
        shell
            .modify("test", |db, segment| {
                db.create_table("balances", CompareMode::Integer, CompareMode::Integer)?;
                db.create_record("balances", 1, 2, b"abc".to_vec(), segment)
            })
            .unwrap();
        shell.close().unwrap();
    }

    let shell = Shell::open(tmp.path(), OpenMode::ReadOnly, 8 * 1024 * 1024).unwrap();
    shell
        .get_database("test", |db, segment| {
            let table = db.table("balances").unwrap();
            let rec = table.index().get(1, segment).unwrap();
            assert_eq!(rec.value, b"abc");
        })
        .unwrap();
}

#[test]
fn read_only_shell_cannot_create_a_database() {
    let tmp = tempfile::tempdir().unwrap();
    Shell::open(tmp.path(), OpenMode::ReadWrite, 8 * 1024 * 1024)
        .unwrap()
        .close()
        .unwrap();

    let shell = Shell::open(tmp.path(), OpenMode::ReadOnly, 8 * 1024 * 1024).unwrap();
    let err = shell.create_database("test").unwrap_err();
    assert!(matches!(err, Error::NotWritable));
}

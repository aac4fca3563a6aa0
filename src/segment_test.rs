//! Corrupting the fingerprint header written at segment-create time must
//! be caught on the next open rather than silently misinterpreted, and a
//! read-only attach must never grow the backing file even when asked to
//! open at a larger size than it was created with.

use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};

use super::*;
use crate::database::Database;
use crate::error::Error;

#[test]
fn reopen_after_corrupting_the_header_fails_with_incompatible_build() {
    let tmp = tempfile::tempdir().unwrap();

    {
        let db = Database::open(tmp.path(), OpenMode::ReadWrite, 8 * 1024 * 1024).unwrap();
        db.close().unwrap();
    }

    let bin_path = tmp.path().join(BIN_FILE);
    let mut file = OpenOptions::new().write(true).open(&bin_path).unwrap();
    file.seek(SeekFrom::Start(10)).unwrap();
    file.write_all(&[0xFF; 4]).unwrap();
    drop(file);

    let reopened = Database::open(tmp.path(), OpenMode::ReadOnly, 0);
    assert!(matches!(reopened, Err(Error::IncompatibleBuild)));
}

#[test]
fn read_only_attach_never_grows_the_backing_file() {
    let tmp = tempfile::tempdir().unwrap();
    let size_before = {
        let db = Database::open(tmp.path(), OpenMode::ReadWrite, 8 * 1024 * 1024).unwrap();
        db.close().unwrap();
        std::fs::metadata(tmp.path().join(BIN_FILE)).unwrap().len()
    };

    let reader = Database::open(tmp.path(), OpenMode::ReadOnly, 64 * 1024 * 1024).unwrap();
    drop(reader);

    let size_after = std::fs::metadata(tmp.path().join(BIN_FILE)).unwrap().len();
    assert_eq!(size_before, size_after);
}

//! Deferred write-back against a store that refuses some writes

mod common;

use cinelab_model::{Annotation, Package, PackageElement};
use common::{db_path, sqlite_url};
use rusqlite::{Connection, OptionalExtension};
use tempfile::TempDir;

fn stored_meta(conn: &Connection, element: &str, key: &str) -> Option<String> {
    conn.query_row(
        "SELECT value FROM meta WHERE element = ?1 AND key = ?2",
        [element, key],
        |row| row.get(0),
    )
    .optional()
    .unwrap()
}

fn stored_begin(conn: &Connection, id: &str) -> i64 {
    conn.query_row(
        "SELECT fbegin FROM annotations WHERE id = ?1",
        [id],
        |row| row.get(0),
    )
    .unwrap()
}

#[test]
fn test_failed_operation_stays_pending() {
    let dir = TempDir::new().unwrap();
    let url = sqlite_url(&dir, "flush.db", None);
    let package = Package::create(&url).unwrap();
    let media = package.create_media("m", "http://example.com/a.avi", None).unwrap();
    let a = package.create_annotation("a", &media, 0, 10, None).unwrap();

    a.set_begin(5).unwrap();
    a.set_meta("urn:k", "v").unwrap();
    assert!(a.is_dirty());

    let raw = Connection::open(db_path(&dir, "flush.db")).unwrap();
    raw.execute_batch(
        "CREATE TRIGGER inject BEFORE UPDATE ON annotations
         BEGIN SELECT RAISE(ABORT, 'injected'); END;",
    )
    .unwrap();

    assert!(package.flush().is_err());
    assert_eq!(stored_meta(&raw, "a", "urn:k").as_deref(), Some("v"));
    assert_eq!(stored_begin(&raw, "a"), 0);
    assert!(a.is_dirty());
    assert!(package.is_dirty());
    assert_eq!(a.begin(), 5);

    raw.execute_batch("DROP TRIGGER inject;").unwrap();
    package.flush().unwrap();
    assert!(!a.is_dirty());
    assert!(!package.is_dirty());
    assert_eq!(stored_begin(&raw, "a"), 5);
    drop(raw);

    package.close().unwrap();
    let package = Package::open(&url).unwrap();
    let a: Annotation = package.get("a").unwrap();
    assert_eq!((a.begin(), a.end()), (5, 10));
    assert_eq!(a.get_meta_text("urn:k").unwrap().as_deref(), Some("v"));
}

#[test]
fn test_close_flushes_pending_changes() {
    let dir = TempDir::new().unwrap();
    let url = sqlite_url(&dir, "close.db", None);
    let package = Package::create(&url).unwrap();
    let media = package.create_media("m", "http://example.com/a.avi", None).unwrap();
    let a = package.create_annotation("a", &media, 0, 10, None).unwrap();
    a.set_end(20).unwrap();
    package.set_meta("urn:title", "closing").unwrap();
    package.close().unwrap();

    let raw = Connection::open(db_path(&dir, "close.db")).unwrap();
    let end: i64 = raw
        .query_row("SELECT fend FROM annotations WHERE id = 'a'", [], |row| {
            row.get(0)
        })
        .unwrap();
    assert_eq!(end, 20);
    assert_eq!(stored_meta(&raw, "", "urn:title").as_deref(), Some("closing"));
}

#![cfg(feature = "sqlite")]

use tempfile::tempdir;

use pbexport::alarm::{AlarmCatalog, AlarmId, Sentinel};
use pbexport::cursor::CursorOptions;
use pbexport::store::SqliteStore;
use pbexport::{Error, SampleCursor};

fn store_with(sql: &str) -> SqliteStore {
    let store = SqliteStore::in_memory().expect("open");
    store.create_schema().expect("schema");
    store.connection().execute_batch(sql).expect("seed");
    store
}

#[test]
fn catalog_loads_from_store() {
    let mut store = store_with(
        "INSERT INTO severity VALUES (10, 'NO_ALARM'), (11, 'MAJOR'), (12, 'strange');
         INSERT INTO status VALUES (1, 'LOW_ALARM'), (2, 'Archive_Disabled');",
    );
    let catalog = AlarmCatalog::load(&mut store).expect("load");
    assert_eq!(catalog.lookup_severity(11), AlarmId::Canonical(2));
    assert_eq!(catalog.lookup_severity(12), AlarmId::Unmapped { position: 2 });
    assert_eq!(catalog.lookup_severity(12).raw(), -3);
    assert_eq!(catalog.lookup_severity(99).raw(), -4);
    assert_eq!(catalog.lookup_status(1), AlarmId::Canonical(6));
    assert_eq!(
        catalog.lookup_status(2),
        AlarmId::Sentinel(Sentinel::ArchiveDisabled)
    );
}

#[test]
fn malformed_status_id_stops_the_session() {
    let store = store_with(
        "DROP TABLE status;
         CREATE TABLE status (status_id, name TEXT);
         INSERT INTO status VALUES (X'00FF', 'NO_ALARM');",
    );
    let err = SampleCursor::open(store, CursorOptions::default())
        .err()
        .expect("open must fail");
    assert!(matches!(err, Error::AlarmTable(_)));
    assert!(err.is_fatal());
}

#[test]
fn text_ids_that_parse_are_accepted() {
    let dir = tempdir().expect("tempdir");
    let store = SqliteStore::open(dir.path().join("a.db")).expect("open");
    store.create_schema().expect("schema");
    store
        .connection()
        .execute_batch(
            "DROP TABLE severity;
             CREATE TABLE severity (severity_id TEXT, name TEXT);
             INSERT INTO severity VALUES (' 7 ', 'MINOR');",
        )
        .expect("seed");
    let cursor = SampleCursor::open(store, CursorOptions::default()).expect("open");
    assert_eq!(cursor.catalog().lookup_severity(7), AlarmId::Canonical(1));
}

use std::collections::BTreeSet;
use std::path::PathBuf;

use datomrepro::datom_log::{export_datoms, import_datoms, read_datom_log};
use datomrepro::engine::{SqliteConnection, TX0};
use datomrepro::models::{EntityRef, TxOp, Value};
use datomrepro::probe::probe_value;
use datomrepro::schema::TRACKED_ATTRIBUTE;
use datomrepro::{
    DatabaseConfig, DatomConnection, DatomEngine, HarnessConfig, SqliteEngine,
    VulnerabilityTester,
};
use tempfile::tempdir;

const FIXTURE_DATOMS: usize = 10;
const FIXTURE_MAX_TX: i64 = TX0 + 4;

fn fixture_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join("frozen_case.jsonl")
}

fn fresh_connection(dir: &std::path::Path, name: &str) -> SqliteConnection {
    let config = DatabaseConfig::new(dir, name);
    SqliteEngine.create_database(&config).expect("create database");
    SqliteEngine.connect(&config).expect("connect")
}

#[test]
fn fixture_parses_strictly() {
    let datoms = read_datom_log(&fixture_path()).expect("parse fixture");
    assert_eq!(datoms.len(), FIXTURE_DATOMS);
    assert_eq!(datoms.iter().map(|datom| datom.tx).max(), Some(FIXTURE_MAX_TX));
    assert_eq!(datoms.iter().filter(|datom| !datom.added).count(), 2);
}

#[test]
fn imported_fixture_keeps_history_and_tx_counter() {
    let temp = tempdir().expect("tempdir");
    let mut conn = fresh_connection(temp.path(), "import");

    let summary = import_datoms(&mut conn, &fixture_path(), 4).expect("import");
    assert_eq!(summary.datoms, FIXTURE_DATOMS);
    assert_eq!(summary.batches, 3);
    assert_eq!(summary.max_tx, Some(FIXTURE_MAX_TX));
    assert_eq!(conn.max_tx().expect("max tx"), FIXTURE_MAX_TX);
    assert_eq!(
        conn.pull(2, TRACKED_ATTRIBUTE).expect("pull"),
        Some(probe_value(2))
    );
    assert!(conn.schema().expect("schema").contains_key(TRACKED_ATTRIBUTE));

    let report = conn
        .transact(&[TxOp::upsert(
            EntityRef::Id(2),
            TRACKED_ATTRIBUTE,
            Value::string("after-import"),
        )])
        .expect("post-import transact");
    assert!(report.tx > FIXTURE_MAX_TX);
}

#[test]
fn reexport_of_imported_fixture_is_identical_record_set() {
    let temp = tempdir().expect("tempdir");
    let mut conn = fresh_connection(temp.path(), "reexport");
    import_datoms(&mut conn, &fixture_path(), 1000).expect("import");

    let out = temp.path().join("reexported.jsonl");
    let case = export_datoms(&conn, &out).expect("export");
    assert_eq!(case.datoms, FIXTURE_DATOMS);
    assert_eq!(case.max_tx, Some(FIXTURE_MAX_TX));

    let original = read_datom_log(&fixture_path())
        .expect("original")
        .into_iter()
        .collect::<BTreeSet<_>>();
    let reexported = read_datom_log(&out)
        .expect("reexported")
        .into_iter()
        .collect::<BTreeSet<_>>();
    assert_eq!(original, reexported);
}

#[test]
fn replayed_fixture_is_clean_on_reference_engine() {
    let temp = tempdir().expect("tempdir");
    let tester =
        VulnerabilityTester::new(SqliteEngine, HarnessConfig::rooted(temp.path())).expect("tester");

    let replay = tester.replay_case(&fixture_path()).expect("replay");
    assert_eq!(replay.entity, 2);
    assert_eq!(replay.import.datoms, FIXTURE_DATOMS);
    assert!(!replay.probe.error1);
    assert!(!replay.probe.error2);
}

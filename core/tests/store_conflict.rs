//! Writes against a database another connection holds locked: one retry,
//! then a persistence conflict naming the entity.

use chrono::{NaiveDate, Utc};
use governance_core::{
    error::GovError,
    store::{GovStore, InsightRow},
    types::Pillar,
};
use rusqlite::Connection;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 9, 1).unwrap()
}

fn file_store(dir: &tempfile::TempDir, timeout: Duration) -> (GovStore, String) {
    let path = dir.path().join("gov.db").to_string_lossy().into_owned();
    let store = GovStore::open(&path).unwrap().with_busy_timeout(timeout).unwrap();
    store.migrate().unwrap();
    (store, path)
}

fn lock(path: &str) -> Connection {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch("BEGIN IMMEDIATE;").unwrap();
    conn
}

#[test]
fn held_lock_fails_after_one_retry() {
    let dir = tempfile::tempdir().unwrap();
    let timeout = Duration::from_millis(50);
    let (store, path) = file_store(&dir, timeout);
    let blocker = lock(&path);

    let started = Instant::now();
    let err = store
        .upsert_pillar_score(day(), Pillar::Finance, 80.0, Utc::now(), "daily-blocked")
        .unwrap_err();

    assert!(
        matches!(err, GovError::PersistenceConflict { entity: "pillar_score", .. }),
        "{err:?}"
    );
    assert_eq!(store.conflict_retries(), 1);
    assert!(started.elapsed() >= timeout * 2 - Duration::from_millis(5));

    blocker.execute_batch("ROLLBACK;").unwrap();
    assert!(store.pillar_scores_for_date(day()).unwrap().is_empty());
}

#[test]
fn lock_released_during_the_retry_lets_the_write_through() {
    let dir = tempfile::tempdir().unwrap();
    let (store, path) = file_store(&dir, Duration::from_millis(100));

    let (locked_tx, locked_rx) = mpsc::channel();
    let holder = thread::spawn(move || {
        let blocker = lock(&path);
        locked_tx.send(()).unwrap();
        thread::sleep(Duration::from_millis(150));
        blocker.execute_batch("COMMIT;").unwrap();
    });
    locked_rx.recv().unwrap();

    let changed = store
        .upsert_pillar_score(day(), Pillar::Health, 91.0, Utc::now(), "daily-late")
        .unwrap();
    holder.join().unwrap();

    assert!(changed);
    assert_eq!(store.conflict_retries(), 1);
    assert_eq!(store.pillar_scores_for_date(day()).unwrap()[0].score, 91.0);
}

#[test]
fn insight_swap_and_purge_report_conflicts_and_leave_state_alone() {
    let dir = tempfile::tempdir().unwrap();
    let (store, path) = file_store(&dir, Duration::from_millis(30));
    let now = Utc::now();
    store.insert_run("daily-failed", "daily", day(), now).unwrap();
    store
        .upsert_pillar_score(day(), Pillar::Ai, 70.0, now, "daily-failed")
        .unwrap();
    store.finish_run("daily-failed", "failed", now, None).unwrap();
    let blocker = lock(&path);

    let row = InsightRow {
        insight_id: "INS-held".into(),
        series:     "ai".into(),
        date:       day(),
        kind:       "band_change".into(),
        confidence: 0.9,
        text:       "AI declined from good to fair".into(),
        locale:     "en".into(),
        superseded: false,
        run_id:     "daily-next".into(),
    };
    let swap = store.replace_current_insights(&[row], "daily-next", now);
    assert!(matches!(swap, Err(GovError::PersistenceConflict { entity: "insight", .. })));

    let purge = store.purge_run("daily-failed");
    assert!(matches!(purge, Err(GovError::PersistenceConflict { entity: "purge", .. })));
    assert_eq!(store.conflict_retries(), 2);

    blocker.execute_batch("ROLLBACK;").unwrap();
    assert!(store.current_insights("en").unwrap().is_empty());
    assert_eq!(store.get_run("daily-failed").unwrap().unwrap().status, "failed");

    let report = store.purge_run("daily-failed").unwrap();
    assert_eq!(report.pillar_scores, 1);
}

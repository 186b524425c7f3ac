//! Job-level tests for the `code` → `codetext` conversion
//!
//! Coverage includes:
//! - Descending window order and window bounds
//! - Validation before conversion in every window
//! - Fail-closed abort on an unexpected value
//! - Resuming after an abort
//! - Dry runs

use backfill_engine::migrate::{CodeToTextConfig, CodeToTextJob, MigrationError};
use backfill_engine::window::BatchWindow;
use std::sync::Arc;

mod common;
use common::{FakeMigrationStore, SessionEvent};

fn job(store: &FakeMigrationStore, batch_size: i64, dry_run: bool) -> CodeToTextJob {
    CodeToTextJob::new(
        Arc::new(store.clone()),
        CodeToTextConfig {
            batch_size,
            start_id: 1,
            dry_run,
        },
    )
}

#[tokio::test]
async fn test_converts_every_window_top_down() {
    let store = FakeMigrationStore::with_string_codes(1205);

    let summary = job(&store, 500, false).run().await.unwrap();

    assert_eq!(summary.range, Some(BatchWindow::new(1, 1205)));
    assert_eq!(summary.windows, 3);
    assert_eq!(summary.rows_updated, 1205);
    assert_eq!(summary.rows_converted, 1205);
    assert_eq!(store.converted_count(), 1205);

    let row = store.row(1205).unwrap();
    assert_eq!(row.codetext.as_deref(), Some(r#"(coin.transfer "a" "b" 1205.0)"#));

    let windows = [
        BatchWindow::new(706, 1205),
        BatchWindow::new(206, 705),
        BatchWindow::new(1, 205),
    ];
    let expected: Vec<SessionEvent> = windows
        .iter()
        .flat_map(|w| [SessionEvent::Fetch(*w), SessionEvent::Convert(*w), SessionEvent::Commit])
        .collect();
    assert_eq!(store.events(), expected);
}

#[tokio::test]
async fn test_second_run_finds_nothing_to_do() {
    let store = FakeMigrationStore::with_string_codes(40);
    job(&store, 16, false).run().await.unwrap();
    store.clear_events();

    let summary = job(&store, 16, false).run().await.unwrap();

    assert_eq!(summary.range, None);
    assert_eq!(summary.windows, 0);
    assert!(store.events().is_empty());
}

#[tokio::test]
async fn test_null_and_empty_object_rows_stay_null() {
    let store = FakeMigrationStore::default();
    store.insert(1, None);
    store.insert(2, Some("{}"));
    store.insert(3, Some(r#""(free.nft.mint)""#));

    let summary = job(&store, 10, false).run().await.unwrap();

    assert_eq!(summary.rows_converted, 1);
    assert_eq!(summary.rows_updated, 3);
    assert_eq!(store.row(1).unwrap().codetext, None);
    assert_eq!(store.row(2).unwrap().codetext, None);
    assert_eq!(store.row(3).unwrap().codetext.as_deref(), Some("(free.nft.mint)"));
}

#[tokio::test]
async fn test_invalid_value_aborts_before_its_window_is_written() {
    let store = FakeMigrationStore::with_string_codes(30);
    store.insert(15, Some(r#"{"exec": {"code": "(+ 1 2)"}}"#));

    let err = job(&store, 10, false).run().await.unwrap_err();

    match err {
        MigrationError::InvalidCode { id, window, value } => {
            assert_eq!(id, 15);
            assert_eq!(window, BatchWindow::new(11, 20));
            assert!(value.starts_with("{\"exec\""));
        },
        other => panic!("unexpected error: {other}"),
    }

    // [21, 30] landed; nothing in [11, 20] or below was touched
    assert_eq!(
        store.events(),
        vec![
            SessionEvent::Fetch(BatchWindow::new(21, 30)),
            SessionEvent::Convert(BatchWindow::new(21, 30)),
            SessionEvent::Commit,
            SessionEvent::Fetch(BatchWindow::new(11, 20)),
            SessionEvent::Rollback,
        ]
    );
    assert!((21..=30).all(|id| store.row(id).unwrap().codetext.is_some()));
    assert!((1..=20).all(|id| store.row(id).unwrap().codetext.is_none()));
}

#[tokio::test]
async fn test_restart_resumes_below_committed_windows() {
    let store = FakeMigrationStore::with_string_codes(30);
    store.insert(15, Some("1234"));
    assert!(job(&store, 10, false).run().await.is_err());

    store.insert(15, Some(r#""(coin.details \"a\")""#));
    store.clear_events();

    let summary = job(&store, 10, false).run().await.unwrap();

    assert_eq!(summary.range, Some(BatchWindow::new(1, 20)));
    assert_eq!(summary.windows, 2);
    assert_eq!(store.converted_count(), 30);
    assert_eq!(store.events()[0], SessionEvent::Fetch(BatchWindow::new(11, 20)));
}

#[tokio::test]
async fn test_dry_run_rolls_back_every_window() {
    let store = FakeMigrationStore::with_string_codes(25);

    let summary = job(&store, 10, true).run().await.unwrap();

    assert!(summary.dry_run);
    assert_eq!(summary.windows, 3);
    assert_eq!(summary.rows_updated, 25);
    assert_eq!(store.converted_count(), 0);
    assert!(!store.events().contains(&SessionEvent::Commit));
}

#[tokio::test]
async fn test_start_id_bounds_the_scan() {
    let store = FakeMigrationStore::with_string_codes(20);
    let job = CodeToTextJob::new(
        Arc::new(store.clone()),
        CodeToTextConfig {
            batch_size: 8,
            start_id: 11,
            dry_run: false,
        },
    );

    let summary = job.run().await.unwrap();

    assert_eq!(summary.range, Some(BatchWindow::new(11, 20)));
    assert_eq!(summary.rows_updated, 10);
    assert!(store.row(10).unwrap().codetext.is_none());
}

#[tokio::test]
async fn test_zero_batch_size_is_rejected() {
    let store = FakeMigrationStore::with_string_codes(5);
    let err = job(&store, 0, false).run().await.unwrap_err();
    assert!(matches!(err, MigrationError::Window(_)));
}

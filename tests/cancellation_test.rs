//! Cancellation and run timeout behaviour

mod common;

use common::{read_csv, strings, BatchFixture};
use solbatch::config::RunMode;
use solbatch::execution::{BatchRunner, LOG_HEADER};
use solbatch::spool::spool_file_name;
use solbatch::testing::MockDatabase;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_cancel_keeps_partial_log_and_skips_merge() {
    let fx = BatchFixture::new();
    fx.write_template("ACC", &[("ACC_NO", 0, "")]);
    let procs = strings(&["ACC"]);
    let db = MockDatabase::builder()
        .with_text_rows("ACC", "101", &[&["A1"]])
        .hang_on("ACC", "102")
        .build();
    let settings = fx.settings(RunMode::Extract, &procs, 1);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let report = BatchRunner::new(Arc::new(db.clone()), settings.clone())
        .with_cancellation(cancel)
        .run(strings(&["101", "102", "103"]), fx.templates(&procs))
        .await
        .unwrap();

    assert!(report.cancelled);
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(report.abandoned, 1);
    assert_eq!(report.not_started, 1);
    assert!(report.merges.is_empty());

    let log = read_csv(&settings.log_path);
    assert_eq!(log[0], LOG_HEADER.to_vec());
    assert_eq!(log.len(), 2);
    assert_eq!(log[1][0], "101");

    let summary = read_csv(&settings.summary_path);
    assert_eq!(summary.len(), 2);
    assert_eq!(summary[1][0], "ACC");

    // Completed spool is kept for a later merge; the abandoned one is removed
    assert!(fx.spool_dir().join(spool_file_name("ACC", "101")).exists());
    assert!(!fx.spool_dir().join(spool_file_name("ACC", "102")).exists());
    assert!(!fx.spool_dir().join("ACC.txt").exists());

    assert_eq!(db.closed_count(), db.prepared_count());
}

#[tokio::test]
async fn test_run_timeout_cancels_the_run() {
    let fx = BatchFixture::new();
    let procs = strings(&["LOAD_BAL"]);
    let db = MockDatabase::builder().hang_on("LOAD_BAL", "1").build();
    let mut settings = fx.settings(RunMode::Insert, &procs, 2);
    settings.run_timeout = Some(Duration::from_millis(150));

    let report = BatchRunner::new(Arc::new(db), settings.clone())
        .run(strings(&["1", "2"]), Default::default())
        .await
        .unwrap();

    assert!(report.cancelled);
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.abandoned, 1);
    assert_eq!(read_csv(&settings.log_path).len(), 2);
}

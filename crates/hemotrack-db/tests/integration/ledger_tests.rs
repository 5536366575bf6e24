use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use hemotrack_core::error::PipelineError;
use hemotrack_core::run::{RunCounts, RunOutcome, RunResult};
use hemotrack_core::traits::RunLedger;
use hemotrack_db::RunRepository;

use crate::integration::common::setup_test_db;

fn run(source: &str, outcome: RunOutcome, finished_at: DateTime<Utc>) -> RunResult {
    RunResult {
        id: Uuid::new_v4(),
        source_id: source.into(),
        started_at: finished_at - Duration::seconds(5),
        finished_at,
        outcome,
        counts: RunCounts {
            observed: 8,
            inserted: 2,
            updated: 1,
            deactivated: 1,
            malformed: 0,
        },
        error: match outcome {
            RunOutcome::Failure => Some("fetch timed out".into()),
            _ => None,
        },
    }
}

#[tokio::test]
async fn record_and_history_returns_newest_first() {
    let (pool, _container) = setup_test_db().await;
    let repo = RunRepository::new(pool);

    let base = Utc::now();
    let oldest = run("rckik-test", RunOutcome::Success, base);
    let middle = run("rckik-test", RunOutcome::Failure, base + Duration::minutes(1));
    let newest = run("rckik-test", RunOutcome::Partial, base + Duration::minutes(2));
    for r in [&oldest, &middle, &newest] {
        repo.record(r).await.unwrap();
    }

    let history = repo.history("rckik-test", 2).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].id, newest.id);
    assert_eq!(history[1].id, middle.id);

    assert_eq!(history[0].outcome, RunOutcome::Partial);
    assert_eq!(history[0].counts, newest.counts);
    assert_eq!(history[1].error.as_deref(), Some("fetch timed out"));
}

#[tokio::test]
async fn history_is_scoped_to_source() {
    let (pool, _container) = setup_test_db().await;
    let repo = RunRepository::new(pool);

    let base = Utc::now();
    repo.record(&run("rckik-a", RunOutcome::Success, base))
        .await
        .unwrap();
    repo.record(&run("rckik-b", RunOutcome::Success, base))
        .await
        .unwrap();

    let history = repo.history("rckik-a", 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].source_id, "rckik-a");
}

#[tokio::test]
async fn last_successful_skips_failures() {
    let (pool, _container) = setup_test_db().await;
    let repo = RunRepository::new(pool);

    assert!(repo.last_successful("rckik-test").await.unwrap().is_none());

    let base = Utc::now();
    repo.record(&run("rckik-test", RunOutcome::Failure, base))
        .await
        .unwrap();
    assert!(repo.last_successful("rckik-test").await.unwrap().is_none());

    // Partial runs persisted their batch, so they count.
    let partial = run("rckik-test", RunOutcome::Partial, base + Duration::minutes(1));
    repo.record(&partial).await.unwrap();
    let found = repo.last_successful("rckik-test").await.unwrap().unwrap();
    assert_eq!(found.id, partial.id);

    // A later failure does not mask the last persisted run.
    repo.record(&run(
        "rckik-test",
        RunOutcome::Failure,
        base + Duration::minutes(2),
    ))
    .await
    .unwrap();
    let found = repo.last_successful("rckik-test").await.unwrap().unwrap();
    assert_eq!(found.id, partial.id);
}

#[tokio::test]
async fn corrupt_outcome_surfaces_error() {
    let (pool, _container) = setup_test_db().await;
    let repo = RunRepository::new(pool.clone());

    repo.record(&run("rckik-test", RunOutcome::Success, Utc::now()))
        .await
        .unwrap();

    // The CHECK constraint stops new bad writes; drop it to simulate a
    // row corrupted before the constraint existed.
    sqlx::query("ALTER TABLE run_results DROP CONSTRAINT run_results_outcome_check")
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query("UPDATE run_results SET outcome = 'finished'")
        .execute(&pool)
        .await
        .unwrap();

    let err = repo.history("rckik-test", 10).await.unwrap_err();
    assert!(matches!(err, PipelineError::TransactionFailed(_)));
}

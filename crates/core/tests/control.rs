//! Pause, resume, cancel and delete against running and queued items.

mod common;

use std::time::Duration;

use common::{movie_from, Harness};
use mediarelay_core::{EngineError, ItemState, Phase};

const PAYLOAD: u64 = 64 * 1024;

/// Harness whose primary target copies at 32 KiB/s in 4 KiB reads.
async fn throttled() -> Harness {
    let harness = Harness::with_config(|config, _| {
        config.transfer.buffer_size = 4096;
        config.targets[0].bandwidth_limit_bps = Some(32 * 1024);
    })
    .await;
    harness.fetcher.set_payload(PAYLOAD, 8 * 1024).await;
    harness.fetcher.set_chunk_delay(Duration::ZERO).await;
    harness
}

#[tokio::test]
async fn test_pause_and_resume_mid_transfer() {
    let harness = throttled().await;
    harness.engine.start().await;

    let item = harness
        .engine
        .enqueue(movie_from("Dune", 2021, "http://cdn/movies/dune.mkv"))
        .unwrap();

    let running = harness
        .wait_until(&item.id, Duration::from_secs(10), |i| {
            i.state == ItemState::Transferring && i.progress.transferred_bytes > 0
        })
        .await;
    assert_eq!(running.state, ItemState::Transferring);

    let paused = harness.engine.pause(&item.id).await.unwrap();
    assert_eq!(paused.state, ItemState::Paused);
    assert_eq!(paused.paused_phase, Some(Phase::Transfer));
    assert!(paused.progress.transferred_bytes > 0);
    assert!(paused.progress.transferred_bytes < PAYLOAD);
    assert_eq!(paused.transfer_attempts, 0);

    // Nothing moves while paused.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(harness.item(&item.id).state, ItemState::Paused);

    let resumed = harness.engine.resume(&item.id).unwrap();
    assert_eq!(resumed.state, ItemState::Acquired);
    assert_eq!(resumed.paused_phase, None);

    let done = harness
        .wait_for_state(&item.id, ItemState::Completed, Duration::from_secs(10))
        .await;
    assert_eq!(done.state, ItemState::Completed);
    assert_eq!(done.progress.transferred_bytes, PAYLOAD);

    let placed = harness.target_dir("primary").join("Movies").join("Dune (2021).mkv");
    assert_eq!(std::fs::metadata(&placed).unwrap().len(), PAYLOAD);
    // Acquisition ran once; the transfer resumed from the partial file.
    assert_eq!(harness.fetcher.calls_for(&item.id).await, 1);
}

#[tokio::test]
async fn test_pause_and_resume_mid_acquisition() {
    let harness = Harness::new().await;
    harness.fetcher.set_payload(PAYLOAD, 4096).await;
    harness.fetcher.set_chunk_delay(Duration::from_millis(20)).await;
    harness.engine.start().await;

    let item = harness
        .engine
        .enqueue(movie_from("Arrival", 2016, "http://cdn/movies/arrival.mp4"))
        .unwrap();

    harness
        .wait_until(&item.id, Duration::from_secs(10), |i| {
            i.state == ItemState::Acquiring && i.progress.acquired_bytes > 0
        })
        .await;

    let paused = harness.engine.pause(&item.id).await.unwrap();
    assert_eq!(paused.state, ItemState::Paused);
    assert_eq!(paused.paused_phase, Some(Phase::Acquisition));
    assert!(paused.progress.acquired_bytes > 0);
    assert_eq!(paused.acquisition_attempts, 0);

    // Pausing again is a no-op.
    let again = harness.engine.pause(&item.id).await.unwrap();
    assert_eq!(again.state, ItemState::Paused);

    harness.fetcher.set_chunk_delay(Duration::ZERO).await;
    let resumed = harness.engine.resume(&item.id).unwrap();
    assert_eq!(resumed.state, ItemState::Pending);

    let done = harness
        .wait_for_state(&item.id, ItemState::Completed, Duration::from_secs(10))
        .await;
    assert_eq!(done.state, ItemState::Completed);
    assert_eq!(harness.fetcher.calls_for(&item.id).await, 2);

    let placed = harness.target_dir("primary").join("Movies").join("Arrival (2016).mp4");
    assert_eq!(std::fs::metadata(&placed).unwrap().len(), PAYLOAD);
}

#[tokio::test]
async fn test_pause_queued_item_is_not_admitted() {
    let harness = Harness::new().await;
    let item = harness
        .engine
        .enqueue(movie_from("Heat", 1995, "http://cdn/heat.mkv"))
        .unwrap();

    let paused = harness.engine.pause(&item.id).await.unwrap();
    assert_eq!(paused.state, ItemState::Paused);

    let report = harness.engine.tick().unwrap();
    assert_eq!(report.admitted(), 0);
    assert_eq!(harness.fetcher.call_count().await, 0);
}

#[tokio::test]
async fn test_cancel_mid_acquisition_discards_staging() {
    let harness = Harness::new().await;
    harness.fetcher.set_payload(PAYLOAD, 4096).await;
    harness.fetcher.set_chunk_delay(Duration::from_millis(20)).await;
    harness.engine.start().await;

    let item = harness
        .engine
        .enqueue(movie_from("Alien", 1979, "http://cdn/alien.mkv"))
        .unwrap();
    harness
        .wait_until(&item.id, Duration::from_secs(10), |i| i.progress.acquired_bytes > 0)
        .await;

    let cancelled = harness.engine.cancel(&item.id).await.unwrap();
    assert_eq!(cancelled.state, ItemState::Cancelled);
    assert!(!harness.staging_dir().join(&item.id).exists());

    // Terminal: further control is refused.
    assert!(matches!(
        harness.engine.cancel(&item.id).await,
        Err(EngineError::InvalidOperation(_))
    ));
    assert!(matches!(
        harness.engine.resume(&item.id),
        Err(EngineError::InvalidOperation(_))
    ));
    assert!(matches!(
        harness.engine.pause(&item.id).await,
        Err(EngineError::InvalidOperation(_))
    ));
}

#[tokio::test]
async fn test_cancel_mid_transfer_leaves_no_partial_file() {
    let harness = throttled().await;
    harness.engine.start().await;

    let item = harness
        .engine
        .enqueue(movie_from("Dune", 2021, "http://cdn/movies/dune.mkv"))
        .unwrap();
    harness
        .wait_until(&item.id, Duration::from_secs(10), |i| {
            i.state == ItemState::Transferring && i.progress.transferred_bytes > 0
        })
        .await;

    let cancelled = harness.engine.cancel(&item.id).await.unwrap();
    assert_eq!(cancelled.state, ItemState::Cancelled);

    let movies = harness.target_dir("primary").join("Movies");
    assert!(!movies.join("Dune (2021).mkv").exists());
    assert!(!movies.join("Dune (2021).mkv.part").exists());
    assert!(!harness.staging_dir().join(&item.id).exists());
}

#[tokio::test]
async fn test_cancel_paused_item() {
    let harness = Harness::new().await;
    let item = harness
        .engine
        .enqueue(movie_from("Heat", 1995, "http://cdn/heat.mkv"))
        .unwrap();

    harness.engine.pause(&item.id).await.unwrap();
    let cancelled = harness.engine.cancel(&item.id).await.unwrap();
    assert_eq!(cancelled.state, ItemState::Cancelled);
    assert_eq!(cancelled.paused_phase, None);
}

#[tokio::test]
async fn test_delete_only_finished_items() {
    let harness = Harness::new().await;
    let item = harness
        .engine
        .enqueue(movie_from("Heat", 1995, "http://cdn/heat.mkv"))
        .unwrap();

    let err = harness.engine.delete(&item.id).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidOperation(_)));
    assert_eq!(harness.item(&item.id).state, ItemState::Pending);

    harness.engine.cancel(&item.id).await.unwrap();
    let deleted = harness.engine.delete(&item.id).await.unwrap();
    assert_eq!(deleted.state, ItemState::Cancelled);
    assert!(harness.engine.item(&item.id).is_err());
    assert_eq!(harness.engine.count(&Default::default()).unwrap(), 0);

    let err = harness.engine.delete(&item.id).await.unwrap_err();
    assert!(matches!(err, EngineError::Item(mediarelay_core::ItemError::NotFound(_))));
}

#[tokio::test]
async fn test_delete_completed_item_removes_staging() {
    let harness = Harness::with_config(|config, _| {
        config.targets[0].cleanup_after_success = false;
    })
    .await;
    harness.engine.start().await;

    let item = harness
        .engine
        .enqueue(movie_from("Heat", 1995, "http://cdn/heat.mkv"))
        .unwrap();
    let done = harness
        .wait_for_state(&item.id, ItemState::Completed, Duration::from_secs(10))
        .await;
    assert_eq!(done.state, ItemState::Completed);
    assert!(harness.staging_dir().join(&item.id).exists());

    harness.engine.delete(&item.id).await.unwrap();
    assert!(!harness.staging_dir().join(&item.id).exists());
    // The placed file is not the engine's to remove.
    let placed = harness.target_dir("primary").join("Movies").join("Heat (1995).mkv");
    assert!(placed.exists());
}

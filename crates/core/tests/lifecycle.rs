//! Full item lifecycles: naming, enrichment, cleanup and restart recovery.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{episode, movie_from, this_year, Harness};
use mediarelay_core::{
    testing::{fixtures, MockEnricher},
    ContentCategory, ItemState, ItemStore, Priority, RawCandidate,
};

fn serial(title: &str, season: u32, episode: u32, url: &str) -> RawCandidate {
    let mut raw = common::episode(title, season, episode, url);
    raw.category = ContentCategory::SerialEpisode;
    raw
}

#[tokio::test]
async fn test_mixed_batch_completes_with_named_destinations() {
    let enricher = Arc::new(MockEnricher::new());
    enricher.add_entry("Dune", fixtures::metadata("Dune", 2021)).await;
    enricher.add_entry("Dark", fixtures::metadata("Dark", 2017)).await;

    let harness = Harness::new().await.with_enricher(enricher.clone());
    harness.fetcher.set_payload(16 * 1024, 4096).await;
    harness.engine.start().await;

    let submitted = [
        movie_from("Dune", 2021, "http://cdn/movies/dune.mkv"),
        movie_from("Heat", 1995, "http://cdn/movies/heat.mp4"),
        episode("Dark", 1, 2, "http://cdn/series/dark-s01e02.mkv"),
        episode("Dark", 1, 3, "http://cdn/series/dark-s01e03.mkv"),
        serial("Avenida Brasil", 1, 45, "http://cdn/serials/ab-1x45"),
    ];
    let mut ids = Vec::new();
    for raw in submitted {
        ids.push(harness.engine.enqueue(raw).unwrap().id);
    }

    for id in &ids {
        let item = harness
            .wait_for_state(id, ItemState::Completed, Duration::from_secs(15))
            .await;
        assert_eq!(item.state, ItemState::Completed, "{}: {:?}", item.title, item.last_error);
        assert_eq!(item.progress.acquired_bytes, 16 * 1024);
        assert_eq!(item.progress.transferred_bytes, 16 * 1024);
        assert!(item.phase_ended_at.is_some());
    }

    let base = harness.target_dir("primary");
    for relative in [
        "Movies/Dune (2021).mkv",
        "Movies/Heat (1995).mp4",
        "Series/Dark/Dark S01E02.mkv",
        "Series/Dark/Dark S01E03.mkv",
        // No extension on the source URL.
        "Serials/Avenida Brasil/Avenida Brasil - 1x45.mp4",
    ] {
        let path = base.join(relative);
        assert_eq!(
            std::fs::metadata(&path).map(|m| m.len()).ok(),
            Some(16 * 1024),
            "missing {}",
            path.display()
        );
    }

    // Staged artifacts are removed once placed.
    for id in &ids {
        assert!(!harness.staging_dir().join(id).exists());
    }

    let dune = harness.item(&ids[0]);
    let metadata = dune.metadata.unwrap();
    assert_eq!(metadata.provider, "tmdb");
    assert_eq!(metadata.release_year, Some(2021));
    assert!(harness.item(&ids[2]).metadata.is_some());
    assert!(harness.item(&ids[1]).metadata.is_none());

    let queries = enricher.recorded_queries().await;
    assert_eq!(queries.len(), ids.len());
}

#[tokio::test]
async fn test_single_slot_batch_runs_in_priority_order() {
    let harness = Harness::with_config(|config, _| {
        config.engine.acquisition_ceiling = 1;
        config.targets[0].max_concurrent = 1;
    })
    .await;

    // Submitted lowest priority first so creation order alone would invert it.
    let submitted = [
        movie_from("Metropolis", 1927, "http://cdn/metropolis.mkv"),
        episode("Dark", 2, 1, "http://cdn/dark-s02e01.mkv"),
        movie_from("New One", this_year(), "http://cdn/new-one.mkv"),
        common::movie("Undated", "http://cdn/undated.mkv"),
        movie_from("Newer One", this_year(), "http://cdn/newer-one.mkv"),
    ];
    let mut ids = Vec::new();
    for raw in submitted {
        ids.push(harness.engine.enqueue(raw).unwrap());
    }
    let priorities: Vec<Priority> = ids.iter().map(|i| i.priority).collect();
    assert_eq!(
        priorities,
        vec![Priority::Low, Priority::Medium, Priority::High, Priority::Medium, Priority::High]
    );

    harness.engine.start().await;
    for item in &ids {
        let done = harness
            .wait_for_state(&item.id, ItemState::Completed, Duration::from_secs(15))
            .await;
        assert_eq!(done.state, ItemState::Completed, "{}", done.title);
        assert!(done.acquisition_attempts <= harness.config.retry.max_attempts);
    }

    let order: Vec<String> = harness
        .fetcher
        .recorded_calls()
        .await
        .into_iter()
        .map(|call| call.item_id)
        .collect();
    let expected: Vec<String> = [2, 4, 1, 3, 0].iter().map(|&i| ids[i].id.clone()).collect();
    assert_eq!(order, expected);
    assert_eq!(harness.fetcher.max_concurrent(), 1);
}

#[tokio::test]
async fn test_enrichment_failure_does_not_fail_the_item() {
    let enricher = Arc::new(MockEnricher::new());
    enricher
        .set_next_error(mediarelay_core::EnrichmentError::ApiError {
            status: 503,
            message: "unavailable".to_string(),
        })
        .await;

    let harness = Harness::new().await.with_enricher(enricher);
    harness.engine.start().await;

    let item = harness
        .engine
        .enqueue(movie_from("Dune", 2021, "http://cdn/dune.mkv"))
        .unwrap();
    let done = harness
        .wait_for_state(&item.id, ItemState::Completed, Duration::from_secs(10))
        .await;
    assert_eq!(done.state, ItemState::Completed);
    assert!(done.metadata.is_none());
    assert_eq!(done.acquisition_attempts, 0);
}

#[tokio::test]
async fn test_interrupted_acquisition_recovers_on_start() {
    let harness = Harness::new().await;

    let mut item = fixtures::item("Alien", "http://cdn/alien.mkv", Priority::Medium);
    item.state = ItemState::Acquiring;
    item.acquisition_attempts = 1;
    item.phase_started_at = Some(chrono::Utc::now());
    let item = harness.store.insert(item).unwrap();

    harness.engine.start().await;
    let done = harness
        .wait_for_state(&item.id, ItemState::Completed, Duration::from_secs(10))
        .await;
    assert_eq!(done.state, ItemState::Completed);
    // Recovery itself consumes no attempt.
    assert_eq!(done.acquisition_attempts, 1);
    assert_eq!(harness.fetcher.calls_for(&item.id).await, 1);
}

#[tokio::test]
async fn test_interrupted_transfer_recovers_without_refetch() {
    let harness = Harness::new().await;

    let staged = harness.staging_dir().join("manual").join("alien.mkv");
    std::fs::create_dir_all(staged.parent().unwrap()).unwrap();
    std::fs::write(&staged, vec![b'a'; 10_000]).unwrap();

    let mut item = fixtures::item("Alien", "http://cdn/alien.mkv", Priority::Medium);
    item.state = ItemState::Transferring;
    item.year = Some(1979);
    item.local_path = Some(staged);
    item.progress.acquired_bytes = 10_000;
    let item = harness.store.insert(item).unwrap();

    harness.engine.start().await;
    let done = harness
        .wait_for_state(&item.id, ItemState::Completed, Duration::from_secs(10))
        .await;
    assert_eq!(done.state, ItemState::Completed);
    assert_eq!(done.transfer_attempts, 0);
    assert_eq!(harness.fetcher.call_count().await, 0);

    let placed = harness.target_dir("primary").join("Movies").join("Alien (1979).mkv");
    assert_eq!(std::fs::metadata(placed).unwrap().len(), 10_000);
}

#[tokio::test]
async fn test_stop_leaves_queued_items_pending() {
    let harness = Harness::new().await;
    harness.engine.start().await;
    harness.engine.stop().await;
    assert!(!harness.engine.is_running());

    let item = harness
        .engine
        .enqueue(movie_from("Heat", 1995, "http://cdn/heat.mkv"))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(harness.item(&item.id).state, ItemState::Pending);
    assert_eq!(harness.fetcher.call_count().await, 0);
}

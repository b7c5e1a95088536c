//! Target connection checks through the engine.

mod common;

use common::Harness;
use mediarelay_core::{testing::fixtures, EngineError, ErrorKind, TargetConfig};

#[tokio::test]
async fn test_local_target_is_reachable() {
    let harness = Harness::new().await;
    let base = harness.target_dir("primary");
    let _ = std::fs::remove_dir_all(&base);

    let check = harness.engine.test_target("primary").await.unwrap();
    assert!(check.reachable, "{:?}", check.failure);
    assert_eq!(check.target, "primary");
    assert_eq!(check.protocol, "local_mount");
    assert!(check.failure.is_none());
    // The mount point is created the way a transfer would create it.
    assert!(base.is_dir());
}

#[tokio::test]
async fn test_unwritable_base_path_is_reported() {
    let harness = Harness::with_config(|config, root| {
        let file = root.join("occupied");
        std::fs::write(&file, b"x").unwrap();
        config.targets.push(fixtures::local_target("broken", file));
    })
    .await;

    let check = harness.engine.test_target("broken").await.unwrap();
    assert!(!check.reachable);
    assert_eq!(check.failure.unwrap().kind, ErrorKind::FatalDestinationError);
}

#[tokio::test]
async fn test_configuration_errors_are_reported() {
    let harness = Harness::with_config(|config, _| {
        config
            .targets
            .push(TargetConfig::new("pigeon", "carrier_pigeon", "/loft"));
        // No host configured.
        config.targets.push(TargetConfig::new("box", "sftp", "/srv"));
    })
    .await;

    for name in ["pigeon", "box"] {
        let check = harness.engine.test_target(name).await.unwrap();
        assert!(!check.reachable, "{}", name);
        assert_eq!(check.failure.unwrap().kind, ErrorKind::FatalConfigError, "{}", name);
    }
}

#[tokio::test]
async fn test_unknown_target_name() {
    let harness = Harness::new().await;
    let err = harness.engine.test_target("nas").await.unwrap_err();
    assert!(matches!(err, EngineError::UnknownTarget(name) if name == "nas"));
}

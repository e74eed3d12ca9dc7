//! Reconciliation engine tests against the in-memory registry

mod common;

use common::*;
use std::sync::Arc;
use std::time::Duration;
use tagmirror_core::{
    CancelHandle, CancelSignal, Credentials, MirrorPolicy, PassFailure, PassOutcome,
    RegistryError, Side, TagFailure, TagSet,
};

fn tags(values: &[&str]) -> TagSet {
    values.iter().copied().collect()
}

#[tokio::test]
async fn test_mirrors_missing_selected_tags() {
    let registry = Arc::new(
        FakeRegistry::new()
            .with_repository(SOURCE_REPO, &["8.1", "8.2", "9.0"])
            .with_repository(DEST_REPO, &["8.1"]),
    );

    let result = engine(&registry)
        .reconcile(&centos_policy(), &CancelSignal::never())
        .await;

    let plan = result.plan.as_ref().unwrap();
    assert_eq!(plan.filtered, tags(&["8.1", "8.2"]));
    assert_eq!(plan.already_mirrored, tags(&["8.1"]));
    assert_eq!(result.missing(), tags(&["8.2"]));
    assert_eq!(result.mirrored_tags, tags(&["8.1", "8.2"]));
    assert_eq!(result.transferred, tags(&["8.2"]));
    assert!(result.per_tag_errors.is_empty());
    assert!(result.fatal.is_none());
    assert!(result.is_converged());

    assert_eq!(registry.tags(DEST_REPO), tags(&["8.1", "8.2"]));
    assert_eq!(
        registry.image(&format!("{}:8.2", DEST_REPO)).unwrap().origin,
        format!("{}:8.2", SOURCE_REPO)
    );
    assert_eq!(registry.count(Op::Push), 1);
}

#[tokio::test]
async fn test_second_pass_is_idempotent() {
    let registry = Arc::new(
        FakeRegistry::new()
            .with_repository(SOURCE_REPO, &["8.1", "8.2", "9.0"])
            .with_repository(DEST_REPO, &["8.1"]),
    );
    let engine = engine(&registry);
    let policy = centos_policy();

    engine.reconcile(&policy, &CancelSignal::never()).await;
    let second = engine.reconcile(&policy, &CancelSignal::never()).await;

    assert!(second.missing().is_empty());
    assert!(second.transferred.is_empty());
    assert_eq!(second.mirrored_tags, tags(&["8.1", "8.2"]));
    assert_eq!(registry.count(Op::Push), 1);
    assert_eq!(registry.count(Op::Fetch), 1);
}

#[tokio::test]
async fn test_failed_tag_does_not_abort_others() {
    let registry = Arc::new(
        FakeRegistry::new()
            .with_repository(SOURCE_REPO, &["8.1", "8.2", "8.3"])
            .with_repository(DEST_REPO, &["8.1"]),
    );
    let failing = format!("{}:8.3", DEST_REPO);
    registry.fail_push(&failing, RegistryError::transient(&failing, "502 Bad Gateway"));

    let result = engine(&registry)
        .reconcile(&centos_policy(), &CancelSignal::never())
        .await;

    assert!(result.fatal.is_none());
    assert_eq!(result.mirrored_tags, tags(&["8.1", "8.2"]));
    assert_eq!(result.per_tag_errors.len(), 1);
    match &result.per_tag_errors["8.3"] {
        TagFailure::Push { reference, source } => {
            assert_eq!(reference, &failing);
            assert!(source.is_retryable());
        }
        other => panic!("expected push failure, got {:?}", other),
    }
    assert_eq!(result.outcome(), PassOutcome::Retry);
    assert_eq!(registry.tags(DEST_REPO), tags(&["8.1", "8.2"]));
}

#[tokio::test]
async fn test_failed_fetch_is_recorded_per_tag() {
    let registry = Arc::new(FakeRegistry::new().with_repository(SOURCE_REPO, &["8.1", "8.2"]));
    let failing = format!("{}:8.1", SOURCE_REPO);
    registry.fail_fetch(
        &failing,
        RegistryError::unsupported(&failing, "image index"),
    );

    let result = engine(&registry)
        .reconcile(&centos_policy(), &CancelSignal::never())
        .await;

    assert!(matches!(
        result.per_tag_errors["8.1"],
        TagFailure::Fetch { .. }
    ));
    assert_eq!(result.mirrored_tags, tags(&["8.2"]));
    assert_eq!(result.outcome(), PassOutcome::Terminal);
}

#[tokio::test]
async fn test_absent_destination_is_empty() {
    let registry = Arc::new(FakeRegistry::new().with_repository(SOURCE_REPO, &["8.1", "8.2", "9.0"]));

    let result = engine(&registry)
        .reconcile(&centos_policy(), &CancelSignal::never())
        .await;

    let plan = result.plan.as_ref().unwrap();
    assert!(plan.destination_tags.is_empty());
    assert_eq!(plan.missing, tags(&["8.1", "8.2"]));
    assert!(result.fatal.is_none());
    assert_eq!(result.mirrored_tags, tags(&["8.1", "8.2"]));
    assert_eq!(registry.tags(DEST_REPO), tags(&["8.1", "8.2"]));
}

#[tokio::test]
async fn test_absent_source_selects_nothing() {
    let registry = Arc::new(FakeRegistry::new().with_repository(DEST_REPO, &["8.1"]));

    let result = engine(&registry)
        .reconcile(&centos_policy(), &CancelSignal::never())
        .await;

    assert!(result.fatal.is_none());
    assert!(result.mirrored_tags.is_empty());
    assert!(result.is_converged());
    assert_eq!(registry.count(Op::Fetch), 0);
}

#[tokio::test]
async fn test_listing_failure_is_retryable_and_transfers_nothing() {
    let registry = Arc::new(
        FakeRegistry::new()
            .with_repository(SOURCE_REPO, &["8.1"])
            .with_repository(DEST_REPO, &[]),
    );
    registry.fail_list(
        DEST_REPO,
        RegistryError::unauthorized(DEST_REPO, "401 Unauthorized"),
    );

    let result = engine(&registry)
        .reconcile(&centos_policy(), &CancelSignal::never())
        .await;

    match &result.fatal {
        Some(PassFailure::Listing {
            side, repository, ..
        }) => {
            assert_eq!(*side, Side::Destination);
            assert_eq!(repository, DEST_REPO);
        }
        other => panic!("expected listing failure, got {:?}", other),
    }
    assert!(result.plan.is_none());
    assert_eq!(result.outcome(), PassOutcome::Retry);
    assert_eq!(registry.count(Op::Push), 0);
}

#[tokio::test]
async fn test_invalid_pattern_is_terminal_without_registry_calls() {
    let registry = Arc::new(FakeRegistry::new().with_repository(SOURCE_REPO, &["8.1"]));
    let mut policy = centos_policy();
    policy.pattern = "regex:(8".to_string();

    let result = engine(&registry)
        .reconcile(&policy, &CancelSignal::never())
        .await;

    assert!(matches!(result.fatal, Some(PassFailure::Configuration(_))));
    assert_eq!(result.outcome(), PassOutcome::Terminal);
    assert!(registry.calls().is_empty());
}

#[tokio::test]
async fn test_missing_field_is_terminal() {
    let registry = Arc::new(FakeRegistry::new());
    let mut policy = centos_policy();
    policy.source_repository.clear();

    let result = engine(&registry)
        .reconcile(&policy, &CancelSignal::never())
        .await;

    assert!(matches!(result.fatal, Some(PassFailure::Configuration(_))));
    assert!(!result.fatal.as_ref().unwrap().is_retryable());
}

#[tokio::test]
async fn test_unprefixed_pattern_mirrors_nothing() {
    let registry = Arc::new(FakeRegistry::new().with_repository(SOURCE_REPO, &["8.1", "latest"]));
    let mut policy = centos_policy();
    policy.pattern = "8*".to_string();

    let result = engine(&registry)
        .reconcile(&policy, &CancelSignal::never())
        .await;

    assert!(result.fatal.is_none());
    assert!(result.plan.unwrap().filtered.is_empty());
    assert_eq!(registry.count(Op::Push), 0);
}

#[tokio::test]
async fn test_semver_pattern_selects_versions_only() {
    let registry = Arc::new(FakeRegistry::new().with_repository(
        SOURCE_REPO,
        &["v1.2.3", "1.0.0", "0.9.0", "latest", "2.0.0-rc.1", "stable"],
    ));
    let mut policy = centos_policy();
    policy.pattern = "semver:>=1.0.0".to_string();

    let plan = engine(&registry)
        .plan(&policy, &CancelSignal::never())
        .await
        .unwrap();

    assert_eq!(plan.filtered, tags(&["1.0.0", "v1.2.3"]));
    assert_eq!(registry.count(Op::Push), 0);
}

#[tokio::test]
async fn test_credentials_reach_each_side() {
    let registry = Arc::new(
        FakeRegistry::new()
            .with_repository(SOURCE_REPO, &["8.2"])
            .with_repository(DEST_REPO, &[]),
    );
    let policy = centos_policy()
        .with_source_credentials(Credentials::bearer("src-token"))
        .with_destination_credentials(Credentials::basic("robot", "secret"));

    engine(&registry)
        .reconcile(&policy, &CancelSignal::never())
        .await;

    for call in registry.calls() {
        let expected = if call.target.starts_with(SOURCE_REPO) {
            Credentials::bearer("src-token")
        } else {
            Credentials::basic("robot", "secret")
        };
        assert_eq!(call.credentials, Some(expected), "call {:?}", call.op);
    }
    assert_eq!(registry.count(Op::List), 2);
}

#[tokio::test]
async fn test_both_sides_normalize_identically() {
    let registry = Arc::new(
        FakeRegistry::new()
            .with_repository(SOURCE_REPO, &["8.1"])
            .with_repository(DEST_REPO, &["8.1"]),
    );
    let with_slash = MirrorPolicy::new(
        "centos",
        "docker.io/library/",
        "registry.example.com/mirror",
        "centos",
        "glob:*",
    );

    let result = engine(&registry)
        .reconcile(&with_slash, &CancelSignal::never())
        .await;
    assert!(result.is_converged());
    assert_eq!(result.mirrored_tags, tags(&["8.1"]));
}

#[tokio::test(start_paused = true)]
async fn test_transfers_are_bounded() {
    let source_tags: Vec<String> = (0..10).map(|i| format!("8.{}", i)).collect();
    let source_refs: Vec<&str> = source_tags.iter().map(String::as_str).collect();
    let registry = Arc::new(FakeRegistry::new().with_repository(SOURCE_REPO, &source_refs));
    registry.set_push_delay(Duration::from_secs(1));

    let result = engine_with(&registry, 2, Duration::from_secs(300))
        .reconcile(&centos_policy(), &CancelSignal::never())
        .await;

    assert_eq!(result.mirrored_tags.len(), 10);
    assert_eq!(registry.max_pushes_in_flight(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_slow_push_times_out_as_transient() {
    let registry = Arc::new(FakeRegistry::new().with_repository(SOURCE_REPO, &["8.1"]));
    registry.set_push_delay(Duration::from_secs(600));

    let result = engine_with(&registry, 4, Duration::from_secs(30))
        .reconcile(&centos_policy(), &CancelSignal::never())
        .await;

    match &result.per_tag_errors["8.1"] {
        TagFailure::Push { source, .. } => {
            assert!(matches!(source, RegistryError::Timeout { secs: 30, .. }));
            assert!(source.is_retryable());
        }
        other => panic!("expected push timeout, got {:?}", other),
    }
    assert!(result.mirrored_tags.is_empty());
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let registry = Arc::new(FakeRegistry::new().with_repository(SOURCE_REPO, &["8.1"]));
    let handle = CancelHandle::new();
    handle.cancel();

    let result = engine(&registry)
        .reconcile(&centos_policy(), &handle.signal())
        .await;

    assert!(matches!(result.fatal, Some(PassFailure::Cancelled)));
    assert_eq!(result.outcome(), PassOutcome::Retry);
    assert!(registry.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_transfers_keeps_completed_tags() {
    let registry = Arc::new(
        FakeRegistry::new()
            .with_repository(SOURCE_REPO, &["8.1", "8.2", "8.3"])
            .with_repository(DEST_REPO, &["8.0"]),
    );
    registry.set_push_delay(Duration::from_secs(10));

    let handle = CancelHandle::new();
    let signal = handle.signal();
    let engine = engine_with(&registry, 1, Duration::from_secs(300));
    let pass = tokio::spawn(async move { engine.reconcile(&centos_policy(), &signal).await });

    // 8.1 completes at 10s, 8.2 is in flight at 15s
    tokio::time::sleep(Duration::from_secs(15)).await;
    handle.cancel();
    let result = pass.await.unwrap();

    assert!(matches!(result.fatal, Some(PassFailure::Cancelled)));
    assert_eq!(result.mirrored_tags, tags(&["8.1"]));
    assert!(matches!(result.per_tag_errors["8.2"], TagFailure::Cancelled));
    assert!(matches!(result.per_tag_errors["8.3"], TagFailure::Cancelled));
    assert_eq!(result.outcome(), PassOutcome::Retry);
    assert_eq!(registry.tags(DEST_REPO), tags(&["8.0", "8.1"]));
}

//! Common test utilities for tagmirror-core

#![allow(dead_code)]
#![allow(unused_imports)]

pub mod mocks;

pub use mocks::*;

use std::sync::Arc;
use std::time::Duration;
use tagmirror_core::{EngineOptions, MirrorPolicy, ReconciliationEngine};

pub const SOURCE_REPO: &str = "docker.io/library/centos";
pub const DEST_REPO: &str = "registry.example.com/mirror/centos";

/// The canonical centos policy: `docker.io/library` to
/// `registry.example.com/mirror/`, tags matching `glob: 8*`
pub fn centos_policy() -> MirrorPolicy {
    MirrorPolicy::new(
        "centos",
        "docker.io/library",
        "registry.example.com/mirror/",
        "centos",
        "glob: 8*",
    )
}

pub fn engine(registry: &Arc<FakeRegistry>) -> ReconciliationEngine<FakeRegistry> {
    ReconciliationEngine::new(Arc::clone(registry), EngineOptions::default())
}

pub fn engine_with(
    registry: &Arc<FakeRegistry>,
    max_concurrent_transfers: usize,
    call_timeout: Duration,
) -> ReconciliationEngine<FakeRegistry> {
    ReconciliationEngine::new(
        Arc::clone(registry),
        EngineOptions {
            max_concurrent_transfers,
            call_timeout,
        },
    )
}

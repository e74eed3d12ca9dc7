//! In-memory registry and status sink
//!
//! Lets the engine and the driver run without network access, with
//! failures injected per repository or per reference.

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tagmirror_core::{
    Credentials, ImageReference, MirrorStatus, RegistryCapability, RegistryError, RepositoryName,
    StatusSink, TagSet,
};

/// Image content carried between repositories
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeImage {
    /// Reference the image was first published under
    pub origin: String,
}

/// Which capability operation was called
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    List,
    Fetch,
    Push,
}

/// Record of one capability call
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub op: Op,
    pub target: String,
    pub credentials: Option<Credentials>,
}

/// In-memory registry keyed by `registry/repository`
#[derive(Default)]
pub struct FakeRegistry {
    repositories: Mutex<HashMap<String, BTreeMap<String, FakeImage>>>,
    list_failures: Mutex<HashMap<String, RegistryError>>,
    fetch_failures: Mutex<HashMap<String, RegistryError>>,
    push_failures: Mutex<HashMap<String, RegistryError>>,
    push_delay: Mutex<Option<Duration>>,
    calls: Mutex<Vec<RecordedCall>>,
    pushes_in_flight: AtomicUsize,
    max_pushes_in_flight: AtomicUsize,
}

impl FakeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a repository holding the given tags
    pub fn with_repository(self, repository: &str, tags: &[&str]) -> Self {
        {
            let mut repositories = self.repositories.lock().unwrap();
            let entry = repositories.entry(repository.to_string()).or_default();
            for tag in tags {
                entry.insert(
                    tag.to_string(),
                    FakeImage {
                        origin: format!("{}:{}", repository, tag),
                    },
                );
            }
        }
        self
    }

    pub fn add_tag(&self, repository: &str, tag: &str) {
        self.repositories
            .lock()
            .unwrap()
            .entry(repository.to_string())
            .or_default()
            .insert(
                tag.to_string(),
                FakeImage {
                    origin: format!("{}:{}", repository, tag),
                },
            );
    }

    /// Tags currently stored in a repository
    pub fn tags(&self, repository: &str) -> TagSet {
        self.repositories
            .lock()
            .unwrap()
            .get(repository)
            .map(|tags| tags.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn image(&self, reference: &str) -> Option<FakeImage> {
        let (repository, tag) = reference.rsplit_once(':')?;
        self.repositories
            .lock()
            .unwrap()
            .get(repository)
            .and_then(|tags| tags.get(tag).cloned())
    }

    pub fn fail_list(&self, repository: &str, error: RegistryError) {
        self.list_failures
            .lock()
            .unwrap()
            .insert(repository.to_string(), error);
    }

    pub fn fail_fetch(&self, reference: &str, error: RegistryError) {
        self.fetch_failures
            .lock()
            .unwrap()
            .insert(reference.to_string(), error);
    }

    pub fn fail_push(&self, reference: &str, error: RegistryError) {
        self.push_failures
            .lock()
            .unwrap()
            .insert(reference.to_string(), error);
    }

    pub fn clear_failures(&self) {
        self.list_failures.lock().unwrap().clear();
        self.fetch_failures.lock().unwrap().clear();
        self.push_failures.lock().unwrap().clear();
    }

    /// Make every push take this long
    pub fn set_push_delay(&self, delay: Duration) {
        *self.push_delay.lock().unwrap() = Some(delay);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, op: Op) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.op == op)
            .count()
    }

    pub fn max_pushes_in_flight(&self) -> usize {
        self.max_pushes_in_flight.load(Ordering::SeqCst)
    }

    fn record(&self, op: Op, target: String, credentials: Option<&Credentials>) {
        self.calls.lock().unwrap().push(RecordedCall {
            op,
            target,
            credentials: credentials.cloned(),
        });
    }
}

/// Decrements the in-flight counter even when the push future is dropped
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl RegistryCapability for FakeRegistry {
    type Image = FakeImage;

    async fn list_tags(
        &self,
        repository: &RepositoryName,
        credentials: Option<&Credentials>,
    ) -> Result<TagSet, RegistryError> {
        let key = repository.to_string();
        self.record(Op::List, key.clone(), credentials);

        if let Some(error) = self.list_failures.lock().unwrap().get(&key) {
            return Err(error.clone());
        }

        self.repositories
            .lock()
            .unwrap()
            .get(&key)
            .map(|tags| tags.keys().cloned().collect())
            .ok_or_else(|| RegistryError::not_found(&key))
    }

    async fn fetch_image(
        &self,
        reference: &ImageReference,
        credentials: Option<&Credentials>,
    ) -> Result<FakeImage, RegistryError> {
        let key = reference.to_string();
        self.record(Op::Fetch, key.clone(), credentials);

        if let Some(error) = self.fetch_failures.lock().unwrap().get(&key) {
            return Err(error.clone());
        }

        self.image(&key)
            .ok_or_else(|| RegistryError::not_found(&key))
    }

    async fn push_image(
        &self,
        reference: &ImageReference,
        image: &FakeImage,
        credentials: Option<&Credentials>,
    ) -> Result<(), RegistryError> {
        let key = reference.to_string();
        self.record(Op::Push, key.clone(), credentials);

        let current = self.pushes_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_pushes_in_flight.fetch_max(current, Ordering::SeqCst);
        let _guard = InFlight(&self.pushes_in_flight);

        let delay = *self.push_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(error) = self.push_failures.lock().unwrap().get(&key) {
            return Err(error.clone());
        }

        self.repositories
            .lock()
            .unwrap()
            .entry(reference.repository.to_string())
            .or_default()
            .insert(reference.tag.clone(), image.clone());
        Ok(())
    }
}

/// Status sink that keeps every record in order
#[derive(Default)]
pub struct RecordingSink {
    records: Mutex<Vec<MirrorStatus>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self, policy: &str) -> Vec<MirrorStatus> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter(|status| status.policy == policy)
            .cloned()
            .collect()
    }

    pub fn count(&self, policy: &str) -> usize {
        self.records(policy).len()
    }

    pub fn latest(&self, policy: &str) -> Option<MirrorStatus> {
        self.records(policy).pop()
    }

    /// Wait, in test time, until a policy has at least `n` records
    pub async fn wait_for(&self, policy: &str, n: usize) -> Vec<MirrorStatus> {
        for _ in 0..10_000 {
            let records = self.records(policy);
            if records.len() >= n {
                return records;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("policy {} never reached {} status records", policy, n);
    }
}

#[async_trait]
impl StatusSink for RecordingSink {
    async fn record(&self, status: &MirrorStatus) -> Result<()> {
        self.records.lock().unwrap().push(status.clone());
        Ok(())
    }

    async fn load(&self, policy: &str) -> Result<Option<MirrorStatus>> {
        Ok(self.latest(policy))
    }
}

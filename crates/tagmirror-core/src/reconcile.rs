//! The reconciliation engine
//!
//! One pass lists both sides of a mirror, works out which selected tags
//! the destination lacks, and copies each of them independently. The pass
//! never stops at the first failed tag; every outcome is collected and
//! returned as data for the driver to persist.

use crate::cancel::CancelSignal;
use crate::credentials::Credentials;
use crate::error::{PassFailure, RegistryError, Side};
use crate::pattern::TagMatcher;
use crate::policy::MirrorPolicy;
use crate::reference::{ImageReference, RepositoryName};
use crate::registry::RegistryCapability;
use crate::tagset::TagSet;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Default number of tags transferred concurrently within one pass
pub const DEFAULT_MAX_CONCURRENT_TRANSFERS: usize = 4;

/// Default per-call timeout for registry operations
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(300);

/// Tuning for a reconciliation engine
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Upper bound on concurrent tag transfers
    pub max_concurrent_transfers: usize,
    /// Deadline for each list, fetch or push call
    pub call_timeout: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            max_concurrent_transfers: DEFAULT_MAX_CONCURRENT_TRANSFERS,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

/// What a pass intends to do, computed before any transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationPlan {
    pub source: RepositoryName,
    pub destination: RepositoryName,
    pub source_tags: TagSet,
    pub destination_tags: TagSet,
    /// Source tags the pattern selects
    pub filtered: TagSet,
    /// Selected tags already at the destination
    pub already_mirrored: TagSet,
    /// Selected tags the destination lacks
    pub missing: TagSet,
}

impl ReconciliationPlan {
    /// Classify tags into filtered, already mirrored and missing
    pub fn compute<M: TagMatcher + ?Sized>(
        source: RepositoryName,
        destination: RepositoryName,
        source_tags: TagSet,
        destination_tags: TagSet,
        matcher: &M,
    ) -> Self {
        let filtered = source_tags.filter(matcher);
        let already_mirrored = filtered.intersection(&destination_tags);
        let missing = filtered.difference(&destination_tags);

        Self {
            source,
            destination,
            source_tags,
            destination_tags,
            filtered,
            already_mirrored,
            missing,
        }
    }

    /// True when the destination already holds every selected tag
    pub fn is_converged(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Why one tag failed to transfer
#[derive(Error, Debug, Clone)]
pub enum TagFailure {
    #[error("unable to fetch {reference}: {source}")]
    Fetch {
        reference: String,
        #[source]
        source: RegistryError,
    },

    #[error("unable to push {reference}: {source}")]
    Push {
        reference: String,
        #[source]
        source: RegistryError,
    },

    #[error("cancelled before the transfer completed")]
    Cancelled,
}

impl TagFailure {
    fn fetch(reference: &ImageReference, source: RegistryError) -> Self {
        match source {
            RegistryError::Cancelled { .. } => TagFailure::Cancelled,
            source => TagFailure::Fetch {
                reference: reference.to_string(),
                source,
            },
        }
    }

    fn push(reference: &ImageReference, source: RegistryError) -> Self {
        match source {
            RegistryError::Cancelled { .. } => TagFailure::Cancelled,
            source => TagFailure::Push {
                reference: reference.to_string(),
                source,
            },
        }
    }

    /// Whether a later pass may succeed for this tag
    pub fn is_retryable(&self) -> bool {
        match self {
            TagFailure::Fetch { source, .. } | TagFailure::Push { source, .. } => {
                source.is_retryable()
            }
            TagFailure::Cancelled => true,
        }
    }
}

/// How the driver should treat a finished pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// Every selected tag is at the destination
    Converged,
    /// Something failed that a later pass may fix
    Retry,
    /// Something failed that needs a configuration change
    Terminal,
}

/// Everything one pass produced
#[derive(Debug)]
pub struct ReconciliationResult {
    /// Policy identity the pass ran for
    pub policy: String,
    /// The plan, absent when listing or configuration failed first
    pub plan: Option<ReconciliationPlan>,
    /// Selected tags now present at the destination
    pub mirrored_tags: TagSet,
    /// Tags copied during this pass
    pub transferred: TagSet,
    pub per_tag_errors: BTreeMap<String, TagFailure>,
    pub fatal: Option<PassFailure>,
}

impl ReconciliationResult {
    fn failed(policy: &str, fatal: PassFailure) -> Self {
        Self {
            policy: policy.to_string(),
            plan: None,
            mirrored_tags: TagSet::new(),
            transferred: TagSet::new(),
            per_tag_errors: BTreeMap::new(),
            fatal: Some(fatal),
        }
    }

    /// Tags the pass found missing at the destination
    pub fn missing(&self) -> TagSet {
        self.plan
            .as_ref()
            .map(|plan| plan.missing.clone())
            .unwrap_or_default()
    }

    pub fn is_converged(&self) -> bool {
        self.outcome() == PassOutcome::Converged
    }

    /// Classify the pass for retry scheduling
    pub fn outcome(&self) -> PassOutcome {
        match &self.fatal {
            Some(fatal) if fatal.is_retryable() => PassOutcome::Retry,
            Some(_) => PassOutcome::Terminal,
            None if self.per_tag_errors.is_empty() => PassOutcome::Converged,
            None if self.per_tag_errors.values().any(TagFailure::is_retryable) => {
                PassOutcome::Retry
            }
            None => PassOutcome::Terminal,
        }
    }
}

/// Drives one policy's destination toward its source
pub struct ReconciliationEngine<R> {
    registry: Arc<R>,
    options: EngineOptions,
}

impl<R> Clone for ReconciliationEngine<R> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            options: self.options.clone(),
        }
    }
}

impl<R: RegistryCapability> ReconciliationEngine<R> {
    pub fn new(registry: Arc<R>, options: EngineOptions) -> Self {
        Self { registry, options }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// List both sides and compute what a pass would transfer
    ///
    /// # Errors
    /// [`PassFailure::Configuration`] for invalid policies or patterns,
    /// [`PassFailure::Listing`] when either side cannot be listed, and
    /// [`PassFailure::Cancelled`] when the signal fires. A repository that
    /// does not exist lists as empty rather than failing.
    pub async fn plan(
        &self,
        policy: &MirrorPolicy,
        cancel: &CancelSignal,
    ) -> Result<ReconciliationPlan, PassFailure> {
        policy.validate()?;
        let pattern = policy.compile_pattern()?;
        if pattern.is_none() {
            warn!(
                policy = %policy.name,
                pattern = %policy.pattern,
                "Pattern has no recognized prefix; no tags will be mirrored"
            );
        }

        let source = policy.source()?;
        let destination = policy.destination()?;

        let source_tags = self
            .list_side(
                Side::Source,
                &source,
                policy.source_credentials.as_ref(),
                cancel,
            )
            .await?;
        debug!(policy = %policy.name, tags = %source_tags, "Source repository tags");

        let destination_tags = self
            .list_side(
                Side::Destination,
                &destination,
                policy.destination_credentials.as_ref(),
                cancel,
            )
            .await?;
        debug!(policy = %policy.name, tags = %destination_tags, "Destination repository tags");

        let plan = ReconciliationPlan::compute(
            source,
            destination,
            source_tags,
            destination_tags,
            &pattern,
        );

        debug!(policy = %policy.name, tags = %plan.filtered, "Filtered source repository tags");
        debug!(policy = %policy.name, tags = %plan.already_mirrored, "Mirrored destination tags");
        debug!(policy = %policy.name, tags = %plan.missing, "Missing destination tags");
        info!(
            policy = %policy.name,
            source = %plan.source,
            destination = %plan.destination,
            filtered = plan.filtered.len(),
            mirrored = plan.already_mirrored.len(),
            missing = plan.missing.len(),
            "Computed mirror plan"
        );

        Ok(plan)
    }

    /// Run one full reconciliation pass
    ///
    /// Never fails: configuration, listing and per-tag errors are all
    /// reported inside the returned result.
    pub async fn reconcile(
        &self,
        policy: &MirrorPolicy,
        cancel: &CancelSignal,
    ) -> ReconciliationResult {
        let plan = match self.plan(policy, cancel).await {
            Ok(plan) => plan,
            Err(fatal) => {
                warn!(policy = %policy.name, error = %fatal, "Reconciliation pass failed");
                return ReconciliationResult::failed(&policy.name, fatal);
            }
        };

        let mut transferred = TagSet::new();
        let mut per_tag_errors = BTreeMap::new();
        for (tag, outcome) in self.transfer_missing(policy, &plan, cancel).await {
            match outcome {
                Ok(()) => {
                    transferred.insert(tag);
                }
                Err(failure) => {
                    warn!(
                        policy = %policy.name,
                        tag = %tag,
                        error = %failure,
                        "Tag transfer failed"
                    );
                    per_tag_errors.insert(tag, failure);
                }
            }
        }

        let mirrored_tags = plan.already_mirrored.union(&transferred);
        let fatal = if cancel.is_cancelled()
            && per_tag_errors
                .values()
                .any(|failure| matches!(failure, TagFailure::Cancelled))
        {
            Some(PassFailure::Cancelled)
        } else {
            None
        };

        info!(
            policy = %policy.name,
            mirrored = mirrored_tags.len(),
            transferred = transferred.len(),
            failed = per_tag_errors.len(),
            "Reconciliation pass finished"
        );

        ReconciliationResult {
            policy: policy.name.clone(),
            plan: Some(plan),
            mirrored_tags,
            transferred,
            per_tag_errors,
            fatal,
        }
    }

    async fn list_side(
        &self,
        side: Side,
        repository: &RepositoryName,
        credentials: Option<&Credentials>,
        cancel: &CancelSignal,
    ) -> Result<TagSet, PassFailure> {
        let target = repository.to_string();
        match self
            .guarded(&target, cancel, self.registry.list_tags(repository, credentials))
            .await
        {
            Ok(tags) => Ok(tags),
            Err(e) if e.is_not_found() => {
                info!(
                    repository = %target,
                    side = %side,
                    "Repository does not exist yet; treating it as empty"
                );
                Ok(TagSet::new())
            }
            Err(RegistryError::Cancelled { .. }) => Err(PassFailure::Cancelled),
            Err(source) => Err(PassFailure::Listing {
                side,
                repository: target,
                source,
            }),
        }
    }

    /// Transfer every missing tag on a bounded pool, collecting all outcomes
    async fn transfer_missing(
        &self,
        policy: &MirrorPolicy,
        plan: &ReconciliationPlan,
        cancel: &CancelSignal,
    ) -> Vec<(String, Result<(), TagFailure>)> {
        let semaphore = Semaphore::new(self.options.max_concurrent_transfers.max(1));
        let semaphore = &semaphore;
        let mut transfers = FuturesUnordered::new();

        for tag in &plan.missing {
            let source_ref = plan.source.with_tag(tag);
            let destination_ref = plan.destination.with_tag(tag);

            transfers.push(async move {
                let _permit = semaphore.acquire().await.ok();
                let outcome = self
                    .transfer(policy, &source_ref, &destination_ref, cancel)
                    .await;
                (source_ref.tag, outcome)
            });
        }

        let mut outcomes = Vec::with_capacity(plan.missing.len());
        while let Some(outcome) = transfers.next().await {
            outcomes.push(outcome);
        }
        outcomes
    }

    async fn transfer(
        &self,
        policy: &MirrorPolicy,
        source_ref: &ImageReference,
        destination_ref: &ImageReference,
        cancel: &CancelSignal,
    ) -> Result<(), TagFailure> {
        if cancel.is_cancelled() {
            return Err(TagFailure::Cancelled);
        }

        debug!("Copying {} to {}", source_ref, destination_ref);

        let image = self
            .guarded(
                &source_ref.to_string(),
                cancel,
                self.registry
                    .fetch_image(source_ref, policy.source_credentials.as_ref()),
            )
            .await
            .map_err(|e| TagFailure::fetch(source_ref, e))?;

        self.guarded(
            &destination_ref.to_string(),
            cancel,
            self.registry.push_image(
                destination_ref,
                &image,
                policy.destination_credentials.as_ref(),
            ),
        )
        .await
        .map_err(|e| TagFailure::push(destination_ref, e))?;

        info!(policy = %policy.name, tag = %destination_ref.tag, "Mirrored {}", destination_ref);
        Ok(())
    }

    /// Apply the per-call timeout and the cancellation signal to a call
    async fn guarded<T, F>(
        &self,
        target: &str,
        cancel: &CancelSignal,
        call: F,
    ) -> Result<T, RegistryError>
    where
        F: Future<Output = Result<T, RegistryError>>,
    {
        if cancel.is_cancelled() {
            return Err(RegistryError::cancelled(target));
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RegistryError::cancelled(target)),
            result = tokio::time::timeout(self.options.call_timeout, call) => match result {
                Ok(result) => result,
                Err(_) => Err(RegistryError::timeout(target, self.options.call_timeout.as_secs())),
            },
        }
    }
}

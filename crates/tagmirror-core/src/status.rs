//! Observed state persisted after every pass

use crate::reconcile::{PassOutcome, ReconciliationResult};
use crate::tagset::TagSet;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Last observed state of one policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MirrorStatus {
    pub policy: String,
    /// Selected tags known to be present at the destination
    pub mirrored_tags: TagSet,
    /// Tag to failure message, for tags the last pass could not copy
    #[serde(default)]
    pub failed_tags: BTreeMap<String, String>,
    /// Pass-level failure of the last pass
    pub last_error: Option<String>,
    /// Whether a retry was scheduled for the last failure
    pub retryable: bool,
    pub observed_at: DateTime<Utc>,
}

impl MirrorStatus {
    /// Status for a finished pass
    ///
    /// A pass that failed before listing knows nothing new about the
    /// destination, so `previous` mirrored tags are carried over.
    pub fn from_result(result: &ReconciliationResult, previous: Option<&MirrorStatus>) -> Self {
        let mirrored_tags = match (&result.plan, previous) {
            (None, Some(previous)) => previous.mirrored_tags.clone(),
            _ => result.mirrored_tags.clone(),
        };

        Self {
            policy: result.policy.clone(),
            mirrored_tags,
            failed_tags: result
                .per_tag_errors
                .iter()
                .map(|(tag, failure)| (tag.clone(), failure.to_string()))
                .collect(),
            last_error: result.fatal.as_ref().map(ToString::to_string),
            retryable: result.outcome() == PassOutcome::Retry,
            observed_at: Utc::now(),
        }
    }

    /// Status for a policy that could not be built from its declaration
    ///
    /// Nothing was listed, so `previous` mirrored tags are carried over. No
    /// retry follows until the declaration changes.
    pub fn rejected(
        policy: &str,
        error: &impl std::fmt::Display,
        previous: Option<&MirrorStatus>,
    ) -> Self {
        Self {
            policy: policy.to_string(),
            mirrored_tags: previous
                .map(|previous| previous.mirrored_tags.clone())
                .unwrap_or_default(),
            failed_tags: BTreeMap::new(),
            last_error: Some(format!("policy rejected: {}", error)),
            retryable: false,
            observed_at: Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.last_error.is_none() && self.failed_tags.is_empty()
    }
}

/// Destination for per-policy status
#[async_trait]
pub trait StatusSink: Send + Sync {
    /// Record the latest status, replacing any earlier one
    async fn record(&self, status: &MirrorStatus) -> Result<()>;

    /// Latest recorded status for a policy
    async fn load(&self, policy: &str) -> Result<Option<MirrorStatus>>;
}

/// Keeps status in memory only
#[derive(Debug, Default)]
pub struct MemoryStatusSink {
    statuses: Mutex<HashMap<String, MirrorStatus>>,
}

impl MemoryStatusSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every recorded status
    pub fn snapshot(&self) -> Vec<MirrorStatus> {
        let statuses = match self.statuses.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut all: Vec<_> = statuses.values().cloned().collect();
        all.sort_by(|a, b| a.policy.cmp(&b.policy));
        all
    }
}

#[async_trait]
impl StatusSink for MemoryStatusSink {
    async fn record(&self, status: &MirrorStatus) -> Result<()> {
        let mut statuses = match self.statuses.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        statuses.insert(status.policy.clone(), status.clone());
        Ok(())
    }

    async fn load(&self, policy: &str) -> Result<Option<MirrorStatus>> {
        let statuses = match self.statuses.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Ok(statuses.get(policy).cloned())
    }
}

/// Writes `<dir>/<policy>.json` per policy
#[derive(Debug, Clone)]
pub struct FileStatusSink {
    dir: PathBuf,
}

impl FileStatusSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, policy: &str) -> PathBuf {
        self.dir.join(status_file_name(policy))
    }
}

/// File a policy's status is written to inside the status directory
///
/// Characters outside `[A-Za-z0-9._-]` become `_`, so distinct policy
/// names can map to the same file.
pub fn status_file_name(policy: &str) -> String {
    let stem: String = policy
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{}.json", stem)
}

#[async_trait]
impl StatusSink for FileStatusSink {
    async fn record(&self, status: &MirrorStatus) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create status directory {}", self.dir.display()))?;

        let path = self.path_for(&status.policy);
        let tmp = path.with_extension("json.tmp");
        let json =
            serde_json::to_string_pretty(status).context("Failed to serialize mirror status")?;

        tokio::fs::write(&tmp, json)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to replace {}", path.display()))?;
        Ok(())
    }

    async fn load(&self, policy: &str) -> Result<Option<MirrorStatus>> {
        let path = self.path_for(policy);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()))
            }
        };
        let status = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(Some(status))
    }
}

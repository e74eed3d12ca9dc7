//! Convergence driver
//!
//! Runs reconciliation passes for many policies. Each policy gets its own
//! worker task, so at most one pass per policy is in flight while passes
//! for different policies run in parallel. A worker wakes on an explicit
//! trigger, a policy update, its scheduled retry, or the periodic resync
//! timer. Triggers that arrive during a pass collapse into one follow-up
//! pass through a capacity-one channel.

use crate::backoff::BackoffPolicy;
use crate::cancel::{CancelHandle, CancelSignal};
use crate::error::Error;
use crate::policy::MirrorPolicy;
use crate::reconcile::{PassOutcome, ReconciliationEngine};
use crate::registry::RegistryCapability;
use crate::status::{MirrorStatus, StatusSink};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Driver tuning
#[derive(Debug, Clone, Default)]
pub struct DriverOptions {
    /// Delay before the single retry after a retryable failure
    pub backoff: BackoffPolicy,
    /// Trigger every policy on this period, if set
    pub resync_interval: Option<Duration>,
}

/// Where a policy's worker currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    /// Waiting for a trigger
    Idle,
    /// A pass is in flight
    Reconciling,
    /// Waiting for a scheduled retry
    Backoff,
    /// Worker has exited
    Stopped,
}

impl fmt::Display for DriverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverState::Idle => write!(f, "idle"),
            DriverState::Reconciling => write!(f, "reconciling"),
            DriverState::Backoff => write!(f, "backoff"),
            DriverState::Stopped => write!(f, "stopped"),
        }
    }
}

struct Worker {
    policy_tx: watch::Sender<MirrorPolicy>,
    trigger_tx: mpsc::Sender<()>,
    state_rx: watch::Receiver<DriverState>,
    stop: CancelHandle,
    handle: JoinHandle<()>,
}

impl Worker {
    fn trigger(&self) -> bool {
        match self.trigger_tx.try_send(()) {
            Ok(()) => true,
            // A pass is already queued; this trigger folds into it
            Err(mpsc::error::TrySendError::Full(())) => true,
            Err(mpsc::error::TrySendError::Closed(())) => false,
        }
    }

    async fn stop(self) {
        self.stop.cancel();
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Policy worker ended abnormally");
        }
    }
}

/// Keeps every declared policy converging toward its source
pub struct ConvergenceDriver<R: RegistryCapability + 'static> {
    engine: ReconciliationEngine<R>,
    sink: Arc<dyn StatusSink>,
    options: DriverOptions,
    workers: Mutex<HashMap<String, Worker>>,
}

impl<R: RegistryCapability + 'static> ConvergenceDriver<R> {
    pub fn new(
        engine: ReconciliationEngine<R>,
        sink: Arc<dyn StatusSink>,
        options: DriverOptions,
    ) -> Self {
        Self {
            engine,
            sink,
            options,
            workers: Mutex::new(HashMap::new()),
        }
    }

    fn workers(&self) -> MutexGuard<'_, HashMap<String, Worker>> {
        match self.workers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Declare or update a policy and trigger a pass for it
    ///
    /// An unchanged policy is not re-triggered. A changed policy takes
    /// effect on the next pass; a pass already in flight keeps the
    /// snapshot it started with.
    pub fn upsert(&self, policy: MirrorPolicy) {
        let mut workers = self.workers();

        if let Some(worker) = workers.get(&policy.name) {
            if !worker.handle.is_finished() {
                let changed = worker.policy_tx.send_if_modified(|current| {
                    if *current == policy {
                        false
                    } else {
                        *current = policy.clone();
                        true
                    }
                });
                if changed {
                    debug!(policy = %policy.name, "Policy updated");
                    worker.trigger();
                }
                return;
            }
        }

        let name = policy.name.clone();
        info!(policy = %name, "Starting policy worker");
        let worker = self.spawn_worker(policy);
        worker.trigger();
        workers.insert(name, worker);
    }

    /// Request a pass for one policy
    ///
    /// Returns false when the policy is unknown or its worker has stopped.
    pub fn trigger(&self, name: &str) -> bool {
        self.workers()
            .get(name)
            .map(Worker::trigger)
            .unwrap_or(false)
    }

    /// Request a pass for every policy
    pub fn trigger_all(&self) {
        for worker in self.workers().values() {
            worker.trigger();
        }
    }

    /// Stop a policy's worker, cancelling any pass in flight
    pub async fn remove(&self, name: &str) -> bool {
        let worker = self.workers().remove(name);
        match worker {
            Some(worker) => {
                info!(policy = %name, "Stopping policy worker");
                worker.stop().await;
                true
            }
            None => false,
        }
    }

    /// Record a policy whose declaration could not be built
    ///
    /// Any worker already running under that name is stopped. The policy
    /// gets a terminal status and no pass runs until it is upserted again.
    pub async fn reject(&self, name: &str, problem: &Error) {
        self.remove(name).await;
        error!(policy = %name, error = %problem, "Policy rejected");

        let previous = match self.sink.load(name).await {
            Ok(previous) => previous,
            Err(e) => {
                warn!(policy = %name, error = %e, "Ignoring unreadable status");
                None
            }
        };
        let status = MirrorStatus::rejected(name, problem, previous.as_ref());
        if let Err(e) = self.sink.record(&status).await {
            warn!(policy = %name, error = %e, "Failed to record status");
        }
    }

    /// Current state of a policy's worker
    pub fn state(&self, name: &str) -> Option<DriverState> {
        self.workers().get(name).map(|w| *w.state_rx.borrow())
    }

    /// Watch a policy's state transitions
    pub fn subscribe(&self, name: &str) -> Option<watch::Receiver<DriverState>> {
        self.workers().get(name).map(|w| w.state_rx.clone())
    }

    /// Names of all declared policies, sorted
    pub fn policies(&self) -> Vec<String> {
        let mut names: Vec<String> = self.workers().keys().cloned().collect();
        names.sort();
        names
    }

    /// Cancel in-flight passes and wait for every worker to exit
    pub async fn shutdown(&self) {
        let workers: Vec<Worker> = self.workers().drain().map(|(_, w)| w).collect();
        info!(workers = workers.len(), "Shutting down convergence driver");
        for worker in &workers {
            worker.stop.cancel();
        }
        for worker in workers {
            worker.stop().await;
        }
    }

    fn spawn_worker(&self, policy: MirrorPolicy) -> Worker {
        let (policy_tx, policy_rx) = watch::channel(policy);
        let (trigger_tx, trigger_rx) = mpsc::channel(1);
        let (state_tx, state_rx) = watch::channel(DriverState::Idle);
        let stop = CancelHandle::new();

        let task = PolicyTask {
            engine: self.engine.clone(),
            sink: Arc::clone(&self.sink),
            options: self.options.clone(),
            policy_rx,
            trigger_rx,
            state_tx,
            stop: stop.signal(),
        };
        let handle = tokio::spawn(task.run());

        Worker {
            policy_tx,
            trigger_tx,
            state_rx,
            stop,
            handle,
        }
    }
}

/// Single consumer of one policy's triggers
struct PolicyTask<R> {
    engine: ReconciliationEngine<R>,
    sink: Arc<dyn StatusSink>,
    options: DriverOptions,
    policy_rx: watch::Receiver<MirrorPolicy>,
    trigger_rx: mpsc::Receiver<()>,
    state_tx: watch::Sender<DriverState>,
    stop: CancelSignal,
}

impl<R: RegistryCapability + 'static> PolicyTask<R> {
    async fn run(mut self) {
        let name = self.policy_rx.borrow().name.clone();
        let mut last_status = match self.sink.load(&name).await {
            Ok(status) => status,
            Err(e) => {
                warn!(policy = %name, error = %e, "Unable to load previous status");
                None
            }
        };

        let mut resync = self.options.resync_interval.map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        let mut retry_at: Option<Instant> = None;
        let mut consecutive_failures: u32 = 0;

        loop {
            tokio::select! {
                biased;
                _ = self.stop.cancelled() => break,
                trigger = self.trigger_rx.recv() => {
                    if trigger.is_none() {
                        break;
                    }
                    debug!(policy = %name, "Pass triggered");
                }
                _ = sleep_until(retry_at) => {
                    debug!(policy = %name, "Retrying after backoff");
                }
                _ = tick(&mut resync) => {
                    debug!(policy = %name, "Periodic resync");
                }
            }

            // Any pass covers the pending retry
            retry_at = None;
            self.state_tx.send_replace(DriverState::Reconciling);

            let policy = self.policy_rx.borrow_and_update().clone();
            let result = self.engine.reconcile(&policy, &self.stop).await;

            let status = MirrorStatus::from_result(&result, last_status.as_ref());
            if let Err(e) = self.sink.record(&status).await {
                warn!(policy = %name, error = %e, "Failed to record status");
            }
            last_status = Some(status);

            match result.outcome() {
                PassOutcome::Converged => {
                    consecutive_failures = 0;
                    info!(policy = %name, tags = %result.mirrored_tags, "Policy converged");
                    self.state_tx.send_replace(DriverState::Idle);
                }
                PassOutcome::Terminal => {
                    consecutive_failures = 0;
                    match &result.fatal {
                        Some(fatal) => {
                            error!(
                                policy = %name,
                                error = %fatal,
                                "Policy needs a configuration change"
                            )
                        }
                        None => error!(
                            policy = %name,
                            failed = result.per_tag_errors.len(),
                            "Tags failed with errors a retry cannot fix"
                        ),
                    }
                    self.state_tx.send_replace(DriverState::Idle);
                }
                PassOutcome::Retry => {
                    consecutive_failures = consecutive_failures.saturating_add(1);
                    let delay = self.options.backoff.delay_for(consecutive_failures);
                    retry_at = Some(Instant::now() + delay);
                    warn!(
                        policy = %name,
                        failures = consecutive_failures,
                        delay_secs = delay.as_secs(),
                        "Pass incomplete; retry scheduled"
                    );
                    self.state_tx.send_replace(DriverState::Backoff);
                }
            }
        }

        debug!(policy = %name, "Policy worker exiting");
        self.state_tx.send_replace(DriverState::Stopped);
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(DriverState::Backoff.to_string(), "backoff");
        assert_eq!(DriverState::Reconciling.to_string(), "reconciling");
    }

    #[test]
    fn test_default_options() {
        let options = DriverOptions::default();
        assert!(options.resync_interval.is_none());
        assert_eq!(options.backoff.delay_for(1), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_until_none_never_fires() {
        let fired = tokio::time::timeout(Duration::from_secs(3600), sleep_until(None)).await;
        assert!(fired.is_err());

        let deadline = Instant::now() + Duration::from_secs(5);
        tokio::time::timeout(Duration::from_secs(6), sleep_until(Some(deadline)))
            .await
            .unwrap();
    }
}

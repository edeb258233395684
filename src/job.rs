//! Handles for jobs the scheduler was asked to run.
//!
//! A [`QueuedJob`] is what `run_event` hands back: it resolves once, either
//! to a started [`Job`] or to a launch failure. A [`Job`] tracks the status
//! of a started job until its completion notification arrives.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use serde_json::Value;
use tracing::{info, warn};

use crate::api::{ApiError, Event, JobStatus, SchedulerApi};
use crate::error::CronicleError;
use crate::notification::{self, Action, CompleteNotification, StartNotification};
use crate::sync::{Latch, WaitError, lock};

/// Bounded retry for status fetches: `retries` extra attempts, `delay`
/// between each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusRetry {
    pub retries: u32,
    pub delay: Duration,
}

impl StatusRetry {
    pub fn new(retries: u32, delay: Duration) -> Self {
        Self { retries, delay }
    }

    /// A single attempt.
    pub fn once() -> Self {
        Self::new(0, Duration::ZERO)
    }
}

/// Retry settings for the two points a job fetches its status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusPolicy {
    pub on_start: StatusRetry,
    pub on_complete: StatusRetry,
}

impl Default for StatusPolicy {
    fn default() -> Self {
        let delay = Duration::from_secs(2);
        Self {
            on_start: StatusRetry::new(0, delay),
            on_complete: StatusRetry::new(3, delay),
        }
    }
}

fn fetch_status(
    api: &dyn SchedulerApi,
    job_id: &str,
    retry: StatusRetry,
) -> Result<JobStatus, ApiError> {
    let mut remaining = retry.retries;
    loop {
        match api.get_job_status(job_id) {
            Ok(status) => return Ok(status),
            Err(e) if remaining == 0 => return Err(e),
            Err(e) => {
                remaining -= 1;
                warn!(job = job_id, remaining, error = %e, "status fetch failed, retrying");
                thread::sleep(retry.delay);
            }
        }
    }
}

/// Marks `status` complete and fills in the result fields the scheduler's
/// snapshot has not caught up on from the completion notification.
fn settle(status: &mut JobStatus, done: &CompleteNotification) {
    status.mark_complete();
    if status.code.is_null() {
        status.code = done.code.clone();
    }
    if status.description.is_none() {
        status.description = done.description.clone();
    }
}

/// A job the scheduler has started.
pub struct Job {
    api: Arc<dyn SchedulerApi>,
    event_title: String,
    start: StartNotification,
    // Last snapshot; replaced wholesale on every fetch.
    status: Mutex<JobStatus>,
    completion: Mutex<Option<CompleteNotification>>,
    // Resolves when the completion notification has been recorded.
    completed: Latch<()>,
    policy: StatusPolicy,
}

impl Job {
    /// Builds a job from its start notification and fetches its first status
    /// snapshot. Fails if every fetch attempt fails.
    pub fn start(
        api: Arc<dyn SchedulerApi>,
        event: &Event,
        start: StartNotification,
        policy: StatusPolicy,
    ) -> Result<Arc<Self>, CronicleError> {
        let status = fetch_status(api.as_ref(), &start.id, policy.on_start)?;
        info!(job = %start.id, event = %event.title, "job started");
        Ok(Arc::new(Self {
            api,
            event_title: event.title.clone(),
            start,
            status: Mutex::new(status),
            completion: Mutex::new(None),
            completed: Latch::new(),
            policy,
        }))
    }

    /// Records the completion notification and wakes everyone waiting on it.
    pub fn on_complete(&self, payload: &Value) -> Result<(), CronicleError> {
        let done: CompleteNotification = notification::parse(Action::Complete, payload)?;
        if done.id != self.start.id {
            return Err(CronicleError::protocol(format!(
                "Received a complete notification for the wrong job: expected {}, got {}.",
                self.start.id, done.id
            )));
        }
        if self.completed.is_resolved() {
            return Err(CronicleError::protocol(format!(
                "Job {} already completed.",
                self.start.id
            )));
        }

        let mut status = fetch_status(self.api.as_ref(), &self.start.id, self.policy.on_complete)?;
        settle(&mut status, &done);
        *lock(&self.status) = status;
        *lock(&self.completion) = Some(done);

        info!(job = %self.start.id, code = ?self.code(), "job complete");
        self.completed.resolve(());
        Ok(())
    }

    /// Fetches a fresh status snapshot.
    pub fn refresh_status(&self) -> Result<(), CronicleError> {
        let mut status = fetch_status(self.api.as_ref(), &self.start.id, self.policy.on_start)?;
        // A lagging snapshot must not un-complete the job.
        if let Some(done) = lock(&self.completion).as_ref() {
            settle(&mut status, done);
        }
        *lock(&self.status) = status;
        Ok(())
    }

    /// Runs `callback` once the job completes, or right away if it already has.
    pub fn register_on_complete(self: &Arc<Self>, callback: impl FnOnce(Arc<Job>) + Send + 'static) {
        // Weak, so an abandoned pending callback cannot keep the job alive.
        let job = Arc::downgrade(self);
        self.completed.register(move |()| {
            if let Some(job) = job.upgrade() {
                callback(job);
            }
        });
    }

    /// Blocks until completion. There is no deadline; see
    /// [`Job::wait_for_complete_timeout`].
    pub fn wait_for_complete(self: &Arc<Self>) -> Result<Arc<Job>, CronicleError> {
        match self.completed.wait() {
            Some(()) => Ok(self.clone()),
            None => Err(CronicleError::Abandoned),
        }
    }

    pub fn wait_for_complete_timeout(
        self: &Arc<Self>,
        timeout: Duration,
    ) -> Result<Arc<Job>, CronicleError> {
        match self.completed.wait_timeout(timeout) {
            Ok(()) => Ok(self.clone()),
            Err(WaitError::Timeout) => Err(CronicleError::Timeout(timeout)),
            Err(WaitError::Disconnected) => Err(CronicleError::Abandoned),
        }
    }

    pub fn id(&self) -> &str {
        &self.start.id
    }

    pub fn details_url(&self) -> &str {
        &self.start.job_details_url
    }

    pub fn event_title(&self) -> &str {
        &self.event_title
    }

    pub fn start_data(&self) -> &StartNotification {
        &self.start
    }

    pub fn completion(&self) -> Option<CompleteNotification> {
        lock(&self.completion).clone()
    }

    pub fn status(&self) -> JobStatus {
        lock(&self.status).clone()
    }

    pub fn is_complete(&self) -> bool {
        lock(&self.status).is_complete()
    }

    pub fn is_failed(&self) -> bool {
        lock(&self.status).is_failed()
    }

    /// Fraction done in `0.0..=1.0`; exactly `1.0` once complete.
    pub fn progress(&self) -> f64 {
        let status = lock(&self.status);
        if status.is_complete() {
            1.0
        } else {
            status.progress.unwrap_or(0.0)
        }
    }

    /// Seconds elapsed, as last reported.
    pub fn elapsed(&self) -> Option<f64> {
        lock(&self.status).elapsed
    }

    pub fn code(&self) -> Option<i64> {
        lock(&self.status).code()
    }

    pub fn description(&self) -> Option<String> {
        lock(&self.status).description.clone()
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.start.id)
            .field("event", &self.event_title)
            .field("complete", &self.is_complete())
            .finish()
    }
}

/// A run request waiting for the scheduler to start it.
pub struct QueuedJob {
    event_title: String,
    // `None` means the job failed to launch.
    resolution: Latch<Option<Arc<Job>>>,
}

impl QueuedJob {
    pub fn new(event: &Event) -> Self {
        Self {
            event_title: event.title.clone(),
            resolution: Latch::new(),
        }
    }

    pub fn on_start(&self, job: Arc<Job>) -> Result<(), CronicleError> {
        if !self.resolution.resolve(Some(job)) {
            return Err(CronicleError::protocol(format!(
                "Queued job for {} already resolved.",
                self.event_title
            )));
        }
        Ok(())
    }

    pub fn on_launch_failure(&self) -> Result<(), CronicleError> {
        warn!(event = %self.event_title, "job failed to launch");
        if !self.resolution.resolve(None) {
            return Err(CronicleError::protocol(format!(
                "Queued job for {} already resolved.",
                self.event_title
            )));
        }
        Ok(())
    }

    /// Runs `callback` with the started job (or `None` on launch failure)
    /// once resolved; immediately if it already is.
    pub fn register_on_started(&self, callback: impl FnOnce(Option<Arc<Job>>) + Send + 'static) {
        self.resolution.register(callback);
    }

    /// Blocks until the job starts or fails to launch. There is no deadline;
    /// see [`QueuedJob::wait_for_job_timeout`].
    pub fn wait_for_job(&self) -> Result<Arc<Job>, CronicleError> {
        match self.resolution.wait() {
            Some(resolved) => self.started(resolved),
            None => Err(CronicleError::Abandoned),
        }
    }

    pub fn wait_for_job_timeout(&self, timeout: Duration) -> Result<Arc<Job>, CronicleError> {
        match self.resolution.wait_timeout(timeout) {
            Ok(resolved) => self.started(resolved),
            Err(WaitError::Timeout) => Err(CronicleError::Timeout(timeout)),
            Err(WaitError::Disconnected) => Err(CronicleError::Abandoned),
        }
    }

    fn started(&self, resolved: Option<Arc<Job>>) -> Result<Arc<Job>, CronicleError> {
        resolved.ok_or_else(|| CronicleError::LaunchFailure {
            event: self.event_title.clone(),
        })
    }

    /// True once resolved either way.
    pub fn is_resolved(&self) -> bool {
        self.resolution.is_resolved()
    }

    pub fn job(&self) -> Option<Arc<Job>> {
        self.resolution.get().flatten()
    }

    pub fn event_title(&self) -> &str {
        &self.event_title
    }
}

impl fmt::Debug for QueuedJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuedJob")
            .field("event", &self.event_title)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

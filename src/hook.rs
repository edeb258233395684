//! Per-request state machine driven by inbound notifications.
//!
//! Pending → Started → Finished, or Pending → Finished on launch failure.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::blocking::Client;
use serde_json::Value;
use tracing::debug;

use crate::api::{ApiError, Event, SchedulerApi};
use crate::error::CronicleError;
use crate::job::{Job, QueuedJob, StatusPolicy};
use crate::notification::{self, Action, StartNotification};
use crate::sync::lock;

/// What the registry should do with a hook after a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookOutcome {
    /// More notifications are expected.
    Keep,
    /// The exchange is over; drop the hook.
    Consume,
}

#[derive(Debug)]
enum HookState {
    Pending,
    Started(Arc<Job>),
    Finished,
}

/// Best-effort forwarding of notification bodies to an event's own web hook.
#[derive(Debug, Clone)]
pub struct Relay {
    client: Client,
}

impl Relay {
    pub fn new(timeout: Duration) -> Result<Self, CronicleError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ApiError::from)?;
        Ok(Self { client })
    }

    /// Posts `payload` to `url`. Failures are logged and dropped.
    pub fn forward(&self, url: &str, payload: &Value) {
        match self.client.post(url).json(payload).send() {
            Ok(response) => debug!(url, status = response.status().as_u16(), "relayed notification"),
            Err(e) => debug!(url, error = %e, "relay failed"),
        }
    }
}

/// Correlates one run request with its notification stream.
pub struct Hook {
    api: Arc<dyn SchedulerApi>,
    // Carries the optional relay target.
    event: Event,
    // Resolved by the first start or launch-failure notification.
    queued_job: Arc<QueuedJob>,
    state: Mutex<HookState>,
    policy: StatusPolicy,
}

impl Hook {
    pub fn new(
        api: Arc<dyn SchedulerApi>,
        event: Event,
        queued_job: Arc<QueuedJob>,
        policy: StatusPolicy,
    ) -> Self {
        Self {
            api,
            event,
            queued_job,
            state: Mutex::new(HookState::Pending),
            policy,
        }
    }

    /// Applies one notification. Relaying happens first and never affects
    /// the outcome.
    pub fn on_notification(&self, payload: &Value, relay: &Relay) -> Result<HookOutcome, CronicleError> {
        if let Some(url) = self.event.relay_url() {
            relay.forward(url, payload);
        }

        match Action::of(payload)? {
            Action::LaunchFailure => {
                self.on_launch_failure()?;
                Ok(HookOutcome::Consume)
            }
            Action::Start => {
                self.on_start(payload)?;
                Ok(HookOutcome::Keep)
            }
            Action::Complete => {
                self.on_complete(payload)?;
                Ok(HookOutcome::Consume)
            }
        }
    }

    fn ensure_pending(&self, action: Action) -> Result<(), CronicleError> {
        match &*lock(&self.state) {
            HookState::Pending => Ok(()),
            HookState::Started(_) => Err(CronicleError::protocol(format!(
                "Saw {action} for a job that already started."
            ))),
            HookState::Finished => Err(CronicleError::protocol(format!(
                "Saw {action} for a job that already finished."
            ))),
        }
    }

    fn on_launch_failure(&self) -> Result<(), CronicleError> {
        self.ensure_pending(Action::LaunchFailure)?;
        *lock(&self.state) = HookState::Finished;
        self.queued_job.on_launch_failure()
    }

    fn on_start(&self, payload: &Value) -> Result<(), CronicleError> {
        self.ensure_pending(Action::Start)?;
        let start: StartNotification = notification::parse(Action::Start, payload)?;
        // Status fetch happens with no lock held.
        let job = Job::start(self.api.clone(), &self.event, start, self.policy)?;
        {
            let mut state = lock(&self.state);
            if !matches!(*state, HookState::Pending) {
                return Err(CronicleError::protocol(
                    "Saw job_start for a job that already started.",
                ));
            }
            *state = HookState::Started(job.clone());
        }
        self.queued_job.on_start(job)
    }

    fn on_complete(&self, payload: &Value) -> Result<(), CronicleError> {
        let job = match &*lock(&self.state) {
            HookState::Started(job) => job.clone(),
            HookState::Pending => {
                return Err(CronicleError::protocol(
                    "Saw job_complete for a job that never started.",
                ));
            }
            HookState::Finished => {
                return Err(CronicleError::protocol(
                    "Saw job_complete for a job that already finished.",
                ));
            }
        };
        job.on_complete(payload)?;
        *lock(&self.state) = HookState::Finished;
        Ok(())
    }

    /// The started job, once `job_start` has been accepted.
    pub fn job(&self) -> Option<Arc<Job>> {
        match &*lock(&self.state) {
            HookState::Started(job) => Some(job.clone()),
            _ => None,
        }
    }

    pub fn event(&self) -> &Event {
        &self.event
    }

    pub fn queued_job(&self) -> &Arc<QueuedJob> {
        &self.queued_job
    }
}

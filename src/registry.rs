//! The map of live hooks and the two entry points that touch it: issuing
//! run requests and routing inbound notifications.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use crate::api::{Event, SchedulerApi};
use crate::error::CronicleError;
use crate::hook::{Hook, HookOutcome, Relay};
use crate::job::{QueuedJob, StatusPolicy};
use crate::sync::lock;

/// Upper bound on id draws before giving up on finding a free one.
const MAX_ID_ATTEMPTS: usize = 64;

/// Receives notifications from the listener, one at a time.
pub trait NotificationSink: Send + Sync {
    fn handle_notification(&self, path: &str, payload: Value) -> Result<(), CronicleError>;
}

type IdSource = Box<dyn Fn() -> String + Send + Sync>;

/// Live hooks keyed by the id embedded in their callback URL.
pub struct HookRegistry {
    api: Arc<dyn SchedulerApi>,
    // Entries leave when their hook sees a terminal notification.
    hooks: Mutex<HashMap<String, Arc<Hook>>>,
    // Listener root, without a trailing slash.
    callback_base: String,
    // Shared by every hook whose event has its own web hook.
    relay: Relay,
    policy: StatusPolicy,
    // Random UUIDs unless replaced in tests.
    next_id: IdSource,
}

impl HookRegistry {
    /// `callback_base` is the listener's root URL, e.g. `http://127.0.0.1:41234`.
    pub fn new(
        api: Arc<dyn SchedulerApi>,
        callback_base: impl Into<String>,
        relay: Relay,
        policy: StatusPolicy,
    ) -> Self {
        Self {
            api,
            hooks: Mutex::new(HashMap::new()),
            callback_base: callback_base.into().trim_end_matches('/').to_string(),
            relay,
            policy,
            next_id: Box::new(|| Uuid::new_v4().to_string()),
        }
    }

    /// Replaces the random id generator.
    pub fn with_id_source(mut self, source: impl Fn() -> String + Send + Sync + 'static) -> Self {
        self.next_id = Box::new(source);
        self
    }

    fn unused_id(&self, hooks: &HashMap<String, Arc<Hook>>) -> Result<String, CronicleError> {
        for _ in 0..MAX_ID_ATTEMPTS {
            let id = (self.next_id)();
            if !hooks.contains_key(&id) {
                return Ok(id);
            }
        }
        Err(CronicleError::IdExhausted(MAX_ID_ATTEMPTS))
    }

    /// An id not currently mapped. Only stays unique if registered before the
    /// registry lock is released; `run_event` does both under one lock.
    pub fn create_id(&self) -> Result<String, CronicleError> {
        let hooks = lock(&self.hooks);
        self.unused_id(&hooks)
    }

    pub fn callback_url(&self, id: &str) -> String {
        format!("{}/{id}", self.callback_base)
    }

    /// Registers a hook for `event` and asks the scheduler to run it.
    ///
    /// Returns as soon as the scheduler accepted the request; the job itself
    /// is reported through the returned [`QueuedJob`].
    pub fn run_event(&self, event: &Event) -> Result<Arc<QueuedJob>, CronicleError> {
        if event.is_multiplex() {
            return Err(CronicleError::Unsupported(
                "API does not support running multiplexed events.".into(),
            ));
        }

        let queued = Arc::new(QueuedJob::new(event));
        let id = {
            let mut hooks = lock(&self.hooks);
            let id = self.unused_id(&hooks)?;
            let hook = Hook::new(self.api.clone(), event.clone(), queued.clone(), self.policy);
            hooks.insert(id.clone(), Arc::new(hook));
            id
        };

        let url = self.callback_url(&id);
        info!(event = %event.id, hook = %id, "running event");
        if let Err(e) = self.api.run_event(&event.id, &url) {
            lock(&self.hooks).remove(&id);
            return Err(e.into());
        }
        Ok(queued)
    }

    pub fn len(&self) -> usize {
        lock(&self.hooks).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.hooks).is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        lock(&self.hooks).contains_key(id)
    }
}

impl NotificationSink for HookRegistry {
    fn handle_notification(&self, path: &str, payload: Value) -> Result<(), CronicleError> {
        let id = path.strip_prefix('/').unwrap_or(path);
        let hook = lock(&self.hooks).get(id).cloned().ok_or_else(|| {
            CronicleError::protocol(format!("Saw a notification for an unknown web hook: {id}."))
        })?;

        // Dispatch may relay or fetch status; the registry lock is not held.
        debug!(hook = id, "dispatching notification");
        if hook.on_notification(&payload, &self.relay)? == HookOutcome::Consume {
            lock(&self.hooks).remove(id);
            debug!(hook = id, "hook consumed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::StatusRetry;
    use crate::test_support::MockApi;
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    const BASE: &str = "http://127.0.0.1:4000";

    fn registry(api: Arc<MockApi>) -> HookRegistry {
        let policy = StatusPolicy {
            on_start: StatusRetry::once(),
            on_complete: StatusRetry::once(),
        };
        let relay = Relay::new(Duration::from_millis(500)).unwrap();
        HookRegistry::new(api, BASE, relay, policy)
    }

    fn scripted_ids(ids: &'static [&'static str]) -> impl Fn() -> String + Send + Sync + 'static {
        let next = AtomicUsize::new(0);
        move || ids[next.fetch_add(1, Ordering::SeqCst) % ids.len()].to_string()
    }

    #[test]
    fn create_id_skips_ids_in_use() {
        let api = Arc::new(MockApi::new());
        let reg = registry(api.clone()).with_id_source(scripted_ids(&["a", "a", "b"]));
        reg.run_event(&Event::new("e1", "Backup")).unwrap();
        assert!(reg.contains("a"));
        // Next draws are "a" (taken) then "b".
        assert_eq!(reg.create_id().unwrap(), "b");
    }

    #[test]
    fn create_id_gives_up_after_bounded_attempts() {
        let reg = registry(Arc::new(MockApi::new())).with_id_source(|| "same".to_string());
        reg.run_event(&Event::new("e1", "Backup")).unwrap();
        let err = reg.run_event(&Event::new("e1", "Backup")).unwrap_err();
        assert!(matches!(err, CronicleError::IdExhausted(MAX_ID_ATTEMPTS)));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn concurrent_run_requests_get_distinct_ids() {
        let api = Arc::new(MockApi::new());
        let reg = Arc::new(registry(api.clone()));
        let workers: Vec<_> = (0..8)
            .map(|_| {
                let reg = reg.clone();
                thread::spawn(move || {
                    for _ in 0..25 {
                        reg.run_event(&Event::new("e1", "Backup")).unwrap();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        let urls: HashSet<String> = api.run_calls().into_iter().map(|(_, url)| url).collect();
        assert_eq!(urls.len(), 200);
        assert_eq!(reg.len(), 200);
    }

    #[test]
    fn multiplexed_event_is_rejected_before_any_remote_call() {
        let api = Arc::new(MockApi::new());
        let reg = registry(api.clone());
        let mut event = Event::new("e1", "Fanout");
        event.multiplex = json!(1);
        assert!(matches!(
            reg.run_event(&event),
            Err(CronicleError::Unsupported(_))
        ));
        assert!(api.run_calls().is_empty());
        assert!(reg.is_empty());
    }

    #[test]
    fn failed_run_request_releases_its_hook() {
        let api = Arc::new(MockApi::new());
        api.fail_runs();
        let reg = registry(api.clone());
        let err = reg.run_event(&Event::new("e1", "Backup")).unwrap_err();
        assert!(matches!(err, CronicleError::Transport(_)));
        assert!(reg.is_empty());
    }

    #[test]
    fn unknown_id_is_a_protocol_violation() {
        let reg = registry(Arc::new(MockApi::new()));
        let err = reg
            .handle_notification("/nope", json!({"action": "job_start"}))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Protocol violation: Saw a notification for an unknown web hook: nope."
        );
    }

    #[test]
    fn full_exchange_consumes_hook() {
        let api = Arc::new(MockApi::new());
        let reg = registry(api.clone()).with_id_source(|| "h1".to_string());

        let queued = reg.run_event(&Event::new("e1", "Backup")).unwrap();
        assert_eq!(
            api.run_calls(),
            vec![("e1".to_string(), format!("{BASE}/h1"))]
        );

        reg.handle_notification(
            "/h1",
            json!({"action": "job_start", "id": "j1", "job_details_url": "u"}),
        )
        .unwrap();
        let job = queued.wait_for_job().unwrap();
        assert_eq!(job.id(), "j1");
        assert_eq!(job.details_url(), "u");
        assert!(reg.contains("h1"));

        reg.handle_notification(
            "/h1",
            json!({"action": "job_complete", "id": "j1", "code": 0, "complete": 1}),
        )
        .unwrap();
        assert!(job.is_complete());
        assert_eq!(job.progress(), 1.0);
        assert_eq!(job.code(), Some(0));
        assert!(!reg.contains("h1"));

        let err = reg
            .handle_notification("/h1", json!({"action": "job_complete", "id": "j1"}))
            .unwrap_err();
        assert!(matches!(err, CronicleError::ProtocolViolation(_)));
    }

    #[test]
    fn launch_failure_consumes_hook() {
        let reg = registry(Arc::new(MockApi::new())).with_id_source(|| "h1".to_string());
        let queued = reg.run_event(&Event::new("e1", "Backup")).unwrap();
        reg.handle_notification("/h1", json!({"action": "job_launch_failure"}))
            .unwrap();
        assert!(reg.is_empty());
        assert!(matches!(
            queued.wait_for_job(),
            Err(CronicleError::LaunchFailure { .. })
        ));

        // The failure was terminal; the id is no longer routable.
        for late in [
            json!({"action": "job_start", "id": "j1", "job_details_url": "u"}),
            json!({"action": "job_launch_failure"}),
        ] {
            let err = reg.handle_notification("/h1", late).unwrap_err();
            assert_eq!(
                err.to_string(),
                "Protocol violation: Saw a notification for an unknown web hook: h1."
            );
        }
        assert!(queued.job().is_none());
    }

    #[test]
    fn rejected_notification_keeps_hook() {
        let reg = registry(Arc::new(MockApi::new())).with_id_source(|| "h1".to_string());
        reg.run_event(&Event::new("e1", "Backup")).unwrap();
        assert!(
            reg.handle_notification("/h1", json!({"action": "job_complete", "id": "j1"}))
                .is_err()
        );
        assert!(reg.contains("h1"));
    }
}

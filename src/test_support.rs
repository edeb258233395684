//! Fakes shared by unit tests across modules.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use serde_json::Value;

use crate::api::{ApiError, Event, EventQuery, JobStatus, SchedulerApi};
use crate::sync::lock;

/// Recording [`SchedulerApi`] with scripted status responses.
#[derive(Default)]
pub(crate) struct MockApi {
    run_calls: Mutex<Vec<(String, String)>>,
    scripted: Mutex<VecDeque<Result<JobStatus, ApiError>>>,
    fallback: Mutex<JobStatus>,
    status_calls: AtomicUsize,
    fail_runs: AtomicBool,
    events: Mutex<Vec<Event>>,
}

impl MockApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Status returned once the scripted queue is empty.
    pub fn with_status(self, status: Value) -> Self {
        *lock(&self.fallback) = serde_json::from_value(status).unwrap();
        self
    }

    pub fn with_event(self, event: Event) -> Self {
        lock(&self.events).push(event);
        self
    }

    pub fn push_status(&self, status: Value) {
        lock(&self.scripted).push_back(Ok(serde_json::from_value(status).unwrap()));
    }

    pub fn push_status_error(&self) {
        lock(&self.scripted).push_back(Err(ApiError::Status {
            status: 503,
            body: "Service Unavailable".into(),
        }));
    }

    pub fn set_status(&self, status: Value) {
        *lock(&self.fallback) = serde_json::from_value(status).unwrap();
    }

    pub fn fail_runs(&self) {
        self.fail_runs.store(true, Ordering::SeqCst);
    }

    pub fn run_calls(&self) -> Vec<(String, String)> {
        lock(&self.run_calls).clone()
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }
}

impl SchedulerApi for MockApi {
    fn run_event(&self, event_id: &str, callback_url: &str) -> Result<(), ApiError> {
        lock(&self.run_calls).push((event_id.to_string(), callback_url.to_string()));
        if self.fail_runs.load(Ordering::SeqCst) {
            return Err(ApiError::Rejected {
                code: "event".into(),
                description: "Event is disabled".into(),
            });
        }
        Ok(())
    }

    fn get_job_status(&self, _job_id: &str) -> Result<JobStatus, ApiError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        match lock(&self.scripted).pop_front() {
            Some(result) => result,
            None => Ok(lock(&self.fallback).clone()),
        }
    }

    fn get_event(&self, query: &EventQuery) -> Result<Event, ApiError> {
        let events = lock(&self.events);
        events
            .iter()
            .find(|event| match query {
                EventQuery::Id(id) => &event.id == id,
                EventQuery::Title(title) => &event.title == title,
            })
            .cloned()
            .ok_or_else(|| ApiError::Rejected {
                code: "event".into(),
                description: "Failed to locate event".into(),
            })
    }
}

//! Run Cronicle events and follow their jobs through web hook notifications.
//!
//! [`Scheduler`] binds a loopback endpoint, registers a hook per run request
//! and hands back a [`QueuedJob`] that resolves when Cronicle reports the job
//! started. The resulting [`Job`] tracks status until completion.

pub mod api;
pub mod config;
pub mod error;
pub mod hook;
pub mod job;
pub mod listener;
pub mod notification;
pub mod registry;
pub mod scheduler;
pub mod sync;

#[cfg(test)]
mod test_support;

pub use api::{ApiError, Event, EventQuery, HttpSchedulerApi, JobStatus, SchedulerApi};
pub use config::ClientConfig;
pub use error::CronicleError;
pub use job::{Job, QueuedJob, StatusPolicy, StatusRetry};
pub use registry::{HookRegistry, NotificationSink};
pub use scheduler::Scheduler;

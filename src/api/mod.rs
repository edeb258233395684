pub mod client;
pub mod error;
pub mod types;

pub use client::{HttpSchedulerApi, SchedulerApi};
pub use error::ApiError;
pub use types::{Event, EventQuery, JobStatus};

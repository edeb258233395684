//! The client context: one API client, one hook registry, one listener.
//!
//! Construct a [`Scheduler`] once and share it by reference; it owns the
//! notification endpoint for as long as it lives.

use std::net::SocketAddr;
use std::sync::Arc;

use crate::api::{Event, EventQuery, HttpSchedulerApi, SchedulerApi};
use crate::config::ClientConfig;
use crate::error::CronicleError;
use crate::hook::Relay;
use crate::job::QueuedJob;
use crate::listener::{BoundListener, NotificationListener};
use crate::registry::HookRegistry;

pub struct Scheduler {
    api: Arc<dyn SchedulerApi>,
    registry: Arc<HookRegistry>,
    listener: NotificationListener,
}

impl Scheduler {
    /// Connects to the scheduler described by `config` over HTTP.
    ///
    /// Blocking: do not call from inside an async runtime.
    pub fn connect(config: &ClientConfig) -> Result<Self, CronicleError> {
        let api = HttpSchedulerApi::new(
            &config.base_url,
            config.api_key.clone(),
            config.request_timeout(),
        )?;
        Self::with_api(config, Arc::new(api))
    }

    /// Builds the context around an arbitrary [`SchedulerApi`].
    pub fn with_api(config: &ClientConfig, api: Arc<dyn SchedulerApi>) -> Result<Self, CronicleError> {
        Self::with_registry(config, api, |registry| registry)
    }

    /// Like [`Scheduler::with_api`], letting the caller adjust the registry
    /// before the listener starts.
    pub fn with_registry(
        config: &ClientConfig,
        api: Arc<dyn SchedulerApi>,
        customize: impl FnOnce(HookRegistry) -> HookRegistry,
    ) -> Result<Self, CronicleError> {
        let bound = BoundListener::bind(config.listen_ip()?)?;
        let relay = Relay::new(config.relay_timeout())?;
        let registry = HookRegistry::new(api.clone(), bound.base_url(), relay, config.status_policy());
        let registry = Arc::new(customize(registry));
        let listener = bound.serve(registry.clone())?;
        Ok(Self {
            api,
            registry,
            listener,
        })
    }

    pub fn get_event(&self, query: &EventQuery) -> Result<Event, CronicleError> {
        Ok(self.api.get_event(query)?)
    }

    /// Starts `event` and returns a handle that resolves when the scheduler
    /// reports the job started (or failed to launch).
    pub fn run_event(&self, event: &Event) -> Result<Arc<QueuedJob>, CronicleError> {
        self.registry.run_event(event)
    }

    pub fn registry(&self) -> &HookRegistry {
        &self.registry
    }

    pub fn listener_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    /// Stops the listener and waits for its threads.
    pub fn shutdown(self) {
        self.listener.shutdown();
    }
}

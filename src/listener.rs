//! Loopback HTTP endpoint Cronicle posts job notifications to.
//!
//! Requests are accepted by an axum server on its own thread and acknowledged
//! as soon as the body parses. Parsed notifications are then handed, in
//! arrival order, to a single dispatcher thread; dispatch failures are logged
//! and never reach the sender.

use std::net::{IpAddr, SocketAddr, TcpListener};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{Method, StatusCode, Uri};
use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tracing::{debug, error, info};

use crate::error::CronicleError;
use crate::registry::NotificationSink;

struct Inbound {
    path: String,
    payload: Value,
}

/// A bound but not yet serving listener. Binding first lets callers learn
/// the port before anything can be dispatched.
pub struct BoundListener {
    listener: TcpListener,
    addr: SocketAddr,
}

impl BoundListener {
    /// Binds `address` on an ephemeral port.
    pub fn bind(address: IpAddr) -> Result<Self, CronicleError> {
        let listener = TcpListener::bind(SocketAddr::new(address, 0))?;
        let addr = listener.local_addr()?;
        Ok(Self { listener, addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Root URL notifications are posted under.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Starts the server and dispatcher threads.
    pub fn serve(self, sink: Arc<dyn NotificationSink>) -> Result<NotificationListener, CronicleError> {
        self.listener.set_nonblocking(true)?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(CronicleError::wrap)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let std_listener = self.listener;
        let addr = self.addr;

        let server = thread::Builder::new()
            .name("cronicle-hook-listener".into())
            .spawn(move || {
                let result = runtime.block_on(async move {
                    let listener = tokio::net::TcpListener::from_std(std_listener)?;
                    axum::serve(listener, router(tx))
                        .with_graceful_shutdown(async move {
                            let _ = shutdown_rx.await;
                        })
                        .await?;
                    Ok::<(), std::io::Error>(())
                });
                match result {
                    Ok(()) => debug!(%addr, "notification listener stopped"),
                    Err(e) => error!(%addr, error = %e, "notification listener failed"),
                }
            })
            .map_err(CronicleError::wrap)?;

        let dispatcher = thread::Builder::new()
            .name("cronicle-hook-dispatch".into())
            .spawn(move || dispatch_loop(rx, sink))
            .map_err(CronicleError::wrap)?;

        info!(%addr, "listening for job notifications");
        Ok(NotificationListener {
            addr,
            shutdown: Some(shutdown_tx),
            server: Some(server),
            dispatcher: Some(dispatcher),
        })
    }
}

/// A serving notification endpoint. Dropping it stops the server; use
/// [`NotificationListener::shutdown`] to also wait for the threads.
pub struct NotificationListener {
    addr: SocketAddr,
    // Taken on the first shutdown signal.
    shutdown: Option<oneshot::Sender<()>>,
    server: Option<JoinHandle<()>>,
    dispatcher: Option<JoinHandle<()>>,
}

impl NotificationListener {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stops accepting notifications and joins both threads. Notifications
    /// already acknowledged are dispatched first.
    pub fn shutdown(mut self) {
        self.signal_shutdown();
        for handle in [self.server.take(), self.dispatcher.take()].into_iter().flatten() {
            // A callback running on the dispatcher may be the one shutting down.
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }

    fn signal_shutdown(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for NotificationListener {
    fn drop(&mut self) {
        self.signal_shutdown();
    }
}

fn router(tx: UnboundedSender<Inbound>) -> Router {
    // Every path is a potential hook id, so everything goes to one handler.
    Router::new().fallback(receive).with_state(tx)
}

async fn receive(
    State(tx): State<UnboundedSender<Inbound>>,
    method: Method,
    uri: Uri,
    body: Bytes,
) -> StatusCode {
    if method != Method::POST {
        return StatusCode::METHOD_NOT_ALLOWED;
    }
    let payload: Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            debug!(path = %uri.path(), error = %e, "rejected malformed notification");
            return StatusCode::BAD_REQUEST;
        }
    };
    let inbound = Inbound {
        path: uri.path().to_string(),
        payload,
    };
    if tx.send(inbound).is_err() {
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    StatusCode::OK
}

fn dispatch_loop(mut rx: UnboundedReceiver<Inbound>, sink: Arc<dyn NotificationSink>) {
    while let Some(Inbound { path, payload }) = rx.blocking_recv() {
        debug!(%path, "notification received");
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            sink.handle_notification(&path, payload)
        }));
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(%path, error = %e, "notification dispatch failed"),
            Err(payload) => {
                let e = CronicleError::from_panic(payload.as_ref());
                error!(%path, error = %e, "notification dispatch panicked");
            }
        }
    }
    debug!("notification dispatcher stopped");
}

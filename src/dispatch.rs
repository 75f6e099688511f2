//! Channel boundary between a platform adapter and the [`Engine`].
//!
//! Each inbound event is handled on its own task, so a slow reload never
//! stalls lookups. Reloads run on the blocking pool. While one is running,
//! message and choice events wait up to `reload_defer_ms` before they are
//! served from whichever complete snapshot is live.

use crate::engine::{Engine, InboundEvent, Response};
use crate::error::{LinkerError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, error};

const RELOAD_POLL: Duration = Duration::from_millis(25);

struct Envelope {
    event: InboundEvent,
    reply: oneshot::Sender<Vec<Response>>,
}

/// Cloneable sender half handed to adapters
#[derive(Clone)]
pub struct DispatchHandle {
    tx: mpsc::Sender<Envelope>,
}

impl DispatchHandle {
    /// Queue an event and wait for its responses
    pub async fn submit(&self, event: InboundEvent) -> Result<Vec<Response>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Envelope { event, reply })
            .await
            .map_err(|_| LinkerError::DispatcherClosed)?;
        rx.await.map_err(|_| LinkerError::DispatcherClosed)
    }
}

pub struct Dispatcher {
    handle: DispatchHandle,
    task: JoinHandle<()>,
}

impl Dispatcher {
    /// Start the receive loop on the current tokio runtime
    pub fn spawn(engine: Arc<Engine>, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let task = tokio::spawn(run_dispatch_loop(engine, rx));
        Self {
            handle: DispatchHandle { tx },
            task,
        }
    }

    pub fn handle(&self) -> DispatchHandle {
        self.handle.clone()
    }

    pub async fn submit(&self, event: InboundEvent) -> Result<Vec<Response>> {
        self.handle.submit(event).await
    }

    /// Drop this sender and wait for the loop to end. The loop keeps
    /// running until every cloned [`DispatchHandle`] is gone too.
    pub async fn shutdown(self) {
        drop(self.handle);
        if let Err(e) = self.task.await {
            error!("Dispatcher loop ended abnormally: {}", e);
        }
    }
}

async fn run_dispatch_loop(engine: Arc<Engine>, mut rx: mpsc::Receiver<Envelope>) {
    while let Some(envelope) = rx.recv().await {
        let engine = engine.clone();
        tokio::spawn(async move {
            let responses = process(engine, envelope.event).await;
            if envelope.reply.send(responses).is_err() {
                debug!("Event submitter went away before its responses were ready");
            }
        });
    }
    debug!("Dispatcher channel closed");
}

async fn process(engine: Arc<Engine>, event: InboundEvent) -> Vec<Response> {
    if let InboundEvent::ReloadRequested = event {
        return match tokio::task::spawn_blocking(move || engine.reload()).await {
            Ok(response) => vec![response],
            Err(e) => {
                error!("Reload task failed: {}", e);
                Vec::new()
            }
        };
    }

    if engine.is_reloading() {
        wait_for_reload(&engine).await;
    }
    engine.handle(&event)
}

async fn wait_for_reload(engine: &Engine) {
    let deadline = Instant::now() + engine.settings().reload_defer();
    debug!("Deferring event while the card index rebuilds");
    while engine.is_reloading() && Instant::now() < deadline {
        sleep(RELOAD_POLL).await;
    }
}

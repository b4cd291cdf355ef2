//! Bounded work queue between webhook acknowledgement and processing.
//!
//! The webhook endpoint must answer fast, so it only enqueues. A small pool
//! of workers drains the queue and runs the relay. The queue is bounded;
//! when it is full the event is dropped with a warning rather than holding
//! the HTTP response open.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::models::WebhookPayload;
use crate::sync::SyncRelay;

pub struct WebhookQueue {
    tx: Mutex<Option<mpsc::Sender<WebhookPayload>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WebhookQueue {
    /// Start `workers` drain tasks over a queue of `capacity` events.
    pub fn start(relay: Arc<SyncRelay>, workers: usize, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel::<WebhookPayload>(capacity);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let handles = (0..workers.max(1))
            .map(|worker| {
                let relay = Arc::clone(&relay);
                let rx = Arc::clone(&rx);
                tokio::spawn(async move {
                    loop {
                        // Lock only for the recv so workers take turns
                        // pulling, then process in parallel.
                        let event = { rx.lock().await.recv().await };
                        match event {
                            Some(payload) => {
                                debug!(worker, event = %payload.event, "processing webhook event");
                                relay.handle(payload).await;
                            }
                            None => break,
                        }
                    }
                    debug!(worker, "webhook worker stopped");
                })
            })
            .collect();

        Self {
            tx: Mutex::new(Some(tx)),
            workers: Mutex::new(handles),
        }
    }

    /// Enqueue an event without blocking. Returns false when the queue is
    /// full or shut down; the caller still acknowledges the webhook.
    pub fn try_enqueue(&self, payload: WebhookPayload) -> bool {
        let guard = self.tx.lock().unwrap();
        let Some(tx) = guard.as_ref() else {
            warn!(event = %payload.event, "queue is shut down, dropping event");
            return false;
        };
        match tx.try_send(payload) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(payload)) => {
                warn!(event = %payload.event, "queue full, dropping event");
                false
            }
            Err(mpsc::error::TrySendError::Closed(payload)) => {
                warn!(event = %payload.event, "queue closed, dropping event");
                false
            }
        }
    }

    /// Close the queue and wait for the workers to drain what was accepted.
    pub async fn shutdown(&self) {
        drop(self.tx.lock().unwrap().take());
        let handles: Vec<_> = std::mem::take(&mut *self.workers.lock().unwrap());
        for handle in handles {
            if let Err(err) = handle.await {
                warn!(error = %err, "webhook worker panicked");
            }
        }
        info!("webhook queue drained");
    }
}

//! Cross-worker relay.
//!
//! Every worker process has its own hubs; the coordinator makes a publish
//! on any worker visible to all of them by routing the rendered event over
//! a single shared pub/sub channel in the store. Each worker — including
//! the originator — receives the frame and fans it out locally, so the
//! publisher must not also broadcast directly while the relay is running.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use deadpool_redis::Pool;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::hub::{LocalHub, PollHub};
use crate::store::StoreError;

/// Single channel carrying all relay traffic. Per-topic order is preserved
/// because every frame for a topic traverses this one channel sequentially.
pub const RELAY_CHANNEL: &str = "relay:messages";

/// Wire format of a relay frame.
#[derive(Debug, Serialize, Deserialize)]
pub struct RelayFrame {
    pub topic: String,
    pub message: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CoordinatorState {
    Stopped = 0,
    Starting = 1,
    Running = 2,
    Stopping = 3,
}

impl CoordinatorState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => CoordinatorState::Starting,
            2 => CoordinatorState::Running,
            3 => CoordinatorState::Stopping,
            _ => CoordinatorState::Stopped,
        }
    }
}

/// Decode an inbound relay frame. Returns `None` for malformed payloads,
/// which the receive loop logs and skips.
fn decode_frame(payload: &[u8]) -> Option<RelayFrame> {
    let frame: RelayFrame = serde_json::from_slice(payload).ok()?;
    if frame.topic.is_empty() || frame.message.is_null() {
        return None;
    }
    Some(frame)
}

pub struct Coordinator {
    /// Publisher side goes through the shared command pool.
    pool: Pool,
    /// Subscribing requires its own connection; the pool's connections
    /// cannot be switched into subscriber mode.
    store_url: String,
    local_hub: LocalHub,
    poll_hub: PollHub,
    state: Arc<AtomicU8>,
    stop_tx: Mutex<Option<watch::Sender<bool>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Coordinator {
    pub fn new(pool: Pool, store_url: String, local_hub: LocalHub, poll_hub: PollHub) -> Self {
        Coordinator {
            pool,
            store_url,
            local_hub,
            poll_hub,
            state: Arc::new(AtomicU8::new(CoordinatorState::Stopped as u8)),
            stop_tx: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    pub fn state(&self) -> CoordinatorState {
        CoordinatorState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_running(&self) -> bool {
        self.state() == CoordinatorState::Running
    }

    /// Open the dedicated subscriber connection and start the receive loop.
    pub async fn start(&self) -> Result<(), StoreError> {
        if self.state() != CoordinatorState::Stopped {
            tracing::warn!("Coordinator already running");
            return Ok(());
        }
        self.state
            .store(CoordinatorState::Starting as u8, Ordering::SeqCst);

        let client =
            deadpool_redis::redis::Client::open(self.store_url.as_str()).map_err(|e| {
                self.state
                    .store(CoordinatorState::Stopped as u8, Ordering::SeqCst);
                StoreError::Unavailable(format!("failed to create subscriber client: {e}"))
            })?;
        let mut pubsub = match client.get_async_pubsub().await {
            Ok(pubsub) => pubsub,
            Err(e) => {
                self.state
                    .store(CoordinatorState::Stopped as u8, Ordering::SeqCst);
                return Err(StoreError::Unavailable(format!(
                    "failed to open subscriber connection: {e}"
                )));
            }
        };
        if let Err(e) = pubsub.subscribe(RELAY_CHANNEL).await {
            self.state
                .store(CoordinatorState::Stopped as u8, Ordering::SeqCst);
            return Err(StoreError::Unavailable(format!(
                "failed to subscribe to {RELAY_CHANNEL}: {e}"
            )));
        }
        tracing::info!(channel = RELAY_CHANNEL, "Coordinator subscribed");

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let state = Arc::clone(&self.state);
        let local_hub = self.local_hub.clone();
        let poll_hub = self.poll_hub.clone();

        let handle = tokio::spawn(async move {
            let mut messages = pubsub.on_message();
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => {
                        if *stop_rx.borrow() {
                            break;
                        }
                    }
                    msg = messages.next() => {
                        match msg {
                            Some(msg) => {
                                let payload: Vec<u8> = match msg.get_payload() {
                                    Ok(p) => p,
                                    Err(e) => {
                                        tracing::warn!("Failed to read relay payload: {e}");
                                        continue;
                                    }
                                };
                                match decode_frame(&payload) {
                                    Some(frame) => {
                                        local_hub.broadcast(&frame.topic, &frame.message).await;
                                        poll_hub.broadcast(&frame.topic, &frame.message).await;
                                    }
                                    None => {
                                        tracing::warn!("Skipping malformed relay frame");
                                    }
                                }
                            }
                            None => {
                                // Subscriber connection died; the publisher
                                // falls back to local-only fan-out until a
                                // restart.
                                tracing::error!("Relay subscription closed unexpectedly");
                                state.store(CoordinatorState::Stopping as u8, Ordering::SeqCst);
                                break;
                            }
                        }
                    }
                }
            }
            state.store(CoordinatorState::Stopped as u8, Ordering::SeqCst);
            tracing::info!("Coordinator receive loop exited");
        });

        *self.stop_tx.lock().await = Some(stop_tx);
        *self.task.lock().await = Some(handle);
        self.state
            .store(CoordinatorState::Running as u8, Ordering::SeqCst);
        tracing::info!("Coordinator started");
        Ok(())
    }

    /// Publish a rendered event onto the relay channel.
    pub async fn publish(&self, topic: &str, event: &Value) -> Result<(), StoreError> {
        if !self.is_running() {
            tracing::warn!("Coordinator not running, skipping relay publish");
            return Ok(());
        }

        let frame = RelayFrame {
            topic: topic.to_string(),
            message: event.clone(),
        };
        let payload = serde_json::to_string(&frame)
            .map_err(|e| StoreError::Unavailable(format!("relay frame encode failed: {e}")))?;

        let mut conn = self.pool.get().await?;
        let receivers: i64 = deadpool_redis::redis::cmd("PUBLISH")
            .arg(RELAY_CHANNEL)
            .arg(&payload)
            .query_async(&mut conn)
            .await?;
        tracing::debug!(topic, receivers, "Published relay frame");
        Ok(())
    }

    /// Cancel the receive loop and close the subscriber connection.
    pub async fn stop(&self) {
        if self.state() == CoordinatorState::Stopped {
            return;
        }
        self.state
            .store(CoordinatorState::Stopping as u8, Ordering::SeqCst);

        if let Some(stop_tx) = self.stop_tx.lock().await.take() {
            let _ = stop_tx.send(true);
        }
        if let Some(handle) = self.task.lock().await.take() {
            if let Err(e) = handle.await {
                tracing::warn!("Coordinator task join failed: {e}");
            }
        }
        self.state
            .store(CoordinatorState::Stopped as u8, Ordering::SeqCst);
        tracing::info!("Coordinator stopped");
    }
}

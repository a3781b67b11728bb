//! Per-identity event routing.
//!
//! One worker task per identity drains a FIFO queue, so events for one
//! user are processed strictly in arrival order while different users run
//! concurrently. Spawning a free task per event would let the scheduler
//! reorder two quick messages from the same user.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tracing::warn;

use crate::channels::{Channel, InboundEvent};
use crate::engine::ConversationEngine;

/// Fans inbound events out to one worker task per identity.
pub struct EventRouter {
    engine: Arc<ConversationEngine>,
    channel: Arc<dyn Channel>,
    workers: Mutex<HashMap<String, mpsc::UnboundedSender<InboundEvent>>>,
}

impl EventRouter {
    pub fn new(engine: Arc<ConversationEngine>, channel: Arc<dyn Channel>) -> Self {
        Self {
            engine,
            channel,
            workers: Mutex::new(HashMap::new()),
        }
    }

    /// Enqueue an event for its identity's worker, spawning the worker on
    /// first contact. Enqueue order equals arrival order.
    pub async fn route(&self, event: InboundEvent) {
        let mut workers = self.workers.lock().await;
        let sender = workers
            .entry(event.identity.clone())
            .or_insert_with(|| self.spawn_worker());

        if let Err(unsent) = sender.send(event) {
            // The worker is gone; start a fresh one and retry once.
            warn!(identity = %unsent.0.identity, "Event worker lost, respawning");
            let sender = self.spawn_worker();
            let identity = unsent.0.identity.clone();
            sender.send(unsent.0).ok();
            workers.insert(identity, sender);
        }
    }

    fn spawn_worker(&self) -> mpsc::UnboundedSender<InboundEvent> {
        let (tx, mut rx) = mpsc::unbounded_channel::<InboundEvent>();
        let engine = Arc::clone(&self.engine);
        let channel = Arc::clone(&self.channel);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                for reply in engine.handle_event(event).await {
                    if let Err(e) = channel.respond(&reply).await {
                        warn!(identity = %reply.identity, error = %e, "Failed to deliver reply");
                    }
                }
            }
        });
        tx
    }
}

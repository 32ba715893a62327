//! Topic-based publish/subscribe transport.
//!
//! The gateway is an explicit client object owning all channel state; there
//! is no process-wide broker handle. Delivery is at-least-once: a consumer
//! acks by returning `Ok` and nacks by returning `Err`, and a nacked message
//! is requeued with backoff until its attempt budget runs out, after which it
//! lands in the dead-letter store instead of looping forever. Deterministic
//! failures (malformed payloads) dead-letter immediately since redelivery
//! cannot change the outcome.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::observability::metrics::Metrics;

/// One message in flight. The id survives redeliveries, so log lines for the
/// same message correlate across attempts.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    pub id: Uuid,
    pub routing_key: String,
    pub payload: serde_json::Value,
    pub attempts: u32,
}

#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub envelope: Envelope,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

pub struct EventGateway {
    subscribers: DashMap<String, Vec<mpsc::Sender<Envelope>>>,
    feed_tx: broadcast::Sender<Envelope>,
    dead_letters: DashMap<Uuid, DeadLetter>,
    queue_size: usize,
    max_attempts: u32,
    backoff: Duration,
    metrics: Metrics,
}

impl EventGateway {
    pub fn new(
        queue_size: usize,
        feed_buffer: usize,
        max_attempts: u32,
        backoff_ms: u64,
        metrics: Metrics,
    ) -> Self {
        let (feed_tx, _unused_rx) = broadcast::channel(feed_buffer);
        Self {
            subscribers: DashMap::new(),
            feed_tx,
            dead_letters: DashMap::new(),
            queue_size,
            max_attempts: max_attempts.max(1),
            backoff: Duration::from_millis(backoff_ms),
            metrics,
        }
    }

    /// Register a consumer queue for a routing key. Each subscriber gets its
    /// own bounded queue and every published message is delivered to all of
    /// them.
    pub fn subscribe(&self, routing_key: &str) -> mpsc::Receiver<Envelope> {
        let (tx, rx) = mpsc::channel(self.queue_size);
        self.subscribers
            .entry(routing_key.to_string())
            .or_default()
            .push(tx);
        rx
    }

    /// Live feed of everything that passes through the gateway, for the
    /// websocket endpoint. Lagging receivers drop messages; the feed is a
    /// mirror, not the transport.
    pub fn feed(&self) -> broadcast::Receiver<Envelope> {
        self.feed_tx.subscribe()
    }

    pub async fn publish<T: Serialize>(
        &self,
        routing_key: &str,
        payload: &T,
    ) -> Result<(), AppError> {
        let payload = serde_json::to_value(payload)
            .map_err(|err| AppError::Internal(format!("unserializable event payload: {err}")))?;

        let envelope = Envelope {
            id: Uuid::new_v4(),
            routing_key: routing_key.to_string(),
            payload,
            attempts: 0,
        };

        self.metrics
            .events_published_total
            .with_label_values(&[routing_key])
            .inc();
        self.deliver(envelope).await;
        Ok(())
    }

    pub async fn publish_event(
        &self,
        event: &crate::models::event::DeliveryEvent,
    ) -> Result<(), AppError> {
        self.publish(event.routing_key(), event).await
    }

    async fn deliver(&self, envelope: Envelope) {
        // Clone the senders out so no shard lock is held across an await.
        let senders: Vec<mpsc::Sender<Envelope>> = self
            .subscribers
            .get(&envelope.routing_key)
            .map(|entry| entry.value().clone())
            .unwrap_or_default();

        for sender in senders {
            if sender.send(envelope.clone()).await.is_err() {
                warn!(
                    routing_key = %envelope.routing_key,
                    "dropping message for closed subscriber queue"
                );
            }
        }

        let _ = self.feed_tx.send(envelope);
    }

    /// Negative acknowledgement. Requeues with linear backoff until the
    /// attempt budget is exhausted, then moves the message aside.
    pub fn nack(&self, mut envelope: Envelope, cause: &AppError) {
        if !cause.is_retriable() {
            self.dead_letter(envelope, cause);
            return;
        }

        envelope.attempts += 1;
        if envelope.attempts >= self.max_attempts {
            self.dead_letter(envelope, cause);
            return;
        }

        self.metrics.event_redeliveries_total.inc();
        let delay = self.backoff * envelope.attempts;
        let senders: Vec<mpsc::Sender<Envelope>> = self
            .subscribers
            .get(&envelope.routing_key)
            .map(|entry| entry.value().clone())
            .unwrap_or_default();
        // Redeliver off-loop so the consumer keeps draining its queue while
        // the backoff elapses. Redeliveries skip the broadcast feed; only the
        // original publish is mirrored there.
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            for sender in senders {
                if sender.send(envelope.clone()).await.is_err() {
                    warn!(
                        routing_key = %envelope.routing_key,
                        "dropping redelivery for closed subscriber queue"
                    );
                }
            }
        });
    }

    fn dead_letter(&self, envelope: Envelope, cause: &AppError) {
        error!(
            message_id = %envelope.id,
            routing_key = %envelope.routing_key,
            attempts = envelope.attempts,
            error = %cause,
            "moving message to dead-letter store"
        );
        self.metrics.event_dead_letters_total.inc();
        self.dead_letters.insert(
            envelope.id,
            DeadLetter {
                envelope,
                error: cause.to_string(),
                failed_at: Utc::now(),
            },
        );
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }
}

/// Drive one subscription: ack on `Ok`, nack on `Err`. Handler failures are
/// logged and never crash the loop; a single malformed message cannot take
/// the consumer down.
pub async fn run_consumer<H, Fut>(
    gateway: Arc<EventGateway>,
    routing_key: &'static str,
    mut rx: mpsc::Receiver<Envelope>,
    handler: H,
) where
    H: Fn(Envelope) -> Fut,
    Fut: Future<Output = Result<(), AppError>>,
{
    info!(routing_key, "consumer started");

    while let Some(envelope) = rx.recv().await {
        match handler(envelope.clone()).await {
            Ok(()) => {}
            Err(err) => {
                warn!(
                    message_id = %envelope.id,
                    routing_key,
                    attempts = envelope.attempts,
                    error = %err,
                    "handler failed; message nacked"
                );
                gateway.nack(envelope, &err);
            }
        }
    }

    warn!(routing_key, "consumer stopped: queue closed");
}

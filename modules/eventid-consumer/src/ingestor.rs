//! The consume loop.
//!
//! One poller reads the source and fans deliveries out to one worker task per
//! partition. Each worker handles its partition strictly in arrival order and
//! commits a delivery only after its handler succeeded or it was dead-lettered.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use eventid_common::{Backoff, Config, EventEnvelope, EventIdError};
use eventid_events::{DeadLetter, DeadLetterSink};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::broker::{Delivery, MessageSource};
use crate::handlers::HandlerRegistry;
use crate::metrics::IngestMetrics;

const PARTITION_QUEUE: usize = 64;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the first attempt before a message is dead-lettered.
    pub max_retries: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_retries: config.ingest_max_retries,
            backoff: Backoff::new(config.ingest_retry_base, config.ingest_retry_max),
        }
    }
}

pub struct EventIngestor {
    inner: Arc<Inner>,
}

struct Inner {
    source: Arc<dyn MessageSource>,
    handlers: HandlerRegistry,
    dead_letters: Arc<dyn DeadLetterSink>,
    metrics: Arc<IngestMetrics>,
    retry: RetryPolicy,
}

impl EventIngestor {
    pub fn new(
        source: Arc<dyn MessageSource>,
        handlers: HandlerRegistry,
        dead_letters: Arc<dyn DeadLetterSink>,
        metrics: Arc<IngestMetrics>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                handlers,
                dead_letters,
                metrics,
                retry,
            }),
        }
    }

    /// Consume until the source closes or `shutdown` turns true. On shutdown,
    /// polling stops and each worker finishes the message in hand; anything
    /// not yet committed is redelivered to the next group member.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<(), EventIdError> {
        let missing = self.inner.handlers.missing();
        if !missing.is_empty() {
            warn!(?missing, "No handler registered for some event types");
        }

        let mut workers: HashMap<i32, (mpsc::Sender<Delivery>, JoinHandle<()>)> = HashMap::new();
        let mut poll_shutdown = shutdown.clone();
        let mut poll_failures: u32 = 0;

        let result = loop {
            let next = tokio::select! {
                _ = stopped(&mut poll_shutdown) => break Ok(()),
                next = self.inner.source.next() => next,
            };

            match next {
                Ok(Some(delivery)) => {
                    poll_failures = 0;
                    let partition = delivery.partition;
                    let sender = workers
                        .entry(partition)
                        .or_insert_with(|| {
                            let (tx, rx) = mpsc::channel(PARTITION_QUEUE);
                            let handle = tokio::spawn(partition_worker(
                                self.inner.clone(),
                                partition,
                                rx,
                                shutdown.clone(),
                            ));
                            debug!(partition, "Partition worker started");
                            (tx, handle)
                        })
                        .0
                        .clone();
                    if sender.send(delivery).await.is_err() {
                        // Worker exited: shutting down.
                        break Ok(());
                    }
                }
                Ok(None) => {
                    info!("Message source closed");
                    break Ok(());
                }
                Err(e) if e.is_retryable() => {
                    self.inner.metrics.error(e.kind());
                    warn!(error = %e, attempt = poll_failures, "Poll failed, backing off");
                    if !pause(self.inner.retry.backoff.delay(poll_failures), &shutdown).await {
                        break Ok(());
                    }
                    poll_failures = poll_failures.saturating_add(1);
                }
                Err(e) => {
                    self.inner.metrics.error(e.kind());
                    error!(error = %e, "Poll failed fatally");
                    break Err(e);
                }
            }
        };

        let handles: Vec<JoinHandle<()>> = workers.into_values().map(|(_, handle)| handle).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Partition worker panicked");
            }
        }
        info!("Ingestor stopped");
        result
    }
}

async fn partition_worker(
    inner: Arc<Inner>,
    partition: i32,
    mut rx: mpsc::Receiver<Delivery>,
    shutdown: watch::Receiver<bool>,
) {
    while let Some(delivery) = rx.recv().await {
        if *shutdown.borrow() {
            debug!(partition, "Partition worker stopping");
            break;
        }
        inner.process(delivery, &shutdown).await;
    }
}

impl Inner {
    async fn process(&self, delivery: Delivery, shutdown: &watch::Receiver<bool>) {
        self.metrics.consumed();

        // Decoding is deterministic, so retrying a malformed payload cannot help.
        let envelope = match EventEnvelope::decode(&delivery.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.metrics.error(e.kind());
                self.dead_letter(&delivery, None, &e, 1, shutdown).await;
                return;
            }
        };

        let Some(handler) = self.handlers.get(envelope.event_type) else {
            self.metrics.error("unhandled_event_type");
            error!(
                event_id = envelope.event_id.as_str(),
                event_type = %envelope.event_type,
                partition = delivery.partition,
                offset = delivery.offset,
                "No handler registered for event type, skipping"
            );
            self.commit(&delivery).await;
            return;
        };

        let mut attempt: u32 = 0;
        loop {
            let err = match handler.handle(&envelope).await {
                Ok(()) => {
                    debug!(
                        event_id = envelope.event_id.as_str(),
                        partition = delivery.partition,
                        offset = delivery.offset,
                        "Event handled"
                    );
                    self.commit(&delivery).await;
                    return;
                }
                Err(e) => e,
            };
            self.metrics.error(err.kind());

            if matches!(err, EventIdError::ImmutabilityViolation(_)) {
                error!(
                    event_id = envelope.event_id.as_str(),
                    error = %err,
                    "Immutability violation while handling event"
                );
                self.dead_letter(&delivery, Some(&envelope.event_id), &err, attempt + 1, shutdown)
                    .await;
                return;
            }

            if attempt >= self.retry.max_retries {
                self.dead_letter(&delivery, Some(&envelope.event_id), &err, attempt + 1, shutdown)
                    .await;
                return;
            }

            warn!(
                event_id = envelope.event_id.as_str(),
                partition = delivery.partition,
                offset = delivery.offset,
                attempt,
                error = %err,
                "Handler failed, retrying"
            );
            if !pause(self.retry.backoff.delay(attempt), shutdown).await {
                return;
            }
            attempt += 1;
        }
    }

    /// Record the delivery as failed, then commit past it. Keeps trying to
    /// record until it succeeds or shutdown begins; an unrecorded message is
    /// never committed.
    async fn dead_letter(
        &self,
        delivery: &Delivery,
        event_id: Option<&str>,
        err: &EventIdError,
        attempts: u32,
        shutdown: &watch::Receiver<bool>,
    ) {
        let letter = DeadLetter {
            topic: delivery.topic.clone(),
            partition: delivery.partition,
            offset: delivery.offset,
            event_id: event_id.map(str::to_string),
            error_kind: err.kind().to_string(),
            error_message: err.to_string(),
            payload: delivery.payload.clone(),
            attempts,
            created_at: Utc::now(),
        };

        let mut tries: u32 = 0;
        while let Err(e) = self.dead_letters.record(&letter).await {
            self.metrics.error("dead_letter_write");
            warn!(
                partition = delivery.partition,
                offset = delivery.offset,
                error = %e,
                "Could not record dead letter, retrying"
            );
            if !pause(self.retry.backoff.delay(tries), shutdown).await {
                return;
            }
            tries = tries.saturating_add(1);
        }

        self.metrics.dead_lettered();
        error!(
            event_id = event_id.unwrap_or(""),
            partition = delivery.partition,
            offset = delivery.offset,
            attempts,
            error_kind = err.kind(),
            error = %err,
            "Message dead-lettered"
        );
        self.commit(delivery).await;
    }

    async fn commit(&self, delivery: &Delivery) {
        if let Err(e) = self.source.commit(delivery).await {
            self.metrics.error("commit");
            warn!(
                partition = delivery.partition,
                offset = delivery.offset,
                error = %e,
                "Offset commit failed"
            );
        }
    }
}

/// Resolves once shutdown is requested. Never resolves if the sender is gone.
async fn stopped(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Sleep for `delay`. Returns false if shutdown was requested instead.
async fn pause(delay: Duration, shutdown: &watch::Receiver<bool>) -> bool {
    let mut rx = shutdown.clone();
    if *rx.borrow() {
        return false;
    }
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = stopped(&mut rx) => false,
    }
}

//! NATS ingestion queue
//!
//! Publishes document ids on a single subject and consumes them through a
//! queue-group subscription, so multiple workers share the stream without
//! double-delivery in the common case. Delivery stays at-least-once; the
//! processing pipeline is idempotent per document id.

use crate::error::{Error, Result};
use crate::ports::{IngestHandler, MessageQueue};
use crate::resilience::{surface_temporary, ErrorClassification, Executor};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{error, info};

const WORKER_QUEUE_GROUP: &str = "workers";

pub struct NatsQueue {
    client: async_nats::Client,
    subject: String,
    executor: Arc<Executor>,
}

impl NatsQueue {
    pub async fn connect(url: &str, subject: &str, executor: Arc<Executor>) -> Result<Self> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| Error::Queue(format!("connect nats: {e}")))?;
        info!(subject, "nats_connected");
        Ok(Self {
            client,
            subject: subject.to_string(),
            executor,
        })
    }

    /// Flush buffered publishes; call on shutdown.
    pub async fn close(&self) -> Result<()> {
        self.client
            .flush()
            .await
            .map_err(|e| Error::Queue(format!("nats flush: {e}")))
    }
}

#[async_trait::async_trait]
impl MessageQueue for NatsQueue {
    async fn publish_document_ingested(&self, document_id: &str) -> Result<()> {
        let payload = document_id.as_bytes().to_vec();
        self.executor
            .execute("nats.publish", classify_queue_error, || {
                let payload = payload.clone();
                async move {
                    self.client
                        .publish(self.subject.clone(), payload.into())
                        .await
                        .map_err(|e| Error::Queue(format!("nats publish: {e}")))?;
                    self.client
                        .flush()
                        .await
                        .map_err(|e| Error::Queue(format!("nats flush: {e}")))
                }
            })
            .await
            .map_err(|e| surface_temporary("publish ingestion event", e, classify_queue_error))
    }

    async fn subscribe_document_ingested(
        &self,
        handler: IngestHandler,
        shutdown: Arc<Notify>,
    ) -> Result<()> {
        let mut subscription = self
            .client
            .queue_subscribe(self.subject.clone(), WORKER_QUEUE_GROUP.to_string())
            .await
            .map_err(|e| Error::Queue(format!("nats subscribe: {e}")))?;

        // The handler runs in the select arm body, not in the polled
        // future, so a shutdown signal arriving mid-delivery waits for the
        // delivery to finish before the loop exits.
        loop {
            tokio::select! {
                _ = shutdown.notified() => break,
                maybe_message = subscription.next() => {
                    let Some(message) = maybe_message else { break };
                    let document_id = String::from_utf8_lossy(&message.payload).to_string();
                    if document_id.is_empty() {
                        continue;
                    }
                    if let Err(err) = handler(document_id.clone()).await {
                        error!(document_id = %document_id, error = %err, "worker_handler_error");
                    }
                }
            }
        }

        subscription
            .unsubscribe()
            .await
            .map_err(|e| Error::Queue(format!("nats drain subscription: {e}")))?;
        self.client
            .flush()
            .await
            .map_err(|e| Error::Queue(format!("nats flush after drain: {e}")))
    }
}

/// NATS failures are connectivity-shaped: retryable and counted, except
/// for explicit cancellation.
pub(crate) fn classify_queue_error(err: &Error) -> ErrorClassification {
    match err {
        Error::Canceled => ErrorClassification {
            retryable: false,
            record_failure: false,
        },
        Error::CircuitOpen(_) | Error::Queue(_) => ErrorClassification {
            retryable: true,
            record_failure: true,
        },
        _ => ErrorClassification {
            retryable: false,
            record_failure: true,
        },
    }
}

//! The queue consumer
//!
//! Pulls deliveries off the [`MailQueue`] while a permit is free, runs each
//! through the [`DispatchPipeline`] on its own task, and settles it: `ack`
//! once sent, `nack` on any failure so the queue redelivers (or, past its
//! delivery limit, dead-letters) the record.
//!
//! ## Graceful Shutdown
//!
//! On [`Signal::Shutdown`] the worker stops taking work and waits up to the
//! configured shutdown timeout for in-flight messages. Sends still running
//! after that are cancelled; their messages are nacked.

use std::{future::Future, sync::Arc, time::Duration};

use sendgate_common::{Signal, internal, tracing};
use sendgate_spool::{Delivery, MailQueue};
use tokio::{
    sync::{Semaphore, broadcast, watch},
    task::JoinSet,
};

use crate::{DispatchConfig, DispatchError, DispatchPipeline};

/// Pause after a failed receive before polling the queue again.
const RECEIVE_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug)]
pub struct DispatchWorker {
    queue: Arc<dyn MailQueue>,
    pipeline: Arc<DispatchPipeline>,
    concurrency: usize,
    shutdown_timeout: Duration,
}

/// How a single delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settled {
    Acked,
    Nacked,
}

impl DispatchWorker {
    #[must_use]
    pub fn new(
        queue: Arc<dyn MailQueue>,
        pipeline: Arc<DispatchPipeline>,
        config: &DispatchConfig,
    ) -> Self {
        Self {
            queue,
            pipeline,
            concurrency: config.workers.max(1),
            shutdown_timeout: config.shutdown_timeout(),
        }
    }

    /// Process one leased delivery and settle it with the queue.
    pub async fn handle(
        &self,
        delivery: Delivery,
        cancel: impl Future<Output = ()> + Send,
    ) -> Settled {
        settle_delivery(self.queue.as_ref(), &self.pipeline, delivery, cancel).await
    }

    /// Consume the queue until a shutdown signal arrives.
    pub async fn serve(self, mut shutdown: broadcast::Receiver<Signal>) {
        internal!("Dispatch worker starting with {} slots", self.concurrency);

        let permits = Arc::new(Semaphore::new(self.concurrency));
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let mut tasks = JoinSet::new();

        loop {
            while let Some(joined) = tasks.try_join_next() {
                if let Err(error) = joined {
                    tracing::error!(%error, "Dispatch task failed");
                }
            }

            let next = tokio::select! {
                biased;
                sig = shutdown.recv() => {
                    match sig {
                        Ok(Signal::Shutdown | Signal::Finalised) => {
                            internal!("Dispatch worker received shutdown signal");
                        }
                        Err(error) => {
                            tracing::error!(%error, "Dispatch worker shutdown channel error");
                        }
                    }
                    break;
                }
                next = Self::next_delivery(self.queue.as_ref(), &permits) => next,
            };

            let (permit, delivery) = match next {
                Ok(next) => next,
                Err(error) => {
                    tracing::error!(%error, "Failed to receive from the mail queue");
                    tokio::time::sleep(RECEIVE_BACKOFF).await;
                    continue;
                }
            };

            let queue = Arc::clone(&self.queue);
            let pipeline = Arc::clone(&self.pipeline);
            let cancel = cancelled(cancel_rx.clone());

            tasks.spawn(async move {
                settle_delivery(queue.as_ref(), &pipeline, delivery, cancel).await;
                drop(permit);
            });
        }

        self.drain(tasks, &cancel_tx).await;
        internal!("Dispatch worker shutdown complete");
    }

    /// Wait for a free slot, then lease the next delivery.
    async fn next_delivery(
        queue: &dyn MailQueue,
        permits: &Arc<Semaphore>,
    ) -> sendgate_spool::Result<(tokio::sync::OwnedSemaphorePermit, Delivery)> {
        let permit = Arc::clone(permits)
            .acquire_owned()
            .await
            .map_err(|error| sendgate_spool::SpoolError::Unavailable(error.to_string()))?;
        let delivery = queue.receive().await?;
        Ok((permit, delivery))
    }

    async fn drain(&self, mut tasks: JoinSet<()>, cancel: &watch::Sender<bool>) {
        if tasks.is_empty() {
            return;
        }

        internal!(level = INFO, "Waiting for {} in-flight message(s)", tasks.len());
        let wait_all = async {
            while let Some(joined) = tasks.join_next().await {
                if let Err(error) = joined {
                    tracing::error!(%error, "Dispatch task failed");
                }
            }
        };

        if tokio::time::timeout(self.shutdown_timeout, wait_all).await.is_ok() {
            internal!("All in-flight messages completed");
            return;
        }

        tracing::warn!(
            remaining = tasks.len(),
            "Shutdown timeout exceeded, cancelling in-flight sends"
        );
        let _ = cancel.send(true);

        while let Some(joined) = tasks.join_next().await {
            if let Err(error) = joined {
                tracing::error!(%error, "Dispatch task failed");
            }
        }
    }
}

/// Resolves once `true` is published on the channel.
async fn cancelled(mut receiver: watch::Receiver<bool>) {
    if receiver.wait_for(|cancel| *cancel).await.is_err() {
        // Sender gone without cancelling
        std::future::pending::<()>().await;
    }
}

async fn settle_delivery(
    queue: &dyn MailQueue,
    pipeline: &DispatchPipeline,
    delivery: Delivery,
    cancel: impl Future<Output = ()> + Send,
) -> Settled {
    let id = delivery.id;

    let result = match delivery.mail() {
        Ok(mail) => pipeline.process_until(&mail, cancel).await,
        Err(error) => Err(DispatchError::InvalidPayload(error)),
    };

    match result {
        Ok(dispatched) => {
            tracing::info!(
                id = %id,
                attempt = delivery.attempt,
                relay = dispatched.relay,
                attachments = dispatched.attachments,
                "Message dispatched"
            );

            if let Err(error) = queue.ack(id).await {
                tracing::error!(id = %id, %error, "Failed to acknowledge dispatched message");
            }
            Settled::Acked
        }
        Err(error) => {
            if error.is_retryable() {
                tracing::warn!(id = %id, attempt = delivery.attempt, %error, "Dispatch failed, will retry");
            } else {
                tracing::error!(id = %id, attempt = delivery.attempt, %error, "Dispatch failed");
            }

            if let Err(error) = queue.nack(id).await {
                tracing::error!(id = %id, %error, "Failed to return message to the queue");
            }
            Settled::Nacked
        }
    }
}

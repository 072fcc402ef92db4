//! At-least-once delivery of [`QueuedMail`] records
//!
//! A consumer [`receive`](MailQueue::receive)s a [`Delivery`], which stays
//! leased to it until it is either [`ack`](MailQueue::ack)ed (done, removed)
//! or [`nack`](MailQueue::nack)ed (made visible again after the redelivery
//! delay). A record that has been delivered `max_deliveries` times and is
//! nacked once more is dead-lettered instead of requeued.

mod file;
mod memory;

use std::time::Duration;

use async_trait::async_trait;
use sendgate_common::QueuedMail;

pub use file::FileQueue;
pub use memory::MemoryQueue;

use crate::{MessageId, Result};

/// One delivery attempt of a queued record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub id: MessageId,
    /// The serialized [`QueuedMail`]
    pub payload: Vec<u8>,
    /// 1 on first delivery, incremented on every redelivery
    pub attempt: u32,
}

impl Delivery {
    /// Decode the payload.
    ///
    /// # Errors
    /// If the payload is not a valid [`QueuedMail`] record
    pub fn mail(&self) -> Result<QueuedMail> {
        Ok(QueuedMail::from_json(&self.payload)?)
    }
}

/// When and how often a nacked record comes back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedeliveryPolicy {
    /// Deliveries after which a nack dead-letters the record
    pub max_deliveries: u32,
    /// How long a nacked record stays invisible
    pub delay: Duration,
}

impl Default for RedeliveryPolicy {
    fn default() -> Self {
        Self {
            max_deliveries: 5,
            delay: Duration::from_secs(30),
        }
    }
}

impl RedeliveryPolicy {
    const fn exhausted(&self, attempt: u32) -> bool {
        attempt >= self.max_deliveries
    }
}

#[async_trait]
pub trait MailQueue: Send + Sync + std::fmt::Debug {
    /// Durably enqueue a record.
    ///
    /// # Errors
    /// If the record cannot be serialized or the queue cannot be written
    async fn publish(&self, mail: &QueuedMail) -> Result<MessageId>;

    /// Lease the oldest visible record without waiting.
    ///
    /// # Errors
    /// If the queue cannot be read
    async fn try_receive(&self) -> Result<Option<Delivery>>;

    /// Lease the oldest visible record, waiting for one to arrive.
    ///
    /// Must be cancel safe: consumers race it against shutdown, and a
    /// dropped call must not leave a record leased.
    ///
    /// # Errors
    /// If the queue cannot be read
    async fn receive(&self) -> Result<Delivery>;

    /// Complete a leased delivery, removing the record.
    ///
    /// # Errors
    /// [`SpoolError::NotInFlight`](crate::SpoolError::NotInFlight) if the id
    /// is not currently leased
    async fn ack(&self, id: MessageId) -> Result<()>;

    /// Give a leased delivery back for redelivery.
    ///
    /// # Errors
    /// [`SpoolError::NotInFlight`](crate::SpoolError::NotInFlight) if the id
    /// is not currently leased
    async fn nack(&self, id: MessageId) -> Result<()>;
}

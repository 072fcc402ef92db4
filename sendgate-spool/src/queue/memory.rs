use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use ahash::AHashMap;
use async_trait::async_trait;
use parking_lot::Mutex;
use sendgate_common::{QueuedMail, internal};
use tokio::{sync::Notify, time::Instant};

use super::{Delivery, MailQueue, RedeliveryPolicy};
use crate::{MessageId, Result, SpoolError};

#[derive(Debug)]
struct Entry {
    id: MessageId,
    payload: Vec<u8>,
    deliveries: u32,
    visible_at: Instant,
}

#[derive(Debug, Default)]
struct State {
    ready: VecDeque<Entry>,
    in_flight: AHashMap<MessageId, Entry>,
    dead: Vec<Delivery>,
}

enum Next {
    Leased(Delivery),
    WaitUntil(Instant),
    Empty,
}

/// In-process queue
///
/// Records are kept in FIFO order and lost on restart, so this is meant for
/// tests and single-process development setups. Delays are measured with
/// [`tokio::time::Instant`] and follow a paused test clock.
#[derive(Debug, Clone)]
pub struct MemoryQueue {
    state: Arc<Mutex<State>>,
    notify: Arc<Notify>,
    policy: RedeliveryPolicy,
    offline: Arc<AtomicBool>,
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new(RedeliveryPolicy::default())
    }
}

impl MemoryQueue {
    #[must_use]
    pub fn new(policy: RedeliveryPolicy) -> Self {
        Self {
            state: Arc::default(),
            notify: Arc::new(Notify::new()),
            policy,
            offline: Arc::default(),
        }
    }

    /// Records waiting to be delivered, including delayed ones
    #[must_use]
    pub fn pending(&self) -> usize {
        self.state.lock().ready.len()
    }

    /// Records currently leased to a consumer
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.state.lock().in_flight.len()
    }

    /// Records that exhausted their deliveries, oldest first
    #[must_use]
    pub fn dead_letters(&self) -> Vec<Delivery> {
        self.state.lock().dead.clone()
    }

    /// Decode every pending record, in delivery order.
    ///
    /// # Errors
    /// If a pending payload is not a valid record
    pub fn pending_mail(&self) -> Result<Vec<QueuedMail>> {
        self.state
            .lock()
            .ready
            .iter()
            .map(|entry| QueuedMail::from_json(&entry.payload).map_err(SpoolError::from))
            .collect()
    }

    pub fn set_available(&self, available: bool) {
        self.offline.store(!available, Ordering::Relaxed);
    }

    fn check_available(&self) -> Result<()> {
        if self.offline.load(Ordering::Relaxed) {
            Err(SpoolError::Unavailable("memory queue is offline".to_string()))
        } else {
            Ok(())
        }
    }

    fn lease(&self) -> Next {
        let now = Instant::now();
        let mut state = self.state.lock();

        let Some(position) = state.ready.iter().position(|e| e.visible_at <= now) else {
            return state
                .ready
                .iter()
                .map(|e| e.visible_at)
                .min()
                .map_or(Next::Empty, Next::WaitUntil);
        };

        let Some(mut entry) = state.ready.remove(position) else {
            return Next::Empty;
        };
        entry.deliveries += 1;

        let delivery = Delivery {
            id: entry.id,
            payload: entry.payload.clone(),
            attempt: entry.deliveries,
        };
        state.in_flight.insert(entry.id, entry);

        Next::Leased(delivery)
    }
}

#[async_trait]
impl MailQueue for MemoryQueue {
    async fn publish(&self, mail: &QueuedMail) -> Result<MessageId> {
        self.check_available()?;

        let id = MessageId::generate();
        let payload = mail.to_json()?.into_bytes();

        self.state.lock().ready.push_back(Entry {
            id,
            payload,
            deliveries: 0,
            visible_at: Instant::now(),
        });
        self.notify.notify_one();

        Ok(id)
    }

    async fn try_receive(&self) -> Result<Option<Delivery>> {
        self.check_available()?;

        match self.lease() {
            Next::Leased(delivery) => Ok(Some(delivery)),
            Next::WaitUntil(_) | Next::Empty => Ok(None),
        }
    }

    async fn receive(&self) -> Result<Delivery> {
        loop {
            self.check_available()?;

            match self.lease() {
                Next::Leased(delivery) => return Ok(delivery),
                Next::WaitUntil(deadline) => {
                    tokio::select! {
                        () = self.notify.notified() => {}
                        () = tokio::time::sleep_until(deadline) => {}
                    }
                }
                Next::Empty => self.notify.notified().await,
            }
        }
    }

    async fn ack(&self, id: MessageId) -> Result<()> {
        self.state
            .lock()
            .in_flight
            .remove(&id)
            .map(|_| ())
            .ok_or(SpoolError::NotInFlight(id))
    }

    async fn nack(&self, id: MessageId) -> Result<()> {
        let mut state = self.state.lock();
        let mut entry = state
            .in_flight
            .remove(&id)
            .ok_or(SpoolError::NotInFlight(id))?;

        if self.policy.exhausted(entry.deliveries) {
            internal!(
                level = WARN,
                "Message {id} dead-lettered after {} deliveries",
                entry.deliveries
            );
            state.dead.push(Delivery {
                id,
                payload: entry.payload,
                attempt: entry.deliveries,
            });
            return Ok(());
        }

        entry.visible_at = Instant::now() + self.policy.delay;
        state.ready.push_back(entry);
        drop(state);

        self.notify.notify_one();
        Ok(())
    }
}

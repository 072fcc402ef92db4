use std::{
    io::{Error, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use ahash::AHashMap;
use async_trait::async_trait;
use parking_lot::Mutex;
use sendgate_common::{QueuedMail, internal, mail::TEMP_FILE_PREFIX};
use tokio::fs;

use super::{Delivery, MailQueue, RedeliveryPolicy};
use crate::{MessageId, Result, SpoolError, path::validate_root};

const READY: &str = "json";
const IN_FLIGHT: &str = "inflight";
const DEAD: &str = "dead";

/// The parts encoded in a queue file name:
/// `{id}.{deliveries}.{not_before_ms}.json` for ready records,
/// `{id}.{deliveries}.inflight` and `{id}.{deliveries}.dead` otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Slot {
    id: MessageId,
    deliveries: u32,
    not_before_ms: u64,
}

impl Slot {
    fn ready_name(&self) -> String {
        format!(
            "{}.{}.{}.{READY}",
            self.id, self.deliveries, self.not_before_ms
        )
    }

    fn leased_name(&self) -> String {
        format!("{}.{}.{IN_FLIGHT}", self.id, self.deliveries)
    }

    fn dead_name(&self) -> String {
        format!("{}.{}.{DEAD}", self.id, self.deliveries)
    }

    fn parse_ready(name: &str) -> Option<Self> {
        let mut parts = name.strip_suffix(READY)?.strip_suffix('.')?.split('.');
        let slot = Self {
            id: MessageId::parse(parts.next()?)?,
            deliveries: parts.next()?.parse().ok()?,
            not_before_ms: parts.next()?.parse().ok()?,
        };
        parts.next().is_none().then_some(slot)
    }

    fn parse_leased(name: &str) -> Option<Self> {
        let (id, deliveries) = name
            .strip_suffix(IN_FLIGHT)?
            .strip_suffix('.')?
            .split_once('.')?;

        Some(Self {
            id: MessageId::parse(id)?,
            deliveries: deliveries.parse().ok()?,
            not_before_ms: 0,
        })
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

fn delay_ms(delay: Duration) -> u64 {
    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}

/// Directory-backed queue
///
/// Every record is one file whose name carries its id, delivery count and
/// visibility time (see [`Slot`]). Leasing renames the file to `.inflight`,
/// which is atomic, so two consumers sharing a directory never lease the same
/// record. ULID ids make a name sort equal to publish order.
///
/// Leases do not survive a restart: [`init`](Self::init) turns every
/// `.inflight` file back into a ready record.
#[derive(Debug, Clone)]
pub struct FileQueue {
    path: PathBuf,
    policy: RedeliveryPolicy,
    poll_interval: Duration,
    leases: Arc<Mutex<AHashMap<MessageId, Slot>>>,
}

impl FileQueue {
    /// # Errors
    /// If the path fails validation
    pub fn new(
        path: impl Into<PathBuf>,
        policy: RedeliveryPolicy,
        poll_interval: Duration,
    ) -> Result<Self> {
        let path = path.into();
        validate_root(&path)?;

        Ok(Self {
            path,
            policy,
            poll_interval,
            leases: Arc::default(),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the queue directory if needed, remove partial writes and
    /// restore orphaned leases.
    ///
    /// # Errors
    /// If the directory cannot be created, is not a directory, or cannot be
    /// scanned
    pub fn init(&self) -> Result<()> {
        internal!("Initialising queue at {:?}", self.path);

        if !self.path.try_exists()? {
            std::fs::create_dir_all(&self.path)?;
        } else if !self.path.is_dir() {
            return Err(Error::new(
                ErrorKind::NotADirectory,
                format!("Expected {} to be a Directory, but it is not", self.path.display()),
            )
            .into());
        }

        let mut restored = 0;
        for entry in std::fs::read_dir(&self.path)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();

            if name.starts_with(TEMP_FILE_PREFIX) {
                std::fs::remove_file(entry.path())?;
            } else if let Some(slot) = Slot::parse_leased(&name) {
                std::fs::rename(entry.path(), self.path.join(slot.ready_name()))?;
                restored += 1;
            }
        }

        if restored > 0 {
            internal!(
                level = INFO,
                "Restored {restored} orphaned in-flight messages to the queue"
            );
        }

        Ok(())
    }

    async fn scan(&self, suffix: &str) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = fs::read_dir(&self.path).await?;

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(suffix) && !name.starts_with(TEMP_FILE_PREFIX) {
                names.push(name);
            }
        }

        names.sort();
        Ok(names)
    }

    /// Number of ready records, including delayed ones
    ///
    /// # Errors
    /// If the directory cannot be read
    pub async fn pending(&self) -> Result<usize> {
        Ok(self.scan(&format!(".{READY}")).await?.len())
    }

    /// Ids and delivery counts of dead-lettered records
    ///
    /// # Errors
    /// If the directory cannot be read
    pub async fn dead_letters(&self) -> Result<Vec<Delivery>> {
        let mut dead = Vec::new();

        for name in self.scan(&format!(".{DEAD}")).await? {
            let Some((id, deliveries)) = name
                .strip_suffix(&format!(".{DEAD}"))
                .and_then(|stem| stem.split_once('.'))
            else {
                continue;
            };
            let (Some(id), Ok(attempt)) = (MessageId::parse(id), deliveries.parse()) else {
                continue;
            };

            dead.push(Delivery {
                id,
                payload: fs::read(self.path.join(&name)).await?,
                attempt,
            });
        }

        Ok(dead)
    }

    fn take_lease(&self, id: MessageId) -> Result<Slot> {
        self.leases
            .lock()
            .remove(&id)
            .ok_or(SpoolError::NotInFlight(id))
    }
}

/// Returns a freshly claimed record to the ready set unless the lease was
/// handed out.
struct LeaseGuard {
    leased: PathBuf,
    ready: PathBuf,
    armed: bool,
}

impl LeaseGuard {
    fn new(leased: PathBuf, ready: PathBuf) -> Self {
        Self {
            leased,
            ready,
            armed: true,
        }
    }

    fn keep(mut self) {
        self.armed = false;
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        if let Err(err) = std::fs::rename(&self.leased, &self.ready) {
            internal!(
                level = WARN,
                "Failed to return abandoned lease {:?} to the queue: {err}",
                self.leased
            );
        }
    }
}

#[async_trait]
impl MailQueue for FileQueue {
    async fn publish(&self, mail: &QueuedMail) -> Result<MessageId> {
        let slot = Slot {
            id: MessageId::generate(),
            deliveries: 0,
            not_before_ms: 0,
        };
        let payload = mail.to_json()?;

        let temp = self.path.join(format!("{TEMP_FILE_PREFIX}{}", slot.id));
        fs::write(&temp, payload).await?;
        fs::rename(&temp, self.path.join(slot.ready_name())).await?;

        Ok(slot.id)
    }

    async fn try_receive(&self) -> Result<Option<Delivery>> {
        let now = now_ms();

        for name in self.scan(&format!(".{READY}")).await? {
            let Some(slot) = Slot::parse_ready(&name) else {
                continue;
            };
            if slot.not_before_ms > now {
                continue;
            }

            let leased = Slot {
                deliveries: slot.deliveries + 1,
                ..slot
            };
            let leased_path = self.path.join(leased.leased_name());

            // Synchronous, so no await point lies between the claim and its guard.
            match std::fs::rename(self.path.join(&name), &leased_path) {
                Ok(()) => {}
                // Another consumer leased it first.
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            }
            let guard = LeaseGuard::new(leased_path, self.path.join(&name));

            let payload = fs::read(&guard.leased).await?;
            self.leases.lock().insert(leased.id, leased);
            guard.keep();

            return Ok(Some(Delivery {
                id: leased.id,
                payload,
                attempt: leased.deliveries,
            }));
        }

        Ok(None)
    }

    /// Polls the directory every `poll_interval` until a record is visible.
    ///
    /// Cancel safe: a lease claimed by a future that is dropped before it
    /// returns goes back to the ready set.
    async fn receive(&self) -> Result<Delivery> {
        loop {
            if let Some(delivery) = self.try_receive().await? {
                return Ok(delivery);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn ack(&self, id: MessageId) -> Result<()> {
        let slot = self.take_lease(id)?;
        fs::remove_file(self.path.join(slot.leased_name())).await?;
        Ok(())
    }

    async fn nack(&self, id: MessageId) -> Result<()> {
        let slot = self.take_lease(id)?;
        let from = self.path.join(slot.leased_name());

        if self.policy.exhausted(slot.deliveries) {
            internal!(
                level = WARN,
                "Message {id} dead-lettered after {} deliveries",
                slot.deliveries
            );
            fs::rename(from, self.path.join(slot.dead_name())).await?;
            return Ok(());
        }

        let requeued = Slot {
            not_before_ms: now_ms().saturating_add(delay_ms(self.policy.delay)),
            ..slot
        };
        fs::rename(from, self.path.join(requeued.ready_name())).await?;
        Ok(())
    }
}

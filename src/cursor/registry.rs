//! Cursor registry
//!
//! Process-wide table of open cursors, passed around as an explicit handle.
//! The table is split into lock shards keyed by cursor id so operations on
//! different cursors rarely contend.
//!
//! A cursor is used by *pinning* it: the entry is moved out of its slot and
//! the slot is marked pinned until the holder releases or destroys it.
//! Pinning an already pinned cursor fails immediately with `CursorInUse`,
//! so at most one operation ever touches a cursor's producer.
//!
//! Entries dropped outside `destroy` (removed, reaped, or abandoned by a
//! cancelled holder) have their producer closed on a background task.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::entry::CursorEntry;
use super::id::CursorIdGenerator;
use super::producer::ResultProducer;
use super::{CursorId, Namespace};
use crate::config::CursorConfig;
use crate::error::{CursorError, Result};

enum Slot {
    Idle(Box<CursorEntry>),
    Pinned,
}

struct Inner {
    shards: Vec<Mutex<HashMap<CursorId, Slot>>>,
    ids: CursorIdGenerator,
    max_open: usize,
    open: AtomicUsize,
    total_opened: AtomicU64,
    timed_out: AtomicU64,
}

/// Shared handle to the cursor table.
#[derive(Clone)]
pub struct CursorRegistry {
    inner: Arc<Inner>,
}

/// Point-in-time registry counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub open: usize,
    pub pinned: usize,
    /// Idle cursors that negotiated document sequences
    pub doc_sequences: usize,
    /// Creation time of the oldest idle cursor
    pub oldest_opened_at: Option<DateTime<Utc>>,
    pub total_opened: u64,
    pub timed_out: u64,
}

/// Close a detached entry's producer in the background.
///
/// Without a runtime (or when the runtime is shutting down) the producer
/// is simply dropped.
fn close_detached(mut entry: Box<CursorEntry>) {
    let Ok(handle) = Handle::try_current() else {
        debug!("No runtime to close cursor {}; dropping producer", entry.id());
        return;
    };
    handle.spawn(async move {
        let id = entry.id();
        if let Err(e) = entry.close().await {
            warn!("Failed to close cursor {}: {}", id, e);
        }
    });
}

impl CursorRegistry {
    /// Create an empty registry
    ///
    /// # Arguments
    /// * `shards` - Number of lock shards (at least one is used)
    /// * `max_open` - Maximum number of simultaneously open cursors
    pub fn new(shards: usize, max_open: usize) -> Self {
        Self::with_ids(shards, max_open, CursorIdGenerator::new())
    }

    pub fn from_config(config: &CursorConfig) -> Self {
        Self::new(config.registry_shards, config.max_open_cursors)
    }

    pub(crate) fn with_ids(shards: usize, max_open: usize, ids: CursorIdGenerator) -> Self {
        let shards = (0..shards.max(1))
            .map(|_| Mutex::new(HashMap::new()))
            .collect();
        Self {
            inner: Arc::new(Inner {
                shards,
                ids,
                max_open,
                open: AtomicUsize::new(0),
                total_opened: AtomicU64::new(0),
                timed_out: AtomicU64::new(0),
            }),
        }
    }

    fn shard(&self, id: CursorId) -> &Mutex<HashMap<CursorId, Slot>> {
        let n = self.inner.shards.len() as u64;
        &self.inner.shards[(id.get() as u64 % n) as usize]
    }

    /// Register a cursor and return its id. The cursor starts unpinned.
    pub fn create(
        &self,
        producer: Box<dyn ResultProducer>,
        namespace: Namespace,
        doc_sequences: bool,
    ) -> Result<CursorId> {
        let pinned = self.create_pinned(producer, namespace, doc_sequences)?;
        let id = pinned.id();
        pinned.release();
        Ok(id)
    }

    /// Register a cursor and hand it back already pinned to the caller.
    pub fn create_pinned(
        &self,
        producer: Box<dyn ResultProducer>,
        namespace: Namespace,
        doc_sequences: bool,
    ) -> Result<PinnedCursor> {
        let previous = self.inner.open.fetch_add(1, Ordering::AcqRel);
        if previous >= self.inner.max_open {
            self.inner.open.fetch_sub(1, Ordering::AcqRel);
            return Err(CursorError::ResourceExhausted(format!(
                "too many open cursors (limit {})",
                self.inner.max_open
            ))
            .into());
        }

        let id = match self.inner.ids.next_id() {
            Ok(id) => id,
            Err(e) => {
                self.inner.open.fetch_sub(1, Ordering::AcqRel);
                return Err(e);
            }
        };

        self.shard(id).lock().insert(id, Slot::Pinned);
        self.inner.total_opened.fetch_add(1, Ordering::Relaxed);
        debug!("Created cursor {} on '{}'", id, namespace);

        let entry = CursorEntry::new(id, namespace, producer, doc_sequences);
        Ok(PinnedCursor {
            registry: self.clone(),
            entry: Some(Box::new(entry)),
        })
    }

    /// Take exclusive use of a cursor.
    ///
    /// Fails with `CursorNotFound` if the id is not registered and with
    /// `CursorInUse` if another operation holds it.
    pub fn pin(&self, id: CursorId) -> Result<PinnedCursor> {
        let mut shard = self.shard(id).lock();
        let slot = shard
            .get_mut(&id)
            .ok_or(CursorError::CursorNotFound(id.get()))?;

        match std::mem::replace(slot, Slot::Pinned) {
            Slot::Idle(mut entry) => {
                entry.touch();
                Ok(PinnedCursor {
                    registry: self.clone(),
                    entry: Some(entry),
                })
            }
            Slot::Pinned => Err(CursorError::CursorInUse(id.get()).into()),
        }
    }

    /// Remove a cursor and close its producer. Returns whether it was registered.
    ///
    /// Removing a pinned cursor takes effect immediately for lookups; the
    /// holder's entry is closed when it is released.
    pub fn remove(&self, id: CursorId) -> bool {
        match self.take_slot(id) {
            Some(Slot::Idle(entry)) => {
                info!(
                    "Removed cursor {} after {} documents ({:?} old)",
                    id,
                    entry.docs_returned(),
                    entry.age()
                );
                close_detached(entry);
                true
            }
            Some(Slot::Pinned) => {
                info!("Removed pinned cursor {}", id);
                true
            }
            None => false,
        }
    }

    fn take_slot(&self, id: CursorId) -> Option<Slot> {
        let slot = self.shard(id).lock().remove(&id);
        if slot.is_some() {
            self.inner.open.fetch_sub(1, Ordering::AcqRel);
        }
        slot
    }

    pub fn contains(&self, id: CursorId) -> bool {
        self.shard(id).lock().contains_key(&id)
    }

    /// Number of registered cursors, pinned or not.
    pub fn len(&self) -> usize {
        self.inner.open.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> RegistryStats {
        let mut stats = RegistryStats {
            open: self.len(),
            total_opened: self.inner.total_opened.load(Ordering::Relaxed),
            timed_out: self.inner.timed_out.load(Ordering::Relaxed),
            ..RegistryStats::default()
        };

        for shard in &self.inner.shards {
            for slot in shard.lock().values() {
                match slot {
                    Slot::Pinned => stats.pinned += 1,
                    Slot::Idle(entry) => {
                        if entry.doc_sequences() {
                            stats.doc_sequences += 1;
                        }
                        let opened = entry.opened_at();
                        if stats.oldest_opened_at.is_none_or(|oldest| opened < oldest) {
                            stats.oldest_opened_at = Some(opened);
                        }
                    }
                }
            }
        }
        stats
    }

    /// Remove every unpinned cursor idle for longer than `timeout` and close
    /// its producer.
    pub fn reap_idle(&self, timeout: Duration) -> Vec<CursorId> {
        let mut expired_entries = Vec::new();
        for shard in &self.inner.shards {
            let mut shard = shard.lock();
            let expired: Vec<CursorId> = shard
                .iter()
                .filter_map(|(id, slot)| match slot {
                    Slot::Idle(entry) if entry.is_expired(timeout) => Some(*id),
                    _ => None,
                })
                .collect();
            for id in expired {
                if let Some(Slot::Idle(entry)) = shard.remove(&id) {
                    expired_entries.push(entry);
                }
            }
        }

        let reaped: Vec<CursorId> = expired_entries.iter().map(|entry| entry.id()).collect();
        if !reaped.is_empty() {
            let n = reaped.len();
            self.inner.open.fetch_sub(n, Ordering::AcqRel);
            self.inner.timed_out.fetch_add(n as u64, Ordering::Relaxed);
            warn!("Reaped {} idle cursor(s): {:?}", n, reaped);
        }
        for entry in expired_entries {
            close_detached(entry);
        }
        reaped
    }

    /// Run `reap_idle` every `interval` until `cancel` fires.
    pub fn spawn_reaper(
        &self,
        interval: Duration,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        registry.reap_idle(timeout);
                    }
                    _ = cancel.cancelled() => {
                        debug!("Cursor reaper stopped");
                        break;
                    }
                }
            }
        })
    }

    /// Put a pinned entry back. Returns false if the cursor was removed meanwhile.
    fn unpin(&self, mut entry: Box<CursorEntry>) -> bool {
        let id = entry.id();
        entry.touch();

        {
            let mut shard = self.shard(id).lock();
            if let Some(slot) = shard.get_mut(&id).filter(|slot| matches!(slot, Slot::Pinned)) {
                *slot = Slot::Idle(entry);
                return true;
            }
        }

        debug!("Cursor {} was removed while pinned; closing", id);
        close_detached(entry);
        false
    }
}

impl fmt::Debug for CursorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CursorRegistry")
            .field("shards", &self.inner.shards.len())
            .field("open", &self.len())
            .finish()
    }
}

/// Exclusive hold on a cursor entry.
///
/// Must be finished with [`release`](Self::release) (cursor stays open) or
/// [`destroy`](Self::destroy) (cursor is closed). Dropping it otherwise, for
/// example when the owning future is cancelled, unregisters the cursor.
pub struct PinnedCursor {
    registry: CursorRegistry,
    entry: Option<Box<CursorEntry>>,
}

impl PinnedCursor {
    pub fn id(&self) -> CursorId {
        self.entry().id()
    }

    pub fn entry(&self) -> &CursorEntry {
        self.entry
            .as_deref()
            .unwrap_or_else(|| unreachable!("pinned cursor accessed after release"))
    }

    pub fn entry_mut(&mut self) -> &mut CursorEntry {
        self.entry
            .as_deref_mut()
            .unwrap_or_else(|| unreachable!("pinned cursor accessed after release"))
    }

    /// Return the cursor to the registry. Returns whether it is still registered.
    pub fn release(mut self) -> bool {
        match self.entry.take() {
            Some(entry) => self.registry.unpin(entry),
            None => false,
        }
    }

    /// Unregister the cursor and close its producer.
    pub async fn destroy(mut self) -> Result<()> {
        let Some(mut entry) = self.entry.take() else {
            return Ok(());
        };
        let id = entry.id();
        self.registry.take_slot(id);
        debug!(
            "Destroyed cursor {} after {} documents in {} batches",
            id,
            entry.docs_returned(),
            entry.batches_returned()
        );
        entry.close().await
    }
}

impl fmt::Debug for PinnedCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PinnedCursor")
            .field("entry", &self.entry)
            .finish()
    }
}

impl Drop for PinnedCursor {
    fn drop(&mut self) {
        if let Some(entry) = self.entry.take() {
            warn!(
                "Pinned cursor {} dropped without release; unregistering",
                entry.id()
            );
            self.registry.take_slot(entry.id());
            close_detached(entry);
        }
    }
}

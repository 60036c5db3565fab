//! Bounded registry of connected clients.
//!
//! The pool has a fixed number of slots. Slots are handed out by a slab so a
//! freed slot is reused by the next admission, and an id index makes removal
//! O(1). A semaphore holding one permit per free slot is the admission gate:
//! the acceptor waits on it instead of spinning while the pool is full.

use crate::id::ClientId;
use slab::Slab;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::{AcquireError, Semaphore};
use tracing::trace;

/// What the pool knows about an admitted client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolEntry {
    pub id: ClientId,
    pub address: SocketAddr,
    /// Empty until the client completes its handshake.
    pub name: String,
}

impl PoolEntry {
    pub fn new(id: ClientId, address: SocketAddr) -> Self {
        Self {
            id,
            address,
            name: String::new(),
        }
    }
}

#[derive(Debug, Default)]
struct Slots {
    entries: Slab<PoolEntry>,
    by_id: HashMap<ClientId, usize>,
}

/// Fixed-capacity client registry shared by the acceptor and all handlers.
#[derive(Debug)]
pub struct ClientPool {
    slots: Mutex<Slots>,
    /// One permit per free slot.
    free: Semaphore,
    capacity: usize,
}

impl ClientPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Mutex::new(Slots {
                entries: Slab::with_capacity(capacity),
                by_id: HashMap::with_capacity(capacity),
            }),
            free: Semaphore::new(capacity),
            capacity,
        }
    }

    /// Register `entry` if a slot is free.
    ///
    /// Returns `false` without blocking when the pool is at capacity.
    pub fn try_add(&self, entry: PoolEntry) -> bool {
        match self.free.try_acquire() {
            Ok(permit) => {
                permit.forget();
                self.insert(entry);
                true
            }
            Err(_) => false,
        }
    }

    /// Register `entry`, waiting for a slot to free up if the pool is full.
    ///
    /// Never drops the entry for lack of space. Returns the slot index.
    pub async fn admit(&self, entry: PoolEntry) -> Result<usize, AcquireError> {
        self.free.acquire().await?.forget();
        Ok(self.insert(entry))
    }

    fn insert(&self, entry: PoolEntry) -> usize {
        let mut slots = self.lock();
        let id = entry.id;
        let slot = slots.entries.insert(entry);
        let previous = slots.by_id.insert(id, slot);
        debug_assert!(previous.is_none(), "client {id} registered twice");
        trace!(%id, slot, "Slot claimed");
        slot
    }

    /// Clear the slot held by `id`.
    ///
    /// Removing an id that is not registered is a no-op and returns `false`.
    pub fn remove(&self, id: ClientId) -> bool {
        let mut slots = self.lock();
        let Some(slot) = slots.by_id.remove(&id) else {
            return false;
        };
        slots.entries.remove(slot);
        drop(slots);

        self.free.add_permits(1);
        trace!(%id, slot, "Slot released");
        true
    }

    /// Record the display name of a registered client.
    pub fn set_name(&self, id: ClientId, name: &str) -> bool {
        let mut slots = self.lock();
        let Some(&slot) = slots.by_id.get(&id) else {
            return false;
        };
        slots.entries[slot].name = name.to_string();
        true
    }

    #[cfg(test)]
    pub fn contains(&self, id: ClientId) -> bool {
        self.lock().by_id.contains_key(&id)
    }

    /// Slot currently held by `id`, if registered.
    pub fn slot_of(&self, id: ClientId) -> Option<usize> {
        self.lock().by_id.get(&id).copied()
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Occupied slots in slot order.
    pub fn snapshot(&self) -> Vec<(usize, PoolEntry)> {
        self.lock()
            .entries
            .iter()
            .map(|(slot, entry)| (slot, entry.clone()))
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        // No critical section can panic between the slab and index updates.
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    fn free_slots(&self) -> usize {
        self.free.available_permits()
    }
}

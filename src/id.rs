//! Client identifier allocation.
//!
//! Every accepted connection is stamped with an id drawn from a single
//! monotonically increasing counter. Ids are never handed out twice and the
//! counter never wraps: once the id space is used up, allocation fails.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifier of an accepted client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClientId(u64);

impl ClientId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Allocator for client ids.
///
/// Safe to share between acceptors; each call reads and increments the
/// counter in one atomic step.
#[derive(Debug)]
pub struct IdAllocator {
    next: AtomicU64,
}

impl IdAllocator {
    /// Create an allocator whose first id is `first`.
    pub fn new(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    /// Issue a fresh id, strictly greater than every id issued before.
    ///
    /// Returns `None` once the counter has reached `u64::MAX`.
    pub fn allocate(&self) -> Option<ClientId> {
        self.next
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |next| next.checked_add(1))
            .ok()
            .map(ClientId)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_ids_are_sequential() {
        let ids = IdAllocator::new(10);

        assert_eq!(ids.allocate().unwrap().get(), 10);
        assert_eq!(ids.allocate().unwrap().get(), 11);
        assert_eq!(ids.allocate().unwrap().to_string(), "12");
    }

    #[test]
    fn test_allocation_never_wraps() {
        let ids = IdAllocator::new(u64::MAX - 2);

        let a = ids.allocate().unwrap();
        let b = ids.allocate().unwrap();
        assert!(b > a);
        assert_eq!(b.get(), u64::MAX - 1);

        // Exhausted: no id smaller than a previous one is ever issued
        assert_eq!(ids.allocate(), None);
        assert_eq!(ids.allocate(), None);
    }

    #[test]
    fn test_concurrent_allocation_is_unique() {
        let ids = Arc::new(IdAllocator::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ids = Arc::clone(&ids);
                thread::spawn(move || (0..1000).map(|_| ids.allocate().unwrap()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            let batch = handle.join().unwrap();
            // Per-thread order is increasing
            assert!(batch.windows(2).all(|w| w[0] < w[1]));
            for id in batch {
                assert!(seen.insert(id), "duplicate id {id}");
            }
        }
        assert_eq!(seen.len(), 8000);
    }
}

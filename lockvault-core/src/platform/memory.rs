//! In-process implementations of the host seams.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use super::{DurableStore, LogicalClock, WriteOp};

/// A [`DurableStore`] backed by an in-memory map.
///
/// Commits take the map lock once, so a batch is applied atomically with
/// respect to concurrent reads.
#[derive(Debug, Default)]
pub struct MemoryStore {
    cells: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys. Test helper.
    ///
    /// # Panics
    ///
    /// Panics if the map lock is poisoned.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.lock().unwrap().len()
    }

    /// True when nothing is stored.
    ///
    /// # Panics
    ///
    /// Panics if the map lock is poisoned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.lock().unwrap().is_empty()
    }
}

impl DurableStore for MemoryStore {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, String> {
        let cells = self.cells.lock().map_err(|e| e.to_string())?;
        Ok(cells.get(key).cloned())
    }

    fn commit(&self, batch: Vec<WriteOp>) -> Result<(), String> {
        let mut cells = self.cells.lock().map_err(|e| e.to_string())?;
        for op in batch {
            match op {
                WriteOp::Put { key, value } => {
                    cells.insert(key, value);
                }
                WriteOp::Delete { key } => {
                    cells.remove(&key);
                }
            }
        }
        Ok(())
    }
}

/// A manually driven [`LogicalClock`].
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Creates a clock starting at `now` seconds.
    #[must_use]
    pub const fn starting_at(now: u64) -> Self {
        Self {
            now: AtomicU64::new(now),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, seconds: u64) {
        self.now.fetch_add(seconds, Ordering::SeqCst);
    }

    /// Sets the clock to an absolute time.
    pub fn set(&self, now: u64) {
        self.now.store(now, Ordering::SeqCst);
    }
}

impl LogicalClock for ManualClock {
    fn unix_now(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_then_read() {
        let store = MemoryStore::new();
        store
            .commit(vec![
                WriteOp::Put {
                    key: "a".into(),
                    value: vec![1, 2],
                },
                WriteOp::Put {
                    key: "b".into(),
                    value: vec![3],
                },
            ])
            .unwrap();

        assert_eq!(store.read("a").unwrap(), Some(vec![1, 2]));
        assert_eq!(store.read("b").unwrap(), Some(vec![3]));
        assert_eq!(store.read("c").unwrap(), None);
    }

    #[test]
    fn test_delete_in_batch() {
        let store = MemoryStore::new();
        store
            .commit(vec![WriteOp::Put {
                key: "a".into(),
                value: vec![1],
            }])
            .unwrap();
        store
            .commit(vec![
                WriteOp::Delete { key: "a".into() },
                WriteOp::Put {
                    key: "b".into(),
                    value: vec![2],
                },
            ])
            .unwrap();

        assert_eq!(store.read("a").unwrap(), None);
        assert_eq!(store.read("b").unwrap(), Some(vec![2]));
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::starting_at(100);
        assert_eq!(clock.unix_now(), 100);
        clock.advance(50);
        assert_eq!(clock.unix_now(), 150);
        clock.set(10);
        assert_eq!(clock.unix_now(), 10);
    }
}

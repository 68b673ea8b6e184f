//! Recognition result cache.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use parking_lot::RwLock;

use tapflow_protocols::{RecoId, RecoResult};

/// Id-keyed store of recognition results.
///
/// Ids are assigned monotonically starting at 1 (0 is the "missed" sentinel
/// in node records). Concurrent lookups are cheap; inserts take the write
/// lock. Unbounded until explicitly cleared.
pub struct RecoCache {
    next_id: AtomicI64,
    entries: RwLock<HashMap<RecoId, RecoResult>>,
}

impl Default for RecoCache {
    fn default() -> Self {
        Self::new()
    }
}

impl RecoCache {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Store a result and return its assigned id.
    pub fn put(&self, result: RecoResult) -> RecoId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.write().insert(id, result);
        id
    }

    pub fn get(&self, id: RecoId) -> Option<RecoResult> {
        self.entries.read().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Drop every cached result. Ids keep increasing across clears.
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tapflow_protocols::Rect;

    #[test]
    fn ids_are_monotonic_and_start_at_one() {
        let cache = RecoCache::new();
        let a = cache.put(RecoResult::miss());
        let b = cache.put(RecoResult::hit(Rect::new(0, 0, 1, 1), 1.0));
        assert_eq!(a, 1);
        assert_eq!(b, 2);
    }

    #[test]
    fn get_returns_stored_result() {
        let cache = RecoCache::new();
        let id = cache.put(RecoResult::hit(Rect::new(5, 5, 10, 10), 0.8));
        let got = cache.get(id).unwrap();
        assert!(got.hit);
        assert_eq!(got.hit_box, Rect::new(5, 5, 10, 10));
        assert!(cache.get(999).is_none());
    }

    #[test]
    fn clear_keeps_id_sequence() {
        let cache = RecoCache::new();
        let first = cache.put(RecoResult::miss());
        cache.clear();
        assert!(cache.is_empty());
        let second = cache.put(RecoResult::miss());
        assert!(second > first);
    }
}

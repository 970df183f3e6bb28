//! Bounded record cache backing log reads
//!
//! FIFO eviction keeps the implementation small; the hot records (tree
//! roots and recently appended pages) are re-inserted on every read miss
//! anyway. Hit/miss counters feed `Log::cache_hit_rate`.

use crate::loggable::Loggable;
use arbor_core::Address;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

pub(crate) struct RecordCache {
    map: HashMap<Address, Arc<Loggable>>,
    order: VecDeque<Address>,
    capacity: usize,
    hits: u64,
    misses: u64,
}

impl RecordCache {
    pub(crate) fn new(capacity: usize) -> Self {
        RecordCache {
            map: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity,
            hits: 0,
            misses: 0,
        }
    }

    pub(crate) fn get(&mut self, address: Address) -> Option<Arc<Loggable>> {
        match self.map.get(&address) {
            Some(record) => {
                self.hits += 1;
                Some(Arc::clone(record))
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    pub(crate) fn insert(&mut self, address: Address, record: Arc<Loggable>) {
        if self.map.insert(address, record).is_none() {
            self.order.push_back(address);
            while self.order.len() > self.capacity {
                if let Some(oldest) = self.order.pop_front() {
                    self.map.remove(&oldest);
                }
            }
        }
    }

    /// Drop every cached record at or above `address`; used by rollback.
    pub(crate) fn evict_at_or_above(&mut self, address: Address) {
        self.map.retain(|addr, _| *addr < address);
        self.order.retain(|addr| *addr < address);
    }

    pub(crate) fn clear(&mut self) {
        self.map.clear();
        self.order.clear();
    }

    pub(crate) fn hit_rate(&self) -> f32 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f32 / total as f32
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loggable::TYPE_VALUE;
    use arbor_core::StructureId;

    fn record(n: u8) -> Arc<Loggable> {
        Arc::new(Loggable::new(
            TYPE_VALUE,
            StructureId::META,
            vec![n],
        ))
    }

    #[test]
    fn test_hit_and_miss_counting() {
        let mut cache = RecordCache::new(4);
        assert!(cache.get(0).is_none());
        cache.insert(0, record(1));
        assert!(cache.get(0).is_some());
        assert!((cache.hit_rate() - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_fifo_eviction() {
        let mut cache = RecordCache::new(2);
        cache.insert(0, record(0));
        cache.insert(10, record(1));
        cache.insert(20, record(2));
        assert!(cache.get(0).is_none());
        assert!(cache.get(10).is_some());
        assert!(cache.get(20).is_some());
    }

    #[test]
    fn test_evict_at_or_above() {
        let mut cache = RecordCache::new(8);
        cache.insert(0, record(0));
        cache.insert(10, record(1));
        cache.insert(20, record(2));
        cache.evict_at_or_above(10);
        assert!(cache.get(0).is_some());
        assert!(cache.get(10).is_none());
        assert!(cache.get(20).is_none());
    }

    #[test]
    fn test_empty_hit_rate_is_zero() {
        let cache = RecordCache::new(2);
        assert_eq!(cache.hit_rate(), 0.0);
    }
}

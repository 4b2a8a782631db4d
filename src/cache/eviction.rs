use std::collections::VecDeque;

/// Chooses which unreferenced entry to drop when the cache is full.
///
/// A policy only ever sees keys of entries whose reference count is zero:
/// keys are added when the last handle is released and removed when the
/// entry is revived or dropped.
pub trait EvictionPolicy<K>: Send {
    /// Pick a victim among tracked keys accepted by `is_evictable`, and stop
    /// tracking it.
    fn evict(&mut self, is_evictable: &dyn Fn(&K) -> bool) -> Option<K>;

    /// Called when an entry becomes reclaimable.
    fn on_add(&mut self, key: &K);

    /// Called when an entry stops being reclaimable.
    fn on_remove(&mut self, key: &K);
}

/// Least recently released entries go first.
#[derive(Debug)]
pub struct LruEvictionPolicy<K> {
    order: VecDeque<K>,
}

impl<K> LruEvictionPolicy<K> {
    pub fn new() -> Self {
        Self {
            order: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl<K> Default for LruEvictionPolicy<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Clone + PartialEq + Send> EvictionPolicy<K> for LruEvictionPolicy<K> {
    fn evict(&mut self, is_evictable: &dyn Fn(&K) -> bool) -> Option<K> {
        let position = self.order.iter().position(|key| is_evictable(key))?;
        self.order.remove(position)
    }

    fn on_add(&mut self, key: &K) {
        self.on_remove(key);
        self.order.push_back(key.clone());
    }

    fn on_remove(&mut self, key: &K) {
        self.order.retain(|k| k != key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_least_recent_first() {
        let mut policy = LruEvictionPolicy::new();
        policy.on_add(&1);
        policy.on_add(&2);
        policy.on_add(&3);
        // Released again: moves to the back.
        policy.on_add(&1);

        assert_eq!(policy.evict(&|_| true), Some(2));
        assert_eq!(policy.evict(&|_| true), Some(3));
        assert_eq!(policy.evict(&|_| true), Some(1));
        assert_eq!(policy.evict(&|_| true), None);
    }

    #[test]
    fn skips_keys_that_are_not_evictable() {
        let mut policy = LruEvictionPolicy::new();
        policy.on_add(&"a");
        policy.on_add(&"b");

        assert_eq!(policy.evict(&|key| *key != "a"), Some("b"));
        assert_eq!(policy.len(), 1);
        policy.on_remove(&"a");
        assert!(policy.is_empty());
    }
}

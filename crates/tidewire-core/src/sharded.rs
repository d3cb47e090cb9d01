use std::{
    collections::{hash_map::RandomState, HashMap},
    hash::{BuildHasher, Hash},
};

use parking_lot::RwLock;

/// A hash map split into independently locked shards.
///
/// Receive and send loops touch channel state for different peers at the same time; hashing
/// keys to shards keeps them from contending on a single lock.
pub struct ShardedMap<K, V> {
    shards: Box<[RwLock<HashMap<K, V>>]>,
    hasher: RandomState,
}

impl<K: Hash + Eq, V> ShardedMap<K, V> {
    /// Creates a map with `shard_count` shards (at least one).
    pub fn new(shard_count: usize) -> Self {
        let shards = (0..shard_count.max(1)).map(|_| RwLock::new(HashMap::new())).collect();
        Self { shards, hasher: RandomState::new() }
    }

    fn shard(&self, key: &K) -> &RwLock<HashMap<K, V>> {
        let index = (self.hasher.hash_one(key) as usize) % self.shards.len();
        &self.shards[index]
    }

    /// Inserts a value, returning the previous one.
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        self.shard(&key).write().insert(key, value)
    }

    /// Removes a value.
    pub fn remove(&self, key: &K) -> Option<V> {
        self.shard(key).write().remove(key)
    }

    /// Returns true if the key is present.
    pub fn contains_key(&self, key: &K) -> bool {
        self.shard(key).read().contains_key(key)
    }

    /// Runs `f` on the value under a read lock.
    pub fn with<R>(&self, key: &K, f: impl FnOnce(&V) -> R) -> Option<R> {
        self.shard(key).read().get(key).map(f)
    }

    /// Runs `f` on the value under a write lock.
    pub fn with_mut<R>(&self, key: &K, f: impl FnOnce(&mut V) -> R) -> Option<R> {
        self.shard(key).write().get_mut(key).map(f)
    }

    /// Removes every entry for which `remove` returns true, returning the removed pairs.
    pub fn drain_where(&self, mut remove: impl FnMut(&K, &V) -> bool) -> Vec<(K, V)>
    where
        K: Clone,
    {
        let mut removed = Vec::new();
        for shard in self.shards.iter() {
            let mut shard = shard.write();
            let keys: Vec<K> =
                shard.iter().filter(|(k, v)| remove(k, v)).map(|(k, _)| k.clone()).collect();
            for key in keys {
                if let Some(value) = shard.remove(&key) {
                    removed.push((key, value));
                }
            }
        }
        removed
    }

    /// Visits every entry under read locks, one shard at a time.
    pub fn for_each(&self, mut f: impl FnMut(&K, &V)) {
        for shard in self.shards.iter() {
            for (key, value) in shard.read().iter() {
                f(key, value);
            }
        }
    }

    /// Visits every entry mutably, one shard at a time.
    pub fn for_each_mut(&self, mut f: impl FnMut(&K, &mut V)) {
        for shard in self.shards.iter() {
            for (key, value) in shard.write().iter_mut() {
                f(key, value);
            }
        }
    }

    /// Total number of entries. Not a snapshot across shards.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.read().len()).sum()
    }

    /// Returns true when every shard is empty.
    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|shard| shard.read().is_empty())
    }

    /// Removes every entry.
    pub fn clear(&self) {
        for shard in self.shards.iter() {
            shard.write().clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_access() {
        let map = ShardedMap::new(4);
        assert!(map.insert(1u32, "a".to_string()).is_none());
        assert_eq!(map.insert(1, "b".to_string()), Some("a".to_string()));
        assert_eq!(map.with(&1, |v| v.clone()), Some("b".to_string()));
        assert!(map.with(&2, |v| v.clone()).is_none());

        map.with_mut(&1, |v| v.push('!'));
        assert_eq!(map.with(&1, |v| v.clone()), Some("b!".to_string()));
    }

    #[test]
    fn test_for_each_visits_every_shard() {
        let map = ShardedMap::new(8);
        for i in 0..40u32 {
            map.insert(i, i * 2);
        }
        let mut sum = 0;
        map.for_each(|_, v| sum += *v);
        assert_eq!(sum, (0..40).map(|i| i * 2).sum::<u32>());
    }

    #[test]
    fn test_drain_where_spans_shards() {
        let map = ShardedMap::new(8);
        for i in 0..100u32 {
            map.insert(i, i);
        }
        let mut removed = map.drain_where(|_, v| v % 2 == 0);
        removed.sort();
        assert_eq!(removed.len(), 50);
        assert_eq!(removed[0], (0, 0));
        assert_eq!(map.len(), 50);
        assert!(!map.contains_key(&4));
        assert!(map.contains_key(&5));
    }

    #[test]
    fn test_zero_shards_still_works() {
        let map = ShardedMap::new(0);
        map.insert("k", 1);
        assert_eq!(map.len(), 1);
        map.clear();
        assert!(map.is_empty());
    }
}

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::Mutex;

/// A bucket holds up to `capacity` key/value pairs at a given local depth.
struct Bucket<K, V> {
    items: Vec<(K, V)>,
    capacity: usize,
    local_depth: usize,
}

impl<K: Eq, V> Bucket<K, V> {
    fn new(capacity: usize, local_depth: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
            capacity,
            local_depth,
        }
    }

    fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    fn find(&self, key: &K) -> Option<&V> {
        self.items.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Updates the value on key match, otherwise appends.
    /// Returns false if the bucket is full and the key is not present.
    fn insert(&mut self, key: K, value: V) -> bool {
        if let Some(slot) = self.items.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
            return true;
        }
        if self.is_full() {
            return false;
        }
        self.items.push((key, value));
        true
    }

    fn remove(&mut self, key: &K) -> bool {
        if let Some(pos) = self.items.iter().position(|(k, _)| k == key) {
            self.items.remove(pos);
            true
        } else {
            false
        }
    }
}

/// Directory of shared bucket handles. Every slot whose index's low
/// `local_depth` bits match a bucket's signature points at that bucket,
/// so several slots may alias one bucket.
struct Directory<K, V> {
    slots: Vec<Arc<Mutex<Bucket<K, V>>>>,
    global_depth: usize,
    num_buckets: usize,
}

/// ExtendibleHashTable provides O(1) average lookup with dynamic growth.
///
/// The directory has length `2^global_depth` and doubles by appending a
/// copy of itself whenever a bucket at `local_depth == global_depth` must
/// split. A split redistributes the bucket's items by the bit at position
/// `local_depth` of their hashes and rewires every aliased directory slot.
///
/// One mutex serializes all operations, including the depth inspectors.
pub struct ExtendibleHashTable<K, V> {
    bucket_size: usize,
    dir: Mutex<Directory<K, V>>,
}

impl<K, V> ExtendibleHashTable<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Creates a table with a single bucket of the given capacity.
    pub fn new(bucket_size: usize) -> Self {
        assert!(bucket_size > 0, "bucket size must be positive");
        let dir = Directory {
            slots: vec![Arc::new(Mutex::new(Bucket::new(bucket_size, 0)))],
            global_depth: 0,
            num_buckets: 1,
        };
        Self {
            bucket_size,
            dir: Mutex::new(dir),
        }
    }

    fn hash_of(key: &K) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish() as usize
    }

    fn index_of(key: &K, global_depth: usize) -> usize {
        let mask = (1usize << global_depth) - 1;
        Self::hash_of(key) & mask
    }

    /// Looks up the value associated with `key`.
    pub fn find(&self, key: &K) -> Option<V> {
        let dir = self.dir.lock();
        let bucket = Arc::clone(&dir.slots[Self::index_of(key, dir.global_depth)]);
        let bucket = bucket.lock();
        bucket.find(key).cloned()
    }

    /// Inserts or updates the pair, splitting buckets (and doubling the
    /// directory) as often as needed for the insert to land.
    pub fn insert(&self, key: K, value: V) {
        let mut dir = self.dir.lock();

        loop {
            let idx = Self::index_of(&key, dir.global_depth);
            let bucket_ref = Arc::clone(&dir.slots[idx]);
            let mut bucket = bucket_ref.lock();

            // Covers both the non-full case and the in-place update of a
            // full bucket that already contains the key.
            if !bucket.is_full() || bucket.find(&key).is_some() {
                bucket.insert(key, value);
                return;
            }

            // Full bucket with a new key: split.
            let local_depth = bucket.local_depth;
            if local_depth == dir.global_depth {
                // Double the directory by appending a copy of itself.
                // The number of distinct buckets is unchanged here.
                let copy = dir.slots.clone();
                dir.slots.extend(copy);
                dir.global_depth += 1;
            }

            let high_bit = 1usize << local_depth;
            let low = Arc::new(Mutex::new(Bucket::new(self.bucket_size, local_depth + 1)));
            let high = Arc::new(Mutex::new(Bucket::new(self.bucket_size, local_depth + 1)));

            // Redistribute by the newly discriminating bit.
            for (k, v) in bucket.items.drain(..) {
                if Self::hash_of(&k) & high_bit != 0 {
                    high.lock().items.push((k, v));
                } else {
                    low.lock().items.push((k, v));
                }
            }
            drop(bucket);
            dir.num_buckets += 1;

            // Rewire every slot whose low `local_depth` bits match the old
            // bucket's signature. The key addressed the old bucket, so its
            // low bits are that signature.
            let signature = Self::hash_of(&key) & (high_bit - 1);
            let len = dir.slots.len();
            let mut i = signature;
            while i < len {
                dir.slots[i] = if i & high_bit != 0 {
                    Arc::clone(&high)
                } else {
                    Arc::clone(&low)
                };
                i += high_bit;
            }
            // Retry: the bucket that now receives the key may still be full.
        }
    }

    /// Removes the pair for `key`. Returns true if it was present.
    pub fn remove(&self, key: &K) -> bool {
        let dir = self.dir.lock();
        let bucket = Arc::clone(&dir.slots[Self::index_of(key, dir.global_depth)]);
        let mut bucket = bucket.lock();
        bucket.remove(key)
    }

    /// Returns the directory-wide depth.
    pub fn global_depth(&self) -> usize {
        self.dir.lock().global_depth
    }

    /// Returns the local depth of the bucket addressed by `dir_index`.
    pub fn local_depth(&self, dir_index: usize) -> usize {
        let dir = self.dir.lock();
        let depth = dir.slots[dir_index].lock().local_depth;
        depth
    }

    /// Returns the number of distinct buckets.
    pub fn num_buckets(&self) -> usize {
        self.dir.lock().num_buckets
    }
}

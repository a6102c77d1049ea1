use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use crate::common::FrameId;

/// Per-frame bookkeeping for the replacer
#[derive(Debug)]
struct FrameInfo {
    /// Number of recorded accesses
    access_count: usize,
    /// Whether this frame is currently evictable
    is_evictable: bool,
    /// Whether the frame lives in the cache queue (>= k accesses)
    in_cache: bool,
}

struct ReplacerState {
    /// Frames with fewer than k accesses, most recent insertion at the front
    history: VecDeque<FrameId>,
    /// Frames with k or more accesses, most recent access at the front
    cache: VecDeque<FrameId>,
    /// Frame id -> bookkeeping
    frames: HashMap<FrameId, FrameInfo>,
    /// Number of evictable frames across both queues
    num_evictable: usize,
}

impl ReplacerState {
    fn remove_from_queue(&mut self, frame_id: FrameId, in_cache: bool) {
        let queue = if in_cache {
            &mut self.cache
        } else {
            &mut self.history
        };
        if let Some(pos) = queue.iter().position(|&f| f == frame_id) {
            queue.remove(pos);
        }
    }
}

/// LRU-K Replacement Policy
///
/// Evicts the frame whose backward k-distance is the maximum over all
/// evictable frames. A frame with fewer than k recorded accesses has +inf
/// backward k-distance; ties among +inf frames break toward the earliest
/// overall access.
///
/// Frames with +inf distance wait in the *history* queue and frames with k
/// or more accesses in the *cache* queue, both ordered with the most recent
/// at the front. Scanning history tail-to-head and then cache tail-to-head
/// for the first evictable frame realizes exactly that policy.
pub struct LruKReplacer {
    /// K value for the LRU-K algorithm
    k: usize,
    /// Maximum number of frames the replacer can track
    max_frames: usize,
    state: Mutex<ReplacerState>,
}

impl LruKReplacer {
    /// Creates a new LRU-K replacer with the given k value and maximum frame count.
    pub fn new(k: usize, max_frames: usize) -> Self {
        assert!(k >= 1, "k must be at least 1");
        Self {
            k,
            max_frames,
            state: Mutex::new(ReplacerState {
                history: VecDeque::new(),
                cache: VecDeque::new(),
                frames: HashMap::new(),
                num_evictable: 0,
            }),
        }
    }

    /// Evicts the frame with the largest backward k-distance.
    /// Returns None if there are no evictable frames.
    pub fn evict(&self) -> Option<FrameId> {
        let mut state = self.state.lock();

        if state.num_evictable == 0 {
            return None;
        }

        let from_history = state
            .history
            .iter()
            .rev()
            .copied()
            .find(|f| state.frames[f].is_evictable);
        if let Some(frame_id) = from_history {
            state.remove_from_queue(frame_id, false);
            state.frames.remove(&frame_id);
            state.num_evictable -= 1;
            return Some(frame_id);
        }

        let from_cache = state
            .cache
            .iter()
            .rev()
            .copied()
            .find(|f| state.frames[f].is_evictable);
        if let Some(frame_id) = from_cache {
            state.remove_from_queue(frame_id, true);
            state.frames.remove(&frame_id);
            state.num_evictable -= 1;
            return Some(frame_id);
        }

        None
    }

    /// Records that the given frame was accessed.
    /// Creates the frame's entry in the history queue on first access and
    /// promotes it to the cache queue on its k-th access.
    pub fn record_access(&self, frame_id: FrameId) {
        assert!(
            frame_id.as_usize() < self.max_frames,
            "invalid frame id {}",
            frame_id
        );

        let mut state = self.state.lock();

        if !state.frames.contains_key(&frame_id) {
            state.frames.insert(
                frame_id,
                FrameInfo {
                    access_count: 0,
                    is_evictable: false,
                    in_cache: false,
                },
            );
            state.history.push_front(frame_id);
        }

        let info = state.frames.get_mut(&frame_id).unwrap();
        info.access_count += 1;
        let promote = !info.in_cache && info.access_count >= self.k;
        let refresh = info.in_cache;

        if promote {
            state.remove_from_queue(frame_id, false);
            state.cache.push_front(frame_id);
            state.frames.get_mut(&frame_id).unwrap().in_cache = true;
        } else if refresh {
            state.remove_from_queue(frame_id, true);
            state.cache.push_front(frame_id);
        }
    }

    /// Sets whether a frame is evictable, adjusting the replacer size.
    /// The frame must have been seen by `record_access` first.
    pub fn set_evictable(&self, frame_id: FrameId, is_evictable: bool) {
        let mut state = self.state.lock();

        let info = state
            .frames
            .get_mut(&frame_id)
            .unwrap_or_else(|| panic!("invalid frame id {}", frame_id));

        if info.is_evictable == is_evictable {
            return;
        }
        info.is_evictable = is_evictable;
        if is_evictable {
            state.num_evictable += 1;
        } else {
            state.num_evictable -= 1;
        }
    }

    /// Removes a frame from the replacer regardless of its queue position.
    /// An unknown frame id is a no-op; removing a tracked non-evictable
    /// frame is a caller bug.
    pub fn remove(&self, frame_id: FrameId) {
        let mut state = self.state.lock();

        let Some(info) = state.frames.remove(&frame_id) else {
            return;
        };
        assert!(info.is_evictable, "removing non-evictable frame {}", frame_id);
        state.remove_from_queue(frame_id, info.in_cache);
        state.num_evictable -= 1;
    }

    /// Returns the number of evictable frames.
    pub fn size(&self) -> usize {
        self.state.lock().num_evictable
    }

    /// Returns the k value of this replacer.
    pub fn k(&self) -> usize {
        self.k
    }
}

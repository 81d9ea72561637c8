//! Deferred world mutations.
//!
//! Structural changes are rejected while the world is locked. Callbacks
//! schedule them here instead; the queue runs once the outermost lock is
//! released. Callbacks are keyed, and a key may be pending only once.

use std::collections::VecDeque;

use hashbrown::HashSet;

use crate::World;

/// A deferred mutation.
pub type PostStepFn = Box<dyn FnOnce(&mut World)>;

/// Keyed FIFO of post-step callbacks.
#[derive(Default)]
pub struct PostStepQueue {
    pending: VecDeque<(u64, PostStepFn)>,
    /// Keys scheduled since the last completed flush.
    keys: HashSet<u64>,
}

impl std::fmt::Debug for PostStepQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let keys: Vec<u64> = self.pending.iter().map(|(k, _)| *k).collect();
        f.debug_struct("PostStepQueue").field("pending", &keys).finish()
    }
}

impl PostStepQueue {
    /// An empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `f` under `key`.
    ///
    /// Returns `false` and drops `f` if `key` was already scheduled since the
    /// last flush finished. Callbacks run in scheduling order.
    pub fn schedule(&mut self, key: u64, f: PostStepFn) -> bool {
        if !self.keys.insert(key) {
            return false;
        }
        self.pending.push_back((key, f));
        true
    }

    /// Whether `key` has been scheduled since the last flush.
    #[must_use]
    pub fn contains(&self, key: u64) -> bool {
        self.keys.contains(&key)
    }

    /// Number of callbacks waiting to run.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether no callbacks are waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub(crate) fn pop(&mut self) -> Option<PostStepFn> {
        self.pending.pop_front().map(|(_, f)| f)
    }

    /// Forget the keys of a completed flush.
    pub(crate) fn finish_flush(&mut self) {
        debug_assert!(self.pending.is_empty(), "flush finished with callbacks pending");
        self.keys.clear();
    }
}

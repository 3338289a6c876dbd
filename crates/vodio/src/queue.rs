use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::playlist::SegmentDescriptor;

/// Queue of segments still to be fetched.
///
/// Populated once at dispatch time with the non-cached segments in ascending
/// index order; workers only pop. The bound is therefore the planned segment
/// count, and the queue is the single inter-worker handoff in a run.
pub struct WorkQueue {
    inner: Mutex<VecDeque<SegmentDescriptor>>,
}

impl WorkQueue {
    pub fn new(segments: impl IntoIterator<Item = SegmentDescriptor>) -> Self {
        Self {
            inner: Mutex::new(segments.into_iter().collect()),
        }
    }

    /// Non-blocking pop; `None` means the queue is drained.
    pub fn pop(&self) -> Option<SegmentDescriptor> {
        self.inner.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

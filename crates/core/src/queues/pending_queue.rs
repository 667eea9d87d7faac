use std::collections::VecDeque;

use crate::events::BatchItem;

/// Items waiting for upload, in enqueue order.
///
/// Owned exclusively by the uploader task, so snapshot-and-clear is a single
/// `mem::take` and no enqueue can slip between the two steps.
#[derive(Debug, Default)]
pub struct PendingQueue {
    items: VecDeque<BatchItem>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item: BatchItem) {
        self.items.push_back(item);
    }

    /// Take every pending item and leave the queue empty.
    pub fn take_snapshot(&mut self) -> Vec<BatchItem> {
        std::mem::take(&mut self.items).into()
    }

    /// Put unconfirmed items back ahead of anything enqueued since the
    /// snapshot, preserving their relative order.
    pub fn requeue_front(&mut self, unsent: Vec<BatchItem>) {
        for item in unsent.into_iter().rev() {
            self.items.push_front(item);
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BatchItem> {
        self.items.iter()
    }
}

//! Fixed-capacity history buffer.

/// A circular buffer that silently overwrites its oldest entry when full.
///
/// Only two operations are exposed: append, and a chronological snapshot.
/// There is no indexed access and no removal.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    slots: Vec<Option<T>>,
    /// Slot the next `push` writes to.
    cursor: usize,
    len: usize,
}

impl<T: Clone> RingBuffer<T> {
    /// Creates a buffer holding at most `capacity` items (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: vec![None; capacity],
            cursor: 0,
            len: 0,
        }
    }

    /// Appends an item, evicting the oldest one if the buffer is full.
    pub fn push(&mut self, item: T) {
        self.slots[self.cursor] = Some(item);
        self.cursor = (self.cursor + 1) % self.slots.len();
        self.len = (self.len + 1).min(self.slots.len());
    }

    /// Items oldest first.
    pub fn snapshot(&self) -> Vec<T> {
        let capacity = self.slots.len();
        // When full, the cursor points at the oldest slot.
        let start = if self.len == capacity { self.cursor } else { 0 };
        (0..self.len)
            .filter_map(|offset| self.slots[(start + offset) % capacity].clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

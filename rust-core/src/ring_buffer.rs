//! Fixed-capacity ring buffer.
//!
//! Storage is allocated once at construction and slots are overwritten in
//! place. `push` is O(1) and never reallocates, so a buffer can never hold
//! more than its capacity no matter how long the stream runs.

/// Circular buffer that keeps the most recent `capacity` items.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    slots: Vec<Option<T>>,
    /// Index of the next slot to write.
    write_index: usize,
    len: usize,
}

impl<T> RingBuffer<T> {
    /// Creates an empty buffer. A capacity of 0 is raised to 1.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots,
            write_index: 0,
            len: 0,
        }
    }

    /// Appends an item, evicting and returning the oldest one when full.
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = self.slots[self.write_index].replace(item);
        self.write_index = (self.write_index + 1) % self.slots.len();
        if self.len < self.slots.len() {
            self.len += 1;
        }
        evicted
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.slots.len()
    }

    /// The `n`-th most recent item (0 = newest).
    pub fn recent(&self, n: usize) -> Option<&T> {
        if n >= self.len {
            return None;
        }
        let cap = self.slots.len();
        let index = (self.write_index + cap - 1 - n) % cap;
        self.slots[index].as_ref()
    }

    pub fn latest(&self) -> Option<&T> {
        self.recent(0)
    }

    pub fn latest_mut(&mut self) -> Option<&mut T> {
        if self.len == 0 {
            return None;
        }
        let cap = self.slots.len();
        let index = (self.write_index + cap - 1) % cap;
        self.slots[index].as_mut()
    }

    /// Drops every item. Capacity is kept.
    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.write_index = 0;
        self.len = 0;
    }

    /// Items in chronological order, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        (0..self.len).rev().filter_map(move |n| self.recent(n))
    }
}

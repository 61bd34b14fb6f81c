/// Fixed-capacity ring buffer with index wraparound.
///
/// Once full, each push overwrites the oldest slot. Iteration yields items
/// oldest first.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    slots: Vec<T>,
    capacity: usize,
    head: usize,
}

impl<T> RingBuffer<T> {
    /// Create a buffer holding at most `capacity` items (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: Vec::with_capacity(capacity),
            capacity,
            head: 0,
        }
    }

    pub fn push(&mut self, item: T) {
        if self.slots.len() < self.capacity {
            self.slots.push(item);
        } else {
            self.slots[self.head] = item;
        }
        self.head = (self.head + 1) % self.capacity;
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.slots.len() == self.capacity
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.head = 0;
    }

    /// Most recently pushed item.
    pub fn latest(&self) -> Option<&T> {
        if self.slots.is_empty() {
            return None;
        }
        let idx = (self.head + self.capacity - 1) % self.capacity;
        self.slots.get(idx)
    }

    /// Iterate oldest to newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + '_ {
        let start = if self.is_full() { self.head } else { 0 };
        let (newer, older) = self.slots.split_at(start);
        older.iter().chain(newer.iter())
    }

    /// The newest `n` items, oldest first.
    pub fn last_n(&self, n: usize) -> Vec<&T> {
        let skip = self.len().saturating_sub(n);
        self.iter().skip(skip).collect()
    }

    /// Drop every item for which `keep` returns `false`, preserving order.
    pub fn retain(&mut self, mut keep: impl FnMut(&T) -> bool)
    where
        T: Clone,
    {
        let kept: Vec<T> = self.iter().filter(|item| keep(item)).cloned().collect();
        self.slots = kept;
        self.head = self.slots.len() % self.capacity;
    }
}

impl<T: Clone> RingBuffer<T> {
    pub fn to_vec(&self) -> Vec<T> {
        self.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_below_capacity_keeps_order() {
        let mut ring = RingBuffer::new(4);
        ring.push(1);
        ring.push(2);
        assert_eq!(ring.to_vec(), vec![1, 2]);
        assert_eq!(ring.latest(), Some(&2));
        assert!(!ring.is_full());
    }

    #[test]
    fn wraparound_overwrites_oldest() {
        let mut ring = RingBuffer::new(3);
        for i in 1..=5 {
            ring.push(i);
        }
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.to_vec(), vec![3, 4, 5]);
        assert_eq!(ring.latest(), Some(&5));
    }

    #[test]
    fn last_n_returns_newest_oldest_first() {
        let mut ring = RingBuffer::new(5);
        for i in 0..8 {
            ring.push(i);
        }
        let last: Vec<i32> = ring.last_n(2).into_iter().copied().collect();
        assert_eq!(last, vec![6, 7]);
        assert_eq!(ring.last_n(100).len(), 5);
    }

    #[test]
    fn retain_then_push_stays_ordered() {
        let mut ring = RingBuffer::new(3);
        for i in 1..=4 {
            ring.push(i);
        }
        ring.retain(|v| *v != 3);
        assert_eq!(ring.to_vec(), vec![2, 4]);
        ring.push(9);
        ring.push(10);
        assert_eq!(ring.to_vec(), vec![4, 9, 10]);
    }

    #[test]
    fn zero_capacity_is_promoted_to_one() {
        let mut ring = RingBuffer::new(0);
        ring.push("a");
        ring.push("b");
        assert_eq!(ring.to_vec(), vec!["b"]);
    }
}

//! FIFO wait queue.
//!
//! Iteration order is insertion order, which is what gives semaphore wakeups
//! their fairness.

use std::collections::VecDeque;

/// First-in first-out queue with predicate lookup and targeted removal.
#[derive(Debug, Clone)]
pub struct WaitQueue<T> {
    items: VecDeque<T>,
}

impl<T> WaitQueue<T> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            items: VecDeque::new(),
        }
    }

    /// Append `item` at the tail.
    pub fn enqueue(&mut self, item: T) {
        self.items.push_back(item);
    }

    /// Remove and return the oldest item.
    pub fn dequeue(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// First item, in insertion order, for which `pred` holds.
    pub fn find<P>(&self, mut pred: P) -> Option<&T>
    where
        P: FnMut(&T) -> bool,
    {
        self.items.iter().find(|item| pred(*item))
    }

    /// Iterate in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }
}

impl<T: PartialEq> WaitQueue<T> {
    /// Remove the oldest item equal to `item`. Returns whether one was found.
    pub fn delete(&mut self, item: &T) -> bool {
        match self.items.iter().position(|queued| queued == item) {
            Some(index) => {
                self.items.remove(index);
                true
            }
            None => false,
        }
    }
}

impl<T> Default for WaitQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let mut queue = WaitQueue::new();
        queue.enqueue(1);
        queue.enqueue(2);
        queue.enqueue(3);
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.dequeue(), Some(1));
        assert_eq!(queue.dequeue(), Some(2));
        assert_eq!(queue.dequeue(), Some(3));
        assert_eq!(queue.dequeue(), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_find_returns_first_match() {
        let mut queue = WaitQueue::new();
        for (key, tag) in [(1, 'a'), (2, 'b'), (1, 'c')] {
            queue.enqueue((key, tag));
        }
        assert_eq!(queue.find(|&(key, _)| key == 1), Some(&(1, 'a')));
        assert_eq!(queue.find(|&(key, _)| key == 9), None);
    }

    #[test]
    fn test_delete_keeps_remaining_order() {
        let mut queue: WaitQueue<u32> = [4, 5, 6, 5].into_iter().fold(
            WaitQueue::new(),
            |mut q, item| {
                q.enqueue(item);
                q
            },
        );
        assert!(queue.delete(&5));
        assert!(!queue.delete(&7));
        assert_eq!(queue.iter().copied().collect::<Vec<_>>(), vec![4, 6, 5]);
    }
}

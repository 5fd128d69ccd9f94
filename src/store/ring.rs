//! Fixed-capacity FIFO buffer

use std::collections::VecDeque;

use chrono::{DateTime, Utc};

use crate::models::{DepthSnapshot, PricePoint, SeriesPoint, Trade};

/// Anything stored in time order.
pub trait Timestamped {
    fn timestamp(&self) -> DateTime<Utc>;
}

impl Timestamped for Trade {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

impl Timestamped for DepthSnapshot {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

impl Timestamped for PricePoint {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

impl Timestamped for SeriesPoint {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Holds at most `capacity` items; pushing onto a full buffer evicts the
/// oldest. Reads hand out clones.
#[derive(Debug, Clone)]
pub struct BoundedBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T: Clone> BoundedBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append, returning the evicted element if the buffer was full.
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.len() >= self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn last(&self) -> Option<&T> {
        self.items.back()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> {
        self.items.iter()
    }

    pub fn iter_mut(&mut self) -> impl DoubleEndedIterator<Item = &mut T> {
        self.items.iter_mut()
    }

    /// The newest `n` items, oldest first.
    pub fn recent(&self, n: usize) -> Vec<T> {
        let skip = self.items.len().saturating_sub(n);
        self.items.iter().skip(skip).cloned().collect()
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

impl<T: Clone + Timestamped> BoundedBuffer<T> {
    /// Items stamped at or after `cutoff`, oldest first.
    ///
    /// Walks from the newest end and stops at the first older item, so the
    /// cost is proportional to the window, not the buffer.
    pub fn since(&self, cutoff: DateTime<Utc>) -> Vec<T> {
        let mut out: Vec<T> = self
            .items
            .iter()
            .rev()
            .take_while(|item| item.timestamp() >= cutoff)
            .cloned()
            .collect();
        out.reverse();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn evicts_oldest_when_full() {
        let mut buf = BoundedBuffer::new(3);
        for i in 0..5 {
            buf.push(i);
        }
        assert_eq!(buf.len(), 3);
        assert_eq!(buf.to_vec(), vec![2, 3, 4]);
    }

    #[test]
    fn push_reports_evicted_item() {
        let mut buf = BoundedBuffer::new(2);
        assert_eq!(buf.push('a'), None);
        assert_eq!(buf.push('b'), None);
        assert_eq!(buf.push('c'), Some('a'));
    }

    #[test]
    fn recent_returns_tail_in_order() {
        let mut buf = BoundedBuffer::new(10);
        for i in 0..6 {
            buf.push(i);
        }
        assert_eq!(buf.recent(3), vec![3, 4, 5]);
        assert_eq!(buf.recent(100).len(), 6);
        assert!(BoundedBuffer::<u8>::new(4).recent(2).is_empty());
    }

    #[test]
    fn since_filters_by_timestamp() {
        let base = Utc::now();
        let mut buf = BoundedBuffer::new(10);
        for i in 0..5 {
            buf.push(SeriesPoint::new(base + Duration::seconds(i), i as f64));
        }
        let tail = buf.since(base + Duration::seconds(3));
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].value, 3.0);
        assert_eq!(tail[1].value, 4.0);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let mut buf = BoundedBuffer::new(0);
        buf.push(1);
        buf.push(2);
        assert_eq!(buf.capacity(), 1);
        assert_eq!(buf.to_vec(), vec![2]);
    }
}

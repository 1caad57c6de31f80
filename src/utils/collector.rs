//! Concurrent Append-Only Collectors
//!
//! [`ConcurrentCollector`] accepts items from any number of threads through
//! `&self` and hands out the final index of every item at insertion time.
//! Items become readable once the collector is [closed](ConcurrentCollector::close),
//! which requires exclusive access and therefore happens between parallel
//! sections.
//!
//! ```text
//!   worker 0 ──► CollectorCache ─┐ (one reservation per flushed batch)
//!   worker 1 ──► CollectorCache ─┼──► reserved.fetch_add(n) ──► buckets[b][offset]
//!   worker 2 ──► add()  ─────────┘                                   │
//!                                                                    ▼ close(&mut self)
//!                                                  items: Vec<T>  (frozen, &[T])
//! ```
//!
//! Appends never lock. Bucket `b` holds `FIRST_BUCKET << b` slots and is
//! allocated by the first writer that reaches it; allocations survive
//! `close` and `clear`, so steady-state frames do not allocate.

use std::ops::Range;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicUsize, Ordering};

const FIRST_BUCKET: usize = 32;
const BUCKET_COUNT: usize = (usize::BITS - FIRST_BUCKET.trailing_zeros()) as usize;

type Bucket<T> = Box<[OnceLock<T>]>;

/// Bucket and offset of pending index `index`.
#[inline]
fn locate(index: usize) -> (usize, usize) {
    let shifted = index + FIRST_BUCKET;
    let bit = (usize::BITS - 1 - shifted.leading_zeros()) as usize;
    let bucket = bit - FIRST_BUCKET.trailing_zeros() as usize;
    (bucket, shifted - (1 << bit))
}

/// Append-only collection filled concurrently and read after closing.
pub struct ConcurrentCollector<T> {
    reserved: AtomicUsize,
    buckets: [OnceLock<Bucket<T>>; BUCKET_COUNT],
    items: Vec<T>,
}

impl<T> Default for ConcurrentCollector<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ConcurrentCollector<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            reserved: AtomicUsize::new(0),
            buckets: std::array::from_fn(|_| OnceLock::new()),
            items: Vec::new(),
        }
    }

    fn write(&self, pending_index: usize, item: T) {
        let (bucket, offset) = locate(pending_index);
        let slots = self.buckets[bucket]
            .get_or_init(|| (0..FIRST_BUCKET << bucket).map(|_| OnceLock::new()).collect());
        // Reserved indices are unique, so the slot is always empty here.
        let _ = slots[offset].set(item);
    }

    /// Appends one item and returns its final index.
    pub fn add(&self, item: T) -> usize {
        let pending_index = self.reserved.fetch_add(1, Ordering::Relaxed);
        self.write(pending_index, item);
        self.items.len() + pending_index
    }

    /// Appends a batch with a single reservation and returns the index range
    /// it occupies.
    pub fn add_range<I>(&self, items: I) -> Range<usize>
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: ExactSizeIterator,
    {
        let items = items.into_iter();
        let count = items.len();
        let first = self.reserved.fetch_add(count, Ordering::Relaxed);
        let mut written = 0;
        for (pending_index, item) in (first..).zip(items) {
            self.write(pending_index, item);
            written += 1;
        }
        debug_assert_eq!(written, count, "ExactSizeIterator reported a wrong length");
        let base = self.items.len();
        base + first..base + first + count
    }

    /// Moves pending slots out in index order, leaving them empty.
    fn drain_pending(&mut self) -> impl Iterator<Item = T> + '_ {
        let reserved = std::mem::take(self.reserved.get_mut());
        (0..reserved).filter_map(move |pending_index| {
            let (bucket, offset) = locate(pending_index);
            self.buckets[bucket]
                .get_mut()
                .and_then(|slots| slots[offset].take())
        })
    }

    /// Publishes every pending item. Afterwards [`items`](Self::items)
    /// contains everything added so far, in index order.
    pub fn close(&mut self) {
        let mut items = std::mem::take(&mut self.items);
        items.extend(self.drain_pending());
        self.items = items;
    }

    /// Closed items.
    #[inline]
    #[must_use]
    pub fn items(&self) -> &[T] {
        &self.items
    }

    #[inline]
    pub fn items_mut(&mut self) -> &mut [T] {
        &mut self.items
    }

    /// Number of items added, closed or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len() + self.reserved.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.drain_pending().for_each(drop);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for ConcurrentCollector<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrentCollector")
            .field("items", &self.items)
            .field("pending", &self.reserved.load(Ordering::Acquire))
            .finish()
    }
}

impl<'a, T> IntoIterator for &'a ConcurrentCollector<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

/// Thread-local staging buffer in front of a [`ConcurrentCollector`].
///
/// Flushes when the buffer reaches its capacity and when dropped. Indices of
/// cached items are only known after flushing, so use
/// [`ConcurrentCollector::add`] directly when the caller needs the index.
pub struct CollectorCache<'a, T> {
    collector: &'a ConcurrentCollector<T>,
    buffer: Vec<T>,
    capacity: usize,
}

impl<'a, T> CollectorCache<'a, T> {
    #[must_use]
    pub fn new(collector: &'a ConcurrentCollector<T>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            collector,
            buffer: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn add(&mut self, item: T) {
        self.buffer.push(item);
        if self.buffer.len() >= self.capacity {
            self.flush();
        }
    }

    pub fn flush(&mut self) {
        if !self.buffer.is_empty() {
            self.collector.add_range(self.buffer.drain(..));
        }
    }
}

impl<T> Drop for CollectorCache<'_, T> {
    fn drop(&mut self) {
        self.flush();
    }
}

//! Thread-Safe Object Pool
//!
//! Per-frame scratch containers (view-stage node lists, sort-key buffers,
//! worker command lists) are taken from a [`ConcurrentPool`] during a frame
//! and returned on reset instead of being freed, so steady-state frames do
//! not allocate.

use parking_lot::Mutex;

type Factory<T> = Box<dyn Fn() -> T + Send + Sync>;

/// Pool of reusable values with a factory for misses.
pub struct ConcurrentPool<T> {
    items: Mutex<Vec<T>>,
    factory: Factory<T>,
}

impl<T> ConcurrentPool<T> {
    pub fn new(factory: impl Fn() -> T + Send + Sync + 'static) -> Self {
        Self {
            items: Mutex::new(Vec::new()),
            factory: Box::new(factory),
        }
    }

    /// Takes a pooled value, creating one when the pool is empty.
    pub fn acquire(&self) -> T {
        let recycled = self.items.lock().pop();
        recycled.unwrap_or_else(|| (self.factory)())
    }

    /// Returns a value to the pool. Callers reset it before releasing.
    pub fn release(&self, item: T) {
        self.items.lock().push(item);
    }

    /// Number of idle values.
    #[must_use]
    pub fn idle_count(&self) -> usize {
        self.items.lock().len()
    }
}

impl<T: Default + 'static> Default for ConcurrentPool<T> {
    fn default() -> Self {
        Self::new(T::default)
    }
}

impl<T> std::fmt::Debug for ConcurrentPool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrentPool")
            .field("idle", &self.idle_count())
            .finish_non_exhaustive()
    }
}

//! # Latest-Value Cache
//!
//! A lock-protected slot holding the most recent sample from one source.
//!
//! Producers replace the whole value under the lock and consumers take a copy
//! under the same lock, so a reader never sees half of an update. There is
//! no generation counter: reading the same value twice is expected when the
//! consumer samples faster than the producer refreshes.

use std::sync::Arc;

use parking_lot::Mutex;

/// Shared "latest known value" slot
///
/// Cloning the cache clones the handle; all clones see the same slot.
#[derive(Debug)]
pub struct LatestValue<T> {
    slot: Arc<Mutex<Option<T>>>,
}

impl<T> Clone for LatestValue<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T> Default for LatestValue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> LatestValue<T> {
    /// Create an empty cache
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
        }
    }

    /// Replace the held value
    pub fn set(&self, value: T) {
        *self.slot.lock() = Some(value);
    }

    /// Whether any value has been written
    pub fn is_present(&self) -> bool {
        self.slot.lock().is_some()
    }
}

impl<T: Clone> LatestValue<T> {
    /// Copy of the held value, or `None` if nothing was ever written
    pub fn get(&self) -> Option<T> {
        self.slot.lock().clone()
    }
}

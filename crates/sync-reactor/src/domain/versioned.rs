//! # Versioned Collection
//!
//! Copy-on-write holder for the durable collections. Every update replaces
//! the value and bumps the version; readers holding an `Arc` from before the
//! update keep seeing the old value. Result memoization keys on versions.

use std::sync::Arc;

/// A value with a monotonically increasing version and a persistence flag.
#[derive(Debug)]
pub struct Versioned<T> {
    value: Arc<T>,
    version: u64,
    dirty: bool,
    loaded: bool,
}

impl<T: Clone + Default> Default for Versioned<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: Clone> Versioned<T> {
    /// Wrap an initial value at version 0. Not yet loaded from storage.
    pub fn new(value: T) -> Self {
        Self {
            value: Arc::new(value),
            version: 0,
            dirty: false,
            loaded: false,
        }
    }

    /// Current value.
    pub fn get(&self) -> &T {
        &self.value
    }

    /// Shared handle to the current value.
    pub fn snapshot(&self) -> Arc<T> {
        Arc::clone(&self.value)
    }

    /// Current version.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Replace with a value computed from the previous one.
    pub fn set(&mut self, next: impl FnOnce(&T) -> T) {
        self.value = Arc::new(next(&self.value));
        self.bump();
    }

    /// Edit a private copy of the value, then publish it.
    pub fn update<R>(&mut self, edit: impl FnOnce(&mut T) -> R) -> R {
        let out = edit(Arc::make_mut(&mut self.value));
        self.bump();
        out
    }

    /// Mark as loaded from storage.
    pub fn mark_loaded(&mut self) {
        self.loaded = true;
    }

    /// Whether the durable copy has been merged in.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Returns whether the value changed since the last call.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    fn bump(&mut self) {
        self.version += 1;
        self.dirty = true;
    }
}

//! One computation per key, however many callers ask at once.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

#[derive(Debug)]
pub(crate) struct InFlight<T> {
    slots: Mutex<HashMap<String, Arc<OnceLock<T>>>>,
}

impl<T> Default for InFlight<T> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl<T: Clone> InFlight<T> {
    /// Run `work` for `key` unless a run is already in progress, in which case
    /// wait for it and share its result.
    pub(crate) fn run(&self, key: &str, work: impl FnOnce() -> T) -> T {
        let slot = {
            let mut slots = self.slots.lock();
            Arc::clone(slots.entry(key.to_string()).or_default())
        };

        let value = slot.get_or_init(work).clone();

        let mut slots = self.slots.lock();
        if slots
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, &slot))
        {
            slots.remove(key);
        }
        value
    }

    #[cfg(test)]
    pub(crate) fn pending(&self) -> usize {
        self.slots.lock().len()
    }
}

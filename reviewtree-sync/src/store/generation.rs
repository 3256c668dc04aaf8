use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

/// Token captured by one call against one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    target: String,
    value: u64,
}

impl Generation {
    pub fn target(&self) -> &str {
        &self.target
    }
}

/// Latest generation issued per target. A call whose token is no longer the
/// latest for its target has been overtaken and its result is dropped.
#[derive(Debug, Default)]
pub struct Generations {
    inner: Mutex<GenerationTable>,
}

#[derive(Debug, Default)]
struct GenerationTable {
    next: u64,
    latest: HashMap<String, u64>,
}

impl Generations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue(&self, target: &str) -> Generation {
        let mut table = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        table.next += 1;
        let value = table.next;
        table.latest.insert(target.to_string(), value);
        Generation {
            target: target.to_string(),
            value,
        }
    }

    pub fn is_current(&self, generation: &Generation) -> bool {
        let table = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        table.latest.get(&generation.target) == Some(&generation.value)
    }

    /// Drops the target's entry once its latest call is done. Older tokens for
    /// the target stay stale.
    pub fn release(&self, generation: &Generation) {
        let mut table = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if table.latest.get(&generation.target) == Some(&generation.value) {
            table.latest.remove(&generation.target);
        }
    }

    pub fn pending(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .latest
            .len()
    }
}

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Per-key save coalescing: every save registers under its key and bumps a
/// generation counter; an in-flight save whose generation is no longer the
/// latest has been superseded and should skip its write. This replaces
/// timer-based debouncing with an explicit guard keyed by question.
#[derive(Clone, Default)]
pub struct SaveGuard {
    generations: Arc<Mutex<HashMap<String, u64>>>,
}

impl SaveGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self, key: &str) -> SaveTicket {
        let mut map = self.generations.lock().expect("save guard poisoned");
        let latest = map.entry(key.to_string()).or_insert(0);
        *latest += 1;
        SaveTicket {
            generations: self.generations.clone(),
            key: key.to_string(),
            generation: *latest,
        }
    }
}

pub struct SaveTicket {
    generations: Arc<Mutex<HashMap<String, u64>>>,
    key: String,
    generation: u64,
}

impl SaveTicket {
    /// False once a newer save has begun for the same key.
    pub fn is_current(&self) -> bool {
        let map = self.generations.lock().expect("save guard poisoned");
        map.get(&self.key).copied() == Some(self.generation)
    }
}

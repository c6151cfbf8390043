//! In-memory backend for ephemeral sessions and tests

use super::KeyValueBackend;
use crate::error::{CoordinatorError, CoordinatorResult};

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

#[derive(Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, String>>,
    fail_writes: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an unavailable store (quota exceeded and the like)
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn raw(&self, key: &str) -> Option<String> {
        self.lock().get(key).cloned()
    }

    pub fn insert_raw(&self, key: &str, value: &str) {
        self.lock().insert(key.to_string(), value.to_string());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        // A poisoned map still holds consistent strings
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl KeyValueBackend for MemoryBackend {
    async fn load(&self, key: &str) -> CoordinatorResult<Option<String>> {
        Ok(self.raw(key))
    }

    async fn save_all(&self, entries: &[(&str, String)]) -> CoordinatorResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CoordinatorError::Persistence(
                "memory store is not accepting writes".to_string(),
            ));
        }

        let mut map = self.lock();
        for (key, value) in entries {
            map.insert((*key).to_string(), value.clone());
        }
        Ok(())
    }
}

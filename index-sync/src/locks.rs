//! Per-path async locks. The map only holds entries for paths that are
//! currently locked or awaited.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::OwnedMutexGuard;

type Slot = Arc<tokio::sync::Mutex<()>>;

#[derive(Default)]
pub struct PathLocks {
    slots: Mutex<HashMap<String, Slot>>,
}

impl PathLocks {
    /// Waits until no other holder has `path`, then holds it until the guard drops.
    pub async fn lock(&self, path: &str) -> PathGuard<'_> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
            Arc::clone(slots.entry(path.to_string()).or_default())
        };
        let guard = slot.lock_owned().await;
        PathGuard {
            locks: self,
            path: path.to_string(),
            guard: Some(guard),
        }
    }

    /// Paths currently locked or awaited.
    pub fn in_flight(&self) -> usize {
        self.slots.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

pub struct PathGuard<'a> {
    locks: &'a PathLocks,
    path: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for PathGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut slots = self.locks.slots.lock().unwrap_or_else(|p| p.into_inner());
        // Only the map's own handle left: nobody holds or waits for this path.
        if slots
            .get(&self.path)
            .is_some_and(|slot| Arc::strong_count(slot) == 1)
        {
            slots.remove(&self.path);
        }
    }
}

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::dispatch::abort::AbortController;

struct TaskSlot {
    generation: u64,
    controller: Arc<AbortController>,
}

type Table = Arc<Mutex<HashMap<String, TaskSlot>>>;

/// In-flight abortable calls of one façade, keyed by caller-chosen task ID.
///
/// Every registration gets a generation number. A finished call only removes
/// its own entry, so a re-registered ID is never cleaned up by the call it
/// replaced.
#[derive(Default)]
pub struct AbortableTasks {
    table: Table,
    next_generation: AtomicU64,
}

impl AbortableTasks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(table: &Mutex<HashMap<String, TaskSlot>>) -> MutexGuard<'_, HashMap<String, TaskSlot>> {
        table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a task and return its controller. The controller's cleanup
    /// removes the entry. An ID already in flight is aborted first.
    pub fn register(&self, task_id: &str) -> Arc<AbortController> {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let table = Arc::downgrade(&self.table);
        let key = task_id.to_string();

        let controller = Arc::new(AbortController::with_cleanup(move || {
            if let Some(table) = table.upgrade() {
                let mut guard = Self::lock(&table);
                if guard.get(&key).is_some_and(|slot| slot.generation == generation) {
                    guard.remove(&key);
                }
            }
        }));

        let previous = Self::lock(&self.table).insert(
            task_id.to_string(),
            TaskSlot {
                generation,
                controller: controller.clone(),
            },
        );
        if let Some(previous) = previous {
            tracing::warn!(task_id, "task ID re-registered, aborting previous call");
            previous.controller.abort();
        }

        controller
    }

    /// Abort an in-flight task. Unknown or finished IDs are a no-op.
    /// Returns whether a task was aborted.
    pub fn abort(&self, task_id: &str) -> bool {
        let slot = Self::lock(&self.table).remove(task_id);
        match slot {
            Some(slot) => {
                tracing::info!(task_id, "aborting bot task");
                slot.controller.abort();
                true
            }
            None => false,
        }
    }

    /// True unless the task is registered and still running.
    pub fn is_aborted(&self, task_id: &str) -> bool {
        !Self::lock(&self.table).contains_key(task_id)
    }

    pub fn len(&self) -> usize {
        Self::lock(&self.table).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

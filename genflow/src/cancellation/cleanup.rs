//! Registry of handles a run owns and must release on force stop.

use parking_lot::Mutex;
use std::time::Duration;
use tokio::task::AbortHandle;
use tracing::warn;

enum Handle {
    Callback(Box<dyn FnOnce() + Send>),
    Task(AbortHandle),
}

struct Entry {
    name: String,
    handle: Handle,
}

/// Owned handles (child processes, timers, helper tasks) released in LIFO
/// order.
#[derive(Default)]
pub struct CleanupRegistry {
    entries: Mutex<Vec<Entry>>,
}

impl CleanupRegistry {
    /// Creates a new cleanup registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a cleanup callback, such as killing a child process.
    pub fn register<F>(&self, name: impl Into<String>, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.entries.lock().push(Entry {
            name: name.into(),
            handle: Handle::Callback(Box::new(callback)),
        });
    }

    /// Registers a spawned task that is aborted on cleanup.
    pub fn register_task(&self, name: impl Into<String>, handle: AbortHandle) {
        self.entries.lock().push(Entry {
            name: name.into(),
            handle: Handle::Task(handle),
        });
    }

    /// Removes every entry with the given name without running it.
    ///
    /// Returns true if anything was removed.
    pub fn unregister(&self, name: &str) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|e| e.name != name);
        entries.len() < before
    }

    /// Releases every handle in LIFO order and empties the registry.
    ///
    /// Each callback gets an equal share of `timeout`. Failures are
    /// collected as `(name, message)` and do not stop later entries.
    pub async fn run_all(&self, timeout: Duration) -> Vec<(String, String)> {
        let entries = std::mem::take(&mut *self.entries.lock());
        if entries.is_empty() {
            return Vec::new();
        }

        let share = (timeout / entries.len() as u32).max(Duration::from_millis(10));
        let mut failures = Vec::new();

        for entry in entries.into_iter().rev() {
            let name = entry.name;
            match entry.handle {
                Handle::Task(handle) => handle.abort(),
                Handle::Callback(callback) => {
                    let result = tokio::time::timeout(
                        share,
                        tokio::task::spawn_blocking(move || {
                            std::panic::catch_unwind(std::panic::AssertUnwindSafe(callback))
                        }),
                    )
                    .await;

                    let failure = match result {
                        Ok(Ok(Ok(()))) => None,
                        Ok(Ok(Err(panic))) => Some(format!("cleanup panicked: {panic:?}")),
                        Ok(Err(join_err)) => Some(format!("cleanup task failed: {join_err}")),
                        Err(_) => Some("cleanup timed out".to_string()),
                    };
                    if let Some(msg) = failure {
                        warn!(handle = %name, "{}", msg);
                        failures.push((name, msg));
                    }
                }
            }
        }

        failures
    }

    /// Returns the number of registered handles.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.entries.lock().len()
    }

    /// Drops every entry without running it.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl std::fmt::Debug for CleanupRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupRegistry")
            .field("pending_count", &self.pending_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_run_all_is_lifo() {
        let registry = CleanupRegistry::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 1..=3 {
            let order = order.clone();
            registry.register(format!("h{i}"), move || order.lock().push(i));
        }

        let failures = registry.run_all(Duration::from_secs(1)).await;
        assert!(failures.is_empty());
        assert_eq!(*order.lock(), vec![3, 2, 1]);
        assert_eq!(registry.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_panicking_cleanup_is_collected() {
        let registry = CleanupRegistry::new();
        let ran = Arc::new(Mutex::new(false));

        let r = ran.clone();
        registry.register("first", move || *r.lock() = true);
        registry.register("panics", || panic!("Intentional"));

        let failures = registry.run_all(Duration::from_secs(1)).await;
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, "panics");
        assert!(*ran.lock());
    }

    #[tokio::test]
    async fn test_registered_task_is_aborted() {
        let registry = CleanupRegistry::new();
        let task = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        registry.register_task("sleeper", task.abort_handle());

        registry.run_all(Duration::from_secs(1)).await;
        assert!(task.await.unwrap_err().is_cancelled());
    }

    #[test]
    fn test_unregister() {
        let registry = CleanupRegistry::new();
        registry.register("keep", || {});
        registry.register("remove", || {});

        assert!(registry.unregister("remove"));
        assert!(!registry.unregister("missing"));
        assert_eq!(registry.pending_count(), 1);
    }
}

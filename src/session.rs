use std::{
    collections::HashMap,
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::{
    sync::Mutex,
    task::JoinHandle,
    time::{sleep_until, Instant},
};

/// Inbound-event silence after which an active conversation is force-ended.
pub const IDLE_WINDOW: Duration = Duration::from_secs(60);

struct ActiveSession {
    epoch: u64,
    timer: JoinHandle<()>,
}

/// In-memory map of accounts with a live conversation. Presence in the map
/// is the "do not re-greet" signal; there is no persisted flag.
pub struct SessionRegistry {
    inner: Arc<Mutex<HashMap<String, ActiveSession>>>,
    idle_window: Duration,
    epochs: AtomicU64,
}

impl SessionRegistry {
    pub fn new(idle_window: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            idle_window,
            epochs: AtomicU64::new(0),
        }
    }

    pub async fn is_active(&self, account_key: &str) -> bool {
        self.inner.lock().await.contains_key(account_key)
    }

    /// Cancels any pending idle timer for the account and arms a fresh one.
    /// Returns whether the account already had an active session.
    ///
    /// `on_expire` runs at most once per call: the expiry task re-checks its
    /// epoch against the registry under the lock before firing, so a timer
    /// whose abort lost the race still cannot expire a newer generation.
    pub async fn touch<F>(&self, account_key: &str, on_expire: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        // Deadline is fixed here, not inside the spawned task, so the timer
        // measures from the inbound event regardless of task scheduling.
        let deadline = Instant::now() + self.idle_window;
        let epoch = self.epochs.fetch_add(1, Ordering::Relaxed);
        let mut sessions = self.inner.lock().await;
        let was_active = match sessions.remove(account_key) {
            Some(previous) => {
                previous.timer.abort();
                true
            }
            None => false,
        };
        let timer = tokio::spawn({
            let registry = Arc::clone(&self.inner);
            let key = account_key.to_string();
            async move {
                sleep_until(deadline).await;
                let expired = {
                    let mut sessions = registry.lock().await;
                    match sessions.get(&key) {
                        Some(current) if current.epoch == epoch => {
                            sessions.remove(&key);
                            true
                        }
                        _ => false,
                    }
                };
                if expired {
                    on_expire.await;
                }
            }
        });
        sessions.insert(account_key.to_string(), ActiveSession { epoch, timer });
        was_active
    }

    /// Removes the session and cancels its timer. Ending an already-ended
    /// session is a no-op.
    pub async fn end(&self, account_key: &str) {
        if let Some(previous) = self.inner.lock().await.remove(account_key) {
            previous.timer.abort();
        }
    }
}

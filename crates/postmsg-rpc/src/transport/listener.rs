//! Owned message-stream subscriptions.

use std::future::Future;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Handle to a spawned listener task.
///
/// The task receives a [`CancellationToken`] and must return once it is
/// cancelled. [`Listener::detach`] cancels at most once; dropping the handle
/// detaches.
pub struct Listener {
    name: &'static str,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Listener {
    /// Spawn `run` as a listener task.
    pub fn attach<F, Fut>(name: &'static str, run: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(cancel.clone()));
        trace!(listener = name, "attached");
        Self {
            name,
            cancel,
            task: Some(task),
        }
    }

    /// A handle with nothing attached.
    pub fn detached(name: &'static str) -> Self {
        Self {
            name,
            cancel: CancellationToken::new(),
            task: None,
        }
    }

    /// Whether a task is attached and has not finished.
    pub fn is_attached(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Cancel the task. Returns `false` if nothing was attached.
    pub fn detach(&mut self) -> bool {
        let Some(task) = self.task.take() else {
            return false;
        };
        self.cancel.cancel();
        drop(task);
        trace!(listener = self.name, "detached");
        true
    }

    /// Cancel the task and wait for it to return.
    pub async fn join(mut self) {
        if let Some(task) = self.task.take() {
            self.cancel.cancel();
            let _ = task.await;
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        let _ = self.detach();
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("name", &self.name)
            .field("attached", &self.is_attached())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn detach_cancels_once() {
        let stopped = Arc::new(AtomicBool::new(false));
        let flag = stopped.clone();
        let mut listener = Listener::attach("test", move |cancel| async move {
            cancel.cancelled().await;
            flag.store(true, Ordering::SeqCst);
        });
        assert!(listener.is_attached());

        assert!(listener.detach());
        assert!(!listener.detach());
        assert!(!listener.is_attached());

        // Give the task a chance to observe cancellation.
        for _ in 0..10 {
            if stopped.load(Ordering::SeqCst) {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn join_waits_for_task() {
        let stopped = Arc::new(AtomicBool::new(false));
        let flag = stopped.clone();
        let listener = Listener::attach("test", move |cancel| async move {
            cancel.cancelled().await;
            flag.store(true, Ordering::SeqCst);
        });

        listener.join().await;
        assert!(stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn drop_detaches() {
        let token = Arc::new(parking_lot::Mutex::new(None));
        let slot = token.clone();
        let listener = Listener::attach("test", move |cancel| {
            *slot.lock() = Some(cancel.clone());
            async move { cancel.cancelled().await }
        });
        drop(listener);
        let cancel = token.lock().clone().unwrap();
        assert!(cancel.is_cancelled());
    }

    #[test]
    fn detached_handle_has_nothing_to_cancel() {
        let mut listener = Listener::detached("idle");
        assert!(!listener.is_attached());
        assert!(!listener.detach());
    }
}

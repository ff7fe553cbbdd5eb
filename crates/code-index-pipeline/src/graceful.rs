//! Process shutdown signal and termination hooks.
//!
//! `shutdown` asks long-running loops to stop through a
//! [`CancellationToken`]. `terminate` additionally runs the registered
//! hooks, once, in registration order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

type Hook = Box<dyn FnOnce() + Send>;

struct Inner {
    shutdown: CancellationToken,
    hooks: Mutex<Vec<Hook>>,
    terminated: AtomicBool,
}

/// Shared shutdown coordinator. Clones refer to the same state.
#[derive(Clone)]
pub struct GracefulManager {
    inner: Arc<Inner>,
}

impl Default for GracefulManager {
    fn default() -> Self {
        Self::new()
    }
}

impl GracefulManager {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                shutdown: CancellationToken::new(),
                hooks: Mutex::new(Vec::new()),
                terminated: AtomicBool::new(false),
            }),
        }
    }

    /// Token cancelled when shutdown begins.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Register a hook to run at termination.
    ///
    /// A hook registered after termination runs immediately.
    pub fn run_at_terminate<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut hooks = self.inner.hooks.lock().unwrap_or_else(|e| e.into_inner());
        if self.inner.terminated.load(Ordering::SeqCst) {
            drop(hooks);
            hook();
            return;
        }
        hooks.push(Box::new(hook));
        debug!(hooks = hooks.len(), "Registered termination hook");
    }

    /// Number of hooks waiting for termination.
    pub fn hook_count(&self) -> usize {
        self.inner.hooks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Signal shutdown to every holder of the token.
    pub fn shutdown(&self) {
        if !self.inner.shutdown.is_cancelled() {
            info!("Shutdown requested");
            self.inner.shutdown.cancel();
        }
    }

    /// Signal shutdown and run the termination hooks.
    ///
    /// Hooks may block; call from a blocking context.
    pub fn terminate(&self) {
        self.shutdown();

        let hooks = {
            let mut hooks = self.inner.hooks.lock().unwrap_or_else(|e| e.into_inner());
            if self.inner.terminated.swap(true, Ordering::SeqCst) {
                return;
            }
            std::mem::take(&mut *hooks)
        };

        info!(hooks = hooks.len(), "Running termination hooks");
        for hook in hooks {
            hook();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_shutdown_cancels_token() {
        let graceful = GracefulManager::new();
        let token = graceful.shutdown_token();
        assert!(!token.is_cancelled());

        graceful.shutdown();
        assert!(token.is_cancelled());
        assert!(graceful.is_shutting_down());
    }

    #[test]
    fn test_terminate_runs_hooks_once_in_order() {
        let graceful = GracefulManager::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = order.clone();
            graceful.run_at_terminate(move || order.lock().unwrap().push(i));
        }

        graceful.terminate();
        graceful.clone().terminate();

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
        assert!(graceful.shutdown_token().is_cancelled());
    }

    #[test]
    fn test_hook_after_terminate_runs_immediately() {
        let graceful = GracefulManager::new();
        graceful.terminate();

        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        graceful.run_at_terminate(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_shutdown_does_not_run_hooks() {
        let graceful = GracefulManager::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        graceful.run_at_terminate(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        graceful.shutdown();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}

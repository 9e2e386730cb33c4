//! Process-wide shutdown signal
//!
//! Shutdown is cooperative first: every loop polls [`Shutdown::is_requested`]
//! and exits on its own. A watchdog thread forcibly ends the process if the
//! loops have not confirmed completion within the grace period.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

struct Inner {
    requested: Mutex<bool>,
    condvar: Condvar,
    completed: AtomicBool,
}

/// Cloneable shutdown token
#[derive(Clone)]
pub struct Shutdown {
    inner: Arc<Inner>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                requested: Mutex::new(false),
                condvar: Condvar::new(),
                completed: AtomicBool::new(false),
            }),
        }
    }

    /// Ask every loop to stop; repeated requests are ignored
    pub fn request(&self) {
        let mut requested = self.inner.requested.lock();
        if !*requested {
            tracing::info!("Shutdown was requested");
            *requested = true;
            self.inner.condvar.notify_all();
        }
    }

    pub fn is_requested(&self) -> bool {
        *self.inner.requested.lock()
    }

    /// Block until shutdown is requested
    pub fn wait(&self) {
        let mut requested = self.inner.requested.lock();
        while !*requested {
            self.inner.condvar.wait(&mut requested);
        }
    }

    /// Block until shutdown is requested or `timeout` elapses
    ///
    /// Returns `true` if shutdown was requested.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut requested = self.inner.requested.lock();
        while !*requested {
            if self.inner.condvar.wait_until(&mut requested, deadline).timed_out() {
                break;
            }
        }
        *requested
    }

    /// Confirm that a clean shutdown finished; disarms the watchdog
    pub fn complete(&self) {
        self.inner.completed.store(true, Ordering::SeqCst);
    }

    pub fn is_complete(&self) -> bool {
        self.inner.completed.load(Ordering::SeqCst)
    }

    /// Start the forced-exit backstop
    pub fn spawn_watchdog(&self, grace: Duration) -> std::io::Result<thread::JoinHandle<()>> {
        self.spawn_watchdog_with(grace, || {
            tracing::error!("Things couldn't get cleaned up, exiting gracelessly");
            std::process::exit(1);
        })
    }

    /// Start a watchdog that calls `kill` if shutdown stalls
    pub fn spawn_watchdog_with<F>(
        &self,
        grace: Duration,
        kill: F,
    ) -> std::io::Result<thread::JoinHandle<()>>
    where
        F: FnOnce() + Send + 'static,
    {
        let shutdown = self.clone();
        thread::Builder::new()
            .name("shutdown-watchdog".into())
            .spawn(move || {
                shutdown.wait();

                let deadline = Instant::now() + grace;
                while Instant::now() < deadline {
                    if shutdown.is_complete() {
                        return;
                    }
                    thread::sleep(Duration::from_millis(20));
                }

                if !shutdown.is_complete() {
                    kill();
                }
            })
    }
}

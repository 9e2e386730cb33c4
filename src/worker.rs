//! Delayed task runner
//!
//! A single background thread that runs submitted tasks one at a time, each
//! after its own delay. [`Worker::trigger`] cuts the current delay short so a
//! periodic task can be made to run immediately.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex};

/// A unit of work; errors are logged by the worker
pub type Task = Box<dyn FnOnce() -> anyhow::Result<()> + Send>;

/// How often an idle worker checks whether it has been stopped
const IDLE_POLL: Duration = Duration::from_secs(1);

struct Wake {
    pending: Mutex<bool>,
    condvar: Condvar,
}

impl Wake {
    /// Sleep for `delay` unless woken; consumes any pending wake
    fn wait(&self, delay: Duration) {
        let deadline = Instant::now() + delay;
        let mut pending = self.pending.lock();
        while !*pending {
            if self.condvar.wait_until(&mut pending, deadline).timed_out() {
                break;
            }
        }
        *pending = false;
    }

    fn clear(&self) {
        *self.pending.lock() = false;
    }

    fn set(&self) {
        *self.pending.lock() = true;
        self.condvar.notify_all();
    }
}

/// Cloneable handle for submitting work to a [`Worker`]
#[derive(Clone)]
pub struct WorkerHandle {
    tx: Sender<(Duration, Task)>,
    wake: Arc<Wake>,
}

impl WorkerHandle {
    /// Queue `task` to run after `delay`
    pub fn submit<F>(&self, delay: Duration, task: F)
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        // The receiver only disappears once the worker is gone
        let _ = self.tx.send((delay, Box::new(task)));
    }

    /// End the current wait early
    pub fn trigger(&self) {
        self.wake.set();
    }
}

/// Serial delayed-task runner
pub struct Worker {
    name: String,
    handle: WorkerHandle,
    rx: Receiver<(Duration, Task)>,
    active: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl Worker {
    pub fn new(name: impl Into<String>) -> Self {
        let (tx, rx) = unbounded();
        Self {
            name: name.into(),
            handle: WorkerHandle {
                tx,
                wake: Arc::new(Wake {
                    pending: Mutex::new(false),
                    condvar: Condvar::new(),
                }),
            },
            rx,
            active: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
        }
    }

    /// Start the worker thread
    pub fn start(&mut self) -> std::io::Result<()> {
        if self.active.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let name = self.name.clone();
        let rx = self.rx.clone();
        let wake = self.handle.wake.clone();
        let active = self.active.clone();

        let handle = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || {
                while active.load(Ordering::SeqCst) {
                    let (delay, task) = match rx.recv_timeout(IDLE_POLL) {
                        Ok(item) => item,
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => break,
                    };

                    if delay.is_zero() {
                        wake.clear();
                    } else {
                        wake.wait(delay);
                    }

                    if !active.load(Ordering::SeqCst) {
                        break;
                    }

                    if let Err(e) = task() {
                        tracing::error!("Worker {} got an error: {:#}", name, e);
                    }
                }
                tracing::debug!("Worker {} stopped", name);
            })?;

        self.thread_handle = Some(handle);
        Ok(())
    }

    /// Stop the worker and wait for the running task to finish
    pub fn stop(&mut self) {
        self.active.store(false, Ordering::SeqCst);
        self.handle.trigger();
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
        // Queued tasks may hold references back to their owner
        while self.rx.try_recv().is_ok() {}
    }

    pub fn submit<F>(&self, delay: Duration, task: F)
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        self.handle.submit(delay, task);
    }

    pub fn trigger(&self) {
        self.handle.trigger();
    }

    pub fn handle(&self) -> WorkerHandle {
        self.handle.clone()
    }

    pub fn is_running(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop();
    }
}

//! The lifecycle executor.
//!
//! Component callbacks (`on_create`, `on_destroy`, broadcast delivery) run
//! on one dedicated thread so creation order is serialized process-wide. A
//! callback that needs another lifecycle operation runs it inline instead of
//! re-posting, which would deadlock the executor against itself.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Mutex;
use std::sync::mpsc::{Sender, channel};
use std::thread::{self, JoinHandle, ThreadId};

use graft_core::CoreError;
use tracing::error;

use crate::error::{HostError, HostResult};

type Job = Box<dyn FnOnce() + Send>;

/// Runs lifecycle callbacks on a single named thread.
///
/// Panicking callbacks are caught and logged; the executor keeps serving
/// later jobs.
pub struct LifecycleExecutor {
    sender: Mutex<Option<Sender<Job>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    thread_id: ThreadId,
}

impl LifecycleExecutor {
    /// Spawns the executor thread.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Core`] when the OS refuses the thread.
    pub fn spawn() -> HostResult<Self> {
        let (sender, receiver) = channel::<Job>();
        let handle = thread::Builder::new()
            .name("graft-lifecycle".to_string())
            .spawn(move || {
                while let Ok(job) = receiver.recv() {
                    if catch_unwind(AssertUnwindSafe(job)).is_err() {
                        error!("Lifecycle callback panicked");
                    }
                }
            })
            .map_err(CoreError::from)?;
        let thread_id = handle.thread().id();
        Ok(Self {
            sender: Mutex::new(Some(sender)),
            handle: Mutex::new(Some(handle)),
            thread_id,
        })
    }

    /// Runs `job` on the lifecycle thread and waits for its result. Calls
    /// made from the lifecycle thread itself execute inline.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::LifecycleGone`] when the executor has shut down
    /// or the callback panicked.
    pub fn run_sync<T, F>(&self, job: F) -> HostResult<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        if thread::current().id() == self.thread_id {
            return Ok(job());
        }
        let (done, result) = channel();
        let wrapped: Job = Box::new(move || {
            // A panic inside `job` drops `done` unsent; the caller sees the
            // hangup rather than this thread's unwind.
            let _ = done.send(job());
        });
        {
            let sender = self
                .sender
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            let Some(sender) = sender.as_ref() else {
                return Err(HostError::LifecycleGone);
            };
            sender.send(wrapped).map_err(|_| HostError::LifecycleGone)?;
        }
        result.recv().map_err(|_| HostError::LifecycleGone)
    }

    /// Whether the current thread is the lifecycle thread.
    #[must_use]
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Stops accepting jobs, drains the queue and joins the thread.
    pub fn shutdown(&self) {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        drop(sender);
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if thread::current().id() == self.thread_id {
                // A callback tearing down its own executor cannot join
                // itself; the thread exits once the queue drains.
                return;
            }
            let _ = handle.join();
        }
    }
}

impl Drop for LifecycleExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for LifecycleExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let alive = self
            .sender
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .is_some();
        f.debug_struct("LifecycleExecutor")
            .field("alive", &alive)
            .finish()
    }
}

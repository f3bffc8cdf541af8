//! Supervised background tasks with deterministic teardown.

use std::future::Future;

use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Cooperative shutdown flag handed to a supervised task.
#[derive(Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown is requested or the handle is gone.
    pub async fn cancelled(&mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Owns one spawned task. Stopping is idempotent and also happens on drop.
pub struct TaskHandle {
    name: String,
    shutdown: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl TaskHandle {
    /// Spawns `task` on the current runtime.
    pub fn spawn<F, Fut>(name: &str, task: F) -> Self
    where
        F: FnOnce(ShutdownSignal) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (shutdown, rx) = watch::channel(false);
        let handle = tokio::spawn(task(ShutdownSignal { rx }));
        log::debug!("Started task {}", name);
        Self {
            name: name.to_string(),
            shutdown,
            handle: Some(handle),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True until the task finishes or is stopped.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signals shutdown and aborts the task. Safe to call repeatedly.
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.shutdown.send(true);
            handle.abort();
            log::debug!("Stopped task {}", self.name);
        }
    }

    /// Signals shutdown and waits for the task to exit on its own.
    pub async fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.shutdown.send(true);
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    log::warn!("Task {} ended abnormally: {}", self.name, e);
                }
            }
        }
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

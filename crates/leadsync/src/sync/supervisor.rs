//! Starts and stops background reconciliation from the active-job count.
//!
//! Polling and timeout sweeps run only while the owner has at least one
//! non-terminal job in the cache, and each runs at most once.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::sync::broadcast;

use crate::cache::{CacheStore, QueryKey};
use crate::sync::poller::PollScheduler;
use crate::sync::reconciler::TimeoutReconciler;
use crate::sync::task::TaskHandle;

#[derive(Default)]
struct Tasks {
    poll: Option<TaskHandle>,
    sweep: Option<TaskHandle>,
    watcher: Option<TaskHandle>,
}

/// Supervises the poll and timeout loops for one owner.
pub struct ReconciliationSupervisor {
    cache: Arc<CacheStore>,
    poller: Arc<PollScheduler>,
    reconciler: Arc<TimeoutReconciler>,
    owner_id: String,
    tasks: Mutex<Tasks>,
}

fn running(task: &Option<TaskHandle>) -> bool {
    task.as_ref().is_some_and(TaskHandle::is_running)
}

impl ReconciliationSupervisor {
    pub fn new(
        cache: Arc<CacheStore>,
        poller: Arc<PollScheduler>,
        reconciler: Arc<TimeoutReconciler>,
        owner_id: &str,
    ) -> Arc<Self> {
        Arc::new(Self {
            cache,
            poller,
            reconciler,
            owner_id: owner_id.to_string(),
            tasks: Mutex::new(Tasks::default()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Tasks> {
        match self.tasks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Supervisor lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Brings the loops in line with the current active-job count.
    pub fn refresh(&self) {
        let active = self.cache.active_job_count(&self.owner_id);
        let mut tasks = self.lock();

        if active > 0 {
            if !running(&tasks.poll) {
                log::debug!("{} active jobs for {}, starting poll", active, self.owner_id);
                tasks.poll = Some(self.poller.spawn());
            }
            if !running(&tasks.sweep) {
                tasks.sweep = Some(self.reconciler.spawn());
            }
        } else if tasks.poll.is_some() || tasks.sweep.is_some() {
            log::debug!("No active jobs for {}, stopping reconciliation", self.owner_id);
            if let Some(mut poll) = tasks.poll.take() {
                poll.stop();
            }
            if let Some(mut sweep) = tasks.sweep.take() {
                sweep.stop();
            }
        }
    }

    /// Evaluates the count now and re-evaluates on every job-list change.
    pub fn start(self: &Arc<Self>) {
        self.refresh();

        let mut events = self.cache.jobs().subscribe();
        let supervisor: Weak<Self> = Arc::downgrade(self);
        let key = QueryKey::jobs(&self.owner_id);
        let watcher = TaskHandle::spawn(
            &format!("supervisor[{}]", self.owner_id),
            move |mut shutdown| async move {
                loop {
                    let relevant = tokio::select! {
                        _ = shutdown.cancelled() => break,
                        event = events.recv() => match event {
                            Ok(event) => event.key == key,
                            Err(broadcast::error::RecvError::Lagged(_)) => true,
                            Err(broadcast::error::RecvError::Closed) => break,
                        },
                    };
                    if !relevant {
                        continue;
                    }
                    match supervisor.upgrade() {
                        Some(supervisor) => supervisor.refresh(),
                        None => break,
                    }
                }
            },
        );

        let mut tasks = self.lock();
        if let Some(mut previous) = tasks.watcher.replace(watcher) {
            previous.stop();
        }
    }

    /// Stops every loop. Idempotent.
    pub fn shutdown(&self) {
        let mut guard = self.lock();
        let tasks = &mut *guard;
        for task in [&mut tasks.poll, &mut tasks.sweep, &mut tasks.watcher] {
            if let Some(mut handle) = task.take() {
                handle.stop();
            }
        }
        log::debug!("Reconciliation stopped for {}", self.owner_id);
    }

    pub fn is_polling(&self) -> bool {
        running(&self.lock().poll)
    }

    pub fn is_sweeping(&self) -> bool {
        running(&self.lock().sweep)
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }
}

impl Drop for ReconciliationSupervisor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

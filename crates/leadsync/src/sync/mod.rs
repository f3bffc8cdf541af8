//! Cache reconciliation: optimistic writes, change notifications, polling
//! and timeout sweeps.

pub mod corrections;
pub mod invalidation;
pub mod listener;
pub mod optimistic;
pub mod poller;
pub mod queries;
pub mod reconciler;
pub mod supervisor;
pub mod task;

pub use corrections::PendingCorrections;
pub use invalidation::{lead_settle_scopes, settle, settle_completed_job};
pub use listener::{apply_change, ChangeListener, ChangeOutcome};
pub use optimistic::{OptimisticMutation, Snapshot};
pub use poller::{PollOutcome, PollScheduler};
pub use queries::Queries;
pub use reconciler::{SweepReport, TimeoutReconciler};
pub use supervisor::ReconciliationSupervisor;
pub use task::{ShutdownSignal, TaskHandle};

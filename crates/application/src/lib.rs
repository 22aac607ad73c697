//! Application services and ports.

#![forbid(unsafe_code)]

mod external_binding_ports;
mod grant_ports;
mod grant_service;
mod job_runner;
mod lifecycle_jobs;
mod lifecycle_scheduler;
mod notification_dispatcher;
mod notification_ports;
mod reconciliation_service;
mod scheduler_ports;

#[cfg(test)]
mod test_support;

pub use external_binding_ports::{ExternalApiError, ExternalBindingClient, ExternalErrorClass};
pub use grant_ports::{
    ExtendGrantInput, GrantAuditEvent, GrantRepository, GrantTransition, ReviewFlagInput,
    expiry_warning_window_end, matches_candidate,
};
pub use grant_service::{DEFAULT_MAX_EXTENSIONS, GrantService};
pub use job_runner::JobRunner;
pub use lifecycle_jobs::{
    DowngradeJob, ExpiryCleanupJob, ExpiryWarningJob, ItemOutcome, JobCadences,
    LifecycleDependencies, LifecycleJob, ReconciliationJob, build_lifecycle_jobs,
};
pub use lifecycle_scheduler::{
    LifecycleScheduler, LifecycleSchedulerConfig, SchedulerDependencies, SchedulerStatus,
};
pub use notification_dispatcher::{DispatchOutcome, NotificationDispatcher, grant_context};
pub use notification_ports::{
    MessageTransport, NotificationEvent, NotificationLogEntry, NotificationLogRepository,
    NotificationPayload,
};
pub use reconciliation_service::{ReconciliationOutcome, ReconciliationService};
pub use scheduler_ports::{
    Clock, JobLease, JobLeaseCoordinator, JobRunReport, JobRunRepository, SystemClock,
};

mod clock;
mod job_runs;
mod lease;

pub use clock::{Clock, SystemClock};
pub use job_runs::{JobRunReport, JobRunRepository};
pub use lease::{JobLease, JobLeaseCoordinator};

use async_trait::async_trait;
use grantwarden_core::AppResult;

/// Lease held while one process runs a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobLease {
    /// Lease scope key.
    pub scope_key: String,
    /// Lease owner token.
    pub token: String,
    /// Holder identifier.
    pub holder_id: String,
}

/// Cross-process coordination so one job runs in at most one process at a time.
#[async_trait]
pub trait JobLeaseCoordinator: Send + Sync {
    /// Attempts to acquire one lease for the given scope.
    async fn try_acquire_lease(
        &self,
        scope_key: &str,
        holder_id: &str,
        lease_seconds: u32,
    ) -> AppResult<Option<JobLease>>;

    /// Releases one lease using token compare-and-delete semantics.
    async fn release_lease(&self, lease: &JobLease) -> AppResult<()>;
}

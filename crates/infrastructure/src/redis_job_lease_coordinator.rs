//! Redis-backed lease so each lifecycle job runs in one process at a time.

use async_trait::async_trait;
use grantwarden_application::{JobLease, JobLeaseCoordinator};
use grantwarden_core::{AppError, AppResult};
use redis::Script;
use redis::aio::MultiplexedConnection;

const RELEASE_LEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('DEL', KEYS[1])
else
  return 0
end
"#;

/// Redis implementation of job lease coordination.
///
/// The lease key is the scope key itself; acquisition is one atomic
/// `SET NX EX` so a crashed holder never leaves a key without a TTL.
#[derive(Clone)]
pub struct RedisJobLeaseCoordinator {
    client: redis::Client,
}

impl RedisJobLeaseCoordinator {
    /// Creates one coordinator adapter.
    #[must_use]
    pub fn new(client: redis::Client) -> Self {
        Self { client }
    }

    async fn connection(&self) -> AppResult<MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|error| AppError::Internal(format!("failed to connect to redis: {error}")))
    }
}

fn validate_lease_request(scope_key: &str, holder_id: &str, lease_seconds: u32) -> AppResult<()> {
    if scope_key.trim().is_empty() {
        return Err(AppError::Validation(
            "job lease scope_key must not be empty".to_owned(),
        ));
    }

    if holder_id.trim().is_empty() {
        return Err(AppError::Validation(
            "job lease holder_id must not be empty".to_owned(),
        ));
    }

    if lease_seconds == 0 {
        return Err(AppError::Validation(
            "job lease_seconds must be greater than zero".to_owned(),
        ));
    }

    Ok(())
}

#[async_trait]
impl JobLeaseCoordinator for RedisJobLeaseCoordinator {
    async fn try_acquire_lease(
        &self,
        scope_key: &str,
        holder_id: &str,
        lease_seconds: u32,
    ) -> AppResult<Option<JobLease>> {
        validate_lease_request(scope_key, holder_id, lease_seconds)?;

        let token = format!("{holder_id}:{}", uuid::Uuid::new_v4());
        let mut connection = self.connection().await?;

        let acquired: Option<String> = redis::cmd("SET")
            .arg(scope_key)
            .arg(token.as_str())
            .arg("NX")
            .arg("EX")
            .arg(u64::from(lease_seconds))
            .query_async(&mut connection)
            .await
            .map_err(|error| AppError::Internal(format!("failed to acquire job lease: {error}")))?;

        if acquired.is_none() {
            return Ok(None);
        }

        Ok(Some(JobLease {
            scope_key: scope_key.to_owned(),
            token,
            holder_id: holder_id.to_owned(),
        }))
    }

    async fn release_lease(&self, lease: &JobLease) -> AppResult<()> {
        let mut connection = self.connection().await?;

        Script::new(RELEASE_LEASE_SCRIPT)
            .key(lease.scope_key.as_str())
            .arg(lease.token.as_str())
            .invoke_async::<i32>(&mut connection)
            .await
            .map_err(|error| AppError::Internal(format!("failed to release job lease: {error}")))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use grantwarden_application::JobLeaseCoordinator;

    use super::{RedisJobLeaseCoordinator, validate_lease_request};

    #[test]
    fn empty_scope_holder_or_ttl_is_rejected() {
        assert!(validate_lease_request(" ", "worker-a", 60).is_err());
        assert!(validate_lease_request("grantwarden:lifecycle:downgrade", "", 60).is_err());
        assert!(validate_lease_request("grantwarden:lifecycle:downgrade", "worker-a", 0).is_err());
        assert!(validate_lease_request("grantwarden:lifecycle:downgrade", "worker-a", 60).is_ok());
    }

    #[tokio::test]
    async fn second_holder_waits_until_release() {
        let Ok(redis_url) = std::env::var("REDIS_URL") else {
            return;
        };

        let client = redis::Client::open(redis_url)
            .unwrap_or_else(|error| panic!("redis url should parse: {error}"));
        let coordinator = RedisJobLeaseCoordinator::new(client);
        let scope_key = format!("grantwarden:test:{}", uuid::Uuid::new_v4());

        let first = coordinator
            .try_acquire_lease(scope_key.as_str(), "worker-a", 30)
            .await
            .unwrap_or_else(|error| panic!("acquire should succeed: {error}"));
        let Some(first) = first else {
            panic!("first holder should acquire the lease");
        };

        let second = coordinator
            .try_acquire_lease(scope_key.as_str(), "worker-b", 30)
            .await
            .unwrap_or_else(|error| panic!("acquire should succeed: {error}"));
        assert!(second.is_none());

        assert!(coordinator.release_lease(&first).await.is_ok());

        let third = coordinator
            .try_acquire_lease(scope_key.as_str(), "worker-b", 30)
            .await
            .unwrap_or_else(|error| panic!("acquire should succeed: {error}"));
        assert!(third.is_some_and(|lease| lease.holder_id == "worker-b"));
    }
}

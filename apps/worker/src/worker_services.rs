use std::sync::Arc;
use std::time::Duration;

use grantwarden_application::{
    ExternalBindingClient, GrantService, JobLeaseCoordinator, LifecycleDependencies,
    LifecycleScheduler, LifecycleSchedulerConfig, MessageTransport, NotificationDispatcher,
    SchedulerDependencies, SystemClock, build_lifecycle_jobs,
};
use grantwarden_core::{AppError, AppResult};
use grantwarden_infrastructure::{
    ConsoleMessageTransport, HttpExternalBindingClient, InMemoryExternalBindingClient,
    PostgresGrantRepository, PostgresJobRunRepository, PostgresNotificationLogRepository,
    RedisJobLeaseCoordinator, SmtpMessageTransport, SmtpTransportConfig,
};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};

use crate::worker_config::{EmailProviderConfig, ExternalBindingProviderConfig, WorkerConfig};

/// Services wired for one worker process.
pub struct WorkerRuntime {
    pub grant_service: GrantService,
    pub dispatcher: NotificationDispatcher,
    pub scheduler: LifecycleScheduler,
}

pub async fn connect_and_migrate(config: &WorkerConfig) -> AppResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(config.database_url.as_str())
        .await
        .map_err(|error| AppError::Internal(format!("failed to connect to database: {error}")))?;

    sqlx::migrate!("../../crates/infrastructure/migrations")
        .run(&pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to run migrations: {error}")))?;

    Ok(pool)
}

pub fn build_runtime(config: &WorkerConfig, pool: PgPool) -> AppResult<WorkerRuntime> {
    let grants = Arc::new(PostgresGrantRepository::new(pool.clone()));
    let notification_log = Arc::new(PostgresNotificationLogRepository::new(pool.clone()));
    let job_runs = Arc::new(PostgresJobRunRepository::new(pool));
    let clock = Arc::new(SystemClock);
    let role_policy = Arc::new(config.role_policy.clone());
    let external_bindings = build_external_binding_client(config)?;
    let dispatcher = NotificationDispatcher::new(notification_log, build_transport(config)?);

    let grant_service = GrantService::new(
        grants.clone(),
        external_bindings.clone(),
        dispatcher.clone(),
        role_policy.clone(),
        clock.clone(),
    )
    .with_max_extensions(config.max_extensions);

    let jobs = build_lifecycle_jobs(
        LifecycleDependencies {
            grants: grants.clone(),
            external_bindings,
            dispatcher: dispatcher.clone(),
            role_policy,
            admin_alert_recipient: config.admin_alert_recipient.clone(),
        },
        config.cadences,
    );

    let scheduler = LifecycleScheduler::new(
        jobs,
        SchedulerDependencies {
            grants,
            job_runs,
            clock,
            lease_coordinator: build_lease_coordinator(config)?,
        },
        LifecycleSchedulerConfig {
            tick_interval: Duration::from_secs(config.tick_seconds),
            holder_id: config.worker_id.clone(),
            lease_seconds: config.lease_seconds,
        },
    );

    Ok(WorkerRuntime {
        grant_service,
        dispatcher,
        scheduler,
    })
}

fn build_external_binding_client(
    config: &WorkerConfig,
) -> AppResult<Arc<dyn ExternalBindingClient>> {
    let client: Arc<dyn ExternalBindingClient> = match &config.external_binding_provider {
        ExternalBindingProviderConfig::Memory => {
            warn!("EXTERNAL_BINDING_PROVIDER=memory; bindings are not persisted");
            Arc::new(InMemoryExternalBindingClient::new())
        }
        ExternalBindingProviderConfig::Http {
            base_url,
            api_token,
            timeout_seconds,
        } => {
            let http_client = reqwest::Client::builder()
                .timeout(Duration::from_secs(*timeout_seconds))
                .build()
                .map_err(|error| {
                    AppError::Internal(format!("failed to build HTTP client: {error}"))
                })?;
            info!(base_url = %base_url, "using HTTP external binding client");
            Arc::new(HttpExternalBindingClient::new(
                http_client,
                base_url.as_str(),
                api_token.as_str(),
            ))
        }
    };

    Ok(client)
}

fn build_transport(config: &WorkerConfig) -> AppResult<Arc<dyn MessageTransport>> {
    let transport: Arc<dyn MessageTransport> = match &config.email_provider {
        EmailProviderConfig::Console => Arc::new(ConsoleMessageTransport::new()),
        EmailProviderConfig::Smtp(smtp) => Arc::new(SmtpMessageTransport::new(SmtpTransportConfig {
            host: smtp.host.clone(),
            port: smtp.port,
            username: smtp.username.clone(),
            password: smtp.password.clone(),
            from_address: smtp.from_address.clone(),
        })?),
    };

    Ok(transport)
}

fn build_lease_coordinator(
    config: &WorkerConfig,
) -> AppResult<Option<Arc<dyn JobLeaseCoordinator>>> {
    let Some(redis_url) = config.redis_url.as_deref() else {
        return Ok(None);
    };

    let client = redis::Client::open(redis_url)
        .map_err(|error| AppError::Internal(format!("invalid REDIS_URL: {error}")))?;

    Ok(Some(Arc::new(RedisJobLeaseCoordinator::new(client))))
}

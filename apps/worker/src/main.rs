//! GrantWarden lifecycle worker runtime.

#![forbid(unsafe_code)]

mod worker_command;
mod worker_config;
mod worker_services;

use std::env;

use chrono::Utc;
use grantwarden_core::{Actor, AppError, AppResult};
use grantwarden_domain::{Grant, JobKind, Subject};
use tracing::{info, warn};

use crate::worker_command::WorkerCommand;
use crate::worker_config::{WorkerConfig, init_tracing};
use crate::worker_services::{WorkerRuntime, build_runtime, connect_and_migrate};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let command = WorkerCommand::parse(env::args().skip(1))?;
    let config = WorkerConfig::load()?;
    let pool = connect_and_migrate(&config).await?;

    if command == WorkerCommand::Migrate {
        info!("migrations applied");
        return Ok(());
    }

    let runtime = build_runtime(&config, pool)?;
    let operator = Actor::user(config.operator_subject.as_str());

    match command {
        WorkerCommand::Serve => serve(&runtime, &config).await,
        WorkerCommand::RunOnce(job_kind) => run_once(&runtime, job_kind).await,
        WorkerCommand::Migrate => Ok(()),
        WorkerCommand::Status => {
            let status = runtime.scheduler.status().await?;
            for job_kind in JobKind::all() {
                let next_run = status.next_run_per_job.get(job_kind);
                match status.last_run_per_job.get(job_kind) {
                    Some(started_at) => info!(
                        job = %job_kind,
                        last_run = %started_at,
                        next_run = ?next_run,
                        "job status"
                    ),
                    None => info!(
                        job = %job_kind,
                        next_run = ?next_run,
                        "job has not completed a run yet"
                    ),
                }
            }
            Ok(())
        }
        WorkerCommand::SendTest(subject) => {
            let outcome = runtime
                .dispatcher
                .send_test(Subject::new(subject)?, Utc::now())
                .await?;
            info!(outcome = ?outcome, "test notification dispatched");
            Ok(())
        }
        WorkerCommand::Request {
            subject,
            resource_id,
            role,
        } => {
            let grant = runtime
                .grant_service
                .request_grant(&operator, subject.as_str(), resource_id.as_str(), role)
                .await?;
            log_grant("grant requested", &grant);
            Ok(())
        }
        WorkerCommand::Approve(grant_id) => {
            let grant = runtime.grant_service.approve(&operator, grant_id).await?;
            log_grant("grant approved", &grant);
            Ok(())
        }
        WorkerCommand::Reject { grant_id, reason } => {
            let grant = runtime
                .grant_service
                .reject(&operator, grant_id, reason)
                .await?;
            log_grant("grant rejected", &grant);
            Ok(())
        }
        WorkerCommand::Extend {
            grant_id,
            new_expires_at,
        } => {
            let grant = runtime
                .grant_service
                .extend(&operator, grant_id, new_expires_at)
                .await?;
            log_grant("grant extended", &grant);
            Ok(())
        }
        WorkerCommand::ResolveReview { grant_id, note } => {
            let grant = runtime
                .grant_service
                .resolve_review(&operator, grant_id, note.as_str())
                .await?;
            log_grant("manual review resolved", &grant);
            Ok(())
        }
        WorkerCommand::Audit(grant_id) => {
            for event in runtime.grant_service.audit_trail(grant_id).await? {
                info!(
                    grant_id = %event.grant_id,
                    actor = %event.actor,
                    action = event.action.as_str(),
                    from_status = event.from_status.map(|status| status.as_str()),
                    to_status = event.to_status.map(|status| status.as_str()),
                    detail = event.detail.as_deref(),
                    occurred_at = %event.occurred_at,
                    "audit event"
                );
            }
            Ok(())
        }
    }
}

async fn serve(runtime: &WorkerRuntime, config: &WorkerConfig) -> AppResult<()> {
    runtime.scheduler.start().await?;
    info!(
        worker_id = %config.worker_id,
        tick_seconds = config.tick_seconds,
        lease = config.redis_url.is_some(),
        "grantwarden-worker started"
    );

    tokio::signal::ctrl_c()
        .await
        .map_err(|error| AppError::Internal(format!("failed to listen for shutdown: {error}")))?;

    info!("shutdown requested; draining in-flight item");
    runtime.scheduler.stop().await
}

async fn run_once(runtime: &WorkerRuntime, job_kind: Option<JobKind>) -> AppResult<()> {
    let reports = match job_kind {
        Some(job_kind) => vec![runtime.scheduler.run_job_now(job_kind).await?],
        None => runtime.scheduler.run_due_jobs().await,
    };

    if reports.is_empty() {
        info!("no lifecycle job was due");
    }

    for report in reports {
        if report.failed > 0 {
            warn!(
                job = %report.job_kind,
                failed = report.failed,
                "lifecycle job finished with failed items"
            );
        }
        info!(
            job = %report.job_kind,
            candidates = report.candidates,
            changed = report.changed,
            unchanged = report.unchanged,
            failed = report.failed,
            "lifecycle job run finished"
        );
    }

    Ok(())
}

fn log_grant(message: &str, grant: &Grant) {
    info!(
        grant_id = %grant.id(),
        subject = %grant.subject(),
        resource_id = %grant.resource_id(),
        role = grant.role().as_str(),
        status = grant.status().as_str(),
        expires_at = ?grant.expires_at(),
        "{message}"
    );
}

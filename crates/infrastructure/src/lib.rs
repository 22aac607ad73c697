//! Infrastructure adapters for application ports.

#![forbid(unsafe_code)]

mod console_message_transport;
mod http_external_binding_client;
mod in_memory_external_binding_client;
mod in_memory_grant_repository;
mod in_memory_job_run_repository;
mod in_memory_notification_log_repository;
mod message_rendering;
mod postgres_grant_repository;
mod postgres_job_run_repository;
mod postgres_notification_log_repository;
mod redis_job_lease_coordinator;
mod smtp_message_transport;


pub use console_message_transport::ConsoleMessageTransport;
pub use http_external_binding_client::HttpExternalBindingClient;
pub use in_memory_external_binding_client::InMemoryExternalBindingClient;
pub use in_memory_grant_repository::InMemoryGrantRepository;
pub use in_memory_job_run_repository::InMemoryJobRunRepository;
pub use in_memory_notification_log_repository::InMemoryNotificationLogRepository;
pub use postgres_grant_repository::PostgresGrantRepository;
pub use postgres_job_run_repository::PostgresJobRunRepository;
pub use postgres_notification_log_repository::PostgresNotificationLogRepository;
pub use redis_job_lease_coordinator::RedisJobLeaseCoordinator;
pub use smtp_message_transport::{SmtpMessageTransport, SmtpTransportConfig};

use std::env;
use std::fmt::Display;
use std::str::FromStr;

use grantwarden_application::{DEFAULT_MAX_EXTENSIONS, JobCadences};
use grantwarden_core::{AppError, AppResult};
use grantwarden_domain::{DailyCadence, Role, RolePolicy, RolePolicyEntry, Subject};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpRuntimeConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from_address: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmailProviderConfig {
    Console,
    Smtp(SmtpRuntimeConfig),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExternalBindingProviderConfig {
    Memory,
    Http {
        base_url: String,
        api_token: String,
        timeout_seconds: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    pub database_url: String,
    pub database_max_connections: u32,
    pub external_binding_provider: ExternalBindingProviderConfig,
    pub email_provider: EmailProviderConfig,
    pub redis_url: Option<String>,
    pub worker_id: String,
    pub lease_seconds: u32,
    pub tick_seconds: u64,
    pub cadences: JobCadences,
    pub max_extensions: u32,
    pub role_policy: RolePolicy,
    pub admin_alert_recipient: Option<Subject>,
    pub operator_subject: String,
}

impl WorkerConfig {
    pub fn load() -> AppResult<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> AppResult<Self> {
        let source = EnvSource { lookup: &lookup };

        let database_url = source.required("DATABASE_URL")?;
        let database_max_connections = source.parse_or("DATABASE_MAX_CONNECTIONS", 5_u32)?;
        if database_max_connections == 0 {
            return Err(AppError::Validation(
                "DATABASE_MAX_CONNECTIONS must be greater than zero".to_owned(),
            ));
        }

        let external_binding_provider = match source
            .optional("EXTERNAL_BINDING_PROVIDER")
            .unwrap_or_else(|| "memory".to_owned())
            .as_str()
        {
            "memory" => ExternalBindingProviderConfig::Memory,
            "http" => ExternalBindingProviderConfig::Http {
                base_url: source
                    .required_non_empty("EXTERNAL_BINDING_API_BASE_URL")?
                    .trim_end_matches('/')
                    .to_owned(),
                api_token: source.required_non_empty("EXTERNAL_BINDING_API_TOKEN")?,
                timeout_seconds: source.parse_or("EXTERNAL_BINDING_TIMEOUT_SECONDS", 15_u64)?,
            },
            other => {
                return Err(AppError::Validation(format!(
                    "EXTERNAL_BINDING_PROVIDER must be either 'memory' or 'http', got '{other}'"
                )));
            }
        };

        let email_provider = match source
            .optional("EMAIL_PROVIDER")
            .unwrap_or_else(|| "console".to_owned())
            .as_str()
        {
            "console" => EmailProviderConfig::Console,
            "smtp" => {
                let port = source
                    .required_non_empty("SMTP_PORT")?
                    .parse::<u16>()
                    .map_err(|error| AppError::Validation(format!("invalid SMTP_PORT: {error}")))?;
                EmailProviderConfig::Smtp(SmtpRuntimeConfig {
                    host: source.required_non_empty("SMTP_HOST")?,
                    port,
                    username: source.required_non_empty("SMTP_USERNAME")?,
                    password: source.required_non_empty("SMTP_PASSWORD")?,
                    from_address: source.required_non_empty("SMTP_FROM_ADDRESS")?,
                })
            }
            other => {
                return Err(AppError::Validation(format!(
                    "EMAIL_PROVIDER must be either 'console' or 'smtp', got '{other}'"
                )));
            }
        };

        let lease_seconds = source.parse_or("SCHEDULER_LEASE_SECONDS", 3600_u32)?;
        let tick_seconds = source.parse_or("SCHEDULER_TICK_SECONDS", 60_u64)?;
        if lease_seconds == 0 {
            return Err(AppError::Validation(
                "SCHEDULER_LEASE_SECONDS must be greater than zero".to_owned(),
            ));
        }
        if tick_seconds == 0 {
            return Err(AppError::Validation(
                "SCHEDULER_TICK_SECONDS must be greater than zero".to_owned(),
            ));
        }

        let defaults = JobCadences::default();
        let cadences = JobCadences {
            expiry_warning: source.cadence_or("JOB_EXPIRY_WARNING_AT", defaults.expiry_warning)?,
            downgrade: source.cadence_or("JOB_DOWNGRADE_AT", defaults.downgrade)?,
            expiry_cleanup: source.cadence_or("JOB_EXPIRY_CLEANUP_AT", defaults.expiry_cleanup)?,
            reconciliation: source.cadence_or("JOB_RECONCILIATION_AT", defaults.reconciliation)?,
        };

        let admin_alert_recipient = source
            .optional("ADMIN_ALERT_RECIPIENT")
            .map(Subject::new)
            .transpose()
            .map_err(|error| {
                AppError::Validation(format!("invalid ADMIN_ALERT_RECIPIENT: {error}"))
            })?;

        Ok(Self {
            database_url,
            database_max_connections,
            external_binding_provider,
            email_provider,
            redis_url: source.optional("REDIS_URL"),
            worker_id: source
                .optional("WORKER_ID")
                .unwrap_or_else(|| format!("worker-{}", std::process::id())),
            lease_seconds,
            tick_seconds,
            cadences,
            max_extensions: source.parse_or("GRANT_MAX_EXTENSIONS", DEFAULT_MAX_EXTENSIONS)?,
            role_policy: source.role_policy()?,
            admin_alert_recipient,
            operator_subject: source
                .optional("OPERATOR_SUBJECT")
                .unwrap_or_else(|| "operator".to_owned()),
        })
    }
}

struct EnvSource<'a, F: Fn(&str) -> Option<String>> {
    lookup: &'a F,
}

impl<F: Fn(&str) -> Option<String>> EnvSource<'_, F> {
    /// Trimmed value, with blank values treated as unset.
    fn optional(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty())
    }

    fn required(&self, name: &str) -> AppResult<String> {
        (self.lookup)(name).ok_or_else(|| AppError::Validation(format!("{name} is required")))
    }

    fn required_non_empty(&self, name: &str) -> AppResult<String> {
        let value = self.required(name)?;
        if value.trim().is_empty() {
            return Err(AppError::Validation(format!("{name} must not be empty")));
        }

        Ok(value)
    }

    fn parse_or<T>(&self, name: &str, default: T) -> AppResult<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.optional(name) {
            Some(value) => value.parse::<T>().map_err(|error| {
                AppError::Validation(format!("invalid {name} value '{value}': {error}"))
            }),
            None => Ok(default),
        }
    }

    fn cadence_or(&self, name: &str, default: DailyCadence) -> AppResult<DailyCadence> {
        match self.optional(name) {
            Some(value) => DailyCadence::parse(value.as_str())
                .map_err(|error| AppError::Validation(format!("invalid {name}: {error}"))),
            None => Ok(default),
        }
    }

    fn role_policy(&self) -> AppResult<RolePolicy> {
        let defaults = RolePolicy::default();
        let mut entries = Vec::with_capacity(Role::all().len());

        for role in Role::all() {
            let prefix = format!("ROLE_{}", role.as_str().to_ascii_uppercase());
            let default_days = u32::try_from(defaults.validity_period(*role).num_days())
                .map_err(|error| {
                    AppError::Internal(format!("default validity out of range: {error}"))
                })?;

            entries.push((
                *role,
                RolePolicyEntry {
                    validity_days: self
                        .parse_or(format!("{prefix}_VALIDITY_DAYS").as_str(), default_days)?,
                    external_role_id: self
                        .optional(format!("{prefix}_EXTERNAL_ID").as_str())
                        .unwrap_or_else(|| defaults.external_role_id(*role).to_owned()),
                },
            ));
        }

        RolePolicy::new(entries)
    }
}

pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

use std::num::{NonZeroU32, NonZeroUsize};
use std::time::Duration;

use thiserror::Error;

use crate::db::types::ConversionJobKind;
use crate::tasks::polling::PollPolicy;

const LEASE_SLACK: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub(crate) struct Settings {
    pub(super) server: ServerSettings,
    pub(super) runtime: RuntimeSettings,
    pub(super) api: ApiSettings,
    pub(super) cors: CorsSettings,
    pub(super) database: DatabaseSettings,
    pub(super) redis: RedisSettings,
    pub(super) datalab: DatalabSettings,
    pub(super) speech: SpeechSettings,
    pub(super) polling: PollingSettings,
    pub(super) s3: S3Settings,
    pub(super) telemetry: TelemetrySettings,
}

#[derive(Debug, Clone)]
pub(crate) struct ServerSettings {
    pub(super) host: ServerHost,
    pub(super) port: ServerPort,
}

#[derive(Debug, Clone)]
pub(crate) struct ApiSettings {
    pub(crate) project_name: String,
    pub(crate) version: String,
    pub(crate) api_v1_str: String,
}

#[derive(Debug, Clone)]
pub(crate) struct CorsSettings {
    pub(crate) origins: Vec<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct DatabaseSettings {
    pub(crate) postgres_server: String,
    pub(crate) postgres_port: u16,
    pub(crate) postgres_user: String,
    pub(crate) postgres_password: String,
    pub(crate) postgres_db: String,
    pub(crate) database_url: Option<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct RedisSettings {
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) db: u16,
    pub(crate) password: String,
}

#[derive(Debug, Clone)]
pub(crate) struct DatalabSettings {
    pub(crate) api_key: String,
    pub(crate) base_url: String,
    pub(crate) mode: String,
    pub(crate) output_format: String,
    pub(crate) timeout_seconds: u64,
    pub(crate) max_submit_retries: u32,
}

#[derive(Debug, Clone)]
pub(crate) struct SpeechSettings {
    pub(crate) api_key: String,
    pub(crate) base_url: String,
    pub(crate) timeout_seconds: u64,
    pub(crate) language_code: Option<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct PollingSettings {
    pub(crate) workers: NonZeroUsize,
    pub(crate) shutdown_grace: Duration,
    pub(crate) document: PollPolicy,
    pub(crate) transcript: PollPolicy,
    pub(crate) detailed_transcript: PollPolicy,
    pub(crate) stale_task_after: Duration,
}

#[derive(Debug, Clone)]
pub(crate) struct S3Settings {
    pub(crate) endpoint: String,
    pub(crate) access_key: String,
    pub(crate) secret_key: String,
    pub(crate) bucket: String,
    pub(crate) region: String,
    pub(crate) public_base_url: Option<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct TelemetrySettings {
    pub(crate) log_level: String,
    pub(crate) json: bool,
    pub(crate) prometheus_enabled: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct RuntimeSettings {
    pub(crate) environment: Environment,
    pub(crate) strict_config: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Environment {
    Development,
    Production,
    Staging,
    Test,
}

impl Environment {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
            Environment::Staging => "staging",
            Environment::Test => "test",
        }
    }

    pub(super) fn is_production(self) -> bool {
        matches!(self, Environment::Production)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ServerHost(pub(super) String);

#[derive(Debug, Clone, Copy)]
pub(crate) struct ServerPort(pub(super) u16);

#[derive(Debug, Error)]
pub(crate) enum ConfigError {
    #[error("invalid server host: {0}")]
    InvalidHost(String),
    #[error("invalid server port: {0}")]
    InvalidPort(String),
    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
    #[error("invalid cors origins: {0}")]
    InvalidCors(String),
    #[error("missing required secret for {0}")]
    MissingSecret(&'static str),
}

impl PollingSettings {
    /// Static polling cadence for a job kind.
    pub(crate) fn policy_for(&self, kind: ConversionJobKind) -> PollPolicy {
        match kind {
            ConversionJobKind::PdfToQuestions => self.document,
            ConversionJobKind::AudioToQuestions => self.transcript,
            ConversionJobKind::AudioTimedTranscript => self.detailed_transcript,
        }
    }

    /// Longest lease any job kind can hold.
    pub(crate) fn longest_lease(&self) -> Duration {
        [self.document, self.transcript, self.detailed_transcript]
            .into_iter()
            .map(lease_ttl)
            .max()
            .unwrap_or(LEASE_SLACK)
    }
}

/// Long enough to cover a poll that runs every attempt.
pub(crate) fn lease_ttl(policy: PollPolicy) -> Duration {
    policy.delay().saturating_mul(policy.max_attempts()).saturating_add(LEASE_SLACK)
}

pub(super) fn poll_policy(max_attempts: NonZeroU32, delay_ms: u64) -> PollPolicy {
    PollPolicy::new(max_attempts, Duration::from_millis(delay_ms))
}

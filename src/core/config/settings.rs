use std::time::Duration;

use super::parsing::{
    env_optional, env_or_default, parse_attempts, parse_bool, parse_cors_origins,
    parse_environment, parse_u16, parse_u32, parse_u64, parse_workers,
};
use super::types::{
    poll_policy, ApiSettings, ConfigError, CorsSettings, DatabaseSettings, DatalabSettings,
    PollingSettings, RedisSettings, RuntimeSettings, S3Settings, ServerHost, ServerPort,
    ServerSettings, Settings, SpeechSettings, TelemetrySettings,
};

const DATALAB_MODES: &[&str] = &["fast", "balanced", "accurate"];
const DATALAB_OUTPUT_FORMATS: &[&str] = &["html", "markdown"];

impl Settings {
    pub(crate) fn load() -> Result<Self, ConfigError> {
        let host = env_or_default("CONVERSIONS_HOST", "0.0.0.0");
        let port = env_or_default("CONVERSIONS_PORT", "8000");

        let environment = parse_environment(
            env_optional("CONVERSIONS_ENV").or_else(|| env_optional("ENVIRONMENT")),
        );
        let strict_config = env_optional("CONVERSIONS_STRICT_CONFIG")
            .map(|value| parse_bool(&value))
            .unwrap_or(false)
            || environment.is_production();

        let project_name = env_or_default("PROJECT_NAME", "Coursework Conversions API");
        let version = env_or_default("VERSION", env!("CARGO_PKG_VERSION"));
        let api_v1_str = env_or_default("API_V1_STR", "/api/v1");

        let cors_origins = parse_cors_origins(env_optional("BACKEND_CORS_ORIGINS"))?;

        let postgres_server = env_or_default("POSTGRES_SERVER", "localhost");
        let postgres_port = parse_u16("POSTGRES_PORT", env_or_default("POSTGRES_PORT", "5432"))?;
        let postgres_user = env_or_default("POSTGRES_USER", "conversions");
        let postgres_password = env_or_default("POSTGRES_PASSWORD", "");
        let postgres_db = env_or_default("POSTGRES_DB", "conversions_db");
        let database_url = env_optional("DATABASE_URL");

        let redis_host = env_or_default("REDIS_HOST", "localhost");
        let redis_port = parse_u16("REDIS_PORT", env_or_default("REDIS_PORT", "6379"))?;
        let redis_db = parse_u16("REDIS_DB", env_or_default("REDIS_DB", "0"))?;
        let redis_password = env_or_default("REDIS_PASSWORD", "");

        let datalab_api_key = env_or_default("DATALAB_API_KEY", "");
        let datalab_base_url = env_or_default("DATALAB_BASE_URL", "https://www.datalab.to/api/v1");
        let datalab_mode = env_or_default("DATALAB_MODE", "accurate").to_ascii_lowercase();
        let datalab_output_format =
            env_or_default("DATALAB_OUTPUT_FORMAT", "html").to_ascii_lowercase();
        let datalab_timeout_seconds =
            parse_u64("DATALAB_TIMEOUT_SECONDS", env_or_default("DATALAB_TIMEOUT_SECONDS", "120"))?;
        let datalab_max_submit_retries = parse_u32(
            "DATALAB_MAX_SUBMIT_RETRIES",
            env_or_default("DATALAB_MAX_SUBMIT_RETRIES", "3"),
        )?;

        let speech_api_key = env_or_default("SPEECH_API_KEY", "");
        let speech_base_url = env_or_default("SPEECH_BASE_URL", "https://api.assemblyai.com/v2");
        let speech_timeout_seconds =
            parse_u64("SPEECH_TIMEOUT_SECONDS", env_or_default("SPEECH_TIMEOUT_SECONDS", "60"))?;
        let speech_language_code = env_optional("SPEECH_LANGUAGE_CODE");

        let poller_workers =
            parse_workers("POLLER_WORKERS", env_or_default("POLLER_WORKERS", "5"))?;
        let poller_shutdown_grace_seconds = parse_u64(
            "POLLER_SHUTDOWN_GRACE_SECONDS",
            env_or_default("POLLER_SHUTDOWN_GRACE_SECONDS", "30"),
        )?;
        let document_max_attempts = parse_attempts(
            "DOCUMENT_POLL_MAX_ATTEMPTS",
            env_or_default("DOCUMENT_POLL_MAX_ATTEMPTS", "60"),
        )?;
        let document_delay_ms =
            parse_u64("DOCUMENT_POLL_DELAY_MS", env_or_default("DOCUMENT_POLL_DELAY_MS", "10000"))?;
        let transcript_max_attempts = parse_attempts(
            "TRANSCRIPT_POLL_MAX_ATTEMPTS",
            env_or_default("TRANSCRIPT_POLL_MAX_ATTEMPTS", "60"),
        )?;
        let transcript_delay_ms = parse_u64(
            "TRANSCRIPT_POLL_DELAY_MS",
            env_or_default("TRANSCRIPT_POLL_DELAY_MS", "10000"),
        )?;
        let detailed_max_attempts = parse_attempts(
            "DETAILED_TRANSCRIPT_POLL_MAX_ATTEMPTS",
            env_or_default("DETAILED_TRANSCRIPT_POLL_MAX_ATTEMPTS", "60"),
        )?;
        let detailed_delay_ms = parse_u64(
            "DETAILED_TRANSCRIPT_POLL_DELAY_MS",
            env_or_default("DETAILED_TRANSCRIPT_POLL_DELAY_MS", "10000"),
        )?;
        let stale_task_seconds =
            parse_u64("STALE_TASK_SECONDS", env_or_default("STALE_TASK_SECONDS", "900"))?;

        let s3_endpoint = env_or_default("S3_ENDPOINT", "https://storage.yandexcloud.net");
        let s3_access_key = env_or_default("S3_ACCESS_KEY", "");
        let s3_secret_key = env_or_default("S3_SECRET_KEY", "");
        let s3_bucket = env_or_default("S3_BUCKET", "coursework-conversions");
        let s3_region = env_or_default("S3_REGION", "ru-central1");
        let s3_public_base_url = env_optional("S3_PUBLIC_BASE_URL");

        let log_level = env_or_default("CONVERSIONS_LOG_LEVEL", "info");
        let json =
            env_optional("CONVERSIONS_LOG_JSON").map(|value| parse_bool(&value)).unwrap_or(false);
        let prometheus_enabled =
            env_optional("PROMETHEUS_ENABLED").map(|value| parse_bool(&value)).unwrap_or(false);

        let settings = Self {
            server: ServerSettings {
                host: ServerHost::parse(host)?,
                port: ServerPort::parse(port)?,
            },
            runtime: RuntimeSettings { environment, strict_config },
            api: ApiSettings { project_name, version, api_v1_str },
            cors: CorsSettings { origins: cors_origins },
            database: DatabaseSettings {
                postgres_server,
                postgres_port,
                postgres_user,
                postgres_password,
                postgres_db,
                database_url,
            },
            redis: RedisSettings {
                host: redis_host,
                port: redis_port,
                db: redis_db,
                password: redis_password,
            },
            datalab: DatalabSettings {
                api_key: datalab_api_key,
                base_url: datalab_base_url,
                mode: datalab_mode,
                output_format: datalab_output_format,
                timeout_seconds: datalab_timeout_seconds,
                max_submit_retries: datalab_max_submit_retries,
            },
            speech: SpeechSettings {
                api_key: speech_api_key,
                base_url: speech_base_url,
                timeout_seconds: speech_timeout_seconds,
                language_code: speech_language_code,
            },
            polling: PollingSettings {
                workers: poller_workers,
                shutdown_grace: Duration::from_secs(poller_shutdown_grace_seconds),
                document: poll_policy(document_max_attempts, document_delay_ms),
                transcript: poll_policy(transcript_max_attempts, transcript_delay_ms),
                detailed_transcript: poll_policy(detailed_max_attempts, detailed_delay_ms),
                stale_task_after: Duration::from_secs(stale_task_seconds),
            },
            s3: S3Settings {
                endpoint: s3_endpoint,
                access_key: s3_access_key,
                secret_key: s3_secret_key,
                bucket: s3_bucket,
                region: s3_region,
                public_base_url: s3_public_base_url,
            },
            telemetry: TelemetrySettings { log_level, json, prometheus_enabled },
        };

        settings.validate()?;
        Ok(settings)
    }

    pub(crate) fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host.0, self.server.port.0)
    }

    pub(crate) fn server_host(&self) -> &str {
        &self.server.host.0
    }

    pub(crate) fn server_port(&self) -> u16 {
        self.server.port.0
    }

    pub(crate) fn api(&self) -> &ApiSettings {
        &self.api
    }

    pub(crate) fn cors(&self) -> &CorsSettings {
        &self.cors
    }

    pub(crate) fn database(&self) -> &DatabaseSettings {
        &self.database
    }

    pub(crate) fn redis(&self) -> &RedisSettings {
        &self.redis
    }

    pub(crate) fn datalab(&self) -> &DatalabSettings {
        &self.datalab
    }

    pub(crate) fn speech(&self) -> &SpeechSettings {
        &self.speech
    }

    pub(crate) fn polling(&self) -> &PollingSettings {
        &self.polling
    }

    pub(crate) fn s3(&self) -> &S3Settings {
        &self.s3
    }

    pub(crate) fn telemetry(&self) -> &TelemetrySettings {
        &self.telemetry
    }

    pub(crate) fn runtime(&self) -> &RuntimeSettings {
        &self.runtime
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !DATALAB_MODES.contains(&self.datalab.mode.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "DATALAB_MODE",
                value: self.datalab.mode.clone(),
            });
        }

        if !DATALAB_OUTPUT_FORMATS.contains(&self.datalab.output_format.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "DATALAB_OUTPUT_FORMAT",
                value: self.datalab.output_format.clone(),
            });
        }

        // A recovered record must not be claimed while its previous lease is still live.
        if self.polling.stale_task_after <= self.polling.longest_lease() {
            return Err(ConfigError::InvalidValue {
                field: "STALE_TASK_SECONDS",
                value: self.polling.stale_task_after.as_secs().to_string(),
            });
        }

        if !(self.runtime.strict_config || self.runtime.environment.is_production()) {
            return Ok(());
        }

        if self.database.database_url.is_none() && self.database.postgres_password.is_empty() {
            return Err(ConfigError::MissingSecret("POSTGRES_PASSWORD"));
        }
        if self.datalab.api_key.is_empty() {
            return Err(ConfigError::MissingSecret("DATALAB_API_KEY"));
        }
        if self.speech.api_key.is_empty() {
            return Err(ConfigError::MissingSecret("SPEECH_API_KEY"));
        }

        Ok(())
    }
}

impl DatabaseSettings {
    pub(crate) fn database_url(&self) -> String {
        if let Some(url) = &self.database_url {
            return url.clone();
        }
        format!(
            "postgresql://{}:{}@{}:{}/{}",
            self.postgres_user,
            self.postgres_password,
            self.postgres_server,
            self.postgres_port,
            self.postgres_db
        )
    }
}

impl RedisSettings {
    pub(crate) fn redis_url(&self) -> String {
        if self.password.is_empty() {
            format!("redis://{}:{}/{}", self.host, self.port, self.db)
        } else {
            format!("redis://:{}@{}:{}/{}", self.password, self.host, self.port, self.db)
        }
    }
}

impl ServerHost {
    fn parse(value: String) -> Result<Self, ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::InvalidHost(value));
        }
        Ok(Self(value))
    }
}

impl ServerPort {
    fn parse(value: String) -> Result<Self, ConfigError> {
        let parsed: u16 = value.parse().map_err(|_| ConfigError::InvalidPort(value.clone()))?;
        if parsed == 0 {
            return Err(ConfigError::InvalidPort(value));
        }
        Ok(Self(parsed))
    }
}

//! Worker settings loaded from the process environment.

use std::collections::HashMap;
use std::time::Duration;

use ::config::{Config, Environment};
use serde::Deserialize;
use thiserror::Error;

use crate::pipeline::PipelineConfig;
use crate::queue::AckMode;
use crate::retry::RetryPolicy;

pub const DEFAULT_WORKER_COUNT: usize = 3;
pub const DEFAULT_AGENT_NAME: &str = "resume analyzer";
pub const DEFAULT_SESSION_QUEUE: &str = "sessions";
pub const DEFAULT_STATUS_EXCHANGE: &str = "session_updates";
pub const DEFAULT_RETRY_BASE_MS: u64 = 500;

const FETCH_ATTEMPTS: u32 = 3;
const ORACLE_ATTEMPTS: u32 = 2;
const PERSIST_ATTEMPTS: u32 = 3;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {reason}")]
    Invalid {
        name: &'static str,
        reason: String,
    },

    #[error(transparent)]
    Source(#[from] ::config::ConfigError),
}

/// Credentials for the Cloudflare R2 bucket holding uploaded documents.
#[derive(Clone)]
pub struct R2Settings {
    pub account_id: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
}

impl R2Settings {
    /// S3-compatible endpoint for the account.
    pub fn endpoint(&self) -> String {
        format!("https://{}.r2.cloudflarestorage.com", self.account_id)
    }
}

impl core::fmt::Debug for R2Settings {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("R2Settings")
            .field("account_id", &self.account_id)
            .field("bucket", &self.bucket)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct WorkerSettings {
    pub database_url: String,
    pub rabbitmq_url: String,
    pub r2: R2Settings,
    pub google_api_key: String,
    pub worker_count: usize,
    pub gemini_model: String,
    pub agent_name: String,
    pub session_queue: String,
    pub status_exchange: String,
    pub ack_mode: AckMode,
    pub retry_base_delay: Duration,
}

impl core::fmt::Debug for WorkerSettings {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WorkerSettings")
            .field("r2", &self.r2)
            .field("worker_count", &self.worker_count)
            .field("gemini_model", &self.gemini_model)
            .field("agent_name", &self.agent_name)
            .field("session_queue", &self.session_queue)
            .field("status_exchange", &self.status_exchange)
            .field("ack_mode", &self.ack_mode)
            .field("retry_base_delay", &self.retry_base_delay)
            .finish_non_exhaustive()
    }
}

/// Environment variables as the `config` crate sees them (lowercased keys).
#[derive(Debug, Default, Deserialize)]
struct RawSettings {
    db_url: Option<String>,
    rabbitmq_url: Option<String>,
    r2_acccount_id: Option<String>,
    r2_bucket: Option<String>,
    r2_access_key: Option<String>,
    r2_secret_key: Option<String>,
    google_api_key: Option<String>,
    worker_count: Option<String>,
    gemini_model: Option<String>,
    agent_name: Option<String>,
    session_queue: Option<String>,
    status_exchange: Option<String>,
    ack_mode: Option<String>,
    retry_base_delay_ms: Option<String>,
}

impl WorkerSettings {
    /// Read settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_environment(Environment::default())
    }

    /// Read settings from an explicit variable map instead of the process environment.
    pub fn from_map(vars: HashMap<String, String>) -> Result<Self, ConfigError> {
        Self::from_environment(Environment::default().source(Some(vars)))
    }

    fn from_environment(env: Environment) -> Result<Self, ConfigError> {
        let raw: RawSettings = Config::builder().add_source(env).build()?.try_deserialize()?;
        Self::validate(raw)
    }

    fn validate(raw: RawSettings) -> Result<Self, ConfigError> {
        let worker_count = match present(raw.worker_count) {
            Some(v) => parse_number::<usize>("WORKER_COUNT", &v)?,
            None => DEFAULT_WORKER_COUNT,
        };
        if worker_count == 0 {
            return Err(ConfigError::Invalid {
                name: "WORKER_COUNT",
                reason: "must be at least 1".into(),
            });
        }
        let ack_mode = match present(raw.ack_mode) {
            Some(v) => v
                .parse::<AckMode>()
                .map_err(|reason| ConfigError::Invalid {
                    name: "ACK_MODE",
                    reason,
                })?,
            None => AckMode::default(),
        };
        let retry_base_ms = match present(raw.retry_base_delay_ms) {
            Some(v) => parse_number::<u64>("RETRY_BASE_DELAY_MS", &v)?,
            None => DEFAULT_RETRY_BASE_MS,
        };

        Ok(Self {
            database_url: required("DB_URL", raw.db_url)?,
            rabbitmq_url: required("RABBITMQ_URL", raw.rabbitmq_url)?,
            r2: R2Settings {
                account_id: required("R2_ACCCOUNT_ID", raw.r2_acccount_id)?,
                bucket: required("R2_BUCKET", raw.r2_bucket)?,
                access_key: required("R2_ACCESS_KEY", raw.r2_access_key)?,
                secret_key: required("R2_SECRET_KEY", raw.r2_secret_key)?,
            },
            google_api_key: required("GOOGLE_API_KEY", raw.google_api_key)?,
            worker_count,
            gemini_model: or_default(raw.gemini_model, matchwork_ai::gemini::DEFAULT_MODEL),
            agent_name: or_default(raw.agent_name, DEFAULT_AGENT_NAME),
            session_queue: or_default(raw.session_queue, DEFAULT_SESSION_QUEUE),
            status_exchange: or_default(raw.status_exchange, DEFAULT_STATUS_EXCHANGE),
            ack_mode,
            retry_base_delay: Duration::from_millis(retry_base_ms),
        })
    }

    /// Retry ceilings per stage: fetch 3, oracle 2, persist 3.
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            app_name: self.agent_name.clone(),
            fetch_retry: RetryPolicy::linear(FETCH_ATTEMPTS, self.retry_base_delay),
            oracle_retry: RetryPolicy::linear(ORACLE_ATTEMPTS, self.retry_base_delay),
            persist_retry: RetryPolicy::linear(PERSIST_ATTEMPTS, self.retry_base_delay),
        }
    }
}

fn present(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_owned()).filter(|v| !v.is_empty())
}

fn or_default(value: Option<String>, default: &str) -> String {
    present(value).unwrap_or_else(|| default.to_owned())
}

fn required(name: &'static str, value: Option<String>) -> Result<String, ConfigError> {
    present(value).ok_or(ConfigError::Missing(name))
}

fn parse_number<T>(name: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: core::str::FromStr,
    T::Err: core::fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::Invalid {
        name,
        reason: e.to_string(),
    })
}

use crate::consts::{
    DEFAULT_OLLAMA_MODEL, DEFAULT_OLLAMA_URL, DEFAULT_OPENAI_BASE_URL,
    DEFAULT_POLL_ATTEMPTS, DEFAULT_POLL_DELAY_MILLIS, DEFAULT_PORT, DEFAULT_VAPI_BASE_URL,
};
use crate::poller::PollPolicy;

use std::net::SocketAddr;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} not set!")]
    Missing(&'static str),
    #[error("{name} has an invalid value '{value}'")]
    Invalid { name: &'static str, value: String },
}

#[derive(Clone)]
pub struct SupabaseConfig {
    pub url: String,
    pub service_key: String,
}

#[derive(Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub vapi_api_key: String,
    pub vapi_phone_number_id: String,
    pub vapi_base_url: String,
    pub poll_policy: PollPolicy,
    /// Auth is only available when both the project url and service key are present.
    pub supabase: Option<SupabaseConfig>,
    pub database_url: Option<String>,
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub ollama_url: String,
    pub ollama_model: String,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("bind_addr", &self.bind_addr)
            .field("vapi_phone_number_id", &self.vapi_phone_number_id)
            .field("vapi_base_url", &self.vapi_base_url)
            .field("poll_policy", &self.poll_policy)
            .field("supabase", &self.supabase.as_ref().map(|s| &s.url))
            .field("database", &self.database_url.is_some())
            .field("openai", &self.openai_api_key.is_some())
            .field("ollama_url", &self.ollama_url)
            .field("ollama_model", &self.ollama_model)
            .finish()
    }
}

impl Config {
    /// Read configuration from the process environment (after `.env` has been loaded).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let required = |name: &'static str| var(name).ok_or(ConfigError::Missing(name));

        let bind_addr = parse_or(&var, "BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)))?;
        let attempts: u32 = parse_or(&var, "VAPI_POLL_ATTEMPTS", DEFAULT_POLL_ATTEMPTS)?;
        if attempts == 0 {
            return Err(ConfigError::Invalid {
                name: "VAPI_POLL_ATTEMPTS",
                value: "0".to_string(),
            });
        }
        let delay_millis: u64 = parse_or(&var, "VAPI_POLL_DELAY_MS", DEFAULT_POLL_DELAY_MILLIS)?;

        let supabase = match (var("SUPABASE_URL"), var("SUPABASE_SERVICE_KEY")) {
            (Some(url), Some(service_key)) => Some(SupabaseConfig {
                url: url.trim_end_matches('/').to_string(),
                service_key,
            }),
            _ => None,
        };

        Ok(Self {
            bind_addr,
            vapi_api_key: required("VAPI_API_KEY")?,
            vapi_phone_number_id: required("VAPI_PHONE_NUMBER_ID")?,
            vapi_base_url: var("VAPI_BASE_URL")
                .unwrap_or_else(|| DEFAULT_VAPI_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            poll_policy: PollPolicy {
                attempts,
                delay: Duration::from_millis(delay_millis),
            },
            supabase,
            database_url: var("DATABASE_URL"),
            openai_api_key: var("OPENAI_API_KEY"),
            openai_base_url: var("OPENAI_BASE_URL")
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
            ollama_url: var("OLLAMA_URL").unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string()),
            ollama_model: var("OLLAMA_MODEL").unwrap_or_else(|| DEFAULT_OLLAMA_MODEL.to_string()),
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match var(name) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
        None => Ok(default),
    }
}

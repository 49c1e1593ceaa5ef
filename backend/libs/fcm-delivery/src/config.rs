use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::credentials::{ServiceAccountKey, ServiceCredential};
use crate::errors::{FcmError, FcmResult};
use crate::message::MessageMode;

pub const DEFAULT_BASE_URL: &str = "https://fcm.googleapis.com/v1";
pub const DEFAULT_OAUTH_URL: &str = "https://oauth2.googleapis.com/token";
pub const DEFAULT_SCOPE: &str = "https://www.googleapis.com/auth/firebase.messaging";

/// FCM delivery engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FcmConfig {
    pub project_id: String,
    pub client_email: String,
    pub private_key: String,
    /// Path to a service account JSON key; takes precedence over the inline fields
    pub credentials_file: Option<String>,
    pub base_url: String,
    pub oauth_url: String,
    pub scope: String,
    /// HTTP timeout in seconds (default: 30)
    pub timeout_secs: u64,
    /// Lifetime of the signed assertion in seconds (default: 3600)
    pub jwt_expiry_secs: u64,
    pub cache_token: bool,
    pub cache_prefix: String,
    pub max_auth_retries: u32,
    /// Delay before re-sending after an auth failure, skipped on the first retry
    pub auth_retry_delay_ms: u64,
    pub default_mode: MessageMode,
    /// Column name forwarded to cleanup subscribers
    pub token_column: String,
    pub auto_cleanup_tokens: bool,
    /// TTL of the per-token cleanup lock in seconds (default: 10)
    pub cleanup_lock_ttl_secs: u64,
    /// Number of in-flight sends during a batch (1 = sequential)
    pub batch_concurrency: usize,
}

impl Default for FcmConfig {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            client_email: String::new(),
            private_key: String::new(),
            credentials_file: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            oauth_url: DEFAULT_OAUTH_URL.to_string(),
            scope: DEFAULT_SCOPE.to_string(),
            timeout_secs: 30,
            jwt_expiry_secs: 3600,
            cache_token: true,
            cache_prefix: "fcm".to_string(),
            max_auth_retries: 2,
            auth_retry_delay_ms: 500,
            default_mode: MessageMode::NotificationAndData,
            token_column: "fcm_token".to_string(),
            auto_cleanup_tokens: true,
            cleanup_lock_ttl_secs: 10,
            batch_concurrency: 1,
        }
    }
}

impl FcmConfig {
    /// Build configuration from `FCM_*` environment variables
    pub fn from_env() -> FcmResult<Self> {
        let defaults = Self::default();
        Ok(FcmConfig {
            project_id: std::env::var("FCM_PROJECT_ID").unwrap_or_default(),
            client_email: std::env::var("FCM_CLIENT_EMAIL").unwrap_or_default(),
            private_key: std::env::var("FCM_PRIVATE_KEY").unwrap_or_default(),
            credentials_file: std::env::var("FCM_CREDENTIALS_FILE").ok(),
            base_url: std::env::var("FCM_BASE_URL").unwrap_or(defaults.base_url),
            oauth_url: std::env::var("FCM_OAUTH_URL").unwrap_or(defaults.oauth_url),
            scope: std::env::var("FCM_SCOPE").unwrap_or(defaults.scope),
            timeout_secs: env_parse("FCM_TIMEOUT", defaults.timeout_secs)?,
            jwt_expiry_secs: env_parse("FCM_JWT_EXPIRY", defaults.jwt_expiry_secs)?,
            cache_token: env_parse("FCM_CACHE_TOKEN", defaults.cache_token)?,
            cache_prefix: std::env::var("FCM_CACHE_PREFIX").unwrap_or(defaults.cache_prefix),
            max_auth_retries: env_parse("FCM_MAX_AUTH_RETRIES", defaults.max_auth_retries)?,
            auth_retry_delay_ms: env_parse(
                "FCM_AUTH_RETRY_DELAY_MS",
                defaults.auth_retry_delay_ms,
            )?,
            default_mode: match std::env::var("FCM_DEFAULT_MODE") {
                Ok(raw) => raw.parse()?,
                Err(_) => defaults.default_mode,
            },
            token_column: std::env::var("FCM_TOKEN_COLUMN").unwrap_or(defaults.token_column),
            auto_cleanup_tokens: env_parse(
                "FCM_AUTO_CLEANUP_TOKENS",
                defaults.auto_cleanup_tokens,
            )?,
            cleanup_lock_ttl_secs: env_parse(
                "FCM_CLEANUP_LOCK_TTL",
                defaults.cleanup_lock_ttl_secs,
            )?,
            batch_concurrency: env_parse("FCM_BATCH_CONCURRENCY", defaults.batch_concurrency)?,
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn jwt_expiry(&self) -> Duration {
        Duration::from_secs(self.jwt_expiry_secs)
    }

    pub fn auth_retry_delay(&self) -> Duration {
        Duration::from_millis(self.auth_retry_delay_ms)
    }

    pub fn cleanup_lock_ttl(&self) -> Duration {
        Duration::from_secs(self.cleanup_lock_ttl_secs)
    }

    fn has_credential_material(&self) -> bool {
        self.credentials_file.is_some()
            || !self.project_id.is_empty()
            || !self.client_email.is_empty()
            || !self.private_key.is_empty()
    }

    fn load_credential(&self) -> FcmResult<ServiceCredential> {
        match &self.credentials_file {
            Some(path) => {
                let mut key = ServiceAccountKey::from_file(path)?;
                // An explicit project id overrides the one embedded in the key file
                if !self.project_id.is_empty() {
                    key.project_id = self.project_id.clone();
                }
                key.into_credential()
            }
            None => ServiceCredential::new(&self.project_id, &self.client_email, &self.private_key),
        }
    }
}

fn env_parse<T>(name: &str, default: T) -> FcmResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| FcmError::Configuration(format!("{}: {}", name, e))),
        Err(_) => Ok(default),
    }
}

/// Configuration lifecycle of the engine
#[derive(Debug, Clone)]
pub enum ConfigState {
    /// No credential material supplied yet
    Unconfigured,
    /// Credential material present but unusable until corrected
    Invalid(String),
    Ready(Arc<ServiceCredential>),
}

impl ConfigState {
    pub fn from_config(config: &FcmConfig) -> Self {
        if !config.has_credential_material() {
            return ConfigState::Unconfigured;
        }
        match config.load_credential() {
            Ok(credential) => ConfigState::Ready(Arc::new(credential)),
            Err(e) => ConfigState::Invalid(e.to_string()),
        }
    }

    pub fn credential(&self) -> FcmResult<Arc<ServiceCredential>> {
        match self {
            ConfigState::Ready(credential) => Ok(credential.clone()),
            ConfigState::Unconfigured => Err(FcmError::Unconfigured),
            ConfigState::Invalid(reason) => Err(FcmError::Configuration(reason.clone())),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, ConfigState::Ready(_))
    }
}

use futures::stream::{self, StreamExt};
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::auth::AccessTokenCache;
use crate::classifier::{classify, ErrorCategory};
use crate::cleanup::{CleanupLock, CleanupSignal, InvalidTokenEvent, TokenStore};
use crate::config::{ConfigState, FcmConfig};
use crate::credentials::ServiceCredential;
use crate::errors::{FcmError, FcmResult};
use crate::message::{IntoMessage, Message};
use crate::models::{token_prefix, BatchSummary, SendResult};
use crate::retry::{send_with_retry, RetryConfig};

/// Message target inside the v1 envelope
#[derive(Debug, Clone, Copy)]
pub(crate) enum Target<'a> {
    Token(&'a str),
    Topic(&'a str),
}

impl Target<'_> {
    fn label(&self) -> String {
        match self {
            Target::Token(token) => token.to_string(),
            Target::Topic(topic) => format!("/topics/{}", topic),
        }
    }
}

struct Inner {
    state: ConfigState,
    tokens: Option<Arc<AccessTokenCache>>,
}

/// Firebase Cloud Messaging delivery engine
///
/// Handles OAuth2 token caching, message delivery with bounded auth retry,
/// error classification and the invalid-token cleanup signal.
///
/// Send operations never return `Err`: every outcome, including an
/// unconfigured engine, is reported as a [`SendResult`].
pub struct FcmClient {
    config: FcmConfig,
    inner: RwLock<Inner>,
    http_client: reqwest::Client,
    retry: RetryConfig,
    cleanup: CleanupSignal,
}

impl FcmClient {
    /// Create a client in whatever state the configuration allows.
    ///
    /// Missing or invalid credentials do not fail construction; sends are
    /// rejected with a `configuration` category until [`FcmClient::configure`]
    /// installs a usable credential.
    pub fn new(config: FcmConfig) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .unwrap_or_else(|e| {
                warn!("Failed to build HTTP client with timeout, using defaults: {}", e);
                reqwest::Client::new()
            });

        Self::with_http_client(config, http_client)
    }

    /// Strict constructor: refuses to build unless the credential is valid
    pub fn try_new(config: FcmConfig) -> FcmResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;

        let client = Self::with_http_client(config, http_client);
        client.inner.read().state.credential()?;
        Ok(client)
    }

    fn with_http_client(config: FcmConfig, http_client: reqwest::Client) -> Self {
        let state = ConfigState::from_config(&config);

        match &state {
            ConfigState::Ready(credential) => info!(
                "FCM client ready for project {}",
                credential.project_id()
            ),
            ConfigState::Unconfigured => info!("FCM client created without credentials"),
            ConfigState::Invalid(reason) => warn!("FCM credentials rejected: {}", reason),
        }

        let tokens = match &state {
            ConfigState::Ready(credential) => Some(AccessTokenCache::shared(
                credential.clone(),
                &config,
                http_client.clone(),
            )),
            _ => None,
        };

        let cleanup = CleanupSignal::new(&config);

        Self {
            config,
            inner: RwLock::new(Inner { state, tokens }),
            http_client,
            retry: RetryConfig::default(),
            cleanup,
        }
    }

    /// Install a credential after construction
    pub fn configure(&self, credential: ServiceCredential) {
        let credential = Arc::new(credential);
        let tokens =
            AccessTokenCache::shared(credential.clone(), &self.config, self.http_client.clone());

        info!("FCM client configured for project {}", credential.project_id());

        let mut inner = self.inner.write();
        inner.state = ConfigState::Ready(credential);
        inner.tokens = Some(tokens);
    }

    /// Use a different lock for cleanup deduplication, e.g. a Redis-backed one
    pub fn with_cleanup_lock(mut self, lock: Arc<dyn CleanupLock>) -> Self {
        self.cleanup = self.cleanup.with_lock(lock);
        self
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn config(&self) -> &FcmConfig {
        &self.config
    }

    pub fn state(&self) -> ConfigState {
        self.inner.read().state.clone()
    }

    pub fn token_cache(&self) -> Option<Arc<AccessTokenCache>> {
        self.inner.read().tokens.clone()
    }

    pub fn cleanup_signal(&self) -> &CleanupSignal {
        &self.cleanup
    }

    pub fn subscribe_invalid_tokens(&self) -> tokio::sync::broadcast::Receiver<InvalidTokenEvent> {
        self.cleanup.subscribe()
    }

    /// Message in the configured default mode
    pub fn message(&self) -> Message {
        Message::with_mode(self.config.default_mode)
    }

    fn ready(&self) -> FcmResult<(Arc<ServiceCredential>, Arc<AccessTokenCache>)> {
        let inner = self.inner.read();
        let credential = inner.state.credential()?;
        let tokens = inner.tokens.clone().ok_or(FcmError::Unconfigured)?;
        Ok((credential, tokens))
    }

    /// Send a message to a single device
    pub async fn send(&self, device_token: &str, message: &Message) -> SendResult {
        self.send_with_retries(device_token, message, 0, self.config.max_auth_retries)
            .await
    }

    /// Send with an explicit starting attempt (0-based) and auth retry ceiling.
    ///
    /// With `auto_cleanup_tokens`, a permanently invalid token is signalled
    /// once the send has finished retrying.
    pub async fn send_with_retries(
        &self,
        device_token: &str,
        message: &Message,
        attempt: u32,
        max_retries: u32,
    ) -> SendResult {
        let result = self
            .deliver(Target::Token(device_token), message, attempt, max_retries, false)
            .await;

        if self.config.auto_cleanup_tokens && result.is_invalid_token() {
            self.cleanup.notify_invalid(device_token).await;
        }

        result
    }

    /// Send anything convertible into a [`Message`]
    pub async fn send_notification<N: IntoMessage>(
        &self,
        device_token: &str,
        notification: N,
    ) -> SendResult {
        let message = notification.into_message();
        self.send(device_token, &message).await
    }

    /// Single send that deletes an invalid token straight from `store`, bypassing the signal
    pub async fn send_with_store(
        &self,
        device_token: &str,
        message: &Message,
        store: &dyn TokenStore,
    ) -> SendResult {
        let result = self.send_unsignalled(device_token, message).await;

        if result.is_invalid_token() {
            delete_from_store(store, &[device_token.to_string()]).await;
        }

        result
    }

    /// Send notification to topic
    pub async fn send_to_topic(&self, topic: &str, message: &Message) -> SendResult {
        let topic = topic.trim_start_matches("/topics/");
        self.deliver(
            Target::Topic(topic),
            message,
            0,
            self.config.max_auth_retries,
            false,
        )
        .await
    }

    pub(crate) async fn deliver(
        &self,
        target: Target<'_>,
        message: &Message,
        mut attempt: u32,
        max_retries: u32,
        validate_only: bool,
    ) -> SendResult {
        let label = target.label();

        let (credential, tokens) = match self.ready() {
            Ok(ready) => ready,
            Err(e) => {
                warn!("Refusing to send to {}: {}", token_prefix(&label), e);
                return SendResult::failed(&label, 0, e.category(), e.to_string());
            }
        };

        let url = format!(
            "{}/projects/{}/messages:send",
            self.config.base_url.trim_end_matches('/'),
            credential.project_id()
        );
        let body = envelope(target, message, validate_only);

        loop {
            let attempts = attempt + 1;

            let access_token = match tokens.get_token().await {
                Ok(token) => token,
                Err(e) => {
                    warn!("Failed to obtain access token: {}", e);
                    return SendResult::failed(&label, attempts, e.category(), e.to_string());
                }
            };

            debug!(
                "Sending FCM message to {} (attempt {})",
                token_prefix(&label),
                attempts
            );

            let response = send_with_retry(&self.retry, || {
                self.http_client
                    .post(&url)
                    .bearer_auth(&access_token.value)
                    .json(&body)
            })
            .await;

            let response = match response {
                Ok(response) => response,
                Err(e) => {
                    warn!("FCM send request failed for {}: {}", token_prefix(&label), e);
                    return SendResult::failed(
                        &label,
                        attempts,
                        ErrorCategory::ServerError,
                        format!("FCM send request failed: {}", e),
                    );
                }
            };

            let status = response.status();
            let text = match response.text().await {
                Ok(text) => text,
                Err(e) => {
                    return SendResult::failed(
                        &label,
                        attempts,
                        ErrorCategory::ServerError,
                        format!("Failed to read FCM response: {}", e),
                    );
                }
            };

            if status.is_success() {
                return match serde_json::from_str::<Value>(&text) {
                    Ok(parsed) => {
                        let result = SendResult::delivered(&label, attempts, parsed);
                        info!(
                            "FCM message delivered to {} (message_id: {:?})",
                            token_prefix(&label),
                            result.message_id
                        );
                        result
                    }
                    Err(e) => SendResult::failed(
                        &label,
                        attempts,
                        ErrorCategory::Unknown,
                        FcmError::ResponseParseError(e.to_string()).to_string(),
                    ),
                };
            }

            let classification = classify(status.as_u16(), &text);

            if classification.evict_access_token {
                tokens.invalidate_if_current(&access_token.value);
            }

            if classification.category.is_auth_failure() && attempt < max_retries {
                warn!(
                    "FCM rejected access token ({}), retry {}/{}",
                    classification.category,
                    attempt + 1,
                    max_retries
                );
                if attempt > 0 {
                    tokio::time::sleep(self.config.auth_retry_delay()).await;
                }
                attempt += 1;
                continue;
            }

            warn!(
                "FCM delivery to {} failed with status {}: {} ({})",
                token_prefix(&label),
                status,
                classification.category,
                classification.explanation
            );
            return SendResult::rejected(&label, attempts, classification);
        }
    }

    /// Send one message to many devices.
    ///
    /// Results keep input order. With `auto_cleanup_tokens`, each distinct
    /// invalid token is signalled once after the whole batch completes.
    pub async fn send_batch(&self, device_tokens: &[String], message: &Message) -> BatchSummary {
        let summary = self.collect_batch(device_tokens, message).await;

        if self.config.auto_cleanup_tokens {
            for token in &summary.invalid_tokens {
                self.cleanup.notify_invalid(token).await;
            }
        }

        summary
    }

    /// Batch send that deletes invalid tokens straight from `store`, bypassing the signal
    pub async fn send_batch_with_store(
        &self,
        device_tokens: &[String],
        message: &Message,
        store: &dyn TokenStore,
    ) -> BatchSummary {
        let summary = self.collect_batch(device_tokens, message).await;

        if !summary.invalid_tokens.is_empty() {
            delete_from_store(store, &summary.invalid_tokens).await;
        }

        summary
    }

    /// Send without signalling; the caller decides how invalid tokens are cleaned up
    async fn send_unsignalled(&self, device_token: &str, message: &Message) -> SendResult {
        self.deliver(
            Target::Token(device_token),
            message,
            0,
            self.config.max_auth_retries,
            false,
        )
        .await
    }

    async fn collect_batch(&self, device_tokens: &[String], message: &Message) -> BatchSummary {
        info!("Sending FCM message to {} device(s)", device_tokens.len());

        let concurrency = self.config.batch_concurrency.max(1);

        let results: Vec<SendResult> = if concurrency == 1 {
            let mut results = Vec::with_capacity(device_tokens.len());
            for token in device_tokens {
                results.push(self.send_unsignalled(token, message).await);
            }
            results
        } else {
            let sends: Vec<_> = device_tokens
                .iter()
                .map(|token| self.send_unsignalled(token, message))
                .collect();
            stream::iter(sends)
                .buffered(concurrency)
                .collect()
                .await
        };

        let summary = BatchSummary::from_results(results);

        info!(
            "Batch send complete: {} succeeded, {} failed, {} invalid",
            summary.success_count,
            summary.failure_count,
            summary.invalid_tokens.len()
        );

        summary
    }
}

async fn delete_from_store(store: &dyn TokenStore, tokens: &[String]) {
    match store.delete_tokens(tokens).await {
        Ok(deleted) => info!("Deleted {} invalid token(s) from store", deleted),
        Err(e) => warn!("Failed to delete invalid tokens: {}", e),
    }
}

fn envelope(target: Target<'_>, message: &Message, validate_only: bool) -> Value {
    let mut payload = message.to_wire_format();

    if let Value::Object(fields) = &mut payload {
        match target {
            Target::Token(token) => fields.insert("token".to_string(), json!(token)),
            Target::Topic(topic) => fields.insert("topic".to_string(), json!(topic)),
        };
    }

    let mut body = json!({ "message": payload });
    if validate_only {
        body["validate_only"] = json!(true);
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_merges_token() {
        let message = Message::data_only().data("k", "v");
        let body = envelope(Target::Token("device-1"), &message, false);

        assert_eq!(body["message"]["token"], "device-1");
        assert_eq!(body["message"]["data"]["k"], "v");
        assert!(body.get("validate_only").is_none());
    }

    #[test]
    fn test_envelope_topic_and_validate_only() {
        let body = envelope(Target::Topic("news"), &Message::new().title("t"), true);
        assert_eq!(body["message"]["topic"], "news");
        assert_eq!(body["validate_only"], true);
    }

    #[tokio::test]
    async fn test_unconfigured_client_rejects_without_network() {
        let client = FcmClient::new(FcmConfig::default());
        let result = client.send("device-1", &Message::new().title("hi")).await;

        assert!(!result.success);
        assert_eq!(result.attempts, 0);
        assert_eq!(result.category, Some(ErrorCategory::Configuration));
        assert!(matches!(client.state(), ConfigState::Unconfigured));
    }

    #[test]
    fn test_try_new_refuses_invalid_credentials() {
        let config = FcmConfig {
            project_id: "Bad Project".into(),
            client_email: "sender@example.com".into(),
            private_key: "not a key".into(),
            ..Default::default()
        };
        assert!(FcmClient::try_new(config.clone()).is_err());
        assert!(matches!(FcmClient::new(config).state(), ConfigState::Invalid(_)));
    }

    #[test]
    fn test_default_mode_message() {
        let config = FcmConfig {
            default_mode: crate::message::MessageMode::DataOnly,
            ..Default::default()
        };
        let client = FcmClient::new(config);
        assert_eq!(client.message().current_mode(), crate::message::MessageMode::DataOnly);
    }
}

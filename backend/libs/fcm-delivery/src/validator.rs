use futures::stream::{self, StreamExt};
use tracing::debug;

use crate::classifier::ErrorCategory;
use crate::client::{FcmClient, Target};
use crate::message::Message;
use crate::models::{token_prefix, TokenValidation};

/// Registration tokens are opaque but never this long
const MAX_TOKEN_LEN: usize = 4096;

/// Local structural check, done before spending a network round-trip
pub fn check_token_structure(device_token: &str) -> Result<(), String> {
    if device_token.is_empty() {
        return Err("Token is empty".to_string());
    }
    if device_token.len() > MAX_TOKEN_LEN {
        return Err(format!("Token exceeds {} characters", MAX_TOKEN_LEN));
    }
    if device_token.chars().any(char::is_whitespace) {
        return Err("Token contains whitespace".to_string());
    }
    Ok(())
}

impl FcmClient {
    /// Probe a token with a `validate_only` dry-run send.
    ///
    /// Nothing is delivered to the device and no cleanup is triggered.
    pub async fn validate(&self, device_token: &str) -> TokenValidation {
        if let Err(reason) = check_token_structure(device_token) {
            return TokenValidation {
                token: device_token.to_string(),
                valid: false,
                category: Some(ErrorCategory::InvalidToken),
                message: reason,
            };
        }

        let probe = Message::data_only().data("probe", "1");
        let result = self
            .deliver(
                Target::Token(device_token),
                &probe,
                0,
                self.config().max_auth_retries,
                true,
            )
            .await;

        debug!(
            "Token {} validation: success={}",
            token_prefix(device_token),
            result.success
        );

        if result.success {
            TokenValidation {
                token: device_token.to_string(),
                valid: true,
                category: None,
                message: "Token accepted by FCM".to_string(),
            }
        } else {
            TokenValidation {
                token: device_token.to_string(),
                valid: false,
                category: result.category,
                message: result.error.unwrap_or_else(|| "Token rejected by FCM".to_string()),
            }
        }
    }

    /// Validate each token; results keep input order
    pub async fn validate_many(&self, device_tokens: &[String]) -> Vec<TokenValidation> {
        let concurrency = self.config().batch_concurrency.max(1);

        stream::iter(device_tokens)
            .map(|token| self.validate(token))
            .buffered(concurrency)
            .collect()
            .await
    }
}

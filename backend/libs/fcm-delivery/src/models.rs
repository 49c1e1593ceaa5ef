use serde::{Deserialize, Serialize};

use crate::classifier::{Classification, ErrorCategory};

/// Outcome of one (token, message) send, retries included
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendResult {
    pub success: bool,
    /// Device token or `/topics/{name}` target
    pub token: String,
    pub attempts: u32,
    pub message_id: Option<String>,
    /// Raw gateway response on success
    pub response: Option<serde_json::Value>,
    pub error: Option<String>,
    /// Provider error code, when the gateway sent one
    pub error_code: Option<String>,
    pub category: Option<ErrorCategory>,
}

impl SendResult {
    pub fn delivered(token: &str, attempts: u32, response: serde_json::Value) -> Self {
        let message_id = response
            .get("name")
            .and_then(|name| name.as_str())
            .map(str::to_string);

        Self {
            success: true,
            token: token.to_string(),
            attempts,
            message_id,
            response: Some(response),
            error: None,
            error_code: None,
            category: None,
        }
    }

    pub fn failed(
        token: &str,
        attempts: u32,
        category: ErrorCategory,
        error: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            token: token.to_string(),
            attempts,
            message_id: None,
            response: None,
            error: Some(error.into()),
            error_code: None,
            category: Some(category),
        }
    }

    pub fn rejected(token: &str, attempts: u32, classification: Classification) -> Self {
        Self {
            error_code: classification.code,
            ..Self::failed(token, attempts, classification.category, classification.explanation)
        }
    }

    /// The gateway reported this token as permanently unusable
    pub fn is_invalid_token(&self) -> bool {
        self.category
            .as_ref()
            .is_some_and(ErrorCategory::triggers_cleanup)
    }
}

/// Aggregate over a batch send
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub success_count: usize,
    pub failure_count: usize,
    /// Distinct tokens to remove, in first-seen order
    pub invalid_tokens: Vec<String>,
    /// Per-token results, in input order
    pub results: Vec<SendResult>,
}

impl BatchSummary {
    pub fn from_results(results: Vec<SendResult>) -> Self {
        let success_count = results.iter().filter(|r| r.success).count();

        let mut invalid_tokens: Vec<String> = Vec::new();
        for result in results.iter().filter(|r| r.is_invalid_token()) {
            if !invalid_tokens.contains(&result.token) {
                invalid_tokens.push(result.token.clone());
            }
        }

        Self {
            total: results.len(),
            success_count,
            failure_count: results.len() - success_count,
            invalid_tokens,
            results,
        }
    }
}

/// Result of probing a token with a dry-run send
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenValidation {
    pub token: String,
    pub valid: bool,
    pub category: Option<ErrorCategory>,
    pub message: String,
}

/// First eight characters of a token, safe for logs
pub fn token_prefix(token: &str) -> String {
    token.chars().take(8).collect()
}

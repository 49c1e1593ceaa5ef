//! Gateway error classification
//!
//! Maps an FCM v1 error response (status code plus the `google.rpc.Status`
//! body) onto an [`ErrorCategory`]. Rules are evaluated in priority order:
//!
//! 1. structured FCM error code (`google.firebase.fcm.v1.FcmError.errorCode`)
//! 2. explicit access-token expiry (`google.rpc.ErrorInfo.reason`)
//! 3. bare HTTP status
//! 4. `unknown`

use serde::{Deserialize, Serialize};
use std::fmt;

const FCM_ERROR_TYPE: &str = "type.googleapis.com/google.firebase.fcm.v1.FcmError";
const ERROR_INFO_TYPE: &str = "type.googleapis.com/google.rpc.ErrorInfo";
const BAD_REQUEST_TYPE: &str = "type.googleapis.com/google.rpc.BadRequest";

const ACCESS_TOKEN_EXPIRED: &str = "ACCESS_TOKEN_EXPIRED";

/// Closed set of error categories reported by the engine.
///
/// `Other` carries unknown provider codes through, lower-cased.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Unregistered,
    InvalidToken,
    InvalidArgument,
    SenderMismatch,
    QuotaExceeded,
    ThirdPartyAuth,
    AuthExpired,
    Unauthorized,
    BadRequest,
    ServerError,
    Configuration,
    Unknown,
    Other(String),
}

impl ErrorCategory {
    /// Permanent token failures: the token should be removed from the host's store
    pub fn triggers_cleanup(&self) -> bool {
        matches!(
            self,
            ErrorCategory::Unregistered
                | ErrorCategory::InvalidToken
                | ErrorCategory::SenderMismatch
        )
    }

    /// The bearer token itself was rejected; evict it and retry
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, ErrorCategory::AuthExpired | ErrorCategory::Unauthorized)
    }

    pub fn as_str(&self) -> &str {
        match self {
            ErrorCategory::Unregistered => "unregistered",
            ErrorCategory::InvalidToken => "invalid_token",
            ErrorCategory::InvalidArgument => "invalid_argument",
            ErrorCategory::SenderMismatch => "sender_mismatch",
            ErrorCategory::QuotaExceeded => "quota_exceeded",
            ErrorCategory::ThirdPartyAuth => "third_party_auth",
            ErrorCategory::AuthExpired => "auth_expired",
            ErrorCategory::Unauthorized => "unauthorized",
            ErrorCategory::BadRequest => "bad_request",
            ErrorCategory::ServerError => "server_error",
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::Unknown => "unknown",
            ErrorCategory::Other(code) => code,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of classifying a single gateway response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub category: ErrorCategory,
    /// Provider error code, when the body carried one
    pub code: Option<String>,
    pub explanation: String,
    /// The cached access token must be dropped before the next attempt
    pub evict_access_token: bool,
}

impl Classification {
    fn new(category: ErrorCategory, code: Option<String>, explanation: impl Into<String>) -> Self {
        let evict_access_token = category.is_auth_failure();
        Self {
            category,
            code,
            explanation: explanation.into(),
            evict_access_token,
        }
    }
}

/// `google.rpc.Status` envelope returned by the v1 API
#[derive(Debug, Default, Deserialize)]
pub struct GatewayErrorBody {
    #[serde(default)]
    pub error: GatewayError,
}

#[derive(Debug, Default, Deserialize)]
pub struct GatewayError {
    pub code: Option<u16>,
    pub message: Option<String>,
    pub status: Option<String>,
    #[serde(default)]
    pub details: Vec<ErrorDetail>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetail {
    #[serde(rename = "@type", default)]
    pub type_url: String,
    pub error_code: Option<String>,
    pub reason: Option<String>,
    #[serde(default)]
    pub field_violations: Vec<FieldViolation>,
}

#[derive(Debug, Default, Deserialize)]
pub struct FieldViolation {
    #[serde(default)]
    pub field: String,
    #[serde(default)]
    pub description: String,
}

impl GatewayError {
    /// FCM-specific error code, falling back to a top-level status that is itself an FCM code
    fn provider_code(&self) -> Option<&str> {
        self.details
            .iter()
            .find(|d| d.type_url == FCM_ERROR_TYPE)
            .and_then(|d| d.error_code.as_deref())
            .or_else(|| {
                self.status
                    .as_deref()
                    .filter(|status| known_code(status).is_some())
            })
    }

    fn access_token_expired(&self) -> bool {
        let by_reason = self
            .details
            .iter()
            .filter(|d| d.type_url == ERROR_INFO_TYPE)
            .any(|d| d.reason.as_deref() == Some(ACCESS_TOKEN_EXPIRED));

        by_reason
            || self.message.as_deref().is_some_and(|m| {
                let m = m.to_ascii_lowercase();
                m.contains("access token expired") || m.contains("access_token_expired")
            })
    }

    /// Heuristic: the provider only says "invalid registration token" in prose.
    fn names_invalid_registration_token(&self) -> bool {
        let violation = self
            .details
            .iter()
            .filter(|d| d.type_url == BAD_REQUEST_TYPE)
            .flat_map(|d| d.field_violations.iter())
            .any(|v| v.field.ends_with("token") && mentions_registration_token(&v.description));

        violation || self.message.as_deref().is_some_and(mentions_registration_token)
    }
}

fn mentions_registration_token(text: &str) -> bool {
    let text = text.to_ascii_lowercase();
    text.contains("registration token")
        && (text.contains("invalid") || text.contains("not a valid"))
}

/// Fixed table of documented FCM v1 error codes
fn known_code(code: &str) -> Option<(ErrorCategory, &'static str)> {
    let entry = match code {
        "UNREGISTERED" => (
            ErrorCategory::Unregistered,
            "App instance was unregistered from FCM; the token is no longer valid",
        ),
        "INVALID_ARGUMENT" => (
            ErrorCategory::InvalidArgument,
            "Request parameters were invalid",
        ),
        "SENDER_ID_MISMATCH" => (
            ErrorCategory::SenderMismatch,
            "The authenticated sender ID differs from the sender ID for the registration token",
        ),
        "QUOTA_EXCEEDED" => (
            ErrorCategory::QuotaExceeded,
            "Sending limit exceeded for the message target",
        ),
        "UNAVAILABLE" => (
            ErrorCategory::ServerError,
            "The FCM server is overloaded or unavailable",
        ),
        "INTERNAL" => (
            ErrorCategory::ServerError,
            "An unknown internal error occurred on the FCM server",
        ),
        "THIRD_PARTY_AUTH_ERROR" => (
            ErrorCategory::ThirdPartyAuth,
            "APNs certificate or web push auth key was invalid or missing",
        ),
        "UNSPECIFIED_ERROR" => (
            ErrorCategory::Unknown,
            "No more information is available about this error",
        ),
        _ => return None,
    };
    Some(entry)
}

/// Classify a non-success gateway response.
pub fn classify(status: u16, body: &str) -> Classification {
    let parsed: GatewayErrorBody = serde_json::from_str(body).unwrap_or_default();
    classify_error(status, &parsed.error)
}

pub fn classify_error(status: u16, error: &GatewayError) -> Classification {
    if let Some(code) = error.provider_code() {
        let owned = Some(code.to_string());
        return match known_code(code) {
            Some((ErrorCategory::InvalidArgument, _))
                if error.names_invalid_registration_token() =>
            {
                Classification::new(
                    ErrorCategory::InvalidToken,
                    owned,
                    "The registration token is not a valid FCM registration token",
                )
            }
            Some((category, explanation)) => Classification::new(category, owned, explanation),
            None => Classification::new(
                ErrorCategory::Other(code.to_ascii_lowercase()),
                owned,
                error.message.clone().unwrap_or_else(|| code.to_string()),
            ),
        };
    }

    if error.access_token_expired() {
        return Classification::new(
            ErrorCategory::AuthExpired,
            Some(ACCESS_TOKEN_EXPIRED.to_string()),
            "The OAuth2 access token has expired",
        );
    }

    let fallback = match status {
        401 => Some((ErrorCategory::Unauthorized, "Gateway rejected the bearer token")),
        404 => Some((ErrorCategory::Unregistered, "Registration token not found")),
        400 => Some((ErrorCategory::BadRequest, "Gateway rejected the request")),
        s if s >= 500 => Some((ErrorCategory::ServerError, "Gateway server error")),
        _ => None,
    };

    match fallback {
        Some((category, explanation)) => Classification::new(
            category,
            None,
            error.message.clone().unwrap_or_else(|| explanation.to_string()),
        ),
        None => Classification::new(
            ErrorCategory::Unknown,
            None,
            error
                .message
                .clone()
                .unwrap_or_else(|| format!("Unexpected gateway status {}", status)),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fcm_error(status: u16, rpc_status: &str, code: &str) -> String {
        json!({
            "error": {
                "code": status,
                "message": "Requested entity was not found.",
                "status": rpc_status,
                "details": [{
                    "@type": FCM_ERROR_TYPE,
                    "errorCode": code
                }]
            }
        })
        .to_string()
    }

    #[test]
    fn test_unregistered_code() {
        let c = classify(404, &fcm_error(404, "NOT_FOUND", "UNREGISTERED"));
        assert_eq!(c.category, ErrorCategory::Unregistered);
        assert_eq!(c.code.as_deref(), Some("UNREGISTERED"));
        assert!(c.category.triggers_cleanup());
        assert!(!c.evict_access_token);
    }

    #[test]
    fn test_sender_mismatch_and_quota() {
        let c = classify(403, &fcm_error(403, "PERMISSION_DENIED", "SENDER_ID_MISMATCH"));
        assert_eq!(c.category, ErrorCategory::SenderMismatch);

        let c = classify(429, &fcm_error(429, "RESOURCE_EXHAUSTED", "QUOTA_EXCEEDED"));
        assert_eq!(c.category, ErrorCategory::QuotaExceeded);
        assert!(!c.category.triggers_cleanup());
    }

    #[test]
    fn test_structured_code_wins_over_status() {
        // 503 alone would be server_error; the structured code is authoritative
        let c = classify(503, &fcm_error(503, "UNAVAILABLE", "UNREGISTERED"));
        assert_eq!(c.category, ErrorCategory::Unregistered);
    }

    #[test]
    fn test_invalid_argument_naming_token_is_invalid_token() {
        let body = json!({
            "error": {
                "code": 400,
                "message": "The registration token is not a valid FCM registration token",
                "status": "INVALID_ARGUMENT",
                "details": [
                    {"@type": FCM_ERROR_TYPE, "errorCode": "INVALID_ARGUMENT"},
                    {
                        "@type": BAD_REQUEST_TYPE,
                        "fieldViolations": [{
                            "field": "message.token",
                            "description": "Invalid registration token"
                        }]
                    }
                ]
            }
        })
        .to_string();

        let c = classify(400, &body);
        assert_eq!(c.category, ErrorCategory::InvalidToken);
        assert!(c.category.triggers_cleanup());
    }

    #[test]
    fn test_invalid_argument_heuristic_limitation() {
        // Wording-based heuristic: a payload problem that does not mention the
        // registration token stays invalid_argument. If the provider rewords its
        // messages this may misclassify.
        let body = json!({
            "error": {
                "code": 400,
                "message": "Invalid value at 'message.data[0].value'",
                "status": "INVALID_ARGUMENT",
                "details": [
                    {"@type": FCM_ERROR_TYPE, "errorCode": "INVALID_ARGUMENT"},
                    {
                        "@type": BAD_REQUEST_TYPE,
                        "fieldViolations": [{
                            "field": "message.data[0].value",
                            "description": "Invalid value"
                        }]
                    }
                ]
            }
        })
        .to_string();

        let c = classify(400, &body);
        assert_eq!(c.category, ErrorCategory::InvalidArgument);
        assert!(!c.category.triggers_cleanup());
    }

    #[test]
    fn test_top_level_status_used_without_fcm_detail() {
        let body = json!({
            "error": {"code": 400, "message": "bad payload", "status": "INVALID_ARGUMENT"}
        })
        .to_string();
        assert_eq!(classify(400, &body).category, ErrorCategory::InvalidArgument);
    }

    #[test]
    fn test_unknown_code_passes_through_lowercased() {
        let c = classify(400, &fcm_error(400, "FAILED_PRECONDITION", "APNS_PAYLOAD_TOO_BIG"));
        assert_eq!(c.category, ErrorCategory::Other("apns_payload_too_big".into()));
        assert_eq!(c.category.to_string(), "apns_payload_too_big");
    }

    #[test]
    fn test_access_token_expired_reason() {
        let body = json!({
            "error": {
                "code": 401,
                "message": "Request had invalid authentication credentials.",
                "status": "UNAUTHENTICATED",
                "details": [{
                    "@type": ERROR_INFO_TYPE,
                    "reason": "ACCESS_TOKEN_EXPIRED",
                    "domain": "googleapis.com"
                }]
            }
        })
        .to_string();

        let c = classify(401, &body);
        assert_eq!(c.category, ErrorCategory::AuthExpired);
        assert!(c.evict_access_token);
    }

    #[test]
    fn test_bare_status_fallback() {
        let c = classify(401, "");
        assert_eq!(c.category, ErrorCategory::Unauthorized);
        assert!(c.evict_access_token);

        assert_eq!(classify(404, "not json").category, ErrorCategory::Unregistered);
        assert_eq!(classify(400, "{}").category, ErrorCategory::BadRequest);
        assert_eq!(classify(502, "<html>").category, ErrorCategory::ServerError);
        assert_eq!(classify(418, "").category, ErrorCategory::Unknown);
    }

    #[test]
    fn test_category_serialization() {
        let json = serde_json::to_string(&ErrorCategory::SenderMismatch).unwrap();
        assert_eq!(json, "\"sender_mismatch\"");
    }
}

//! OAuth2 access token cache
//!
//! Exchanges an RS256-signed service account assertion for a bearer token
//! and caches it until shortly before the provider's stated expiry.
//! Concurrent refreshes for the same identity are coalesced behind one
//! async mutex: callers that waited re-check the cache before exchanging.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::FcmConfig;
use crate::credentials::ServiceCredential;
use crate::errors::{FcmError, FcmResult};
use crate::retry::{send_with_retry, RetryConfig};

const GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Seconds shaved off the provider's lifetime to tolerate clock skew
const EXPIRY_MARGIN_SECS: i64 = 300;

const DEFAULT_LIFETIME_SECS: i64 = 3600;

/// One cache per credential identity, shared across clients in the process
static SHARED_CACHES: Lazy<DashMap<String, Arc<AccessTokenCache>>> = Lazy::new(DashMap::new);

/// Bearer token with its (margin-adjusted) expiry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub value: String,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// JWT Claims for Google OAuth2
#[derive(Debug, Serialize, Deserialize)]
pub struct JwtClaims {
    pub iss: String,
    pub sub: String,
    pub scope: String,
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
}

/// Google OAuth2 Token Response
#[derive(Debug, Deserialize)]
struct GoogleTokenResponse {
    access_token: Option<String>,
    expires_in: Option<i64>,
}

pub struct AccessTokenCache {
    credential: Arc<ServiceCredential>,
    oauth_url: String,
    scope: String,
    jwt_expiry: Duration,
    cache_enabled: bool,
    http_client: reqwest::Client,
    retry: RetryConfig,
    cached: Mutex<Option<AccessToken>>,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl AccessTokenCache {
    pub fn new(
        credential: Arc<ServiceCredential>,
        config: &FcmConfig,
        http_client: reqwest::Client,
    ) -> Self {
        Self {
            credential,
            oauth_url: config.oauth_url.clone(),
            scope: config.scope.clone(),
            jwt_expiry: config.jwt_expiry(),
            cache_enabled: config.cache_token,
            http_client,
            retry: RetryConfig::default(),
            cached: Mutex::new(None),
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Process-wide cache for this credential identity.
    ///
    /// Clients share a cache only when the key material and every setting
    /// that shapes the exchange match, so a rotated key or a different
    /// scope gets its own cache.
    pub fn shared(
        credential: Arc<ServiceCredential>,
        config: &FcmConfig,
        http_client: reqwest::Client,
    ) -> Arc<Self> {
        SHARED_CACHES
            .entry(Self::registry_key(&credential, config))
            .or_insert_with(|| Arc::new(Self::new(credential, config, http_client)))
            .clone()
    }

    fn registry_key(credential: &ServiceCredential, config: &FcmConfig) -> String {
        let key_fingerprint = hex::encode(Sha256::digest(credential.private_key().as_bytes()));

        format!(
            "{}:{}:{}:{}:{}:{}:{}:{}",
            config.cache_prefix,
            credential.client_email(),
            key_fingerprint,
            config.oauth_url,
            config.scope,
            config.jwt_expiry_secs,
            config.cache_token,
            config.timeout_secs
        )
    }

    /// Get a bearer token, exchanging a fresh assertion when the cache is empty or stale
    pub async fn get_token(&self) -> FcmResult<AccessToken> {
        if let Some(token) = self.cached_token() {
            return Ok(token);
        }

        let _guard = self.refresh_lock.lock().await;

        // Another caller may have refreshed while we waited
        if let Some(token) = self.cached_token() {
            debug!("Reusing access token refreshed by a concurrent caller");
            return Ok(token);
        }

        let token = self.exchange().await?;

        if self.cache_enabled {
            *self.cached.lock() = Some(token.clone());
        }

        Ok(token)
    }

    /// Currently cached, unexpired token
    pub fn cached_token(&self) -> Option<AccessToken> {
        if !self.cache_enabled {
            return None;
        }
        self.cached
            .lock()
            .as_ref()
            .filter(|token| !token.is_expired())
            .cloned()
    }

    /// Drop the cached token unconditionally
    pub fn invalidate(&self) {
        if self.cached.lock().take().is_some() {
            info!("Access token evicted for {}", self.credential.client_email());
        }
    }

    /// Drop the cached token only if it is the one the gateway rejected.
    ///
    /// Returns false when a concurrent caller already replaced it.
    pub fn invalidate_if_current(&self, rejected: &str) -> bool {
        let mut cached = self.cached.lock();
        match cached.as_ref() {
            Some(token) if token.value == rejected => {
                *cached = None;
                info!("Rejected access token evicted for {}", self.credential.client_email());
                true
            }
            _ => false,
        }
    }

    /// Build the RS256 assertion sent to the authorization endpoint
    pub fn sign_assertion(&self) -> FcmResult<String> {
        let now = Utc::now();
        let lifetime = ChronoDuration::seconds(self.jwt_expiry.as_secs() as i64);

        let claims = JwtClaims {
            iss: self.credential.client_email().to_string(),
            sub: self.credential.client_email().to_string(),
            scope: self.scope.clone(),
            aud: self.oauth_url.clone(),
            exp: (now + lifetime).timestamp(),
            iat: now.timestamp(),
        };

        let encoding_key = EncodingKey::from_rsa_pem(self.credential.private_key().as_bytes())
            .map_err(|e| FcmError::KeyParseError(e.to_string()))?;

        Ok(encode(&Header::new(Algorithm::RS256), &claims, &encoding_key)?)
    }

    async fn exchange(&self) -> FcmResult<AccessToken> {
        let assertion = self.sign_assertion()?;
        let params = [("grant_type", GRANT_TYPE), ("assertion", assertion.as_str())];

        debug!("Exchanging service account assertion at {}", self.oauth_url);

        let response = send_with_retry(&self.retry, || {
            self.http_client.post(&self.oauth_url).form(&params)
        })
        .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            warn!("Token request failed with status {}", status);
            return Err(FcmError::TokenRequestFailed {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GoogleTokenResponse = serde_json::from_str(&body)
            .map_err(|e| FcmError::TokenParseError(format!("{}: {}", e, body)))?;

        let value = parsed
            .access_token
            .filter(|token| !token.is_empty())
            .ok_or_else(|| FcmError::TokenParseError(format!("missing access_token: {}", body)))?;

        let lifetime = parsed.expires_in.unwrap_or(DEFAULT_LIFETIME_SECS);
        let expires_at =
            Utc::now() + ChronoDuration::seconds((lifetime - EXPIRY_MARGIN_SECS).max(0));

        info!(
            "Obtained access token for {} (cached until {})",
            self.credential.client_email(),
            expires_at
        );

        Ok(AccessToken { value, expires_at })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{decode, DecodingKey, Validation};
    use rsa::pkcs8::{DecodePrivateKey, EncodePublicKey, LineEnding};
    use rsa::{RsaPrivateKey, RsaPublicKey};

    const TEST_KEY: &str = include_str!("../tests/fixtures/service_account_key.pem");

    fn cache() -> AccessTokenCache {
        let credential = ServiceCredential::new(
            "test-project",
            "sender@test-project.iam.gserviceaccount.com",
            TEST_KEY,
        )
        .unwrap();
        AccessTokenCache::new(
            Arc::new(credential),
            &FcmConfig::default(),
            reqwest::Client::new(),
        )
    }

    #[test]
    fn test_assertion_is_rs256_with_expected_claims() {
        let cache = cache();
        let jwt = cache.sign_assertion().unwrap();

        let private = RsaPrivateKey::from_pkcs8_pem(TEST_KEY).unwrap();
        let public_pem = RsaPublicKey::from(&private)
            .to_public_key_pem(LineEnding::LF)
            .unwrap();

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[crate::config::DEFAULT_OAUTH_URL]);

        let decoded = decode::<JwtClaims>(
            &jwt,
            &DecodingKey::from_rsa_pem(public_pem.as_bytes()).unwrap(),
            &validation,
        )
        .unwrap();

        let claims = decoded.claims;
        assert_eq!(claims.iss, "sender@test-project.iam.gserviceaccount.com");
        assert_eq!(claims.sub, claims.iss);
        assert_eq!(claims.scope, crate::config::DEFAULT_SCOPE);
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[test]
    fn test_invalidate_if_current_only_evicts_matching_value() {
        let cache = cache();
        *cache.cached.lock() = Some(AccessToken {
            value: "fresh".into(),
            expires_at: Utc::now() + ChronoDuration::minutes(30),
        });

        assert!(!cache.invalidate_if_current("stale"));
        assert_eq!(cache.cached_token().unwrap().value, "fresh");

        assert!(cache.invalidate_if_current("fresh"));
        assert!(cache.cached_token().is_none());
    }

    #[test]
    fn test_expired_token_is_not_served() {
        let cache = cache();
        *cache.cached.lock() = Some(AccessToken {
            value: "old".into(),
            expires_at: Utc::now() - ChronoDuration::seconds(1),
        });
        assert!(cache.cached_token().is_none());
    }
}

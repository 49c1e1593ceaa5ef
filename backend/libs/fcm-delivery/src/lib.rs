//! FCM Delivery Engine
//!
//! Firebase Cloud Messaging (HTTP v1) client for sending push notifications
//! to Android, iOS and Web devices.
//!
//! It handles:
//! - OAuth2 token generation from a service account, with caching and
//!   coalesced refresh
//! - Message building in notification, data or combined mode
//! - Delivery with bounded retry when the access token is rejected
//! - Classification of gateway errors
//! - Invalid-token cleanup signalling, deduplicated per token
//! - Dry-run token validation
//!
//! # Example
//!
//! ```no_run
//! use fcm_delivery::{FcmClient, FcmConfig, Message};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), fcm_delivery::FcmError> {
//!     let client = FcmClient::try_new(FcmConfig::from_env()?)?;
//!
//!     let mut invalid = client.subscribe_invalid_tokens();
//!     tokio::spawn(async move {
//!         while let Ok(event) = invalid.recv().await {
//!             // DELETE FROM devices WHERE {event.token_column} = {event.token}
//!             let _ = event;
//!         }
//!     });
//!
//!     let message = Message::new().title("Hi").body("there").data("k", "v");
//!     let summary = client
//!         .send_batch(&["token-1".to_string(), "token-2".to_string()], &message)
//!         .await;
//!     println!("{} delivered, {} invalid", summary.success_count, summary.invalid_tokens.len());
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod classifier;
pub mod cleanup;
pub mod client;
pub mod config;
pub mod credentials;
pub mod errors;
pub mod message;
pub mod models;
pub mod retry;
pub mod validator;

pub use auth::{AccessToken, AccessTokenCache};
pub use classifier::{classify, Classification, ErrorCategory};
pub use cleanup::{
    CleanupLock, CleanupSignal, InvalidTokenEvent, InvalidTokenHandler, LocalCleanupLock,
    RedisCleanupLock, TokenStore,
};
pub use client::FcmClient;
pub use config::{ConfigState, FcmConfig};
pub use credentials::{ServiceAccountKey, ServiceCredential};
pub use errors::{FcmError, FcmResult};
pub use message::{AndroidPriority, IntoMessage, Message, MessageMode};
pub use models::{BatchSummary, SendResult, TokenValidation};
pub use validator::check_token_structure;

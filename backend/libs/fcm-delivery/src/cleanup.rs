//! Invalid-token cleanup signal
//!
//! The engine never mutates a token store by itself. Permanently invalid
//! tokens are broadcast as [`InvalidTokenEvent`]s; subscribers delete them
//! from whatever store the host maintains.
//!
//! ```text
//! send_batch ──► classify ──► notify_invalid(token)
//!                                  │ lock "{prefix}:cleanup:{sha256(token)}" (TTL)
//!                                  ▼
//!                         broadcast::Sender ──► subscribers / handlers
//! ```
//!
//! Duplicate emissions for the same token within the lock TTL are dropped,
//! so concurrent sends that all hit the same stale token produce one event.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::FcmConfig;
use crate::errors::FcmResult;
use crate::models::token_prefix;

const CHANNEL_CAPACITY: usize = 256;

/// Local lock entries kept before expired ones are swept
const PURGE_THRESHOLD: usize = 1024;

/// Payload delivered to cleanup subscribers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidTokenEvent {
    pub token: String,
    /// Column the host stores tokens in
    pub token_column: String,
}

/// Short-lived mutual exclusion keyed by token hash
#[async_trait]
pub trait CleanupLock: Send + Sync {
    /// Returns true if the caller acquired the lock for `key`
    async fn try_acquire(&self, key: &str, ttl: Duration) -> bool;
}

/// Subscriber callback run for every emitted event
#[async_trait]
pub trait InvalidTokenHandler: Send + Sync {
    async fn handle(&self, event: InvalidTokenEvent) -> FcmResult<()>;
}

/// Caller-supplied token collection for direct deletion
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Delete the given tokens, returning how many were removed
    async fn delete_tokens(&self, tokens: &[String]) -> FcmResult<u64>;
}

/// Process-local lock backed by a DashMap of acquisition times
#[derive(Debug, Default)]
pub struct LocalCleanupLock {
    entries: DashMap<String, Instant>,
}

impl LocalCleanupLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop expired entries so the map does not grow without bound
    pub fn purge_expired(&self, ttl: Duration) {
        self.entries.retain(|_, acquired| acquired.elapsed() < ttl);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CleanupLock for LocalCleanupLock {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> bool {
        let acquired = match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut held) => {
                if held.get().elapsed() >= ttl {
                    held.insert(Instant::now());
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(Instant::now());
                true
            }
        };

        if acquired && self.entries.len() > PURGE_THRESHOLD {
            self.purge_expired(ttl);
        }

        acquired
    }
}

/// Distributed lock using `SET key 1 NX EX ttl`
#[derive(Clone)]
pub struct RedisCleanupLock {
    redis: Arc<Mutex<ConnectionManager>>,
}

impl RedisCleanupLock {
    pub fn new(redis: Arc<Mutex<ConnectionManager>>) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl CleanupLock for RedisCleanupLock {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> bool {
        let ttl_secs = ttl.as_secs().max(1);

        let result: redis::RedisResult<Option<String>> = {
            let mut conn = self.redis.lock().await;
            redis::cmd("SET")
                .arg(key)
                .arg("1")
                .arg("NX")
                .arg("EX")
                .arg(ttl_secs)
                .query_async(&mut *conn)
                .await
        };

        match result {
            Ok(reply) => reply.is_some(),
            Err(e) => {
                // Fail open: duplicates are tolerated, a lost signal is not
                warn!("Redis cleanup lock failed for {}: {} - allowing signal", key, e);
                true
            }
        }
    }
}

/// Broadcast signal for invalid tokens
pub struct CleanupSignal {
    sender: broadcast::Sender<InvalidTokenEvent>,
    lock: Arc<dyn CleanupLock>,
    key_prefix: String,
    ttl: Duration,
    token_column: String,
}

impl CleanupSignal {
    pub fn new(config: &FcmConfig) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender,
            lock: Arc::new(LocalCleanupLock::new()),
            key_prefix: config.cache_prefix.clone(),
            ttl: config.cleanup_lock_ttl(),
            token_column: config.token_column.clone(),
        }
    }

    /// Replace the process-local lock, e.g. with [`RedisCleanupLock`]
    pub fn with_lock(mut self, lock: Arc<dyn CleanupLock>) -> Self {
        self.lock = lock;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<InvalidTokenEvent> {
        self.sender.subscribe()
    }

    /// Lock key for a token; the raw token never leaves this function
    pub fn lock_key(&self, token: &str) -> String {
        let digest = Sha256::digest(token.as_bytes());
        format!("{}:cleanup:{}", self.key_prefix, hex::encode(digest))
    }

    /// Emit an invalid-token event unless one was emitted for this token within the TTL.
    ///
    /// Returns true if the event was emitted.
    pub async fn notify_invalid(&self, token: &str) -> bool {
        let key = self.lock_key(token);

        if !self.lock.try_acquire(&key, self.ttl).await {
            debug!("Cleanup signal for token {} already emitted", token_prefix(token));
            return false;
        }

        let event = InvalidTokenEvent {
            token: token.to_string(),
            token_column: self.token_column.clone(),
        };

        match self.sender.send(event) {
            Ok(receivers) => info!(
                "Invalid token {} signalled to {} subscriber(s)",
                token_prefix(token),
                receivers
            ),
            Err(_) => warn!(
                "Invalid token {} signalled with no subscribers",
                token_prefix(token)
            ),
        }

        true
    }

    /// Run `handler` for every event until the signal is dropped
    pub fn spawn_handler(&self, handler: Arc<dyn InvalidTokenHandler>) -> JoinHandle<()> {
        let mut receiver = self.subscribe();

        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => {
                        let prefix = token_prefix(&event.token);
                        if let Err(e) = handler.handle(event).await {
                            warn!("Cleanup handler failed for token {}: {}", prefix, e);
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Cleanup handler lagged, {} event(s) skipped", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}

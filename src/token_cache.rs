// src/token_cache.rs
// Bearer token lifecycle: acquisition, caching, refresh, single-flight
// coalescing, explicit invalidate (§4.E).
//
// Grounded on the teacher's mix of `tokio::sync::RwLock` for the
// async-critical cached value and `tokio::sync::watch` for broadcasting a
// one-shot result to an arbitrary number of waiters, the way
// `background/mod.rs` and `api/ws/chat/heartbeat.rs` use `watch::channel` to
// fan a single state change out to however many listeners are attached at
// the time. A `watch::Receiver` is `Clone`, so any caller that arrives while
// a refresh is in flight can subscribe to the same result instead of racing
// a second refresh.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, info};

use crate::config::{AuthMethod, ProviderConfig};
use crate::error::{CoreError, CoreResult};
use crate::transport::{TokenRefreshRequest, UpstreamTransport};

const EXPIRY_SAFETY_MARGIN_SECS: i64 = 60;

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_valid(&self, now: DateTime<Utc>) -> bool {
        !self.access_token.is_empty() && self.expires_at > now
    }
}

/// Result of an in-flight refresh, broadcast to every subscriber once the
/// refresh that owns the slot completes. `None` means still in progress.
type RefreshSlot = Option<Result<String, String>>;

/// In-flight refresh coalescing: the first caller to observe an expired
/// cache performs the refresh; any number of concurrent callers subscribe to
/// its result instead of issuing their own request (§4.E "Concurrency").
struct RefreshCoordinator {
    in_flight: Mutex<Option<watch::Receiver<RefreshSlot>>>,
}

impl RefreshCoordinator {
    fn new() -> Self {
        Self {
            in_flight: Mutex::new(None),
        }
    }
}

pub struct TokenCache {
    config: ProviderConfig,
    transport: Arc<dyn UpstreamTransport>,
    cached: RwLock<Option<CachedToken>>,
    coordinator: RefreshCoordinator,
}

impl TokenCache {
    pub fn new(config: ProviderConfig, transport: Arc<dyn UpstreamTransport>) -> Self {
        Self {
            config,
            transport,
            cached: RwLock::new(None),
            coordinator: RefreshCoordinator::new(),
        }
    }

    /// Returns a valid access token, refreshing if the cache is empty or
    /// past `expires_at`. Concurrent expired-cache callers coalesce onto a
    /// single refresh.
    pub async fn get(&self) -> CoreResult<String> {
        {
            let guard = self.cached.read().await;
            if let Some(token) = guard.as_ref() {
                if token.is_valid(Utc::now()) {
                    return Ok(token.access_token.clone());
                }
            }
        }

        self.refresh_coalesced().await
    }

    pub async fn invalidate(&self) {
        *self.cached.write().await = None;
    }

    async fn refresh_coalesced(&self) -> CoreResult<String> {
        let mut coordinator_guard = self.coordinator.in_flight.lock().await;

        if let Some(receiver) = coordinator_guard.as_ref() {
            // Someone else is already refreshing (or just finished, and
            // hasn't cleared the slot yet). Cloning the receiver lets any
            // number of waiters subscribe to the same result instead of
            // racing a second refresh.
            let mut receiver = receiver.clone();
            drop(coordinator_guard);
            return await_watch(&mut receiver).await;
        }

        let (tx, rx) = watch::channel(None);
        *coordinator_guard = Some(rx);
        drop(coordinator_guard);

        debug!("token cache: performing refresh");
        let outcome = self.do_refresh().await;

        let mut coordinator_guard = self.coordinator.in_flight.lock().await;
        *coordinator_guard = None;
        drop(coordinator_guard);

        let to_send = outcome
            .as_ref()
            .map(|t| t.clone())
            .map_err(|e| e.to_string());
        let _ = tx.send(Some(to_send));

        outcome
    }

    async fn do_refresh(&self) -> CoreResult<String> {
        let request = match self.config.auth_method {
            AuthMethod::Social => TokenRefreshRequest::Social {
                url: self.config.refresh_token_url().to_string(),
                refresh_token: self.config.refresh_token.clone(),
            },
            AuthMethod::Idc => TokenRefreshRequest::Idc {
                url: self.config.oidc_token_url().to_string(),
                client_id: self
                    .config
                    .client_id
                    .clone()
                    .ok_or_else(|| CoreError::auth_failure_terminal("idc auth requires client_id"))?,
                client_secret: self
                    .config
                    .client_secret
                    .clone()
                    .ok_or_else(|| CoreError::auth_failure_terminal("idc auth requires client_secret"))?,
                refresh_token: self.config.refresh_token.clone(),
            },
        };

        let response = self.transport.refresh_token(request).await.map_err(|e| {
            CoreError::auth_failure(format!("failed to get access token: {e}"))
        })?;

        let expires_at =
            Utc::now() + chrono::Duration::seconds(response.expires_in - EXPIRY_SAFETY_MARGIN_SECS);

        *self.cached.write().await = Some(CachedToken {
            access_token: response.access_token.clone(),
            expires_at,
        });

        info!("token cache: refreshed, expires_at={}", expires_at);
        Ok(response.access_token)
    }
}

async fn await_watch(receiver: &mut watch::Receiver<RefreshSlot>) -> CoreResult<String> {
    loop {
        if let Some(result) = receiver.borrow().clone() {
            return match result {
                Ok(token) => Ok(token),
                Err(msg) => Err(CoreError::auth_failure(msg)),
            };
        }
        if receiver.changed().await.is_err() {
            return Err(CoreError::auth_failure(
                "token refresh coordinator dropped before completion",
            ));
        }
    }
}

//! API key store shared by concurrent calls.
//!
//! Calls read the current key and, on an auth failure, ask the store for a new
//! one. Refreshes are coalesced: while one is in flight, every other caller
//! waits on the same future instead of starting its own.

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use reqwest::header::AUTHORIZATION;
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::client::ClientError;
use crate::config::Config;
use crate::options::SecretString;

/// Source of replacement keys.
#[async_trait]
pub trait KeyRefresher: Send + Sync {
    async fn refresh(&self, current: Option<SecretString>) -> Result<SecretString, ClientError>;
}

type RefreshFuture = Shared<BoxFuture<'static, Result<SecretString, String>>>;

pub struct KeyStore {
    current: RwLock<Option<SecretString>>,
    refresher: Option<Arc<dyn KeyRefresher>>,
    in_flight: Mutex<Option<(u64, RefreshFuture)>>,
    next_id: AtomicU64,
}

impl KeyStore {
    /// A store without a refresher; `refresh` always fails.
    pub fn new() -> Self {
        Self {
            current: RwLock::new(None),
            refresher: None,
            in_flight: Mutex::new(None),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn with_refresher(refresher: Arc<dyn KeyRefresher>) -> Self {
        Self {
            refresher: Some(refresher),
            ..Self::new()
        }
    }

    /// Store with an [`HttpKeyRefresher`] when the config names a refresh endpoint.
    pub fn from_config(config: &Config) -> Self {
        match HttpKeyRefresher::from_config(config) {
            Some(refresher) => Self::with_refresher(Arc::new(refresher)),
            None => Self::new(),
        }
    }

    /// Most recently refreshed key, if any.
    pub fn current(&self) -> Option<SecretString> {
        self.current.read().clone()
    }

    pub fn set_current(&self, key: SecretString) {
        *self.current.write() = Some(key);
    }

    pub fn can_refresh(&self) -> bool {
        self.refresher.is_some()
    }

    /// Obtain a new key, joining a refresh already in flight if there is one.
    pub async fn refresh(&self) -> Result<SecretString, ClientError> {
        let refresher = self
            .refresher
            .clone()
            .ok_or_else(|| ClientError::KeyRefresh("no key refresher configured".to_string()))?;

        let (id, refresh) = {
            let mut slot = self.in_flight.lock();
            let joined = slot.as_ref().map(|(id, refresh)| (*id, refresh.clone()));
            match joined {
                Some(joined) => {
                    debug!("joining in-flight key refresh");
                    joined
                }
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
                    let current = self.current();
                    let refresh = async move {
                        refresher.refresh(current).await.map_err(|e| e.to_string())
                    }
                    .boxed()
                    .shared();
                    *slot = Some((id, refresh.clone()));
                    (id, refresh)
                }
            }
        };

        let result = refresh.await;

        {
            let mut slot = self.in_flight.lock();
            if slot.as_ref().is_some_and(|(current, _)| *current == id) {
                *slot = None;
            }
        }

        match result {
            Ok(key) => {
                self.set_current(key.clone());
                Ok(key)
            }
            Err(message) => Err(ClientError::KeyRefresh(message)),
        }
    }
}

impl Default for KeyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyStore")
            .field("has_current", &self.current.read().is_some())
            .field("can_refresh", &self.can_refresh())
            .finish()
    }
}

/// Refreshes keys through a key-management HTTP endpoint.
///
/// Sends `POST <endpoint>` with the refresh token as a bearer credential and
/// accepts either `{"key": "..."}` or `{"key": {"key": "..."}}`.
#[derive(Debug, Clone)]
pub struct HttpKeyRefresher {
    client: reqwest::Client,
    endpoint: String,
    token: SecretString,
}

impl HttpKeyRefresher {
    pub fn new(endpoint: impl Into<String>, token: impl Into<SecretString>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            token: token.into(),
        }
    }

    pub fn from_config(config: &Config) -> Option<Self> {
        let endpoint = config.refresh_endpoint.clone()?;
        let token = config.refresh_token.clone()?;
        Some(Self::new(endpoint, token))
    }
}

#[derive(Debug, Deserialize)]
struct RefreshReply {
    key: IssuedKey,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum IssuedKey {
    Plain(String),
    Nested { key: String },
}

#[async_trait]
impl KeyRefresher for HttpKeyRefresher {
    async fn refresh(&self, _current: Option<SecretString>) -> Result<SecretString, ClientError> {
        info!(endpoint = %self.endpoint, "requesting a new API key");

        let response = self
            .client
            .post(&self.endpoint)
            .header(AUTHORIZATION, format!("Bearer {}", self.token.expose_secret()))
            .json(&serde_json::json!({}))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::KeyRefresh(format!(
                "key refresh failed with HTTP {status}: {body}"
            )));
        }

        let reply: RefreshReply = response.json().await?;
        let key = match reply.key {
            IssuedKey::Plain(key) | IssuedKey::Nested { key } => key,
        };
        Ok(SecretString::new(key))
    }
}

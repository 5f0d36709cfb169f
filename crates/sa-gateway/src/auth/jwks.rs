//! JWKS cache for the issuer's signing keys.
//!
//! Keys are fetched from the provider's `jwks_uri` on first use and cached by
//! `kid` with a TTL. An unknown `kid` or an expired cache triggers one
//! on-demand refresh. Tokens without a `kid` take a snapshot of the whole set.
//!
//! # Concurrency
//!
//! Refreshes are single-flight. A generation counter is bumped on every
//! refresh attempt; a caller that observed generation `n` and then finds the
//! refresh lock holder already moved past `n` reuses that outcome instead of
//! fetching again. A burst of requests that all miss produces one fetch.

use crate::errors::VerifyError;
use crate::observability::metrics::record_jwks_refresh;
use jsonwebtoken::jwk::Jwk;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::instrument;

/// Default cache TTL (5 minutes).
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// Cached key set.
struct CachedJwks {
    /// Map of key ID to JWK.
    keys: HashMap<String, Jwk>,

    /// `None` until the first successful fetch.
    expires_at: Option<Instant>,

    generation: u64,
}

/// Outcome of the most recent refresh attempt.
struct RefreshState {
    generation: u64,
    outcome: Result<(), VerifyError>,
}

/// Thread-safe signing-key cache with single-flight refresh.
pub struct JwksCache {
    jwks_uri: String,

    http_client: reqwest::Client,

    cache: RwLock<CachedJwks>,

    refresh: Mutex<RefreshState>,

    cache_ttl: Duration,
}

impl JwksCache {
    /// Create an empty cache. Nothing is fetched until the first lookup.
    pub fn new(http_client: reqwest::Client, jwks_uri: String, cache_ttl: Duration) -> Self {
        Self {
            jwks_uri,
            http_client,
            cache: RwLock::new(CachedJwks {
                keys: HashMap::new(),
                expires_at: None,
                generation: 0,
            }),
            refresh: Mutex::new(RefreshState {
                generation: 0,
                outcome: Ok(()),
            }),
            cache_ttl,
        }
    }

    pub fn jwks_uri(&self) -> &str {
        &self.jwks_uri
    }

    /// Get a JWK by key ID, refreshing on miss or expiry.
    ///
    /// If the refresh fails but a stale copy of the key is still cached, the
    /// stale key is returned.
    ///
    /// # Errors
    ///
    /// - `KeySetFetch` if the key is not cached and the refresh failed
    /// - `UnknownKey` if the key is absent even after a refresh
    #[instrument(skip(self), fields(kid = %kid))]
    pub async fn get_key(&self, kid: &str) -> Result<Jwk, VerifyError> {
        let seen_generation = {
            let cache = self.cache.read().await;
            let fresh = cache.expires_at.is_some_and(|t| t > Instant::now());
            if fresh {
                if let Some(key) = cache.keys.get(kid) {
                    tracing::debug!(target: "sa.auth.jwks", kid = %kid, "JWKS cache hit");
                    return Ok(key.clone());
                }
                tracing::debug!(target: "sa.auth.jwks", kid = %kid, "Key not found in JWKS cache");
            }
            cache.generation
        };

        let refreshed = self.refresh_after(seen_generation).await;

        let cache = self.cache.read().await;
        if let Some(key) = cache.keys.get(kid) {
            if let Err(e) = &refreshed {
                tracing::warn!(
                    target: "sa.auth.jwks",
                    kid = %kid,
                    error = %e,
                    "JWKS refresh failed, using stale key"
                );
            }
            return Ok(key.clone());
        }

        refreshed?;

        tracing::warn!(target: "sa.auth.jwks", kid = %kid, "Key not found in JWKS after refresh");
        Err(VerifyError::UnknownKey)
    }

    /// Every cached key, for tokens that name no `kid`.
    ///
    /// Refreshes first if the cache is expired or empty. A failed refresh
    /// still yields the stale set when one is held.
    ///
    /// # Errors
    ///
    /// `KeySetFetch` if nothing is cached and the refresh failed.
    #[instrument(skip(self))]
    pub async fn keys(&self) -> Result<Vec<Jwk>, VerifyError> {
        let seen_generation = {
            let cache = self.cache.read().await;
            let fresh = cache.expires_at.is_some_and(|t| t > Instant::now());
            if fresh && !cache.keys.is_empty() {
                return Ok(cache.keys.values().cloned().collect());
            }
            cache.generation
        };

        self.snapshot_after(seen_generation).await
    }

    /// Refresh (coalesced with concurrent callers), then return every key.
    ///
    /// # Errors
    ///
    /// `KeySetFetch` if nothing is cached and the refresh failed.
    #[instrument(skip(self))]
    pub async fn refreshed_keys(&self) -> Result<Vec<Jwk>, VerifyError> {
        let seen_generation = self.cache.read().await.generation;
        self.snapshot_after(seen_generation).await
    }

    async fn snapshot_after(&self, seen_generation: u64) -> Result<Vec<Jwk>, VerifyError> {
        let refreshed = self.refresh_after(seen_generation).await;

        let cache = self.cache.read().await;
        match refreshed {
            Err(e) if cache.keys.is_empty() => Err(e),
            Err(e) => {
                tracing::warn!(
                    target: "sa.auth.jwks",
                    error = %e,
                    "JWKS refresh failed, using stale key set"
                );
                Ok(cache.keys.values().cloned().collect())
            }
            Ok(()) => Ok(cache.keys.values().cloned().collect()),
        }
    }

    /// Refresh unless another caller already refreshed past `seen_generation`.
    async fn refresh_after(&self, seen_generation: u64) -> Result<(), VerifyError> {
        let mut state = self.refresh.lock().await;
        if state.generation != seen_generation {
            tracing::debug!(target: "sa.auth.jwks", "JWKS refreshed by concurrent caller");
            return state.outcome.clone();
        }

        let fetched = self.fetch().await;

        let mut cache = self.cache.write().await;
        cache.generation += 1;
        let outcome = match fetched {
            Ok(keys) => {
                tracing::info!(
                    target: "sa.auth.jwks",
                    key_count = keys.len(),
                    "JWKS cache refreshed"
                );
                cache.keys = keys;
                cache.expires_at = Some(Instant::now() + self.cache_ttl);
                record_jwks_refresh("success");
                Ok(())
            }
            Err(e) => {
                record_jwks_refresh("error");
                Err(e)
            }
        };

        state.generation = cache.generation;
        state.outcome = outcome.clone();
        outcome
    }

    /// Fetch and parse the key set. Keys without a `kid` or of an unknown
    /// type are skipped.
    #[instrument(skip(self))]
    async fn fetch(&self) -> Result<HashMap<String, Jwk>, VerifyError> {
        tracing::debug!(target: "sa.auth.jwks", url = %self.jwks_uri, "Fetching JWKS");

        let response = self
            .http_client
            .get(&self.jwks_uri)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(target: "sa.auth.jwks", error = %e, "Failed to fetch JWKS");
                VerifyError::KeySetFetch("request failed".to_string())
            })?;

        if !response.status().is_success() {
            tracing::error!(
                target: "sa.auth.jwks",
                status = %response.status(),
                "JWKS endpoint returned error"
            );
            return Err(VerifyError::KeySetFetch(format!(
                "status {}",
                response.status().as_u16()
            )));
        }

        let body: serde_json::Value = response.json().await.map_err(|e| {
            tracing::error!(target: "sa.auth.jwks", error = %e, "Failed to parse JWKS response");
            VerifyError::KeySetFetch("invalid key set".to_string())
        })?;

        parse_key_set(&body)
    }
}

fn parse_key_set(body: &serde_json::Value) -> Result<HashMap<String, Jwk>, VerifyError> {
    let entries = body
        .get("keys")
        .and_then(serde_json::Value::as_array)
        .ok_or_else(|| {
            tracing::error!(target: "sa.auth.jwks", "JWKS response has no keys array");
            VerifyError::KeySetFetch("invalid key set".to_string())
        })?;

    let mut keys = HashMap::with_capacity(entries.len());
    for entry in entries {
        match serde_json::from_value::<Jwk>(entry.clone()) {
            Ok(jwk) => match jwk.common.key_id.clone() {
                Some(kid) if !kid.is_empty() => {
                    keys.insert(kid, jwk);
                }
                _ => {
                    tracing::debug!(target: "sa.auth.jwks", "Skipping JWK without kid");
                }
            },
            Err(e) => {
                tracing::debug!(target: "sa.auth.jwks", error = %e, "Skipping unparseable JWK");
            }
        }
    }

    Ok(keys)
}

//! Signature verification and claim extraction.
//!
//! Decoders only prove the token was signed by a trusted key and parse its
//! claims. Library-side `exp`/`aud`/`iss` validation is switched off so that
//! [`crate::validate_claims`] stays the single place those rules live.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use jsonwebtoken::jwk::{Jwk, JwkSet};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

use crate::claims::IdentityClaims;

pub const DEFAULT_GOOGLE_JWKS_URL: &str = "https://www.googleapis.com/oauth2/v3/certs";
const DEFAULT_JWKS_TTL: Duration = Duration::from_secs(300);
const JWKS_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("jwks refresh failed: {0}")]
    JwksRefresh(String),
}

#[async_trait]
pub trait TokenDecoder: Send + Sync {
    async fn decode(&self, token: &str) -> Result<IdentityClaims, DecodeError>;
}

fn claims_only_validation(algorithm: Algorithm) -> Validation {
    let mut validation = Validation::new(algorithm);
    validation.algorithms = vec![algorithm];
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();
    validation
}

/// Shared-secret decoder for the emulator and tests.
#[derive(Clone)]
pub struct Hs256TokenDecoder {
    key: DecodingKey,
}

impl Hs256TokenDecoder {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_ref()),
        }
    }
}

impl core::fmt::Debug for Hs256TokenDecoder {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Hs256TokenDecoder").finish_non_exhaustive()
    }
}

#[async_trait]
impl TokenDecoder for Hs256TokenDecoder {
    async fn decode(&self, token: &str) -> Result<IdentityClaims, DecodeError> {
        decode::<IdentityClaims>(token, &self.key, &claims_only_validation(Algorithm::HS256))
            .map(|data| data.claims)
            .map_err(|e| DecodeError::InvalidToken(e.to_string()))
    }
}

#[derive(Debug, Clone)]
struct CachedJwks {
    set: Arc<JwkSet>,
    fetched_at: Instant,
}

impl CachedJwks {
    fn is_fresh(&self, ttl: Duration) -> bool {
        self.fetched_at.elapsed() < ttl
    }
}

/// RS256 decoder backed by a JWKS endpoint (Google's by default).
///
/// Keys are cached for `ttl`; an unknown `kid` forces one refresh.
#[derive(Debug)]
pub struct JwksTokenDecoder {
    jwks_url: String,
    ttl: Duration,
    cache: RwLock<Option<CachedJwks>>,
    http: reqwest::Client,
}

impl JwksTokenDecoder {
    pub fn new(jwks_url: impl Into<String>, ttl: Duration) -> Result<Self, DecodeError> {
        let http = reqwest::Client::builder()
            .timeout(JWKS_HTTP_TIMEOUT)
            .build()
            .map_err(|e| DecodeError::JwksRefresh(format!("failed to build http client: {e}")))?;

        Ok(Self {
            jwks_url: jwks_url.into(),
            ttl,
            cache: RwLock::new(None),
            http,
        })
    }

    pub fn google() -> Result<Self, DecodeError> {
        Self::new(DEFAULT_GOOGLE_JWKS_URL, DEFAULT_JWKS_TTL)
    }

    async fn get_jwk(&self, kid: &str) -> Result<Option<Jwk>, DecodeError> {
        if let Some(jwk) = self.cached_jwk(kid).await {
            return Ok(Some(jwk));
        }

        self.refresh().await?;
        Ok(self.cached_jwk(kid).await)
    }

    async fn cached_jwk(&self, kid: &str) -> Option<Jwk> {
        let cache = self.cache.read().await;
        let set = match cache.as_ref() {
            Some(cached) if cached.is_fresh(self.ttl) => Arc::clone(&cached.set),
            _ => return None,
        };
        drop(cache);

        set.keys
            .iter()
            .find(|jwk| jwk.common.key_id.as_deref() == Some(kid))
            .cloned()
    }

    async fn refresh(&self) -> Result<(), DecodeError> {
        debug!(url = %self.jwks_url, "refreshing jwks");
        let set = self
            .http
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|e| DecodeError::JwksRefresh(e.to_string()))?
            .error_for_status()
            .map_err(|e| DecodeError::JwksRefresh(e.to_string()))?
            .json::<JwkSet>()
            .await
            .map_err(|e| DecodeError::JwksRefresh(e.to_string()))?;

        *self.cache.write().await = Some(CachedJwks {
            set: Arc::new(set),
            fetched_at: Instant::now(),
        });
        Ok(())
    }
}

#[async_trait]
impl TokenDecoder for JwksTokenDecoder {
    async fn decode(&self, token: &str) -> Result<IdentityClaims, DecodeError> {
        let header = decode_header(token).map_err(|e| DecodeError::InvalidToken(e.to_string()))?;
        if header.alg != Algorithm::RS256 {
            return Err(DecodeError::InvalidToken(format!(
                "unsupported algorithm: {:?}",
                header.alg
            )));
        }
        let kid = header
            .kid
            .ok_or_else(|| DecodeError::InvalidToken("missing kid".to_string()))?;

        let jwk = self
            .get_jwk(&kid)
            .await?
            .ok_or_else(|| DecodeError::InvalidToken("unknown kid".to_string()))?;
        let key = DecodingKey::from_jwk(&jwk)
            .map_err(|e| DecodeError::InvalidToken(format!("invalid jwk: {e}")))?;

        decode::<IdentityClaims>(token, &key, &claims_only_validation(Algorithm::RS256))
            .map(|data| data.claims)
            .map_err(|e| DecodeError::InvalidToken(e.to_string()))
    }
}

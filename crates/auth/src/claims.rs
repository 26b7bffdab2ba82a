use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use taskrelay_core::RuntimeMode;

/// Issuers Google uses for OIDC tokens attached to Cloud Tasks pushes.
pub const GOOGLE_ISSUERS: [&str; 2] = ["https://accounts.google.com", "accounts.google.com"];

/// Issuer the local Cloud Tasks emulator puts in its tokens.
pub const EMULATOR_ISSUER: &str = "http://localhost:8980";

/// `aud` may be a single string or an array of strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    /// Exact string equality. An array matches only when it holds exactly the
    /// expected value.
    pub fn matches(&self, expected: &str) -> bool {
        match self {
            Audience::One(aud) => aud == expected,
            Audience::Many(auds) => auds.len() == 1 && auds[0] == expected,
        }
    }
}

impl From<&str> for Audience {
    fn from(value: &str) -> Self {
        Audience::One(value.to_string())
    }
}

/// Decoded identity token claims (transport-agnostic).
///
/// Only `iss`, `aud` and `exp` take part in validation; `sub` and `email`
/// are carried for logging and caller allow-lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityClaims {
    pub iss: String,
    pub aud: Audience,
    /// Expiry, seconds since the Unix epoch.
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl IdentityClaims {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.exp, 0)
    }
}

/// Set of accepted `iss` values, fixed per runtime mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuerAllowList {
    issuers: BTreeSet<String>,
}

impl IssuerAllowList {
    pub fn new<I, S>(issuers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            issuers: issuers.into_iter().map(Into::into).collect(),
        }
    }

    pub fn for_mode(mode: RuntimeMode) -> Self {
        match mode {
            RuntimeMode::Production => Self::new(GOOGLE_ISSUERS),
            RuntimeMode::Emulated => Self::new([EMULATOR_ISSUER]),
        }
    }

    pub fn allows(&self, issuer: &str) -> bool {
        self.issuers.contains(issuer)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenValidationError {
    #[error("issuer `{0}` is not trusted")]
    Issuer(String),

    #[error("audience does not match the handler url")]
    Audience,

    #[error("token has expired")]
    Expired,
}

/// Deterministically validate identity token claims.
///
/// This validates the *claims* only; signatures are checked by the decoder.
/// A token whose `exp` equals `now` is still accepted.
pub fn validate_claims(
    claims: &IdentityClaims,
    issuers: &IssuerAllowList,
    audience: &str,
    now: DateTime<Utc>,
) -> Result<(), TokenValidationError> {
    if !issuers.allows(&claims.iss) {
        return Err(TokenValidationError::Issuer(claims.iss.clone()));
    }
    if !claims.aud.matches(audience) {
        return Err(TokenValidationError::Audience);
    }
    match claims.expires_at() {
        Some(exp) if exp >= now => Ok(()),
        _ => Err(TokenValidationError::Expired),
    }
}

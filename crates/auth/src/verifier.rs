use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use taskrelay_core::{Clock, RuntimeMode};

use crate::claims::{IdentityClaims, IssuerAllowList, TokenValidationError, validate_claims};
use crate::decoder::{DecodeError, TokenDecoder};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingCredentials,

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Claims(#[from] TokenValidationError),
}

/// Authenticates the caller of a push delivery.
///
/// The expected audience is the handler URL of the connection the job was
/// enqueued on, so it is passed per call rather than fixed at construction.
#[derive(Clone)]
pub struct TokenVerifier {
    decoder: Arc<dyn TokenDecoder>,
    issuers: IssuerAllowList,
    clock: Arc<dyn Clock>,
}

impl TokenVerifier {
    pub fn new(decoder: Arc<dyn TokenDecoder>, issuers: IssuerAllowList, clock: Arc<dyn Clock>) -> Self {
        Self {
            decoder,
            issuers,
            clock,
        }
    }

    pub fn for_mode(decoder: Arc<dyn TokenDecoder>, mode: RuntimeMode, clock: Arc<dyn Clock>) -> Self {
        Self::new(decoder, IssuerAllowList::for_mode(mode), clock)
    }

    pub async fn verify(
        &self,
        authorization: Option<&str>,
        audience: &str,
    ) -> Result<IdentityClaims, AuthError> {
        let token = authorization
            .and_then(extract_bearer)
            .ok_or(AuthError::MissingCredentials)?;

        let claims = self.decoder.decode(token).await?;
        validate_claims(&claims, &self.issuers, audience, self.clock.now())?;

        debug!(iss = %claims.iss, email = ?claims.email, "identity token accepted");
        Ok(claims)
    }
}

impl core::fmt::Debug for TokenVerifier {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TokenVerifier")
            .field("issuers", &self.issuers)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

/// `Bearer <token>` → `<token>`; `None` for any other shape or an empty token.
pub fn extract_bearer(header: &str) -> Option<&str> {
    let token = header.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        return None;
    }
    Some(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EMULATOR_ISSUER, GOOGLE_ISSUERS, Hs256TokenDecoder};
    use chrono::{DateTime, Utc};
    use jsonwebtoken::{Algorithm, EncodingKey, Header};
    use serde_json::json;
    use taskrelay_core::FixedClock;

    const SECRET: &str = "test-secret";
    const HANDLER: &str = "https://app.example.com/handle-task";

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn verifier(mode: RuntimeMode) -> TokenVerifier {
        TokenVerifier::for_mode(
            Arc::new(Hs256TokenDecoder::new(SECRET)),
            mode,
            Arc::new(FixedClock::new(now())),
        )
    }

    fn bearer(iss: &str, aud: &str, exp: i64) -> String {
        let token = jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &json!({"iss": iss, "aud": aud, "exp": exp, "email": "tasks@example.iam"}),
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();
        format!("Bearer {token}")
    }

    #[tokio::test]
    async fn valid_token_passes() {
        let header = bearer(GOOGLE_ISSUERS[0], HANDLER, now().timestamp() + 300);
        let claims = verifier(RuntimeMode::Production)
            .verify(Some(&header), HANDLER)
            .await
            .unwrap();
        assert_eq!(claims.email.as_deref(), Some("tasks@example.iam"));
    }

    #[tokio::test]
    async fn missing_or_malformed_header_is_rejected() {
        let v = verifier(RuntimeMode::Production);
        assert_eq!(v.verify(None, HANDLER).await, Err(AuthError::MissingCredentials));
        assert_eq!(
            v.verify(Some("Basic abc"), HANDLER).await,
            Err(AuthError::MissingCredentials)
        );
        assert_eq!(
            v.verify(Some("Bearer   "), HANDLER).await,
            Err(AuthError::MissingCredentials)
        );
    }

    #[tokio::test]
    async fn claim_failures_surface_as_claims_errors() {
        let v = verifier(RuntimeMode::Production);

        let wrong_aud = bearer(GOOGLE_ISSUERS[1], "https://elsewhere", now().timestamp() + 300);
        assert_eq!(
            v.verify(Some(&wrong_aud), HANDLER).await,
            Err(AuthError::Claims(TokenValidationError::Audience))
        );

        let expired = bearer(GOOGLE_ISSUERS[1], HANDLER, now().timestamp() - 1);
        assert_eq!(
            v.verify(Some(&expired), HANDLER).await,
            Err(AuthError::Claims(TokenValidationError::Expired))
        );
    }

    #[tokio::test]
    async fn emulator_tokens_need_emulated_mode() {
        let header = bearer(EMULATOR_ISSUER, HANDLER, now().timestamp() + 300);
        assert!(verifier(RuntimeMode::Production)
            .verify(Some(&header), HANDLER)
            .await
            .is_err());
        assert!(verifier(RuntimeMode::Emulated)
            .verify(Some(&header), HANDLER)
            .await
            .is_ok());
    }

    #[test]
    fn extract_bearer_trims() {
        assert_eq!(extract_bearer("Bearer  abc "), Some("abc"));
        assert_eq!(extract_bearer("bearer abc"), None);
    }
}

//! Access control for the read endpoints.
//!
//! `/handle-task` must stay reachable by the scheduler, so everything else on
//! the same listener is gated here: callers present an identity token minted
//! for the configured admin audience (and, optionally, for a listed account).

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{StatusCode, header::AUTHORIZATION},
    middleware::Next,
    response::Response,
};
use thiserror::Error;
use tracing::{debug, warn};

use taskrelay_auth::{AuthError, IdentityClaims, TokenVerifier};
use taskrelay_infra::AdminSettings;

use crate::app::errors::json_error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AdminAuthError {
    #[error("no admin audience configured")]
    Disabled,

    #[error(transparent)]
    Token(#[from] AuthError),

    #[error("account is not allowed")]
    NotAllowed,
}

#[derive(Debug, Clone)]
pub struct AdminAccess {
    verifier: TokenVerifier,
    audience: Option<String>,
    allowed_emails: Vec<String>,
}

impl AdminAccess {
    pub fn new(verifier: TokenVerifier, settings: &AdminSettings) -> Self {
        Self {
            verifier,
            audience: settings.audience.clone(),
            allowed_emails: settings.allowed_emails.clone(),
        }
    }

    pub async fn authorize(&self, authorization: Option<&str>) -> Result<IdentityClaims, AdminAuthError> {
        let audience = self.audience.as_deref().ok_or(AdminAuthError::Disabled)?;
        let claims = self.verifier.verify(authorization, audience).await?;

        if !self.allowed_emails.is_empty() {
            let allowed = claims
                .email
                .as_ref()
                .is_some_and(|email| self.allowed_emails.contains(email));
            if !allowed {
                return Err(AdminAuthError::NotAllowed);
            }
        }
        Ok(claims)
    }
}

pub async fn admin_auth_middleware(
    State(access): State<Arc<AdminAccess>>,
    req: Request,
    next: Next,
) -> Response {
    let authorization = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    match access.authorize(authorization.as_deref()).await {
        Ok(claims) => {
            debug!(email = ?claims.email, path = %req.uri().path(), "read access granted");
            next.run(req).await
        }
        Err(e) => {
            warn!(reason = %e, path = %req.uri().path(), "read access denied");
            json_error(StatusCode::UNAUTHORIZED, "unauthorized", "unauthorized")
        }
    }
}

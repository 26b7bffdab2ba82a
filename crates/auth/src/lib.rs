//! `taskrelay-auth`: identity token verification for inbound deliveries.
//!
//! Signature checking lives behind the [`TokenDecoder`] seam; the semantic
//! checks (issuer, audience, expiry) are pure and live in [`claims`].

pub mod claims;
pub mod decoder;
pub mod verifier;

pub use claims::{
    Audience, EMULATOR_ISSUER, GOOGLE_ISSUERS, IdentityClaims, IssuerAllowList,
    TokenValidationError, validate_claims,
};
pub use decoder::{
    DEFAULT_GOOGLE_JWKS_URL, DecodeError, Hs256TokenDecoder, JwksTokenDecoder, TokenDecoder,
};
pub use verifier::{AuthError, TokenVerifier, extract_bearer};

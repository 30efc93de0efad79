//! JWT verification for the cinnabar hub.
//!
//! Publishers and subscribers authenticate with Mercure-claim JWTs that
//! may be signed by any of a set of keys: statically configured HMAC
//! secrets or PEM public keys, plus keys fetched from a JWKS endpoint.

pub mod claims;
pub mod jwks;
pub mod keys;

pub use claims::{grant_filter, Claims, MercureScopes};
pub use jwks::{refresh_interval, JwksResponse, JwksSource};
pub use keys::{static_keys, verify_token, KeyKind, VerifyingKey};

pub type Result<T> = std::result::Result<T, AuthzError>;

#[derive(thiserror::Error, Debug)]
pub enum AuthzError {
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("invalid key material: {0}")]
    InvalidKey(String),
    #[error("no configured key matches the token")]
    NoMatchingKey,
    #[error(transparent)]
    Jwt(#[from] jsonwebtoken::errors::Error),
    #[error("jwks: {0}")]
    Jwks(String),
}

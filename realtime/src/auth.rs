//! Handshake credential verification.
//!
//! Every inbound connection attempt must carry a bearer token in the
//! connection handshake (never as a post-connect message), so rejection
//! happens before any event can be sent or received. Verification is
//! decode + signature check + expiry check with zero leeway; on success the
//! token subject becomes the connection's identity.

use crate::error::Error;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Claims carried by a realtime handshake token.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the authenticated user's id, used as the connection identity.
    pub sub: String,
    pub iat: u64,
    pub exp: u64,
}

/// Verifies a handshake token and returns its claims.
///
/// Expiry is checked with zero leeway: a token that expired one second ago
/// is rejected. Expired and malformed tokens map to distinct error kinds so
/// callers know whether refreshing the credential can help.
pub fn verify_token(secret: &str, token: &str) -> Result<Claims, Error> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;

    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )?;

    Ok(data.claims)
}

/// Issues a handshake token for the given subject, valid for `ttl`.
/// Used by operational tooling and tests; the production issuer lives in
/// the authentication service.
pub fn issue_token(secret: &str, subject: &str, ttl: Duration) -> Result<String, Error> {
    let now = chrono::Utc::now().timestamp().max(0) as u64;
    let claims = Claims {
        sub: subject.to_string(),
        iat: now,
        exp: now + ttl.as_secs(),
    };

    Ok(encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?)
}

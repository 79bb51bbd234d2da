//! JWT authentication.
//!
//! Tokens carry the user id in `sub`. Issuing tokens for real users belongs
//! to the identity service in front of this one; [`create_token`] exists for
//! tooling and tests.

use hyper::http::HeaderMap;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::Auth as AuthConfig;
use crate::error::{Error, Result};

const MIN_SECRET_LENGTH: usize = 32;

fn validate_secret(config: &AuthConfig) -> Result<()> {
    if config.jwt_secret.len() < MIN_SECRET_LENGTH {
        return Err(Error::Config(format!(
            "JWT secret must be at least {MIN_SECRET_LENGTH} bytes"
        )));
    }
    Ok(())
}

/// JWT claims structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: String,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
}

/// Create a JWT token for a user.
pub fn create_token(config: &AuthConfig, user_id: Uuid) -> Result<String> {
    validate_secret(config)?;
    let now = jiff::Timestamp::now();
    let hours = config.token_expiry_days as i64 * 24;
    let exp = now + jiff::Span::new().hours(hours);

    let claims = Claims {
        sub: user_id.to_string(),
        exp: exp.as_second(),
        iat: now.as_second(),
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )?;

    Ok(token)
}

/// Verify and decode a JWT token.
///
/// # Returns
/// - `Err(Error::TokenExpired)` if the token has expired
/// - `Err(Error::Unauthorized)` for any other validation failure
pub fn verify_token(config: &AuthConfig, token: &str) -> Result<Claims> {
    validate_secret(config)?;
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => Error::TokenExpired,
        _ => Error::Unauthorized,
    })?;

    Ok(token_data.claims)
}

/// Extract the user id from an `Authorization: Bearer <token>` header.
///
/// A missing header, a bad token or a `sub` that is not a UUID all yield
/// `Error::Unauthorized`.
pub fn extract_user_id(headers: &HeaderMap, config: &AuthConfig) -> Result<Uuid> {
    let auth_header = headers
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .ok_or(Error::Unauthorized)?;

    let token = auth_header
        .get(..7)
        .filter(|p| p.eq_ignore_ascii_case("bearer "))
        .map(|_| &auth_header[7..])
        .ok_or(Error::Unauthorized)?;

    let claims = verify_token(config, token)?;
    Uuid::parse_str(&claims.sub).map_err(|_| Error::Unauthorized)
}

//! Token extraction and verification

use crate::auth::claims::Claims;
use axum::http::header::{AUTHORIZATION, COOKIE};
use axum::http::HeaderMap;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use thiserror::Error;

/// Name of the cookie carrying the JWT when no `Authorization` header is set.
pub const AUTHORIZATION_COOKIE: &str = "mercureAuthorization";

/// The role a request is authorized for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Subscriber,
    Publisher,
}

/// All variants map to a plain 401 response; the detail is only logged, so
/// nothing about the token's internals reaches the client.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no token provided")]
    MissingToken,

    #[error("invalid token")]
    InvalidToken,

    #[error("token carries no claim for this role")]
    MissingClaim,
}

/// Verifies hub JWTs and derives the authorized topic selectors.
#[derive(Clone)]
pub struct Authorizer {
    subscriber_key: DecodingKey,
    publisher_key: DecodingKey,
    validation: Validation,
    allow_anonymous: bool,
}

impl Authorizer {
    pub fn new(
        subscriber_key: &[u8],
        publisher_key: &[u8],
        algorithm: Algorithm,
        allow_anonymous: bool,
    ) -> Self {
        Self {
            subscriber_key: DecodingKey::from_secret(subscriber_key),
            publisher_key: DecodingKey::from_secret(publisher_key),
            validation: Validation::new(algorithm),
            allow_anonymous,
        }
    }

    /// Authorize a request for the given role, returning the topic selectors
    /// its token grants.
    ///
    /// The token is taken from the `Authorization: Bearer` header first,
    /// falling back to the [`AUTHORIZATION_COOKIE`] cookie. Anonymous
    /// subscribers are accepted with an empty selector set when enabled.
    /// Tokens using the `none` algorithm never verify: the algorithm is
    /// pinned at construction and `none` is not an accepted value.
    pub fn authorize(&self, headers: &HeaderMap, role: Role) -> Result<Vec<String>, AuthError> {
        let Some(token) = extract_token(headers) else {
            if self.allow_anonymous && role == Role::Subscriber {
                return Ok(Vec::new());
            }
            return Err(AuthError::MissingToken);
        };

        let key = match role {
            Role::Subscriber => &self.subscriber_key,
            Role::Publisher => &self.publisher_key,
        };

        let claims = jsonwebtoken::decode::<Claims>(&token, key, &self.validation)
            .map_err(|_| AuthError::InvalidToken)?
            .claims;

        let selectors = match role {
            Role::Subscriber => claims.mercure.subscribe,
            Role::Publisher => claims.mercure.publish,
        };

        selectors.ok_or(AuthError::MissingClaim)
    }
}

/// Pull the raw token out of the request headers.
fn extract_token(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(AUTHORIZATION) {
        if let Ok(value) = value.to_str() {
            if let Some(token) = value.strip_prefix("Bearer ") {
                return Some(token.trim().to_string());
            }
        }
    }

    for header in headers.get_all(COOKIE) {
        let Ok(cookies) = header.to_str() else {
            continue;
        };
        for cookie in cookies.split(';') {
            if let Some((name, value)) = cookie.trim().split_once('=') {
                if name == AUTHORIZATION_COOKIE {
                    return Some(value.to_string());
                }
            }
        }
    }

    None
}

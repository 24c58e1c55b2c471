//! JWT claim shapes

use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Claims carried by hub tokens.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,

    #[serde(default)]
    pub mercure: MercureClaims,
}

/// The `mercure` claim object.
///
/// Each list is a set of topic selectors. A present-but-empty list is a
/// valid authorization for no topics; a missing list means the bearer does
/// not hold that role at all.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MercureClaims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscribe: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish: Option<Vec<String>>,
}

/// Sign a hub token with the given HMAC secret.
pub fn mint_token(
    secret: &[u8],
    subscribe: Option<Vec<String>>,
    publish: Option<Vec<String>>,
    ttl: Duration,
) -> Result<String, jsonwebtoken::errors::Error> {
    let exp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
        + ttl.as_secs();

    let claims = Claims {
        exp: Some(exp),
        mercure: MercureClaims { subscribe, publish },
    };

    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret),
    )
}

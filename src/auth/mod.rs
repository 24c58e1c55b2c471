//! Authentication and authorization
//!
//! Subscribers and publishers present a JWT, either as an
//! `Authorization: Bearer` header or in the `mercureAuthorization` cookie.
//! The token's `mercure.subscribe` (or `mercure.publish`) claim lists the
//! topic selectors the bearer is authorized for; `*` authorizes every topic.

mod authorizer;
mod claims;

pub use authorizer::{AuthError, Authorizer, Role, AUTHORIZATION_COOKIE};
pub use claims::{mint_token, Claims, MercureClaims};

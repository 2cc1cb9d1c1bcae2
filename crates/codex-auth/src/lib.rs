//! ChatGPT OAuth collaborator
//!
//! PKCE flow helpers, token exchange/refresh against the ChatGPT OAuth
//! endpoints, id-token claim extraction, and the sliding-window limiter
//! guarding login attempts. This crate is a standalone library with no
//! dependency on the gateway binary.
//!
//! Credential flow:
//! 1. `pkce::generate_verifier()` + `pkce::compute_challenge()`
//! 2. User authorizes via `pkce::build_authorization_url()`
//! 3. `token::exchange_code()` with the authorization code
//! 4. `token::parse_id_token_claims()` yields account id and email
//! 5. Later, `token::refresh_token()` renews the credential

pub mod constants;
pub mod flow;
pub mod pkce;
pub mod ratelimit;
pub mod token;

pub use constants::*;
pub use flow::{AccountMetadata, AuthFlow};
pub use pkce::{build_authorization_url, compute_challenge, generate_verifier};
pub use ratelimit::{AuthRateLimitConfig, AuthRateLimiter};
pub use token::{IdTokenClaims, TokenResponse, exchange_code, parse_id_token_claims, refresh_token};

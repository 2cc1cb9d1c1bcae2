//! PKCE (Proof Key for Code Exchange) per RFC 7636
//!
//! Generates the code verifier and S256 challenge used during the OAuth
//! authorization flow. The verifier stays with the party that initiated
//! the flow and is presented during token exchange; the challenge travels
//! in the authorization URL.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngExt;
use sha2::{Digest, Sha256};

use crate::constants::{AUTHORIZE_ENDPOINT, OPENAI_CLIENT_ID, REDIRECT_URI, SCOPES};

/// Generate a cryptographically random PKCE code verifier.
///
/// 64 random bytes encoded as URL-safe base64 without padding, which lands
/// at 86 characters, inside the 43-128 range RFC 7636 requires.
pub fn generate_verifier() -> String {
    let mut bytes = [0u8; 64];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Compute the S256 code challenge: `BASE64URL(SHA256(verifier))`.
pub fn compute_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

/// Build the authorization URL with all required OAuth parameters.
///
/// `state` is an opaque CSRF value returned unchanged in the callback.
pub fn build_authorization_url(state: &str, challenge: &str) -> String {
    format!(
        "{}?response_type=code&client_id={}&redirect_uri={}&scope={}&code_challenge={}&code_challenge_method=S256&state={}",
        AUTHORIZE_ENDPOINT,
        OPENAI_CLIENT_ID,
        urlencoded(REDIRECT_URI),
        urlencoded(SCOPES),
        challenge,
        state,
    )
}

/// Minimal URL encoding for the parameter values we actually emit.
fn urlencoded(s: &str) -> String {
    s.replace(' ', "%20")
        .replace(':', "%3A")
        .replace('/', "%2F")
}

//! OAuth token exchange and refresh
//!
//! Two token endpoint interactions: authorization code exchange (completing
//! a login) and refresh (renewing an account's credential). The id token
//! returned alongside carries the ChatGPT account id and email used as the
//! account's stable identity.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};

use common::{Error, Result};

use crate::constants::{AUTH_CLAIM, OPENAI_CLIENT_ID, REDIRECT_URI, TOKEN_ENDPOINT};

/// Response from the token endpoint for both exchange and refresh.
///
/// `expires_in` is a delta in seconds from the response time; callers
/// convert it to an absolute instant when storing.
#[derive(Debug, Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub id_token: Option<String>,
    /// Seconds until the access token expires (delta, not absolute)
    #[serde(default)]
    pub expires_in: Option<u64>,
}

/// Identity claims extracted from the id token payload.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IdTokenClaims {
    pub account_id: Option<String>,
    pub email: Option<String>,
}

/// Exchange an authorization code for tokens (completing a PKCE login).
pub async fn exchange_code(
    client: &reqwest::Client,
    code: &str,
    verifier: &str,
) -> Result<TokenResponse> {
    let response = client
        .post(TOKEN_ENDPOINT)
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("code_verifier", verifier),
            ("client_id", OPENAI_CLIENT_ID),
            ("redirect_uri", REDIRECT_URI),
        ])
        .send()
        .await
        .map_err(|err| Error::network(format!("token exchange request failed: {err}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));
        return Err(Error::Auth {
            message: format!("token endpoint returned {status}: {body}"),
            account_id: None,
            retryable: status.is_server_error(),
        });
    }

    response
        .json::<TokenResponse>()
        .await
        .map_err(|err| Error::Auth {
            message: format!("invalid token response: {err}"),
            account_id: None,
            retryable: false,
        })
}

/// Refresh an access token using a refresh token.
///
/// 401/403 means the refresh token is revoked or invalid (not retryable);
/// the caller should cool the account down. Other failures are transient.
pub async fn refresh_token(client: &reqwest::Client, refresh: &str) -> Result<TokenResponse> {
    let response = client
        .post(TOKEN_ENDPOINT)
        .form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh),
            ("client_id", OPENAI_CLIENT_ID),
        ])
        .send()
        .await
        .map_err(|err| Error::network(format!("token refresh request failed: {err}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));
        let unauthorized = status.as_u16() == 401 || status.as_u16() == 403;
        return Err(Error::Auth {
            message: format!("token refresh returned {status}: {body}"),
            account_id: None,
            retryable: !unauthorized,
        });
    }

    response
        .json::<TokenResponse>()
        .await
        .map_err(|err| Error::Auth {
            message: format!("invalid refresh response: {err}"),
            account_id: None,
            retryable: false,
        })
}

/// Extract identity claims from an id token without verifying its
/// signature. The token arrived over TLS from the issuer; we only mine it
/// for display identity, never for authorization.
pub fn parse_id_token_claims(id_token: &str) -> IdTokenClaims {
    let Some(payload) = id_token.split('.').nth(1) else {
        return IdTokenClaims::default();
    };
    let Ok(bytes) = URL_SAFE_NO_PAD.decode(payload) else {
        return IdTokenClaims::default();
    };
    let Ok(claims) = serde_json::from_slice::<serde_json::Value>(&bytes) else {
        return IdTokenClaims::default();
    };

    let account_id = claims
        .get(AUTH_CLAIM)
        .and_then(|auth| auth.get("chatgpt_account_id"))
        .and_then(|id| id.as_str())
        .map(str::to_string);
    let email = claims
        .get("email")
        .and_then(|email| email.as_str())
        .map(str::to_string);

    IdTokenClaims { account_id, email }
}

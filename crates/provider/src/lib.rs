//! Upstream collaborator contract
//!
//! Decouples the selection/probing core from the actual upstream HTTP
//! stack. The prober hands an implementation an account and a cancellation
//! handle; it gets back a success payload or a taxonomy error whose `code`
//! drives rate-limit reason parsing. The production implementation owns
//! request transformation and streaming; this crate only fixes the seam.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use codex_store::StoredAccount;
use common::Error;
use tokio_util::sync::CancellationToken;

/// Successful upstream probe payload.
#[derive(Debug, Clone)]
pub struct ProbeResponse {
    pub status: u16,
    pub body: serde_json::Value,
}

/// Abstraction over the upstream API.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn Upstream>`). Implementations must honor the cancellation
/// token promptly: a signalled token interrupts any in-flight network read
/// or timer.
pub trait Upstream: Send + Sync {
    /// Identifier for logging and health reporting (e.g. "chatgpt").
    fn id(&self) -> &str;

    /// Issue one probe request on behalf of `account`.
    fn probe<'a>(
        &'a self,
        account: &'a StoredAccount,
        cancel: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = common::Result<ProbeResponse>> + Send + 'a>>;
}

/// Build a taxonomy error from a non-2xx upstream response.
///
/// 429s become `RateLimit` carrying the upstream error code (for reason
/// parsing) and any `retry-after` header, normalized to milliseconds.
/// Everything else becomes `Api` with its status.
pub fn classify_response(
    status: u16,
    headers: &HashMap<String, String>,
    body: &str,
    account_id: Option<&str>,
) -> Error {
    if status == 429 {
        return Error::RateLimit {
            message: format!("upstream returned 429: {body}"),
            retry_after_ms: parse_retry_after_ms(headers),
            account_id: account_id.map(str::to_string),
            code: extract_error_code(body),
        };
    }
    Error::Api {
        status,
        message: body.to_string(),
        headers: headers.clone(),
    }
}

/// Pull the machine-readable error code out of an upstream error body.
///
/// Looks for `error.code`, then `error.type`, then a top-level `code`.
pub fn extract_error_code(body: &str) -> Option<String> {
    let parsed: serde_json::Value = serde_json::from_str(body).ok()?;
    let error = parsed.get("error");
    error
        .and_then(|e| e.get("code"))
        .or_else(|| error.and_then(|e| e.get("type")))
        .or_else(|| parsed.get("code"))
        .and_then(|code| code.as_str())
        .map(str::to_string)
}

/// Normalize a `retry-after` header (seconds or milliseconds) to
/// milliseconds. Values under 1000 are treated as seconds, matching the
/// HTTP convention; anything larger is already milliseconds.
fn parse_retry_after_ms(headers: &HashMap<String, String>) -> Option<u64> {
    let raw = headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("retry-after"))
        .map(|(_, value)| value.trim())?;
    let value: f64 = raw.parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    if value < 1000.0 {
        Some((value * 1000.0) as u64)
    } else {
        Some(value as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn classify_429_carries_code_and_retry_after() {
        let body = r#"{"error":{"code":"usage_limit_reached","message":"limit"}}"#;
        let err = classify_response(429, &headers(&[("Retry-After", "30")]), body, Some("acct-1"));
        match err {
            Error::RateLimit {
                retry_after_ms,
                account_id,
                code,
                ..
            } => {
                assert_eq!(retry_after_ms, Some(30_000));
                assert_eq!(account_id.as_deref(), Some("acct-1"));
                assert_eq!(code.as_deref(), Some("usage_limit_reached"));
            }
            other => panic!("expected RateLimit, got {other:?}"),
        }
    }

    #[test]
    fn classify_other_statuses_as_api() {
        let err = classify_response(503, &headers(&[]), "overloaded", None);
        match err {
            Error::Api { status, .. } => assert_eq!(status, 503),
            other => panic!("expected Api, got {other:?}"),
        }
        assert!(classify_response(503, &headers(&[]), "", None).retryable());
        assert!(!classify_response(400, &headers(&[]), "", None).retryable());
    }

    #[test]
    fn error_code_fallback_chain() {
        assert_eq!(
            extract_error_code(r#"{"error":{"code":"tpm_exceeded"}}"#).as_deref(),
            Some("tpm_exceeded")
        );
        assert_eq!(
            extract_error_code(r#"{"error":{"type":"tokens"}}"#).as_deref(),
            Some("tokens")
        );
        assert_eq!(
            extract_error_code(r#"{"code":"concurrent_request_limit"}"#).as_deref(),
            Some("concurrent_request_limit")
        );
        assert_eq!(extract_error_code("not json"), None);
        assert_eq!(extract_error_code(r#"{"error":{}}"#), None);
    }

    #[test]
    fn retry_after_seconds_and_millis() {
        let err = classify_response(429, &headers(&[("retry-after", "2")]), "{}", None);
        match err {
            Error::RateLimit { retry_after_ms, .. } => assert_eq!(retry_after_ms, Some(2_000)),
            _ => unreachable!(),
        }
        let err = classify_response(429, &headers(&[("retry-after", "1500")]), "{}", None);
        match err {
            Error::RateLimit { retry_after_ms, .. } => assert_eq!(retry_after_ms, Some(1_500)),
            _ => unreachable!(),
        }
        let err = classify_response(429, &headers(&[("retry-after", "soon")]), "{}", None);
        match err {
            Error::RateLimit { retry_after_ms, .. } => assert_eq!(retry_after_ms, None),
            _ => unreachable!(),
        }
    }

    struct CannedUpstream;

    impl Upstream for CannedUpstream {
        fn id(&self) -> &str {
            "canned"
        }

        fn probe<'a>(
            &'a self,
            account: &'a StoredAccount,
            cancel: CancellationToken,
        ) -> Pin<Box<dyn Future<Output = common::Result<ProbeResponse>> + Send + 'a>> {
            Box::pin(async move {
                if cancel.is_cancelled() {
                    return Err(Error::timeout("cancelled before dispatch"));
                }
                Ok(ProbeResponse {
                    status: 200,
                    body: serde_json::json!({"account": account.key()}),
                })
            })
        }
    }

    #[tokio::test]
    async fn trait_is_dyn_compatible() {
        let upstream: std::sync::Arc<dyn Upstream> = std::sync::Arc::new(CannedUpstream);
        let account = StoredAccount {
            account_id: Some("acct-1".into()),
            email: None,
            account_label: None,
            account_id_source: None,
            refresh_token: "rt".into(),
            added_at: 0,
            last_used: 0,
            last_switch_reason: None,
            rate_limit_reset_times: Default::default(),
            cooling_down_until: None,
            cooldown_reason: None,
        };
        let response = upstream
            .probe(&account, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body["account"], "acct-1");
        assert_eq!(upstream.id(), "canned");
    }
}

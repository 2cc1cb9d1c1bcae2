//! Login/refresh collaborator contract
//!
//! The gateway core never runs the browser dance itself; it talks to an
//! `AuthFlow` implementation. The production implementation drives PKCE,
//! the local callback server, and the token endpoint; tests substitute a
//! canned flow.

use std::future::Future;
use std::pin::Pin;

use common::Result;

/// Identity and credential produced by a completed login or refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountMetadata {
    pub account_id: Option<String>,
    pub email: Option<String>,
    /// Where the account id came from (e.g. "id-token").
    pub account_id_source: Option<String>,
    pub refresh_token: String,
}

/// OAuth collaborator. Uses `Pin<Box<dyn Future>>` returns for
/// dyn-compatibility (`Arc<dyn AuthFlow>`).
pub trait AuthFlow: Send + Sync {
    /// Run a full interactive login and return the new account.
    fn login(&self) -> Pin<Box<dyn Future<Output = Result<AccountMetadata>> + Send + '_>>;

    /// Refresh an existing account's credential.
    fn refresh<'a>(
        &'a self,
        refresh_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<AccountMetadata>> + Send + 'a>>;
}

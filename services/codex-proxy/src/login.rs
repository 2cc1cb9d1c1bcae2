//! Interactive OAuth login flow
//!
//! Terminal PKCE flow: print the authorization URL, let the user finish in
//! a browser, and paste the redirected code back. The richer flow with a
//! local callback server lives in the plugin host; this one needs nothing
//! but stdin.

use std::future::Future;
use std::pin::Pin;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use uuid::Uuid;

use codex_auth::{AccountMetadata, AuthFlow};
use common::{Error, Result};

pub struct InteractiveFlow {
    client: reqwest::Client,
}

impl InteractiveFlow {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    async fn read_code() -> Result<String> {
        let mut line = String::new();
        let mut stdin = BufReader::new(tokio::io::stdin());
        stdin
            .read_line(&mut line)
            .await
            .map_err(|err| Error::network(format!("reading authorization code: {err}")))?;
        let code = line.trim().to_string();
        if code.is_empty() {
            return Err(Error::Validation {
                field: "code".into(),
                expected: "the authorization code from the browser redirect".into(),
            });
        }
        Ok(code)
    }

    fn metadata_from(token: codex_auth::TokenResponse) -> AccountMetadata {
        let claims = token
            .id_token
            .as_deref()
            .map(codex_auth::parse_id_token_claims)
            .unwrap_or_default();
        AccountMetadata {
            account_id: claims.account_id,
            email: claims.email,
            account_id_source: token.id_token.is_some().then(|| "id-token".to_string()),
            refresh_token: token.refresh_token,
        }
    }
}

impl AuthFlow for InteractiveFlow {
    fn login(&self) -> Pin<Box<dyn Future<Output = Result<AccountMetadata>> + Send + '_>> {
        Box::pin(async move {
            let verifier = codex_auth::generate_verifier();
            let challenge = codex_auth::compute_challenge(&verifier);
            let state = Uuid::new_v4().as_simple().to_string();
            let url = codex_auth::build_authorization_url(&state, &challenge);

            println!("Open this URL in your browser and authorize access:\n\n  {url}\n");
            println!("Then paste the `code` parameter from the redirect here and press enter:");

            let code = Self::read_code().await?;
            let token = codex_auth::exchange_code(&self.client, &code, &verifier).await?;
            info!("authorization code exchanged");
            Ok(Self::metadata_from(token))
        })
    }

    fn refresh<'a>(
        &'a self,
        refresh_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<AccountMetadata>> + Send + 'a>> {
        Box::pin(async move {
            let token = codex_auth::refresh_token(&self.client, refresh_token).await?;
            Ok(Self::metadata_from(token))
        })
    }
}

//! ChatGPT OAuth constants
//!
//! Public OAuth client configuration matching the Codex CLI. These values
//! are not secrets; they identify the public client application. The
//! actual secrets (access/refresh tokens) live in the account store.

/// OpenAI's public OAuth client ID (same as the Codex CLI)
pub const OPENAI_CLIENT_ID: &str = "app_EMoamEEZ73f0CkXaXp7hrann";

/// OAuth redirect URI (local callback server owned by the login flow)
pub const REDIRECT_URI: &str = "http://localhost:1455/auth/callback";

/// Token endpoint for code exchange and token refresh
pub const TOKEN_ENDPOINT: &str = "https://auth.openai.com/oauth/token";

/// Authorization endpoint for ChatGPT subscription accounts
pub const AUTHORIZE_ENDPOINT: &str = "https://auth.openai.com/oauth/authorize";

/// OAuth scopes. `offline_access` is what yields the refresh token the
/// pool lives on.
pub const SCOPES: &str = "openid profile email offline_access";

/// Claim namespace in the id token that carries the ChatGPT account id.
pub const AUTH_CLAIM: &str = "https://api.openai.com/auth";

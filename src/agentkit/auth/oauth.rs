//! OAuth 2.1 providers: direct tokens and the full discovery flow.
//!
//! [`OAuthProvider`] wraps an already-issued access token and refreshes it
//! at the configured token endpoint.  [`OAuthDiscoveryProvider`] walks the
//! hard path end to end:
//!
//! 1. Metadata discovery (RFC 8414, with an OpenID Connect fallback).
//! 2. Dynamic client registration (RFC 7591) when the server advertises a
//!    registration endpoint and registration is enabled.
//! 3. Scope negotiation against `scopes_supported`.
//! 4. PKCE authorization (`S256`) — the provider builds the authorization
//!    URL, hands it to an out-of-band callback, and waits for the caller
//!    to deliver the redirect `code` via
//!    [`complete_authorization`](OAuthDiscoveryProvider::complete_authorization).
//! 5. Authorization-code exchange and refresh, with a 30 second expiry
//!    skew and a single jittered retry on token-endpoint 5xx responses.
//!
//! The scope chosen at registration is reused unchanged at authorization
//! and token exchange.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::agentkit::auth::AuthProvider;
use crate::agentkit::error::AuthError;

/// Clock skew subtracted from token expiry before a refresh is forced.
pub const EXPIRY_SKEW: Duration = Duration::from_secs(30);

/// Preferred scope combinations, tried in order during negotiation.
const PREFERRED_SCOPES: [&str; 3] = ["mcp", "profile email", "openid profile email"];

/// Characters allowed in a PKCE `code_verifier` (RFC 7636 unreserved set).
const VERIFIER_CHARSET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";

/// Authorization-server metadata (RFC 8414 subset).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes_supported: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge_methods_supported: Option<Vec<String>>,
}

/// RFC 7591 registration request.  Field names are snake_case on the wire.
#[derive(Debug, Clone, Serialize)]
pub struct RegistrationRequest {
    pub redirect_uris: Vec<String>,
    pub grant_types: Vec<String>,
    pub response_types: Vec<String>,
    pub application_type: String,
    pub token_endpoint_auth_method: String,
    pub scope: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
}

/// RFC 7591 registration response subset.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistrationResponse {
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
}

/// Token endpoint response.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub scope: Option<String>,
}

/// Mutable credential state owned by a discovery provider.
#[derive(Debug, Clone, Default)]
pub struct OAuthState {
    pub registered_client_id: Option<String>,
    pub registered_client_secret: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub scope: Option<String>,
    pub code_verifier: Option<String>,
    pub server_metadata: Option<ServerMetadata>,
}

/// Generate a PKCE `code_verifier`: 64 characters from the unreserved set
/// (the RFC allows 43–128).
pub fn generate_code_verifier() -> String {
    let mut rng = rand::thread_rng();
    (0..64)
        .map(|_| VERIFIER_CHARSET[rng.gen_range(0..VERIFIER_CHARSET.len())] as char)
        .collect()
}

/// `code_challenge = base64url(sha256(verifier))`, method `S256`.
pub fn code_challenge(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

/// Pick the scope to use for registration, authorization, and exchange.
///
/// Priority: the configured scope when the server supports it; the first
/// preferred combination whose members are all supported; the largest
/// buildable combination of {openid, profile, email}; the first supported
/// scope; the `"mcp"` fallback.  A server without `scopes_supported`
/// keeps the configured scope (or the fallback).
pub fn select_scope(configured: Option<&str>, supported: Option<&[String]>) -> String {
    let supported = match supported {
        Some(s) if !s.is_empty() => s,
        _ => return configured.unwrap_or("mcp").to_string(),
    };
    let has = |scope: &str| supported.iter().any(|s| s == scope);

    if let Some(configured) = configured {
        if has(configured) {
            return configured.to_string();
        }
    }

    for combo in PREFERRED_SCOPES {
        if combo.split(' ').all(has) {
            return combo.to_string();
        }
    }

    let built: Vec<&str> = ["openid", "profile", "email"]
        .into_iter()
        .filter(|s| has(s))
        .collect();
    if !built.is_empty() {
        return built.join(" ");
    }

    supported
        .first()
        .cloned()
        .unwrap_or_else(|| "mcp".to_string())
}

/// Discover server metadata for `resource_base_url`.
///
/// Tries `/.well-known/oauth-authorization-server` first, then the OpenID
/// Connect fallback `/.well-known/openid-configuration`.
pub async fn discover_metadata(
    client: &reqwest::Client,
    resource_base_url: &str,
) -> Result<ServerMetadata, AuthError> {
    let base = resource_base_url.trim_end_matches('/');
    let candidates = [
        format!("{}/.well-known/oauth-authorization-server", base),
        format!("{}/.well-known/openid-configuration", base),
    ];

    let mut last_error = String::new();
    for url in &candidates {
        match client.get(url).send().await {
            Ok(response) if response.status().is_success() => {
                return response
                    .json::<ServerMetadata>()
                    .await
                    .map_err(|e| AuthError::DiscoveryFailed(format!("{}: {}", url, e)));
            }
            Ok(response) => {
                last_error = format!("{} returned {}", url, response.status());
            }
            Err(err) => {
                last_error = format!("{}: {}", url, err);
            }
        }
    }
    Err(AuthError::DiscoveryFailed(last_error))
}

/// POST a form to the token endpoint with the shared retry policy: one
/// jittered retry on 5xx, `invalid_scope` surfaced as its own error.
async fn post_token_form(
    client: &reqwest::Client,
    endpoint: &str,
    form: &[(&str, String)],
) -> Result<TokenResponse, AuthError> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        let response = client
            .post(endpoint)
            .form(form)
            .send()
            .await
            .map_err(|e| AuthError::TokenExchangeFailed(e.to_string()))?;
        let status = response.status();

        if status.is_success() {
            return response
                .json::<TokenResponse>()
                .await
                .map_err(|e| AuthError::TokenExchangeFailed(e.to_string()));
        }

        let body = response.text().await.unwrap_or_default();
        if status.is_server_error() && attempt == 1 {
            let backoff = Duration::from_millis(250 + rand::thread_rng().gen_range(0..500));
            log::warn!(
                "token endpoint returned {}; retrying once in {:?}",
                status,
                backoff
            );
            tokio::time::sleep(backoff).await;
            continue;
        }
        if body.contains("invalid_scope") {
            let scope = form
                .iter()
                .find(|(k, _)| *k == "scope")
                .map(|(_, v)| v.clone())
                .unwrap_or_default();
            return Err(AuthError::InvalidScope(scope));
        }
        return Err(AuthError::TokenExchangeFailed(format!(
            "HTTP {}: {}",
            status, body
        )));
    }
}

fn expires_at(expires_in: Option<u64>) -> Option<DateTime<Utc>> {
    expires_in.map(|secs| Utc::now() + chrono::Duration::seconds(secs as i64))
}

fn token_is_fresh(expires: Option<DateTime<Utc>>) -> bool {
    match expires {
        Some(at) => Utc::now() + chrono::Duration::seconds(EXPIRY_SKEW.as_secs() as i64) < at,
        // No expiry reported: assume the token stays valid.
        None => true,
    }
}

/// OAuth provider over pre-issued tokens.
///
/// Uses the provided access token until expiry minus skew, then exchanges
/// the refresh token at the configured endpoint.
pub struct OAuthProvider {
    client_id: String,
    client_secret: Option<String>,
    token_endpoint: Option<String>,
    scope: Option<String>,
    http: reqwest::Client,
    state: Mutex<OAuthState>,
}

impl OAuthProvider {
    pub fn new(client_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: None,
            token_endpoint: None,
            scope: None,
            http: reqwest::Client::new(),
            state: Mutex::new(OAuthState {
                access_token: Some(access_token.into()),
                ..Default::default()
            }),
        }
    }

    /// Attach a client secret used at the token endpoint.
    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(secret.into());
        self
    }

    /// Attach a refresh token.
    pub fn with_refresh_token(mut self, token: impl Into<String>) -> Self {
        self.state.get_mut().refresh_token = Some(token.into());
        self
    }

    /// Endpoint used for `grant_type=refresh_token` exchanges.
    pub fn with_token_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.token_endpoint = Some(endpoint.into());
        self
    }

    /// Scope sent along with refresh requests.
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Expiry of the current access token.
    pub fn with_expires_at(mut self, at: DateTime<Utc>) -> Self {
        self.state.get_mut().expires_at = Some(at);
        self
    }
}

#[async_trait]
impl AuthProvider for OAuthProvider {
    fn scheme_name(&self) -> &str {
        "oauth"
    }

    async fn headers(&self) -> Result<HashMap<String, String>, AuthError> {
        {
            let state = self.state.lock().await;
            if let Some(token) = &state.access_token {
                if token_is_fresh(state.expires_at) {
                    return Ok(HashMap::from([(
                        "Authorization".to_string(),
                        format!("Bearer {}", token),
                    )]));
                }
            }
        }
        self.refresh().await?;
        let state = self.state.lock().await;
        let token = state.access_token.as_ref().ok_or(AuthError::Expired)?;
        Ok(HashMap::from([(
            "Authorization".to_string(),
            format!("Bearer {}", token),
        )]))
    }

    async fn is_valid(&self) -> bool {
        let state = self.state.lock().await;
        state.access_token.is_some() && token_is_fresh(state.expires_at)
    }

    async fn refresh(&self) -> Result<(), AuthError> {
        let endpoint = self
            .token_endpoint
            .clone()
            .ok_or_else(|| AuthError::Config("no token endpoint configured".to_string()))?;
        let refresh_token = {
            let state = self.state.lock().await;
            state.refresh_token.clone().ok_or(AuthError::Expired)?
        };

        let mut form = vec![
            ("grant_type", "refresh_token".to_string()),
            ("refresh_token", refresh_token),
            ("client_id", self.client_id.clone()),
        ];
        if let Some(secret) = &self.client_secret {
            form.push(("client_secret", secret.clone()));
        }
        if let Some(scope) = &self.scope {
            form.push(("scope", scope.clone()));
        }

        let tokens = post_token_form(&self.http, &endpoint, &form)
            .await
            .map_err(|e| match e {
                AuthError::TokenExchangeFailed(msg) => AuthError::RefreshFailed(msg),
                other => other,
            })?;

        let mut state = self.state.lock().await;
        state.expires_at = expires_at(tokens.expires_in);
        state.access_token = Some(tokens.access_token);
        if tokens.refresh_token.is_some() {
            state.refresh_token = tokens.refresh_token;
        }
        Ok(())
    }
}

/// Configuration of the discovery flow.
#[derive(Debug, Clone)]
pub struct OAuthDiscoveryConfig {
    /// Base URL of the protected resource server.
    pub resource_base_url: String,
    /// Client id used when dynamic registration is disabled or fails to
    /// produce one.
    pub client_id: String,
    pub client_secret: Option<String>,
    /// Redirect URI the authorization server sends the code to.
    pub redirect_uri: String,
    /// Additional redirect URIs for the registration request.
    pub redirect_uris: Vec<String>,
    /// User-configured scope preference.
    pub scope: Option<String>,
    /// Whether to attempt RFC 7591 registration when advertised.
    pub use_dynamic_client_registration: bool,
    /// `client_name` sent with the registration request.
    pub client_name: Option<String>,
}

impl OAuthDiscoveryConfig {
    pub fn new(
        resource_base_url: impl Into<String>,
        client_id: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            resource_base_url: resource_base_url.into(),
            client_id: client_id.into(),
            client_secret: None,
            redirect_uri: redirect_uri.into(),
            redirect_uris: Vec::new(),
            scope: None,
            use_dynamic_client_registration: true,
            client_name: None,
        }
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(secret.into());
        self
    }

    pub fn with_client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = Some(name.into());
        self
    }

    pub fn with_dynamic_registration(mut self, enabled: bool) -> Self {
        self.use_dynamic_client_registration = enabled;
        self
    }
}

type AuthorizationUrlHandler = Arc<dyn Fn(String) + Send + Sync>;

/// OAuth provider that discovers, registers, and authorizes on demand.
///
/// The first call to `headers()` runs discovery and (when advertised)
/// dynamic registration, builds the PKCE authorization URL, hands it to
/// the registered handler, and fails with
/// [`AuthError::AuthorizationPending`].  After the caller delivers the
/// redirect code via [`complete_authorization`](Self::complete_authorization),
/// subsequent `headers()` calls return the bearer token, refreshing behind
/// the expiry skew.
pub struct OAuthDiscoveryProvider {
    config: OAuthDiscoveryConfig,
    http: reqwest::Client,
    state: Mutex<OAuthState>,
    authorization_handler: Mutex<Option<AuthorizationUrlHandler>>,
}

impl OAuthDiscoveryProvider {
    pub fn new(config: OAuthDiscoveryConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
            state: Mutex::new(OAuthState::default()),
            authorization_handler: Mutex::new(None),
        }
    }

    /// Register the out-of-band callback that receives the authorization
    /// URL.  The core never opens a browser.
    pub async fn on_authorization_url(&self, handler: impl Fn(String) + Send + Sync + 'static) {
        *self.authorization_handler.lock().await = Some(Arc::new(handler));
    }

    /// Snapshot of the provider's credential state (for inspection/tests).
    pub async fn state_snapshot(&self) -> OAuthState {
        self.state.lock().await.clone()
    }

    /// Effective client id: the registered one when dynamic registration
    /// produced it, otherwise the configured one.  A user-supplied id is
    /// never silently replaced by anything else.
    pub async fn effective_client_id(&self) -> String {
        let state = self.state.lock().await;
        state
            .registered_client_id
            .clone()
            .unwrap_or_else(|| self.config.client_id.clone())
    }

    async fn effective_client_secret(&self) -> Option<String> {
        let state = self.state.lock().await;
        state
            .registered_client_secret
            .clone()
            .or_else(|| self.config.client_secret.clone())
    }

    /// Run discovery, registration, and authorization-URL construction.
    async fn begin_authorization(&self) -> Result<(), AuthError> {
        let metadata = {
            let state = self.state.lock().await;
            state.server_metadata.clone()
        };
        let metadata = match metadata {
            Some(metadata) => metadata,
            None => {
                let metadata =
                    discover_metadata(&self.http, &self.config.resource_base_url).await?;
                self.state.lock().await.server_metadata = Some(metadata.clone());
                metadata
            }
        };

        let scope = select_scope(
            self.config.scope.as_deref(),
            metadata.scopes_supported.as_deref(),
        );

        if self.config.use_dynamic_client_registration {
            if let Some(registration_endpoint) = &metadata.registration_endpoint {
                let already_registered = self
                    .state
                    .lock()
                    .await
                    .registered_client_id
                    .is_some();
                if !already_registered {
                    self.register_client(registration_endpoint, &scope).await?;
                }
            }
        }

        let verifier = generate_code_verifier();
        let challenge = code_challenge(&verifier);
        {
            let mut state = self.state.lock().await;
            state.code_verifier = Some(verifier);
            state.scope = Some(scope.clone());
        }

        let client_id = self.effective_client_id().await;
        let url = format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&code_challenge={}&code_challenge_method=S256&scope={}&resource={}",
            metadata.authorization_endpoint,
            urlencoding::encode(&client_id),
            urlencoding::encode(&self.config.redirect_uri),
            urlencoding::encode(&challenge),
            urlencoding::encode(&scope),
            urlencoding::encode(&self.config.resource_base_url),
        );

        match self.authorization_handler.lock().await.as_ref() {
            Some(handler) => handler(url),
            None => log::warn!("authorization URL issued but no handler registered: {}", url),
        }
        Ok(())
    }

    async fn register_client(
        &self,
        registration_endpoint: &str,
        scope: &str,
    ) -> Result<(), AuthError> {
        let mut redirect_uris = vec![self.config.redirect_uri.clone()];
        for uri in &self.config.redirect_uris {
            if !redirect_uris.contains(uri) {
                redirect_uris.push(uri.clone());
            }
        }
        let request = RegistrationRequest {
            redirect_uris,
            grant_types: vec![
                "authorization_code".to_string(),
                "refresh_token".to_string(),
            ],
            response_types: vec!["code".to_string()],
            application_type: "native".to_string(),
            // PKCE public client: no secret at the token endpoint.
            token_endpoint_auth_method: "none".to_string(),
            scope: scope.to_string(),
            client_name: self.config.client_name.clone(),
        };

        let response = self
            .http
            .post(registration_endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| AuthError::RegistrationFailed {
                status: 0,
                body: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::RegistrationFailed {
                status: status.as_u16(),
                body,
            });
        }

        let registered: RegistrationResponse =
            response
                .json()
                .await
                .map_err(|e| AuthError::RegistrationFailed {
                    status: status.as_u16(),
                    body: e.to_string(),
                })?;

        let mut state = self.state.lock().await;
        state.registered_client_id = Some(registered.client_id);
        state.registered_client_secret = registered.client_secret;
        Ok(())
    }

    /// Deliver the authorization code from the redirect and exchange it
    /// for tokens.  The scope used here is exactly the one chosen at
    /// registration time; it is dropped only when the server answers
    /// `invalid_scope`.
    pub async fn complete_authorization(&self, code: &str) -> Result<(), AuthError> {
        let (token_endpoint, verifier, scope) = {
            let state = self.state.lock().await;
            let metadata = state
                .server_metadata
                .as_ref()
                .ok_or_else(|| AuthError::Config("authorization not started".to_string()))?;
            let verifier = state
                .code_verifier
                .clone()
                .ok_or_else(|| AuthError::Config("missing code verifier".to_string()))?;
            (
                metadata.token_endpoint.clone(),
                verifier,
                state.scope.clone().unwrap_or_default(),
            )
        };
        let client_id = self.effective_client_id().await;

        let mut form = vec![
            ("grant_type", "authorization_code".to_string()),
            ("code", code.to_string()),
            ("redirect_uri", self.config.redirect_uri.clone()),
            ("client_id", client_id.clone()),
            ("code_verifier", verifier.clone()),
            ("scope", scope.clone()),
            ("resource", self.config.resource_base_url.clone()),
        ];
        if let Some(secret) = self.effective_client_secret().await {
            form.push(("client_secret", secret));
        }

        let tokens = match post_token_form(&self.http, &token_endpoint, &form).await {
            Ok(tokens) => tokens,
            Err(AuthError::InvalidScope(_)) => {
                // Retry once without the scope parameter.
                let retry_form: Vec<(&str, String)> = form
                    .iter()
                    .filter(|(k, _)| *k != "scope")
                    .cloned()
                    .collect();
                post_token_form(&self.http, &token_endpoint, &retry_form).await?
            }
            Err(other) => return Err(other),
        };

        let mut state = self.state.lock().await;
        state.expires_at = expires_at(tokens.expires_in);
        state.access_token = Some(tokens.access_token);
        state.refresh_token = tokens.refresh_token;
        if let Some(granted) = tokens.scope {
            state.scope = Some(granted);
        }
        state.code_verifier = None;
        Ok(())
    }
}

#[async_trait]
impl AuthProvider for OAuthDiscoveryProvider {
    fn scheme_name(&self) -> &str {
        "oauth"
    }

    async fn headers(&self) -> Result<HashMap<String, String>, AuthError> {
        {
            let state = self.state.lock().await;
            if let Some(token) = &state.access_token {
                if token_is_fresh(state.expires_at) {
                    return Ok(HashMap::from([(
                        "Authorization".to_string(),
                        format!("Bearer {}", token),
                    )]));
                }
            }
        }

        let has_refresh = self.state.lock().await.refresh_token.is_some();
        if has_refresh {
            self.refresh().await?;
            let state = self.state.lock().await;
            let token = state.access_token.as_ref().ok_or(AuthError::Expired)?;
            return Ok(HashMap::from([(
                "Authorization".to_string(),
                format!("Bearer {}", token),
            )]));
        }

        self.begin_authorization().await?;
        Err(AuthError::AuthorizationPending)
    }

    async fn is_valid(&self) -> bool {
        let state = self.state.lock().await;
        state.access_token.is_some() && token_is_fresh(state.expires_at)
    }

    async fn refresh(&self) -> Result<(), AuthError> {
        let (token_endpoint, refresh_token, scope) = {
            let state = self.state.lock().await;
            let endpoint = state
                .server_metadata
                .as_ref()
                .map(|m| m.token_endpoint.clone())
                .ok_or_else(|| AuthError::Config("no token endpoint discovered".to_string()))?;
            let refresh = state.refresh_token.clone().ok_or(AuthError::Expired)?;
            (endpoint, refresh, state.scope.clone())
        };
        let client_id = self.effective_client_id().await;

        let mut form = vec![
            ("grant_type", "refresh_token".to_string()),
            ("refresh_token", refresh_token),
            ("client_id", client_id),
        ];
        if let Some(scope) = scope {
            form.push(("scope", scope));
        }

        let tokens = post_token_form(&self.http, &token_endpoint, &form)
            .await
            .map_err(|e| match e {
                AuthError::TokenExchangeFailed(msg) => AuthError::RefreshFailed(msg),
                other => other,
            })?;

        let mut state = self.state.lock().await;
        state.expires_at = expires_at(tokens.expires_in);
        state.access_token = Some(tokens.access_token);
        if tokens.refresh_token.is_some() {
            state.refresh_token = tokens.refresh_token;
        }
        Ok(())
    }
}

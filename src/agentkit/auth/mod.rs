//! Authentication providers for remote servers.
//!
//! Every provider answers three questions: which headers go on the next
//! request ([`AuthProvider::headers`]), whether the cached credentials are
//! still usable ([`AuthProvider::is_valid`]), and how to refresh them
//! ([`AuthProvider::refresh`], a no-op for static schemes).
//!
//! Static schemes (bearer, basic, API key) live here; the OAuth machinery
//! (direct tokens, metadata discovery, PKCE, dynamic client registration)
//! lives in [`oauth`].

pub mod oauth;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rpc::http::HeaderSource;
use rpc::transport::TransportError;

use crate::agentkit::error::AuthError;

pub use oauth::{OAuthDiscoveryConfig, OAuthDiscoveryProvider, OAuthProvider};

/// Common interface of every authentication scheme.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Scheme identifier ("bearer", "basic", "apikey", "oauth").
    fn scheme_name(&self) -> &str;

    /// Headers to attach to the next outbound request.
    async fn headers(&self) -> Result<HashMap<String, String>, AuthError>;

    /// Whether the cached credentials are currently usable.
    async fn is_valid(&self) -> bool {
        true
    }

    /// Refresh the credentials.  Static schemes inherit the no-op.
    async fn refresh(&self) -> Result<(), AuthError> {
        Ok(())
    }
}

impl std::fmt::Debug for dyn AuthProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthProvider")
            .field("scheme", &self.scheme_name())
            .finish()
    }
}

/// `Authorization: Bearer <token>`.
pub struct BearerAuthProvider {
    token: String,
}

impl BearerAuthProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl AuthProvider for BearerAuthProvider {
    fn scheme_name(&self) -> &str {
        "bearer"
    }

    async fn headers(&self) -> Result<HashMap<String, String>, AuthError> {
        Ok(HashMap::from([(
            "Authorization".to_string(),
            format!("Bearer {}", self.token),
        )]))
    }
}

/// `Authorization: Basic base64(user:pass)`.
pub struct BasicAuthProvider {
    username: String,
    password: String,
}

impl BasicAuthProvider {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

#[async_trait]
impl AuthProvider for BasicAuthProvider {
    fn scheme_name(&self) -> &str {
        "basic"
    }

    async fn headers(&self) -> Result<HashMap<String, String>, AuthError> {
        let credentials = BASE64.encode(format!("{}:{}", self.username, self.password));
        Ok(HashMap::from([(
            "Authorization".to_string(),
            format!("Basic {}", credentials),
        )]))
    }
}

/// API key in a configurable header, with an optional value prefix.
///
/// # Example
///
/// ```rust
/// use agentkit::auth::ApiKeyAuthProvider;
///
/// // X-API-Key: secret
/// let plain = ApiKeyAuthProvider::new("secret");
/// // Authorization: Token secret
/// let prefixed = ApiKeyAuthProvider::new("secret")
///     .with_header_name("Authorization")
///     .with_prefix("Token ");
/// ```
pub struct ApiKeyAuthProvider {
    key: String,
    header_name: String,
    prefix: Option<String>,
}

impl ApiKeyAuthProvider {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            header_name: "X-API-Key".to_string(),
            prefix: None,
        }
    }

    /// Override the header the key is sent in.
    pub fn with_header_name(mut self, name: impl Into<String>) -> Self {
        self.header_name = name.into();
        self
    }

    /// Prepend a prefix to the header value.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }
}

#[async_trait]
impl AuthProvider for ApiKeyAuthProvider {
    fn scheme_name(&self) -> &str {
        "apikey"
    }

    async fn headers(&self) -> Result<HashMap<String, String>, AuthError> {
        let value = match &self.prefix {
            Some(prefix) => format!("{}{}", prefix, self.key),
            None => self.key.clone(),
        };
        Ok(HashMap::from([(self.header_name.clone(), value)]))
    }
}

/// Bridges an [`AuthProvider`] into the transport layer's [`HeaderSource`].
///
/// The transport calls `on_unauthorized` exactly once after a 401; the
/// adapter maps that to the provider's `refresh`.
pub struct AuthHeaderSource {
    provider: Arc<dyn AuthProvider>,
}

impl AuthHeaderSource {
    pub fn new(provider: Arc<dyn AuthProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl HeaderSource for AuthHeaderSource {
    async fn headers(&self) -> Result<HashMap<String, String>, TransportError> {
        self.provider
            .headers()
            .await
            .map_err(|e| TransportError::Unauthorized(e.to_string()))
    }

    async fn on_unauthorized(&self) -> bool {
        match self.provider.refresh().await {
            Ok(()) => true,
            Err(err) => {
                log::warn!(
                    "{} credential refresh failed: {}",
                    self.provider.scheme_name(),
                    err
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bearer_header() {
        let provider = BearerAuthProvider::new("abc123");
        let headers = provider.headers().await.unwrap();
        assert_eq!(headers["Authorization"], "Bearer abc123");
        assert_eq!(provider.scheme_name(), "bearer");
        assert!(provider.is_valid().await);
    }

    #[tokio::test]
    async fn test_basic_header_is_base64() {
        let provider = BasicAuthProvider::new("alice", "s3cret");
        let headers = provider.headers().await.unwrap();
        let value = headers["Authorization"].strip_prefix("Basic ").unwrap();
        let decoded = BASE64.decode(value).unwrap();
        assert_eq!(decoded, b"alice:s3cret");
    }

    #[tokio::test]
    async fn test_api_key_default_header() {
        let provider = ApiKeyAuthProvider::new("key-1");
        let headers = provider.headers().await.unwrap();
        assert_eq!(headers["X-API-Key"], "key-1");
    }

    #[tokio::test]
    async fn test_api_key_custom_header_and_prefix() {
        let provider = ApiKeyAuthProvider::new("key-2")
            .with_header_name("Authorization")
            .with_prefix("Token ");
        let headers = provider.headers().await.unwrap();
        assert_eq!(headers["Authorization"], "Token key-2");
    }

    #[tokio::test]
    async fn test_static_refresh_is_noop() {
        let provider = BearerAuthProvider::new("abc");
        assert!(provider.refresh().await.is_ok());
    }

    #[tokio::test]
    async fn test_header_source_adapter_maps_refresh() {
        let source = AuthHeaderSource::new(Arc::new(BearerAuthProvider::new("abc")));
        let headers = rpc::http::HeaderSource::headers(&source).await.unwrap();
        assert!(headers.contains_key("Authorization"));
        assert!(source.on_unauthorized().await);
    }
}

//! Session configuration and client factories.
//!
//! Parses the JSON configuration that describes which tool servers a
//! session talks to — local processes booted over stdio and remote
//! servers reached over Streamable HTTP with an auth scheme — and builds
//! the matching transports, auth providers, and MCP clients.
//!
//! # Configuration shape
//!
//! ```json
//! {
//!   "serverBootCalls": [
//!     {"name": "files", "command": "files-mcp", "arguments": ["--stdio"], "environment": {}}
//!   ],
//!   "remoteServers": {
//!     "search": {
//!       "url": "https://search.example.com/mcp",
//!       "authType": "bearer",
//!       "authConfig": {"token": "..."},
//!       "connectionTimeout": 15,
//!       "requestTimeout": 60
//!     }
//!   },
//!   "globalEnvironment": {"LOG_LEVEL": "info"}
//! }
//! ```
//!
//! When a remote server carries no usable `authConfig`, environment
//! variables provide a fallback: for a server named `X`, `X_TOKEN`
//! (bearer), `X_API_KEY` (apikey), or `X_USERNAME` + `X_PASSWORD`
//! (basic).  The name is uppercased and non-alphanumerics become `_`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agentkit::auth::oauth::OAuthDiscoveryConfig;
use crate::agentkit::auth::{
    ApiKeyAuthProvider, AuthHeaderSource, AuthProvider, BasicAuthProvider, BearerAuthProvider,
    OAuthDiscoveryProvider, OAuthProvider,
};
use crate::agentkit::error::AgentError;
use crate::agentkit::mcp::client::McpClient;
use rpc::http::StreamableHttpTransport;
use rpc::stdio::StdioTransport;

/// Process exit codes for CLI collaborators.
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const CONFIG_ERROR: i32 = 1;
    pub const AUTH_FAILURE: i32 = 2;
    pub const TRANSPORT_FAILURE: i32 = 3;
}

/// One stdio server to boot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerBootCall {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub arguments: Vec<String>,
    #[serde(default)]
    pub environment: HashMap<String, String>,
}

/// Supported remote-server auth schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
    Bearer,
    Basic,
    Apikey,
    Oauth,
}

/// One remote MCP server entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteServerConfig {
    pub url: String,
    pub auth_type: AuthType,
    #[serde(default)]
    pub auth_config: Value,
    /// Seconds; defaults to the client default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_timeout: Option<u64>,
    /// Seconds; defaults to the client default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
}

/// OAuth block of `authConfig`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthAuthConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub token_endpoint: Option<String>,
    #[serde(rename = "redirectURI")]
    pub redirect_uri: Option<String>,
    pub scope: Option<String>,
    #[serde(rename = "useOAuthDiscovery")]
    pub use_oauth_discovery: Option<bool>,
    pub use_dynamic_client_registration: Option<bool>,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
    pub client_name: Option<String>,
}

/// Top-level session configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    #[serde(default)]
    pub server_boot_calls: Vec<ServerBootCall>,
    #[serde(default)]
    pub remote_servers: HashMap<String, RemoteServerConfig>,
    #[serde(default)]
    pub global_environment: HashMap<String, String>,
}

impl SessionConfig {
    /// Parse a configuration document.
    pub fn parse(json: &str) -> Result<Self, AgentError> {
        serde_json::from_str(json).map_err(|e| AgentError::Config(format!("bad config: {}", e)))
    }

    /// Load and parse a configuration file.
    pub async fn load(path: &std::path::Path) -> Result<Self, AgentError> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| AgentError::Config(format!("{}: {}", path.display(), e)))?;
        Self::parse(&raw)
    }
}

/// `server name → environment variable prefix`: uppercased, every
/// non-alphanumeric replaced with `_`.
pub fn env_prefix(server_name: &str) -> String {
    server_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Environment-based auth fallback for a server name.
///
/// Recognizes `<NAME>_TOKEN` (bearer), `<NAME>_API_KEY` (apikey), and
/// `<NAME>_USERNAME` + `<NAME>_PASSWORD` (basic), in that order.
pub fn auth_provider_from_env(server_name: &str) -> Option<Arc<dyn AuthProvider>> {
    let prefix = env_prefix(server_name);
    if let Ok(token) = std::env::var(format!("{}_TOKEN", prefix)) {
        return Some(Arc::new(BearerAuthProvider::new(token)));
    }
    if let Ok(key) = std::env::var(format!("{}_API_KEY", prefix)) {
        return Some(Arc::new(ApiKeyAuthProvider::new(key)));
    }
    if let (Ok(username), Ok(password)) = (
        std::env::var(format!("{}_USERNAME", prefix)),
        std::env::var(format!("{}_PASSWORD", prefix)),
    ) {
        return Some(Arc::new(BasicAuthProvider::new(username, password)));
    }
    None
}

fn config_str(config: &Value, key: &str) -> Option<String> {
    config.get(key).and_then(Value::as_str).map(String::from)
}

/// Build the auth provider for one remote server entry, falling back to
/// environment variables when `authConfig` lacks the needed fields.
pub fn build_auth_provider(
    server_name: &str,
    config: &RemoteServerConfig,
) -> Result<Arc<dyn AuthProvider>, AgentError> {
    let missing = |field: &str| {
        AgentError::Config(format!(
            "remote server {}: authConfig missing {}",
            server_name, field
        ))
    };

    match config.auth_type {
        AuthType::Bearer => match config_str(&config.auth_config, "token") {
            Some(token) => Ok(Arc::new(BearerAuthProvider::new(token))),
            None => auth_provider_from_env(server_name).ok_or_else(|| missing("token")),
        },
        AuthType::Basic => {
            let username = config_str(&config.auth_config, "username");
            let password = config_str(&config.auth_config, "password");
            match (username, password) {
                (Some(username), Some(password)) => {
                    Ok(Arc::new(BasicAuthProvider::new(username, password)))
                }
                _ => auth_provider_from_env(server_name)
                    .ok_or_else(|| missing("username/password")),
            }
        }
        AuthType::Apikey => match config_str(&config.auth_config, "key") {
            Some(key) => {
                let mut provider = ApiKeyAuthProvider::new(key);
                if let Some(header) = config_str(&config.auth_config, "headerName") {
                    provider = provider.with_header_name(header);
                }
                if let Some(prefix) = config_str(&config.auth_config, "prefix") {
                    provider = provider.with_prefix(prefix);
                }
                Ok(Arc::new(provider))
            }
            None => auth_provider_from_env(server_name).ok_or_else(|| missing("key")),
        },
        AuthType::Oauth => {
            let oauth: OAuthAuthConfig = serde_json::from_value(config.auth_config.clone())
                .map_err(|e| {
                    AgentError::Config(format!(
                        "remote server {}: bad oauth authConfig: {}",
                        server_name, e
                    ))
                })?;
            build_oauth_provider(server_name, &config.url, oauth)
        }
    }
}

fn build_oauth_provider(
    server_name: &str,
    server_url: &str,
    oauth: OAuthAuthConfig,
) -> Result<Arc<dyn AuthProvider>, AgentError> {
    if oauth.use_oauth_discovery.unwrap_or(false) {
        let client_id = oauth.client_id.ok_or_else(|| {
            AgentError::Config(format!("remote server {}: oauth needs clientId", server_name))
        })?;
        let redirect_uri = oauth.redirect_uri.ok_or_else(|| {
            AgentError::Config(format!(
                "remote server {}: oauth discovery needs redirectURI",
                server_name
            ))
        })?;
        let mut discovery = OAuthDiscoveryConfig::new(server_url, client_id, redirect_uri)
            .with_dynamic_registration(oauth.use_dynamic_client_registration.unwrap_or(true));
        if let Some(secret) = oauth.client_secret {
            discovery = discovery.with_client_secret(secret);
        }
        if let Some(scope) = oauth.scope {
            discovery = discovery.with_scope(scope);
        }
        if let Some(name) = oauth.client_name {
            discovery = discovery.with_client_name(name);
        }
        discovery.redirect_uris = oauth.redirect_uris;
        return Ok(Arc::new(OAuthDiscoveryProvider::new(discovery)));
    }

    let client_id = oauth.client_id.unwrap_or_default();
    let access_token = oauth.access_token.ok_or_else(|| {
        AgentError::Config(format!(
            "remote server {}: oauth without discovery needs accessToken",
            server_name
        ))
    })?;
    let mut provider = OAuthProvider::new(client_id, access_token);
    if let Some(secret) = oauth.client_secret {
        provider = provider.with_client_secret(secret);
    }
    if let Some(refresh) = oauth.refresh_token {
        provider = provider.with_refresh_token(refresh);
    }
    if let Some(endpoint) = oauth.token_endpoint {
        provider = provider.with_token_endpoint(endpoint);
    }
    if let Some(scope) = oauth.scope {
        provider = provider.with_scope(scope);
    }
    Ok(Arc::new(provider))
}

/// Build the Streamable HTTP transport for a remote server entry.
pub fn build_remote_transport(
    config: &RemoteServerConfig,
    auth: Arc<dyn AuthProvider>,
) -> StreamableHttpTransport {
    let mut transport = StreamableHttpTransport::new(&config.url)
        .with_header_source(Arc::new(AuthHeaderSource::new(auth)));
    if let Some(seconds) = config.request_timeout {
        transport = transport.with_request_timeout(Duration::from_secs(seconds));
    }
    if let Some(retries) = config.max_retries {
        transport = transport.with_max_retries(retries);
    }
    transport
}

/// Build the stdio transport for a server boot call, merging the global
/// environment under the call's own.
pub fn build_boot_transport(
    call: &ServerBootCall,
    global_environment: &HashMap<String, String>,
) -> Result<StdioTransport, AgentError> {
    let mut environment = global_environment.clone();
    environment.extend(call.environment.clone());
    StdioTransport::spawn(&call.command, &call.arguments, &environment).map_err(AgentError::from)
}

/// Boot a stdio server and connect an MCP client to it.
pub async fn connect_boot_server(
    call: &ServerBootCall,
    global_environment: &HashMap<String, String>,
) -> Result<McpClient, AgentError> {
    let transport = build_boot_transport(call, global_environment)?;
    let client = McpClient::new(call.name.clone(), env!("CARGO_PKG_VERSION"));
    client.connect(Box::new(transport)).await?;
    Ok(client)
}

/// Connect an MCP client to a remote server entry.
pub async fn connect_remote_server(
    server_name: &str,
    config: &RemoteServerConfig,
) -> Result<McpClient, AgentError> {
    let auth = build_auth_provider(server_name, config)?;
    let transport = build_remote_transport(config, auth);

    let connection_timeout = config
        .connection_timeout
        .map(Duration::from_secs)
        .unwrap_or(crate::agentkit::mcp::client::DEFAULT_CONNECTION_TIMEOUT);
    let request_timeout = config
        .request_timeout
        .map(Duration::from_secs)
        .unwrap_or(crate::agentkit::mcp::client::DEFAULT_REQUEST_TIMEOUT);

    let client = McpClient::with_timeouts(
        server_name.to_string(),
        env!("CARGO_PKG_VERSION"),
        connection_timeout,
        request_timeout,
    );
    client.connect(Box::new(transport)).await?;
    Ok(client)
}

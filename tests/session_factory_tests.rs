//! Configuration-driven client construction against a live server.

use std::sync::Arc;

use agentkit::mcp::http_adapter::{start_http_server, HttpServerConfig};
use agentkit::mcp::server::McpServer;
use agentkit::mcp::types::{Content, McpTool};
use agentkit::session_config::{connect_remote_server, SessionConfig};
use serde_json::json;

async fn echo_server() -> McpServer {
    let server = McpServer::new("factory-test-server", "0.1.0");
    server
        .register_tool(
            McpTool {
                name: "echo".to_string(),
                description: Some("Echoes text back".to_string()),
                input_schema: json!({
                    "type": "object",
                    "properties": {"text": {"type": "string"}},
                    "required": ["text"]
                }),
            },
            Arc::new(|args| {
                Box::pin(async move {
                    Ok(vec![Content::text(args["text"].as_str().unwrap_or_default())])
                })
            }),
        )
        .await;
    server
}

#[tokio::test]
async fn test_remote_server_from_config() {
    let instance = start_http_server(
        echo_server().await,
        HttpServerConfig::new("127.0.0.1:0".parse().unwrap()).with_bearer_token("cfg-token"),
    )
    .await
    .unwrap();

    let raw = format!(
        r#"{{
            "remoteServers": {{
                "echo": {{
                    "url": "http://{}/mcp",
                    "authType": "bearer",
                    "authConfig": {{"token": "cfg-token"}},
                    "connectionTimeout": 5,
                    "requestTimeout": 5
                }}
            }}
        }}"#,
        instance.get_addr()
    );
    let config = SessionConfig::parse(&raw).unwrap();
    let entry = &config.remote_servers["echo"];

    let client = connect_remote_server("echo", entry).await.unwrap();
    let content = client
        .call_tool("echo", json!({"text": "configured"}))
        .await
        .unwrap();
    assert_eq!(content, vec![Content::text("configured")]);

    instance.shutdown();
}

#[tokio::test]
async fn test_remote_server_with_env_fallback() {
    let instance = start_http_server(
        echo_server().await,
        HttpServerConfig::new("127.0.0.1:0".parse().unwrap()).with_bearer_token("env-token"),
    )
    .await
    .unwrap();

    // No credentials in the config; the ENV_ECHO_TOKEN variable supplies
    // the bearer token for the server named "env-echo".
    std::env::set_var("ENV_ECHO_TOKEN", "env-token");
    let raw = format!(
        r#"{{
            "remoteServers": {{
                "env-echo": {{
                    "url": "http://{}/mcp",
                    "authType": "bearer",
                    "authConfig": {{}}
                }}
            }}
        }}"#,
        instance.get_addr()
    );
    let config = SessionConfig::parse(&raw).unwrap();
    let entry = &config.remote_servers["env-echo"];

    let client = connect_remote_server("env-echo", entry).await.unwrap();
    let content = client
        .call_tool("echo", json!({"text": "from env"}))
        .await
        .unwrap();
    assert_eq!(content, vec![Content::text("from env")]);

    std::env::remove_var("ENV_ECHO_TOKEN");
    instance.shutdown();
}

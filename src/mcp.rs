use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use crate::error::{ConsoleError, Result};
use crate::service::SearchConsoleService;
use crate::tools::{call_tool, tool_definitions};

const PROTOCOL_VERSION: &str = "2024-11-05";

#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Serialize)]
pub struct RpcResponse {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

#[derive(Debug, Serialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

#[derive(Debug, Deserialize)]
struct ToolCallParams {
    name: String,
    #[serde(default)]
    arguments: Option<Value>,
}

pub async fn run_stdio(service: SearchConsoleService) -> Result<()> {
    let stdin = tokio::io::stdin();
    let mut reader = BufReader::new(stdin).lines();
    let mut stdout = tokio::io::stdout();
    info!("Search Console MCP server running on stdio");

    while let Some(line) = reader.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let req: RpcRequest = match serde_json::from_str(&line) {
            Ok(r) => r,
            Err(e) => {
                write_response(&mut stdout, parse_error(e)).await?;
                continue;
            }
        };

        if let Some(resp) = process_request(&service, req).await {
            write_response(&mut stdout, resp).await?;
        }
    }

    Ok(())
}

/// Handles one request. Notifications yield no response.
pub async fn process_request(service: &SearchConsoleService, req: RpcRequest) -> Option<RpcResponse> {
    debug!(method = %req.method, "rpc request");
    let resp = match req.method.as_str() {
        "initialize" => handle_initialize(&req),
        "notifications/initialized" if req.id.is_null() => return None,
        "notifications/initialized" | "ping" => rpc_result(&req, json!({})),
        "tools/list" => rpc_result(&req, json!({ "tools": tool_definitions() })),
        "tools/call" => handle_call_tool(service, &req).await,
        _ if req.id.is_null() && req.method.starts_with("notifications/") => return None,
        _ => rpc_error(&req, -32601, format!("method not found: {}", req.method)),
    };
    Some(resp)
}

fn handle_initialize(req: &RpcRequest) -> RpcResponse {
    rpc_result(
        req,
        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {
                "tools": {}
            },
            "serverInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION")
            }
        }),
    )
}

async fn handle_call_tool(service: &SearchConsoleService, req: &RpcRequest) -> RpcResponse {
    let params: ToolCallParams = match serde_json::from_value(req.params.clone()) {
        Ok(p) => p,
        Err(e) => return rpc_error(req, -32602, format!("invalid params: {e}")),
    };

    match call_tool(service, &params.name, params.arguments).await {
        Ok(value) => match serde_json::to_string_pretty(&value) {
            Ok(text) => rpc_result(req, json!({ "content": [{ "type": "text", "text": text }] })),
            Err(e) => rpc_error(req, -32603, e.to_string()),
        },
        Err(e) => {
            warn!(tool = %params.name, error = %e, "tool call failed");
            let code = match e {
                ConsoleError::Validation(_) | ConsoleError::InvalidInput(_) => -32602,
                _ => -32603,
            };
            rpc_error(req, code, tool_error_message(e))
        }
    }
}

fn tool_error_message(e: ConsoleError) -> String {
    match e {
        ConsoleError::InvalidInput(message) => message,
        other => other.to_string(),
    }
}

pub fn parse_error(e: impl std::fmt::Display) -> RpcResponse {
    RpcResponse {
        jsonrpc: "2.0",
        id: Value::Null,
        result: None,
        error: Some(RpcError {
            code: -32700,
            message: format!("parse error: {e}"),
        }),
    }
}

async fn write_response(stdout: &mut tokio::io::Stdout, resp: RpcResponse) -> Result<()> {
    let line = serde_json::to_string(&resp)?;
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await?;
    Ok(())
}

fn rpc_result(req: &RpcRequest, result: Value) -> RpcResponse {
    RpcResponse {
        jsonrpc: "2.0",
        id: req.id.clone(),
        result: Some(result),
        error: None,
    }
}

fn rpc_error(req: &RpcRequest, code: i32, message: String) -> RpcResponse {
    RpcResponse {
        jsonrpc: "2.0",
        id: req.id.clone(),
        result: None,
        error: Some(RpcError { code, message }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::fake::FakeApi;
    use crate::model::{AnalyticsRow, SiteEntry};
    use std::sync::Arc;

    fn service(api: FakeApi) -> SearchConsoleService {
        SearchConsoleService::new(Arc::new(api))
    }

    fn request(id: Value, method: &str, params: Value) -> RpcRequest {
        RpcRequest {
            id,
            method: method.to_string(),
            params,
        }
    }

    fn result_text(resp: &RpcResponse) -> Value {
        let result = resp.result.as_ref().expect("result");
        let text = result["content"][0]["text"].as_str().expect("text content");
        serde_json::from_str(text).unwrap()
    }

    #[tokio::test]
    async fn initialize_reports_protocol_and_tools_capability() {
        let resp = process_request(&service(FakeApi::default()), request(json!(1), "initialize", Value::Null))
            .await
            .unwrap();
        let result = resp.result.unwrap();
        assert_eq!(result["protocolVersion"], "2024-11-05");
        assert!(result["capabilities"]["tools"].is_object());
        assert_eq!(result["serverInfo"]["name"], "search-console-mcp");
    }

    #[tokio::test]
    async fn initialized_notification_gets_no_reply() {
        let svc = service(FakeApi::default());
        let resp = process_request(&svc, request(Value::Null, "notifications/initialized", Value::Null)).await;
        assert!(resp.is_none());
        let resp = process_request(&svc, request(Value::Null, "notifications/cancelled", json!({}))).await;
        assert!(resp.is_none());
    }

    #[tokio::test]
    async fn unknown_method_is_32601() {
        let resp = process_request(&service(FakeApi::default()), request(json!(7), "resources/list", Value::Null))
            .await
            .unwrap();
        let err = resp.error.unwrap();
        assert_eq!(err.code, -32601);
        assert_eq!(resp.id, json!(7));
    }

    #[tokio::test]
    async fn tools_list_includes_every_tool() {
        let resp = process_request(&service(FakeApi::default()), request(json!(2), "tools/list", Value::Null))
            .await
            .unwrap();
        let tools = resp.result.unwrap()["tools"].as_array().unwrap().len();
        assert_eq!(tools, 8);
    }

    #[tokio::test]
    async fn list_sites_returns_text_content() {
        let svc = service(FakeApi {
            sites: vec![SiteEntry {
                site_url: "sc-domain:example.com".into(),
                permission_level: "siteOwner".into(),
            }],
            ..FakeApi::default()
        });
        let resp = process_request(&svc, request(json!(3), "tools/call", json!({ "name": "list_sites" })))
            .await
            .unwrap();
        let body = result_text(&resp);
        assert_eq!(body["siteEntry"][0]["siteUrl"], "sc-domain:example.com");
    }

    #[tokio::test]
    async fn invalid_arguments_list_every_field() {
        let resp = process_request(
            &service(FakeApi::default()),
            request(
                json!(4),
                "tools/call",
                json!({
                    "name": "search_analytics",
                    "arguments": { "startDate": "2024-13-01", "endDate": "2024-01-31", "rowLimit": 0 }
                }),
            ),
        )
        .await
        .unwrap();
        let err = resp.error.unwrap();
        assert_eq!(err.code, -32602);
        assert!(err.message.starts_with("Invalid arguments: siteUrl: required, startDate: "));
        assert!(err.message.contains("rowLimit: must be an integer between 1 and 25000"));
    }

    #[tokio::test]
    async fn missing_arguments_and_unknown_tool() {
        let svc = service(FakeApi::default());
        let resp = process_request(&svc, request(json!(5), "tools/call", json!({ "name": "search_analytics" })))
            .await
            .unwrap();
        assert_eq!(resp.error.unwrap().message, "Arguments are required");

        let resp = process_request(&svc, request(json!(6), "tools/call", json!({ "name": "delete_site" })))
            .await
            .unwrap();
        assert_eq!(resp.error.unwrap().message, "Unknown tool: delete_site");
    }

    #[tokio::test]
    async fn enhanced_tool_returns_quick_wins() {
        let svc = service(FakeApi {
            rows: Some(vec![AnalyticsRow {
                keys: vec!["buy shoes".into(), "/shoes".into()],
                clicks: 2.0,
                impressions: 100.0,
                ctr: 0.02,
                position: 6.5,
            }]),
            ..FakeApi::default()
        });
        let resp = process_request(
            &svc,
            request(
                json!(8),
                "tools/call",
                json!({
                    "name": "enhanced_search_analytics",
                    "arguments": {
                        "siteUrl": "https://example.com/",
                        "startDate": "2024-01-01",
                        "endDate": "2024-01-31",
                        "dimensions": "query,page",
                        "enableQuickWins": true
                    }
                }),
            ),
        )
        .await
        .unwrap();
        let body = result_text(&resp);
        assert_eq!(body["quickWinsCount"], 1);
        assert_eq!(body["quickWins"][0]["additionalClicks"], 3);
        assert_eq!(body["enhancedFeatures"]["regexFilterApplied"], false);
        assert_eq!(body["rows"][0]["keys"][0], "buy shoes");
    }

    #[tokio::test]
    async fn remote_failure_is_an_internal_error() {
        let svc = service(FakeApi {
            unavailable: true,
            ..FakeApi::default()
        });
        let resp = process_request(&svc, request(json!(9), "tools/call", json!({ "name": "list_sites" })))
            .await
            .unwrap();
        let err = resp.error.unwrap();
        assert_eq!(err.code, -32603);
        assert!(err.message.contains("503"));
    }
}

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, MCP_PROTOCOL_VERSION};
use super::transport::StdioTransport;
use crate::query::Query;
use crate::tools::{SearchBooksTool, Tool};
use crate::unitrad::UnitradClient;

/// Cancellation tokens of in-flight `tools/call` requests, keyed by the
/// JSON-RPC request id. Entries are removed on every exit path.
type InflightMap = Arc<Mutex<HashMap<String, CancellationToken>>>;

/// Stdio MCP server exposing the single `nlib_search_books` tool.
///
/// Each `tools/call` runs on its own task with its own session and
/// aggregate; the only state shared across requests is this registry of
/// cancellation tokens.
pub struct McpServer {
    tool: Arc<SearchBooksTool<UnitradClient>>,
    outbound: mpsc::Sender<String>,
    inflight: InflightMap,
}

impl McpServer {
    pub fn new(tool: SearchBooksTool<UnitradClient>, outbound: mpsc::Sender<String>) -> Self {
        Self {
            tool: Arc::new(tool),
            outbound,
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Serve until the host closes stdin.
    pub async fn serve(tool: SearchBooksTool<UnitradClient>) -> anyhow::Result<()> {
        let mut transport = StdioTransport::new();
        let server = McpServer::new(tool, transport.sender());
        log::info!("MCP server listening on stdio");
        while let Some(line) = transport.recv().await? {
            server.handle_line(&line).await;
        }
        log::info!("stdin closed, shutting down");
        Ok(())
    }

    /// Decode and dispatch one inbound line. Empty lines are ignored.
    pub async fn handle_line(&self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        let request: JsonRpcRequest = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(e) => {
                log::warn!("unparseable message from host: {e}");
                self.send(JsonRpcResponse::failure(
                    Value::Null,
                    JsonRpcError::parse_error("message is not valid JSON-RPC"),
                ))
                .await;
                return;
            }
        };
        self.dispatch(request).await;
    }

    async fn dispatch(&self, request: JsonRpcRequest) {
        log::debug!("inbound method: {}", request.method);
        match request.method.as_str() {
            "initialize" => {
                let result = json!({
                    "protocolVersion": MCP_PROTOCOL_VERSION,
                    "capabilities": { "tools": {} },
                    "serverInfo": {
                        "name": env!("CARGO_PKG_NAME"),
                        "version": env!("CARGO_PKG_VERSION"),
                    },
                });
                self.reply(request, result).await;
            }
            "notifications/initialized" => {}
            "ping" => self.reply(request, json!({})).await,
            "tools/list" => {
                let result = json!({
                    "tools": [{
                        "name": self.tool.name(),
                        "description": SearchBooksTool::<UnitradClient>::description(),
                        "inputSchema": SearchBooksTool::<UnitradClient>::input_schema(),
                    }],
                });
                self.reply(request, result).await;
            }
            "tools/call" => self.handle_tool_call(request).await,
            "notifications/cancelled" => self.handle_cancelled(request),
            method => {
                if request.is_notification() {
                    log::debug!("ignoring unknown notification: {method}");
                } else {
                    let error = JsonRpcError::method_not_found(method);
                    self.send(JsonRpcResponse::failure(
                        request.id.unwrap_or(Value::Null),
                        error,
                    ))
                    .await;
                }
            }
        }
    }

    async fn handle_tool_call(&self, request: JsonRpcRequest) {
        let Some(id) = request.id else {
            log::warn!("tools/call without an id, dropping");
            return;
        };
        let params = request.params.unwrap_or_else(|| json!({}));

        let tool_name = params
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if tool_name != self.tool.name() {
            self.send(JsonRpcResponse::failure(
                id,
                JsonRpcError::invalid_params(format!("unknown tool: {tool_name}")),
            ))
            .await;
            return;
        }

        let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));
        let query: Query = match serde_json::from_value(arguments) {
            Ok(query) => query,
            Err(e) => {
                self.send(JsonRpcResponse::failure(
                    id,
                    JsonRpcError::invalid_params(format!("malformed arguments: {e}")),
                ))
                .await;
                return;
            }
        };

        let key = id.to_string();
        let cancel = CancellationToken::new();
        self.inflight
            .lock()
            .unwrap()
            .insert(key.clone(), cancel.clone());

        let tool = Arc::clone(&self.tool);
        let outbound = self.outbound.clone();
        let inflight = Arc::clone(&self.inflight);
        tokio::spawn(async move {
            let outcome = tool.run((query, cancel)).await;
            inflight.lock().unwrap().remove(&key);

            let response = match outcome {
                Ok(result) => {
                    let text = serde_json::to_string(&result)
                        .unwrap_or_else(|e| format!(r#"{{"error":"serialization: {e}"}}"#));
                    JsonRpcResponse::success(
                        id,
                        json!({
                            "content": [{ "type": "text", "text": text }],
                            "isError": false,
                        }),
                    )
                }
                Err(err) => JsonRpcResponse::success(
                    id,
                    json!({
                        "content": [{
                            "type": "text",
                            "text": json!({ "error": err.category() }).to_string(),
                        }],
                        "isError": true,
                    }),
                ),
            };
            send_line(&outbound, response).await;
        });
    }

    fn handle_cancelled(&self, request: JsonRpcRequest) {
        let key = request
            .params
            .as_ref()
            .and_then(|p| p.get("requestId"))
            .map(Value::to_string);
        match key.and_then(|k| self.inflight.lock().unwrap().remove(&k)) {
            Some(token) => {
                log::info!("host cancelled an in-flight search");
                token.cancel();
            }
            None => log::debug!("cancellation for unknown or finished request"),
        }
    }

    async fn reply(&self, request: JsonRpcRequest, result: Value) {
        if let Some(id) = request.id {
            self.send(JsonRpcResponse::success(id, result)).await;
        }
    }

    async fn send(&self, response: JsonRpcResponse) {
        send_line(&self.outbound, response).await;
    }
}

async fn send_line(outbound: &mpsc::Sender<String>, response: JsonRpcResponse) {
    match serde_json::to_string(&response) {
        Ok(encoded) => {
            if outbound.send(encoded).await.is_err() {
                log::error!("writer task is gone, dropping response");
            }
        }
        Err(e) => log::error!("failed to encode response: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::PollPolicy;

    fn test_server() -> (McpServer, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(8);
        // Loopback address: the dispatch tests never reach the network.
        let client = UnitradClient::new(
            "http://127.0.0.1:9".to_string(),
            String::new(),
            "gifu".to_string(),
            reqwest::Client::new(),
        );
        let tool = SearchBooksTool::new(client, PollPolicy::default(), None);
        (McpServer::new(tool, tx), rx)
    }

    async fn roundtrip(line: &str) -> Value {
        let (server, mut rx) = test_server();
        server.handle_line(line).await;
        let out = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .expect("no response within 1s")
            .expect("channel closed");
        serde_json::from_str(&out).unwrap()
    }

    #[tokio::test]
    async fn test_initialize_handshake() {
        let response =
            roundtrip(r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#).await;
        assert_eq!(response["id"], 1);
        assert_eq!(response["result"]["protocolVersion"], MCP_PROTOCOL_VERSION);
        assert!(response["result"]["capabilities"]["tools"].is_object());
    }

    #[tokio::test]
    async fn test_tools_list_exposes_the_search_tool() {
        let response = roundtrip(r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#).await;
        let tools = response["result"]["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0]["name"], "nlib_search_books");
        assert_eq!(tools[0]["inputSchema"]["type"], "object");
    }

    #[tokio::test]
    async fn test_unknown_method_is_rejected() {
        let response = roundtrip(r#"{"jsonrpc":"2.0","id":3,"method":"resources/list"}"#).await;
        assert_eq!(response["error"]["code"], -32601);
    }

    #[tokio::test]
    async fn test_parse_error_reply() {
        let response = roundtrip("this is not json").await;
        assert_eq!(response["error"]["code"], -32700);
        assert_eq!(response["id"], Value::Null);
    }

    #[tokio::test]
    async fn test_unknown_tool_name_is_invalid_params() {
        let response = roundtrip(
            r#"{"jsonrpc":"2.0","id":4,"method":"tools/call","params":{"name":"other_tool","arguments":{}}}"#,
        )
        .await;
        assert_eq!(response["error"]["code"], -32602);
    }

    #[tokio::test]
    async fn test_empty_query_returns_tool_error_without_network() {
        let response = roundtrip(
            r#"{"jsonrpc":"2.0","id":5,"method":"tools/call","params":{"name":"nlib_search_books","arguments":{}}}"#,
        )
        .await;
        assert_eq!(response["result"]["isError"], true);
        let text = response["result"]["content"][0]["text"].as_str().unwrap();
        let body: Value = serde_json::from_str(text).unwrap();
        assert_eq!(body["error"], "invalid_input");
    }

    #[tokio::test]
    async fn test_notifications_produce_no_reply() {
        let (server, mut rx) = test_server();
        server
            .handle_line(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
            .await;
        server
            .handle_line(
                r#"{"jsonrpc":"2.0","method":"notifications/cancelled","params":{"requestId":99}}"#,
            )
            .await;
        assert!(rx.try_recv().is_err());
    }
}

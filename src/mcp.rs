//! MCP server speaking newline-delimited JSON-RPC 2.0 over stdio.

use std::io::{BufRead, Write};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::index::CodeIndex;
use crate::tools::{TOOLS, find_tool};

const PROTOCOL_VERSION: &str = "2024-11-05";

const PARSE_ERROR: i32 = -32700;
const INVALID_REQUEST: i32 = -32600;
const METHOD_NOT_FOUND: i32 = -32601;
const INVALID_PARAMS: i32 = -32602;
const INTERNAL_ERROR: i32 = -32603;

#[derive(Debug, Deserialize)]
struct JsonRpcRequest {
    #[allow(dead_code)]
    jsonrpc: Option<String>,
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, Serialize, PartialEq)]
struct JsonRpcResponse {
    jsonrpc: &'static str,
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Serialize, PartialEq)]
struct JsonRpcError {
    code: i32,
    message: String,
}

impl JsonRpcResponse {
    fn result(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    fn error(id: Value, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
            }),
        }
    }
}

/// Serve requests from `reader` until EOF, writing one response line per request.
pub(crate) fn run<R: BufRead, W: Write>(index: &CodeIndex, reader: R, mut writer: W) -> Result<()> {
    tracing::info!(tools = TOOLS.len(), "MCP server listening on stdio");
    for line in reader.lines() {
        let line = line.context("failed to read request")?;
        if line.trim().is_empty() {
            continue;
        }
        let Some(response) = handle_line(index, &line) else {
            continue;
        };
        let encoded = serde_json::to_string(&response).context("failed to encode response")?;
        writeln!(writer, "{encoded}").context("failed to write response")?;
        writer.flush().context("failed to flush response")?;
    }
    tracing::info!("MCP input closed");
    Ok(())
}

/// Handle one raw line. Notifications produce no response.
fn handle_line(index: &CodeIndex, line: &str) -> Option<JsonRpcResponse> {
    let value: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(err) => {
            tracing::warn!(error = %err, "unparseable request");
            return Some(JsonRpcResponse::error(
                Value::Null,
                PARSE_ERROR,
                format!("Parse error: {err}"),
            ));
        }
    };
    let request: JsonRpcRequest = match serde_json::from_value(value) {
        Ok(request) => request,
        Err(err) => {
            return Some(JsonRpcResponse::error(
                Value::Null,
                INVALID_REQUEST,
                format!("Invalid request: {err}"),
            ));
        }
    };
    let Some(id) = request.id.clone() else {
        tracing::debug!(method = %request.method, "notification");
        return None;
    };
    tracing::debug!(method = %request.method, "request");
    Some(dispatch(index, id, &request.method, request.params))
}

fn dispatch(index: &CodeIndex, id: Value, method: &str, params: Value) -> JsonRpcResponse {
    match method {
        "initialize" => JsonRpcResponse::result(
            id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {"tools": {}},
                "serverInfo": {
                    "name": env!("CARGO_PKG_NAME"),
                    "version": env!("CARGO_PKG_VERSION"),
                },
            }),
        ),
        "ping" => JsonRpcResponse::result(id, json!({})),
        "tools/list" => {
            let tools: Vec<Value> = TOOLS
                .iter()
                .map(|tool| {
                    json!({
                        "name": tool.name,
                        "description": tool.description,
                        "inputSchema": tool.input_schema(),
                    })
                })
                .collect();
            JsonRpcResponse::result(id, json!({"tools": tools}))
        }
        "tools/call" => call_tool(index, id, params),
        other => JsonRpcResponse::error(id, METHOD_NOT_FOUND, format!("Method not found: {other}")),
    }
}

fn call_tool(index: &CodeIndex, id: Value, params: Value) -> JsonRpcResponse {
    let Some(name) = params.get("name").and_then(Value::as_str) else {
        return JsonRpcResponse::error(id, INVALID_PARAMS, "tools/call requires a tool name");
    };
    let Some(tool) = find_tool(name) else {
        return JsonRpcResponse::error(id, INVALID_PARAMS, format!("Unknown tool: {name}"));
    };
    let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);
    let envelope = tool.call(index, arguments);
    let text = match serde_json::to_string(&envelope) {
        Ok(text) => text,
        Err(err) => {
            return JsonRpcResponse::error(
                id,
                INTERNAL_ERROR,
                format!("failed to encode result: {err}"),
            );
        }
    };
    JsonRpcResponse::result(
        id,
        json!({
            "content": [{"type": "text", "text": text}],
            "isError": !envelope.success,
        }),
    )
}

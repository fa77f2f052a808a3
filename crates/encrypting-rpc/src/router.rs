//! JSON-RPC dispatch over a single POST endpoint.

use std::sync::Arc;

use alloy_primitives::B256;
use alloy_rpc_types::TransactionRequest;
use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::{
        HeaderValue,
        StatusCode,
        header::CONTENT_TYPE,
    },
    response::{
        IntoResponse,
        Json,
        Response,
    },
    routing::post,
};
use reqwest::Client;
use serde::{
    Deserialize,
    Serialize,
};
use serde_json::Value;
use tracing::{
    debug,
    instrument,
    warn,
};
use url::Url;

use crate::{
    error::{
        GatewayError,
        Result,
        RpcResponseError,
    },
    pipeline::Pipeline,
};

const JSONRPC_VERSION: &str = "2.0";

/// Where a request goes once its method is known.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Handler {
    EncryptRaw,
    EncryptSend,
    PassThrough,
}

pub fn select_handler(method: &str) -> Handler {
    match method {
        "eth_sendRawTransaction" => Handler::EncryptRaw,
        "eth_sendTransaction" => Handler::EncryptSend,
        _ => Handler::PassThrough,
    }
}

#[derive(Debug, Deserialize)]
struct MethodProbe {
    method: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(default)]
    pub id: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcResponseError>,
    pub id: Value,
}

impl JsonRpcResponse {
    pub fn success(request: &JsonRpcRequest, tx_hash: B256) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            result: Some(Value::String(format!("{tx_hash:#x}"))),
            error: None,
            id: request.id.clone().unwrap_or(Value::Null),
        }
    }

    pub fn failure(request: &JsonRpcRequest, err: GatewayError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            result: None,
            error: Some(err.into()),
            id: request.id.clone().unwrap_or(Value::Null),
        }
    }
}

/// Shared state of the HTTP handlers.
#[derive(Clone)]
pub struct GatewayState {
    pipeline: Arc<Pipeline>,
    http: Client,
    backend: Url,
}

impl GatewayState {
    pub fn new(pipeline: Arc<Pipeline>, backend: Url) -> Self {
        Self {
            pipeline,
            http: Client::new(),
            backend,
        }
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    async fn encrypt_raw(&self, request: &JsonRpcRequest) -> Result<B256> {
        let raw_hex = request
            .params
            .as_ref()
            .and_then(|params| params.get(0))
            .and_then(Value::as_str)
            .ok_or_else(|| GatewayError::InvalidParams("missing raw transaction param".into()))?;
        let ctx = self.pipeline.context();
        self.pipeline.send_raw_transaction(&ctx, raw_hex).await
    }

    async fn encrypt_send(&self, request: &JsonRpcRequest) -> Result<B256> {
        let param = request
            .params
            .as_ref()
            .and_then(|params| params.get(0))
            .cloned()
            .ok_or_else(|| GatewayError::InvalidParams("missing transaction param".into()))?;
        let tx_request: TransactionRequest = serde_json::from_value(param)
            .map_err(|err| GatewayError::InvalidParams(format!("invalid transaction: {err}")))?;
        let ctx = self.pipeline.context();
        self.pipeline.send_transaction(&ctx, tx_request).await
    }

    /// Relays the untouched body to the backend node along with its reply.
    async fn pass_through(&self, body: Bytes) -> Response {
        let response = match self
            .http
            .post(self.backend.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                warn!(%err, "backend unreachable");
                metrics::counter!("encrypting_rpc_passthrough_errors_total").increment(1);
                return (StatusCode::BAD_GATEWAY, "backend unreachable").into_response();
            }
        };

        let status = StatusCode::from_u16(response.status().as_u16())
            .unwrap_or(StatusCode::BAD_GATEWAY);
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| HeaderValue::from_bytes(value.as_bytes()).ok())
            .unwrap_or_else(|| HeaderValue::from_static("application/json"));

        match response.bytes().await {
            Ok(bytes) => (status, [(CONTENT_TYPE, content_type)], bytes).into_response(),
            Err(err) => {
                warn!(%err, "failed to read backend response");
                metrics::counter!("encrypting_rpc_passthrough_errors_total").increment(1);
                (StatusCode::BAD_GATEWAY, "backend response unreadable").into_response()
            }
        }
    }
}

pub fn build_router(state: GatewayState, path: &str) -> Router {
    Router::new()
        .route(path, post(handle_rpc))
        .with_state(state)
}

#[instrument(name = "router::handle_rpc", skip_all, level = "debug")]
async fn handle_rpc(State(state): State<GatewayState>, body: Bytes) -> Response {
    let probe: MethodProbe = match serde_json::from_slice(&body) {
        Ok(probe) => probe,
        Err(err) => {
            debug!(%err, "rejecting malformed request body");
            return (
                StatusCode::BAD_REQUEST,
                format!("malformed JSON-RPC request: {err}"),
            )
                .into_response();
        }
    };

    let handler = select_handler(&probe.method);
    if handler == Handler::PassThrough {
        metrics::counter!("encrypting_rpc_requests_total", "handler" => "passthrough").increment(1);
        return state.pass_through(body).await;
    }

    let request: JsonRpcRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(err) => {
            return (
                StatusCode::BAD_REQUEST,
                format!("malformed JSON-RPC request: {err}"),
            )
                .into_response();
        }
    };

    let outcome = if handler == Handler::EncryptRaw {
        metrics::counter!("encrypting_rpc_requests_total", "handler" => "raw").increment(1);
        state.encrypt_raw(&request).await
    } else {
        metrics::counter!("encrypting_rpc_requests_total", "handler" => "send").increment(1);
        state.encrypt_send(&request).await
    };

    let response = match outcome {
        Ok(tx_hash) => JsonRpcResponse::success(&request, tx_hash),
        Err(err) => {
            debug!(method = %request.method, %err, "request rejected");
            JsonRpcResponse::failure(&request, err)
        }
    };
    Json(response).into_response()
}

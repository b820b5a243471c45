//! Minimal JSON-RPC 2.0 client over HTTP

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use livefeed_core::{GasError, GasResult};

#[derive(Debug, Serialize)]
struct RpcRequest<'a, P> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: P,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

/// One node endpoint
#[derive(Debug)]
pub struct JsonRpcClient {
    client: Client,
    url: String,
    next_id: AtomicU64,
}

impl JsonRpcClient {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn call<T, P>(&self, method: &str, params: P) -> GasResult<T>
    where
        T: DeserializeOwned,
        P: Serialize,
    {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        debug!("{} -> {}", method, self.url);

        let failed = |reason: String| GasError::RpcCallFailed {
            endpoint: self.url.clone(),
            method: method.to_string(),
            reason,
        };

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(failed(format!("HTTP {}", response.status())));
        }

        let body: RpcResponse<T> = response.json().await.map_err(|e| GasError::MalformedResponse {
            method: method.to_string(),
            reason: e.to_string(),
        })?;

        if let Some(err) = body.error {
            return Err(failed(format!("code {}: {}", err.code, err.message)));
        }

        body.result.ok_or_else(|| GasError::MalformedResponse {
            method: method.to_string(),
            reason: "missing result".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    #[tokio::test]
    async fn test_call_returns_result() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({
                "jsonrpc": "2.0",
                "method": "eth_maxPriorityFeePerGas",
                "params": []
            })))
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":"0x3b9aca00"}"#)
            .create_async()
            .await;

        let client = JsonRpcClient::new(Client::new(), server.url());
        let result: String = client
            .call("eth_maxPriorityFeePerGas", Vec::<String>::new())
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(result, "0x3b9aca00");
    }

    #[tokio::test]
    async fn test_call_surfaces_rpc_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .with_body(r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32601,"message":"method not found"}}"#)
            .create_async()
            .await;

        let client = JsonRpcClient::new(Client::new(), server.url());
        let err = client
            .call::<String, _>("eth_maxPriorityFeePerGas", Vec::<String>::new())
            .await
            .unwrap_err();

        assert!(matches!(err, GasError::RpcCallFailed { reason, .. } if reason.contains("-32601")));
    }

    #[tokio::test]
    async fn test_call_http_failure() {
        let mut server = mockito::Server::new_async().await;
        server.mock("POST", "/").with_status(502).create_async().await;

        let client = JsonRpcClient::new(Client::new(), server.url());
        let err = client
            .call::<String, _>("eth_feeHistory", json!([5, "latest", [10, 50, 90]]))
            .await
            .unwrap_err();

        assert!(matches!(err, GasError::RpcCallFailed { .. }));
    }
}

//! JSON-RPC client for the Bitcoin Core node backing stratumd.
//!
//! This crate knows nothing about Stratum, templates, or shares: it POSTs
//! JSON-RPC requests over HTTP Basic auth and hands back the node's raw
//! response, or a typed error distinguishing "couldn't reach the node" from
//! "the node rejected the call" from "the node's answer didn't parse".

use std::time::Duration;

use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

pub mod types;

pub use types::{GetBlockTemplateResult, SubmitBlockOutcome, TemplateTransaction};

/// Errors a Node Client call can fail with. None of these are fatal to the
/// process: callers retry transient ones with backoff.
#[derive(Debug, Error)]
pub enum NodeRpcError {
    #[error("node unreachable: {0}")]
    Unavailable(#[from] reqwest::Error),

    #[error("node returned RPC error {code}: {message}")]
    RpcError { code: i64, message: String },

    #[error("node response did not match the expected schema: {0}")]
    Malformed(String),
}

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: &'a str,
    method: &'a str,
    params: Value,
}

#[derive(Deserialize)]
struct RpcResponse {
    result: Value,
    error: Option<RpcErrorObject>,
}

#[derive(Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

/// A reusable, pooled JSON-RPC connection to one Bitcoin Core node.
#[derive(Debug, Clone)]
pub struct NodeClient {
    http: reqwest::Client,
    url: String,
    user: String,
    pass: String,
}

impl NodeClient {
    pub fn new(url: impl Into<String>, user: impl Into<String>, pass: impl Into<String>, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("building the node RPC HTTP client should never fail");
        NodeClient {
            http,
            url: url.into(),
            user: user.into(),
            pass: pass.into(),
        }
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, NodeRpcError> {
        let request = RpcRequest {
            jsonrpc: "1.0",
            id: "stratumd",
            method,
            params,
        };
        trace!("rpc -> {method}");
        // Bitcoin Core answers application-level RPC errors with a JSON body
        // and a non-2xx status; parse the body first rather than bailing out
        // on the status, or the structured error message would be lost.
        let response = self
            .http
            .post(&self.url)
            .basic_auth(&self.user, Some(&self.pass))
            .json(&request)
            .send()
            .await?;
        let body: RpcResponse = response.json().await?;
        if let Some(err) = body.error {
            return Err(NodeRpcError::RpcError {
                code: err.code,
                message: err.message,
            });
        }
        Ok(body.result)
    }

    /// `getblocktemplate` with segwit rules enabled.
    pub async fn get_template(&self) -> Result<GetBlockTemplateResult, NodeRpcError> {
        let result = self.call("getblocktemplate", json!([{ "rules": ["segwit"] }])).await?;
        serde_json::from_value(result).map_err(|e| NodeRpcError::Malformed(e.to_string()))
    }

    /// `submitblock`. Bitcoin Core returns `null` on acceptance and a short
    /// rejection-reason string otherwise; both are surfaced verbatim.
    pub async fn submit_block(&self, block_hex: String) -> Result<SubmitBlockOutcome, NodeRpcError> {
        let result = self.call("submitblock", json!([block_hex])).await?;
        match result {
            Value::Null => {
                debug!("submitblock accepted");
                Ok(SubmitBlockOutcome::Accepted)
            }
            Value::String(reason) => {
                warn!("submitblock rejected: {reason}");
                Ok(SubmitBlockOutcome::Rejected(reason))
            }
            other => Err(NodeRpcError::Malformed(format!(
                "unexpected submitblock result: {other}"
            ))),
        }
    }

    /// Used once at startup to confirm the node is reachable before opening
    /// the Stratum listener.
    pub async fn get_blockchain_info(&self) -> Result<Value, NodeRpcError> {
        self.call("getblockchaininfo", json!([])).await
    }

    /// Used once at startup alongside `getblockchaininfo` for diagnostics.
    pub async fn get_network_info(&self) -> Result<Value, NodeRpcError> {
        self.call("getnetworkinfo", json!([])).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_construction_does_not_panic() {
        let _client = NodeClient::new("http://127.0.0.1:8332", "user", "pass", Duration::from_secs(10));
    }
}

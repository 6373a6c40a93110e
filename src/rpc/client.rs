//! JSON-RPC client for a Neo N3 node

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use jsonrpsee::core::client::ClientT;
use jsonrpsee::core::params::ArrayParams;
use jsonrpsee::core::ClientError;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::rpc_params;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::time::Duration;

use super::{ChainRpc, ContractState, InvokeResult, RpcError};
use crate::core::{ScriptHash, Signer, TxHash, WitnessScope};

impl From<ClientError> for RpcError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Call(call) => RpcError::Node {
                code: call.code() as i64,
                message: call.message().to_string(),
            },
            ClientError::RequestTimeout => RpcError::Timeout(Duration::ZERO),
            ClientError::ParseError(e) => RpcError::Malformed(e.to_string()),
            other => RpcError::Transport(other.to_string()),
        }
    }
}

/// Chain access over HTTP JSON-RPC
#[derive(Clone, Debug)]
pub struct JsonRpcChain {
    client: HttpClient,
    url: String,
}

impl JsonRpcChain {
    /// Connect to `url`; `timeout` bounds each request
    pub fn new(url: &str, timeout: Duration) -> Result<Self, RpcError> {
        let client = HttpClientBuilder::default()
            .request_timeout(timeout)
            .build(url)
            .map_err(|e| RpcError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: ArrayParams,
    ) -> Result<T, RpcError> {
        log::debug!("RPC {} -> {}", method, self.url);
        Ok(self.client.request(method, params).await?)
    }
}

fn scope_names(scopes: WitnessScope) -> String {
    if scopes.is_empty() {
        return "None".to_string();
    }
    let mut names = Vec::new();
    if scopes.contains(WitnessScope::CALLED_BY_ENTRY) {
        names.push("CalledByEntry");
    }
    if scopes.contains(WitnessScope::CUSTOM_CONTRACTS) {
        names.push("CustomContracts");
    }
    if scopes.contains(WitnessScope::CUSTOM_GROUPS) {
        names.push("CustomGroups");
    }
    if scopes.contains(WitnessScope::WITNESS_RULES) {
        names.push("WitnessRules");
    }
    if scopes.contains(WitnessScope::GLOBAL) {
        names.push("Global");
    }
    names.join(", ")
}

fn signer_json(signer: &Signer) -> Value {
    let mut value = json!({
        "account": signer.account.to_string(),
        "scopes": scope_names(signer.scopes),
    });
    if !signer.allowed_contracts.is_empty() {
        value["allowedcontracts"] = json!(signer
            .allowed_contracts
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>());
    }
    if !signer.allowed_groups.is_empty() {
        value["allowedgroups"] = json!(signer
            .allowed_groups
            .iter()
            .map(|k| k.to_hex())
            .collect::<Vec<_>>());
    }
    value
}

/// Neo encodes 64-bit amounts as decimal strings
fn int_field(value: &Value, field: &str) -> Result<i64, RpcError> {
    match value.get(field) {
        Some(Value::String(s)) => s
            .parse()
            .map_err(|_| RpcError::Malformed(format!("{}: {}", field, s))),
        Some(Value::Number(n)) => n
            .as_i64()
            .ok_or_else(|| RpcError::Malformed(format!("{}: {}", field, n))),
        _ => Err(RpcError::Malformed(format!("missing {}", field))),
    }
}

fn parse_contract_state(value: &Value) -> Result<ContractState, RpcError> {
    let hash = value
        .get("hash")
        .and_then(Value::as_str)
        .ok_or_else(|| RpcError::Malformed("contract state without hash".to_string()))?
        .parse::<ScriptHash>()
        .map_err(|e| RpcError::Malformed(e.to_string()))?;
    let id = value.get("id").and_then(Value::as_i64).unwrap_or_default() as i32;
    let name = value
        .pointer("/manifest/name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Ok(ContractState { id, hash, name })
}

fn parse_invoke_result(value: &Value) -> Result<InvokeResult, RpcError> {
    let state = value
        .get("state")
        .and_then(Value::as_str)
        .ok_or_else(|| RpcError::Malformed("invoke result without state".to_string()))?
        .to_string();
    Ok(InvokeResult {
        state,
        gas_consumed: int_field(value, "gasconsumed")?,
        exception: value
            .get("exception")
            .and_then(Value::as_str)
            .map(str::to_string),
        stack: value
            .get("stack")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default(),
    })
}

#[async_trait]
impl ChainRpc for JsonRpcChain {
    async fn block_count(&self) -> Result<u32, RpcError> {
        self.call("getblockcount", rpc_params![]).await
    }

    async fn transaction_height(&self, hash: &TxHash) -> Result<u32, RpcError> {
        match self
            .call("gettransactionheight", rpc_params![hash.to_string()])
            .await
        {
            Err(e) if e.is_unknown_item() => Ok(0),
            other => other,
        }
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<TxHash, RpcError> {
        let value: Value = self
            .call("sendrawtransaction", rpc_params![BASE64.encode(raw)])
            .await?;
        value
            .get("hash")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::Malformed(value.to_string()))?
            .parse()
            .map_err(|e: crate::core::CodecError| RpcError::Malformed(e.to_string()))
    }

    async fn contract_state(&self, hash: &ScriptHash) -> Result<Option<ContractState>, RpcError> {
        match self
            .call::<Value>("getcontractstate", rpc_params![hash.to_string()])
            .await
        {
            Ok(Value::Null) => Ok(None),
            Ok(value) => parse_contract_state(&value).map(Some),
            Err(e) if e.is_unknown_item() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn calculate_network_fee(&self, raw: &[u8]) -> Result<i64, RpcError> {
        let value: Value = self
            .call("calculatenetworkfee", rpc_params![BASE64.encode(raw)])
            .await?;
        int_field(&value, "networkfee")
    }

    async fn invoke_script(
        &self,
        script: &[u8],
        signers: &[Signer],
    ) -> Result<InvokeResult, RpcError> {
        let signers: Vec<Value> = signers.iter().map(signer_json).collect();
        let value: Value = self
            .call("invokescript", rpc_params![BASE64.encode(script), signers])
            .await?;
        parse_invoke_result(&value)
    }
}

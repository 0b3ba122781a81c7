//! JSON-RPC client for a Lotus full node.

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::api::{ChainApi, DealApi};
use crate::constants::RPC_REQUEST_TIMEOUT_SECS;
use crate::error::{LotusError, Result};
use crate::types::{BitFieldRuns, ChainEpoch, CidLink, MarketDeal, MiningBaseInfo, TipSet, TipSetKey};

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: serde_json::Value,
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

pub struct LotusClient {
    client: Client,
    endpoint: String,
    token: Option<String>,
    request_id: AtomicU64,
}

impl LotusClient {
    /// `api_url` is the node base URL, e.g. `http://localhost:1234`.
    pub fn new(api_url: &str, token: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(RPC_REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| LotusError::RpcConnectionError(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: format!("{}/rpc/v0", api_url.trim_end_matches('/')),
            token: token.filter(|t| !t.is_empty()),
            request_id: AtomicU64::new(0),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: serde_json::Value) -> Result<T> {
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        let request = RpcRequest {
            jsonrpc: "2.0",
            id,
            method,
            params,
        };

        debug!("Lotus RPC call: {} id={}", method, id);
        let started = Instant::now();

        let mut builder = self.client.post(&self.endpoint).json(&request);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| LotusError::RpcConnectionError(format!("{}: {}", method, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Lotus RPC {} returned HTTP {}", method, status);
            return Err(LotusError::RpcConnectionError(format!(
                "{}: HTTP {} - {}",
                method, status, body
            )));
        }

        let rpc_response: RpcResponse = response
            .json()
            .await
            .map_err(|e| LotusError::ParseError(format!("{}: {}", method, e)))?;

        if let Some(error) = rpc_response.error {
            return Err(LotusError::RpcError {
                method: method.to_string(),
                code: error.code,
                message: error.message,
            });
        }

        debug!(
            "Lotus RPC {} id={} completed in {:?}",
            method,
            id,
            started.elapsed()
        );

        serde_json::from_value(rpc_response.result)
            .map_err(|e| LotusError::ParseError(format!("{}: {}", method, e)))
    }
}

#[async_trait]
impl ChainApi for LotusClient {
    async fn chain_head(&self) -> Result<TipSet> {
        self.call("Filecoin.ChainHead", json!([])).await
    }

    async fn chain_get_tipset_by_height(&self, height: ChainEpoch, anchor: &TipSetKey) -> Result<TipSet> {
        self.call("Filecoin.ChainGetTipSetByHeight", json!([height, anchor]))
            .await
    }

    async fn state_market_deals(&self, tsk: &TipSetKey) -> Result<HashMap<String, MarketDeal>> {
        self.call("Filecoin.StateMarketDeals", json!([tsk])).await
    }

    async fn state_account_key(&self, address: &str, tsk: &TipSetKey) -> Result<String> {
        self.call("Filecoin.StateAccountKey", json!([address, tsk]))
            .await
    }

    async fn state_verified_client_status(&self, address: &str, tsk: &TipSetKey) -> Result<Option<String>> {
        self.call("Filecoin.StateVerifiedClientStatus", json!([address, tsk]))
            .await
    }

    async fn miner_get_base_info(
        &self,
        provider: &str,
        epoch: ChainEpoch,
        tsk: &TipSetKey,
    ) -> Result<Option<MiningBaseInfo>> {
        self.call("Filecoin.MinerGetBaseInfo", json!([provider, epoch, tsk]))
            .await
    }

    async fn state_miner_faults(&self, provider: &str, tsk: &TipSetKey) -> Result<BitFieldRuns> {
        self.call("Filecoin.StateMinerFaults", json!([provider, tsk]))
            .await
    }
}

#[async_trait]
impl DealApi for LotusClient {
    async fn client_stateless_deal(&self, params: &serde_json::Value) -> Result<CidLink> {
        self.call("Filecoin.ClientStatelessDeal", json!([params])).await
    }
}

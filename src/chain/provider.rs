//! REST gateway client with multi-URL failover

use crate::chain::ChainClient;
use crate::config::GatewayConfig;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::types::{
    parse_value, AccountState, Address, NetworkParameters, SignedTransaction, TxHash, TxStatus,
    WireTransaction,
};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Gateway response envelope
#[derive(Debug, Deserialize)]
struct GatewayResponse<T> {
    data: Option<T>,
    #[serde(default)]
    error: String,
    #[serde(default)]
    code: String,
}

#[derive(Debug, Deserialize)]
struct AccountData {
    account: AccountBody,
}

#[derive(Debug, Deserialize)]
struct AccountBody {
    address: String,
    nonce: u64,
    balance: String,
}

#[derive(Debug, Deserialize)]
struct NetworkConfigData {
    config: NetworkConfigBody,
}

#[derive(Debug, Deserialize)]
struct NetworkConfigBody {
    #[serde(rename = "erd_chain_id")]
    chain_id: String,
    #[serde(rename = "erd_min_gas_price")]
    min_gas_price: u64,
    #[serde(rename = "erd_min_transaction_version")]
    min_transaction_version: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendMultipleData {
    num_of_sent_txs: usize,
    #[serde(default)]
    txs_hashes: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct ProcessStatusData {
    status: String,
}

/// HTTP implementation of [`ChainClient`]
pub struct GatewayProvider {
    /// Gateway base URLs, tried in order on read failures
    urls: Vec<String>,
    /// Current active URL index
    current: AtomicUsize,
    client: reqwest::Client,
}

impl GatewayProvider {
    pub fn new(config: &GatewayConfig) -> OrchestratorResult<Self> {
        let urls: Vec<String> = config
            .urls
            .iter()
            .map(|u| u.trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty())
            .collect();

        if urls.is_empty() {
            return Err(OrchestratorError::Config(
                "No gateway URLs configured".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| OrchestratorError::Config(format!("HTTP client: {}", e)))?;

        info!("Gateway provider using {} ({} total)", urls[0], urls.len());

        Ok(Self {
            urls,
            current: AtomicUsize::new(0),
            client,
        })
    }

    /// Get the active gateway URL
    pub fn url(&self) -> &str {
        let idx = self.current.load(Ordering::Relaxed);
        &self.urls[idx % self.urls.len()]
    }

    /// Switch to next gateway URL
    pub fn failover(&self) {
        let current = self.current.load(Ordering::Relaxed);
        let next = (current + 1) % self.urls.len();
        self.current.store(next, Ordering::Relaxed);
        warn!("Gateway failover to {}", self.urls[next]);
    }

    async fn get_once<T: DeserializeOwned>(&self, path: &str) -> OrchestratorResult<T> {
        let base = self.url().to_string();
        let url = format!("{}{}", base, path);
        debug!("GET {}", url);

        let body = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| connection_error(&base, e))?
            .text()
            .await
            .map_err(|e| connection_error(&base, e))?;

        parse_envelope(&body).map_err(|message| OrchestratorError::ChainConnection {
            endpoint: base,
            message,
        })
    }

    /// GET with failover across all configured URLs
    async fn get<T: DeserializeOwned>(&self, path: &str) -> OrchestratorResult<T> {
        let mut last_error = None;

        for _ in 0..self.urls.len() {
            match self.get_once(path).await {
                Ok(data) => return Ok(data),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    warn!("Gateway read {} failed: {}", path, e);
                    last_error = Some(e);
                    self.failover();
                }
            }
        }

        Err(last_error.unwrap_or_else(|| OrchestratorError::ChainConnection {
            endpoint: self.url().to_string(),
            message: "All gateways failed".to_string(),
        }))
    }
}

#[async_trait]
impl ChainClient for GatewayProvider {
    async fn get_account(&self, address: &Address) -> OrchestratorResult<AccountState> {
        let data: AccountData = self.get(&format!("/address/{}", address)).await?;
        let balance = parse_value(&data.account.balance)?;

        Ok(AccountState {
            address: Address::new(data.account.address),
            nonce: data.account.nonce,
            balance,
        })
    }

    async fn get_network_parameters(&self) -> OrchestratorResult<NetworkParameters> {
        let data: NetworkConfigData = self.get("/network/config").await?;

        Ok(NetworkParameters {
            chain_id: data.config.chain_id,
            min_gas_price: data.config.min_gas_price,
            version: data.config.min_transaction_version,
        })
    }

    async fn submit_batch(&self, txs: &[SignedTransaction]) -> OrchestratorResult<Vec<TxHash>> {
        if txs.is_empty() {
            return Ok(Vec::new());
        }

        // Single attempt: a retry could resend transactions the first call delivered
        let url = format!("{}/transaction/send-multiple", self.url());
        let wire: Vec<WireTransaction> = txs.iter().map(SignedTransaction::to_wire).collect();
        debug!("POST {} ({} transactions)", url, wire.len());

        let body = self
            .client
            .post(&url)
            .json(&wire)
            .send()
            .await
            .map_err(|e| OrchestratorError::Submission(format!("{}: {}", url, e)))?
            .text()
            .await
            .map_err(|e| OrchestratorError::Submission(format!("{}: {}", url, e)))?;

        let data: SendMultipleData = parse_envelope(&body).map_err(OrchestratorError::Submission)?;
        ordered_hashes(data, txs.len())
    }

    async fn get_transaction_status(&self, tx_hash: &TxHash) -> OrchestratorResult<TxStatus> {
        let data: ProcessStatusData = self
            .get(&format!("/transaction/{}/process-status", tx_hash))
            .await?;
        Ok(TxStatus::from_status_str(&data.status))
    }
}

fn connection_error(endpoint: &str, e: reqwest::Error) -> OrchestratorError {
    OrchestratorError::ChainConnection {
        endpoint: endpoint.to_string(),
        message: e.to_string(),
    }
}

/// Unwrap the `{data, error, code}` envelope
fn parse_envelope<T: DeserializeOwned>(body: &str) -> Result<T, String> {
    let response: GatewayResponse<T> =
        serde_json::from_str(body).map_err(|e| format!("Malformed gateway response: {}", e))?;

    if !response.error.is_empty() {
        return Err(format!("{} ({})", response.error, response.code));
    }

    response
        .data
        .ok_or_else(|| format!("Gateway response without data ({})", response.code))
}

/// Hashes in submission order; any transaction left out fails the batch
fn ordered_hashes(data: SendMultipleData, expected: usize) -> OrchestratorResult<Vec<TxHash>> {
    if data.num_of_sent_txs != expected {
        return Err(OrchestratorError::Submission(format!(
            "Gateway accepted {} of {} transactions",
            data.num_of_sent_txs, expected
        )));
    }

    (0..expected)
        .map(|i| {
            data.txs_hashes
                .get(&i.to_string())
                .map(TxHash::new)
                .ok_or_else(|| {
                    OrchestratorError::Submission(format!("No hash returned for transaction {}", i))
                })
        })
        .collect()
}

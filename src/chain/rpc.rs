/// EVM client over an ethers `Provider<Http>`
///
/// The provider owns the JSON-RPC plumbing; this module only builds it with
/// a request timeout and maps its errors into [`RpcError`].

use async_trait::async_trait;
use ethers::providers::{Http, Middleware, Provider};
use ethers::types::{Filter, Log, TransactionReceipt, H256};
use reqwest::{Client, Url};
use std::time::Duration;
use tracing::debug;

use super::EvmClient;
use crate::config::ChainConfig;
use crate::error::RpcError;

/// HTTP provider whose requests give up after `timeout_secs`.
pub fn http_provider(url: &str, timeout_secs: u64) -> Result<Provider<Http>, RpcError> {
    let parsed = Url::parse(url).map_err(|e| RpcError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    let client = Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?;
    Ok(Provider::new(Http::new_with_client(parsed, client)))
}

pub struct EvmRpcClient {
    provider: Provider<Http>,
}

impl EvmRpcClient {
    pub fn new(url: &str, timeout_secs: u64) -> Result<Self, RpcError> {
        Ok(Self { provider: http_provider(url, timeout_secs)? })
    }

    pub fn from_config(chain: &ChainConfig) -> Result<Self, RpcError> {
        Self::new(&chain.rpc_url, chain.rpc_timeout_secs)
    }
}

#[async_trait]
impl EvmClient for EvmRpcClient {
    async fn block_number(&self) -> Result<u64, RpcError> {
        Ok(self.provider.get_block_number().await?.as_u64())
    }

    async fn transaction_receipt(&self, hash: H256) -> Result<Option<TransactionReceipt>, RpcError> {
        debug!(tx_hash = ?hash, "fetching receipt");
        Ok(self.provider.get_transaction_receipt(hash).await?)
    }

    async fn get_logs(&self, filter: &Filter) -> Result<Vec<Log>, RpcError> {
        let logs = self.provider.get_logs(filter).await?;
        // providers occasionally return logs of other contracts for an address filter
        let Some(expected) = filter.address.as_ref() else {
            return Ok(logs);
        };
        let foreign: Vec<&Log> = logs
            .iter()
            .filter(|log| match expected {
                ethers::types::ValueOrArray::Value(address) => log.address != *address,
                ethers::types::ValueOrArray::Array(addresses) => !addresses.contains(&log.address),
            })
            .collect();
        if !foreign.is_empty() {
            return Err(RpcError::InvalidResponse(format!(
                "provider returned {} logs from other contracts",
                foreign.len()
            )));
        }
        Ok(logs)
    }
}

/// FIL node client
///
/// Only `Filecoin.ChainGetMessage` is needed: the verification job looks up
/// a submitted message CID and reads its receiver, value and params.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ethers::providers::{Http, Provider};
use serde_json::json;
use std::str::FromStr;
use std::sync::Arc;

use super::rpc::http_provider;
use crate::config::FilNodeConfig;
use crate::error::RpcError;

/// attoFIL per FIL
pub const ATTO_SCALE: u32 = 18;

/// Message as returned by `Filecoin.ChainGetMessage`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FilMessage {
    pub to: String,
    #[serde(default)]
    pub from: String,
    /// attoFIL, decimal string
    pub value: String,
    /// Base64 payload; carries the transfer reference
    #[serde(default)]
    pub params: Option<String>,
}

impl FilMessage {
    /// Transfer reference carried in `Params`, if any.
    pub fn transfer_ref(&self) -> Result<Option<String>, RpcError> {
        let Some(params) = self.params.as_deref().filter(|p| !p.is_empty()) else {
            return Ok(None);
        };
        let raw = STANDARD
            .decode(params)
            .map_err(|e| RpcError::InvalidResponse(format!("params are not base64: {}", e)))?;
        String::from_utf8(raw)
            .map(Some)
            .map_err(|_| RpcError::InvalidResponse("params are not utf-8".into()))
    }

    /// Message value in FIL.
    pub fn value_fil(&self) -> Result<Decimal, RpcError> {
        let atto = Decimal::from_str(self.value.trim())
            .map_err(|_| RpcError::InvalidResponse(format!("bad message value: {}", self.value)))?;
        atto_to_fil(atto)
    }
}

/// Convert a whole attoFIL amount into FIL.
pub fn atto_to_fil(atto: Decimal) -> Result<Decimal, RpcError> {
    let mut fil = atto;
    fil.set_scale(atto.scale() + ATTO_SCALE)
        .map_err(|_| RpcError::InvalidResponse(format!("value {} out of range", atto)))?;
    Ok(fil.normalize())
}

#[async_trait]
pub trait FilNodeClient: Send + Sync {
    /// `None` when the node does not know the CID.
    async fn chain_get_message(&self, cid: &str) -> Result<Option<FilMessage>, RpcError>;
}

#[async_trait]
impl<C: FilNodeClient + ?Sized> FilNodeClient for Arc<C> {
    async fn chain_get_message(&self, cid: &str) -> Result<Option<FilMessage>, RpcError> {
        (**self).chain_get_message(cid).await
    }
}

/// Lotus JSON-RPC through the same ethers HTTP provider as the EVM side.
pub struct FilRpcClient {
    provider: Provider<Http>,
}

impl FilRpcClient {
    pub fn new(url: &str, timeout_secs: u64) -> Result<Self, RpcError> {
        Ok(Self { provider: http_provider(url, timeout_secs)? })
    }

    pub fn from_config(cfg: &FilNodeConfig) -> Result<Self, RpcError> {
        Self::new(&cfg.rpc_url, cfg.rpc_timeout_secs)
    }
}

#[async_trait]
impl FilNodeClient for FilRpcClient {
    async fn chain_get_message(&self, cid: &str) -> Result<Option<FilMessage>, RpcError> {
        let message: Option<FilMessage> = self
            .provider
            .request("Filecoin.ChainGetMessage", [json!({ "/": cid })])
            .await?;
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_message_from_wire() {
        let message: FilMessage = serde_json::from_value(json!({
            "To": "f1receiver",
            "From": "f1payer",
            "Value": "1500000000000000000",
            "Params": STANDARD.encode("5b9c1e7e-ref"),
            "Nonce": 3
        }))
        .unwrap();

        assert_eq!(message.transfer_ref().unwrap().as_deref(), Some("5b9c1e7e-ref"));
        assert_eq!(message.value_fil().unwrap(), dec!(1.5));
    }

    #[test]
    fn test_missing_params() {
        let message = FilMessage {
            to: "f1x".into(),
            from: String::new(),
            value: "0".into(),
            params: None,
        };
        assert_eq!(message.transfer_ref().unwrap(), None);
    }

    #[test]
    fn test_atto_conversion() {
        assert_eq!(atto_to_fil(dec!(1)).unwrap(), dec!(0.000000000000000001));
        assert_eq!(atto_to_fil(dec!(2000000000000000000)).unwrap(), dec!(2));
    }
}

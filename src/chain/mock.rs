/// In-memory chain clients for tests and local runs.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tokio::time::Instant;

use ethers::types::{Filter, Log, TransactionReceipt, ValueOrArray, H256};

use super::filecoin::{FilMessage, FilNodeClient};
use super::EvmClient;
use crate::error::RpcError;

// ============================================================================
// EVM
// ============================================================================

#[derive(Default)]
struct EvmState {
    head: u64,
    receipts: HashMap<H256, TransactionReceipt>,
    logs: Vec<Log>,
    log_errors: VecDeque<(i64, String)>,
    log_queries: Vec<Filter>,
}

#[derive(Default)]
pub struct MockEvmClient {
    state: Mutex<EvmState>,
}

impl MockEvmClient {
    pub fn new(head: u64) -> Self {
        let client = Self::default();
        client.set_head(head);
        client
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut EvmState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut state)
    }

    pub fn set_head(&self, head: u64) {
        self.with_state(|s| s.head = head);
    }

    pub fn add_receipt(&self, receipt: TransactionReceipt) {
        self.with_state(|s| {
            s.receipts.insert(receipt.transaction_hash, receipt);
        });
    }

    /// Register a log; it is returned to filters on its own address.
    pub fn add_log(&self, log: Log) {
        self.with_state(|s| s.logs.push(log));
    }

    /// Make the next `eth_getLogs` call fail with a provider error.
    pub fn fail_next_logs(&self, code: i64, message: &str) {
        self.with_state(|s| s.log_errors.push_back((code, message.to_string())));
    }

    /// Every filter passed to `get_logs` so far.
    pub fn log_queries(&self) -> Vec<Filter> {
        self.with_state(|s| s.log_queries.clone())
    }
}

#[async_trait]
impl EvmClient for MockEvmClient {
    async fn block_number(&self) -> Result<u64, RpcError> {
        Ok(self.with_state(|s| s.head))
    }

    async fn transaction_receipt(&self, hash: H256) -> Result<Option<TransactionReceipt>, RpcError> {
        Ok(self.with_state(|s| s.receipts.get(&hash).cloned()))
    }

    async fn get_logs(&self, filter: &Filter) -> Result<Vec<Log>, RpcError> {
        self.with_state(|s| {
            s.log_queries.push(filter.clone());
            if let Some((code, message)) = s.log_errors.pop_front() {
                return Err(RpcError::Provider { code, message });
            }
            Ok(s.logs.iter().filter(|log| matches_filter(filter, log)).cloned().collect())
        })
    }
}

/// Address, topic0 and inclusive block range; unset parts match anything.
fn matches_filter(filter: &Filter, log: &Log) -> bool {
    let address = match &filter.address {
        None => true,
        Some(ValueOrArray::Value(address)) => *address == log.address,
        Some(ValueOrArray::Array(addresses)) => addresses.contains(&log.address),
    };
    let topic0 = match &filter.topics[0] {
        Some(ValueOrArray::Value(Some(topic))) => log.topics.first() == Some(topic),
        Some(ValueOrArray::Array(topics)) => topics.iter().flatten().any(|t| log.topics.first() == Some(t)),
        _ => true,
    };
    let block = log.block_number.map(|b| b.as_u64()).unwrap_or_default();
    let from = filter.get_from_block().map(|b| b.as_u64()).unwrap_or(0);
    let to = filter.get_to_block().map(|b| b.as_u64()).unwrap_or(u64::MAX);

    address && topic0 && (from..=to).contains(&block)
}

// ============================================================================
// FIL
// ============================================================================

#[derive(Default)]
struct FilState {
    messages: HashMap<String, FilMessage>,
    failing: HashMap<String, (i64, String)>,
    calls: Vec<(String, Instant)>,
}

#[derive(Default)]
pub struct MockFilNodeClient {
    state: Mutex<FilState>,
}

impl MockFilNodeClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut FilState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut state)
    }

    pub fn add_message(&self, cid: &str, message: FilMessage) {
        self.with_state(|s| {
            s.messages.insert(cid.to_string(), message);
        });
    }

    pub fn fail_message(&self, cid: &str, code: i64, message: &str) {
        self.with_state(|s| {
            s.failing.insert(cid.to_string(), (code, message.to_string()));
        });
    }

    /// CIDs requested so far, with the instant of each call.
    pub fn calls(&self) -> Vec<(String, Instant)> {
        self.with_state(|s| s.calls.clone())
    }
}

#[async_trait]
impl FilNodeClient for MockFilNodeClient {
    async fn chain_get_message(&self, cid: &str) -> Result<Option<FilMessage>, RpcError> {
        self.with_state(|s| {
            s.calls.push((cid.to_string(), Instant::now()));
            if let Some((code, message)) = s.failing.get(cid) {
                return Err(RpcError::Provider { code: *code, message: message.clone() });
            }
            Ok(s.messages.get(cid).cloned())
        })
    }
}

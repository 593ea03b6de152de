//! Error types for the reconciliation engine.
//!
//! Each layer has its own enum; jobs convert per-item failures into log lines
//! and keep going, so only setup errors ever reach the caller of `run()`.

use ethers::providers::{ProviderError, RpcError as _};
use rust_decimal::Decimal;
use thiserror::Error;

use crate::models::{CreditId, InstrumentId, InstrumentStatus, TransactionKind};

// ============================================================================
// RPC
// ============================================================================

/// Failure talking to a chain node (EVM or FIL).
#[derive(Debug, Error)]
pub enum RpcError {
    /// Transport-level failure (connection refused, timeout, TLS...)
    #[error("rpc request failed: {0}")]
    Transport(String),

    /// The node answered with a JSON-RPC error object.
    #[error("provider error {code}: {message}")]
    Provider { code: i64, message: String },

    /// The node answered, but not with something we can read.
    #[error("invalid rpc response: {0}")]
    InvalidResponse(String),

    #[error("invalid rpc url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The HTTP client behind the provider could not be built.
    #[error("http client setup failed: {0}")]
    Client(#[from] reqwest::Error),
}

impl RpcError {
    /// JSON-RPC error code, when the provider sent one.
    pub fn provider_code(&self) -> Option<i64> {
        match self {
            RpcError::Provider { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl From<ProviderError> for RpcError {
    fn from(e: ProviderError) -> Self {
        match e.as_error_response() {
            Some(response) => RpcError::Provider {
                code: response.code,
                message: response.message.clone(),
            },
            None => RpcError::Transport(e.to_string()),
        }
    }
}

// ============================================================================
// ABI
// ============================================================================

/// Malformed log payloads.
#[derive(Debug, Error)]
pub enum AbiError {
    #[error("log does not match event abi: {0}")]
    Decode(#[from] ethers::abi::Error),

    #[error("to/value arrays differ in length: {to} vs {value}")]
    LengthMismatch { to: usize, value: usize },
}

// ============================================================================
// STORE
// ============================================================================

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{table}: transaction hash {hash} already exists")]
    DuplicateTransactionHash { table: TransactionKind, hash: String },

    #[error("{0} not found")]
    NotFound(String),

    #[error("snapshot io failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),

    /// Raised by transaction bodies to abort and roll back.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error(transparent)]
    Split(#[from] SplitError),
}

pub type StoreResult<T> = Result<T, StoreError>;

// ============================================================================
// LEDGER
// ============================================================================

/// Internal precondition failures while applying a confirmed receipt.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("user credit {0} not found")]
    CreditNotFound(CreditId),

    #[error("pending transaction has no user credit reference")]
    MissingCreditReference,

    #[error("pending transaction has no instrument reference")]
    MissingInstrumentReference,

    #[error("instrument {0} not found")]
    InstrumentNotFound(InstrumentId),

    #[error("instrument {id} is {status:?}, expected VALID")]
    InstrumentNotRedeemable { id: InstrumentId, status: InstrumentStatus },

    #[error("instrument {id} height {height} does not exceed consumed height {consumed}")]
    NothingToClaim { id: InstrumentId, height: Decimal, consumed: Decimal },

    #[error("pending transaction has no deployer address")]
    MissingDeployer,

    #[error("amount {0} does not fit the ledger")]
    AmountOutOfRange(String),
}

// ============================================================================
// SPLIT
// ============================================================================

/// Validation failures of the split operation.
#[derive(Debug, Error)]
pub enum SplitError {
    #[error("split number must be greater than zero")]
    ZeroSplit,

    #[error("credit per instrument must be greater than zero")]
    NonPositiveCredit,

    #[error("credit per instrument {per} exceeds available credits {available}")]
    CreditPerInstrumentTooHigh { per: Decimal, available: Decimal },

    #[error("total credits {total} exceed available credits {available}")]
    ExceedsAvailable { total: Decimal, available: Decimal },

    #[error("user credit {0} not found")]
    CreditNotFound(CreditId),

    #[error("withdraw window of credit {0} has expired")]
    WindowExpired(CreditId),
}

// ============================================================================
// TRANSFERS
// ============================================================================

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("invalid request ids: {0:?}")]
    UnknownRequests(Vec<u64>),

    #[error("some requests were already paid: {0:?}")]
    AlreadyPaid(Vec<u64>),

    #[error("some requests already have active transfers: {0:?}")]
    AlreadyHasTransfers(Vec<u64>),

    #[error("batch is empty")]
    EmptyBatch,

    #[error("request ids listed more than once: {0:?}")]
    DuplicateRequests(Vec<u64>),

    #[error("transfer {0} not found or already settled")]
    TransferNotPending(u64),

    #[error("transfer request {0} not found or not approved")]
    RequestNotApproved(u64),

    #[error("amount could not be sealed: {0}")]
    Sealing(String),

    #[error("message {0} was already processed")]
    MessageAlreadyProcessed(u64),
}

// ============================================================================
// JOBS
// ============================================================================

/// Errors that abort a whole job run (as opposed to a single item).
#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type JobResult<T> = Result<T, JobError>;

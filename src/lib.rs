/// Credit Ledger & Chain Reconciliation
/// Exports all modules for use as a library crate

pub mod chain;
pub mod config;
pub mod error;
pub mod instruments;
pub mod ledger;
pub mod models;
pub mod rate_limit;
pub mod reconcile;
pub mod store;
pub mod submissions;
pub mod transfers;
pub mod watcher;

pub use chain::{ChainEvent, EvmClient, EvmRpcClient, FilNodeClient, FilRpcClient, ForwardPayment, MockEvmClient, MockFilNodeClient};
pub use config::{AppConfig, ChainConfig, FilNodeConfig, JobConfig, WindowConfig};
pub use error::{JobError, LedgerError, RpcError, SplitError, StoreError, TransferError};
pub use instruments::{redeem, split, ExpiryJob, SplitRequest};
pub use models::*;
pub use reconcile::{ContractDeployKind, DepositKind, JobReport, ReconcileKind, ReconciliationJob, RedemptionKind, RefundKind};
pub use store::{MemoryStore, Store, StoreTx};
pub use submissions::{record_submission, Submission};
pub use transfers::{
    prepare_transfers, AmountSealer, FilVerificationJob, PendingTransferCheckJob, PlainAmountCodec, PrepareTransfers,
    TransferPaymentConfirmer,
};
pub use watcher::{BlockWatcher, PaymentHandler, WatchReport};

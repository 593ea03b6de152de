//! Persistence seam.
//!
//! The schema and query language are owned elsewhere; the engine only needs
//! the row operations below plus serializable, all-or-nothing transactions.
//! A transaction body is a synchronous closure over a [`StoreTx`] handle:
//! nothing can be awaited while it runs, and returning `Err` rolls back every
//! write it made.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;

use crate::error::StoreResult;
use crate::models::{
    CreditId, DeployedContract, FilMessageRecord, GroupId, Instrument, InstrumentGroup,
    InstrumentId, InstrumentStatus, LedgerEntry, LedgerType, PendingId, PendingTransaction,
    Settlement, TransactionKind, Transfer, TransferId, TransferRequest, TransferRequestHistory,
    TransferRequestId, TransferRequestStatus, UserCredit,
};

pub mod memory;

pub use memory::MemoryStore;

#[async_trait]
pub trait Store: Send + Sync {
    type Tx: StoreTx + Send;

    /// Run `f` inside one serializable transaction.
    async fn transaction<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send,
        F: FnOnce(&mut Self::Tx) -> StoreResult<T> + Send;
}

#[async_trait]
impl<S: Store> Store for Arc<S> {
    type Tx = S::Tx;

    async fn transaction<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send,
        F: FnOnce(&mut Self::Tx) -> StoreResult<T> + Send,
    {
        (**self).transaction(f).await
    }
}

/// Row operations available inside a transaction.
pub trait StoreTx {
    // ---- block tracker ----

    fn block_cursor(&self, contract: &str) -> Option<u64>;
    fn set_block_cursor(&mut self, contract: &str, block_number: u64);

    // ---- pending transactions ----

    /// Insert a PENDING row; the hash must be unique within its kind's table.
    fn insert_pending(&mut self, row: PendingTransaction) -> StoreResult<PendingTransaction>;
    fn pending_transaction(&self, kind: TransactionKind, id: PendingId) -> Option<PendingTransaction>;
    fn pending_by_hash(&self, kind: TransactionKind, hash: &str) -> Option<PendingTransaction>;
    /// PENDING rows created at or after `since`, oldest first, distinct by hash.
    fn pending_since(
        &self,
        kind: TransactionKind,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Vec<PendingTransaction>;
    /// Compare-and-swap PENDING → terminal. Returns false when the row was
    /// already settled (or does not exist) and nothing was written.
    fn settle_pending(
        &mut self,
        kind: TransactionKind,
        id: PendingId,
        settlement: &Settlement,
    ) -> StoreResult<bool>;

    // ---- credits & ledger ----

    fn user_credit(&self, id: CreditId) -> Option<UserCredit>;
    fn user_credit_by_owner(&self, payer: &str, contract: &str) -> Option<UserCredit>;
    fn insert_user_credit(&mut self, payer: &str, contract: &str) -> UserCredit;
    fn update_user_credit(&mut self, credit: &UserCredit) -> StoreResult<()>;

    fn append_ledger(
        &mut self,
        user_credit_id: CreditId,
        amount: Decimal,
        entry_type: LedgerType,
        created_at: DateTime<Utc>,
    ) -> LedgerEntry;
    fn ledger_entries(&self, user_credit_id: CreditId) -> Vec<LedgerEntry>;

    // ---- instruments ----

    /// Insert a group, assigning its id.
    fn insert_group(&mut self, group: InstrumentGroup) -> InstrumentGroup;
    fn group(&self, id: GroupId) -> Option<InstrumentGroup>;
    fn groups_for_credit(&self, user_credit_id: CreditId) -> Vec<InstrumentGroup>;
    fn all_groups(&self) -> Vec<InstrumentGroup>;
    /// Insert an instrument, assigning its id.
    fn insert_instrument(&mut self, instrument: Instrument) -> Instrument;
    fn instrument(&self, id: InstrumentId) -> Option<Instrument>;
    /// Instruments of a group ordered by height.
    fn instruments_in_group(&self, group_id: GroupId) -> Vec<Instrument>;
    fn set_instrument_status(&mut self, id: InstrumentId, status: InstrumentStatus) -> StoreResult<()>;

    // ---- deployed contracts ----

    fn insert_contract(&mut self, contract: DeployedContract) -> DeployedContract;
    fn contract_by_transaction(&self, transaction_id: PendingId) -> Option<DeployedContract>;

    // ---- transfers ----

    fn insert_transfer_request(&mut self, request: TransferRequest) -> TransferRequest;
    fn transfer_request(&self, id: TransferRequestId) -> Option<TransferRequest>;
    /// Compare-and-swap on the request status.
    fn update_transfer_request_status(
        &mut self,
        id: TransferRequestId,
        expected: TransferRequestStatus,
        new_status: TransferRequestStatus,
    ) -> bool;
    fn append_history(&mut self, entry: TransferRequestHistory) -> TransferRequestHistory;
    fn history_for_request(&self, id: TransferRequestId) -> Vec<TransferRequestHistory>;

    fn insert_transfer(&mut self, transfer: Transfer) -> Transfer;
    fn transfer(&self, id: TransferId) -> Option<Transfer>;
    /// Active transfers of a request.
    fn transfers_for_request(&self, id: TransferRequestId) -> Vec<Transfer>;
    fn transfers_by_ref(&self, transfer_ref: &str) -> Vec<Transfer>;
    /// Active transfers carrying `tx_hash`.
    fn active_transfers_by_hash(&self, tx_hash: &str) -> Vec<Transfer>;
    /// Active PENDING transfers with a hash, untouched since `updated_before`.
    fn stale_pending_transfers(&self, updated_before: DateTime<Utc>) -> Vec<Transfer>;
    fn update_transfer(&mut self, transfer: &Transfer) -> StoreResult<()>;

    // ---- FIL messages ----

    fn insert_message(&mut self, message_cid: &str) -> FilMessageRecord;
    fn unprocessed_messages(&self, limit: usize) -> Vec<FilMessageRecord>;
    /// Compare-and-swap `is_processed` false → true.
    fn mark_message_processed(&mut self, id: u64) -> bool;
}

//! In-memory store with JSON snapshot persistence.
//!
//! Transactions take the table lock for their whole duration, which makes
//! them trivially serializable. Writes land on a working copy that only
//! replaces the committed tables when the body returns `Ok`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tokio::sync::Mutex;
use tracing::info;

use super::{Store, StoreTx};
use crate::error::{StoreError, StoreResult};
use crate::models::{
    CreditId, DeployedContract, FilMessageRecord, GroupId, Instrument, InstrumentGroup,
    InstrumentId, InstrumentStatus, LedgerEntry, LedgerType, PendingId, PendingTransaction,
    Settlement, TransactionKind, TransactionStatus, Transfer, TransferId, TransferRequest,
    TransferRequestHistory, TransferRequestId, TransferRequestStatus, TransferStatus, UserCredit,
};

// ============================================================================
// TABLES
// ============================================================================

/// Every table, as one serializable value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryTables {
    next_id: u64,
    block_trackers: BTreeMap<String, u64>,
    pending: BTreeMap<PendingId, PendingTransaction>,
    credits: BTreeMap<CreditId, UserCredit>,
    ledger: Vec<LedgerEntry>,
    groups: BTreeMap<GroupId, InstrumentGroup>,
    instruments: BTreeMap<InstrumentId, Instrument>,
    contracts: BTreeMap<u64, DeployedContract>,
    transfer_requests: BTreeMap<TransferRequestId, TransferRequest>,
    transfers: BTreeMap<TransferId, Transfer>,
    history: Vec<TransferRequestHistory>,
    messages: BTreeMap<u64, FilMessageRecord>,
}

impl MemoryTables {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

impl StoreTx for MemoryTables {
    fn block_cursor(&self, contract: &str) -> Option<u64> {
        self.block_trackers.get(&contract.to_lowercase()).copied()
    }

    fn set_block_cursor(&mut self, contract: &str, block_number: u64) {
        self.block_trackers.insert(contract.to_lowercase(), block_number);
    }

    fn insert_pending(&mut self, mut row: PendingTransaction) -> StoreResult<PendingTransaction> {
        if self.pending_by_hash(row.kind, &row.transaction_hash).is_some() {
            return Err(StoreError::DuplicateTransactionHash {
                table: row.kind,
                hash: row.transaction_hash,
            });
        }
        row.id = self.next_id();
        self.pending.insert(row.id, row.clone());
        Ok(row)
    }

    fn pending_transaction(&self, kind: TransactionKind, id: PendingId) -> Option<PendingTransaction> {
        self.pending.get(&id).filter(|row| row.kind == kind).cloned()
    }

    fn pending_by_hash(&self, kind: TransactionKind, hash: &str) -> Option<PendingTransaction> {
        let hash = hash.to_lowercase();
        self.pending
            .values()
            .find(|row| row.kind == kind && row.transaction_hash == hash)
            .cloned()
    }

    fn pending_since(
        &self,
        kind: TransactionKind,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Vec<PendingTransaction> {
        let mut seen = HashSet::new();
        self.pending
            .values()
            .filter(|row| {
                row.kind == kind && row.status == TransactionStatus::Pending && row.created_at >= since
            })
            .filter(|row| seen.insert(row.transaction_hash.clone()))
            .take(limit)
            .cloned()
            .collect()
    }

    fn settle_pending(
        &mut self,
        kind: TransactionKind,
        id: PendingId,
        settlement: &Settlement,
    ) -> StoreResult<bool> {
        let row = match self.pending.get_mut(&id) {
            Some(row) if row.kind == kind => row,
            _ => return Ok(false),
        };
        if row.status.is_terminal() {
            return Ok(false);
        }

        row.status = settlement.status();
        match settlement {
            Settlement::Success { confirmations, block_number } => {
                row.confirmations = Some(*confirmations);
                row.block_number = Some(*block_number);
            }
            Settlement::Failed { reason, confirmations, block_number } => {
                row.fail_reason = Some(reason.clone());
                row.confirmations = *confirmations;
                row.block_number = *block_number;
            }
        }
        Ok(true)
    }

    fn user_credit(&self, id: CreditId) -> Option<UserCredit> {
        self.credits.get(&id).cloned()
    }

    fn user_credit_by_owner(&self, payer: &str, contract: &str) -> Option<UserCredit> {
        let (payer, contract) = (payer.to_lowercase(), contract.to_lowercase());
        self.credits
            .values()
            .find(|c| c.payer == payer && c.contract == contract)
            .cloned()
    }

    fn insert_user_credit(&mut self, payer: &str, contract: &str) -> UserCredit {
        let credit = UserCredit::new(self.next_id(), payer, contract);
        self.credits.insert(credit.id, credit.clone());
        credit
    }

    fn update_user_credit(&mut self, credit: &UserCredit) -> StoreResult<()> {
        match self.credits.get_mut(&credit.id) {
            Some(existing) => {
                *existing = credit.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("user credit {}", credit.id))),
        }
    }

    fn append_ledger(
        &mut self,
        user_credit_id: CreditId,
        amount: Decimal,
        entry_type: LedgerType,
        created_at: DateTime<Utc>,
    ) -> LedgerEntry {
        let entry = LedgerEntry {
            id: self.next_id(),
            user_credit_id,
            amount,
            entry_type,
            created_at,
        };
        self.ledger.push(entry.clone());
        entry
    }

    fn ledger_entries(&self, user_credit_id: CreditId) -> Vec<LedgerEntry> {
        self.ledger
            .iter()
            .filter(|e| e.user_credit_id == user_credit_id)
            .cloned()
            .collect()
    }

    fn insert_group(&mut self, mut group: InstrumentGroup) -> InstrumentGroup {
        group.id = self.next_id();
        self.groups.insert(group.id, group.clone());
        group
    }

    fn group(&self, id: GroupId) -> Option<InstrumentGroup> {
        self.groups.get(&id).cloned()
    }

    fn groups_for_credit(&self, user_credit_id: CreditId) -> Vec<InstrumentGroup> {
        self.groups
            .values()
            .filter(|g| g.user_credit_id == user_credit_id)
            .cloned()
            .collect()
    }

    fn all_groups(&self) -> Vec<InstrumentGroup> {
        self.groups.values().cloned().collect()
    }

    fn insert_instrument(&mut self, mut instrument: Instrument) -> Instrument {
        instrument.id = self.next_id();
        self.instruments.insert(instrument.id, instrument.clone());
        instrument
    }

    fn instrument(&self, id: InstrumentId) -> Option<Instrument> {
        self.instruments.get(&id).cloned()
    }

    fn instruments_in_group(&self, group_id: GroupId) -> Vec<Instrument> {
        let mut instruments: Vec<Instrument> = self
            .instruments
            .values()
            .filter(|i| i.group_id == group_id)
            .cloned()
            .collect();
        instruments.sort_by(|a, b| a.height.cmp(&b.height));
        instruments
    }

    fn set_instrument_status(&mut self, id: InstrumentId, status: InstrumentStatus) -> StoreResult<()> {
        match self.instruments.get_mut(&id) {
            Some(instrument) => {
                instrument.status = status;
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("instrument {}", id))),
        }
    }

    fn insert_contract(&mut self, mut contract: DeployedContract) -> DeployedContract {
        contract.id = self.next_id();
        self.contracts.insert(contract.id, contract.clone());
        contract
    }

    fn contract_by_transaction(&self, transaction_id: PendingId) -> Option<DeployedContract> {
        self.contracts
            .values()
            .find(|c| c.transaction_id == transaction_id)
            .cloned()
    }

    fn insert_transfer_request(&mut self, mut request: TransferRequest) -> TransferRequest {
        request.id = self.next_id();
        self.transfer_requests.insert(request.id, request.clone());
        request
    }

    fn transfer_request(&self, id: TransferRequestId) -> Option<TransferRequest> {
        self.transfer_requests.get(&id).cloned()
    }

    fn update_transfer_request_status(
        &mut self,
        id: TransferRequestId,
        expected: TransferRequestStatus,
        new_status: TransferRequestStatus,
    ) -> bool {
        match self.transfer_requests.get_mut(&id) {
            Some(request) if request.is_active && request.status == expected => {
                request.status = new_status;
                true
            }
            _ => false,
        }
    }

    fn append_history(&mut self, mut entry: TransferRequestHistory) -> TransferRequestHistory {
        entry.id = self.next_id();
        self.history.push(entry.clone());
        entry
    }

    fn history_for_request(&self, id: TransferRequestId) -> Vec<TransferRequestHistory> {
        self.history
            .iter()
            .filter(|h| h.transfer_request_id == id)
            .cloned()
            .collect()
    }

    fn insert_transfer(&mut self, mut transfer: Transfer) -> Transfer {
        transfer.id = self.next_id();
        self.transfers.insert(transfer.id, transfer.clone());
        transfer
    }

    fn transfer(&self, id: TransferId) -> Option<Transfer> {
        self.transfers.get(&id).cloned()
    }

    fn transfers_for_request(&self, id: TransferRequestId) -> Vec<Transfer> {
        self.transfers
            .values()
            .filter(|t| t.transfer_request_id == id && t.is_active)
            .cloned()
            .collect()
    }

    fn transfers_by_ref(&self, transfer_ref: &str) -> Vec<Transfer> {
        self.transfers
            .values()
            .filter(|t| t.transfer_ref == transfer_ref)
            .cloned()
            .collect()
    }

    fn active_transfers_by_hash(&self, tx_hash: &str) -> Vec<Transfer> {
        let tx_hash = tx_hash.to_lowercase();
        self.transfers
            .values()
            .filter(|t| t.is_active && t.tx_hash.as_deref() == Some(tx_hash.as_str()))
            .cloned()
            .collect()
    }

    fn stale_pending_transfers(&self, updated_before: DateTime<Utc>) -> Vec<Transfer> {
        self.transfers
            .values()
            .filter(|t| {
                t.is_active
                    && t.status == TransferStatus::Pending
                    && t.tx_hash.is_some()
                    && t.updated_at <= updated_before
            })
            .cloned()
            .collect()
    }

    fn update_transfer(&mut self, transfer: &Transfer) -> StoreResult<()> {
        match self.transfers.get_mut(&transfer.id) {
            Some(existing) => {
                *existing = transfer.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("transfer {}", transfer.id))),
        }
    }

    fn insert_message(&mut self, message_cid: &str) -> FilMessageRecord {
        let record = FilMessageRecord {
            id: self.next_id(),
            message_cid: message_cid.to_string(),
            is_processed: false,
            is_active: true,
        };
        self.messages.insert(record.id, record.clone());
        record
    }

    fn unprocessed_messages(&self, limit: usize) -> Vec<FilMessageRecord> {
        self.messages
            .values()
            .filter(|m| m.is_active && !m.is_processed)
            .take(limit)
            .cloned()
            .collect()
    }

    fn mark_message_processed(&mut self, id: u64) -> bool {
        match self.messages.get_mut(&id) {
            Some(message) if !message.is_processed => {
                message.is_processed = true;
                true
            }
            _ => false,
        }
    }
}

// ============================================================================
// MEMORY STORE
// ============================================================================

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<MemoryTables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_tables(tables: MemoryTables) -> Self {
        Self { tables: Mutex::new(tables) }
    }

    /// Write a JSON snapshot of every table.
    pub async fn save_to_disk(&self, path: &Path) -> StoreResult<()> {
        let tables = self.tables.lock().await;
        let json = serde_json::to_string_pretty(&*tables)?;
        std::fs::write(path, json)?;
        info!(path = %path.display(), "store snapshot saved");
        Ok(())
    }

    /// Load a snapshot written by [`save_to_disk`](Self::save_to_disk).
    pub fn load_from_disk(path: &Path) -> StoreResult<Self> {
        let json = std::fs::read_to_string(path)?;
        let tables: MemoryTables = serde_json::from_str(&json)?;
        info!(path = %path.display(), "store snapshot loaded");
        Ok(Self::from_tables(tables))
    }

    /// Load the snapshot if it exists, start empty otherwise.
    pub fn load_or_default(path: &Path) -> StoreResult<Self> {
        if path.exists() {
            Self::load_from_disk(path)
        } else {
            info!(path = %path.display(), "no snapshot found, starting fresh");
            Ok(Self::new())
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    type Tx = MemoryTables;

    async fn transaction<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send,
        F: FnOnce(&mut Self::Tx) -> StoreResult<T> + Send,
    {
        let mut committed = self.tables.lock().await;
        let mut working = committed.clone();
        let value = f(&mut working)?;
        *committed = working;
        Ok(value)
    }
}

//! Persistent records owned or touched by the reconciliation engine.
//!
//! Heights and balances are `Decimal`s holding integer base units (attoFIL).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub type CreditId = u64;
pub type InstrumentId = u64;
pub type GroupId = u64;
pub type PendingId = u64;
pub type TransferId = u64;
pub type TransferRequestId = u64;

// ============================================================================
// USER CREDIT
// ============================================================================

/// Per (payer, contract) aggregate of deposited, withdrawn and refunded height.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserCredit {
    pub id: CreditId,
    /// Wallet that pays into the credit contract
    pub payer: String,
    /// Credit contract the deposits land in
    pub contract: String,
    /// Cumulative deposited height
    pub total_height: Decimal,
    pub total_withdrawals: Decimal,
    pub total_refunds: Decimal,
    /// Current claimable balance
    pub amount: Decimal,
    pub withdraw_starts_at: Option<DateTime<Utc>>,
    pub withdraw_expires_at: Option<DateTime<Utc>>,
    pub refund_starts_at: Option<DateTime<Utc>>,
}

impl UserCredit {
    pub fn new(id: CreditId, payer: &str, contract: &str) -> Self {
        Self {
            id,
            payer: payer.to_lowercase(),
            contract: contract.to_lowercase(),
            total_height: Decimal::ZERO,
            total_withdrawals: Decimal::ZERO,
            total_refunds: Decimal::ZERO,
            amount: Decimal::ZERO,
            withdraw_starts_at: None,
            withdraw_expires_at: None,
            refund_starts_at: None,
        }
    }

    /// Height already consumed by withdrawals and refunds.
    pub fn consumed_height(&self) -> Decimal {
        self.total_withdrawals + self.total_refunds
    }

    /// Height still available for new instruments.
    pub fn remaining_height(&self) -> Decimal {
        self.total_height - self.consumed_height()
    }

    /// `amount == totalHeight - totalWithdrawals - totalRefunds`
    pub fn is_balanced(&self) -> bool {
        self.amount == self.remaining_height()
    }
}

// ============================================================================
// LEDGER
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerType {
    Deposit,
    Withdrawal,
    Refund,
}

/// Immutable, append-only audit record of a balance-affecting event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: u64,
    pub user_credit_id: CreditId,
    pub amount: Decimal,
    pub entry_type: LedgerType,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// REDEMPTION INSTRUMENTS
// ============================================================================

/// Tickets are submitted by the receiver, tokens are withdrawn by the holder.
/// Both follow the same staircase rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstrumentKind {
    Ticket,
    Token,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstrumentStatus {
    Valid,
    Redeemed,
    Expired,
    Refunded,
    Invalid,
}

impl InstrumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstrumentStatus::Valid => "VALID",
            InstrumentStatus::Redeemed => "REDEEMED",
            InstrumentStatus::Expired => "EXPIRED",
            InstrumentStatus::Refunded => "REFUNDED",
            InstrumentStatus::Invalid => "INVALID",
        }
    }
}

/// A cumulative claim checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    pub id: InstrumentId,
    pub public_id: Uuid,
    pub group_id: GroupId,
    /// Cumulative checkpoint within the credit
    pub height: Decimal,
    /// Increment this instrument guarantees over its predecessor
    pub amount: Decimal,
    pub status: InstrumentStatus,
}

/// Cohort of instruments created by one split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentGroup {
    pub id: GroupId,
    pub user_credit_id: CreditId,
    pub kind: InstrumentKind,
    /// `totalTickets` / `totalTokens`
    pub total_instruments: u32,
    pub total_amount: Decimal,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// PENDING TRANSACTIONS
// ============================================================================

/// One pending-transaction table per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Deposit,
    Withdrawal,
    TicketSubmission,
    Refund,
    ContractDeploy,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Deposit => "credit_transaction",
            TransactionKind::Withdrawal => "withdraw_transaction",
            TransactionKind::TicketSubmission => "submit_ticket_transaction",
            TransactionKind::Refund => "refund_transaction",
            TransactionKind::ContractDeploy => "deploy_contract_transaction",
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Success,
    Failed,
}

impl TransactionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }
}

/// A user-submitted on-chain transaction awaiting reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingTransaction {
    pub id: PendingId,
    pub kind: TransactionKind,
    pub transaction_hash: String,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
    /// Expected amount, when the kind carries one
    pub amount: Option<Decimal>,
    pub user_credit_id: Option<CreditId>,
    pub instrument_id: Option<InstrumentId>,
    /// Per-deposit override of the withdraw window length
    pub additional_ticket_days: Option<i64>,
    /// Deployer wallet (contract deploys)
    pub wallet_address: Option<String>,
    pub user_id: Option<u64>,
    pub confirmations: Option<u64>,
    pub block_number: Option<u64>,
    pub fail_reason: Option<String>,
}

impl PendingTransaction {
    pub fn new(kind: TransactionKind, transaction_hash: &str, created_at: DateTime<Utc>) -> Self {
        Self {
            id: 0,
            kind,
            transaction_hash: transaction_hash.to_lowercase(),
            status: TransactionStatus::Pending,
            created_at,
            amount: None,
            user_credit_id: None,
            instrument_id: None,
            additional_ticket_days: None,
            wallet_address: None,
            user_id: None,
            confirmations: None,
            block_number: None,
            fail_reason: None,
        }
    }
}

/// Terminal outcome written by a reconciliation job.
#[derive(Debug, Clone, PartialEq)]
pub enum Settlement {
    Success {
        confirmations: u64,
        block_number: u64,
    },
    Failed {
        reason: String,
        confirmations: Option<u64>,
        block_number: Option<u64>,
    },
}

impl Settlement {
    pub fn status(&self) -> TransactionStatus {
        match self {
            Settlement::Success { .. } => TransactionStatus::Success,
            Settlement::Failed { .. } => TransactionStatus::Failed,
        }
    }
}

// ============================================================================
// BLOCK TRACKER
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockTracker {
    pub contract: String,
    pub block_number: u64,
}

// ============================================================================
// DEPLOYED CONTRACTS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployedContract {
    pub id: u64,
    pub address: String,
    pub user_id: Option<u64>,
    pub deployed_from_address: String,
    pub transaction_id: PendingId,
}

// ============================================================================
// TRANSFERS (referenced, not owned)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferStatus {
    Pending,
    Success,
    Failed,
}

/// One payout leg of a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transfer {
    pub id: TransferId,
    pub transfer_request_id: TransferRequestId,
    /// Correlation id shared by every transfer of a batch
    pub transfer_ref: String,
    pub controller_id: u64,
    pub from: String,
    pub to: String,
    pub tx_hash: Option<String>,
    /// Sealed amount, opaque to this crate
    pub amount: Option<String>,
    pub status: TransferStatus,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    /// Last status, hash or activity change
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferRequestStatus {
    Submitted,
    Approved,
    Paid,
    Rejected,
}

impl TransferRequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferRequestStatus::Submitted => "SUBMITTED",
            TransferRequestStatus::Approved => "APPROVED",
            TransferRequestStatus::Paid => "PAID",
            TransferRequestStatus::Rejected => "REJECTED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub id: TransferRequestId,
    pub public_id: Uuid,
    /// Receiving wallet as registered by the user
    pub wallet_address: String,
    /// Alternative on-chain encodings of the same receiver
    pub actor_address: Option<String>,
    pub robust_address: Option<String>,
    /// Sealed requested amount
    pub amount: String,
    pub status: TransferRequestStatus,
    pub is_active: bool,
}

impl TransferRequest {
    /// True when `receiver` is any known encoding of this request's wallet.
    pub fn matches_receiver(&self, receiver: &str) -> bool {
        let receiver = receiver.to_lowercase();
        self.wallet_address.to_lowercase() == receiver
            || self.actor_address.as_deref().map(str::to_lowercase).as_deref() == Some(receiver.as_str())
            || self.robust_address.as_deref().map(str::to_lowercase).as_deref() == Some(receiver.as_str())
    }
}

/// Audit diff of a transfer request field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRequestHistory {
    pub id: u64,
    pub transfer_request_id: TransferRequestId,
    pub field: String,
    pub old_value: String,
    pub new_value: String,
    pub user_role_id: u64,
    pub created_at: DateTime<Utc>,
}

/// FIL-native payment message awaiting verification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilMessageRecord {
    pub id: u64,
    /// Message CID as submitted
    pub message_cid: String,
    pub is_processed: bool,
    pub is_active: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_credit_heights() {
        let mut credit = UserCredit::new(1, "0xPAYER", "0xCONTRACT");
        credit.total_height = dec!(1000);
        credit.total_withdrawals = dec!(250);
        credit.total_refunds = dec!(100);
        credit.amount = dec!(650);

        assert_eq!(credit.payer, "0xpayer");
        assert_eq!(credit.consumed_height(), dec!(350));
        assert_eq!(credit.remaining_height(), dec!(650));
        assert!(credit.is_balanced());

        credit.amount = dec!(700);
        assert!(!credit.is_balanced());
    }

    #[test]
    fn test_receiver_matching() {
        let request = TransferRequest {
            id: 1,
            public_id: Uuid::new_v4(),
            wallet_address: "f410fabc".to_string(),
            actor_address: Some("f01234".to_string()),
            robust_address: None,
            amount: "10".to_string(),
            status: TransferRequestStatus::Approved,
            is_active: true,
        };

        assert!(request.matches_receiver("F410FABC"));
        assert!(request.matches_receiver("f01234"));
        assert!(!request.matches_receiver("f09999"));
    }

    #[test]
    fn test_status_terminality() {
        assert!(!TransactionStatus::Pending.is_terminal());
        assert!(TransactionStatus::Success.is_terminal());
        assert!(TransactionStatus::Failed.is_terminal());
        assert_eq!(
            Settlement::Failed { reason: "x".into(), confirmations: None, block_number: None }.status(),
            TransactionStatus::Failed
        );
    }
}

// ============================================================================
// Transfers
// ============================================================================
//
// Payout batches and their confirmation:
//
//   prepare_transfers        requests → PENDING transfers sharing one ref
//   TransferPaymentConfirmer Forward/ForwardAny payout → transfers SUCCESS,
//                            requests APPROVED → PAID
//   FilVerificationJob       FIL-native message CID → same settlement
//   PendingTransferCheckJob  stale PENDING transfers → receipt lookup,
//                            confirmed or FAILED
//
// Amounts on transfer requests and transfers are sealed by an external
// service; this module only sees them through `AmountSealer`.
//
// ============================================================================

pub mod confirm;
pub mod fil_verification;
pub mod pending_check;
pub mod prepare;

pub use confirm::TransferPaymentConfirmer;
pub use fil_verification::{FilVerificationJob, FilVerificationReport};
pub use pending_check::{PendingTransferCheckJob, PendingTransferReport};
pub use prepare::{prepare_transfers, PrepareTransfers, PreparedBatch};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::error::{StoreResult, TransferError};
use crate::models::{TransferId, TransferRequestHistory, TransferRequestStatus, TransferStatus};
use crate::store::StoreTx;

/// Seals and opens amounts stored on transfer rows.
pub trait AmountSealer: Send + Sync {
    fn seal(&self, amount: Decimal) -> Result<String, TransferError>;
    fn open(&self, sealed: &str) -> Result<Decimal, TransferError>;
}

/// Stores amounts as plain decimal strings.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainAmountCodec;

impl AmountSealer for PlainAmountCodec {
    fn seal(&self, amount: Decimal) -> Result<String, TransferError> {
        Ok(amount.normalize().to_string())
    }

    fn open(&self, sealed: &str) -> Result<Decimal, TransferError> {
        Decimal::from_str(sealed.trim()).map_err(|e| TransferError::Sealing(e.to_string()))
    }
}

/// Payment details written onto a settled transfer.
#[derive(Debug, Clone)]
pub struct Payment<'a> {
    pub tx_hash: &'a str,
    pub sealed_amount: String,
    pub user_role_id: u64,
    pub at: DateTime<Utc>,
}

/// Settle one transfer: transfer → SUCCESS, request APPROVED → PAID, plus a
/// history entry. All checks run before the first write, so an `Err` leaves
/// the transaction untouched.
pub fn mark_paid<T: StoreTx + ?Sized>(tx: &mut T, transfer_id: TransferId, payment: Payment<'_>) -> StoreResult<()> {
    let mut transfer = tx
        .transfer(transfer_id)
        .filter(|t| t.is_active && t.status != TransferStatus::Success)
        .ok_or(TransferError::TransferNotPending(transfer_id))?;
    let request_id = transfer.transfer_request_id;
    tx.transfer_request(request_id)
        .filter(|r| r.is_active && r.status == TransferRequestStatus::Approved)
        .ok_or(TransferError::RequestNotApproved(request_id))?;

    transfer.status = TransferStatus::Success;
    transfer.tx_hash = Some(payment.tx_hash.to_lowercase());
    transfer.amount = Some(payment.sealed_amount);
    transfer.updated_at = payment.at;
    tx.update_transfer(&transfer)?;

    if !tx.update_transfer_request_status(request_id, TransferRequestStatus::Approved, TransferRequestStatus::Paid) {
        return Err(TransferError::RequestNotApproved(request_id).into());
    }
    tx.append_history(TransferRequestHistory {
        id: 0,
        transfer_request_id: request_id,
        field: "status".to_string(),
        old_value: TransferRequestStatus::Approved.as_str().to_string(),
        new_value: TransferRequestStatus::Paid.as_str().to_string(),
        user_role_id: payment.user_role_id,
        created_at: payment.at,
    });
    Ok(())
}

/// Transaction submissions
///
/// Users submit the hash of a transaction they sent; the matching
/// reconciliation job later settles it. Submitting a hash already present in
/// that kind's table is a no-op.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{LedgerError, StoreResult};
use crate::instruments::redeem::credit_for_instrument;
use crate::models::{CreditId, InstrumentId, PendingTransaction, TransactionKind};
use crate::store::StoreTx;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Submission {
    Deposit {
        transaction_hash: String,
        payer: String,
        contract: String,
        amount: Decimal,
        additional_ticket_days: Option<i64>,
    },
    Withdrawal {
        transaction_hash: String,
        instrument_id: InstrumentId,
    },
    TicketSubmission {
        transaction_hash: String,
        instrument_id: InstrumentId,
    },
    Refund {
        transaction_hash: String,
        user_credit_id: CreditId,
    },
    ContractDeploy {
        transaction_hash: String,
        wallet_address: String,
        user_id: Option<u64>,
    },
}

impl Submission {
    pub fn kind(&self) -> TransactionKind {
        match self {
            Submission::Deposit { .. } => TransactionKind::Deposit,
            Submission::Withdrawal { .. } => TransactionKind::Withdrawal,
            Submission::TicketSubmission { .. } => TransactionKind::TicketSubmission,
            Submission::Refund { .. } => TransactionKind::Refund,
            Submission::ContractDeploy { .. } => TransactionKind::ContractDeploy,
        }
    }

    pub fn transaction_hash(&self) -> &str {
        match self {
            Submission::Deposit { transaction_hash, .. }
            | Submission::Withdrawal { transaction_hash, .. }
            | Submission::TicketSubmission { transaction_hash, .. }
            | Submission::Refund { transaction_hash, .. }
            | Submission::ContractDeploy { transaction_hash, .. } => transaction_hash,
        }
    }
}

/// Record a PENDING row for a submitted transaction. Returns `None` when the
/// hash was already recorded for this kind.
pub fn record_submission<T: StoreTx + ?Sized>(
    tx: &mut T,
    submission: &Submission,
    now: DateTime<Utc>,
) -> StoreResult<Option<PendingTransaction>> {
    let kind = submission.kind();
    let hash = submission.transaction_hash();
    if tx.pending_by_hash(kind, hash).is_some() {
        debug!(%kind, tx_hash = %hash, "submission already recorded");
        return Ok(None);
    }

    let mut row = PendingTransaction::new(kind, hash, now);
    match submission {
        Submission::Deposit { payer, contract, amount, additional_ticket_days, .. } => {
            let credit = match tx.user_credit_by_owner(payer, contract) {
                Some(credit) => credit,
                None => tx.insert_user_credit(payer, contract),
            };
            row.user_credit_id = Some(credit.id);
            row.amount = Some(*amount);
            row.additional_ticket_days = *additional_ticket_days;
        }
        Submission::Withdrawal { instrument_id, .. } | Submission::TicketSubmission { instrument_id, .. } => {
            let instrument = tx
                .instrument(*instrument_id)
                .ok_or(LedgerError::InstrumentNotFound(*instrument_id))?;
            row.user_credit_id = Some(credit_for_instrument(tx, &instrument)?);
            row.instrument_id = Some(instrument.id);
            row.amount = Some(instrument.amount);
        }
        Submission::Refund { user_credit_id, .. } => {
            let credit = tx
                .user_credit(*user_credit_id)
                .ok_or(LedgerError::CreditNotFound(*user_credit_id))?;
            row.user_credit_id = Some(credit.id);
            row.amount = Some(credit.remaining_height());
        }
        Submission::ContractDeploy { wallet_address, user_id, .. } => {
            row.wallet_address = Some(wallet_address.to_lowercase());
            row.user_id = *user_id;
        }
    }

    let row = tx.insert_pending(row)?;
    info!(%kind, tx_hash = %row.transaction_hash, id = row.id, "transaction submitted");
    Ok(Some(row))
}

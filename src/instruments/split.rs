// ============================================================================
// Split - Redemption Instruments
// ============================================================================
//
// A split carves the unconsumed height of a credit into a staircase of
// cumulative checkpoints:
//
//   consumed = 0, per = 250, n = 4  →  250, 500, 750, 1000
//
// Each step's `amount` is `per`; its `height` is where the staircase stands
// after that step. Redeeming a step claims everything between the consumed
// height and that step.
//
// ============================================================================

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::{SplitError, StoreResult};
use crate::models::{CreditId, Instrument, InstrumentGroup, InstrumentKind, InstrumentStatus};
use crate::store::StoreTx;

/// Groups close this long before the credit's withdraw window does.
pub const GROUP_EXPIRY_MARGIN_HOURS: i64 = 1;

#[derive(Debug, Clone, Deserialize)]
pub struct SplitRequest {
    pub user_credit_id: CreditId,
    pub kind: InstrumentKind,
    /// Number of instruments to create
    pub split_number: u32,
    pub credit_per_instrument: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct SplitResult {
    pub group: InstrumentGroup,
    pub instruments: Vec<Instrument>,
}

/// Heights of a split starting at `consumed`.
pub fn staircase(consumed: Decimal, per: Decimal, split_number: u32) -> Vec<Decimal> {
    (1..=split_number)
        .map(|step| consumed + per * Decimal::from(step))
        .collect()
}

fn validate(req: &SplitRequest) -> Result<(), SplitError> {
    if req.split_number == 0 {
        return Err(SplitError::ZeroSplit);
    }
    if req.credit_per_instrument <= Decimal::ZERO {
        return Err(SplitError::NonPositiveCredit);
    }
    Ok(())
}

/// Create a group of instruments over the credit's remaining height.
///
/// Group and instruments are written together; any validation failure
/// aborts the surrounding transaction.
pub fn split<T: StoreTx + ?Sized>(
    tx: &mut T,
    req: &SplitRequest,
    now: DateTime<Utc>,
) -> StoreResult<SplitResult> {
    validate(req)?;

    let credit = tx
        .user_credit(req.user_credit_id)
        .ok_or(SplitError::CreditNotFound(req.user_credit_id))?;

    if matches!(credit.withdraw_expires_at, Some(expires_at) if now >= expires_at) {
        return Err(SplitError::WindowExpired(credit.id).into());
    }

    let available = credit.remaining_height();
    let per = req.credit_per_instrument;
    if per > available {
        return Err(SplitError::CreditPerInstrumentTooHigh { per, available }.into());
    }
    // a product past Decimal::MAX exceeds any height
    let total = per
        .checked_mul(Decimal::from(req.split_number))
        .ok_or(SplitError::ExceedsAvailable { total: Decimal::MAX, available })?;
    if total > available {
        return Err(SplitError::ExceedsAvailable { total, available }.into());
    }

    let group = tx.insert_group(InstrumentGroup {
        id: 0,
        user_credit_id: credit.id,
        kind: req.kind,
        total_instruments: req.split_number,
        total_amount: total,
        expires_at: credit
            .withdraw_expires_at
            .map(|at| at - Duration::hours(GROUP_EXPIRY_MARGIN_HOURS)),
        created_at: now,
    });

    let instruments = staircase(credit.consumed_height(), per, req.split_number)
        .into_iter()
        .map(|height| {
            tx.insert_instrument(Instrument {
                id: 0,
                public_id: Uuid::new_v4(),
                group_id: group.id,
                height,
                amount: per,
                status: InstrumentStatus::Valid,
            })
        })
        .collect();

    info!(
        credit_id = credit.id,
        group_id = group.id,
        kind = ?req.kind,
        count = req.split_number,
        %total,
        "credit split"
    );
    Ok(SplitResult { group, instruments })
}

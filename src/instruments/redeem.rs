// ============================================================================
// Redemption - Redemption Instruments
// ============================================================================
//
// Redeeming a checkpoint claims the distance between the credit's consumed
// height and the checkpoint's height. Every lower VALID checkpoint of the
// same group is covered by that claim and becomes INVALID; higher ones stay
// VALID and can still be redeemed for the difference.
//
//   250 500 750 1000   redeem 750  →  INVALID INVALID REDEEMED VALID
//
// ============================================================================

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::debug;

use crate::error::{LedgerError, StoreResult};
use crate::ledger;
use crate::models::{CreditId, Instrument, InstrumentId, InstrumentStatus};
use crate::store::StoreTx;

/// Outcome of one confirmed redemption.
#[derive(Debug, Clone, PartialEq)]
pub struct Redemption {
    pub instrument_id: InstrumentId,
    pub user_credit_id: CreditId,
    pub claimed: Decimal,
    pub invalidated: Vec<InstrumentId>,
}

/// Credit that owns an instrument, through its group.
pub fn credit_for_instrument<T: StoreTx + ?Sized>(
    tx: &T,
    instrument: &Instrument,
) -> StoreResult<CreditId> {
    let group = tx
        .group(instrument.group_id)
        .ok_or(LedgerError::InstrumentNotFound(instrument.id))?;
    Ok(group.user_credit_id)
}

/// Redeem a VALID instrument: withdraw the claimed height, mark it REDEEMED
/// and invalidate the lower steps of its group.
pub fn redeem<T: StoreTx + ?Sized>(
    tx: &mut T,
    instrument_id: InstrumentId,
    now: DateTime<Utc>,
) -> StoreResult<Redemption> {
    let instrument = tx
        .instrument(instrument_id)
        .ok_or(LedgerError::InstrumentNotFound(instrument_id))?;
    if instrument.status != InstrumentStatus::Valid {
        return Err(LedgerError::InstrumentNotRedeemable {
            id: instrument.id,
            status: instrument.status,
        }
        .into());
    }

    let credit_id = credit_for_instrument(tx, &instrument)?;
    let credit = tx
        .user_credit(credit_id)
        .ok_or(LedgerError::CreditNotFound(credit_id))?;

    let consumed = credit.consumed_height();
    let claimed = instrument.height - consumed;
    if claimed <= Decimal::ZERO {
        return Err(LedgerError::NothingToClaim {
            id: instrument.id,
            height: instrument.height,
            consumed,
        }
        .into());
    }

    ledger::apply_withdrawal(tx, credit_id, claimed, now)?;
    tx.set_instrument_status(instrument.id, InstrumentStatus::Redeemed)?;

    let invalidated: Vec<InstrumentId> = tx
        .instruments_in_group(instrument.group_id)
        .into_iter()
        .filter(|other| {
            other.id != instrument.id
                && other.status == InstrumentStatus::Valid
                && other.height <= instrument.height
        })
        .map(|other| other.id)
        .collect();
    for id in &invalidated {
        tx.set_instrument_status(*id, InstrumentStatus::Invalid)?;
    }

    debug!(instrument_id, %claimed, invalidated = invalidated.len(), "instrument redeemed");
    Ok(Redemption {
        instrument_id,
        user_credit_id: credit_id,
        claimed,
        invalidated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::instruments::split::{split, SplitRequest};
    use crate::models::InstrumentKind;
    use crate::store::memory::MemoryTables;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn split_thousand(tx: &mut MemoryTables) -> (CreditId, Vec<Instrument>) {
        let now = Utc::now();
        let mut credit = tx.insert_user_credit("0xpayer", "0xcredit");
        credit.total_height = dec!(1000);
        credit.amount = dec!(1000);
        credit.withdraw_expires_at = Some(now + Duration::days(30));
        tx.update_user_credit(&credit).unwrap();

        let req = SplitRequest {
            user_credit_id: credit.id,
            kind: InstrumentKind::Token,
            split_number: 4,
            credit_per_instrument: dec!(250),
        };
        (credit.id, split(tx, &req, now).unwrap().instruments)
    }

    fn status(tx: &MemoryTables, id: InstrumentId) -> InstrumentStatus {
        tx.instrument(id).unwrap().status
    }

    #[test]
    fn test_redeem_invalidates_lower_steps() {
        let mut tx = MemoryTables::default();
        let (credit_id, steps) = split_thousand(&mut tx);

        let redemption = redeem(&mut tx, steps[2].id, Utc::now()).unwrap();

        assert_eq!(redemption.claimed, dec!(750));
        assert_eq!(redemption.invalidated, vec![steps[0].id, steps[1].id]);
        assert_eq!(status(&tx, steps[0].id), InstrumentStatus::Invalid);
        assert_eq!(status(&tx, steps[1].id), InstrumentStatus::Invalid);
        assert_eq!(status(&tx, steps[2].id), InstrumentStatus::Redeemed);
        assert_eq!(status(&tx, steps[3].id), InstrumentStatus::Valid);

        let credit = tx.user_credit(credit_id).unwrap();
        assert_eq!(credit.total_withdrawals, dec!(750));
        assert_eq!(credit.amount, dec!(250));
        assert!(credit.is_balanced());
    }

    #[test]
    fn test_redeem_next_step_claims_difference() {
        let mut tx = MemoryTables::default();
        let (credit_id, steps) = split_thousand(&mut tx);

        redeem(&mut tx, steps[1].id, Utc::now()).unwrap();
        let second = redeem(&mut tx, steps[3].id, Utc::now()).unwrap();

        assert_eq!(second.claimed, dec!(500));
        assert_eq!(second.invalidated, vec![steps[2].id]);
        assert_eq!(tx.user_credit(credit_id).unwrap().amount, Decimal::ZERO);
    }

    #[test]
    fn test_redeem_requires_valid_instrument() {
        let mut tx = MemoryTables::default();
        let (_, steps) = split_thousand(&mut tx);
        redeem(&mut tx, steps[2].id, Utc::now()).unwrap();

        let again = redeem(&mut tx, steps[2].id, Utc::now());
        assert!(matches!(
            again,
            Err(StoreError::Ledger(LedgerError::InstrumentNotRedeemable { .. }))
        ));
        let lower = redeem(&mut tx, steps[0].id, Utc::now());
        assert!(matches!(
            lower,
            Err(StoreError::Ledger(LedgerError::InstrumentNotRedeemable { .. }))
        ));
    }
}

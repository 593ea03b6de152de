// ============================================================================
// Redemption Instruments
// ============================================================================
//
// Tickets and tokens are cumulative claim checkpoints over a credit's height.
// Lifecycle:
//
//   VALID ──redeem──► REDEEMED
//     │ ├─lower step redeemed──► INVALID
//     │ └─credit refunded──────► REFUNDED
//     └─group expired──────────► EXPIRED
//
// Instruments are never deleted.
//
// ============================================================================

pub mod redeem;
pub mod split;

pub use redeem::{credit_for_instrument, redeem, Redemption};
pub use split::{split, SplitRequest, SplitResult};

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::error::StoreResult;
use crate::models::{CreditId, InstrumentStatus};
use crate::store::{Store, StoreTx};

/// Mark every VALID instrument of the credit REFUNDED. Returns how many moved.
pub fn refund_instruments<T: StoreTx + ?Sized>(tx: &mut T, credit_id: CreditId) -> StoreResult<usize> {
    let mut refunded = 0;
    for group in tx.groups_for_credit(credit_id) {
        for instrument in tx.instruments_in_group(group.id) {
            if instrument.status == InstrumentStatus::Valid {
                tx.set_instrument_status(instrument.id, InstrumentStatus::Refunded)?;
                refunded += 1;
            }
        }
    }
    Ok(refunded)
}

/// Mark VALID instruments of lapsed groups EXPIRED. Returns how many moved.
pub fn expire_lapsed<T: StoreTx + ?Sized>(tx: &mut T, now: DateTime<Utc>) -> StoreResult<usize> {
    let mut expired = 0;
    let lapsed = tx
        .all_groups()
        .into_iter()
        .filter(|g| matches!(g.expires_at, Some(at) if at <= now));
    for group in lapsed {
        for instrument in tx.instruments_in_group(group.id) {
            if instrument.status == InstrumentStatus::Valid {
                tx.set_instrument_status(instrument.id, InstrumentStatus::Expired)?;
                expired += 1;
            }
        }
    }
    Ok(expired)
}

// ============================================================================
// EXPIRY JOB
// ============================================================================

/// Periodic sweep expiring instruments whose group window has closed.
pub struct ExpiryJob<S> {
    store: S,
}

impl<S: Store> ExpiryJob<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub async fn run(&self) -> StoreResult<usize> {
        self.run_at(Utc::now()).await
    }

    pub async fn run_at(&self, now: DateTime<Utc>) -> StoreResult<usize> {
        match self.store.transaction(|tx| expire_lapsed(tx, now)).await {
            Ok(expired) => {
                info!(expired, "instrument expiry sweep finished");
                Ok(expired)
            }
            Err(e) => {
                warn!(error = %e, "instrument expiry sweep failed");
                Err(e)
            }
        }
    }
}

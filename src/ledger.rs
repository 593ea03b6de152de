/// Credit Ledger
///
/// Balance math for a `UserCredit` aggregate. Every function here runs inside
/// a store transaction and keeps `amount == totalHeight - totalWithdrawals -
/// totalRefunds` true on return:
/// - deposits grow the height and open or extend the withdraw window
/// - withdrawals consume height up to a redeemed instrument
/// - refunds consume whatever height is left

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use tracing::debug;

use crate::config::WindowConfig;
use crate::error::{LedgerError, StoreResult};
use crate::models::{CreditId, LedgerType, UserCredit};
use crate::store::StoreTx;

// ============================================================================
// CREDIT WINDOW
// ============================================================================

/// Whether a deposit opened a fresh window or pushed the current one out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowChange {
    Opened,
    Extended,
}

/// Move the withdraw/refund window for a deposit landing at `now`.
///
/// A credit without a window, or whose refund period has already started,
/// gets a new one. Otherwise the expiry is pushed out by `window_len` and the
/// refund start follows it.
pub fn credit_window(
    credit: &mut UserCredit,
    now: DateTime<Utc>,
    window_len: Duration,
    cfg: &WindowConfig,
) -> WindowChange {
    let current = match (credit.withdraw_expires_at, credit.refund_starts_at) {
        (Some(expires_at), Some(refund_at)) if now < refund_at => Some(expires_at),
        _ => None,
    };

    match current {
        Some(expires_at) => {
            let expires_at = expires_at + window_len;
            credit.withdraw_expires_at = Some(expires_at);
            credit.refund_starts_at = Some(expires_at + cfg.buffer);
            WindowChange::Extended
        }
        None => {
            let expires_at = now + window_len;
            credit.withdraw_starts_at = Some(now);
            credit.withdraw_expires_at = Some(expires_at);
            credit.refund_starts_at = Some(expires_at + cfg.refund_lock + cfg.buffer);
            WindowChange::Opened
        }
    }
}

// ============================================================================
// MUTATIONS
// ============================================================================

fn load_credit<T: StoreTx + ?Sized>(tx: &T, id: CreditId) -> StoreResult<UserCredit> {
    Ok(tx.user_credit(id).ok_or(LedgerError::CreditNotFound(id))?)
}

/// Credit a confirmed deposit: grow the height, move the window, append a
/// DEPOSIT entry.
pub fn apply_deposit<T: StoreTx + ?Sized>(
    tx: &mut T,
    credit_id: CreditId,
    deposited: Decimal,
    window_len: Duration,
    cfg: &WindowConfig,
    now: DateTime<Utc>,
) -> StoreResult<UserCredit> {
    let mut credit = load_credit(tx, credit_id)?;

    let change = credit_window(&mut credit, now, window_len, cfg);
    credit.total_height += deposited;
    credit.amount += deposited;

    tx.update_user_credit(&credit)?;
    tx.append_ledger(credit.id, deposited, LedgerType::Deposit, now);

    debug!(credit_id, %deposited, ?change, "deposit applied");
    Ok(credit)
}

/// Consume `claimed` height for a redeemed instrument and append a
/// WITHDRAWAL entry.
pub fn apply_withdrawal<T: StoreTx + ?Sized>(
    tx: &mut T,
    credit_id: CreditId,
    claimed: Decimal,
    now: DateTime<Utc>,
) -> StoreResult<UserCredit> {
    let mut credit = load_credit(tx, credit_id)?;

    credit.amount -= claimed;
    credit.total_withdrawals += claimed;

    tx.update_user_credit(&credit)?;
    tx.append_ledger(credit.id, claimed, LedgerType::Withdrawal, now);

    debug!(credit_id, %claimed, "withdrawal applied");
    Ok(credit)
}

/// Refund everything not yet consumed. Returns the refunded height.
pub fn apply_refund<T: StoreTx + ?Sized>(
    tx: &mut T,
    credit_id: CreditId,
    now: DateTime<Utc>,
) -> StoreResult<Decimal> {
    let mut credit = load_credit(tx, credit_id)?;
    let remaining = credit.remaining_height();

    credit.total_refunds += remaining;
    credit.amount = Decimal::ZERO;

    tx.update_user_credit(&credit)?;
    tx.append_ledger(credit.id, remaining, LedgerType::Refund, now);

    debug!(credit_id, %remaining, "refund applied");
    Ok(remaining)
}

// ============================================================================
// AUDIT
// ============================================================================

/// Ledger totals per entry type, for reconciling against the aggregate.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LedgerTotals {
    pub deposits: Decimal,
    pub withdrawals: Decimal,
    pub refunds: Decimal,
}

impl LedgerTotals {
    /// True when the entries add up to the aggregate's totals and balance.
    pub fn matches(&self, credit: &UserCredit) -> bool {
        self.deposits == credit.total_height
            && self.withdrawals == credit.total_withdrawals
            && self.refunds == credit.total_refunds
            && credit.is_balanced()
    }
}

pub fn ledger_totals<T: StoreTx + ?Sized>(tx: &T, credit_id: CreditId) -> LedgerTotals {
    tx.ledger_entries(credit_id)
        .into_iter()
        .fold(LedgerTotals::default(), |mut totals, entry| {
            match entry.entry_type {
                LedgerType::Deposit => totals.deposits += entry.amount,
                LedgerType::Withdrawal => totals.withdrawals += entry.amount,
                LedgerType::Refund => totals.refunds += entry.amount,
            }
            totals
        })
}

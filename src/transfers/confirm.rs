// ============================================================================
// Payment Confirmation - Transfers
// ============================================================================
//
// Called by the block watcher for every observed payout. A payout names the
// batch (`id` == transfer ref), the paying wallet and the receiver/value
// legs. Each leg settles the pending transfer whose request wallet matches
// the receiver and whose requested amount equals the paid amount.
//
// Transfers are looked up by ref + tx hash + payer first. Batches sent
// without registering the hash fall back to the ref's hashless PENDING
// transfers, which get the hash attached.
//
// ============================================================================

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{info, warn};

use super::{mark_paid, AmountSealer, Payment};
use crate::chain::filecoin::atto_to_fil;
use crate::chain::{format_address, format_hash, to_decimal, ForwardPayment};
use crate::error::{StoreError, StoreResult, TransferError};
use crate::models::{Transfer, TransferStatus};
use crate::store::{Store, StoreTx};
use crate::watcher::PaymentHandler;

pub struct TransferPaymentConfirmer<S, A> {
    store: S,
    sealer: A,
    system_user_role_id: u64,
}

impl<S: Store, A: AmountSealer> TransferPaymentConfirmer<S, A> {
    pub fn new(store: S, sealer: A, system_user_role_id: u64) -> Self {
        Self { store, sealer, system_user_role_id }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Settle the transfers paid by `payment`. Returns how many were paid.
    pub async fn confirm(&self, payment: &ForwardPayment) -> StoreResult<usize> {
        self.confirm_at(payment, Utc::now()).await
    }

    pub async fn confirm_at(&self, payment: &ForwardPayment, now: DateTime<Utc>) -> StoreResult<usize> {
        let legs = payment
            .value
            .iter()
            .map(|v| {
                let atto = to_decimal(*v).ok_or_else(|| TransferError::Sealing(format!("value {} out of range", v)))?;
                atto_to_fil(atto).map_err(|e| TransferError::Sealing(e.to_string()))
            })
            .collect::<Result<Vec<Decimal>, _>>()?;

        let sealer = &self.sealer;
        let role = self.system_user_role_id;
        let paid = self
            .store
            .transaction(move |tx| settle_payment(tx, payment, &legs, sealer, role, now))
            .await?;

        if paid > 0 {
            info!(transfer_ref = %payment.id, tx_hash = %format_hash(&payment.transaction_hash), paid, "payout confirmed");
        }
        Ok(paid)
    }
}

#[async_trait]
impl<S: Store, A: AmountSealer> PaymentHandler for TransferPaymentConfirmer<S, A> {
    async fn handle_payment(&self, payment: &ForwardPayment) -> StoreResult<()> {
        self.confirm(payment).await.map(|_| ())
    }
}

fn candidates<T: StoreTx + ?Sized>(
    tx: &mut T,
    payment: &ForwardPayment,
    now: DateTime<Utc>,
) -> StoreResult<Vec<Transfer>> {
    let from = format_address(&payment.from);
    let hash = format_hash(&payment.transaction_hash);
    let pending: Vec<Transfer> = tx
        .transfers_by_ref(&payment.id)
        .into_iter()
        .filter(|t| t.status == TransferStatus::Pending && t.from == from)
        .collect();

    let matched: Vec<Transfer> = pending
        .iter()
        .filter(|t| t.is_active && t.tx_hash.as_deref() == Some(hash.as_str()))
        .cloned()
        .collect();
    if !matched.is_empty() {
        return Ok(matched);
    }

    let mut hashless: Vec<Transfer> = pending.into_iter().filter(|t| t.tx_hash.is_none()).collect();
    for transfer in &mut hashless {
        transfer.tx_hash = Some(hash.clone());
        transfer.is_active = true;
        transfer.updated_at = now;
        tx.update_transfer(transfer)?;
    }
    if !hashless.is_empty() {
        warn!(
            transfer_ref = %payment.id,
            tx_hash = %hash,
            transfers = ?hashless.iter().map(|t| t.id).collect::<Vec<_>>(),
            "transfers without transaction hash settled from chain payout"
        );
    }
    Ok(hashless)
}

fn settle_payment<T: StoreTx + ?Sized, A: AmountSealer + ?Sized>(
    tx: &mut T,
    payment: &ForwardPayment,
    legs: &[Decimal],
    sealer: &A,
    user_role_id: u64,
    now: DateTime<Utc>,
) -> StoreResult<usize> {
    let transfers = candidates(tx, payment, now)?;
    let tx_hash = format_hash(&payment.transaction_hash);
    let mut paid = 0;

    for (receiver, amount) in payment.to.iter().zip(legs) {
        for transfer in &transfers {
            let Some(request) = tx.transfer_request(transfer.transfer_request_id) else {
                continue;
            };
            if !request.matches_receiver(receiver) {
                continue;
            }
            let requested = match sealer.open(&request.amount) {
                Ok(requested) => requested,
                Err(e) => {
                    warn!(transfer_id = transfer.id, error = %e, "could not open requested amount");
                    continue;
                }
            };
            if requested != *amount {
                continue;
            }

            let settled = Payment {
                tx_hash: &tx_hash,
                sealed_amount: sealer.seal(*amount)?,
                user_role_id,
                at: now,
            };
            match mark_paid(tx, transfer.id, settled) {
                Ok(()) => paid += 1,
                // already settled by an earlier leg or delivery
                Err(StoreError::Transfer(e)) => {
                    warn!(transfer_id = transfer.id, error = %e, "transfer not settled");
                }
                Err(e) => return Err(e),
            }
        }
    }
    Ok(paid)
}

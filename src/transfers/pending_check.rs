// ============================================================================
// Pending Transfer Check - Transfers
// ============================================================================
//
// Safety net behind the block watcher. Transfers that still sit PENDING with
// a registered transaction hash some minutes after their last update get
// their receipt looked up directly:
//
//   receipt ok       payout event in the receipt → TransferPaymentConfirmer
//   receipt failed   every active transfer of the hash → FAILED, inactive
//   no receipt yet   left alone for the next run
//
// ============================================================================

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{AmountSealer, TransferPaymentConfirmer};
use crate::chain::{decode_log, ChainEvent, EvmClient, ForwardPayment, ReceiptExt, TransactionReceipt, H256};
use crate::chain::{format_address, Address};
use crate::config::DEFAULT_TRANSFER_STALE_MINUTES;
use crate::error::{JobResult, StoreResult};
use crate::models::TransferStatus;
use crate::store::{Store, StoreTx};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PendingTransferReport {
    /// Distinct transaction hashes looked up
    pub found: usize,
    /// Transfers settled through the confirmer
    pub confirmed: usize,
    /// Hashes whose receipt reverted
    pub failed_transactions: Vec<String>,
    /// Requests whose transfers were failed
    pub failed_requests: Vec<Uuid>,
}

pub struct PendingTransferCheckJob<C, S, A> {
    client: C,
    confirmer: TransferPaymentConfirmer<S, A>,
    multiforwarder: Address,
    stale_after: Duration,
}

impl<C, S, A> PendingTransferCheckJob<C, S, A>
where
    C: EvmClient,
    S: Store,
    A: AmountSealer,
{
    pub fn new(client: C, confirmer: TransferPaymentConfirmer<S, A>, multiforwarder: Address) -> Self {
        Self {
            client,
            confirmer,
            multiforwarder,
            stale_after: Duration::minutes(DEFAULT_TRANSFER_STALE_MINUTES),
        }
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub async fn run(&self) -> JobResult<PendingTransferReport> {
        self.run_at(Utc::now()).await
    }

    pub async fn run_at(&self, now: DateTime<Utc>) -> JobResult<PendingTransferReport> {
        let cutoff = now - self.stale_after;
        let stale = self
            .confirmer
            .store()
            .transaction(move |tx| Ok(tx.stale_pending_transfers(cutoff)))
            .await?;

        let mut hashes: Vec<String> = stale.into_iter().filter_map(|t| t.tx_hash).collect();
        hashes.sort();
        hashes.dedup();

        let mut report = PendingTransferReport { found: hashes.len(), ..Default::default() };
        if hashes.is_empty() {
            debug!("no stale pending transfers");
            return Ok(report);
        }

        for hash in &hashes {
            let Ok(tx_hash) = hash.parse::<H256>() else {
                warn!(tx_hash = %hash, "transfer carries a malformed transaction hash");
                continue;
            };
            let receipt = match self.client.transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) if receipt.block().is_some() => receipt,
                Ok(_) => {
                    debug!(tx_hash = %hash, "payout not mined yet");
                    continue;
                }
                Err(e) => {
                    warn!(tx_hash = %hash, error = %e, "receipt lookup failed");
                    continue;
                }
            };

            if receipt.succeeded() {
                let Some(payment) = payout_in_receipt(&receipt, self.multiforwarder) else {
                    warn!(tx_hash = %hash, "successful payout without a Forward event");
                    continue;
                };
                match self.confirmer.confirm_at(&payment, now).await {
                    Ok(paid) => report.confirmed += paid,
                    Err(e) => warn!(tx_hash = %hash, error = %e, "payment confirmation failed"),
                }
            } else {
                let key = hash.clone();
                let requests = self
                    .confirmer
                    .store()
                    .transaction(move |tx| fail_transfers(tx, &key, now))
                    .await?;
                warn!(tx_hash = %hash, requests = ?requests, "payout transaction reverted");
                report.failed_transactions.push(hash.clone());
                report.failed_requests.extend(requests);
            }
        }

        info!(
            found = report.found,
            confirmed = report.confirmed,
            failed = report.failed_transactions.len(),
            "pending transfer check finished"
        );
        Ok(report)
    }
}

/// The payout carried by a receipt, `Forward` preferred over `ForwardAny`.
fn payout_in_receipt(receipt: &TransactionReceipt, multiforwarder: Address) -> Option<ForwardPayment> {
    let mut any = None;
    for log in receipt.logs.iter().filter(|log| log.address == multiforwarder) {
        match decode_log(log) {
            Ok(Some(ChainEvent::Forward(payment))) => return Some(payment),
            Ok(Some(ChainEvent::ForwardAny(payment))) => any = any.or(Some(payment)),
            Ok(_) => {}
            Err(e) => debug!(contract = %format_address(&log.address), error = %e, "undecodable payout log"),
        }
    }
    any
}

/// Fail every active PENDING transfer of `tx_hash`; returns the public ids of
/// their requests.
fn fail_transfers<T: StoreTx + ?Sized>(tx: &mut T, tx_hash: &str, now: DateTime<Utc>) -> StoreResult<Vec<Uuid>> {
    let mut requests = Vec::new();
    for mut transfer in tx.active_transfers_by_hash(tx_hash) {
        if transfer.status != TransferStatus::Pending {
            continue;
        }
        transfer.status = TransferStatus::Failed;
        transfer.is_active = false;
        transfer.updated_at = now;
        tx.update_transfer(&transfer)?;
        if let Some(request) = tx.transfer_request(transfer.transfer_request_id) {
            requests.push(request.public_id);
        }
    }
    Ok(requests)
}

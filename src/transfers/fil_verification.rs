// ============================================================================
// FIL Verification - Transfers
// ============================================================================
//
// Payouts sent as plain FIL messages are registered by CID. For each
// unprocessed CID the job asks the node for the message, reads the transfer
// ref out of its params, checks the receiver and settles the transfer.
// Node calls go out one at a time, spaced by the configured interval.
//
// ============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{mark_paid, AmountSealer, Payment};
use crate::chain::FilNodeClient;
use crate::config::FilNodeConfig;
use crate::error::{JobResult, RpcError, StoreError, StoreResult, TransferError};
use crate::models::{FilMessageRecord, TransferStatus};
use crate::rate_limit::RateLimiter;
use crate::store::{Store, StoreTx};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilVerificationReport {
    pub found: usize,
    pub updated: usize,
    pub failed: usize,
    /// Found but not updated
    pub remaining: usize,
}

/// Why a message was not settled this run.
#[derive(Debug, thiserror::Error)]
enum VerifyError {
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error("message not found on node")]
    MessageNotFound,
    #[error("no Params found")]
    MissingParams,
    #[error("no pending transfer for ref {0}")]
    TransferNotFound(String),
    #[error("message receiver {found} does not match request wallet {expected}")]
    ReceiverMismatch { found: String, expected: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<TransferError> for VerifyError {
    fn from(e: TransferError) -> Self {
        VerifyError::Store(e.into())
    }
}

pub struct FilVerificationJob<C, S, A> {
    client: C,
    store: S,
    sealer: A,
    cfg: FilNodeConfig,
    limiter: RateLimiter,
}

impl<C, S, A> FilVerificationJob<C, S, A>
where
    C: FilNodeClient,
    S: Store,
    A: AmountSealer,
{
    pub fn new(client: C, store: S, sealer: A, cfg: FilNodeConfig) -> Self {
        let limiter = RateLimiter::from_millis(cfg.min_interval_ms);
        Self { client, store, sealer, cfg, limiter }
    }

    pub async fn run(&self) -> JobResult<FilVerificationReport> {
        self.run_at(Utc::now()).await
    }

    pub async fn run_at(&self, now: DateTime<Utc>) -> JobResult<FilVerificationReport> {
        let limit = self.cfg.batch_size;
        let messages = self
            .store
            .transaction(move |tx| Ok(tx.unprocessed_messages(limit)))
            .await?;

        let mut report = FilVerificationReport {
            found: messages.len(),
            remaining: messages.len(),
            ..Default::default()
        };
        if messages.is_empty() {
            info!("no pending FIL messages to verify");
            return Ok(report);
        }

        for message in &messages {
            self.limiter.acquire().await;
            match self.verify_and_update(message, now).await {
                Ok(()) => {
                    report.updated += 1;
                    report.remaining -= 1;
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(message_cid = %message.message_cid, error = %e, "FIL message not settled");
                }
            }
        }

        info!(
            found = report.found,
            updated = report.updated,
            failed = report.failed,
            remaining = report.remaining,
            "FIL verification run finished"
        );
        Ok(report)
    }

    async fn verify_and_update(&self, record: &FilMessageRecord, now: DateTime<Utc>) -> Result<(), VerifyError> {
        let message = self
            .client
            .chain_get_message(&record.message_cid)
            .await?
            .ok_or(VerifyError::MessageNotFound)?;
        let transfer_ref = message.transfer_ref()?.ok_or(VerifyError::MissingParams)?;

        let lookup = transfer_ref.clone();
        let found = self
            .store
            .transaction(move |tx| {
                let transfer = tx
                    .transfers_by_ref(&lookup)
                    .into_iter()
                    .find(|t| t.is_active && t.status == TransferStatus::Pending);
                let request = transfer.as_ref().and_then(|t| tx.transfer_request(t.transfer_request_id));
                Ok(transfer.zip(request))
            })
            .await?;
        let (transfer, request) = found.ok_or(VerifyError::TransferNotFound(transfer_ref))?;

        if !request.wallet_address.eq_ignore_ascii_case(&message.to) {
            return Err(VerifyError::ReceiverMismatch {
                found: message.to.clone(),
                expected: request.wallet_address.clone(),
            });
        }

        let sealed_amount = self.sealer.seal(message.value_fil()?)?;
        let record_id = record.id;
        let transfer_id = transfer.id;
        let tx_hash = record.message_cid.clone();
        let role = self.cfg.system_user_role_id;

        self.store
            .transaction(move |tx| settle(tx, record_id, transfer_id, &tx_hash, sealed_amount, role, now))
            .await?;

        info!(message_cid = %record.message_cid, transfer_id, "FIL payout verified");
        Ok(())
    }
}

fn settle<T: StoreTx + ?Sized>(
    tx: &mut T,
    record_id: u64,
    transfer_id: u64,
    tx_hash: &str,
    sealed_amount: String,
    user_role_id: u64,
    now: DateTime<Utc>,
) -> StoreResult<()> {
    if !tx.mark_message_processed(record_id) {
        return Err(TransferError::MessageAlreadyProcessed(record_id).into());
    }
    mark_paid(
        tx,
        transfer_id,
        Payment { tx_hash, sealed_amount, user_role_id, at: now },
    )
}

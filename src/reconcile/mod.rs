/// Reconciliation Jobs
///
/// One routine drives every pending-transaction table. Per run it:
/// - picks up to `batch_size` PENDING rows from the last `recency` window
/// - fetches each receipt (no receipt → leave the row alone)
/// - reverted receipt → FAILED
/// - successful receipt → decode the expected event, then in one transaction
///   check it against the row and either mark FAILED or mark SUCCESS and
///   apply the ledger mutation
///
/// The per-table differences live in a [`ReconcileKind`] strategy.

pub mod kinds;

pub use kinds::{ContractDeployKind, DepositKind, RedemptionKind, RefundKind};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::chain::{EvmClient, ReceiptExt, TransactionReceipt, H256};
use crate::config::JobConfig;
use crate::error::{JobResult, StoreResult};
use crate::models::{PendingTransaction, Settlement, TransactionKind};
use crate::store::{Store, StoreTx};

pub const RECEIPT_FAILED_REASON: &str = "Transaction failed with the following receipt status: 0";

// ============================================================================
// KIND STRATEGY
// ============================================================================

pub trait ReconcileKind: Send + Sync {
    /// What the receipt proved, carried from `extract` into `apply`.
    type Evidence: Send + Sync;

    /// Pending table this kind works on.
    fn kind(&self) -> TransactionKind;

    /// Pull the expected event out of a successful receipt. `None` leaves the
    /// row PENDING.
    fn extract(&self, receipt: &TransactionReceipt) -> Option<Self::Evidence>;

    /// Check the evidence against what the user submitted and what the store
    /// knows. `Err` carries the fail reason stored on the row.
    fn verify<T: StoreTx + ?Sized>(
        &self,
        tx: &T,
        row: &PendingTransaction,
        evidence: &Self::Evidence,
    ) -> Result<(), String>;

    /// Kind-specific writes, run in the same transaction as the SUCCESS CAS.
    fn apply<T: StoreTx + ?Sized>(
        &self,
        tx: &mut T,
        row: &PendingTransaction,
        evidence: &Self::Evidence,
        now: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Fail reason for a reverted receipt.
    fn receipt_failed_reason(&self) -> String {
        RECEIPT_FAILED_REASON.to_string()
    }
}

// ============================================================================
// REPORT
// ============================================================================

/// Result of one job run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobReport {
    /// Rows picked up
    pub found: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Receipt present but nothing applied (no event, precondition failure, lost CAS)
    pub skipped: usize,
    /// No receipt yet, or the receipt could not be fetched
    pub still_pending: usize,
}

impl JobReport {
    pub fn processed(&self) -> usize {
        self.succeeded + self.failed
    }
}

/// What happened to a single row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Succeeded,
    Failed,
    Skipped,
    StillPending,
}

/// Result of the settling transaction for a successful receipt.
#[derive(Debug)]
enum Verdict {
    Applied,
    Rejected(String),
    /// Another run settled the row first
    Lost,
}

// ============================================================================
// JOB
// ============================================================================

pub struct ReconciliationJob<K, C, S> {
    kind: K,
    client: C,
    store: S,
    cfg: JobConfig,
}

impl<K, C, S> ReconciliationJob<K, C, S>
where
    K: ReconcileKind,
    C: EvmClient,
    S: Store,
{
    pub fn new(kind: K, client: C, store: S, cfg: JobConfig) -> Self {
        Self { kind, client, store, cfg }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn run(&self) -> JobResult<JobReport> {
        self.run_at(Utc::now()).await
    }

    pub async fn run_at(&self, now: DateTime<Utc>) -> JobResult<JobReport> {
        let kind = self.kind.kind();
        let since = now - self.cfg.recency;
        let batch = self.cfg.batch_size;
        let rows = self
            .store
            .transaction(move |tx| Ok(tx.pending_since(kind, since, batch)))
            .await?;

        let mut report = JobReport { found: rows.len(), ..Default::default() };
        if rows.is_empty() {
            debug!(%kind, "no pending transactions");
            return Ok(report);
        }

        let head = self.client.block_number().await?;
        for row in &rows {
            match self.reconcile(row, head, now).await {
                Outcome::Succeeded => report.succeeded += 1,
                Outcome::Failed => report.failed += 1,
                Outcome::Skipped => report.skipped += 1,
                Outcome::StillPending => report.still_pending += 1,
            }
        }

        info!(
            %kind,
            found = report.found,
            succeeded = report.succeeded,
            failed = report.failed,
            skipped = report.skipped,
            still_pending = report.still_pending,
            "reconciliation run finished"
        );
        Ok(report)
    }

    async fn reconcile(&self, row: &PendingTransaction, head: u64, now: DateTime<Utc>) -> Outcome {
        let kind = self.kind.kind();
        let hash = row.transaction_hash.as_str();
        let Ok(tx_hash) = hash.parse::<H256>() else {
            warn!(%kind, tx_hash = %hash, "stored transaction hash is not a 32-byte hash");
            return Outcome::Skipped;
        };

        let receipt = match self.client.transaction_receipt(tx_hash).await {
            Ok(Some(receipt)) => receipt,
            Ok(None) => {
                debug!(%kind, tx_hash = %hash, "receipt not available yet");
                return Outcome::StillPending;
            }
            Err(e) => {
                warn!(%kind, tx_hash = %hash, error = %e, "receipt lookup failed");
                return Outcome::StillPending;
            }
        };

        let (Some(block_number), Some(confirmations)) = (receipt.block(), receipt.confirmations(head)) else {
            debug!(%kind, tx_hash = %hash, "receipt not mined yet");
            return Outcome::StillPending;
        };

        if !receipt.succeeded() {
            let settlement = Settlement::Failed {
                reason: self.kind.receipt_failed_reason(),
                confirmations: Some(confirmations),
                block_number: Some(block_number),
            };
            return self.settle_failed(row, settlement).await;
        }

        let Some(evidence) = self.kind.extract(&receipt) else {
            debug!(%kind, tx_hash = %hash, "no matching event in receipt");
            return Outcome::Skipped;
        };

        let strategy = &self.kind;
        let evidence = &evidence;
        let result = self
            .store
            .transaction(move |tx| {
                if let Err(reason) = strategy.verify(&*tx, row, evidence) {
                    let rejected = Settlement::Failed {
                        reason: reason.clone(),
                        confirmations: Some(confirmations),
                        block_number: Some(block_number),
                    };
                    if !tx.settle_pending(kind, row.id, &rejected)? {
                        return Ok(Verdict::Lost);
                    }
                    return Ok(Verdict::Rejected(reason));
                }

                let success = Settlement::Success { confirmations, block_number };
                if !tx.settle_pending(kind, row.id, &success)? {
                    return Ok(Verdict::Lost);
                }
                strategy.apply(tx, row, evidence, now)?;
                Ok(Verdict::Applied)
            })
            .await;

        match result {
            Ok(Verdict::Applied) => {
                info!(%kind, tx_hash = %hash, confirmations, block_number, "transaction reconciled");
                Outcome::Succeeded
            }
            Ok(Verdict::Rejected(reason)) => {
                warn!(%kind, tx_hash = %hash, %reason, "receipt does not match submission");
                Outcome::Failed
            }
            Ok(Verdict::Lost) => {
                debug!(%kind, tx_hash = %hash, "already settled by another run");
                Outcome::Skipped
            }
            Err(e) => {
                warn!(%kind, tx_hash = %hash, error = %e, "could not apply transaction");
                Outcome::Skipped
            }
        }
    }

    async fn settle_failed(&self, row: &PendingTransaction, settlement: Settlement) -> Outcome {
        let kind = self.kind.kind();
        let id = row.id;
        match self
            .store
            .transaction(move |tx| tx.settle_pending(kind, id, &settlement))
            .await
        {
            Ok(true) => {
                info!(%kind, tx_hash = %row.transaction_hash, "transaction marked failed");
                Outcome::Failed
            }
            Ok(false) => Outcome::Skipped,
            Err(e) => {
                warn!(%kind, tx_hash = %row.transaction_hash, error = %e, "could not mark transaction failed");
                Outcome::Skipped
            }
        }
    }
}

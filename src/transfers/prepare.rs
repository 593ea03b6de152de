// ============================================================================
// Batch Preparation - Transfers
// ============================================================================
//
// Turns approved transfer requests into one payout batch: a PENDING transfer
// per request, all sharing a fresh UUID reference that the payout contract
// echoes back as the `Forward` id.
//
// ============================================================================

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::info;
use uuid::Uuid;

use super::AmountSealer;
use crate::error::{StoreResult, TransferError};
use crate::models::{Transfer, TransferRequestId, TransferStatus};
use crate::store::StoreTx;

#[derive(Debug, Clone, Deserialize)]
pub struct PrepareTransfers {
    /// Request id → amount to pay; each id at most once
    pub requests: Vec<(TransferRequestId, Decimal)>,
    pub from: String,
    pub to: String,
    /// Role of the controller preparing the batch
    pub controller_id: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PreparedBatch {
    pub transfer_ref: String,
    pub transfers: Vec<Transfer>,
}

/// Create the batch. Any rejected request aborts the whole batch.
pub fn prepare_transfers<T: StoreTx + ?Sized, A: AmountSealer + ?Sized>(
    tx: &mut T,
    batch: &PrepareTransfers,
    sealer: &A,
    now: DateTime<Utc>,
) -> StoreResult<PreparedBatch> {
    if batch.requests.is_empty() {
        return Err(TransferError::EmptyBatch.into());
    }

    let mut seen = BTreeSet::new();
    let duplicates: BTreeSet<TransferRequestId> = batch
        .requests
        .iter()
        .map(|(id, _)| *id)
        .filter(|id| !seen.insert(*id))
        .collect();
    if !duplicates.is_empty() {
        return Err(TransferError::DuplicateRequests(duplicates.into_iter().collect()).into());
    }

    let unknown: Vec<TransferRequestId> = batch
        .requests
        .iter()
        .map(|(id, _)| *id)
        .filter(|id| tx.transfer_request(*id).is_none())
        .collect();
    if !unknown.is_empty() {
        return Err(TransferError::UnknownRequests(unknown).into());
    }

    let existing: Vec<(TransferRequestId, Vec<Transfer>)> = batch
        .requests
        .iter()
        .map(|(id, _)| (*id, tx.transfers_for_request(*id)))
        .collect();

    let paid: Vec<TransferRequestId> = existing
        .iter()
        .filter(|(_, transfers)| transfers.iter().any(|t| t.status == TransferStatus::Success))
        .map(|(id, _)| *id)
        .collect();
    if !paid.is_empty() {
        return Err(TransferError::AlreadyPaid(paid).into());
    }

    // failed batches leave inactive transfers behind; those free the request
    let busy: Vec<TransferRequestId> = existing
        .iter()
        .filter(|(_, transfers)| transfers.iter().any(|t| t.is_active))
        .map(|(id, _)| *id)
        .collect();
    if !busy.is_empty() {
        return Err(TransferError::AlreadyHasTransfers(busy).into());
    }

    let transfer_ref = Uuid::new_v4().to_string();
    let mut transfers = Vec::with_capacity(batch.requests.len());
    for (request_id, amount) in &batch.requests {
        transfers.push(tx.insert_transfer(Transfer {
            id: 0,
            transfer_request_id: *request_id,
            transfer_ref: transfer_ref.clone(),
            controller_id: batch.controller_id,
            from: batch.from.to_lowercase(),
            to: batch.to.to_lowercase(),
            tx_hash: None,
            amount: Some(sealer.seal(*amount)?),
            status: TransferStatus::Pending,
            is_active: true,
            created_at: now,
            updated_at: now,
        }));
    }

    info!(%transfer_ref, transfers = transfers.len(), "transfer batch prepared");
    Ok(PreparedBatch { transfer_ref, transfers })
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::super::PlainAmountCodec;
    use super::*;
    use crate::error::StoreError;
    use crate::store::memory::MemoryTables;
    use crate::store::{MemoryStore, Store};
    use rust_decimal_macros::dec;

    fn batch(requests: Vec<(TransferRequestId, Decimal)>) -> PrepareTransfers {
        PrepareTransfers {
            requests,
            from: "0xCONTROLLER".into(),
            to: "0xFORWARDER".into(),
            controller_id: 3,
        }
    }

    #[test]
    fn test_prepare_creates_one_transfer_per_request() {
        let mut tx = MemoryTables::default();
        let a = approved_request(&mut tx, "f1a", "1");
        let b = approved_request(&mut tx, "f1b", "2");

        let prepared = prepare_transfers(
            &mut tx,
            &batch(vec![(a.id, dec!(1)), (b.id, dec!(2))]),
            &PlainAmountCodec,
            Utc::now(),
        )
        .unwrap();

        assert_eq!(prepared.transfers.len(), 2);
        assert!(Uuid::parse_str(&prepared.transfer_ref).is_ok());
        for t in &prepared.transfers {
            assert_eq!(t.transfer_ref, prepared.transfer_ref);
            assert_eq!(t.from, "0xcontroller");
            assert_eq!(t.to, "0xforwarder");
            assert_eq!(t.status, TransferStatus::Pending);
        }
        assert_eq!(prepared.transfers[1].amount.as_deref(), Some("2"));
    }

    #[test]
    fn test_prepare_rejects_unknown_and_busy_requests() {
        let mut tx = MemoryTables::default();
        let a = approved_request(&mut tx, "f1a", "1");
        pending_transfer(&mut tx, a.id, "old", "0xc", None);

        assert!(matches!(
            prepare_transfers(&mut tx, &batch(vec![(999, dec!(1))]), &PlainAmountCodec, Utc::now()),
            Err(StoreError::Transfer(TransferError::UnknownRequests(ids))) if ids == vec![999]
        ));
        assert!(matches!(
            prepare_transfers(&mut tx, &batch(vec![(a.id, dec!(1))]), &PlainAmountCodec, Utc::now()),
            Err(StoreError::Transfer(TransferError::AlreadyHasTransfers(_)))
        ));
        assert!(matches!(
            prepare_transfers(&mut tx, &batch(vec![]), &PlainAmountCodec, Utc::now()),
            Err(StoreError::Transfer(TransferError::EmptyBatch))
        ));
    }

    #[test]
    fn test_failed_transfers_free_the_request() {
        let mut tx = MemoryTables::default();
        let a = approved_request(&mut tx, "f1a", "1");
        let mut old = pending_transfer(&mut tx, a.id, "old", "0xc", Some("0xdead"));
        old.status = TransferStatus::Failed;
        old.is_active = false;
        tx.update_transfer(&old).unwrap();

        let prepared = prepare_transfers(&mut tx, &batch(vec![(a.id, dec!(1))]), &PlainAmountCodec, Utc::now()).unwrap();

        assert_eq!(prepared.transfers.len(), 1);
        assert_eq!(tx.transfers_for_request(a.id).len(), 2);
    }

    #[test]
    fn test_prepare_rejects_repeated_request_ids() {
        let mut tx = MemoryTables::default();
        let a = approved_request(&mut tx, "f1a", "1");
        let b = approved_request(&mut tx, "f1b", "1");

        let result = prepare_transfers(
            &mut tx,
            &batch(vec![(a.id, dec!(1)), (b.id, dec!(1)), (a.id, dec!(1))]),
            &PlainAmountCodec,
            Utc::now(),
        );

        assert!(matches!(
            result,
            Err(StoreError::Transfer(TransferError::DuplicateRequests(ids))) if ids == vec![a.id]
        ));
        assert!(tx.transfers_for_request(a.id).is_empty());
        assert!(tx.transfers_for_request(b.id).is_empty());
    }

    #[test]
    fn test_prepare_rejects_paid_requests() {
        let mut tx = MemoryTables::default();
        let a = approved_request(&mut tx, "f1a", "1");
        let mut t = pending_transfer(&mut tx, a.id, "old", "0xc", Some("0x1"));
        t.status = TransferStatus::Success;
        tx.update_transfer(&t).unwrap();

        assert!(matches!(
            prepare_transfers(&mut tx, &batch(vec![(a.id, dec!(1))]), &PlainAmountCodec, Utc::now()),
            Err(StoreError::Transfer(TransferError::AlreadyPaid(_)))
        ));
    }

    #[tokio::test]
    async fn test_rejected_batch_writes_nothing() {
        let store = MemoryStore::new();
        let a = store
            .transaction(|tx| Ok(approved_request(tx, "f1a", "1").id))
            .await
            .unwrap();

        let result = store
            .transaction(move |tx| {
                prepare_transfers(tx, &batch(vec![(a, dec!(1)), (404, dec!(1))]), &PlainAmountCodec, Utc::now())
            })
            .await;

        assert!(result.is_err());
        let transfers = store.transaction(move |tx| Ok(tx.transfers_for_request(a))).await.unwrap();
        assert!(transfers.is_empty());
    }
}

/// Integration tests for the reconciliation jobs
///
/// Every test drives a job end to end against `MockEvmClient` and an
/// in-memory store: submission → receipt → ledger state.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio_test::{assert_err, assert_ok};

use credit_reconciler::chain::events::fixtures;
use credit_reconciler::chain::{format_address, format_hash, Address, Log, MockEvmClient, H256};
use credit_reconciler::instruments::{split, SplitRequest};
use credit_reconciler::ledger::ledger_totals;
use credit_reconciler::reconcile::{
    ContractDeployKind, DepositKind, ReconcileKind, ReconciliationJob, RedemptionKind, RefundKind,
    RECEIPT_FAILED_REASON,
};
use credit_reconciler::submissions::{record_submission, Submission};
use credit_reconciler::{
    InstrumentKind, InstrumentStatus, JobConfig, MemoryStore, SplitError, Store, StoreError, StoreTx,
    TransactionKind, TransactionStatus, UserCredit, WindowConfig,
};

// ============================================================================
// FIXTURES
// ============================================================================

fn payer() -> Address {
    Address::from_low_u64_be(0x1111)
}

fn credit_contract() -> Address {
    Address::from_low_u64_be(0x2222)
}

fn token() -> Address {
    Address::from_low_u64_be(0x3333)
}

fn h(n: u64) -> H256 {
    H256::from_low_u64_be(n)
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()
}

fn deposits() -> DepositKind {
    DepositKind::new(credit_contract(), WindowConfig::default())
}

fn job<K: ReconcileKind>(
    kind: K,
    client: &Arc<MockEvmClient>,
    store: &Arc<MemoryStore>,
) -> ReconciliationJob<K, Arc<MockEvmClient>, Arc<MemoryStore>> {
    ReconciliationJob::new(kind, client.clone(), store.clone(), JobConfig::default())
}

async fn submit(store: &MemoryStore, submission: Submission, at: DateTime<Utc>) -> u64 {
    store
        .transaction(move |tx| record_submission(tx, &submission, at))
        .await
        .unwrap()
        .unwrap()
        .id
}

fn deposit(hash: H256, amount: Decimal) -> Submission {
    Submission::Deposit {
        transaction_hash: format_hash(&hash),
        payer: format_address(&payer()),
        contract: format_address(&credit_contract()),
        amount,
        additional_ticket_days: None,
    }
}

fn deposit_log(amount: u128, hash: H256) -> Log {
    fixtures::deposit_made(credit_contract(), payer(), token(), amount, 0, hash)
}

/// Mined, successful receipt carrying `logs`.
fn mined(client: &MockEvmClient, hash: H256, block: u64, logs: Vec<Log>) {
    client.add_receipt(fixtures::receipt(hash, true, block, logs));
}

async fn credit(store: &MemoryStore) -> UserCredit {
    store
        .transaction(|tx| {
            Ok(tx
                .user_credit_by_owner(&format_address(&payer()), &format_address(&credit_contract()))
                .unwrap())
        })
        .await
        .unwrap()
}

async fn status(store: &MemoryStore, kind: TransactionKind, id: u64) -> TransactionStatus {
    store
        .transaction(move |tx| Ok(tx.pending_transaction(kind, id).unwrap().status))
        .await
        .unwrap()
}

/// Deposit 1000 at t0 through the deposit job and split it into 4 tokens.
async fn funded_and_split(client: &Arc<MockEvmClient>, store: &Arc<MemoryStore>) -> (u64, Vec<u64>) {
    submit(store, deposit(h(0xd1), dec!(1000)), t0()).await;
    mined(client, h(0xd1), 10, vec![deposit_log(1000, h(0xd1))]);
    assert_ok!(job(deposits(), client, store).run_at(t0()).await);

    let credit_id = credit(store).await.id;
    store
        .transaction(move |tx| {
            let req = SplitRequest {
                user_credit_id: credit_id,
                kind: InstrumentKind::Token,
                split_number: 4,
                credit_per_instrument: dec!(250),
            };
            let result = split(tx, &req, t0())?;
            Ok((credit_id, result.instruments.iter().map(|i| i.id).collect::<Vec<_>>()))
        })
        .await
        .unwrap()
}

// ============================================================================
// DEPOSITS
// ============================================================================

#[tokio::test]
async fn test_deposit_then_extension_scenario() {
    let client = Arc::new(MockEvmClient::new(100));
    let store = Arc::new(MemoryStore::new());
    let deposits = job(deposits(), &client, &store);

    submit(&store, deposit(h(0xa1), dec!(100)), t0()).await;
    mined(&client, h(0xa1), 50, vec![deposit_log(100, h(0xa1))]);
    let first = deposits.run_at(t0()).await.unwrap();
    assert_eq!(first.succeeded, 1);

    let later = t0() + Duration::days(10);
    submit(&store, deposit(h(0xa2), dec!(50)), later).await;
    mined(&client, h(0xa2), 60, vec![deposit_log(50, h(0xa2))]);
    let second = deposits.run_at(later).await.unwrap();
    assert_eq!(second.succeeded, 1);

    let credit = credit(&store).await;
    assert_eq!(credit.total_height, dec!(150));
    assert_eq!(credit.amount, dec!(150));
    assert_eq!(credit.withdraw_expires_at, Some(t0() + Duration::days(90)));
    assert!(credit.is_balanced());
}

#[tokio::test]
async fn test_deposit_at_refund_start_opens_new_window() {
    let client = Arc::new(MockEvmClient::new(100));
    let store = Arc::new(MemoryStore::new());
    let deposits = job(deposits(), &client, &store);

    submit(&store, deposit(h(0xa1), dec!(100)), t0()).await;
    mined(&client, h(0xa1), 50, vec![deposit_log(100, h(0xa1))]);
    assert_ok!(deposits.run_at(t0()).await);
    let refund_at = credit(&store).await.refund_starts_at.unwrap();
    assert_eq!(refund_at, t0() + Duration::days(47));

    submit(&store, deposit(h(0xa2), dec!(50)), refund_at).await;
    mined(&client, h(0xa2), 60, vec![deposit_log(50, h(0xa2))]);
    assert_eq!(deposits.run_at(refund_at).await.unwrap().succeeded, 1);

    let credit = credit(&store).await;
    assert_eq!(credit.withdraw_expires_at, Some(refund_at + Duration::days(45)));
    assert_eq!(credit.refund_starts_at, Some(refund_at + Duration::days(47)));
    assert_eq!(credit.total_height, dec!(150));
}

#[tokio::test]
async fn test_deposit_just_before_refund_start_extends_window() {
    let client = Arc::new(MockEvmClient::new(100));
    let store = Arc::new(MemoryStore::new());
    let deposits = job(deposits(), &client, &store);

    submit(&store, deposit(h(0xa1), dec!(100)), t0()).await;
    mined(&client, h(0xa1), 50, vec![deposit_log(100, h(0xa1))]);
    assert_ok!(deposits.run_at(t0()).await);

    let just_before = t0() + Duration::days(47) - Duration::seconds(1);
    submit(&store, deposit(h(0xa2), dec!(50)), just_before).await;
    mined(&client, h(0xa2), 60, vec![deposit_log(50, h(0xa2))]);
    assert_ok!(deposits.run_at(just_before).await);

    let credit = credit(&store).await;
    assert_eq!(credit.withdraw_expires_at, Some(t0() + Duration::days(90)));
    assert_eq!(credit.refund_starts_at, Some(t0() + Duration::days(91)));
}

#[tokio::test]
async fn test_deposit_records_confirmations() {
    let client = Arc::new(MockEvmClient::new(109));
    let store = Arc::new(MemoryStore::new());
    let id = submit(&store, deposit(h(0xa1), dec!(100)), t0()).await;
    mined(&client, h(0xa1), 100, vec![deposit_log(100, h(0xa1))]);

    assert_ok!(job(deposits(), &client, &store).run_at(t0()).await);

    let row = store
        .transaction(move |tx| Ok(tx.pending_transaction(TransactionKind::Deposit, id).unwrap()))
        .await
        .unwrap();
    assert_eq!(row.status, TransactionStatus::Success);
    assert_eq!(row.confirmations, Some(10));
    assert_eq!(row.block_number, Some(100));
}

#[tokio::test]
async fn test_amount_mismatch_fails_without_ledger_entry() {
    let client = Arc::new(MockEvmClient::new(100));
    let store = Arc::new(MemoryStore::new());
    let id = submit(&store, deposit(h(0xa1), dec!(100)), t0()).await;
    mined(&client, h(0xa1), 50, vec![deposit_log(99, h(0xa1))]);

    let report = job(deposits(), &client, &store).run_at(t0()).await.unwrap();

    assert_eq!(report.failed, 1);
    let row = store
        .transaction(move |tx| Ok(tx.pending_transaction(TransactionKind::Deposit, id).unwrap()))
        .await
        .unwrap();
    assert_eq!(row.fail_reason.as_deref(), Some("Token amount mismatch: expected 100, got 99"));
    assert_eq!(credit(&store).await.total_height, Decimal::ZERO);
}

#[tokio::test]
async fn test_deposit_log_from_other_contract_credits_nothing() {
    let client = Arc::new(MockEvmClient::new(100));
    let store = Arc::new(MemoryStore::new());
    let id = submit(&store, deposit(h(0xa1), dec!(100)), t0()).await;
    let forged = fixtures::deposit_made(Address::from_low_u64_be(0xdeadbeef), payer(), token(), 100, 0, h(0xa1));
    mined(&client, h(0xa1), 50, vec![forged]);

    let report = job(deposits(), &client, &store).run_at(t0()).await.unwrap();

    assert_eq!(report.skipped, 1);
    assert_eq!(status(&store, TransactionKind::Deposit, id).await, TransactionStatus::Pending);
    assert_eq!(credit(&store).await.total_height, Decimal::ZERO);
}

#[tokio::test]
async fn test_deposit_by_other_account_fails() {
    let client = Arc::new(MockEvmClient::new(100));
    let store = Arc::new(MemoryStore::new());
    let id = submit(&store, deposit(h(0xa1), dec!(100)), t0()).await;
    let stranger = Address::from_low_u64_be(0x4444);
    let log = fixtures::deposit_made(credit_contract(), stranger, token(), 100, 0, h(0xa1));
    mined(&client, h(0xa1), 50, vec![log]);

    let report = job(deposits(), &client, &store).run_at(t0()).await.unwrap();

    assert_eq!(report.failed, 1);
    let row = store
        .transaction(move |tx| Ok(tx.pending_transaction(TransactionKind::Deposit, id).unwrap()))
        .await
        .unwrap();
    assert!(row.fail_reason.unwrap().starts_with("Payer mismatch"));
    assert_eq!(credit(&store).await.total_height, Decimal::ZERO);
}

#[tokio::test]
async fn test_missing_receipt_stays_pending_and_old_rows_are_ignored() {
    let client = Arc::new(MockEvmClient::new(100));
    let store = Arc::new(MemoryStore::new());
    let fresh = submit(&store, deposit(h(0xa1), dec!(1)), t0()).await;
    submit(&store, deposit(h(0x01d), dec!(1)), t0() - Duration::hours(25)).await;

    let report = job(deposits(), &client, &store).run_at(t0()).await.unwrap();

    assert_eq!(report.found, 1);
    assert_eq!(report.still_pending, 1);
    assert_eq!(status(&store, TransactionKind::Deposit, fresh).await, TransactionStatus::Pending);
}

#[tokio::test]
async fn test_rerun_is_idempotent() {
    let client = Arc::new(MockEvmClient::new(100));
    let store = Arc::new(MemoryStore::new());
    submit(&store, deposit(h(0xa1), dec!(100)), t0()).await;
    mined(&client, h(0xa1), 50, vec![deposit_log(100, h(0xa1))]);
    let deposits = job(deposits(), &client, &store);

    deposits.run_at(t0()).await.unwrap();
    let second = deposits.run_at(t0()).await.unwrap();

    assert_eq!(second.found, 0);
    let credit = credit(&store).await;
    let credit_id = credit.id;
    let entries = store
        .transaction(move |tx| Ok(tx.ledger_entries(credit_id).len()))
        .await
        .unwrap();
    assert_eq!(credit.total_height, dec!(100));
    assert_eq!(entries, 1);
}

#[tokio::test]
async fn test_racing_jobs_credit_once() {
    let client = Arc::new(MockEvmClient::new(100));
    let store = Arc::new(MemoryStore::new());
    let id = submit(&store, deposit(h(0xa1), dec!(100)), t0()).await;
    mined(&client, h(0xa1), 50, vec![deposit_log(100, h(0xa1))]);
    let first = job(deposits(), &client, &store);
    let second = job(deposits(), &client, &store);

    let (a, b) = tokio::join!(first.run_at(t0()), second.run_at(t0()));
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.succeeded + b.succeeded, 1);
    assert_eq!(a.failed + b.failed, 0);
    assert_eq!(status(&store, TransactionKind::Deposit, id).await, TransactionStatus::Success);
    let credit = credit(&store).await;
    let credit_id = credit.id;
    let entries = store
        .transaction(move |tx| Ok(tx.ledger_entries(credit_id).len()))
        .await
        .unwrap();
    assert_eq!(credit.total_height, dec!(100));
    assert_eq!(entries, 1);
}

// ============================================================================
// SPLITS
// ============================================================================

#[tokio::test]
async fn test_split_past_decimal_range_is_rejected() {
    let client = Arc::new(MockEvmClient::new(100));
    let store = Arc::new(MemoryStore::new());
    submit(&store, deposit(h(0xa1), dec!(1000000000000000000000)), t0()).await;
    mined(&client, h(0xa1), 50, vec![deposit_log(1_000_000_000_000_000_000_000, h(0xa1))]);
    assert_eq!(job(deposits(), &client, &store).run_at(t0()).await.unwrap().succeeded, 1);

    let credit_id = credit(&store).await.id;
    let result = store
        .transaction(move |tx| {
            let req = SplitRequest {
                user_credit_id: credit_id,
                kind: InstrumentKind::Token,
                split_number: 100_000_000,
                credit_per_instrument: dec!(1000000000000000000000),
            };
            split(tx, &req, t0())
        })
        .await;

    assert!(matches!(
        result,
        Err(StoreError::Split(SplitError::ExceedsAvailable { total, .. })) if total == Decimal::MAX
    ));
    let groups = store
        .transaction(move |tx| Ok(tx.groups_for_credit(credit_id).len()))
        .await
        .unwrap();
    assert_eq!(groups, 0);
}

// ============================================================================
// WITHDRAWALS & TICKETS
// ============================================================================

#[tokio::test]
async fn test_failed_withdrawal_receipt() {
    let client = Arc::new(MockEvmClient::new(100));
    let store = Arc::new(MemoryStore::new());
    let (credit_id, tokens) = funded_and_split(&client, &store).await;

    let id = submit(
        &store,
        Submission::Withdrawal { transaction_hash: format_hash(&h(0xb1)), instrument_id: tokens[2] },
        t0(),
    )
    .await;
    client.add_receipt(fixtures::receipt(h(0xb1), false, 70, vec![]));

    let report = job(RedemptionKind::withdrawals(credit_contract()), &client, &store)
        .run_at(t0())
        .await
        .unwrap();

    assert_eq!(report.failed, 1);
    let (row, credit, entries, token) = store
        .transaction(move |tx| {
            Ok((
                tx.pending_transaction(TransactionKind::Withdrawal, id).unwrap(),
                tx.user_credit(credit_id).unwrap(),
                tx.ledger_entries(credit_id),
                tx.instrument(tokens[2]).unwrap(),
            ))
        })
        .await
        .unwrap();
    assert_eq!(row.status, TransactionStatus::Failed);
    assert_eq!(row.fail_reason.as_deref(), Some(RECEIPT_FAILED_REASON));
    assert_eq!(credit.amount, dec!(1000));
    assert_eq!(credit.total_withdrawals, Decimal::ZERO);
    assert_eq!(entries.len(), 1);
    assert_eq!(token.status, InstrumentStatus::Valid);
}

#[tokio::test]
async fn test_withdrawal_redeems_staircase() {
    let client = Arc::new(MockEvmClient::new(100));
    let store = Arc::new(MemoryStore::new());
    let (credit_id, tokens) = funded_and_split(&client, &store).await;

    submit(
        &store,
        Submission::Withdrawal { transaction_hash: format_hash(&h(0xb1)), instrument_id: tokens[2] },
        t0(),
    )
    .await;
    mined(&client, h(0xb1), 70, vec![fixtures::withdrawal_made(credit_contract(), payer(), payer(), 750, h(0xb1))]);

    let report = job(RedemptionKind::withdrawals(credit_contract()), &client, &store)
        .run_at(t0())
        .await
        .unwrap();
    assert_eq!(report.succeeded, 1);

    let (statuses, credit) = store
        .transaction(move |tx| {
            let statuses: Vec<InstrumentStatus> =
                tokens.iter().map(|id| tx.instrument(*id).unwrap().status).collect();
            Ok((statuses, tx.user_credit(credit_id).unwrap()))
        })
        .await
        .unwrap();
    assert_eq!(
        statuses,
        vec![
            InstrumentStatus::Invalid,
            InstrumentStatus::Invalid,
            InstrumentStatus::Redeemed,
            InstrumentStatus::Valid
        ]
    );
    assert_eq!(credit.total_withdrawals, dec!(750));
    assert_eq!(credit.amount, dec!(250));
}

#[tokio::test]
async fn test_redeeming_non_valid_instrument_stays_pending() {
    let client = Arc::new(MockEvmClient::new(100));
    let store = Arc::new(MemoryStore::new());
    let (_, tokens) = funded_and_split(&client, &store).await;
    let tickets = job(RedemptionKind::tickets(credit_contract()), &client, &store);
    let ticket = |amount: u128, hash: H256| fixtures::ticket_submitted(credit_contract(), payer(), payer(), amount, hash);

    let low = submit(
        &store,
        Submission::TicketSubmission { transaction_hash: format_hash(&h(0xc0)), instrument_id: tokens[0] },
        t0(),
    )
    .await;
    submit(
        &store,
        Submission::TicketSubmission { transaction_hash: format_hash(&h(0xc1)), instrument_id: tokens[1] },
        t0(),
    )
    .await;
    mined(&client, h(0xc1), 70, vec![ticket(500, h(0xc1))]);
    mined(&client, h(0xc0), 71, vec![ticket(250, h(0xc0))]);

    // rows are processed oldest first: 0xc0 redeems first, then 0xc1 claims the rest
    let report = tickets.run_at(t0()).await.unwrap();
    assert_eq!(report.succeeded, 2);

    // a ticket for an already redeemed step is skipped
    let again = submit(
        &store,
        Submission::TicketSubmission { transaction_hash: format_hash(&h(0xc2)), instrument_id: tokens[0] },
        t0(),
    )
    .await;
    mined(&client, h(0xc2), 72, vec![ticket(250, h(0xc2))]);
    let report = tickets.run_at(t0()).await.unwrap();

    assert_eq!(report.skipped, 1);
    assert_eq!(status(&store, TransactionKind::TicketSubmission, low).await, TransactionStatus::Success);
    assert_eq!(status(&store, TransactionKind::TicketSubmission, again).await, TransactionStatus::Pending);
}

// ============================================================================
// REFUNDS
// ============================================================================

#[tokio::test]
async fn test_refund_zeroes_credit_and_refunds_instruments() {
    let client = Arc::new(MockEvmClient::new(100));
    let store = Arc::new(MemoryStore::new());
    let (credit_id, tokens) = funded_and_split(&client, &store).await;

    submit(
        &store,
        Submission::Withdrawal { transaction_hash: format_hash(&h(0xb1)), instrument_id: tokens[0] },
        t0(),
    )
    .await;
    mined(&client, h(0xb1), 70, vec![fixtures::withdrawal_made(credit_contract(), payer(), payer(), 250, h(0xb1))]);
    assert_ok!(
        job(RedemptionKind::withdrawals(credit_contract()), &client, &store)
            .run_at(t0())
            .await
    );

    submit(
        &store,
        Submission::Refund { transaction_hash: format_hash(&h(0xe1)), user_credit_id: credit_id },
        t0(),
    )
    .await;
    // remaining height is recorded, not the decoded amount
    mined(&client, h(0xe1), 80, vec![fixtures::refund_made(credit_contract(), payer(), token(), 1, h(0xe1))]);
    let report = job(RefundKind::new(credit_contract()), &client, &store).run_at(t0()).await.unwrap();
    assert_eq!(report.succeeded, 1);

    let (credit, statuses, totals) = store
        .transaction(move |tx| {
            let statuses: Vec<InstrumentStatus> =
                tokens.iter().map(|id| tx.instrument(*id).unwrap().status).collect();
            Ok((tx.user_credit(credit_id).unwrap(), statuses, ledger_totals(tx, credit_id)))
        })
        .await
        .unwrap();
    assert_eq!(credit.amount, Decimal::ZERO);
    assert_eq!(credit.total_refunds, dec!(750));
    assert_eq!(credit.total_height, credit.total_withdrawals + credit.total_refunds);
    assert_eq!(statuses[0], InstrumentStatus::Redeemed);
    assert!(statuses[1..].iter().all(|s| *s == InstrumentStatus::Refunded));
    assert!(totals.matches(&credit));
}

#[tokio::test]
async fn test_refund_to_other_account_fails() {
    let client = Arc::new(MockEvmClient::new(100));
    let store = Arc::new(MemoryStore::new());
    let (credit_id, _) = funded_and_split(&client, &store).await;

    let id = submit(
        &store,
        Submission::Refund { transaction_hash: format_hash(&h(0xe1)), user_credit_id: credit_id },
        t0(),
    )
    .await;
    let stranger = Address::from_low_u64_be(0x4444);
    mined(&client, h(0xe1), 80, vec![fixtures::refund_made(credit_contract(), stranger, token(), 1, h(0xe1))]);

    let report = job(RefundKind::new(credit_contract()), &client, &store).run_at(t0()).await.unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(status(&store, TransactionKind::Refund, id).await, TransactionStatus::Failed);
    let credit = store
        .transaction(move |tx| Ok(tx.user_credit(credit_id).unwrap()))
        .await
        .unwrap();
    assert_eq!(credit.amount, dec!(1000));
    assert_eq!(credit.total_refunds, Decimal::ZERO);
}

// ============================================================================
// CONTRACT DEPLOYS
// ============================================================================

#[tokio::test]
async fn test_contract_deploy_creates_contract_row() {
    let client = Arc::new(MockEvmClient::new(100));
    let store = Arc::new(MemoryStore::new());
    let id = submit(
        &store,
        Submission::ContractDeploy {
            transaction_hash: format_hash(&h(0xf1)),
            wallet_address: "0xDEPLOYER".into(),
            user_id: Some(9),
        },
        t0(),
    )
    .await;
    let deployed = Address::from_low_u64_be(0xc0ffee);
    let mut receipt = fixtures::receipt(h(0xf1), true, 90, vec![]);
    receipt.contract_address = Some(deployed);
    client.add_receipt(receipt);

    let report = job(ContractDeployKind, &client, &store).run_at(t0()).await.unwrap();

    assert_eq!(report.succeeded, 1);
    let contract = store
        .transaction(move |tx| Ok(tx.contract_by_transaction(id)))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(contract.address, format_address(&deployed));
    assert_eq!(contract.deployed_from_address, "0xdeployer");
    assert_eq!(contract.user_id, Some(9));
}

#[tokio::test]
async fn test_failed_deploy_reason() {
    let client = Arc::new(MockEvmClient::new(100));
    let store = Arc::new(MemoryStore::new());
    let id = submit(
        &store,
        Submission::ContractDeploy {
            transaction_hash: format_hash(&h(0xf1)),
            wallet_address: "0xdeployer".into(),
            user_id: None,
        },
        t0(),
    )
    .await;
    client.add_receipt(fixtures::receipt(h(0xf1), false, 90, vec![]));

    assert_ok!(job(ContractDeployKind, &client, &store).run_at(t0()).await);

    let row = store
        .transaction(move |tx| Ok(tx.pending_transaction(TransactionKind::ContractDeploy, id).unwrap()))
        .await
        .unwrap();
    assert_eq!(row.fail_reason.as_deref(), Some("Contract deployment transaction failed"));
}

#[tokio::test]
async fn test_duplicate_submission_is_rejected_by_store() {
    let store = MemoryStore::new();
    submit(&store, deposit(h(0xa1), dec!(1)), t0()).await;

    let upper = format_hash(&h(0xa1)).to_uppercase().replacen("0X", "0x", 1);
    let raw = store
        .transaction(move |tx| {
            tx.insert_pending(credit_reconciler::PendingTransaction::new(TransactionKind::Deposit, &upper, t0()))
        })
        .await;
    assert_err!(raw);
}

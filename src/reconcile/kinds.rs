// ============================================================================
// Reconciliation kinds
// ============================================================================
//
//   table                         event             apply
//   credit_transaction            DepositMade       ledger::apply_deposit
//   withdraw_transaction          WithdrawalMade    instruments::redeem
//   submit_ticket_transaction     TicketSubmitted   instruments::redeem
//   refund_transaction            RefundMade        ledger::apply_refund + refund instruments
//   deploy_contract_transaction   contractAddress   insert deployed contract
//
// Credit events only count when the credit contract emitted them, and the
// event's account must be the payer of the credit the row points at.
//
// ============================================================================

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use super::ReconcileKind;
use crate::chain::{decode_log, format_address, format_hash, Address, ChainEvent, CreditMovement, TransactionReceipt};
use crate::config::WindowConfig;
use crate::error::{LedgerError, StoreResult};
use crate::instruments;
use crate::ledger;
use crate::models::{CreditId, DeployedContract, PendingTransaction, TransactionKind};
use crate::store::StoreTx;

/// First log emitted by `contract` that decodes to an event `pick` accepts.
fn find_event<E>(
    receipt: &TransactionReceipt,
    contract: Address,
    pick: impl Fn(ChainEvent) -> Option<E>,
) -> Option<E> {
    receipt.logs.iter().find_map(|log| {
        if log.address != contract {
            debug!(
                tx_hash = %format_hash(&receipt.transaction_hash),
                emitter = %format_address(&log.address),
                "ignoring log from another contract"
            );
            return None;
        }
        match decode_log(log) {
            Ok(Some(event)) => pick(event),
            Ok(None) => None,
            Err(e) => {
                debug!(tx_hash = %format_hash(&receipt.transaction_hash), error = %e, "undecodable log");
                None
            }
        }
    })
}

/// The event's account must own the credit. A missing credit is left for
/// `apply` to report.
fn check_payer<T: StoreTx + ?Sized>(tx: &T, credit_id: CreditId, movement: &CreditMovement) -> Result<(), String> {
    let Some(credit) = tx.user_credit(credit_id) else {
        return Ok(());
    };
    let account = format_address(&movement.account);
    if credit.payer != account {
        return Err(format!("Payer mismatch: expected {}, got {}", credit.payer, account));
    }
    Ok(())
}

// ============================================================================
// DEPOSIT
// ============================================================================

pub struct DepositKind {
    contract: Address,
    window: WindowConfig,
}

impl DepositKind {
    pub fn new(contract: Address, window: WindowConfig) -> Self {
        Self { contract, window }
    }
}

impl ReconcileKind for DepositKind {
    type Evidence = CreditMovement;

    fn kind(&self) -> TransactionKind {
        TransactionKind::Deposit
    }

    fn extract(&self, receipt: &TransactionReceipt) -> Option<CreditMovement> {
        find_event(receipt, self.contract, |event| match event {
            ChainEvent::Deposit { movement, .. } => Some(movement),
            _ => None,
        })
    }

    fn verify<T: StoreTx + ?Sized>(
        &self,
        tx: &T,
        row: &PendingTransaction,
        deposit: &CreditMovement,
    ) -> Result<(), String> {
        let Some(amount) = deposit.amount_decimal() else {
            return Err(format!("Token amount out of range: {}", deposit.amount));
        };
        if let Some(expected) = row.amount {
            if expected != amount {
                return Err(format!("Token amount mismatch: expected {}, got {}", expected, amount));
            }
        }
        match row.user_credit_id {
            Some(credit_id) => check_payer(tx, credit_id, deposit),
            None => Ok(()),
        }
    }

    fn apply<T: StoreTx + ?Sized>(
        &self,
        tx: &mut T,
        row: &PendingTransaction,
        deposit: &CreditMovement,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        let credit_id = row.user_credit_id.ok_or(LedgerError::MissingCreditReference)?;
        let amount = deposit
            .amount_decimal()
            .ok_or_else(|| LedgerError::AmountOutOfRange(deposit.amount.to_string()))?;
        let window_len = row
            .additional_ticket_days
            .map(Duration::days)
            .unwrap_or(self.window.withdraw_window);
        ledger::apply_deposit(tx, credit_id, amount, window_len, &self.window, now)?;
        Ok(())
    }
}

// ============================================================================
// WITHDRAWAL / TICKET SUBMISSION
// ============================================================================

/// Token withdrawals and ticket submissions both redeem an instrument.
pub struct RedemptionKind {
    kind: TransactionKind,
    contract: Address,
}

impl RedemptionKind {
    pub fn withdrawals(contract: Address) -> Self {
        Self { kind: TransactionKind::Withdrawal, contract }
    }

    pub fn tickets(contract: Address) -> Self {
        Self { kind: TransactionKind::TicketSubmission, contract }
    }
}

impl ReconcileKind for RedemptionKind {
    type Evidence = CreditMovement;

    fn kind(&self) -> TransactionKind {
        self.kind
    }

    fn extract(&self, receipt: &TransactionReceipt) -> Option<CreditMovement> {
        let tickets = self.kind == TransactionKind::TicketSubmission;
        find_event(receipt, self.contract, |event| match event {
            ChainEvent::Withdrawal(movement) if !tickets => Some(movement),
            ChainEvent::TicketSubmitted(movement) if tickets => Some(movement),
            _ => None,
        })
    }

    fn verify<T: StoreTx + ?Sized>(
        &self,
        tx: &T,
        row: &PendingTransaction,
        movement: &CreditMovement,
    ) -> Result<(), String> {
        let credit_id = row.user_credit_id.or_else(|| {
            row.instrument_id
                .and_then(|id| tx.instrument(id))
                .and_then(|instrument| instruments::credit_for_instrument(tx, &instrument).ok())
        });
        match credit_id {
            Some(credit_id) => check_payer(tx, credit_id, movement),
            None => Ok(()),
        }
    }

    fn apply<T: StoreTx + ?Sized>(
        &self,
        tx: &mut T,
        row: &PendingTransaction,
        movement: &CreditMovement,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        let instrument_id = row.instrument_id.ok_or(LedgerError::MissingInstrumentReference)?;
        let redemption = instruments::redeem(tx, instrument_id, now)?;
        if movement.amount_decimal() != Some(redemption.claimed) {
            debug!(
                tx_hash = %row.transaction_hash,
                claimed = %redemption.claimed,
                paid = %movement.amount,
                "claimed height differs from paid amount"
            );
        }
        Ok(())
    }
}

// ============================================================================
// REFUND
// ============================================================================

pub struct RefundKind {
    contract: Address,
}

impl RefundKind {
    pub fn new(contract: Address) -> Self {
        Self { contract }
    }
}

impl ReconcileKind for RefundKind {
    type Evidence = CreditMovement;

    fn kind(&self) -> TransactionKind {
        TransactionKind::Refund
    }

    fn extract(&self, receipt: &TransactionReceipt) -> Option<CreditMovement> {
        find_event(receipt, self.contract, |event| match event {
            ChainEvent::Refund(movement) => Some(movement),
            _ => None,
        })
    }

    fn verify<T: StoreTx + ?Sized>(
        &self,
        tx: &T,
        row: &PendingTransaction,
        movement: &CreditMovement,
    ) -> Result<(), String> {
        match row.user_credit_id {
            Some(credit_id) => check_payer(tx, credit_id, movement),
            None => Ok(()),
        }
    }

    fn apply<T: StoreTx + ?Sized>(
        &self,
        tx: &mut T,
        row: &PendingTransaction,
        movement: &CreditMovement,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        let credit_id = row.user_credit_id.ok_or(LedgerError::MissingCreditReference)?;
        let remaining = ledger::apply_refund(tx, credit_id, now)?;
        let refunded = instruments::refund_instruments(tx, credit_id)?;

        if movement.amount_decimal() != Some(remaining) {
            warn!(
                tx_hash = %row.transaction_hash,
                recorded = %remaining,
                decoded = %movement.amount,
                "refund amount differs from remaining height; recorded remaining"
            );
        }
        debug!(credit_id, %remaining, refunded, "credit refunded");
        Ok(())
    }
}

// ============================================================================
// CONTRACT DEPLOY
// ============================================================================

pub struct ContractDeployKind;

impl ReconcileKind for ContractDeployKind {
    /// Deployed contract address
    type Evidence = Address;

    fn kind(&self) -> TransactionKind {
        TransactionKind::ContractDeploy
    }

    fn extract(&self, receipt: &TransactionReceipt) -> Option<Address> {
        if receipt.contract_address.is_none() {
            warn!(tx_hash = %format_hash(&receipt.transaction_hash), "contract address not found in receipt");
        }
        receipt.contract_address
    }

    fn verify<T: StoreTx + ?Sized>(&self, _tx: &T, _row: &PendingTransaction, _address: &Address) -> Result<(), String> {
        Ok(())
    }

    fn apply<T: StoreTx + ?Sized>(
        &self,
        tx: &mut T,
        row: &PendingTransaction,
        address: &Address,
        _now: DateTime<Utc>,
    ) -> StoreResult<()> {
        let deployer = row.wallet_address.as_deref().ok_or(LedgerError::MissingDeployer)?;
        tx.insert_contract(DeployedContract {
            id: 0,
            address: format_address(address),
            user_id: row.user_id,
            deployed_from_address: deployer.to_lowercase(),
            transaction_id: row.id,
        });
        Ok(())
    }

    fn receipt_failed_reason(&self) -> String {
        "Contract deployment transaction failed".to_string()
    }
}

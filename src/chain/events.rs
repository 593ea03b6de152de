//! Contract events we react to, decoded into one tagged enum.
//!
//! | event             | signature                                              |
//! |-------------------|--------------------------------------------------------|
//! | `DepositMade`     | `DepositMade(address,address,uint256,uint256)`         |
//! | `WithdrawalMade`  | `WithdrawalMade(address,address,uint256)`              |
//! | `TicketSubmitted` | `TicketSubmitted(address,address,uint256)`             |
//! | `RefundMade`      | `RefundMade(address,address,uint256)`                  |
//! | `Forward`         | `Forward(string,address,address[],uint256[],uint256)`  |
//! | `ForwardAny`      | `ForwardAny(string,address,bytes[],uint256[],uint256)` |
//!
//! The credit events index their two addresses; amounts live in `data`.

use ethers::abi::RawLog;
use ethers::contract::EthEvent;
use ethers::types::{Address, Bytes, Log, H256, U256};
use serde::{Deserialize, Serialize};

use super::{format_address, to_decimal};
use crate::error::AbiError;

// ============================================================================
// ABI
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, EthEvent)]
#[ethevent(name = "DepositMade", abi = "DepositMade(address,address,uint256,uint256)")]
pub struct DepositMadeFilter {
    #[ethevent(indexed)]
    pub payer: Address,
    #[ethevent(indexed)]
    pub token: Address,
    pub amount: U256,
    pub refund_time: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, EthEvent)]
#[ethevent(name = "WithdrawalMade", abi = "WithdrawalMade(address,address,uint256)")]
pub struct WithdrawalMadeFilter {
    #[ethevent(indexed)]
    pub owner: Address,
    #[ethevent(indexed)]
    pub receiver: Address,
    pub amount: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, EthEvent)]
#[ethevent(name = "TicketSubmitted", abi = "TicketSubmitted(address,address,uint256)")]
pub struct TicketSubmittedFilter {
    #[ethevent(indexed)]
    pub payer: Address,
    #[ethevent(indexed)]
    pub receiver: Address,
    pub amount: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, EthEvent)]
#[ethevent(name = "RefundMade", abi = "RefundMade(address,address,uint256)")]
pub struct RefundMadeFilter {
    #[ethevent(indexed)]
    pub payer: Address,
    #[ethevent(indexed)]
    pub token: Address,
    pub amount: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, EthEvent)]
#[ethevent(name = "Forward", abi = "Forward(string,address,address[],uint256[],uint256)")]
pub struct ForwardFilter {
    pub id: String,
    pub from: Address,
    pub to: Vec<Address>,
    pub value: Vec<U256>,
    pub total: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, EthEvent)]
#[ethevent(name = "ForwardAny", abi = "ForwardAny(string,address,bytes[],uint256[],uint256)")]
pub struct ForwardAnyFilter {
    pub id: String,
    pub from: Address,
    pub to: Vec<Bytes>,
    pub value: Vec<U256>,
    pub total: U256,
}

// ============================================================================
// EVENTS
// ============================================================================

/// Credit contract movement: who moved it, which counterparty, how much.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditMovement {
    pub account: Address,
    pub counterparty: Address,
    pub amount: U256,
}

impl CreditMovement {
    pub fn amount_decimal(&self) -> Option<rust_decimal::Decimal> {
        to_decimal(self.amount)
    }
}

/// Batch payout observed on the forwarder contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForwardPayment {
    /// Transfer correlation id
    pub id: String,
    pub from: Address,
    /// Receivers; `ForwardAny` receivers are raw bytes rendered as text or hex
    pub to: Vec<String>,
    /// attoFIL per receiver
    pub value: Vec<U256>,
    pub total: U256,
    pub transaction_hash: H256,
    pub block_number: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChainEvent {
    Deposit {
        movement: CreditMovement,
        refund_time: U256,
    },
    Withdrawal(CreditMovement),
    TicketSubmitted(CreditMovement),
    Refund(CreditMovement),
    Forward(ForwardPayment),
    ForwardAny(ForwardPayment),
}

impl ChainEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ChainEvent::Deposit { .. } => "DepositMade",
            ChainEvent::Withdrawal(_) => "WithdrawalMade",
            ChainEvent::TicketSubmitted(_) => "TicketSubmitted",
            ChainEvent::Refund(_) => "RefundMade",
            ChainEvent::Forward(_) => "Forward",
            ChainEvent::ForwardAny(_) => "ForwardAny",
        }
    }

    /// Amount carried by credit contract events.
    pub fn credit_amount(&self) -> Option<U256> {
        match self {
            ChainEvent::Deposit { movement, .. }
            | ChainEvent::Withdrawal(movement)
            | ChainEvent::TicketSubmitted(movement)
            | ChainEvent::Refund(movement) => Some(movement.amount),
            ChainEvent::Forward(_) | ChainEvent::ForwardAny(_) => None,
        }
    }
}

// ============================================================================
// DECODING
// ============================================================================

/// Decode a log into a known event. `Ok(None)` means the topic is not ours.
pub fn decode_log(log: &Log) -> Result<Option<ChainEvent>, AbiError> {
    let Some(topic0) = log.topics.first().copied() else {
        return Ok(None);
    };
    let raw = RawLog { topics: log.topics.clone(), data: log.data.to_vec() };

    let event = if topic0 == DepositMadeFilter::signature() {
        let e = DepositMadeFilter::decode_log(&raw)?;
        ChainEvent::Deposit {
            movement: CreditMovement { account: e.payer, counterparty: e.token, amount: e.amount },
            refund_time: e.refund_time,
        }
    } else if topic0 == WithdrawalMadeFilter::signature() {
        let e = WithdrawalMadeFilter::decode_log(&raw)?;
        ChainEvent::Withdrawal(CreditMovement { account: e.owner, counterparty: e.receiver, amount: e.amount })
    } else if topic0 == TicketSubmittedFilter::signature() {
        let e = TicketSubmittedFilter::decode_log(&raw)?;
        ChainEvent::TicketSubmitted(CreditMovement { account: e.payer, counterparty: e.receiver, amount: e.amount })
    } else if topic0 == RefundMadeFilter::signature() {
        let e = RefundMadeFilter::decode_log(&raw)?;
        ChainEvent::Refund(CreditMovement { account: e.payer, counterparty: e.token, amount: e.amount })
    } else if topic0 == ForwardFilter::signature() {
        let e = ForwardFilter::decode_log(&raw)?;
        let to = e.to.iter().map(format_address).collect();
        ChainEvent::Forward(payment(log, e.id, e.from, to, e.value, e.total)?)
    } else if topic0 == ForwardAnyFilter::signature() {
        let e = ForwardAnyFilter::decode_log(&raw)?;
        let to = e.to.iter().map(|raw| receiver_text(raw)).collect();
        ChainEvent::ForwardAny(payment(log, e.id, e.from, to, e.value, e.total)?)
    } else {
        return Ok(None);
    };
    Ok(Some(event))
}

fn payment(
    log: &Log,
    id: String,
    from: Address,
    to: Vec<String>,
    value: Vec<U256>,
    total: U256,
) -> Result<ForwardPayment, AbiError> {
    if to.len() != value.len() {
        return Err(AbiError::LengthMismatch { to: to.len(), value: value.len() });
    }
    Ok(ForwardPayment {
        id,
        from,
        to,
        value,
        total,
        transaction_hash: log.transaction_hash.unwrap_or_default(),
        block_number: log.block_number.map(|b| b.as_u64()).unwrap_or_default(),
    })
}

/// `ForwardAny` receivers are FIL addresses as bytes: printable ones are kept
/// as text, anything else becomes `0x` hex.
fn receiver_text(raw: &[u8]) -> String {
    match std::str::from_utf8(raw) {
        Ok(text) if !text.is_empty() && text.chars().all(|c| c.is_ascii_graphic()) => text.to_lowercase(),
        _ => format!("0x{}", hex::encode(raw)),
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

/// Log and receipt builders shared by unit tests, integration tests and the
/// mock client.
pub mod fixtures {
    use super::*;
    use ethers::abi::{encode, Token};
    use ethers::types::{TransactionReceipt, U64};

    fn log(contract: Address, topics: Vec<H256>, data: Vec<u8>, tx_hash: H256, block: u64) -> Log {
        Log {
            address: contract,
            topics,
            data: data.into(),
            transaction_hash: Some(tx_hash),
            block_number: Some(U64::from(block)),
            ..Default::default()
        }
    }

    fn credit_log(
        contract: Address,
        topic: H256,
        account: Address,
        counterparty: Address,
        data: Vec<u8>,
        tx_hash: H256,
    ) -> Log {
        log(contract, vec![topic, H256::from(account), H256::from(counterparty)], data, tx_hash, 0)
    }

    fn uint(value: u128) -> Token {
        Token::Uint(U256::from(value))
    }

    pub fn deposit_made(
        contract: Address,
        payer: Address,
        token: Address,
        amount: u128,
        refund_time: u128,
        tx_hash: H256,
    ) -> Log {
        let data = encode(&[uint(amount), uint(refund_time)]);
        credit_log(contract, DepositMadeFilter::signature(), payer, token, data, tx_hash)
    }

    pub fn withdrawal_made(contract: Address, owner: Address, receiver: Address, amount: u128, tx_hash: H256) -> Log {
        let data = encode(&[uint(amount)]);
        credit_log(contract, WithdrawalMadeFilter::signature(), owner, receiver, data, tx_hash)
    }

    pub fn ticket_submitted(contract: Address, payer: Address, receiver: Address, amount: u128, tx_hash: H256) -> Log {
        let data = encode(&[uint(amount)]);
        credit_log(contract, TicketSubmittedFilter::signature(), payer, receiver, data, tx_hash)
    }

    pub fn refund_made(contract: Address, payer: Address, token: Address, amount: u128, tx_hash: H256) -> Log {
        let data = encode(&[uint(amount)]);
        credit_log(contract, RefundMadeFilter::signature(), payer, token, data, tx_hash)
    }

    pub fn forward(
        contract: Address,
        id: &str,
        from: Address,
        to: &[Address],
        value: &[u128],
        tx_hash: H256,
        block: u64,
    ) -> Log {
        let data = encode(&[
            Token::String(id.to_string()),
            Token::Address(from),
            Token::Array(to.iter().map(|a| Token::Address(*a)).collect()),
            Token::Array(value.iter().map(|v| uint(*v)).collect()),
            uint(value.iter().sum()),
        ]);
        log(contract, vec![ForwardFilter::signature()], data, tx_hash, block)
    }

    pub fn forward_any(
        contract: Address,
        id: &str,
        from: Address,
        to: &[&str],
        value: &[u128],
        tx_hash: H256,
        block: u64,
    ) -> Log {
        let data = encode(&[
            Token::String(id.to_string()),
            Token::Address(from),
            Token::Array(to.iter().map(|s| Token::Bytes(s.as_bytes().to_vec())).collect()),
            Token::Array(value.iter().map(|v| uint(*v)).collect()),
            uint(value.iter().sum()),
        ]);
        log(contract, vec![ForwardAnyFilter::signature()], data, tx_hash, block)
    }

    /// Mined receipt; status 1 when `success`.
    pub fn receipt(tx_hash: H256, success: bool, block: u64, logs: Vec<Log>) -> TransactionReceipt {
        TransactionReceipt {
            transaction_hash: tx_hash,
            status: Some(U64::from(u64::from(success))),
            block_number: Some(U64::from(block)),
            logs,
            ..Default::default()
        }
    }
}

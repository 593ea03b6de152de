/// Chain access
///
/// Everything the engine needs from an EVM node sits behind [`EvmClient`]:
/// the head block, transaction receipts and filtered logs. Types are the
/// ethers ones. The FIL node sits behind [`filecoin::FilNodeClient`]. Both
/// have an ethers `Provider<Http>` implementation and an in-memory mock.

pub mod events;
pub mod filecoin;
pub mod mock;
pub mod rpc;

pub use ethers::types::{Address, Filter, Log, TransactionReceipt, H256, U256, U64};
pub use events::{decode_log, ChainEvent, CreditMovement, ForwardPayment};
pub use filecoin::{FilMessage, FilNodeClient, FilRpcClient};
pub use mock::{MockEvmClient, MockFilNodeClient};
pub use rpc::EvmRpcClient;

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::RpcError;

// ============================================================================
// CLIENT TRAIT
// ============================================================================

#[async_trait]
pub trait EvmClient: Send + Sync {
    async fn block_number(&self) -> Result<u64, RpcError>;

    /// `None` while the transaction is unknown or not yet mined.
    async fn transaction_receipt(&self, hash: H256) -> Result<Option<TransactionReceipt>, RpcError>;

    async fn get_logs(&self, filter: &Filter) -> Result<Vec<Log>, RpcError>;
}

#[async_trait]
impl<C: EvmClient + ?Sized> EvmClient for Arc<C> {
    async fn block_number(&self) -> Result<u64, RpcError> {
        (**self).block_number().await
    }

    async fn transaction_receipt(&self, hash: H256) -> Result<Option<TransactionReceipt>, RpcError> {
        (**self).transaction_receipt(hash).await
    }

    async fn get_logs(&self, filter: &Filter) -> Result<Vec<Log>, RpcError> {
        (**self).get_logs(filter).await
    }
}

// ============================================================================
// RECEIPTS
// ============================================================================

pub trait ReceiptExt {
    /// Status 1. Receipts without a status field count as failed.
    fn succeeded(&self) -> bool;

    /// Inclusion block; `None` while the receipt is pending.
    fn block(&self) -> Option<u64>;

    /// Confirmations at `head`, counting the inclusion block.
    fn confirmations(&self, head: u64) -> Option<u64> {
        self.block().map(|block| head.saturating_sub(block) + 1)
    }
}

impl ReceiptExt for TransactionReceipt {
    fn succeeded(&self) -> bool {
        self.status == Some(U64::from(1))
    }

    fn block(&self) -> Option<u64> {
        self.block_number.map(|b| b.as_u64())
    }
}

// ============================================================================
// FORMATTING
// ============================================================================

/// Full lower-case `0x` hex, the form hashes are stored in.
pub fn format_hash(hash: &H256) -> String {
    format!("{:#x}", hash)
}

/// Full lower-case `0x` hex, the form addresses are stored in.
pub fn format_address(address: &Address) -> String {
    format!("{:#x}", address)
}

/// Base-unit amount as a `Decimal`; `None` above 96 bits.
pub fn to_decimal(value: U256) -> Option<Decimal> {
    if value.bits() > 96 {
        return None;
    }
    Decimal::from_str(&value.to_string()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_confirmations_include_inclusion_block() {
        let receipt = TransactionReceipt {
            status: Some(U64::from(1)),
            block_number: Some(U64::from(100)),
            ..Default::default()
        };
        assert_eq!(receipt.confirmations(100), Some(1));
        assert_eq!(receipt.confirmations(109), Some(10));
        assert!(receipt.succeeded());

        let pending = TransactionReceipt::default();
        assert_eq!(pending.confirmations(109), None);
        assert!(!pending.succeeded());
    }

    #[test]
    fn test_amount_conversion_bounds() {
        assert_eq!(to_decimal(U256::from(1_500_000_000_000_000_000u128)), Some(dec!(1500000000000000000)));
        assert_eq!(to_decimal(U256::MAX), None);
        assert_eq!(to_decimal(U256::from(1u128 << 96)), None);
    }

    #[test]
    fn test_formatting_is_full_lowercase_hex() {
        let address = Address::from_low_u64_be(0xAB);
        assert_eq!(format_address(&address), "0x00000000000000000000000000000000000000ab");
        assert_eq!(format_hash(&H256::from_low_u64_be(1)).len(), 66);
    }
}

/// Block Watcher
///
/// Follows the batch payout contract a fixed distance behind the chain head
/// and hands every observed payout to a [`PaymentHandler`]:
/// - cursor absent → start at the current (delayed) head, nothing scanned
/// - scan `[cursor, head)` in chunks, both payout events per chunk
/// - one delivery per transaction hash, `Forward` preferred over `ForwardAny`
/// - cursor moves past each chunk once its events were handed over
///
/// A provider error with the configured code moves the cursor straight to
/// the head; the skipped range is not revisited.

use async_trait::async_trait;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use ethers::contract::EthEvent;

use crate::chain::events::{ForwardAnyFilter, ForwardFilter};
use crate::chain::{decode_log, format_address, format_hash, ChainEvent, EvmClient, Filter, ForwardPayment, Log, H256};
use crate::config::ChainConfig;
use crate::error::{JobResult, RpcError, StoreResult};
use crate::store::{Store, StoreTx};

/// Receives confirmed payouts. Deliveries may repeat across runs.
#[async_trait]
pub trait PaymentHandler: Send + Sync {
    async fn handle_payment(&self, payment: &ForwardPayment) -> StoreResult<()>;
}

/// Result of one watcher run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WatchReport {
    /// First block scanned
    pub from_block: u64,
    /// Cursor after the run
    pub cursor: u64,
    pub chunks: usize,
    pub payments: usize,
    pub handler_errors: usize,
    /// Cursor was created this run
    pub initialized: bool,
    /// Cursor was forced to the head after a provider error
    pub skipped_to_head: bool,
}

pub struct BlockWatcher<C, S, H> {
    chain: ChainConfig,
    client: C,
    store: S,
    handler: H,
}

impl<C, S, H> BlockWatcher<C, S, H>
where
    C: EvmClient,
    S: Store,
    H: PaymentHandler,
{
    pub fn new(chain: ChainConfig, client: C, store: S, handler: H) -> Self {
        Self { chain, client, store, handler }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub async fn run(&self) -> JobResult<WatchReport> {
        let head = self.client.block_number().await?;
        let current = head.saturating_sub(self.chain.delayed_blocks);

        let key = format_address(&self.chain.multiforwarder);
        let cursor = self.store.transaction(move |tx| Ok(tx.block_cursor(&key))).await?;
        let Some(cursor) = cursor else {
            self.save_cursor(current).await?;
            info!(chain = %self.chain.name, block = current, "block cursor initialized");
            return Ok(WatchReport { from_block: current, cursor: current, initialized: true, ..Default::default() });
        };

        let mut report = WatchReport { from_block: cursor, cursor, ..Default::default() };
        let chunk = self.chain.chunk_size.max(1);
        let mut start = cursor;

        while start < current {
            let end = (start + chunk).min(current) - 1;

            let payments = match self.fetch_payments(start, end).await {
                Ok(payments) => payments,
                Err(e) if e.provider_code() == Some(self.chain.skip_error_code) => {
                    warn!(
                        chain = %self.chain.name,
                        from = start,
                        to = current,
                        error = %e,
                        "provider refused range, skipping to head"
                    );
                    self.save_cursor(current).await?;
                    report.cursor = current;
                    report.skipped_to_head = true;
                    return Ok(report);
                }
                Err(e) => return Err(e.into()),
            };

            for payment in &payments {
                if let Err(e) = self.handler.handle_payment(payment).await {
                    report.handler_errors += 1;
                    warn!(
                        transfer_ref = %payment.id,
                        tx_hash = %format_hash(&payment.transaction_hash),
                        error = %e,
                        "payment confirmation failed"
                    );
                }
            }

            self.save_cursor(end + 1).await?;
            debug!(from = start, to = end, payments = payments.len(), "chunk scanned");

            report.chunks += 1;
            report.payments += payments.len();
            report.cursor = end + 1;
            start = end + 1;
        }

        info!(
            chain = %self.chain.name,
            from = report.from_block,
            cursor = report.cursor,
            chunks = report.chunks,
            payments = report.payments,
            "watcher run finished"
        );
        Ok(report)
    }

    async fn save_cursor(&self, block: u64) -> StoreResult<()> {
        let key = format_address(&self.chain.multiforwarder);
        self.store
            .transaction(move |tx| {
                tx.set_block_cursor(&key, block);
                Ok(())
            })
            .await
    }

    /// Payouts in `[from, to]`, one per transaction hash.
    async fn fetch_payments(&self, from: u64, to: u64) -> Result<Vec<ForwardPayment>, RpcError> {
        let filter = |topic0: H256| {
            Filter::new()
                .address(self.chain.multiforwarder)
                .topic0(topic0)
                .from_block(from)
                .to_block(to)
        };
        let any_filter = filter(ForwardAnyFilter::signature());
        let forward_filter = filter(ForwardFilter::signature());

        let (any_logs, forward_logs) = tokio::try_join!(
            self.client.get_logs(&any_filter),
            self.client.get_logs(&forward_filter),
        )?;

        Ok(dedup_payments(any_logs.iter().chain(forward_logs.iter())))
    }
}

/// Keep the last payout per transaction hash, in first-seen order.
fn dedup_payments<'a>(logs: impl Iterator<Item = &'a Log>) -> Vec<ForwardPayment> {
    let mut order: Vec<H256> = Vec::new();
    let mut by_hash: HashMap<H256, ForwardPayment> = HashMap::new();

    for log in logs {
        let payment = match decode_log(log) {
            Ok(Some(ChainEvent::Forward(p))) | Ok(Some(ChainEvent::ForwardAny(p))) => p,
            Ok(_) => continue,
            Err(e) => {
                warn!(tx_hash = ?log.transaction_hash, error = %e, "undecodable payout log");
                continue;
            }
        };
        if !by_hash.contains_key(&payment.transaction_hash) {
            order.push(payment.transaction_hash);
        }
        by_hash.insert(payment.transaction_hash, payment);
    }

    order.into_iter().filter_map(|hash| by_hash.remove(&hash)).collect()
}

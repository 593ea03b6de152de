// Credit Reconciler - Main Entry Point
// Runs one job against the configured chain, then persists the store snapshot.

use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use credit_reconciler::chain::{EvmRpcClient, FilRpcClient};
use credit_reconciler::reconcile::{ContractDeployKind, DepositKind, ReconcileKind, ReconciliationJob, RedemptionKind, RefundKind};
use credit_reconciler::transfers::{FilVerificationJob, PendingTransferCheckJob, PlainAmountCodec, TransferPaymentConfirmer};
use credit_reconciler::{AppConfig, BlockWatcher, ExpiryJob, JobError, MemoryStore};

const USAGE: &str = "usage: credit-reconciler <watch|deposits|withdrawals|tickets|refunds|deploys|transfers|fil-verify|expire>";

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let Some(job) = std::env::args().nth(1) else {
        eprintln!("{}", USAGE);
        return ExitCode::from(2);
    };

    let config = AppConfig::from_env();
    let store = match MemoryStore::load_or_default(&config.snapshot_path) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!(error = %e, path = %config.snapshot_path.display(), "could not load store snapshot");
            return ExitCode::FAILURE;
        }
    };

    info!(job = %job, chain = %config.chain.name, "starting job");
    let outcome = run_job(&job, &config, store.clone()).await;

    if let Err(e) = store.save_to_disk(&config.snapshot_path).await {
        error!(error = %e, "could not save store snapshot");
        return ExitCode::FAILURE;
    }

    match outcome {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => {
            eprintln!("{}", USAGE);
            ExitCode::from(2)
        }
        Err(e) => {
            error!(job = %job, error = %e, "job failed");
            ExitCode::FAILURE
        }
    }
}

/// Run the named job once. `Ok(false)` means the name is unknown.
async fn run_job(job: &str, config: &AppConfig, store: Arc<MemoryStore>) -> Result<bool, JobError> {
    let contract = config.chain.credit_contract;
    match job {
        "watch" => {
            let client = EvmRpcClient::from_config(&config.chain)?;
            let confirmer = TransferPaymentConfirmer::new(store.clone(), PlainAmountCodec, config.fil.system_user_role_id);
            let report = BlockWatcher::new(config.chain.clone(), client, store, confirmer).run().await?;
            info!(?report, "watch finished");
        }
        "deposits" => reconcile(DepositKind::new(contract, config.window), config, store).await?,
        "withdrawals" => reconcile(RedemptionKind::withdrawals(contract), config, store).await?,
        "tickets" => reconcile(RedemptionKind::tickets(contract), config, store).await?,
        "refunds" => reconcile(RefundKind::new(contract), config, store).await?,
        "deploys" => reconcile(ContractDeployKind, config, store).await?,
        "transfers" => {
            let client = EvmRpcClient::from_config(&config.chain)?;
            let confirmer = TransferPaymentConfirmer::new(store, PlainAmountCodec, config.fil.system_user_role_id);
            let report = PendingTransferCheckJob::new(client, confirmer, config.chain.multiforwarder).run().await?;
            info!(?report, "pending transfer check finished");
        }
        "fil-verify" => {
            let client = FilRpcClient::from_config(&config.fil)?;
            let report = FilVerificationJob::new(client, store, PlainAmountCodec, config.fil.clone()).run().await?;
            info!(?report, "FIL verification finished");
        }
        "expire" => {
            ExpiryJob::new(store).run().await?;
        }
        _ => return Ok(false),
    }
    Ok(true)
}

async fn reconcile<K: ReconcileKind>(kind: K, config: &AppConfig, store: Arc<MemoryStore>) -> Result<(), JobError> {
    let client = EvmRpcClient::from_config(&config.chain)?;
    ReconciliationJob::new(kind, client, store, config.jobs).run().await?;
    Ok(())
}

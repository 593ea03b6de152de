//! Runtime configuration.
//!
//! Chain bindings are explicit values passed into watcher and job
//! constructors; `AppConfig::from_env` is the only place that reads the
//! process environment.

use chrono::Duration;
use ethers::types::Address;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::warn;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Blocks kept behind the chain head before logs are acted on (~5 minutes)
pub const DEFAULT_DELAYED_BLOCKS: u64 = 10;

/// Blocks per `eth_getLogs` query
pub const DEFAULT_CHUNK_SIZE: u64 = 100;

/// Provider error code that makes the watcher skip to the head
pub const DEFAULT_SKIP_ERROR_CODE: i64 = 1;

/// Default withdraw window length
pub const DEFAULT_WITHDRAW_WINDOW_DAYS: i64 = 45;

/// Lock added between window expiry and refund start on a fresh window
pub const DEFAULT_REFUND_LOCK_DAYS: i64 = 1;

/// Buffer added before refunds open
pub const DEFAULT_BUFFER_DAYS: i64 = 1;

/// Rows picked per reconciliation run
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Pending rows older than this are no longer reconciled
pub const DEFAULT_RECENCY_HOURS: i64 = 24;

/// FIL message records picked per verification run
pub const DEFAULT_FIL_BATCH_SIZE: usize = 720;

/// Minimum spacing between FIL node calls
pub const DEFAULT_FIL_MIN_INTERVAL_MS: u64 = 333;

/// Age after which a PENDING transfer gets its receipt checked directly
pub const DEFAULT_TRANSFER_STALE_MINUTES: i64 = 10;

pub const DEFAULT_RPC_TIMEOUT_SECS: u64 = 60;

pub const DEFAULT_EVM_RPC_URL: &str = "https://api.calibration.node.glif.io/rpc/v1";

pub const DEFAULT_SNAPSHOT_PATH: &str = "credit_state.json";

// ============================================================================
// CHAIN CONFIG
// ============================================================================

/// One watched EVM chain.
#[derive(Debug, Clone)]
pub struct ChainConfig {
    pub name: String,
    pub rpc_url: String,
    /// Deposit / withdraw / refund contract
    pub credit_contract: Address,
    /// Batch payout contract emitting `Forward` / `ForwardAny`
    pub multiforwarder: Address,
    pub delayed_blocks: u64,
    pub chunk_size: u64,
    pub skip_error_code: i64,
    pub rpc_timeout_secs: u64,
}

impl ChainConfig {
    pub fn new(name: &str, rpc_url: &str, credit_contract: Address, multiforwarder: Address) -> Self {
        Self {
            name: name.to_string(),
            rpc_url: rpc_url.to_string(),
            credit_contract,
            multiforwarder,
            delayed_blocks: DEFAULT_DELAYED_BLOCKS,
            chunk_size: DEFAULT_CHUNK_SIZE,
            skip_error_code: DEFAULT_SKIP_ERROR_CODE,
            rpc_timeout_secs: DEFAULT_RPC_TIMEOUT_SECS,
        }
    }
}

// ============================================================================
// LEDGER CONFIG
// ============================================================================

/// Credit window constants.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowConfig {
    pub withdraw_window: Duration,
    pub refund_lock: Duration,
    pub buffer: Duration,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            withdraw_window: Duration::days(DEFAULT_WITHDRAW_WINDOW_DAYS),
            refund_lock: Duration::days(DEFAULT_REFUND_LOCK_DAYS),
            buffer: Duration::days(DEFAULT_BUFFER_DAYS),
        }
    }
}

/// Polling bounds shared by every reconciliation job.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JobConfig {
    pub batch_size: usize,
    pub recency: Duration,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            recency: Duration::hours(DEFAULT_RECENCY_HOURS),
        }
    }
}

// ============================================================================
// FIL NODE CONFIG
// ============================================================================

#[derive(Debug, Clone)]
pub struct FilNodeConfig {
    pub rpc_url: String,
    pub batch_size: usize,
    pub min_interval_ms: u64,
    pub rpc_timeout_secs: u64,
    /// Role recorded on history entries written by jobs
    pub system_user_role_id: u64,
}

impl FilNodeConfig {
    pub fn new(rpc_url: &str) -> Self {
        Self {
            rpc_url: rpc_url.to_string(),
            batch_size: DEFAULT_FIL_BATCH_SIZE,
            min_interval_ms: DEFAULT_FIL_MIN_INTERVAL_MS,
            rpc_timeout_secs: DEFAULT_RPC_TIMEOUT_SECS,
            system_user_role_id: 1,
        }
    }
}

// ============================================================================
// APP CONFIG
// ============================================================================

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub chain: ChainConfig,
    pub fil: FilNodeConfig,
    pub window: WindowConfig,
    pub jobs: JobConfig,
    pub snapshot_path: PathBuf,
}

impl AppConfig {
    /// Build configuration from the environment (and `.env`, if present).
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        let rpc_url = env_or("EVM_RPC_URL", DEFAULT_EVM_RPC_URL.to_string());
        let mut chain = ChainConfig::new(
            &env_or("CHAIN_NAME", "Filecoin".to_string()),
            &rpc_url,
            env_or("CREDIT_CONTRACT_ADDRESS", Address::zero()),
            env_or("MULTIFORWARDER_ADDRESS", Address::zero()),
        );
        chain.delayed_blocks = env_or("DELAYED_BLOCKS", DEFAULT_DELAYED_BLOCKS);
        chain.chunk_size = env_or("WATCH_CHUNK_SIZE", DEFAULT_CHUNK_SIZE).max(1);
        chain.skip_error_code = env_or("PROVIDER_SKIP_ERROR_CODE", DEFAULT_SKIP_ERROR_CODE);
        chain.rpc_timeout_secs = env_or("RPC_TIMEOUT_SECS", DEFAULT_RPC_TIMEOUT_SECS);

        let mut fil = FilNodeConfig::new(&env_or("FIL_RPC_URL", rpc_url));
        fil.rpc_timeout_secs = chain.rpc_timeout_secs;
        fil.system_user_role_id = env_or("SYSTEM_USER_ROLE_ID", 1);

        let window = WindowConfig {
            withdraw_window: Duration::days(env_or("WITHDRAW_WINDOW_DAYS", DEFAULT_WITHDRAW_WINDOW_DAYS)),
            refund_lock: Duration::days(env_or("LOCK_DAYS", DEFAULT_REFUND_LOCK_DAYS)),
            buffer: Duration::days(DEFAULT_BUFFER_DAYS),
        };

        Self {
            chain,
            fil,
            window,
            jobs: JobConfig::default(),
            snapshot_path: PathBuf::from(env_or("STORE_SNAPSHOT_PATH", DEFAULT_SNAPSHOT_PATH.to_string())),
        }
    }
}

/// Read and parse an environment variable. Absent keys take the default
/// silently; values that do not parse are reported and replaced by it.
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    let Ok(raw) = std::env::var(key) else {
        return default;
    };
    match raw.trim().parse() {
        Ok(value) => value,
        Err(_) => {
            warn!(key, value = %raw, "malformed environment value, using default");
            default
        }
    }
}

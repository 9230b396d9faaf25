use alloy::primitives::Address;
use dotenvy::dotenv;
use eyre::{eyre, Result, WrapErr};
use std::{env, str::FromStr, time::Duration};
use tracing::{info, warn};

pub const DEFAULT_RPC_URL: &str = "https://base.llamarpc.com";
const DEFAULT_SUBGRAPH_URL: &str = "https://base-mainnet.subgraph.x.superfluid.dev/";

const DEFAULT_TOREX: &str = "0x269f9ef6868f70fb20ddf7cfdf69fe1dbfd307de";
const DEFAULT_SB_MACRO: &str = "0xe581e09a9c2a9188c3e6f0fab5a0b3ec88ca39ae";
const DEFAULT_MACRO_FORWARDER: &str = "0xfd01285b9435bc45c243e5e7f978e288b2912de6";
const DEFAULT_PORTFOLIO_REFRESH_SECS: u64 = 5;

/// Indexer service settings.
#[derive(Debug, Clone)]
pub struct Config {
    pub rpc_http_url: String,
    pub db_path: String,
    pub port: u16,
    pub confirmations: u64,
    /// Overrides `eth_chainId` when set.
    pub chain_id: Option<u64>,
    /// Incentives app emitters to watch. Empty means any emitter.
    pub app_addresses: Vec<Address>,
    pub start_block: Option<u64>,
    pub backfill_blocks: u64,
    pub max_block_range: u64,
    pub poll_interval_secs: u64,
    pub subgraph_url: String,
}

/// Settings for the stream operator binary.
#[derive(Clone)]
pub struct StreamConfig {
    pub rpc_http_url: String,
    pub private_key: String,
    pub incentives_app: Option<Address>,
    pub torex: Address,
    pub sb_macro: Address,
    pub macro_forwarder: Address,
    pub subgraph_url: String,
    /// Wait before re-reading the portfolio after a mined transaction.
    pub portfolio_refresh: Duration,
}

impl std::fmt::Debug for StreamConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamConfig")
            .field("rpc_http_url", &self.rpc_http_url)
            .field("private_key", &"<redacted>")
            .field("incentives_app", &self.incentives_app)
            .field("torex", &self.torex)
            .field("sb_macro", &self.sb_macro)
            .field("macro_forwarder", &self.macro_forwarder)
            .field("subgraph_url", &self.subgraph_url)
            .field("portfolio_refresh", &self.portfolio_refresh)
            .finish()
    }
}

fn var_or<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("Ignoring invalid {}={:?}", key, raw);
            default
        }),
        Err(_) => default,
    }
}

fn optional_var<T: FromStr>(key: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| eyre!("invalid {}: {}", key, e)),
        _ => Ok(None),
    }
}

fn address_var(key: &str, default: &str) -> Result<Address> {
    let raw = env::var(key).unwrap_or_else(|_| default.to_string());
    raw.trim()
        .parse()
        .wrap_err_with(|| format!("invalid address in {}", key))
}

/// Comma-separated address list; blanks are skipped, bad entries rejected.
pub fn parse_address_list(raw: &str) -> Result<Vec<Address>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<Address>().wrap_err_with(|| format!("invalid address '{}'", s)))
        .collect()
}

fn rpc_url() -> String {
    env::var("RPC_HTTP_URL")
        .or_else(|_| env::var("RPC_URL"))
        .unwrap_or_else(|_| DEFAULT_RPC_URL.to_string())
}

pub fn subgraph_url() -> String {
    env::var("SUBGRAPH_URL").unwrap_or_else(|_| DEFAULT_SUBGRAPH_URL.to_string())
}

pub fn load() -> Result<Config> {
    dotenv().ok();

    let app_addresses = parse_address_list(
        &env::var("INCENTIVES_APP_ADDRESSES")
            .or_else(|_| env::var("INCENTIVES_APP_ADDRESS"))
            .unwrap_or_default(),
    )?;

    let cfg = Config {
        rpc_http_url: rpc_url(),
        db_path: env::var("DATABASE_URL").unwrap_or_else(|_| "flows.db".to_string()),
        port: var_or("PORT", 8080),
        confirmations: var_or("CONFIRMATIONS", 2),
        chain_id: optional_var("CHAIN_ID")?,
        app_addresses,
        start_block: optional_var("START_BLOCK")?,
        backfill_blocks: var_or("BACKFILL_BLOCKS", 5000),
        max_block_range: var_or::<u64>("MAX_BLOCK_RANGE", 2000).max(1),
        poll_interval_secs: var_or::<u64>("POLL_INTERVAL_SECS", 10).max(1),
        subgraph_url: subgraph_url(),
    };

    info!("Loaded config: {:?}", cfg);

    Ok(cfg)
}

pub fn load_stream() -> Result<StreamConfig> {
    dotenv().ok();

    let private_key = env::var("WALLET_PRIVATE_KEY")
        .or_else(|_| env::var("WALLET"))
        .map_err(|_| eyre!("WALLET_PRIVATE_KEY is not set"))?;

    let cfg = StreamConfig {
        rpc_http_url: rpc_url(),
        private_key,
        incentives_app: optional_var("INCENTIVES_APP_ADDRESS")?,
        torex: address_var("TOREX_ADDRESS", DEFAULT_TOREX)?,
        sb_macro: address_var("SB_MACRO_ADDRESS", DEFAULT_SB_MACRO)?,
        macro_forwarder: address_var("MACRO_FORWARDER_ADDRESS", DEFAULT_MACRO_FORWARDER)?,
        subgraph_url: subgraph_url(),
        portfolio_refresh: Duration::from_secs(var_or("PORTFOLIO_REFRESH_SECS", DEFAULT_PORTFOLIO_REFRESH_SECS)),
    };

    info!("Loaded stream config: {:?}", cfg);

    Ok(cfg)
}

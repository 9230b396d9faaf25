// src/portfolio.rs
//! Stream intents: start, update, delete and claim.
//!
//! Every intent runs the same shape: mark the session busy, read token
//! state, approve if needed, submit a single call, wait for the receipt,
//! then publish a status line. Nothing here is retried; a failure ends the
//! intent and leaves an `Error: ...` status behind.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use alloy::primitives::{utils::format_units, Address, Bytes, TxHash, U256};
use async_trait::async_trait;
use futures_util::future::try_join3;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{error, info};

use crate::models::{FlowRate, FlowRateError};

/// Thirty days, the period a "monthly" amount is spread over.
pub const SECONDS_PER_MONTH: i64 = 30 * 24 * 60 * 60;

pub const STATUS_PROCESSING: &str = "Processing...";
pub const STATUS_INVALID_TOREX: &str = "Invalid Torex address";
pub const STATUS_APPROVED: &str = "Approval successful. Starting DCA position...";
pub const STATUS_STARTED: &str = "DCA position started successfully!";
pub const STATUS_CREATED: &str = "Stream created successfully!";
pub const STATUS_UPDATED: &str = "Stream updated successfully!";
pub const STATUS_DELETED: &str = "Stream deleted successfully!";
pub const STATUS_CLAIMED: &str = "Rewards claimed successfully!";

#[derive(Debug, Error)]
pub enum PortfolioError {
    #[error("a transaction is already in flight")]
    Busy,
    #[error("Invalid Torex address: {0}")]
    InvalidTorex(String),
    #[error("monthly amount must be positive")]
    NonPositiveAmount,
    #[error("{monthly} per month is below one base unit per second with {decimals} decimals")]
    ZeroFlowRate { monthly: Decimal, decimals: u8 },
    #[error("invalid upgrade amount '{0}'")]
    InvalidUpgradeAmount(String),
    #[error("{amount} cannot be expressed in base units with {decimals} decimals")]
    Unrepresentable { amount: Decimal, decimals: u8 },
    #[error(transparent)]
    FlowRate(#[from] FlowRateError),
    #[error("contract call failed: {0}")]
    Contract(String),
    #[error("transaction {0} reverted")]
    Reverted(TxHash),
}

// ---------- amounts ----------

/// Human amount streamed per second for a human monthly amount.
pub fn per_second_amount(monthly: Decimal) -> Decimal {
    monthly / Decimal::from(SECONDS_PER_MONTH)
}

fn scale_to_base_units(amount: Decimal, decimals: u8) -> Result<Decimal, PortfolioError> {
    let mut scaled = amount;
    for _ in 0..decimals {
        scaled = scaled
            .checked_mul(Decimal::TEN)
            .ok_or(PortfolioError::Unrepresentable { amount, decimals })?;
    }
    Ok(scaled.trunc())
}

/// Per-second flow rate in the token's smallest unit, truncated toward zero.
pub fn flow_rate_from_monthly(monthly: Decimal, decimals: u8) -> Result<FlowRate, PortfolioError> {
    let base = scale_to_base_units(per_second_amount(monthly), decimals)?;
    let value = base
        .to_i128()
        .ok_or(PortfolioError::Unrepresentable { amount: monthly, decimals })?;
    Ok(FlowRate::new(value)?)
}

/// Rate for opening a stream; a positive amount that truncates to zero is
/// refused rather than sent as an empty stream.
pub fn opening_flow_rate(monthly: Decimal, decimals: u8) -> Result<FlowRate, PortfolioError> {
    if monthly <= Decimal::ZERO {
        return Err(PortfolioError::NonPositiveAmount);
    }
    let rate = flow_rate_from_monthly(monthly, decimals)?;
    if rate == FlowRate::ZERO {
        return Err(PortfolioError::ZeroFlowRate { monthly, decimals });
    }
    Ok(rate)
}

/// Non-negative human amount to smallest units.
pub fn to_base_units(amount: Decimal, decimals: u8) -> Result<U256, PortfolioError> {
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(PortfolioError::InvalidUpgradeAmount(amount.to_string()));
    }
    let base = scale_to_base_units(amount, decimals)?;
    base.to_u128()
        .map(U256::from)
        .ok_or(PortfolioError::Unrepresentable { amount, decimals })
}

/// How much of the underlying token to upgrade when starting a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeAmount {
    /// The whole wallet balance.
    Max,
    Exact(Decimal),
}

impl Default for UpgradeAmount {
    fn default() -> Self {
        UpgradeAmount::Exact(Decimal::ZERO)
    }
}

impl FromStr for UpgradeAmount {
    type Err = PortfolioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Self::default());
        }
        if s.eq_ignore_ascii_case("max") {
            return Ok(UpgradeAmount::Max);
        }
        match Decimal::from_str(s) {
            Ok(d) if !d.is_sign_negative() || d.is_zero() => Ok(UpgradeAmount::Exact(d)),
            _ => Err(PortfolioError::InvalidUpgradeAmount(s.to_string())),
        }
    }
}

impl UpgradeAmount {
    pub fn resolve(self, token: &TokenInfo) -> Result<U256, PortfolioError> {
        match self {
            UpgradeAmount::Max => Ok(token.balance),
            UpgradeAmount::Exact(d) => to_base_units(d, token.decimals),
        }
    }
}

// ---------- chain ports ----------

/// Token reads and approvals for the connected wallet.
#[async_trait]
pub trait TokenPort: Send + Sync {
    async fn native_balance(&self, owner: Address) -> Result<U256, PortfolioError>;
    async fn balance_of(&self, token: Address, owner: Address) -> Result<U256, PortfolioError>;
    async fn allowance(&self, token: Address, owner: Address, spender: Address) -> Result<U256, PortfolioError>;
    async fn decimals(&self, token: Address) -> Result<u8, PortfolioError>;
    async fn approve(&self, token: Address, spender: Address, amount: U256) -> Result<TxHash, PortfolioError>;
}

/// Arguments of `SBMacro.getParams`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacroParams {
    pub torex: Address,
    pub flow_rate: FlowRate,
    pub distributor: Address,
    pub referrer: Address,
    pub upgrade_amount: U256,
}

/// Torex lookups and the stream-changing contract calls. Every `Ok(TxHash)`
/// means the transaction was mined successfully.
#[async_trait]
pub trait StreamPort: Send + Sync {
    async fn paired_in_token(&self, torex: Address) -> Result<Address, PortfolioError>;
    async fn underlying_token(&self, super_token: Address) -> Result<Address, PortfolioError>;
    async fn macro_params(&self, params: &MacroParams) -> Result<Bytes, PortfolioError>;
    async fn run_macro(&self, params: Bytes) -> Result<TxHash, PortfolioError>;
    async fn create_stream(&self, flow_rate: FlowRate) -> Result<TxHash, PortfolioError>;
    async fn update_stream(&self, inflow_change: FlowRate) -> Result<TxHash, PortfolioError>;
    async fn delete_stream(&self, remaining_inflow: FlowRate) -> Result<TxHash, PortfolioError>;
    async fn claim_all(&self, pool: Address) -> Result<TxHash, PortfolioError>;
}

// ---------- session ----------

/// Token the Torex consumes, resolved down to the wallet-held asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenInfo {
    pub in_token: Address,
    /// `Address::ZERO` for the chain's native asset.
    pub underlying: Address,
    pub decimals: u8,
    pub balance: U256,
    /// Allowance towards the macro; `None` for the native asset.
    pub allowance: Option<U256>,
}

impl TokenInfo {
    pub fn is_native(&self) -> bool {
        self.underlying == Address::ZERO
    }

    pub fn needs_approval(&self, amount: U256) -> bool {
        matches!(self.allowance, Some(allowance) if allowance < amount)
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub owner: Address,
    pub torex: Address,
    pub sb_macro: Address,
    pub distributor: Address,
    pub referrer: Address,
}

/// Start request as entered by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartStream {
    pub monthly: Decimal,
    pub upgrade: UpgradeAmount,
}

/// Resets the busy flag when an intent finishes, whatever the outcome.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// One wallet's view of one Torex.
pub struct StreamSession<C> {
    chain: C,
    cfg: SessionConfig,
    busy: AtomicBool,
    status: Mutex<String>,
    token: Mutex<Option<TokenInfo>>,
}

impl<C: TokenPort + StreamPort> StreamSession<C> {
    pub fn new(chain: C, cfg: SessionConfig) -> Self {
        Self {
            chain,
            cfg,
            busy: AtomicBool::new(false),
            status: Mutex::new(String::new()),
            token: Mutex::new(None),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn status(&self) -> String {
        self.status.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn token(&self) -> Option<TokenInfo> {
        self.token.lock().ok().and_then(|t| t.clone())
    }

    fn set_status(&self, status: impl Into<String>) {
        let status = status.into();
        info!("Status: {}", status);
        if let Ok(mut current) = self.status.lock() {
            *current = status;
        }
    }

    fn begin(&self) -> Result<BusyGuard<'_>, PortfolioError> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| BusyGuard(&self.busy))
            .map_err(|_| PortfolioError::Busy)
    }

    /// Publish the outcome of an intent as a status line.
    fn finish<T>(&self, result: Result<T, PortfolioError>, success: &str) -> Result<T, PortfolioError> {
        match &result {
            Ok(_) => self.set_status(success),
            Err(e) => {
                error!("Stream intent failed: {}", e);
                self.set_status(format!("Error: {}", e));
            }
        }
        result
    }

    async fn read_token(&self) -> Result<TokenInfo, PortfolioError> {
        let in_token = self.chain.paired_in_token(self.cfg.torex).await?;
        let underlying = self.chain.underlying_token(in_token).await?;

        let info = if underlying == Address::ZERO {
            TokenInfo {
                in_token,
                underlying,
                decimals: 18,
                balance: self.chain.native_balance(self.cfg.owner).await?,
                allowance: None,
            }
        } else {
            let (balance, allowance, decimals) = try_join3(
                self.chain.balance_of(underlying, self.cfg.owner),
                self.chain.allowance(underlying, self.cfg.owner, self.cfg.sb_macro),
                self.chain.decimals(underlying),
            )
            .await?;
            TokenInfo { in_token, underlying, decimals, balance, allowance: Some(allowance) }
        };

        info!(
            "Torex {} takes {} (underlying {}), balance {}",
            self.cfg.torex,
            info.in_token,
            info.underlying,
            format_units(info.balance, info.decimals).unwrap_or_else(|_| info.balance.to_string()),
        );

        if let Ok(mut cached) = self.token.lock() {
            *cached = Some(info.clone());
        }
        Ok(info)
    }

    /// Resolve the Torex's token pair and refresh balance and allowance.
    pub async fn validate_torex(&self) -> Result<TokenInfo, PortfolioError> {
        self.read_token().await.map_err(|e| {
            error!("Error validating Torex address: {}", e);
            self.set_status(STATUS_INVALID_TOREX);
            if let Ok(mut cached) = self.token.lock() {
                *cached = None;
            }
            PortfolioError::InvalidTorex(e.to_string())
        })
    }

    /// Open a DCA position through the macro forwarder.
    pub async fn start_stream(&self, req: StartStream) -> Result<TxHash, PortfolioError> {
        let _guard = self.begin()?;
        self.set_status(STATUS_PROCESSING);
        let result = self.start_inner(req).await;
        self.finish(result, STATUS_STARTED)
    }

    async fn start_inner(&self, req: StartStream) -> Result<TxHash, PortfolioError> {
        if req.monthly <= Decimal::ZERO {
            return Err(PortfolioError::NonPositiveAmount);
        }
        let token = self.validate_torex().await?;
        let flow_rate = opening_flow_rate(req.monthly, token.decimals)?;
        let upgrade_amount = req.upgrade.resolve(&token)?;

        info!(
            "Starting stream: {} / month → {} / s, upgrading {}",
            req.monthly, flow_rate, upgrade_amount
        );

        if token.needs_approval(upgrade_amount) {
            self.chain.approve(token.underlying, self.cfg.sb_macro, upgrade_amount).await?;
            self.set_status(STATUS_APPROVED);
        }

        let params = self
            .chain
            .macro_params(&MacroParams {
                torex: self.cfg.torex,
                flow_rate,
                distributor: self.cfg.distributor,
                referrer: self.cfg.referrer,
                upgrade_amount,
            })
            .await?;

        self.chain.run_macro(params).await
    }

    /// Open a stream directly on the incentives app, without upgrading.
    pub async fn create_stream(&self, monthly: Decimal) -> Result<TxHash, PortfolioError> {
        let _guard = self.begin()?;
        self.set_status(STATUS_PROCESSING);
        let result = async {
            if monthly <= Decimal::ZERO {
                return Err(PortfolioError::NonPositiveAmount);
            }
            let token = self.validate_torex().await?;
            let flow_rate = opening_flow_rate(monthly, token.decimals)?;
            self.chain.create_stream(flow_rate).await
        }
        .await;
        self.finish(result, STATUS_CREATED)
    }

    /// Change the stream rate by a monthly delta, which may be negative.
    pub async fn update_stream(&self, monthly_change: Decimal) -> Result<TxHash, PortfolioError> {
        let _guard = self.begin()?;
        self.set_status(STATUS_PROCESSING);
        let result = async {
            let token = self.validate_torex().await?;
            let inflow_change = flow_rate_from_monthly(monthly_change, token.decimals)?;
            self.chain.update_stream(inflow_change).await
        }
        .await;
        self.finish(result, STATUS_UPDATED)
    }

    pub async fn delete_stream(&self, remaining_inflow: FlowRate) -> Result<TxHash, PortfolioError> {
        let _guard = self.begin()?;
        self.set_status(STATUS_PROCESSING);
        let result = async {
            self.validate_torex().await?;
            self.chain.delete_stream(remaining_inflow).await
        }
        .await;
        self.finish(result, STATUS_DELETED)
    }

    /// Claim everything the wallet has accrued in a reward pool.
    pub async fn claim_rewards(&self, pool: Address) -> Result<TxHash, PortfolioError> {
        let _guard = self.begin()?;
        self.set_status(STATUS_PROCESSING);
        let result = self.chain.claim_all(pool).await;
        self.finish(result, STATUS_CLAIMED)
    }
}

//! Operator tool for DCA streams on the configured Torex.
//!
//! ```text
//! stream status
//! stream start <monthly> [upgrade-amount|max]
//! stream create <monthly>
//! stream update <monthly-change>
//! stream delete [remaining-inflow]
//! stream claim <pool>
//! stream portfolio <account>
//! ```

use std::env;

use alloy::primitives::{utils::format_units, Address};
use alloy::providers::ProviderBuilder;
use alloy::signers::local::PrivateKeySigner;
use eyre::{bail, eyre, Result, WrapErr};
use rust_decimal::Decimal;
use tracing::{info, warn};

use flowcentive_indexer::config;
use flowcentive_indexer::logging;
use flowcentive_indexer::models::FlowRate;
use flowcentive_indexer::portfolio::{SessionConfig, StartStream, StreamSession, TokenInfo, UpgradeAmount};
use flowcentive_indexer::subgraph::{Portfolio, SubgraphClient};
use flowcentive_indexer::wallet::AlloyChain;

fn arg<'a>(args: &'a [String], index: usize, name: &str) -> Result<&'a str> {
    args.get(index)
        .map(String::as_str)
        .ok_or_else(|| eyre!("missing <{}>", name))
}

fn decimal(raw: &str, name: &str) -> Result<Decimal> {
    raw.parse().wrap_err_with(|| format!("invalid {} '{}'", name, raw))
}

fn describe_token(token: &TokenInfo) -> Result<String> {
    let balance = format_units(token.balance, token.decimals)?;
    Ok(match token.allowance {
        _ if token.is_native() => format!("native balance {}", balance),
        Some(a) => format!(
            "{} balance {} (allowance {})",
            token.underlying,
            balance,
            format_units(a, token.decimals)?
        ),
        None => format!("{} balance {}", token.underlying, balance),
    })
}

fn show_portfolio(portfolio: &Portfolio) -> Result<()> {
    for outflow in portfolio.open_streams() {
        let updated = outflow
            .updated_at()
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| outflow.updated_at_timestamp.clone());
        info!(
            "Stream {} → {}: {} {}/s (updated {})",
            outflow.id, outflow.receiver.id, outflow.current_flow_rate, outflow.token.symbol, updated
        );
    }
    println!("{}", serde_json::to_string_pretty(portfolio)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();

    let args: Vec<String> = env::args().skip(1).collect();
    let command = args.first().map(String::as_str).unwrap_or("status");

    if command == "portfolio" {
        let account: Address = arg(&args, 1, "account")?.parse()?;
        let portfolio = SubgraphClient::new(config::subgraph_url())?.portfolio(account).await?;
        return show_portfolio(&portfolio);
    }

    let cfg = config::load_stream()?;
    let signer: PrivateKeySigner = cfg.private_key.parse().wrap_err("invalid WALLET_PRIVATE_KEY")?;
    let owner = signer.address();
    let provider = ProviderBuilder::new()
        .wallet(signer)
        .connect_http(cfg.rpc_http_url.parse::<reqwest::Url>().wrap_err("invalid RPC_HTTP_URL")?);

    let session = StreamSession::new(
        AlloyChain::new(provider, cfg.incentives_app, cfg.macro_forwarder, cfg.sb_macro),
        SessionConfig {
            owner,
            torex: cfg.torex,
            sb_macro: cfg.sb_macro,
            distributor: Address::ZERO,
            referrer: Address::ZERO,
        },
    );

    info!("Wallet {} on Torex {}", owner, cfg.torex);

    let outcome = match command {
        "status" => {
            let token = session.validate_torex().await?;
            info!("Torex pays in {}: {}", token.in_token, describe_token(&token)?);
            return Ok(());
        }
        "start" => {
            let monthly = decimal(arg(&args, 1, "monthly")?, "monthly amount")?;
            let upgrade: UpgradeAmount = args.get(2).map(String::as_str).unwrap_or("").parse()?;
            session.start_stream(StartStream { monthly, upgrade }).await
        }
        "create" => {
            let monthly = decimal(arg(&args, 1, "monthly")?, "monthly amount")?;
            session.create_stream(monthly).await
        }
        "update" => {
            let change = decimal(arg(&args, 1, "monthly-change")?, "monthly change")?;
            session.update_stream(change).await
        }
        "delete" => {
            let remaining: FlowRate = args.get(1).map(String::as_str).unwrap_or("0").parse()?;
            session.delete_stream(remaining).await
        }
        "claim" => {
            let pool: Address = arg(&args, 1, "pool")?.parse()?;
            session.claim_rewards(pool).await
        }
        other => bail!("unknown command '{}'", other),
    };

    println!("{}", session.status());
    let tx = outcome?;
    info!("Transaction {}", tx);
    if let Some(token) = session.token() {
        info!("Wallet now: {}", describe_token(&token)?);
    }

    let subgraph = SubgraphClient::new(cfg.subgraph_url.clone())?;
    match subgraph.refresh_after(owner, cfg.portfolio_refresh).await {
        Ok(portfolio) => show_portfolio(&portfolio)?,
        Err(e) => warn!("Portfolio refresh failed: {}", e),
    }
    Ok(())
}

// src/wallet.rs
//! Chain ports backed by an alloy provider with a signing wallet.

use alloy::contract::{CallBuilder, CallDecoder};
use alloy::primitives::{aliases::I96, Address, Bytes, TxHash, U256};
use alloy::providers::Provider;
use async_trait::async_trait;
use tracing::info;

use crate::abi::{IMacroForwarder, ISBMacro, ISuperToken, ISuperfluidPool, ITorex, SBIncentivesApp, IERC20};
use crate::models::FlowRate;
use crate::portfolio::{MacroParams, PortfolioError, StreamPort, TokenPort};

fn contract_err(e: impl std::fmt::Display) -> PortfolioError {
    PortfolioError::Contract(e.to_string())
}

fn to_i96(rate: FlowRate) -> Result<I96, PortfolioError> {
    I96::try_from(rate.get()).map_err(contract_err)
}

pub struct AlloyChain<P> {
    provider: P,
    incentives_app: Option<Address>,
    macro_forwarder: Address,
    sb_macro: Address,
}

impl<P: Provider + Send + Sync> AlloyChain<P> {
    pub fn new(provider: P, incentives_app: Option<Address>, macro_forwarder: Address, sb_macro: Address) -> Self {
        Self { provider, incentives_app, macro_forwarder, sb_macro }
    }

    fn app(&self) -> Result<SBIncentivesApp::SBIncentivesAppInstance<&P>, PortfolioError> {
        let address = self
            .incentives_app
            .ok_or_else(|| PortfolioError::Contract("INCENTIVES_APP_ADDRESS is not set".into()))?;
        Ok(SBIncentivesApp::new(address, &self.provider))
    }
}

/// Send a call and wait until it is mined; a failed receipt is an error.
async fn confirm<P, D>(label: &str, call: CallBuilder<P, D>) -> Result<TxHash, PortfolioError>
where
    P: Provider,
    D: CallDecoder,
{
    let pending = call.send().await.map_err(contract_err)?;
    info!("{} submitted: {}", label, pending.tx_hash());
    let receipt = pending.get_receipt().await.map_err(contract_err)?;
    if !receipt.status() {
        return Err(PortfolioError::Reverted(receipt.transaction_hash));
    }
    info!("{} confirmed in block {:?}", label, receipt.block_number);
    Ok(receipt.transaction_hash)
}

#[async_trait]
impl<P: Provider + Send + Sync> TokenPort for AlloyChain<P> {
    async fn native_balance(&self, owner: Address) -> Result<U256, PortfolioError> {
        self.provider.get_balance(owner).await.map_err(contract_err)
    }

    async fn balance_of(&self, token: Address, owner: Address) -> Result<U256, PortfolioError> {
        IERC20::new(token, &self.provider)
            .balanceOf(owner)
            .call()
            .await
            .map_err(contract_err)
    }

    async fn allowance(&self, token: Address, owner: Address, spender: Address) -> Result<U256, PortfolioError> {
        IERC20::new(token, &self.provider)
            .allowance(owner, spender)
            .call()
            .await
            .map_err(contract_err)
    }

    async fn decimals(&self, token: Address) -> Result<u8, PortfolioError> {
        IERC20::new(token, &self.provider)
            .decimals()
            .call()
            .await
            .map_err(contract_err)
    }

    async fn approve(&self, token: Address, spender: Address, amount: U256) -> Result<TxHash, PortfolioError> {
        let erc20 = IERC20::new(token, &self.provider);
        confirm("approve", erc20.approve(spender, amount)).await
    }
}

#[async_trait]
impl<P: Provider + Send + Sync> StreamPort for AlloyChain<P> {
    async fn paired_in_token(&self, torex: Address) -> Result<Address, PortfolioError> {
        let pair = ITorex::new(torex, &self.provider)
            .getPairedTokens()
            .call()
            .await
            .map_err(contract_err)?;
        Ok(pair.inToken)
    }

    async fn underlying_token(&self, super_token: Address) -> Result<Address, PortfolioError> {
        ISuperToken::new(super_token, &self.provider)
            .getUnderlyingToken()
            .call()
            .await
            .map_err(contract_err)
    }

    async fn macro_params(&self, params: &MacroParams) -> Result<Bytes, PortfolioError> {
        ISBMacro::new(self.sb_macro, &self.provider)
            .getParams(
                params.torex,
                to_i96(params.flow_rate)?,
                params.distributor,
                params.referrer,
                params.upgrade_amount,
            )
            .call()
            .await
            .map_err(contract_err)
    }

    async fn run_macro(&self, params: Bytes) -> Result<TxHash, PortfolioError> {
        let forwarder = IMacroForwarder::new(self.macro_forwarder, &self.provider);
        confirm("runMacro", forwarder.runMacro(self.sb_macro, params)).await
    }

    async fn create_stream(&self, flow_rate: FlowRate) -> Result<TxHash, PortfolioError> {
        let app = self.app()?;
        confirm("createStreamToTorex", app.createStreamToTorex(to_i96(flow_rate)?)).await
    }

    async fn update_stream(&self, inflow_change: FlowRate) -> Result<TxHash, PortfolioError> {
        let app = self.app()?;
        confirm("updateStreamToTorex", app.updateStreamToTorex(to_i96(inflow_change)?)).await
    }

    async fn delete_stream(&self, remaining_inflow: FlowRate) -> Result<TxHash, PortfolioError> {
        let app = self.app()?;
        confirm("deleteStreamToTorex", app.deleteStreamToTorex(to_i96(remaining_inflow)?)).await
    }

    async fn claim_all(&self, pool: Address) -> Result<TxHash, PortfolioError> {
        let pool = ISuperfluidPool::new(pool, &self.provider);
        confirm("claimAll", pool.claimAll()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int96_conversion_keeps_sign() {
        let rate = FlowRate::new(-115_740_740_740_740).unwrap();
        assert_eq!(i128::try_from(to_i96(rate).unwrap()).unwrap(), rate.get());
        assert_eq!(to_i96(FlowRate::new(FlowRate::MAX).unwrap()).unwrap(), I96::MAX);
    }
}

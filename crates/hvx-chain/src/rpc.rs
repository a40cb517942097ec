//! JSON-RPC implementation of the capability traits.
//!
//! `RpcMarket` is built from a plain HTTP provider; `RpcTradingAccount`
//! additionally carries a wallet and can only be constructed from a signer.

use crate::bindings::{ICollateralToken, IVolatilityIndexOracle, IVolatilityPerpetual};
use crate::error::{ChainError, ChainResult};
use crate::events::{ChainEvent, EventSource, EventStream, LoggedEvent};
use crate::gateway::{
    BoxFuture, ContractAddresses, RawPosition, RawTradePreview, ReadOnlyMarket, TradingAccount,
    TxReceipt,
};
use crate::network::{AddChainParams, NetworkSwitcher, UNRECOGNIZED_CHAIN_CODE};
use crate::revert::RevertRegistry;
use alloy::network::{EthereumWallet, ReceiptResponse};
use alloy::primitives::{Address, I256, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::signers::local::PrivateKeySigner;
use futures_util::StreamExt;
use std::sync::Arc;
use tracing::{debug, info};

type OracleInstance = IVolatilityIndexOracle::IVolatilityIndexOracleInstance<DynProvider>;
type PerpetualInstance = IVolatilityPerpetual::IVolatilityPerpetualInstance<DynProvider>;
type CollateralInstance = ICollateralToken::ICollateralTokenInstance<DynProvider>;

fn http_provider(rpc_url: &str, wallet: Option<EthereumWallet>) -> ChainResult<DynProvider> {
    let url = rpc_url
        .parse()
        .map_err(|e| ChainError::Transport(format!("Invalid RPC URL {rpc_url}: {e}")))?;

    Ok(match wallet {
        Some(wallet) => ProviderBuilder::new()
            .wallet(wallet)
            .connect_http(url)
            .erased(),
        None => ProviderBuilder::new().connect_http(url).erased(),
    })
}

/// Map an alloy contract/transport error onto the chain taxonomy.
fn map_error(reverts: &RevertRegistry, err: alloy::contract::Error) -> ChainError {
    if let alloy::contract::Error::TransportError(transport) = &err {
        if let Some(payload) = transport.as_error_resp() {
            if let Some(data) = payload.as_revert_data() {
                return ChainError::Revert(reverts.decode(&data));
            }
            return reverts
                .classify_rpc(Some(payload.code), &payload.message)
                .unwrap_or_else(|| {
                    ChainError::Transport(format!("RPC error {}: {}", payload.code, payload.message))
                });
        }
    }

    let message = err.to_string();
    reverts
        .classify_rpc(None, &message)
        .unwrap_or(ChainError::Transport(message))
}

fn to_receipt<R: ReceiptResponse>(receipt: &R) -> TxReceipt {
    TxReceipt {
        tx_hash: receipt.transaction_hash(),
        block_number: receipt.block_number(),
        gas_used: receipt.gas_used(),
        success: receipt.status(),
    }
}

// =============================================================================
// Event conversion
// =============================================================================

impl From<IVolatilityPerpetual::PositionOpened> for ChainEvent {
    fn from(e: IVolatilityPerpetual::PositionOpened) -> Self {
        Self::PositionOpened {
            trader: e.trader,
            size_delta: e.sizeDelta,
            margin_delta: e.marginDelta,
            average_price: e.averagePrice,
            timestamp: e.timestamp.saturating_to(),
        }
    }
}

impl From<IVolatilityPerpetual::PositionClosed> for ChainEvent {
    fn from(e: IVolatilityPerpetual::PositionClosed) -> Self {
        Self::PositionClosed {
            trader: e.trader,
            size: e.size,
            margin: e.margin,
            pnl: e.pnl,
            timestamp: e.timestamp.saturating_to(),
        }
    }
}

impl From<IVolatilityPerpetual::FundingSettled> for ChainEvent {
    fn from(e: IVolatilityPerpetual::FundingSettled) -> Self {
        Self::FundingSettled {
            funding_rate: e.fundingRate,
            cumulative_funding_rate: e.cumulativeFundingRate,
            timestamp: e.timestamp.saturating_to(),
        }
    }
}

impl From<IVolatilityPerpetual::Liquidated> for ChainEvent {
    fn from(e: IVolatilityPerpetual::Liquidated) -> Self {
        Self::Liquidated {
            trader: e.trader,
            liquidator: e.liquidator,
            size: e.size,
            liquidation_reward: e.liquidationReward,
            timestamp: e.timestamp.saturating_to(),
        }
    }
}

impl From<IVolatilityIndexOracle::VolatilityUpdated> for ChainEvent {
    fn from(e: IVolatilityIndexOracle::VolatilityUpdated) -> Self {
        Self::VolatilityUpdated {
            new_volatility: e.newVolatility,
            cumulative_price: e.cumulativePrice,
            timestamp: e.timestamp.saturating_to(),
        }
    }
}

// =============================================================================
// RpcMarket
// =============================================================================

/// Read-only access over JSON-RPC.
#[derive(Clone)]
pub struct RpcMarket {
    provider: DynProvider,
    oracle: OracleInstance,
    perpetual: PerpetualInstance,
    collateral: CollateralInstance,
    addresses: ContractAddresses,
    reverts: Arc<RevertRegistry>,
}

impl RpcMarket {
    /// Connect over HTTP.
    pub fn connect(
        rpc_url: &str,
        addresses: ContractAddresses,
        reverts: Arc<RevertRegistry>,
    ) -> ChainResult<Self> {
        let provider = http_provider(rpc_url, None)?;
        info!(rpc_url, perpetual = %addresses.perpetual, "Connected read-only provider");
        Ok(Self::with_provider(provider, addresses, reverts))
    }

    pub fn with_provider(
        provider: DynProvider,
        addresses: ContractAddresses,
        reverts: Arc<RevertRegistry>,
    ) -> Self {
        Self {
            oracle: IVolatilityIndexOracle::new(addresses.oracle, provider.clone()),
            perpetual: IVolatilityPerpetual::new(addresses.perpetual, provider.clone()),
            collateral: ICollateralToken::new(addresses.collateral, provider.clone()),
            provider,
            addresses,
            reverts,
        }
    }

    fn err(&self, e: impl Into<alloy::contract::Error>) -> ChainError {
        map_error(&self.reverts, e.into())
    }
}

impl ReadOnlyMarket for RpcMarket {
    fn chain_id(&self) -> BoxFuture<'_, ChainResult<u64>> {
        Box::pin(async move { self.provider.get_chain_id().await.map_err(|e| self.err(e)) })
    }

    fn annualized_volatility(&self) -> BoxFuture<'_, ChainResult<U256>> {
        Box::pin(async move {
            self.oracle
                .getAnnualizedVolatility()
                .call()
                .await
                .map_err(|e| self.err(e))
        })
    }

    fn oracle_last_update(&self) -> BoxFuture<'_, ChainResult<u64>> {
        Box::pin(async move {
            let raw = self
                .oracle
                .getLastUpdateTime()
                .call()
                .await
                .map_err(|e| self.err(e))?;
            Ok(raw.saturating_to())
        })
    }

    fn base_reserve(&self) -> BoxFuture<'_, ChainResult<U256>> {
        Box::pin(async move {
            self.perpetual
                .vBaseAssetReserve()
                .call()
                .await
                .map_err(|e| self.err(e))
        })
    }

    fn quote_reserve(&self) -> BoxFuture<'_, ChainResult<U256>> {
        Box::pin(async move {
            self.perpetual
                .vQuoteAssetReserve()
                .call()
                .await
                .map_err(|e| self.err(e))
        })
    }

    fn cumulative_funding_rate(&self) -> BoxFuture<'_, ChainResult<I256>> {
        Box::pin(async move {
            self.perpetual
                .cumulativeFundingRate()
                .call()
                .await
                .map_err(|e| self.err(e))
        })
    }

    fn last_funding_time(&self) -> BoxFuture<'_, ChainResult<u64>> {
        Box::pin(async move {
            let raw = self
                .perpetual
                .lastFundingTime()
                .call()
                .await
                .map_err(|e| self.err(e))?;
            Ok(raw.saturating_to())
        })
    }

    fn funding_interval(&self) -> BoxFuture<'_, ChainResult<u64>> {
        Box::pin(async move {
            let raw = self
                .perpetual
                .fundingInterval()
                .call()
                .await
                .map_err(|e| self.err(e))?;
            Ok(raw.saturating_to())
        })
    }

    fn total_long_size(&self) -> BoxFuture<'_, ChainResult<U256>> {
        Box::pin(async move {
            self.perpetual
                .totalLongSize()
                .call()
                .await
                .map_err(|e| self.err(e))
        })
    }

    fn total_short_size(&self) -> BoxFuture<'_, ChainResult<U256>> {
        Box::pin(async move {
            self.perpetual
                .totalShortSize()
                .call()
                .await
                .map_err(|e| self.err(e))
        })
    }

    fn max_leverage(&self) -> BoxFuture<'_, ChainResult<U256>> {
        Box::pin(async move {
            self.perpetual
                .maxLeverage()
                .call()
                .await
                .map_err(|e| self.err(e))
        })
    }

    fn maintenance_margin_ratio(&self) -> BoxFuture<'_, ChainResult<U256>> {
        Box::pin(async move {
            self.perpetual
                .maintenanceMarginRatio()
                .call()
                .await
                .map_err(|e| self.err(e))
        })
    }

    fn liquidation_fee(&self) -> BoxFuture<'_, ChainResult<U256>> {
        Box::pin(async move {
            self.perpetual
                .liquidationFee()
                .call()
                .await
                .map_err(|e| self.err(e))
        })
    }

    fn trading_fee(&self) -> BoxFuture<'_, ChainResult<U256>> {
        Box::pin(async move {
            self.perpetual
                .tradingFee()
                .call()
                .await
                .map_err(|e| self.err(e))
        })
    }

    fn position_details(&self, trader: Address) -> BoxFuture<'_, ChainResult<RawPosition>> {
        Box::pin(async move {
            let details = self
                .perpetual
                .getPositionDetails(trader)
                .call()
                .await
                .map_err(|e| self.err(e))?;

            Ok(RawPosition {
                size: details.size,
                margin: details.margin,
                entry_price: details.entryPrice,
                unrealized_pnl: details.unrealizedPnl,
                notional_value: details.notionalValue,
                leverage: details.leverage,
                margin_ratio: details.marginRatio,
                is_liquidatable: details.isLiquidatable,
                mark_price: details.markPrice,
            })
        })
    }

    fn liquidation_price(&self, trader: Address) -> BoxFuture<'_, ChainResult<U256>> {
        Box::pin(async move {
            self.perpetual
                .getLiquidationPrice(trader)
                .call()
                .await
                .map_err(|e| self.err(e))
        })
    }

    fn trade_preview(&self, size_delta: I256) -> BoxFuture<'_, ChainResult<RawTradePreview>> {
        Box::pin(async move {
            let preview = self
                .perpetual
                .getTradePreview(size_delta)
                .call()
                .await
                .map_err(|e| self.err(e))?;

            Ok(RawTradePreview {
                average_price: preview.averagePrice,
                price_impact: preview.priceImpact,
                trading_fee_cost: preview.tradingFeeCost,
            })
        })
    }

    fn required_margin(&self, size_delta: I256) -> BoxFuture<'_, ChainResult<U256>> {
        Box::pin(async move {
            self.perpetual
                .getRequiredMargin(size_delta)
                .call()
                .await
                .map_err(|e| self.err(e))
        })
    }

    fn collateral_balance(&self, owner: Address) -> BoxFuture<'_, ChainResult<U256>> {
        Box::pin(async move {
            self.collateral
                .balanceOf(owner)
                .call()
                .await
                .map_err(|e| self.err(e))
        })
    }

    fn collateral_allowance(&self, owner: Address) -> BoxFuture<'_, ChainResult<U256>> {
        Box::pin(async move {
            self.collateral
                .allowance(owner, self.addresses.perpetual)
                .call()
                .await
                .map_err(|e| self.err(e))
        })
    }

    fn native_balance(&self, owner: Address) -> BoxFuture<'_, ChainResult<U256>> {
        Box::pin(async move { self.provider.get_balance(owner).await.map_err(|e| self.err(e)) })
    }

    fn gas_price(&self) -> BoxFuture<'_, ChainResult<u128>> {
        Box::pin(async move { self.provider.get_gas_price().await.map_err(|e| self.err(e)) })
    }

    fn block_number(&self) -> BoxFuture<'_, ChainResult<u64>> {
        Box::pin(async move {
            self.provider
                .get_block_number()
                .await
                .map_err(|e| self.err(e))
        })
    }

    fn position_opened_logs(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> BoxFuture<'_, ChainResult<Vec<LoggedEvent>>> {
        Box::pin(async move {
            let logs = self
                .perpetual
                .PositionOpened_filter()
                .from_block(from_block)
                .to_block(to_block)
                .query()
                .await
                .map_err(|e| self.err(e))?;

            debug!(from_block, to_block, count = logs.len(), "Fetched PositionOpened logs");
            Ok(logs
                .into_iter()
                .map(|(event, log)| LoggedEvent {
                    block_number: log.block_number,
                    event: event.into(),
                })
                .collect())
        })
    }

    fn funding_settled_logs(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> BoxFuture<'_, ChainResult<Vec<LoggedEvent>>> {
        Box::pin(async move {
            let logs = self
                .perpetual
                .FundingSettled_filter()
                .from_block(from_block)
                .to_block(to_block)
                .query()
                .await
                .map_err(|e| self.err(e))?;

            Ok(logs
                .into_iter()
                .map(|(event, log)| LoggedEvent {
                    block_number: log.block_number,
                    event: event.into(),
                })
                .collect())
        })
    }
}

impl EventSource for RpcMarket {
    fn subscribe(&self) -> BoxFuture<'_, ChainResult<EventStream>> {
        Box::pin(async move {
            let opened = self
                .perpetual
                .PositionOpened_filter()
                .watch()
                .await
                .map_err(|e| self.err(e))?;
            let closed = self
                .perpetual
                .PositionClosed_filter()
                .watch()
                .await
                .map_err(|e| self.err(e))?;
            let funding = self
                .perpetual
                .FundingSettled_filter()
                .watch()
                .await
                .map_err(|e| self.err(e))?;
            let liquidated = self
                .perpetual
                .Liquidated_filter()
                .watch()
                .await
                .map_err(|e| self.err(e))?;
            let volatility = self
                .oracle
                .VolatilityUpdated_filter()
                .watch()
                .await
                .map_err(|e| self.err(e))?;

            fn decoded<E: Into<ChainEvent>, L>(
                item: Result<(E, L), alloy::sol_types::Error>,
            ) -> ChainResult<ChainEvent> {
                item.map(|(event, _)| event.into())
                    .map_err(|e| ChainError::Decode(e.to_string()))
            }

            let streams: Vec<EventStream> = vec![
                Box::pin(opened.into_stream().map(decoded)),
                Box::pin(closed.into_stream().map(decoded)),
                Box::pin(funding.into_stream().map(decoded)),
                Box::pin(liquidated.into_stream().map(decoded)),
                Box::pin(volatility.into_stream().map(decoded)),
            ];

            info!("Subscribed to perpetual and oracle events");
            Ok(Box::pin(futures_util::stream::select_all(streams)) as EventStream)
        })
    }
}

// =============================================================================
// RpcTradingAccount
// =============================================================================

/// Signing access over JSON-RPC. Only constructible from a signer.
#[derive(Clone)]
pub struct RpcTradingAccount {
    account: Address,
    perpetual: PerpetualInstance,
    collateral: CollateralInstance,
    addresses: ContractAddresses,
    reverts: Arc<RevertRegistry>,
}

impl RpcTradingAccount {
    pub fn connect(
        rpc_url: &str,
        addresses: ContractAddresses,
        signer: PrivateKeySigner,
        reverts: Arc<RevertRegistry>,
    ) -> ChainResult<Self> {
        let account = signer.address();
        let provider = http_provider(rpc_url, Some(EthereumWallet::from(signer)))?;
        info!(%account, "Connected signing provider");

        Ok(Self {
            account,
            perpetual: IVolatilityPerpetual::new(addresses.perpetual, provider.clone()),
            collateral: ICollateralToken::new(addresses.collateral, provider),
            addresses,
            reverts,
        })
    }

    fn err(&self, e: impl Into<alloy::contract::Error>) -> ChainError {
        map_error(&self.reverts, e.into())
    }
}

impl TradingAccount for RpcTradingAccount {
    fn account(&self) -> Address {
        self.account
    }

    fn approve_collateral(&self, amount: U256) -> BoxFuture<'_, ChainResult<TxReceipt>> {
        Box::pin(async move {
            let pending = self
                .collateral
                .approve(self.addresses.perpetual, amount)
                .from(self.account)
                .send()
                .await
                .map_err(|e| self.err(e))?;
            debug!(tx_hash = %pending.tx_hash(), "Approval submitted");

            let receipt = pending
                .get_receipt()
                .await
                .map_err(|e| ChainError::Transport(e.to_string()))?;
            Ok(to_receipt(&receipt))
        })
    }

    fn estimate_open_position(
        &self,
        size_delta: I256,
        margin_delta: U256,
    ) -> BoxFuture<'_, ChainResult<u64>> {
        Box::pin(async move {
            self.perpetual
                .openPosition(size_delta, margin_delta)
                .from(self.account)
                .estimate_gas()
                .await
                .map_err(|e| self.err(e))
        })
    }

    fn open_position(
        &self,
        size_delta: I256,
        margin_delta: U256,
        gas_limit: u64,
    ) -> BoxFuture<'_, ChainResult<TxReceipt>> {
        Box::pin(async move {
            let pending = self
                .perpetual
                .openPosition(size_delta, margin_delta)
                .from(self.account)
                .gas(gas_limit)
                .send()
                .await
                .map_err(|e| self.err(e))?;
            debug!(tx_hash = %pending.tx_hash(), gas_limit, "openPosition submitted");

            let receipt = pending
                .get_receipt()
                .await
                .map_err(|e| ChainError::Transport(e.to_string()))?;
            Ok(to_receipt(&receipt))
        })
    }

    fn close_position(&self) -> BoxFuture<'_, ChainResult<TxReceipt>> {
        Box::pin(async move {
            let pending = self
                .perpetual
                .closePosition()
                .from(self.account)
                .send()
                .await
                .map_err(|e| self.err(e))?;
            debug!(tx_hash = %pending.tx_hash(), "closePosition submitted");

            let receipt = pending
                .get_receipt()
                .await
                .map_err(|e| ChainError::Transport(e.to_string()))?;
            Ok(to_receipt(&receipt))
        })
    }

    fn liquidate(&self, trader: Address) -> BoxFuture<'_, ChainResult<TxReceipt>> {
        Box::pin(async move {
            let pending = self
                .perpetual
                .liquidate(trader)
                .from(self.account)
                .send()
                .await
                .map_err(|e| self.err(e))?;
            debug!(tx_hash = %pending.tx_hash(), %trader, "liquidate submitted");

            let receipt = pending
                .get_receipt()
                .await
                .map_err(|e| ChainError::Transport(e.to_string()))?;
            Ok(to_receipt(&receipt))
        })
    }

    fn request_faucet(&self, amount: U256) -> BoxFuture<'_, ChainResult<TxReceipt>> {
        Box::pin(async move {
            let pending = self
                .collateral
                .faucet(self.account, amount)
                .from(self.account)
                .send()
                .await
                .map_err(|e| self.err(e))?;

            let receipt = pending
                .get_receipt()
                .await
                .map_err(|e| ChainError::Transport(e.to_string()))?;
            Ok(to_receipt(&receipt))
        })
    }
}

// =============================================================================
// Wallet network switching
// =============================================================================

/// Sends `wallet_*` requests to a wallet-backed JSON-RPC endpoint.
#[derive(Clone)]
pub struct RpcNetworkSwitcher {
    provider: DynProvider,
    reverts: Arc<RevertRegistry>,
}

impl RpcNetworkSwitcher {
    pub fn connect(wallet_rpc_url: &str, reverts: Arc<RevertRegistry>) -> ChainResult<Self> {
        Ok(Self {
            provider: http_provider(wallet_rpc_url, None)?,
            reverts,
        })
    }

    async fn wallet_request(
        &self,
        method: &'static str,
        params: serde_json::Value,
    ) -> ChainResult<()> {
        self.provider
            .raw_request::<_, serde_json::Value>(method.into(), params)
            .await
            .map(|_| ())
            .map_err(|e| {
                let code = e.as_error_resp().map(|payload| payload.code);
                if code == Some(UNRECOGNIZED_CHAIN_CODE) {
                    return ChainError::UnknownChain(0);
                }
                map_error(&self.reverts, e.into())
            })
    }
}

impl NetworkSwitcher for RpcNetworkSwitcher {
    fn switch_chain(&self, chain_id_hex: String) -> BoxFuture<'_, ChainResult<()>> {
        Box::pin(async move {
            let params = serde_json::json!([{ "chainId": chain_id_hex }]);
            self.wallet_request("wallet_switchEthereumChain", params)
                .await
                .map_err(|e| match e {
                    ChainError::UnknownChain(_) => ChainError::UnknownChain(
                        u64::from_str_radix(chain_id_hex.trim_start_matches("0x"), 16)
                            .unwrap_or_default(),
                    ),
                    other => other,
                })
        })
    }

    fn add_chain(&self, params: AddChainParams) -> BoxFuture<'_, ChainResult<()>> {
        Box::pin(async move {
            let params = serde_json::to_value(&params)
                .map_err(|e| ChainError::Decode(e.to_string()))?;
            self.wallet_request("wallet_addEthereumChain", serde_json::Value::Array(vec![params]))
                .await
        })
    }
}

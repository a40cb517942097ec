//! Mutation executor.
//!
//! Runs every write as a small state machine observable through a watch
//! channel:
//!
//! ```text
//! Idle → Approving → Submitting → Confirmed
//!                              ↘ Failed
//! ```
//!
//! # Open Position Order (Strict)
//!
//! 1. ChainGuard                               → WrongNetwork
//! 2. Validation with the collateral balance   → InvalidInput / InsufficientBalance /
//!                                               ExcessivePriceImpact / InsufficientMargin
//! 3. Allowance < margin                       → approve `multiplier × margin`, await receipt
//! 4. Gas estimate + margin vs native balance  → InsufficientGasFunds
//! 5. Submit, await receipt                    → Confirmed
//!
//! Mutations of one account are serialized. Nothing is retried: a failure
//! surfaces immediately with its decoded category. On confirmation the
//! affected cache scopes are invalidated.

use crate::config::TradeConfig;
use crate::error::{TradeError, TradeResult};
use crate::validator::TradeValidator;
use alloy::primitives::{Address, B256, U256};
use hvx_chain::{
    ChainError, ChainGuard, DecodedRevert, ReadOnlyMarket, TradingAccount, TxReceipt,
};
use hvx_core::fixed::{decimal_to_i256, decimal_to_u256, i256_to_decimal, u256_to_decimal};
use hvx_core::{DecimalConvention, Direction, ErrorCategory, Size, TradePreview};
use hvx_sync::{InvalidationTrigger, Invalidator, RefreshScope};
use hvx_telemetry::Metrics;
use rust_decimal::Decimal;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{watch, Mutex as TokioMutex};
use tracing::{debug, info, warn};

// ============================================================================
// State
// ============================================================================

/// Kind of write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    OpenPosition,
    ClosePosition,
    Liquidate,
    Faucet,
}

impl MutationKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenPosition => "open_position",
            Self::ClosePosition => "close_position",
            Self::Liquidate => "liquidate",
            Self::Faucet => "faucet",
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable progress of the current (or last) mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationState {
    Idle,
    /// Waiting for the collateral approval to be mined.
    Approving { kind: MutationKind },
    Submitting { kind: MutationKind },
    Confirmed { kind: MutationKind, tx_hash: B256 },
    Failed {
        kind: MutationKind,
        category: ErrorCategory,
        message: String,
    },
}

impl MutationState {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Confirmed { .. } | Self::Failed { .. })
    }
}

// ============================================================================
// Executor
// ============================================================================

/// Write path for one signing account.
pub struct MutationExecutor {
    reader: Arc<dyn ReadOnlyMarket>,
    trader: Arc<dyn TradingAccount>,
    guard: ChainGuard,
    validator: TradeValidator,
    invalidator: Invalidator,
    convention: DecimalConvention,
    config: TradeConfig,
    state: watch::Sender<MutationState>,
    serial: TokioMutex<()>,
}

impl MutationExecutor {
    pub fn new(
        reader: Arc<dyn ReadOnlyMarket>,
        trader: Arc<dyn TradingAccount>,
        guard: ChainGuard,
        invalidator: Invalidator,
        convention: DecimalConvention,
        config: TradeConfig,
    ) -> Self {
        let validator =
            TradeValidator::new(Arc::clone(&reader), convention, config.max_price_impact);
        let (state, _) = watch::channel(MutationState::Idle);
        Self {
            reader,
            trader,
            guard,
            validator,
            invalidator,
            convention,
            config,
            state,
            serial: TokioMutex::new(()),
        }
    }

    /// Signing account.
    #[inline]
    pub fn account(&self) -> Address {
        self.trader.account()
    }

    pub fn subscribe(&self) -> watch::Receiver<MutationState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> MutationState {
        self.state.borrow().clone()
    }

    /// Guarded contract quote, without validating.
    pub async fn preview(&self, size_delta: Size) -> TradeResult<TradePreview> {
        self.guard.assert_network(self.reader.as_ref()).await?;
        self.validator.preview(size_delta).await
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    pub async fn open_position(
        &self,
        direction: Direction,
        size: Size,
        margin: Decimal,
    ) -> TradeResult<TxReceipt> {
        let account = self.account();
        self.execute(
            MutationKind::OpenPosition,
            vec![RefreshScope::Market, RefreshScope::Account(account)],
            self.open_flow(direction.signed(size), margin),
        )
        .await
    }

    pub async fn close_position(&self) -> TradeResult<TxReceipt> {
        let account = self.account();
        self.execute(
            MutationKind::ClosePosition,
            vec![RefreshScope::Market, RefreshScope::Account(account)],
            self.close_flow(),
        )
        .await
    }

    pub async fn liquidate(&self, target: Address) -> TradeResult<TxReceipt> {
        let account = self.account();
        self.execute(
            MutationKind::Liquidate,
            vec![
                RefreshScope::Market,
                RefreshScope::Account(account),
                RefreshScope::Account(target),
            ],
            self.liquidate_flow(target),
        )
        .await
    }

    /// Mint testnet collateral to the signing account.
    pub async fn request_faucet(&self, amount: Decimal) -> TradeResult<TxReceipt> {
        let account = self.account();
        self.execute(
            MutationKind::Faucet,
            vec![RefreshScope::Account(account)],
            self.faucet_flow(amount),
        )
        .await
    }

    // ========================================================================
    // Flows
    // ========================================================================

    async fn open_flow(&self, size_delta: Size, margin: Decimal) -> TradeResult<TxReceipt> {
        let c = &self.convention;
        let account = self.account();
        self.guard.assert_network(self.reader.as_ref()).await?;

        let (raw_balance, raw_allowance) = tokio::try_join!(
            self.reader.collateral_balance(account),
            self.reader.collateral_allowance(account),
        )?;
        let balance = u256_to_decimal(raw_balance, c.collateral_decimals)?;
        let preview = self.validator.validate(size_delta, margin, balance).await?;

        let raw_size = decimal_to_i256(size_delta.inner(), c.size_decimals)?;
        let raw_margin = decimal_to_u256(margin, c.collateral_decimals)?;

        if raw_allowance < raw_margin {
            self.transition(MutationState::Approving {
                kind: MutationKind::OpenPosition,
            });
            let amount = raw_margin.saturating_mul(U256::from(self.config.approval_multiplier));
            info!(%amount, "Approving collateral");
            let receipt = self.trader.approve_collateral(amount).await?;
            ensure_mined(&receipt, "approve")?;
        }

        let estimate = self
            .trader
            .estimate_open_position(raw_size, raw_margin)
            .await?;
        let gas_limit = self.config.gas_limit(estimate);
        let (gas_price, native) = tokio::try_join!(
            self.reader.gas_price(),
            self.reader.native_balance(account),
        )?;
        let gas_cost = U256::from(gas_limit).saturating_mul(U256::from(gas_price));
        if native < gas_cost {
            return Err(TradeError::InsufficientGasFunds {
                required: gas_cost,
                available: native,
            });
        }

        self.transition(MutationState::Submitting {
            kind: MutationKind::OpenPosition,
        });
        info!(
            size_delta = %size_delta,
            margin = %margin,
            average_price = %preview.average_price,
            impact = %preview.price_impact,
            gas_limit,
            "Opening position"
        );
        Ok(self
            .trader
            .open_position(raw_size, raw_margin, gas_limit)
            .await?)
    }

    async fn close_flow(&self) -> TradeResult<TxReceipt> {
        let c = &self.convention;
        let account = self.account();
        self.guard.assert_network(self.reader.as_ref()).await?;

        let (raw, base_reserve) = tokio::try_join!(
            self.reader.position_details(account),
            self.reader.base_reserve(),
        )?;
        if !raw.is_open() {
            return Err(TradeError::NoPosition(account));
        }

        // Closing pushes the position's size back into the base reserve.
        let remaining = u256_to_decimal(base_reserve, c.size_decimals)?
            + i256_to_decimal(raw.size, c.size_decimals)?;
        if remaining <= Decimal::ZERO {
            return Err(TradeError::InvalidReserveState { remaining });
        }

        self.transition(MutationState::Submitting {
            kind: MutationKind::ClosePosition,
        });
        info!(%account, "Closing position");
        Ok(self.trader.close_position().await?)
    }

    async fn liquidate_flow(&self, target: Address) -> TradeResult<TxReceipt> {
        self.guard.assert_network(self.reader.as_ref()).await?;

        let raw = self.reader.position_details(target).await?;
        if !raw.is_open() {
            return Err(TradeError::NoPosition(target));
        }
        if !raw.is_liquidatable {
            debug!(%target, "Contract does not flag the position as liquidatable");
        }

        self.transition(MutationState::Submitting {
            kind: MutationKind::Liquidate,
        });
        info!(%target, "Liquidating position");
        Ok(self.trader.liquidate(target).await?)
    }

    async fn faucet_flow(&self, amount: Decimal) -> TradeResult<TxReceipt> {
        if amount <= Decimal::ZERO {
            return Err(TradeError::InvalidInput(format!(
                "faucet amount must be positive, got {amount}"
            )));
        }
        self.guard.assert_network(self.reader.as_ref()).await?;
        let raw = decimal_to_u256(amount, self.convention.collateral_decimals)?;

        self.transition(MutationState::Submitting {
            kind: MutationKind::Faucet,
        });
        info!(%amount, "Requesting faucet collateral");
        Ok(self.trader.request_faucet(raw).await?)
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn execute<F>(
        &self,
        kind: MutationKind,
        scopes: Vec<RefreshScope>,
        flow: F,
    ) -> TradeResult<TxReceipt>
    where
        F: Future<Output = TradeResult<TxReceipt>>,
    {
        let _serial = self.serial.lock().await;
        self.transition(MutationState::Idle);

        let result = flow
            .await
            .and_then(|receipt| ensure_mined(&receipt, kind.as_str()).map(|()| receipt));

        match result {
            Ok(receipt) => {
                info!(
                    kind = kind.as_str(),
                    tx_hash = %receipt.tx_hash,
                    block = ?receipt.block_number,
                    gas_used = receipt.gas_used,
                    "Mutation confirmed"
                );
                Metrics::mutation(kind.as_str(), "confirmed");
                self.invalidator
                    .invalidate_all(&scopes, InvalidationTrigger::Mutation);
                self.transition(MutationState::Confirmed {
                    kind,
                    tx_hash: receipt.tx_hash,
                });
                Ok(receipt)
            }
            Err(e) => {
                let category = e.category();
                warn!(kind = kind.as_str(), error = %e, category = %category, "Mutation failed");
                Metrics::mutation(kind.as_str(), category.as_str());
                self.transition(MutationState::Failed {
                    kind,
                    category,
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    fn transition(&self, next: MutationState) {
        debug!(state = ?next, "Mutation state");
        self.state.send_replace(next);
    }
}

/// A mined transaction that reverted is a contract failure.
fn ensure_mined(receipt: &TxReceipt, step: &str) -> TradeResult<()> {
    if receipt.success {
        return Ok(());
    }
    Err(TradeError::Chain(ChainError::Revert(DecodedRevert {
        category: ErrorCategory::ContractCallException,
        selector: None,
        reason: format!("{step} transaction {} reverted", receipt.tx_hash),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::I256;
    use hvx_chain::mock::scaled;
    use hvx_chain::{MockChain, RawPosition, RawTradePreview, MOCK_ACCOUNT};
    use hvx_sync::{RefreshRequest, SnapshotCache};
    use rust_decimal_macros::dec;
    use tokio::sync::mpsc;

    struct Harness {
        chain: Arc<MockChain>,
        executor: MutationExecutor,
        requests: mpsc::UnboundedReceiver<RefreshRequest>,
    }

    fn harness() -> Harness {
        let chain = Arc::new(MockChain::new(998));
        chain.set_collateral_balance(MOCK_ACCOUNT, scaled(1_000, 18));
        chain.set_native_balance(MOCK_ACCOUNT, scaled(1, 18));
        let (invalidator, requests) = Invalidator::new(Arc::new(SnapshotCache::new()));
        let executor = MutationExecutor::new(
            chain.clone(),
            chain.clone(),
            ChainGuard::new(998),
            invalidator,
            DecimalConvention::WAD_V2,
            TradeConfig::default(),
        );
        Harness {
            chain,
            executor,
            requests,
        }
    }

    fn drain(requests: &mut mpsc::UnboundedReceiver<RefreshRequest>) -> Vec<RefreshScope> {
        let mut scopes = Vec::new();
        while let Ok(request) = requests.try_recv() {
            assert_eq!(request.trigger, InvalidationTrigger::Mutation);
            scopes.push(request.scope);
        }
        scopes
    }

    fn long_position(size: u64) -> RawPosition {
        RawPosition {
            size: I256::try_from(scaled(size, 18)).unwrap(),
            margin: scaled(50, 18),
            mark_price: scaled(2, 17),
            ..RawPosition::default()
        }
    }

    #[tokio::test]
    async fn test_open_approves_then_submits() {
        let mut h = harness();
        let mut states = h.executor.subscribe();

        let receipt = h
            .executor
            .open_position(Direction::Long, Size::new(dec!(100)), dec!(50))
            .await
            .unwrap();

        assert!(receipt.success);
        assert_eq!(h.chain.approvals(), vec![scaled(100, 18)]);
        assert_eq!(h.chain.gas_limits(), vec![300_000]);
        assert_eq!(h.chain.opened_positions().len(), 1);
        assert_eq!(
            drain(&mut h.requests),
            vec![RefreshScope::Market, RefreshScope::Account(MOCK_ACCOUNT)]
        );
        assert!(matches!(
            *states.borrow_and_update(),
            MutationState::Confirmed {
                kind: MutationKind::OpenPosition,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_open_skips_approval_with_allowance() {
        let h = harness();
        h.chain.set_allowance(MOCK_ACCOUNT, scaled(50, 18));

        h.executor
            .open_position(Direction::Short, Size::new(dec!(100)), dec!(50))
            .await
            .unwrap();

        assert!(h.chain.approvals().is_empty());
        let (size, margin) = h.chain.opened_positions()[0];
        assert!(size.is_negative());
        assert_eq!(margin, scaled(50, 18));
    }

    #[tokio::test]
    async fn test_excessive_impact_sends_nothing() {
        let mut h = harness();
        h.chain.set_trade_preview(RawTradePreview {
            average_price: scaled(2, 17),
            price_impact: scaled(12, 16),
            trading_fee_cost: U256::ZERO,
        });

        let err = h
            .executor
            .open_position(Direction::Long, Size::new(dec!(100)), dec!(50))
            .await
            .unwrap_err();

        assert_eq!(err.category(), ErrorCategory::ExcessivePriceImpact);
        assert!(h.chain.approvals().is_empty());
        assert!(h.chain.opened_positions().is_empty());
        assert!(drain(&mut h.requests).is_empty());
        assert!(matches!(
            h.executor.state(),
            MutationState::Failed {
                category: ErrorCategory::ExcessivePriceImpact,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_insufficient_balance_sends_nothing() {
        let h = harness();
        h.chain.set_collateral_balance(MOCK_ACCOUNT, scaled(10, 18));

        let err = h
            .executor
            .open_position(Direction::Long, Size::new(dec!(100)), dec!(50))
            .await
            .unwrap_err();

        assert_eq!(err.category(), ErrorCategory::InsufficientBalance);
        assert!(h.chain.opened_positions().is_empty());
    }

    #[tokio::test]
    async fn test_insufficient_gas_funds() {
        let h = harness();
        h.chain.set_native_balance(MOCK_ACCOUNT, U256::from(1_000u64));

        let err = h
            .executor
            .open_position(Direction::Long, Size::new(dec!(100)), dec!(50))
            .await
            .unwrap_err();

        assert_eq!(err.category(), ErrorCategory::InsufficientGasFunds);
        assert!(h.chain.opened_positions().is_empty());
    }

    #[tokio::test]
    async fn test_wrong_network_blocks_writes() {
        let h = harness();
        h.chain.set_chain_id(1);

        let err = h.executor.close_position().await.unwrap_err();

        assert_eq!(err.category(), ErrorCategory::WrongNetwork);
        assert_eq!(h.chain.close_count(), 0);
        assert_eq!(h.chain.read_count("position_details"), 0);
    }

    #[tokio::test]
    async fn test_close_without_position() {
        let h = harness();

        let err = h.executor.close_position().await.unwrap_err();

        assert!(matches!(err, TradeError::NoPosition(a) if a == MOCK_ACCOUNT));
        assert_eq!(h.chain.close_count(), 0);
    }

    #[tokio::test]
    async fn test_close_rejects_invalid_reserve_state() {
        let h = harness();
        h.chain.set_reserves(scaled(50, 18), scaled(10, 18));
        h.chain.set_position(
            MOCK_ACCOUNT,
            RawPosition {
                size: -I256::try_from(scaled(100, 18)).unwrap(),
                ..long_position(0)
            },
        );

        let err = h.executor.close_position().await.unwrap_err();

        assert_eq!(err.category(), ErrorCategory::InvalidReserveState);
        assert_eq!(h.chain.close_count(), 0);
    }

    #[tokio::test]
    async fn test_close_invalidates_market_and_account() {
        let mut h = harness();
        h.chain.set_position(MOCK_ACCOUNT, long_position(100));

        h.executor.close_position().await.unwrap();

        assert_eq!(h.chain.close_count(), 1);
        assert_eq!(
            drain(&mut h.requests),
            vec![RefreshScope::Market, RefreshScope::Account(MOCK_ACCOUNT)]
        );
    }

    #[tokio::test]
    async fn test_liquidate_requires_target_position() {
        let mut h = harness();
        let target = Address::repeat_byte(0x42);

        let err = h.executor.liquidate(target).await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::NoPosition);

        h.chain.set_position(target, long_position(100));
        h.executor.liquidate(target).await.unwrap();

        assert_eq!(h.chain.liquidations(), vec![target]);
        assert!(drain(&mut h.requests).contains(&RefreshScope::Account(target)));
    }

    #[tokio::test]
    async fn test_reverted_receipt_fails_without_invalidation() {
        let mut h = harness();
        h.chain.set_position(MOCK_ACCOUNT, long_position(100));
        h.chain.mine_reverted(true);

        let err = h.executor.close_position().await.unwrap_err();

        assert_eq!(err.category(), ErrorCategory::ContractCallException);
        assert!(drain(&mut h.requests).is_empty());
    }

    #[tokio::test]
    async fn test_decoded_revert_surfaces_category() {
        let h = harness();
        h.chain.revert_writes(Some(DecodedRevert {
            category: ErrorCategory::InsufficientMargin,
            selector: Some([0x69, 0x79, 0xbd, 0x5a]),
            reason: "insufficient balance or margin".to_string(),
        }));

        let err = h
            .executor
            .open_position(Direction::Long, Size::new(dec!(100)), dec!(50))
            .await
            .unwrap_err();

        assert_eq!(err.category(), ErrorCategory::InsufficientMargin);
    }

    #[tokio::test]
    async fn test_user_rejection_is_not_retried() {
        let h = harness();
        h.chain.set_position(MOCK_ACCOUNT, long_position(100));
        h.chain.reject_wallet_requests(true);

        let err = h.executor.close_position().await.unwrap_err();

        assert_eq!(err.category(), ErrorCategory::UserRejected);
        assert_eq!(h.chain.close_count(), 0);
    }

    #[tokio::test]
    async fn test_faucet_invalidates_account_only() {
        let mut h = harness();

        h.executor.request_faucet(dec!(500)).await.unwrap();

        assert_eq!(h.chain.faucet_requests(), vec![scaled(500, 18)]);
        assert_eq!(
            drain(&mut h.requests),
            vec![RefreshScope::Account(MOCK_ACCOUNT)]
        );
        assert!(h.executor.request_faucet(Decimal::ZERO).await.is_err());
    }
}

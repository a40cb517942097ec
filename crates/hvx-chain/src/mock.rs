//! In-memory chain for tests.
//!
//! `MockChain` implements every capability trait against a small simulated
//! vAMM. Writes move the reserves along `base * quote = k`, record what was
//! submitted and emit the matching event to live subscribers.

use crate::error::{ChainError, ChainResult};
use crate::events::{ChainEvent, EventSource, EventStream, LoggedEvent};
use crate::gateway::{
    BoxFuture, RawPosition, RawTradePreview, ReadOnlyMarket, TradingAccount, TxReceipt,
};
use crate::network::{AddChainParams, NetworkSwitcher};
use crate::revert::DecodedRevert;
use alloy::primitives::{address, Address, B256, I256, U256};
use hvx_core::ErrorCategory;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::mpsc;

/// Account used by `MockChain::new`.
pub const MOCK_ACCOUNT: Address = address!("00000000000000000000000000000000000000aa");

/// `mantissa * 10^decimals` as a raw on-chain value.
pub fn scaled(mantissa: u64, decimals: u8) -> U256 {
    U256::from(mantissa) * U256::from(10u64).pow(U256::from(decimals))
}

fn wad() -> U256 {
    scaled(1, 18)
}

#[derive(Debug, Clone)]
struct MockState {
    chain_id: u64,
    volatility: U256,
    oracle_last_update: u64,
    base_reserve: U256,
    quote_reserve: U256,
    cumulative_funding_rate: I256,
    last_funding_time: u64,
    funding_interval: u64,
    total_long: U256,
    total_short: U256,
    max_leverage: U256,
    maintenance_margin_ratio: U256,
    liquidation_fee: U256,
    trading_fee: U256,

    positions: HashMap<Address, RawPosition>,
    liquidation_prices: HashMap<Address, U256>,
    preview: Option<RawTradePreview>,
    required_margin: Option<U256>,
    collateral: HashMap<Address, U256>,
    allowances: HashMap<Address, U256>,
    native: HashMap<Address, U256>,
    gas_price: u128,
    gas_estimate: u64,
    block_number: u64,
    logs: Vec<LoggedEvent>,

    failing_reads: HashSet<String>,
    read_counts: HashMap<&'static str, usize>,
    read_delay: Option<Duration>,
    write_revert: Option<DecodedRevert>,
    mine_reverted: bool,

    known_chains: Vec<String>,
    reject_wallet: bool,
    added_chains: Vec<AddChainParams>,

    approvals: Vec<U256>,
    gas_limits: Vec<u64>,
    opened: Vec<(I256, U256)>,
    closes: usize,
    liquidations: Vec<Address>,
    faucet_requests: Vec<U256>,
    tx_counter: u8,
}

impl MockState {
    fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            volatility: scaled(2, 17),
            oracle_last_update: 1_700_000_000,
            base_reserve: scaled(1_000, 18),
            quote_reserve: scaled(200, 18),
            cumulative_funding_rate: I256::ZERO,
            last_funding_time: 1_700_000_000,
            funding_interval: 3_600,
            total_long: U256::ZERO,
            total_short: U256::ZERO,
            max_leverage: scaled(10, 18),
            maintenance_margin_ratio: scaled(5, 16),
            liquidation_fee: scaled(25, 15),
            trading_fee: scaled(3, 15),
            positions: HashMap::new(),
            liquidation_prices: HashMap::new(),
            preview: None,
            required_margin: None,
            collateral: HashMap::new(),
            allowances: HashMap::new(),
            native: HashMap::new(),
            gas_price: 1_000_000_000,
            gas_estimate: 250_000,
            block_number: 1_000,
            logs: Vec::new(),
            failing_reads: HashSet::new(),
            read_counts: HashMap::new(),
            read_delay: None,
            write_revert: None,
            mine_reverted: false,
            known_chains: vec![format!("0x{chain_id:x}")],
            reject_wallet: false,
            added_chains: Vec::new(),
            approvals: Vec::new(),
            gas_limits: Vec::new(),
            opened: Vec::new(),
            closes: 0,
            liquidations: Vec::new(),
            faucet_requests: Vec::new(),
            tx_counter: 0,
        }
    }

    /// Mark price in wad: quote * 1e18 / base.
    fn mark(&self) -> U256 {
        if self.base_reserve.is_zero() {
            return U256::ZERO;
        }
        self.quote_reserve * wad() / self.base_reserve
    }

    fn next_receipt(&mut self) -> TxReceipt {
        self.tx_counter = self.tx_counter.wrapping_add(1);
        self.block_number += 1;
        TxReceipt {
            tx_hash: B256::with_last_byte(self.tx_counter),
            block_number: Some(self.block_number),
            gas_used: 21_000,
            success: !self.mine_reverted,
        }
    }

    fn record_event(&mut self, event: ChainEvent) {
        self.logs.push(LoggedEvent {
            block_number: Some(self.block_number),
            event,
        });
    }
}

/// Simulated chain, wallet and contracts.
pub struct MockChain {
    account: Address,
    state: Mutex<MockState>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<ChainResult<ChainEvent>>>>,
}

impl MockChain {
    pub fn new(chain_id: u64) -> Self {
        Self::with_account(chain_id, MOCK_ACCOUNT)
    }

    pub fn with_account(chain_id: u64, account: Address) -> Self {
        Self {
            account,
            state: Mutex::new(MockState::new(chain_id)),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    // =========================================================================
    // Setup
    // =========================================================================

    pub fn set_chain_id(&self, chain_id: u64) {
        self.state.lock().chain_id = chain_id;
    }

    pub fn set_volatility(&self, raw: U256) {
        self.state.lock().volatility = raw;
    }

    pub fn set_reserves(&self, base: U256, quote: U256) {
        let mut state = self.state.lock();
        state.base_reserve = base;
        state.quote_reserve = quote;
    }

    pub fn set_open_interest(&self, longs: U256, shorts: U256) {
        let mut state = self.state.lock();
        state.total_long = longs;
        state.total_short = shorts;
    }

    pub fn set_funding(&self, cumulative: I256, last_funding_time: u64, interval: u64) {
        let mut state = self.state.lock();
        state.cumulative_funding_rate = cumulative;
        state.last_funding_time = last_funding_time;
        state.funding_interval = interval;
    }

    pub fn set_max_leverage(&self, raw: U256) {
        self.state.lock().max_leverage = raw;
    }

    pub fn set_position(&self, trader: Address, position: RawPosition) {
        self.state.lock().positions.insert(trader, position);
    }

    pub fn set_liquidation_price(&self, trader: Address, raw: U256) {
        self.state.lock().liquidation_prices.insert(trader, raw);
    }

    /// Fixed trade preview. Without one the preview quotes the current mark.
    pub fn set_trade_preview(&self, preview: RawTradePreview) {
        self.state.lock().preview = Some(preview);
    }

    /// Fixed required margin. Without one it is notional / max leverage.
    pub fn set_required_margin(&self, raw: U256) {
        self.state.lock().required_margin = Some(raw);
    }

    pub fn set_collateral_balance(&self, owner: Address, raw: U256) {
        self.state.lock().collateral.insert(owner, raw);
    }

    pub fn set_allowance(&self, owner: Address, raw: U256) {
        self.state.lock().allowances.insert(owner, raw);
    }

    pub fn set_native_balance(&self, owner: Address, raw: U256) {
        self.state.lock().native.insert(owner, raw);
    }

    pub fn set_gas(&self, gas_price: u128, gas_estimate: u64) {
        let mut state = self.state.lock();
        state.gas_price = gas_price;
        state.gas_estimate = gas_estimate;
    }

    pub fn set_block_number(&self, block: u64) {
        self.state.lock().block_number = block;
    }

    pub fn push_log(&self, log: LoggedEvent) {
        self.state.lock().logs.push(log);
    }

    /// Make every read named `method` fail with a transport error.
    pub fn fail_reads(&self, method: &str) {
        self.state.lock().failing_reads.insert(method.to_string());
    }

    pub fn restore_reads(&self) {
        self.state.lock().failing_reads.clear();
    }

    /// Delay every read by `delay`.
    pub fn set_read_delay(&self, delay: Option<Duration>) {
        self.state.lock().read_delay = delay;
    }

    /// Revert every subsequent write with `revert`.
    pub fn revert_writes(&self, revert: Option<DecodedRevert>) {
        self.state.lock().write_revert = revert;
    }

    /// Mine writes with a failed status.
    pub fn mine_reverted(&self, reverted: bool) {
        self.state.lock().mine_reverted = reverted;
    }

    /// Chains the wallet knows (hex ids).
    pub fn set_known_chains(&self, chains: Vec<String>) {
        self.state.lock().known_chains = chains;
    }

    /// Decline every wallet request and transaction.
    pub fn reject_wallet_requests(&self, reject: bool) {
        self.state.lock().reject_wallet = reject;
    }

    // =========================================================================
    // Events
    // =========================================================================

    /// Deliver `event` to every live subscriber.
    pub fn emit(&self, event: ChainEvent) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(Ok(event.clone())).is_ok());
    }

    /// Deliver a stream error to every live subscriber.
    pub fn emit_error(&self, message: &str) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(Err(ChainError::Transport(message.to_string()))).is_ok());
    }

    /// End every live stream.
    pub fn close_streams(&self) {
        self.subscribers.lock().clear();
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().iter().filter(|tx| !tx.is_closed()).count()
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    pub fn read_count(&self, method: &'static str) -> usize {
        self.state.lock().read_counts.get(method).copied().unwrap_or(0)
    }

    pub fn approvals(&self) -> Vec<U256> {
        self.state.lock().approvals.clone()
    }

    pub fn gas_limits(&self) -> Vec<u64> {
        self.state.lock().gas_limits.clone()
    }

    pub fn opened_positions(&self) -> Vec<(I256, U256)> {
        self.state.lock().opened.clone()
    }

    pub fn close_count(&self) -> usize {
        self.state.lock().closes
    }

    pub fn liquidations(&self) -> Vec<Address> {
        self.state.lock().liquidations.clone()
    }

    pub fn faucet_requests(&self) -> Vec<U256> {
        self.state.lock().faucet_requests.clone()
    }

    pub fn added_chains(&self) -> Vec<AddChainParams> {
        self.state.lock().added_chains.clone()
    }

    pub fn reserves(&self) -> (U256, U256) {
        let state = self.state.lock();
        (state.base_reserve, state.quote_reserve)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn read<T: Send + 'static>(
        &self,
        method: &'static str,
        f: impl FnOnce(&MockState) -> T,
    ) -> BoxFuture<'_, ChainResult<T>> {
        let (result, delay) = {
            let mut state = self.state.lock();
            *state.read_counts.entry(method).or_default() += 1;
            let result = if state.failing_reads.contains(method) {
                Err(ChainError::Transport(format!("mock read failure: {method}")))
            } else {
                Ok(f(&state))
            };
            (result, state.read_delay)
        };

        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            result
        })
    }

    fn write_gate(state: &MockState) -> ChainResult<()> {
        if state.reject_wallet {
            return Err(ChainError::UserRejected);
        }
        if let Some(revert) = &state.write_revert {
            return Err(ChainError::Revert(revert.clone()));
        }
        Ok(())
    }

    fn preview_for(state: &MockState, size_delta: I256) -> RawTradePreview {
        state.preview.clone().unwrap_or_else(|| {
            let mark = state.mark();
            RawTradePreview {
                average_price: mark,
                price_impact: U256::ZERO,
                trading_fee_cost: size_delta.unsigned_abs() * mark / wad() * state.trading_fee
                    / wad(),
            }
        })
    }

    fn finish_write(&self, event: Option<ChainEvent>) -> TxReceipt {
        let receipt = {
            let mut state = self.state.lock();
            let receipt = state.next_receipt();
            if let Some(event) = &event {
                state.record_event(event.clone());
            }
            receipt
        };
        if let Some(event) = event {
            self.emit(event);
        }
        receipt
    }
}

impl std::fmt::Debug for MockChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockChain")
            .field("account", &self.account)
            .field("chain_id", &self.state.lock().chain_id)
            .finish()
    }
}

// =============================================================================
// Capability impls
// =============================================================================

impl ReadOnlyMarket for MockChain {
    fn chain_id(&self) -> BoxFuture<'_, ChainResult<u64>> {
        self.read("chain_id", |s| s.chain_id)
    }

    fn annualized_volatility(&self) -> BoxFuture<'_, ChainResult<U256>> {
        self.read("annualized_volatility", |s| s.volatility)
    }

    fn oracle_last_update(&self) -> BoxFuture<'_, ChainResult<u64>> {
        self.read("oracle_last_update", |s| s.oracle_last_update)
    }

    fn base_reserve(&self) -> BoxFuture<'_, ChainResult<U256>> {
        self.read("base_reserve", |s| s.base_reserve)
    }

    fn quote_reserve(&self) -> BoxFuture<'_, ChainResult<U256>> {
        self.read("quote_reserve", |s| s.quote_reserve)
    }

    fn cumulative_funding_rate(&self) -> BoxFuture<'_, ChainResult<I256>> {
        self.read("cumulative_funding_rate", |s| s.cumulative_funding_rate)
    }

    fn last_funding_time(&self) -> BoxFuture<'_, ChainResult<u64>> {
        self.read("last_funding_time", |s| s.last_funding_time)
    }

    fn funding_interval(&self) -> BoxFuture<'_, ChainResult<u64>> {
        self.read("funding_interval", |s| s.funding_interval)
    }

    fn total_long_size(&self) -> BoxFuture<'_, ChainResult<U256>> {
        self.read("total_long_size", |s| s.total_long)
    }

    fn total_short_size(&self) -> BoxFuture<'_, ChainResult<U256>> {
        self.read("total_short_size", |s| s.total_short)
    }

    fn max_leverage(&self) -> BoxFuture<'_, ChainResult<U256>> {
        self.read("max_leverage", |s| s.max_leverage)
    }

    fn maintenance_margin_ratio(&self) -> BoxFuture<'_, ChainResult<U256>> {
        self.read("maintenance_margin_ratio", |s| s.maintenance_margin_ratio)
    }

    fn liquidation_fee(&self) -> BoxFuture<'_, ChainResult<U256>> {
        self.read("liquidation_fee", |s| s.liquidation_fee)
    }

    fn trading_fee(&self) -> BoxFuture<'_, ChainResult<U256>> {
        self.read("trading_fee", |s| s.trading_fee)
    }

    fn position_details(&self, trader: Address) -> BoxFuture<'_, ChainResult<RawPosition>> {
        self.read("position_details", move |s| {
            s.positions.get(&trader).cloned().unwrap_or_default()
        })
    }

    fn liquidation_price(&self, trader: Address) -> BoxFuture<'_, ChainResult<U256>> {
        self.read("liquidation_price", move |s| {
            s.liquidation_prices
                .get(&trader)
                .copied()
                .unwrap_or_default()
        })
    }

    fn trade_preview(&self, size_delta: I256) -> BoxFuture<'_, ChainResult<RawTradePreview>> {
        self.read("trade_preview", move |s| Self::preview_for(s, size_delta))
    }

    fn required_margin(&self, size_delta: I256) -> BoxFuture<'_, ChainResult<U256>> {
        self.read("required_margin", move |s| {
            s.required_margin.unwrap_or_else(|| {
                if s.max_leverage.is_zero() {
                    return U256::ZERO;
                }
                size_delta.unsigned_abs() * s.mark() / s.max_leverage
            })
        })
    }

    fn collateral_balance(&self, owner: Address) -> BoxFuture<'_, ChainResult<U256>> {
        self.read("collateral_balance", move |s| {
            s.collateral.get(&owner).copied().unwrap_or_default()
        })
    }

    fn collateral_allowance(&self, owner: Address) -> BoxFuture<'_, ChainResult<U256>> {
        self.read("collateral_allowance", move |s| {
            s.allowances.get(&owner).copied().unwrap_or_default()
        })
    }

    fn native_balance(&self, owner: Address) -> BoxFuture<'_, ChainResult<U256>> {
        self.read("native_balance", move |s| {
            s.native.get(&owner).copied().unwrap_or_default()
        })
    }

    fn gas_price(&self) -> BoxFuture<'_, ChainResult<u128>> {
        self.read("gas_price", |s| s.gas_price)
    }

    fn block_number(&self) -> BoxFuture<'_, ChainResult<u64>> {
        self.read("block_number", |s| s.block_number)
    }

    fn position_opened_logs(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> BoxFuture<'_, ChainResult<Vec<LoggedEvent>>> {
        self.read("position_opened_logs", move |s| {
            s.logs
                .iter()
                .filter(|log| matches!(log.event, ChainEvent::PositionOpened { .. }))
                .filter(|log| {
                    log.block_number
                        .is_some_and(|b| b >= from_block && b <= to_block)
                })
                .cloned()
                .collect()
        })
    }

    fn funding_settled_logs(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> BoxFuture<'_, ChainResult<Vec<LoggedEvent>>> {
        self.read("funding_settled_logs", move |s| {
            s.logs
                .iter()
                .filter(|log| log.event.settles_funding())
                .filter(|log| {
                    log.block_number
                        .is_some_and(|b| b >= from_block && b <= to_block)
                })
                .cloned()
                .collect()
        })
    }
}

impl TradingAccount for MockChain {
    fn account(&self) -> Address {
        self.account
    }

    fn approve_collateral(&self, amount: U256) -> BoxFuture<'_, ChainResult<TxReceipt>> {
        Box::pin(async move {
            {
                let mut state = self.state.lock();
                Self::write_gate(&state)?;
                state.approvals.push(amount);
                if !state.mine_reverted {
                    state.allowances.insert(self.account, amount);
                }
            }
            Ok(self.finish_write(None))
        })
    }

    fn estimate_open_position(
        &self,
        _size_delta: I256,
        _margin_delta: U256,
    ) -> BoxFuture<'_, ChainResult<u64>> {
        Box::pin(async move {
            let state = self.state.lock();
            Self::write_gate(&state)?;
            Ok(state.gas_estimate)
        })
    }

    fn open_position(
        &self,
        size_delta: I256,
        margin_delta: U256,
        gas_limit: u64,
    ) -> BoxFuture<'_, ChainResult<TxReceipt>> {
        Box::pin(async move {
            let event = {
                let mut state = self.state.lock();
                Self::write_gate(&state)?;
                state.gas_limits.push(gas_limit);
                state.opened.push((size_delta, margin_delta));
                if state.mine_reverted {
                    None
                } else {
                    let preview = Self::preview_for(&state, size_delta);
                    let amount = size_delta.unsigned_abs();

                    // base * quote stays constant; a long takes base out of the pool
                    let k = state.base_reserve * state.quote_reserve;
                    let new_base = if size_delta.is_negative() {
                        state.base_reserve + amount
                    } else {
                        state.base_reserve.saturating_sub(amount)
                    };
                    if !new_base.is_zero() {
                        state.base_reserve = new_base;
                        state.quote_reserve = k / new_base;
                    }
                    if size_delta.is_negative() {
                        state.total_short += amount;
                    } else {
                        state.total_long += amount;
                    }

                    let balance = state.collateral.get(&self.account).copied().unwrap_or_default();
                    state
                        .collateral
                        .insert(self.account, balance.saturating_sub(margin_delta));

                    let mark = state.mark();
                    let position = state.positions.entry(self.account).or_default();
                    position.size += size_delta;
                    position.margin += margin_delta;
                    position.entry_price = preview.average_price;
                    position.mark_price = mark;
                    position.notional_value = position.size.unsigned_abs() * mark / wad();
                    position.leverage = if position.margin.is_zero() {
                        U256::ZERO
                    } else {
                        position.notional_value * wad() / position.margin
                    };

                    Some(ChainEvent::PositionOpened {
                        trader: self.account,
                        size_delta,
                        margin_delta,
                        average_price: preview.average_price,
                        timestamp: state.oracle_last_update,
                    })
                }
            };
            Ok(self.finish_write(event))
        })
    }

    fn close_position(&self) -> BoxFuture<'_, ChainResult<TxReceipt>> {
        Box::pin(async move {
            let event = {
                let mut state = self.state.lock();
                Self::write_gate(&state)?;
                state.closes += 1;

                let Some(position) = state.positions.get(&self.account).cloned() else {
                    return Err(ChainError::Revert(DecodedRevert {
                        category: ErrorCategory::ContractCallException,
                        selector: None,
                        reason: "No position".to_string(),
                    }));
                };

                if state.mine_reverted {
                    None
                } else {
                    state.positions.remove(&self.account);
                    let amount = position.size.unsigned_abs();
                    let k = state.base_reserve * state.quote_reserve;
                    let new_base = if position.size.is_negative() {
                        state.base_reserve.saturating_sub(amount)
                    } else {
                        state.base_reserve + amount
                    };
                    if !new_base.is_zero() {
                        state.base_reserve = new_base;
                        state.quote_reserve = k / new_base;
                    }
                    if position.size.is_negative() {
                        state.total_short = state.total_short.saturating_sub(amount);
                    } else {
                        state.total_long = state.total_long.saturating_sub(amount);
                    }

                    let balance = state.collateral.get(&self.account).copied().unwrap_or_default();
                    state.collateral.insert(self.account, balance + position.margin);

                    Some(ChainEvent::PositionClosed {
                        trader: self.account,
                        size: position.size,
                        margin: position.margin,
                        pnl: I256::ZERO,
                        timestamp: state.oracle_last_update,
                    })
                }
            };
            Ok(self.finish_write(event))
        })
    }

    fn liquidate(&self, trader: Address) -> BoxFuture<'_, ChainResult<TxReceipt>> {
        Box::pin(async move {
            let event = {
                let mut state = self.state.lock();
                Self::write_gate(&state)?;
                state.liquidations.push(trader);
                if state.mine_reverted {
                    None
                } else {
                    state.positions.remove(&trader).map(|position| ChainEvent::Liquidated {
                        trader,
                        liquidator: self.account,
                        size: position.size,
                        liquidation_reward: U256::ZERO,
                        timestamp: state.oracle_last_update,
                    })
                }
            };
            Ok(self.finish_write(event))
        })
    }

    fn request_faucet(&self, amount: U256) -> BoxFuture<'_, ChainResult<TxReceipt>> {
        Box::pin(async move {
            {
                let mut state = self.state.lock();
                Self::write_gate(&state)?;
                state.faucet_requests.push(amount);
                if !state.mine_reverted {
                    let balance = state.collateral.get(&self.account).copied().unwrap_or_default();
                    state.collateral.insert(self.account, balance + amount);
                }
            }
            Ok(self.finish_write(None))
        })
    }
}

impl EventSource for MockChain {
    fn subscribe(&self) -> BoxFuture<'_, ChainResult<EventStream>> {
        Box::pin(async move {
            if self.state.lock().failing_reads.contains("subscribe") {
                return Err(ChainError::Transport("mock subscribe failure".to_string()));
            }

            let (tx, rx) = mpsc::unbounded_channel();
            self.subscribers.lock().push(tx);

            let stream = futures_util::stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            });
            Ok(Box::pin(stream) as EventStream)
        })
    }
}

impl NetworkSwitcher for MockChain {
    fn switch_chain(&self, chain_id_hex: String) -> BoxFuture<'_, ChainResult<()>> {
        Box::pin(async move {
            let mut state = self.state.lock();
            if state.reject_wallet {
                return Err(ChainError::UserRejected);
            }
            if !state.known_chains.contains(&chain_id_hex) {
                let chain_id = u64::from_str_radix(chain_id_hex.trim_start_matches("0x"), 16)
                    .unwrap_or_default();
                return Err(ChainError::UnknownChain(chain_id));
            }
            if let Ok(chain_id) = u64::from_str_radix(chain_id_hex.trim_start_matches("0x"), 16) {
                state.chain_id = chain_id;
            }
            Ok(())
        })
    }

    fn add_chain(&self, params: AddChainParams) -> BoxFuture<'_, ChainResult<()>> {
        Box::pin(async move {
            let mut state = self.state.lock();
            if state.reject_wallet {
                return Err(ChainError::UserRejected);
            }
            if let Ok(chain_id) = u64::from_str_radix(params.chain_id.trim_start_matches("0x"), 16) {
                state.chain_id = chain_id;
            }
            state.known_chains.push(params.chain_id.clone());
            state.added_chains.push(params);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn test_open_moves_reserves_along_curve() {
        let chain = MockChain::new(998);
        let (base, quote) = chain.reserves();
        let k = base * quote;

        chain
            .open_position(I256::try_from(scaled(100, 18)).unwrap(), scaled(5, 18), 300_000)
            .await
            .unwrap();

        let (new_base, new_quote) = chain.reserves();
        assert_eq!(new_base, scaled(900, 18));
        assert!(new_quote > quote);
        // integer division may lose at most one base unit of k
        assert!(k - new_base * new_quote < new_base);
        assert_eq!(chain.gas_limits(), vec![300_000]);
    }

    #[tokio::test]
    async fn test_close_without_position_reverts() {
        let chain = MockChain::new(998);
        let err = chain.close_position().await.unwrap_err();
        assert!(matches!(err, ChainError::Revert(_)));
    }

    #[tokio::test]
    async fn test_writes_are_streamed_to_subscribers() {
        let chain = MockChain::new(998);
        let mut stream = chain.subscribe().await.unwrap();

        chain.request_faucet(scaled(1, 18)).await.unwrap();
        chain
            .open_position(I256::try_from(scaled(1, 18)).unwrap(), scaled(1, 18), 1)
            .await
            .unwrap();

        let event = stream.next().await.unwrap().unwrap();
        assert_eq!(event.name(), "position_opened");
        assert_eq!(event.accounts(), vec![MOCK_ACCOUNT]);
    }

    #[tokio::test]
    async fn test_failing_reads_are_counted() {
        let chain = MockChain::new(998);
        chain.fail_reads("base_reserve");

        assert!(chain.base_reserve().await.is_err());
        assert!(chain.quote_reserve().await.is_ok());
        assert_eq!(chain.read_count("base_reserve"), 1);

        chain.restore_reads();
        assert!(chain.base_reserve().await.is_ok());
    }
}

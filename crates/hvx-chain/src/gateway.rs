//! Capability interfaces over the deployed contracts.
//!
//! Reads and writes are split into two traits. `TradingAccount` only exists
//! when a signer is configured, so read-only consumers cannot reach a write
//! method by accident. `ContractGateway` bundles both for one binding
//! (chain id + account) and is rebuilt, with a new generation, whenever either
//! changes.

use crate::error::{ChainError, ChainResult};
use crate::events::{EventSource, LoggedEvent};
use alloy::primitives::{address, Address, B256, I256, U256};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::Arc;

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

// =============================================================================
// Contract addresses
// =============================================================================

/// Addresses of the contracts the client talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractAddresses {
    /// Volatility index oracle.
    pub oracle: Address,
    /// Volatility perpetual (vAMM).
    pub perpetual: Address,
    /// Collateral token (mock USDC on testnet).
    pub collateral: Address,
}

impl ContractAddresses {
    /// Hyperliquid EVM testnet deployment.
    pub const TESTNET: Self = Self {
        oracle: address!("42336C82c4e727D98d37C626edF24eC44794157a"),
        perpetual: address!("4734c15878ff8f7EFd4a7D81A316B348808Ee7D7"),
        collateral: address!("eA852122fFcADE7345761317b5465776a85Caa39"),
    };
}

impl Default for ContractAddresses {
    fn default() -> Self {
        Self::TESTNET
    }
}

// =============================================================================
// Raw contract values
// =============================================================================

/// `getPositionDetails(trader)` as returned by the perpetual, still fixed-point.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawPosition {
    pub size: I256,
    pub margin: U256,
    pub entry_price: U256,
    pub unrealized_pnl: I256,
    pub notional_value: U256,
    pub leverage: U256,
    pub margin_ratio: U256,
    pub is_liquidatable: bool,
    pub mark_price: U256,
}

impl RawPosition {
    #[inline]
    pub fn is_open(&self) -> bool {
        !self.size.is_zero()
    }
}

/// `getTradePreview(sizeDelta)`, still fixed-point.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawTradePreview {
    pub average_price: U256,
    pub price_impact: U256,
    pub trading_fee_cost: U256,
}

/// Outcome of a mined transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_hash: B256,
    pub block_number: Option<u64>,
    pub gas_used: u64,
    /// `false` when the transaction was mined but reverted.
    pub success: bool,
}

// =============================================================================
// Capability traits
// =============================================================================

/// Read surface of the oracle, perpetual and collateral token.
///
/// Every method is one RPC round trip; callers fan them out concurrently.
pub trait ReadOnlyMarket: Send + Sync {
    /// Chain id reported by the connected node.
    fn chain_id(&self) -> BoxFuture<'_, ChainResult<u64>>;

    // --- oracle ---
    fn annualized_volatility(&self) -> BoxFuture<'_, ChainResult<U256>>;
    fn oracle_last_update(&self) -> BoxFuture<'_, ChainResult<u64>>;

    // --- vAMM reserves and funding ---
    fn base_reserve(&self) -> BoxFuture<'_, ChainResult<U256>>;
    fn quote_reserve(&self) -> BoxFuture<'_, ChainResult<U256>>;
    fn cumulative_funding_rate(&self) -> BoxFuture<'_, ChainResult<I256>>;
    fn last_funding_time(&self) -> BoxFuture<'_, ChainResult<u64>>;
    fn funding_interval(&self) -> BoxFuture<'_, ChainResult<u64>>;
    fn total_long_size(&self) -> BoxFuture<'_, ChainResult<U256>>;
    fn total_short_size(&self) -> BoxFuture<'_, ChainResult<U256>>;

    // --- risk parameters ---
    fn max_leverage(&self) -> BoxFuture<'_, ChainResult<U256>>;
    fn maintenance_margin_ratio(&self) -> BoxFuture<'_, ChainResult<U256>>;
    fn liquidation_fee(&self) -> BoxFuture<'_, ChainResult<U256>>;
    fn trading_fee(&self) -> BoxFuture<'_, ChainResult<U256>>;

    // --- per trader ---
    fn position_details(&self, trader: Address) -> BoxFuture<'_, ChainResult<RawPosition>>;
    fn liquidation_price(&self, trader: Address) -> BoxFuture<'_, ChainResult<U256>>;
    fn trade_preview(&self, size_delta: I256) -> BoxFuture<'_, ChainResult<RawTradePreview>>;
    fn required_margin(&self, size_delta: I256) -> BoxFuture<'_, ChainResult<U256>>;

    // --- collateral token ---
    fn collateral_balance(&self, owner: Address) -> BoxFuture<'_, ChainResult<U256>>;
    /// Allowance granted by `owner` to the perpetual.
    fn collateral_allowance(&self, owner: Address) -> BoxFuture<'_, ChainResult<U256>>;

    // --- chain ---
    fn native_balance(&self, owner: Address) -> BoxFuture<'_, ChainResult<U256>>;
    fn gas_price(&self) -> BoxFuture<'_, ChainResult<u128>>;
    fn block_number(&self) -> BoxFuture<'_, ChainResult<u64>>;

    // --- history ---
    fn position_opened_logs(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> BoxFuture<'_, ChainResult<Vec<LoggedEvent>>>;
    fn funding_settled_logs(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> BoxFuture<'_, ChainResult<Vec<LoggedEvent>>>;
}

/// Write surface, bound to one signing account.
///
/// Each method submits one transaction and resolves once it is mined.
pub trait TradingAccount: Send + Sync {
    /// Address that signs every transaction.
    fn account(&self) -> Address;

    /// `approve(perpetual, amount)` on the collateral token.
    fn approve_collateral(&self, amount: U256) -> BoxFuture<'_, ChainResult<TxReceipt>>;

    /// Gas estimate for `openPosition(sizeDelta, marginDelta)`.
    fn estimate_open_position(
        &self,
        size_delta: I256,
        margin_delta: U256,
    ) -> BoxFuture<'_, ChainResult<u64>>;

    fn open_position(
        &self,
        size_delta: I256,
        margin_delta: U256,
        gas_limit: u64,
    ) -> BoxFuture<'_, ChainResult<TxReceipt>>;

    fn close_position(&self) -> BoxFuture<'_, ChainResult<TxReceipt>>;

    fn liquidate(&self, trader: Address) -> BoxFuture<'_, ChainResult<TxReceipt>>;

    /// Testnet collateral faucet: mint `amount` to the signing account.
    fn request_faucet(&self, amount: U256) -> BoxFuture<'_, ChainResult<TxReceipt>>;
}

// =============================================================================
// Binding and gateway
// =============================================================================

/// Identity of a gateway: chain, account and a monotonically increasing generation.
///
/// Fetches tag their results with the generation they started under; the
/// cache drops results whose generation is no longer current.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Binding {
    pub chain_id: u64,
    pub account: Option<Address>,
    pub generation: u64,
}

impl Binding {
    /// First binding of a session.
    pub fn initial(chain_id: u64, account: Option<Address>) -> Self {
        Self {
            chain_id,
            account,
            generation: 1,
        }
    }

    /// Binding that supersedes `self`.
    #[must_use]
    pub fn successor(&self, chain_id: u64, account: Option<Address>) -> Self {
        Self {
            chain_id,
            account,
            generation: self.generation + 1,
        }
    }
}

/// Typed access to the contracts for one binding.
#[derive(Clone)]
pub struct ContractGateway {
    reader: Arc<dyn ReadOnlyMarket>,
    events: Arc<dyn EventSource>,
    trader: Option<Arc<dyn TradingAccount>>,
    binding: Binding,
}

impl ContractGateway {
    /// Read-only gateway.
    pub fn read_only(
        reader: Arc<dyn ReadOnlyMarket>,
        events: Arc<dyn EventSource>,
        binding: Binding,
    ) -> Self {
        Self {
            reader,
            events,
            trader: None,
            binding,
        }
    }

    /// Attach a signing account. The binding's account becomes the signer's.
    #[must_use]
    pub fn with_trading_account(mut self, trader: Arc<dyn TradingAccount>) -> Self {
        self.binding.account = Some(trader.account());
        self.trader = Some(trader);
        self
    }

    pub fn reader(&self) -> Arc<dyn ReadOnlyMarket> {
        Arc::clone(&self.reader)
    }

    pub fn events(&self) -> Arc<dyn EventSource> {
        Arc::clone(&self.events)
    }

    /// Write capability, if a signer is configured.
    pub fn trading_account(&self) -> ChainResult<Arc<dyn TradingAccount>> {
        self.trader.clone().ok_or(ChainError::NoSigner)
    }

    #[inline]
    pub fn has_signer(&self) -> bool {
        self.trader.is_some()
    }

    #[inline]
    pub fn binding(&self) -> Binding {
        self.binding
    }
}

impl std::fmt::Debug for ContractGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContractGateway")
            .field("binding", &self.binding)
            .field("has_signer", &self.has_signer())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockChain;

    #[test]
    fn test_binding_successor_bumps_generation() {
        let first = Binding::initial(998, None);
        let account = Address::repeat_byte(0xaa);
        let next = first.successor(998, Some(account));

        assert_eq!(first.generation, 1);
        assert_eq!(next.generation, 2);
        assert_eq!(next.account, Some(account));
    }

    #[test]
    fn test_read_only_gateway_has_no_trading_account() {
        let chain = Arc::new(MockChain::new(998));
        let gateway =
            ContractGateway::read_only(chain.clone(), chain, Binding::initial(998, None));

        assert!(!gateway.has_signer());
        assert!(matches!(
            gateway.trading_account(),
            Err(ChainError::NoSigner)
        ));
    }

    #[test]
    fn test_trading_account_sets_binding_account() {
        let chain = Arc::new(MockChain::new(998));
        let gateway = ContractGateway::read_only(chain.clone(), chain.clone(), Binding::initial(998, None))
            .with_trading_account(chain.clone());

        assert!(gateway.has_signer());
        assert_eq!(gateway.binding().account, Some(chain.account()));
    }
}

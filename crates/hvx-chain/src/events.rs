//! Contract events consumed by the reconciliation bus and trade history.

use crate::error::ChainResult;
use crate::gateway::BoxFuture;
use alloy::primitives::{Address, I256, U256};
use futures_util::Stream;
use std::pin::Pin;

/// Decoded perpetual / oracle event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainEvent {
    PositionOpened {
        trader: Address,
        size_delta: I256,
        margin_delta: U256,
        average_price: U256,
        timestamp: u64,
    },
    PositionClosed {
        trader: Address,
        size: I256,
        margin: U256,
        pnl: I256,
        timestamp: u64,
    },
    FundingSettled {
        funding_rate: I256,
        cumulative_funding_rate: I256,
        timestamp: u64,
    },
    Liquidated {
        trader: Address,
        liquidator: Address,
        size: I256,
        liquidation_reward: U256,
        timestamp: u64,
    },
    VolatilityUpdated {
        new_volatility: U256,
        cumulative_price: U256,
        timestamp: u64,
    },
}

impl ChainEvent {
    /// Event name, used as a log field and metric label.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::PositionOpened { .. } => "position_opened",
            Self::PositionClosed { .. } => "position_closed",
            Self::FundingSettled { .. } => "funding_settled",
            Self::Liquidated { .. } => "liquidated",
            Self::VolatilityUpdated { .. } => "volatility_updated",
        }
    }

    /// Accounts whose state this event changes.
    #[must_use]
    pub fn accounts(&self) -> Vec<Address> {
        match self {
            Self::PositionOpened { trader, .. } | Self::PositionClosed { trader, .. } => {
                vec![*trader]
            }
            Self::Liquidated {
                trader, liquidator, ..
            } => vec![*trader, *liquidator],
            Self::FundingSettled { .. } | Self::VolatilityUpdated { .. } => Vec::new(),
        }
    }

    /// Whether the event settles funding, which moves every open position's margin.
    #[must_use]
    pub fn settles_funding(&self) -> bool {
        matches!(self, Self::FundingSettled { .. })
    }

    #[must_use]
    pub fn timestamp(&self) -> u64 {
        match self {
            Self::PositionOpened { timestamp, .. }
            | Self::PositionClosed { timestamp, .. }
            | Self::FundingSettled { timestamp, .. }
            | Self::Liquidated { timestamp, .. }
            | Self::VolatilityUpdated { timestamp, .. } => *timestamp,
        }
    }
}

/// Event together with the block it was logged in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedEvent {
    pub block_number: Option<u64>,
    pub event: ChainEvent,
}

/// Live event stream. Dropping it unsubscribes every listener behind it.
pub type EventStream = Pin<Box<dyn Stream<Item = ChainResult<ChainEvent>> + Send>>;

/// Source of live contract events.
pub trait EventSource: Send + Sync {
    /// Subscribe to all five event kinds of the bound contracts.
    fn subscribe(&self) -> BoxFuture<'_, ChainResult<EventStream>>;
}

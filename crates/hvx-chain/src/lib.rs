//! Chain access for the HyperVIX client.
//!
//! - `ReadOnlyMarket` / `TradingAccount`: Capability traits over the contracts
//! - `ContractGateway`: One binding (chain + account) of both
//! - `ChainGuard`: Blocking chain id check before reads and writes
//! - `RevertRegistry`: Custom-error selectors to error categories
//! - `EventSource`: Live contract events
//! - `rpc`: alloy JSON-RPC implementations
//! - `mock`: In-memory chain for tests

pub mod bindings;
pub mod error;
pub mod events;
pub mod gateway;
pub mod guard;
pub mod keys;
pub mod mock;
pub mod network;
pub mod revert;
pub mod rpc;

pub use error::{ChainError, ChainResult};
pub use events::{ChainEvent, EventSource, EventStream, LoggedEvent};
pub use gateway::{
    Binding, BoxFuture, ContractAddresses, ContractGateway, RawPosition, RawTradePreview,
    ReadOnlyMarket, TradingAccount, TxReceipt,
};
pub use guard::{assert_network, ChainGuard};
pub use keys::{KeyError, KeyManager, KeySource, DEFAULT_KEY_ENV};
pub use mock::{MockChain, MOCK_ACCOUNT};
pub use network::{ensure_network, AddChainParams, NetworkConfig, NetworkSwitcher, SwitchOutcome};
pub use revert::{DecodedRevert, RevertRegistry};
pub use rpc::{RpcMarket, RpcNetworkSwitcher, RpcTradingAccount};

//! Network metadata and wallet network switching.
//!
//! Switching follows EIP-3326 / EIP-3085: request `wallet_switchEthereumChain`
//! and, when the wallet answers 4902 (chain not added), request
//! `wallet_addEthereumChain` with the full chain metadata.

use crate::error::{ChainError, ChainResult};
use crate::gateway::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// EIP-1193 error code for an unrecognized chain.
pub const UNRECOGNIZED_CHAIN_CODE: i64 = 4902;

/// Native currency metadata for `wallet_addEthereumChain`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeCurrency {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

/// Target network of the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub chain_id: u64,
    pub name: String,
    pub rpc_url: String,
    pub explorer_url: String,
    pub native_currency: NativeCurrency,
}

impl NetworkConfig {
    /// Hyperliquid EVM testnet.
    pub fn hyperliquid_testnet() -> Self {
        Self {
            chain_id: 998,
            name: "Hyperliquid Testnet".to_string(),
            rpc_url: "https://rpc.hyperliquid-testnet.xyz/evm".to_string(),
            explorer_url: "https://app.hyperliquid.xyz/".to_string(),
            native_currency: NativeCurrency {
                name: "ETH".to_string(),
                symbol: "ETH".to_string(),
                decimals: 18,
            },
        }
    }

    /// `0x`-prefixed hex chain id as wallets expect it.
    pub fn chain_id_hex(&self) -> String {
        format!("0x{:x}", self.chain_id)
    }

    /// Parameters for `wallet_addEthereumChain`.
    pub fn add_chain_params(&self) -> AddChainParams {
        AddChainParams {
            chain_id: self.chain_id_hex(),
            chain_name: self.name.clone(),
            rpc_urls: vec![self.rpc_url.clone()],
            native_currency: self.native_currency.clone(),
            block_explorer_urls: vec![self.explorer_url.clone()],
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self::hyperliquid_testnet()
    }
}

/// EIP-3085 `AddEthereumChainParameter`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddChainParams {
    pub chain_id: String,
    pub chain_name: String,
    pub rpc_urls: Vec<String>,
    pub native_currency: NativeCurrency,
    pub block_explorer_urls: Vec<String>,
}

/// Wallet-side network control.
pub trait NetworkSwitcher: Send + Sync {
    /// `wallet_switchEthereumChain`. Fails with `UnknownChain` on code 4902.
    fn switch_chain(&self, chain_id_hex: String) -> BoxFuture<'_, ChainResult<()>>;

    /// `wallet_addEthereumChain`.
    fn add_chain(&self, params: AddChainParams) -> BoxFuture<'_, ChainResult<()>>;
}

/// What `ensure_network` had to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchOutcome {
    Switched,
    /// Chain was unknown to the wallet and has been added.
    Added,
}

/// Switch the wallet to `network`, adding the chain first if the wallet does not know it.
pub async fn ensure_network(
    switcher: &dyn NetworkSwitcher,
    network: &NetworkConfig,
) -> ChainResult<SwitchOutcome> {
    match switcher.switch_chain(network.chain_id_hex()).await {
        Ok(()) => {
            info!(chain_id = network.chain_id, "Switched wallet network");
            Ok(SwitchOutcome::Switched)
        }
        Err(ChainError::UnknownChain(_)) => {
            warn!(
                chain_id = network.chain_id,
                name = %network.name,
                "Chain unknown to wallet, adding it"
            );
            switcher.add_chain(network.add_chain_params()).await?;
            info!(chain_id = network.chain_id, "Added chain to wallet");
            Ok(SwitchOutcome::Added)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockChain;

    #[test]
    fn test_testnet_metadata() {
        let network = NetworkConfig::hyperliquid_testnet();
        assert_eq!(network.chain_id_hex(), "0x3e6");

        let params = serde_json::to_value(network.add_chain_params()).unwrap();
        assert_eq!(params["chainId"], "0x3e6");
        assert_eq!(params["chainName"], "Hyperliquid Testnet");
        assert_eq!(params["rpcUrls"][0], "https://rpc.hyperliquid-testnet.xyz/evm");
        assert_eq!(params["nativeCurrency"]["decimals"], 18);
    }

    #[tokio::test]
    async fn test_known_chain_is_switched() {
        let wallet = MockChain::new(998);
        wallet.set_known_chains(vec!["0x3e6".to_string()]);

        let outcome = ensure_network(&wallet, &NetworkConfig::hyperliquid_testnet())
            .await
            .unwrap();

        assert_eq!(outcome, SwitchOutcome::Switched);
        assert!(wallet.added_chains().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_chain_is_added() {
        let wallet = MockChain::new(998);
        wallet.set_known_chains(Vec::new());

        let outcome = ensure_network(&wallet, &NetworkConfig::hyperliquid_testnet())
            .await
            .unwrap();

        assert_eq!(outcome, SwitchOutcome::Added);
        assert_eq!(wallet.added_chains().len(), 1);
        assert_eq!(wallet.added_chains()[0].chain_id, "0x3e6");
    }

    #[tokio::test]
    async fn test_rejected_switch_is_surfaced() {
        let wallet = MockChain::new(998);
        wallet.reject_wallet_requests(true);

        let err = ensure_network(&wallet, &NetworkConfig::hyperliquid_testnet())
            .await
            .unwrap_err();
        assert!(matches!(err, ChainError::UserRejected));
    }
}

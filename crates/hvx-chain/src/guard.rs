//! Network guard.
//!
//! Every read batch and every write starts with [`ChainGuard::assert_network`].
//! A mismatch is blocking: nothing is read or sent until the wallet is
//! switched to the expected chain.

use crate::error::{ChainError, ChainResult};
use crate::gateway::ReadOnlyMarket;
use tracing::warn;

/// Validate the connected chain id.
pub async fn assert_network(provider: &dyn ReadOnlyMarket, expected_chain_id: u64) -> ChainResult<()> {
    let actual = provider.chain_id().await?;
    if actual != expected_chain_id {
        warn!(actual, expected = expected_chain_id, "Connected to wrong network");
        return Err(ChainError::WrongNetwork {
            actual,
            expected: expected_chain_id,
        });
    }
    Ok(())
}

/// Guard bound to one expected chain id.
#[derive(Debug, Clone, Copy)]
pub struct ChainGuard {
    expected_chain_id: u64,
}

impl ChainGuard {
    pub fn new(expected_chain_id: u64) -> Self {
        Self { expected_chain_id }
    }

    #[inline]
    pub fn expected_chain_id(&self) -> u64 {
        self.expected_chain_id
    }

    pub async fn assert_network(&self, provider: &dyn ReadOnlyMarket) -> ChainResult<()> {
        assert_network(provider, self.expected_chain_id).await
    }
}

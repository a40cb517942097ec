//! Revert and wallet error decoding.
//!
//! Known custom-error selectors map to typed categories through a registry
//! instead of string comparisons at call sites. `Error(string)` and
//! `Panic(uint256)` payloads decode to their reason text; anything else is
//! surfaced as raw hex.

use crate::error::ChainError;
use alloy::sol_types::decode_revert_reason;
use hvx_core::ErrorCategory;
use std::collections::HashMap;
use std::fmt;

/// Custom error raised by `openPosition` when balance or margin does not cover the trade.
pub const INSUFFICIENT_MARGIN_SELECTOR: [u8; 4] = [0x69, 0x79, 0xbd, 0x5a];

/// Custom error raised by `closePosition` when the vAMM reserves would go invalid.
pub const INVALID_RESERVE_SELECTOR: [u8; 4] = [0xe4, 0x50, 0xd3, 0x8c];

/// JSON-RPC / EIP-1193 code for a request the user declined in the wallet.
pub const USER_REJECTED_CODE: i64 = 4001;

/// Non-standard JSON-RPC code used by several providers for rate limiting.
pub const LIMIT_EXCEEDED_CODE: i64 = -32005;

/// A revert decoded as far as the registry allows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedRevert {
    pub category: ErrorCategory,
    pub selector: Option<[u8; 4]>,
    pub reason: String,
}

impl fmt::Display for DecodedRevert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.selector {
            Some(selector) => write!(f, "{} (0x{})", self.reason, hex::encode(selector)),
            None => write!(f, "{}", self.reason),
        }
    }
}

#[derive(Debug, Clone)]
struct KnownRevert {
    category: ErrorCategory,
    description: &'static str,
}

/// Selector -> category registry.
#[derive(Debug, Clone)]
pub struct RevertRegistry {
    known: HashMap<[u8; 4], KnownRevert>,
}

impl Default for RevertRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(
            INSUFFICIENT_MARGIN_SELECTOR,
            ErrorCategory::InsufficientMargin,
            "insufficient balance or margin",
        );
        registry.register(
            INVALID_RESERVE_SELECTOR,
            ErrorCategory::InvalidReserveState,
            "invalid reserves state",
        );
        registry
    }
}

impl RevertRegistry {
    /// Registry without any known selectors.
    pub fn empty() -> Self {
        Self {
            known: HashMap::new(),
        }
    }

    /// Register (or replace) a custom-error selector.
    pub fn register(
        &mut self,
        selector: [u8; 4],
        category: ErrorCategory,
        description: &'static str,
    ) {
        self.known.insert(
            selector,
            KnownRevert {
                category,
                description,
            },
        );
    }

    /// Decode revert data returned by the node.
    pub fn decode(&self, data: &[u8]) -> DecodedRevert {
        let selector: Option<[u8; 4]> = data.get(..4).and_then(|s| s.try_into().ok());

        if let Some(known) = selector.and_then(|s| self.known.get(&s)) {
            return DecodedRevert {
                category: known.category,
                selector,
                reason: known.description.to_string(),
            };
        }

        let reason = decode_revert_reason(data).unwrap_or_else(|| {
            if data.is_empty() {
                "execution reverted without data".to_string()
            } else {
                format!("0x{}", hex::encode(data))
            }
        });

        DecodedRevert {
            category: ErrorCategory::ContractCallException,
            selector,
            reason,
        }
    }

    /// Classify a JSON-RPC error that carried no revert data.
    ///
    /// Returns `None` when nothing more specific than a transport error applies.
    pub fn classify_rpc(&self, code: Option<i64>, message: &str) -> Option<ChainError> {
        let lower = message.to_ascii_lowercase();

        if code == Some(USER_REJECTED_CODE)
            || lower.contains("user rejected")
            || lower.contains("user denied")
        {
            return Some(ChainError::UserRejected);
        }
        if lower.contains("insufficient funds") {
            return Some(ChainError::InsufficientGasFunds(message.to_string()));
        }
        if code == Some(LIMIT_EXCEEDED_CODE)
            || lower.contains("rate limit")
            || lower.contains("too many requests")
            || lower.contains("429")
        {
            return Some(ChainError::RateLimited(message.to_string()));
        }
        if lower.contains("timeout") || lower.contains("timed out") {
            return Some(ChainError::Timeout(message.to_string()));
        }
        if lower.contains("execution reverted") {
            return Some(ChainError::Revert(DecodedRevert {
                category: ErrorCategory::ContractCallException,
                selector: None,
                reason: message.to_string(),
            }));
        }
        None
    }
}

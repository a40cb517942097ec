//! Trading key loading.
//!
//! The command-line client signs with a local key. Without one the client
//! runs read-only and no `TradingAccount` is ever constructed.

use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use std::path::PathBuf;
use thiserror::Error;
use zeroize::Zeroizing;

/// Environment variable read when no key source is configured explicitly.
pub const DEFAULT_KEY_ENV: &str = "HVX_TRADING_KEY";

/// Source of the private key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySource {
    /// Load from environment variable (development).
    EnvVar { var_name: String },
    /// Load from file (recommend 0600 permissions).
    File { path: PathBuf },
}

/// Holds the optional trading signer.
///
/// Never log private key material.
pub struct KeyManager {
    signer: Option<PrivateKeySigner>,
}

impl KeyManager {
    /// Read-only: no signer.
    pub fn read_only() -> Self {
        Self { signer: None }
    }

    /// Load the trading key and optionally verify the derived address.
    ///
    /// # Errors
    /// Returns `KeyError` if:
    /// - Environment variable not found
    /// - File read fails
    /// - Hex decoding fails
    /// - Private key is invalid
    /// - Address mismatch
    pub fn load(source: &KeySource, expected_address: Option<Address>) -> Result<Self, KeyError> {
        let secret: Zeroizing<String> = match source {
            KeySource::EnvVar { var_name } => Zeroizing::new(
                std::env::var(var_name).map_err(|_| KeyError::EnvVarNotFound(var_name.clone()))?,
            ),
            KeySource::File { path } => Zeroizing::new(std::fs::read_to_string(path)?),
        };

        Self::from_hex(&secret, expected_address)
    }

    /// Parse a hex key (`0x` prefix and surrounding whitespace accepted).
    pub fn from_hex(hex_key: &str, expected_address: Option<Address>) -> Result<Self, KeyError> {
        let trimmed = hex_key.trim().trim_start_matches("0x");
        let bytes = Zeroizing::new(hex::decode(trimmed)?);

        let signer = PrivateKeySigner::from_slice(&bytes)
            .map_err(|e| KeyError::InvalidKey(e.to_string()))?;

        if let Some(expected) = expected_address {
            if signer.address() != expected {
                return Err(KeyError::AddressMismatch {
                    expected,
                    actual: signer.address(),
                });
            }
        }

        Ok(Self {
            signer: Some(signer),
        })
    }

    pub fn signer(&self) -> Option<&PrivateKeySigner> {
        self.signer.as_ref()
    }

    pub fn address(&self) -> Option<Address> {
        self.signer.as_ref().map(|s| s.address())
    }
}

/// Key management errors.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("Failed to decode hex: {0}")]
    HexDecode(#[from] hex::FromHexError),

    #[error("Invalid private key: {0}")]
    InvalidKey(String),

    #[error("Address mismatch: expected {expected}, got {actual}")]
    AddressMismatch { expected: Address, actual: Address },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

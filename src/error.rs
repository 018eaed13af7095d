//! Error types for the sealed-query enclave
//!
//! [`EnclaveError`] carries full detail inside the boundary. Anything that
//! crosses back to the caller is first collapsed into a [`BoundaryStatus`],
//! which names only the coarse failure kind.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur in the enclave
#[derive(Error, Debug)]
pub enum EnclaveError {
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Invalid version: expected {expected}, found {found}")]
    InvalidVersion { expected: u32, found: u32 },

    #[error("Size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("Not initialized: {0}")]
    Uninitialized(&'static str),

    #[error("Out of memory reserving {0} bytes")]
    OutOfMemory(usize),

    #[error("Cipher error: {0}")]
    CipherFailure(String),

    #[error("Unexpected: {0}")]
    Unexpected(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("RPC error: {0}")]
    Rpc(String),
}

pub type Result<T> = std::result::Result<T, EnclaveError>;

/// Coarse outcome of a boundary call, the only failure detail the caller sees
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryStatus {
    InvalidParameter,
    InvalidVersion,
    Uninitialized,
    OutOfMemory,
    CipherFailure,
    Unexpected,
}

impl BoundaryStatus {
    /// Stable numeric code, offset into the JSON-RPC server error range
    pub fn code(self) -> i32 {
        let kind = match self {
            BoundaryStatus::InvalidParameter => 1,
            BoundaryStatus::InvalidVersion => 2,
            BoundaryStatus::Uninitialized => 3,
            BoundaryStatus::OutOfMemory => 4,
            BoundaryStatus::CipherFailure => 5,
            BoundaryStatus::Unexpected => 6,
        };
        -32000 - kind
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BoundaryStatus::InvalidParameter => "invalid_parameter",
            BoundaryStatus::InvalidVersion => "invalid_version",
            BoundaryStatus::Uninitialized => "uninitialized",
            BoundaryStatus::OutOfMemory => "out_of_memory",
            BoundaryStatus::CipherFailure => "cipher_failure",
            BoundaryStatus::Unexpected => "unexpected",
        }
    }
}

impl std::fmt::Display for BoundaryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&EnclaveError> for BoundaryStatus {
    fn from(err: &EnclaveError) -> Self {
        match err {
            EnclaveError::InvalidParameter(_) | EnclaveError::SizeMismatch { .. } => {
                BoundaryStatus::InvalidParameter
            }
            EnclaveError::InvalidVersion { .. } => BoundaryStatus::InvalidVersion,
            EnclaveError::Uninitialized(_) => BoundaryStatus::Uninitialized,
            EnclaveError::OutOfMemory(_) => BoundaryStatus::OutOfMemory,
            EnclaveError::CipherFailure(_) => BoundaryStatus::CipherFailure,
            EnclaveError::Unexpected(_)
            | EnclaveError::Config(_)
            | EnclaveError::Io(_)
            | EnclaveError::Serialization(_)
            | EnclaveError::Rpc(_) => BoundaryStatus::Unexpected,
        }
    }
}

impl From<EnclaveError> for BoundaryStatus {
    fn from(err: EnclaveError) -> Self {
        BoundaryStatus::from(&err)
    }
}

/// Result type returned across the boundary
pub type BoundaryResult<T> = std::result::Result<T, BoundaryStatus>;

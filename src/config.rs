//! Configuration for the enclave core and its host process
//!
//! Limits default to the compile-time maxima in [`crate::format`]. They may be
//! lowered through the environment but never raised past those maxima.

use crate::cipher::BLOCK_SIZE;
use crate::error::{EnclaveError, Result};
use crate::format::{MAX_VALUES, MAX_VECTORS};
use std::path::PathBuf;
use tracing::Level;

/// Bytes copied or decrypted per step when moving payloads across the boundary
pub const CHUNK_SIZE: usize = 8192;

pub const ENV_MAX_VALUES: &str = "ENCLAVE_MAX_VALUES";
pub const ENV_MAX_VECTORS: &str = "ENCLAVE_MAX_VECTORS";
pub const ENV_CHUNK_SIZE: &str = "ENCLAVE_CHUNK_SIZE";
pub const ENV_LOG_LEVEL: &str = "ENCLAVE_LOG_LEVEL";
pub const ENV_KEY_FILE: &str = "ENCLAVE_KEY_FILE";

/// Limits applied by the boundary gateway and the format validator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnclaveConfig {
    /// Upper bound on records in a sealed value-set blob
    pub max_values: u32,
    /// Upper bound on records in a sealed vector-set blob
    pub max_vectors: u32,
    /// Copy/decrypt chunk size in bytes, a multiple of the cipher block
    pub chunk_size: usize,
}

impl Default for EnclaveConfig {
    fn default() -> Self {
        Self {
            max_values: MAX_VALUES,
            max_vectors: MAX_VECTORS,
            chunk_size: CHUNK_SIZE,
        }
    }
}

impl EnclaveConfig {
    /// Creates a config with explicit limits, rejecting out-of-range values
    pub fn new(max_values: u32, max_vectors: u32, chunk_size: usize) -> Result<Self> {
        if max_values == 0 || max_values > MAX_VALUES {
            return Err(EnclaveError::Config(format!(
                "max_values must be in 1..={}, got {}",
                MAX_VALUES, max_values
            )));
        }
        if max_vectors == 0 || max_vectors > MAX_VECTORS {
            return Err(EnclaveError::Config(format!(
                "max_vectors must be in 1..={}, got {}",
                MAX_VECTORS, max_vectors
            )));
        }
        if chunk_size == 0 || chunk_size % BLOCK_SIZE != 0 {
            return Err(EnclaveError::Config(format!(
                "chunk_size must be a non-zero multiple of {}, got {}",
                BLOCK_SIZE, chunk_size
            )));
        }
        Ok(Self {
            max_values,
            max_vectors,
            chunk_size,
        })
    }

    /// Reads overrides from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let max_values = parse_var(&lookup, ENV_MAX_VALUES)?.unwrap_or(defaults.max_values);
        let max_vectors = parse_var(&lookup, ENV_MAX_VECTORS)?.unwrap_or(defaults.max_vectors);
        let chunk_size = parse_var(&lookup, ENV_CHUNK_SIZE)?.unwrap_or(defaults.chunk_size);
        Self::new(max_values, max_vectors, chunk_size)
    }
}

/// Settings that belong to the untrusted host process, not the core
#[derive(Debug, Clone)]
pub struct HostConfig {
    pub log_level: Level,
    /// Optional `key || counter` provisioning file installed at startup
    pub key_file: Option<PathBuf>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            key_file: None,
        }
    }
}

impl HostConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let log_level = match lookup(ENV_LOG_LEVEL) {
            Some(raw) => raw.trim().parse::<Level>().map_err(|_| {
                EnclaveError::Config(format!("{} has invalid level {:?}", ENV_LOG_LEVEL, raw))
            })?,
            None => Level::INFO,
        };
        let key_file = lookup(ENV_KEY_FILE)
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);
        Ok(Self {
            log_level,
            key_file,
        })
    }
}

fn parse_var<F, T>(lookup: &F, name: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| EnclaveError::Config(format!("{} is not a valid number: {:?}", name, raw))),
        None => Ok(None),
    }
}

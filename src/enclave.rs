//! The boundary call surface
//!
//! [`Enclave`] owns every piece of protected state: the value-set store, the
//! vector-set store, the cipher material and the instrumentation counters.
//! Each public method is one boundary call. It runs to completion on the
//! calling thread, copies its inputs in through [`crate::gateway`] before
//! looking at them, and returns only a coarse [`BoundaryStatus`] on failure.
//!
//! A panic inside any call is caught at the call's outermost scope, reported
//! as [`BoundaryStatus::Unexpected`], and all protected state is wiped.

use crate::cipher::{self, CipherMaterial, BLOCK_SIZE, MATERIAL_SIZE};
use crate::config::EnclaveConfig;
use crate::equality::{EqualityEngine, Membership};
use crate::error::{BoundaryResult, BoundaryStatus, EnclaveError, Result};
use crate::format::{self, max_blob_len, BlobKind, HEADER_SIZE, VALUE_RECORD_SIZE};
use crate::gateway;
use crate::instrumentation::{Instrumentation, Phase, TimingReport};
use crate::similarity::{SimilarityEngine, SIMILARITY_UNAVAILABLE};
use crate::store::StoreState;
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;
use tracing::{debug, error, info};
use zeroize::Zeroizing;

/// Protected state behind the boundary
///
/// Not `Clone`: one handle, one resident dataset per engine.
pub struct Enclave {
    config: EnclaveConfig,
    values: EqualityEngine,
    vectors: SimilarityEngine,
    cipher: Option<CipherMaterial>,
    /// Counters for the value set and the calls that work on it
    value_meter: Instrumentation,
    /// Counters for the vector set
    vector_meter: Instrumentation,
}

impl Default for Enclave {
    fn default() -> Self {
        Self::new()
    }
}

impl Enclave {
    /// Creates an empty enclave with default limits
    pub fn new() -> Self {
        Self::with_config(EnclaveConfig::default())
    }

    pub fn with_config(config: EnclaveConfig) -> Self {
        info!(
            max_values = config.max_values,
            max_vectors = config.max_vectors,
            chunk_size = config.chunk_size,
            "Enclave initialized"
        );
        Self {
            config,
            values: EqualityEngine::new(),
            vectors: SimilarityEngine::new(),
            cipher: None,
            value_meter: Instrumentation::new(),
            vector_meter: Instrumentation::new(),
        }
    }

    pub fn config(&self) -> &EnclaveConfig {
        &self.config
    }

    pub fn values_state(&self) -> StoreState {
        self.values.state()
    }

    pub fn vectors_state(&self) -> StoreState {
        self.vectors.state()
    }

    pub fn has_cipher_key(&self) -> bool {
        self.cipher.is_some()
    }

    /// Runs one boundary call, turning a panic into `on_panic` plus a full wipe
    fn guard<T>(&mut self, call: &'static str, on_panic: T, f: impl FnOnce(&mut Self) -> T) -> T {
        match panic::catch_unwind(AssertUnwindSafe(|| f(self))) {
            Ok(out) => out,
            Err(_) => {
                error!(call, "Boundary call panicked, wiping protected state");
                self.cleanup_state();
                on_panic
            }
        }
    }

    /// [`Self::guard`] for calls that report a status
    fn call<T>(
        &mut self,
        call: &'static str,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> BoundaryResult<T> {
        self.guard(call, Err(BoundaryStatus::Unexpected), |this| {
            f(this).map_err(|e| {
                let status = BoundaryStatus::from(&e);
                debug!(call, status = %status, "Boundary call rejected");
                status
            })
        })
    }

    fn blob_limit(&self, kind: BlobKind) -> Result<usize> {
        let count = kind.max_count(self.config.max_values, self.config.max_vectors);
        max_blob_len(kind.record_size(), count)
            .ok_or_else(|| EnclaveError::Unexpected("blob limit overflows".to_string()))
    }

    // ========================================================================
    // Dataset installation
    // ========================================================================

    /// Installs a sealed value-set blob, replacing any resident value set
    ///
    /// On failure the previously resident set (if any) is left as it was.
    pub fn install_values(&mut self, blob: Option<&[u8]>) -> BoundaryResult<()> {
        self.call("install_values", |this| {
            let limit = this.blob_limit(BlobKind::Values)?;
            let buffer = gateway::copy_in(blob, limit, this.config.chunk_size)?;
            let view = format::validate_kind(
                &buffer,
                BlobKind::Values,
                this.config.max_values,
                this.config.max_vectors,
            )?;
            this.values.install(&view)?;
            this.value_meter.reset();
            info!(bytes = buffer.len(), "Secret value set installed");
            Ok(())
        })
    }

    /// Installs a sealed vector-set blob, replacing any resident vector set
    pub fn install_vectors(&mut self, blob: Option<&[u8]>) -> BoundaryResult<()> {
        self.call("install_vectors", |this| {
            let limit = this.blob_limit(BlobKind::Vectors)?;
            let buffer = gateway::copy_in(blob, limit, this.config.chunk_size)?;
            let view = format::validate_kind(
                &buffer,
                BlobKind::Vectors,
                this.config.max_values,
                this.config.max_vectors,
            )?;
            this.vectors.install(&view)?;
            this.vector_meter.reset();
            info!(bytes = buffer.len(), "Reference vector set installed");
            Ok(())
        })
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Membership of `value` in the resident value set
    pub fn check_value(&mut self, value: i32) -> Membership {
        self.guard("check_value", Membership::Uninitialized, |this| {
            let start = Instant::now();
            let Self {
                values,
                value_meter: meter,
                ..
            } = this;
            let membership = meter.timed(Phase::Process, |m| values.check(value, m));
            meter.record(Phase::Total, start.elapsed());
            membership
        })
    }

    /// Membership of `value`, returned as one AES-CTR block
    ///
    /// The plaintext block is `[1 or 0, 0, 0, ...]` encrypted under the
    /// installed key at the current counter. The counter then advances one
    /// block so the next result never reuses it.
    pub fn check_value_encrypted(&mut self, value: i32) -> BoundaryResult<[u8; BLOCK_SIZE]> {
        self.call("check_value_encrypted", |this| {
            let start = Instant::now();
            let Self {
                values,
                cipher: material_slot,
                value_meter: meter,
                ..
            } = this;

            let material = material_slot
                .as_mut()
                .ok_or(EnclaveError::Uninitialized("cipher key"))?;
            if values.state() != StoreState::Ready {
                return Err(EnclaveError::Uninitialized("value set"));
            }

            let membership = meter.timed(Phase::Process, |m| values.check(value, m));

            let mut block = Zeroizing::new([0u8; BLOCK_SIZE]);
            block[0] = u8::from(membership.is_match());
            let ciphertext = meter.timed(Phase::Encrypt, |_| {
                cipher::encrypt(&block[..], material.key(), material.counter())
            })?;
            material.advance(BLOCK_SIZE);

            let out = gateway::copy_out(&ciphertext, BLOCK_SIZE)?;
            let mut result = [0u8; BLOCK_SIZE];
            result.copy_from_slice(&out);
            meter.record(Phase::Total, start.elapsed());
            Ok(result)
        })
    }

    /// Max cosine similarity of a raw query against the resident vectors
    ///
    /// `-2.0` when no vectors are resident or the query is missing or not
    /// exactly `VECTOR_DIM` long, `-1.0` for a zero query.
    pub fn max_similarity(&mut self, query: Option<&[f32]>) -> f32 {
        self.guard("max_similarity", SIMILARITY_UNAVAILABLE, |this| {
            let start = Instant::now();
            let Self {
                vectors,
                vector_meter: meter,
                ..
            } = this;
            let score = meter.timed(Phase::Process, |m| vectors.max_similarity(query, m));
            meter.record(Phase::Total, start.elapsed());
            score
        })
    }

    /// [`Self::max_similarity`] for a sealed query-vector blob
    pub fn max_similarity_sealed(&mut self, blob: Option<&[u8]>) -> f32 {
        self.guard("max_similarity_sealed", SIMILARITY_UNAVAILABLE, |this| {
            let start = Instant::now();
            let query = this.blob_limit(BlobKind::Query).and_then(|limit| {
                let buffer = gateway::copy_in(blob, limit, this.config.chunk_size)?;
                let view = format::validate_kind(
                    &buffer,
                    BlobKind::Query,
                    this.config.max_values,
                    this.config.max_vectors,
                )?;
                format::decode_query(&view)
            });
            let query = match query {
                Ok(q) => q,
                Err(e) => {
                    debug!(status = %BoundaryStatus::from(&e), "Sealed query rejected");
                    return SIMILARITY_UNAVAILABLE;
                }
            };
            let Self {
                vectors,
                vector_meter: meter,
                ..
            } = this;
            let score = meter.timed(Phase::Process, |m| {
                vectors.max_similarity(Some(&query[..]), m)
            });
            meter.record(Phase::Total, start.elapsed());
            score
        })
    }

    // ========================================================================
    // Payload decryption
    // ========================================================================

    /// Decrypts a `counter[16] || ciphertext` test-data blob
    ///
    /// `expected_len` is the plaintext length. The counter comes from the
    /// blob itself, never from the installed material. The plaintext must be a
    /// well-formed sealed value list (order is not checked) before it is
    /// copied out.
    pub fn decrypt_payload(
        &mut self,
        blob: Option<&[u8]>,
        expected_len: usize,
    ) -> BoundaryResult<Vec<u8>> {
        self.call("decrypt_payload", |this| {
            let start = Instant::now();
            let key = Zeroizing::new(
                *this
                    .cipher
                    .as_ref()
                    .ok_or(EnclaveError::Uninitialized("cipher key"))?
                    .key(),
            );

            let plaintext_limit = this.blob_limit(BlobKind::Values)?;
            if expected_len < HEADER_SIZE || expected_len > plaintext_limit {
                return Err(EnclaveError::InvalidParameter(format!(
                    "expected length {} outside {}..={}",
                    expected_len, HEADER_SIZE, plaintext_limit
                )));
            }

            let mut buffer =
                gateway::copy_in(blob, BLOCK_SIZE + plaintext_limit, this.config.chunk_size)?;
            if buffer.len() != BLOCK_SIZE + expected_len {
                return Err(EnclaveError::SizeMismatch {
                    expected: BLOCK_SIZE + expected_len,
                    actual: buffer.len(),
                });
            }

            let (counter_bytes, payload) = buffer.as_mut_slice().split_at_mut(BLOCK_SIZE);
            let mut counter = Zeroizing::new([0u8; BLOCK_SIZE]);
            counter.copy_from_slice(counter_bytes);

            let chunk_size = this.config.chunk_size;
            this.value_meter.timed(Phase::Decrypt, |_| {
                cipher::decrypt_in_place(payload, &key, &counter, chunk_size)
            })?;

            format::validate(payload, VALUE_RECORD_SIZE, this.config.max_values)?;
            let out = gateway::copy_out(payload, expected_len)?;
            this.value_meter.record(Phase::Total, start.elapsed());
            debug!(bytes = expected_len, "Payload decrypted");
            Ok(out)
        })
    }

    // ========================================================================
    // Key material
    // ========================================================================

    /// Installs `key[16] || counter[16]`, replacing any previous material
    pub fn install_cipher_key(&mut self, material: Option<&[u8]>) -> BoundaryResult<()> {
        self.call("install_cipher_key", |this| {
            let buffer = gateway::copy_in(material, MATERIAL_SIZE, this.config.chunk_size)?;
            this.cipher = Some(CipherMaterial::from_bytes(&buffer)?);
            info!("Cipher material installed");
            Ok(())
        })
    }

    /// Replaces the counter block used for the next result encryption
    pub fn update_counter(&mut self, counter: Option<&[u8]>) -> BoundaryResult<()> {
        self.call("update_counter", |this| {
            let buffer = gateway::copy_in(counter, BLOCK_SIZE, this.config.chunk_size)?;
            let material = this
                .cipher
                .as_mut()
                .ok_or(EnclaveError::Uninitialized("cipher key"))?;
            let block: [u8; BLOCK_SIZE] = buffer.as_slice().try_into().map_err(|_| {
                EnclaveError::InvalidParameter(format!(
                    "counter must be {} bytes, got {}",
                    BLOCK_SIZE,
                    buffer.len()
                ))
            })?;
            material.set_counter(block);
            debug!("Counter updated");
            Ok(())
        })
    }

    // ========================================================================
    // Instrumentation
    // ========================================================================

    /// Dataset reads across both resident sets since each was installed
    pub fn access_count(&self) -> u64 {
        self.value_meter
            .access_count()
            .saturating_add(self.vector_meter.access_count())
    }

    /// Dataset reads against the value set since it was installed
    pub fn value_access_count(&self) -> u64 {
        self.value_meter.access_count()
    }

    /// Dataset reads against the vector set since it was installed
    pub fn vector_access_count(&self) -> u64 {
        self.vector_meter.access_count()
    }

    pub fn timing(&self) -> TimingReport {
        self.value_meter.timing().combined(self.vector_meter.timing())
    }

    /// Zeroes access and timing counters for both datasets
    pub fn reset_timing(&mut self) {
        self.value_meter.reset();
        self.vector_meter.reset();
    }

    // ========================================================================
    // Teardown
    // ========================================================================

    /// Wipes and releases every resident dataset and the cipher material
    pub fn cleanup(&mut self) {
        self.guard("cleanup", (), |this| this.cleanup_state());
        info!("Enclave state cleaned up");
    }

    fn cleanup_state(&mut self) {
        self.values.clear();
        self.vectors.clear();
        self.cipher = None;
        self.value_meter.reset();
        self.vector_meter.reset();
    }
}

impl Drop for Enclave {
    fn drop(&mut self) {
        self.cleanup_state();
    }
}

//! Boundary marshaling primitives
//!
//! Inbound data is copied, then validated. Outbound data is validated, then
//! copied. A caller buffer is read exactly once (by [`copy_in`]) and never
//! used in place; every algorithm runs on the [`BoundaryBuffer`] copy, which
//! zeroes itself when dropped, including when a copy fails part way.
//!
//! Copies proceed in fixed-size chunks so that a large payload never needs one
//! oversized step. This bounds per-step work; it does not hide the fact that
//! total copy time grows with payload size.

use crate::error::{EnclaveError, Result};
use std::ops::Deref;
use tracing::debug;
use zeroize::Zeroizing;

/// Allocates an empty vector with exactly `len` slots, failing instead of aborting
pub(crate) fn try_vec<T>(len: usize) -> Result<Vec<T>> {
    let mut v = Vec::new();
    v.try_reserve_exact(len)
        .map_err(|_| EnclaveError::OutOfMemory(len.saturating_mul(std::mem::size_of::<T>())))?;
    Ok(v)
}

/// Boundary-owned copy of caller data, zeroed on drop
pub struct BoundaryBuffer {
    bytes: Zeroizing<Vec<u8>>,
}

impl BoundaryBuffer {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

impl Deref for BoundaryBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.bytes
    }
}

impl std::fmt::Debug for BoundaryBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundaryBuffer")
            .field("len", &self.bytes.len())
            .finish_non_exhaustive()
    }
}

/// Copies a caller payload into boundary-owned memory
///
/// `src` of `None` stands for a null pointer. Both `None` and a zero-length
/// slice are rejected, as is anything longer than `max_len`, before any
/// allocation happens.
pub fn copy_in(src: Option<&[u8]>, max_len: usize, chunk_size: usize) -> Result<BoundaryBuffer> {
    let src = src.ok_or_else(|| EnclaveError::InvalidParameter("null input buffer".to_string()))?;

    if src.is_empty() {
        return Err(EnclaveError::InvalidParameter("empty input buffer".to_string()));
    }
    if src.len() > max_len {
        return Err(EnclaveError::InvalidParameter(format!(
            "input of {} bytes exceeds limit of {}",
            src.len(),
            max_len
        )));
    }
    if chunk_size == 0 {
        return Err(EnclaveError::Unexpected("zero copy chunk size".to_string()));
    }

    let mut bytes = Zeroizing::new(try_vec::<u8>(src.len())?);
    for chunk in src.chunks(chunk_size) {
        bytes.extend_from_slice(chunk);
    }

    debug!(len = bytes.len(), "Copied payload into boundary");
    Ok(BoundaryBuffer { bytes })
}

/// Copies a validated result out to a fresh caller-owned buffer
///
/// `expected_len` is checked before anything is copied.
pub fn copy_out(src: &[u8], expected_len: usize) -> Result<Vec<u8>> {
    if src.len() != expected_len {
        return Err(EnclaveError::SizeMismatch {
            expected: expected_len,
            actual: src.len(),
        });
    }
    let mut out = try_vec::<u8>(src.len())?;
    out.extend_from_slice(src);
    Ok(out)
}

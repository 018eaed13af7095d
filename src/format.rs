//! Sealed blob format and validation
//!
//! Every sealed payload shares one little-endian layout:
//!
//! ```text
//! ┌──────────────┬────────────┬──────────────────────────────┐
//! │ version: u32 │ count: u32 │ count × record               │
//! └──────────────┴────────────┴──────────────────────────────┘
//! ```
//!
//! | Blob        | Record             | Count bound     |
//! |-------------|--------------------|-----------------|
//! | value set   | `i32`              | `MAX_VALUES`    |
//! | vector set  | `f32 × VECTOR_DIM` | `MAX_VECTORS`   |
//! | query       | `f32 × VECTOR_DIM` | exactly 1       |
//!
//! [`validate`] checks the header and the exact total length before anything
//! past the header is looked at, then hands back a borrowed view. It never
//! copies; the decoders below do that with fallible allocation.

use crate::error::{EnclaveError, Result};
use crate::gateway::try_vec;

pub const CURRENT_VERSION: u32 = 1;
pub const HEADER_SIZE: usize = 8;
pub const VECTOR_DIM: usize = 512;

/// 2^21 values
pub const MAX_VALUES: u32 = 2_097_152;
pub const MAX_VECTORS: u32 = 65_536;

pub const VALUE_RECORD_SIZE: usize = std::mem::size_of::<i32>();
pub const VECTOR_RECORD_SIZE: usize = VECTOR_DIM * std::mem::size_of::<f32>();

/// Fixed-size header at the front of every sealed blob
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SealedHeader {
    pub version: u32,
    pub count: u32,
}

impl SealedHeader {
    /// Header for the current format version
    pub fn new(count: u32) -> Self {
        Self {
            version: CURRENT_VERSION,
            count,
        }
    }

    /// Reads the raw header fields without judging them
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let (version, count) = match bytes {
            [v0, v1, v2, v3, c0, c1, c2, c3, ..] => (
                u32::from_le_bytes([*v0, *v1, *v2, *v3]),
                u32::from_le_bytes([*c0, *c1, *c2, *c3]),
            ),
            _ => {
                return Err(EnclaveError::InvalidParameter(format!(
                    "blob of {} bytes is shorter than the {}-byte header",
                    bytes.len(),
                    HEADER_SIZE
                )))
            }
        };
        Ok(Self { version, count })
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[..4].copy_from_slice(&self.version.to_le_bytes());
        out[4..].copy_from_slice(&self.count.to_le_bytes());
        out
    }
}

/// The three sealed blob layouts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobKind {
    Values,
    Vectors,
    Query,
}

impl BlobKind {
    pub fn record_size(self) -> usize {
        match self {
            BlobKind::Values => VALUE_RECORD_SIZE,
            BlobKind::Vectors | BlobKind::Query => VECTOR_RECORD_SIZE,
        }
    }

    /// Largest record count accepted under the given value/vector limits
    pub fn max_count(self, max_values: u32, max_vectors: u32) -> u32 {
        match self {
            BlobKind::Values => max_values,
            BlobKind::Vectors => max_vectors,
            BlobKind::Query => 1,
        }
    }
}

/// Largest legal blob length for a record layout, `None` on overflow
pub fn max_blob_len(record_size: usize, max_count: u32) -> Option<usize> {
    (max_count as usize)
        .checked_mul(record_size)?
        .checked_add(HEADER_SIZE)
}

/// A validated blob: trusted header plus the untouched record bytes
#[derive(Debug, Clone, Copy)]
pub struct SealedView<'a> {
    header: SealedHeader,
    records: &'a [u8],
}

impl<'a> SealedView<'a> {
    pub fn header(&self) -> SealedHeader {
        self.header
    }

    pub fn count(&self) -> usize {
        self.header.count as usize
    }

    pub fn records(&self) -> &'a [u8] {
        self.records
    }
}

/// Validates a sealed blob against a record layout
///
/// Rejects, in order: a buffer shorter than the header, a version other than
/// [`CURRENT_VERSION`], a count of zero or above `max_count`, and any total
/// length other than `HEADER_SIZE + count * record_size`.
pub fn validate(bytes: &[u8], record_size: usize, max_count: u32) -> Result<SealedView<'_>> {
    let header = SealedHeader::decode(bytes)?;

    if header.version != CURRENT_VERSION {
        return Err(EnclaveError::InvalidVersion {
            expected: CURRENT_VERSION,
            found: header.version,
        });
    }

    if header.count == 0 || header.count > max_count {
        return Err(EnclaveError::InvalidParameter(format!(
            "record count {} outside 1..={}",
            header.count, max_count
        )));
    }

    let expected = (header.count as usize)
        .checked_mul(record_size)
        .and_then(|n| n.checked_add(HEADER_SIZE))
        .ok_or_else(|| EnclaveError::InvalidParameter("record region overflows".to_string()))?;

    if expected != bytes.len() {
        return Err(EnclaveError::SizeMismatch {
            expected,
            actual: bytes.len(),
        });
    }

    let records = bytes
        .get(HEADER_SIZE..)
        .ok_or_else(|| EnclaveError::Unexpected("record region out of range".to_string()))?;

    Ok(SealedView { header, records })
}

/// Validates a blob of a known kind
pub fn validate_kind(
    bytes: &[u8],
    kind: BlobKind,
    max_values: u32,
    max_vectors: u32,
) -> Result<SealedView<'_>> {
    validate(bytes, kind.record_size(), kind.max_count(max_values, max_vectors))
}

/// Copies the integer records out of a validated value-set view
pub fn decode_values(view: &SealedView<'_>) -> Result<Vec<i32>> {
    let mut values = try_vec::<i32>(view.count())?;
    values.extend(
        view.records
            .chunks_exact(VALUE_RECORD_SIZE)
            .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]])),
    );
    Ok(values)
}

/// Copies the float records out of a validated vector view, row-major
pub fn decode_vectors(view: &SealedView<'_>) -> Result<Vec<f32>> {
    let len = view
        .count()
        .checked_mul(VECTOR_DIM)
        .ok_or_else(|| EnclaveError::InvalidParameter("vector region overflows".to_string()))?;
    let mut floats = try_vec::<f32>(len)?;
    floats.extend(
        view.records
            .chunks_exact(std::mem::size_of::<f32>())
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]])),
    );
    Ok(floats)
}

/// Copies the single vector out of a validated query view
pub fn decode_query(view: &SealedView<'_>) -> Result<[f32; VECTOR_DIM]> {
    if view.count() != 1 {
        return Err(EnclaveError::InvalidParameter(format!(
            "query blob must hold exactly one vector, found {}",
            view.count()
        )));
    }
    let mut query = [0f32; VECTOR_DIM];
    for (slot, c) in query
        .iter_mut()
        .zip(view.records.chunks_exact(std::mem::size_of::<f32>()))
    {
        *slot = f32::from_le_bytes([c[0], c[1], c[2], c[3]]);
    }
    Ok(query)
}

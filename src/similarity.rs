//! Maximum cosine similarity against the resident reference vectors
//!
//! All arithmetic is `f32`. Magnitudes are recomputed per call from
//! sum-of-squares; nothing is normalized ahead of time.

use crate::error::Result;
use crate::format::{self, SealedView, VECTOR_DIM};
use crate::instrumentation::Instrumentation;
use crate::store::{SecretStore, StoreState};
use tracing::debug;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Returned when no vectors are resident or the query is malformed
pub const SIMILARITY_UNAVAILABLE: f32 = -2.0;
/// Returned for a zero query, or when every reference vector is zero
pub const SIMILARITY_NONE: f32 = -1.0;
/// Magnitudes below this are treated as zero
pub const ZERO_EPSILON: f32 = 1e-6;

/// True for a score in `[-1, 1]`; anything else is a computation defect
pub fn is_valid_similarity(score: f32) -> bool {
    (-1.0..=1.0).contains(&score)
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn magnitude(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

fn is_effectively_zero(value: f32) -> bool {
    value.abs() < ZERO_EPSILON
}

/// Reference vectors stored row-major, `VECTOR_DIM` floats per row
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct VectorSet {
    data: Vec<f32>,
}

impl VectorSet {
    pub fn from_view(view: &SealedView<'_>) -> Result<Self> {
        Ok(Self {
            data: format::decode_vectors(view)?,
        })
    }

    pub fn len(&self) -> usize {
        self.data.len() / VECTOR_DIM
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(VECTOR_DIM)
    }

    /// Best cosine similarity of `query` against any non-zero row
    pub fn max_similarity(&self, query: &[f32; VECTOR_DIM], meter: &mut Instrumentation) -> f32 {
        let query_magnitude = magnitude(query);
        if is_effectively_zero(query_magnitude) {
            return SIMILARITY_NONE;
        }

        let mut best = SIMILARITY_NONE;
        for row in self.rows() {
            meter.touch();
            let row_magnitude = magnitude(row);
            if is_effectively_zero(row_magnitude) {
                continue;
            }
            // f32 rounding can land a parallel pair just past 1.0
            let similarity =
                (dot(query, row) / (query_magnitude * row_magnitude)).clamp(-1.0, 1.0);
            if similarity > best {
                best = similarity;
            }
        }
        best
    }
}

impl std::fmt::Debug for VectorSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorSet")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

/// Similarity engine over its own store
#[derive(Default)]
pub struct SimilarityEngine {
    store: SecretStore<VectorSet>,
}

impl SimilarityEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> StoreState {
        self.store.state()
    }

    pub fn resident_count(&self) -> usize {
        self.store.get().map_or(0, VectorSet::len)
    }

    pub fn install(&mut self, view: &SealedView<'_>) -> Result<()> {
        self.store.install(|| VectorSet::from_view(view))?;
        debug!("Vector set installed");
        Ok(())
    }

    /// Max similarity for a raw query; `None` or a wrong length is malformed
    pub fn max_similarity(&self, query: Option<&[f32]>, meter: &mut Instrumentation) -> f32 {
        let Some(set) = self.store.get() else {
            return SIMILARITY_UNAVAILABLE;
        };
        let Some(query) = query.and_then(|q| <&[f32; VECTOR_DIM]>::try_from(q).ok()) else {
            return SIMILARITY_UNAVAILABLE;
        };
        set.max_similarity(query, meter)
    }

    pub fn clear(&mut self) {
        self.store.clear();
    }
}

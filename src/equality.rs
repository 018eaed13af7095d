//! Set membership against the resident sorted integer set
//!
//! Lookup is a plain binary search. Every probe ticks the access counter once
//! whether or not it hits, so matching and non-matching queries leave the same
//! number of recorded touches for a given path length. The cache footprint of
//! those probes still depends on the data layout and is not masked.

use crate::error::Result;
use crate::format::{self, SealedView};
use crate::instrumentation::Instrumentation;
use crate::store::{SecretStore, StoreState};
use serde::Serialize;
use tracing::debug;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Outcome of a membership check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Membership {
    Match,
    NoMatch,
    Empty,
    Uninitialized,
}

impl Membership {
    /// Wire code: 1 match, 0 no match, -1 uninitialized, -2 empty
    pub fn code(self) -> i32 {
        match self {
            Membership::Match => 1,
            Membership::NoMatch => 0,
            Membership::Uninitialized => -1,
            Membership::Empty => -2,
        }
    }

    pub fn is_match(self) -> bool {
        self == Membership::Match
    }
}

/// Strictly ascending, duplicate-free secret integers
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct ValueSet {
    values: Vec<i32>,
}

impl ValueSet {
    /// Sorts and deduplicates in place
    pub fn from_unsorted(mut values: Vec<i32>) -> Self {
        values.sort_unstable();
        values.dedup();
        Self { values }
    }

    /// Builds from a validated value-set view
    pub fn from_view(view: &SealedView<'_>) -> Result<Self> {
        Ok(Self::from_unsorted(format::decode_values(view)?))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Binary search over `[left, right]`, one `touch` per probe
    pub fn contains(&self, value: i32, meter: &mut Instrumentation) -> bool {
        if self.values.is_empty() {
            return false;
        }
        let mut left = 0usize;
        let mut right = self.values.len() - 1;

        while left <= right {
            let mid = left + (right - left) / 2;
            meter.touch();
            let probe = self.values[mid];

            if probe == value {
                return true;
            }
            if probe < value {
                left = mid + 1;
            } else {
                if mid == 0 {
                    break;
                }
                right = mid - 1;
            }
        }
        false
    }
}

impl std::fmt::Debug for ValueSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValueSet")
            .field("len", &self.values.len())
            .finish_non_exhaustive()
    }
}

/// Membership engine over its own store
#[derive(Default)]
pub struct EqualityEngine {
    store: SecretStore<ValueSet>,
}

impl EqualityEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> StoreState {
        self.store.state()
    }

    /// Number of resident values, zero unless `Ready`
    pub fn resident_count(&self) -> usize {
        self.store.get().map_or(0, ValueSet::len)
    }

    /// Installs a new value set built from a validated view
    pub fn install(&mut self, view: &SealedView<'_>) -> Result<()> {
        self.store.install(|| ValueSet::from_view(view))?;
        debug!("Value set installed");
        Ok(())
    }

    pub fn check(&self, value: i32, meter: &mut Instrumentation) -> Membership {
        let Some(set) = self.store.get() else {
            return Membership::Uninitialized;
        };
        if set.is_empty() {
            return Membership::Empty;
        }
        if set.contains(value, meter) {
            Membership::Match
        } else {
            Membership::NoMatch
        }
    }

    pub fn clear(&mut self) {
        self.store.clear();
    }
}

//! Resident secret dataset and its lifecycle
//!
//! ```text
//!   Empty ──install──▶ Loading ──ok──▶ Ready
//!     ▲                  │  ▲            │
//!     │                  │  └─install────┘
//!     └────clear─────────┴──────clear────┘
//! ```
//!
//! A failed install returns the store to exactly the state it was in before:
//! the replacement is built in full before the resident dataset is wiped, so
//! an allocation failure never destroys the old data.

use crate::error::Result;
use tracing::debug;
use zeroize::Zeroize;

/// Lifecycle state of a [`SecretStore`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreState {
    Empty,
    Loading,
    Ready,
}

/// Owner of exactly one resident dataset
pub struct SecretStore<D: Zeroize> {
    state: StoreState,
    data: Option<D>,
}

impl<D: Zeroize> Default for SecretStore<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: Zeroize> SecretStore<D> {
    pub fn new() -> Self {
        Self {
            state: StoreState::Empty,
            data: None,
        }
    }

    pub fn state(&self) -> StoreState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == StoreState::Ready
    }

    /// Resident dataset, only while `Ready`
    pub fn get(&self) -> Option<&D> {
        match self.state {
            StoreState::Ready => self.data.as_ref(),
            _ => None,
        }
    }

    /// Replaces the resident dataset with the output of `build`
    ///
    /// If `build` fails the previous dataset and state are left untouched.
    pub fn install<F>(&mut self, build: F) -> Result<()>
    where
        F: FnOnce() -> Result<D>,
    {
        let previous = self.state;
        self.state = StoreState::Loading;

        match build() {
            Ok(replacement) => {
                if let Some(mut old) = self.data.take() {
                    old.zeroize();
                }
                self.data = Some(replacement);
                self.state = StoreState::Ready;
                debug!("Resident dataset replaced");
                Ok(())
            }
            Err(e) => {
                self.state = previous;
                Err(e)
            }
        }
    }

    /// Wipes and releases the resident dataset; safe to call repeatedly
    pub fn clear(&mut self) {
        if let Some(mut old) = self.data.take() {
            old.zeroize();
        }
        self.state = StoreState::Empty;
    }
}

impl<D: Zeroize> Drop for SecretStore<D> {
    fn drop(&mut self) {
        self.clear();
    }
}

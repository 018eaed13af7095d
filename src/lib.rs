//! Sealed Query - a trust-boundary core for private membership and similarity
//!
//! This library holds secret datasets behind a narrow call surface:
//! - Sealed blob validation and chunked copy across the boundary
//! - AES-128-CTR encryption of results and decryption of test payloads
//! - Binary-search membership over a resident integer set
//! - Maximum cosine similarity over resident 512-dimensional vectors
//! - Access counting and per-phase timing
//! - A JSON-RPC dispatcher for the untrusted host

pub mod cipher;
pub mod config;
pub mod enclave;
pub mod equality;
pub mod error;
pub mod format;
pub mod gateway;
pub mod instrumentation;
pub mod rpc;
pub mod sealer;
pub mod similarity;
pub mod store;

pub use enclave::Enclave;
pub use equality::Membership;
pub use error::{BoundaryStatus, EnclaveError};

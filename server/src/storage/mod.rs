//! Encrypted content-addressed storage.
//!
//! Record payloads are sealed with AES-256-GCM (`crypto`) under keys from the
//! keyring (`keys`), then handed to a blob backend through the retrying
//! `client`. Backends: an IPFS pinning service (`pinning`) or local files
//! (`local`).

pub mod backend;
pub mod client;
pub mod crypto;
pub mod keys;
pub mod local;
pub mod pinning;

pub use backend::{BackendError, BlobBackend, Cid};
pub use client::{RetryPolicy, StoreClient};

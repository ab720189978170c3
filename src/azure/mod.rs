//! Azure Blob Storage backend: Shared Key and SAS authentication and the
//! blob REST adapter with its block-based multipart semantics.

pub mod bucket;
pub mod config;
pub mod signer;

pub use bucket::BlobContainer;
pub use config::{AzureConfig, AzureOptions, Operation};
pub use signer::AzureSigner;

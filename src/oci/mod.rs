//! Oracle Cloud Object Storage backend: RSA request signatures and the OCI
//! REST adapter with its JSON wire formats.

pub mod bucket;
pub mod config;
pub mod signer;

pub use bucket::OciBucket;
pub use config::{OciConfig, OciOptions};
pub use signer::OciSigner;

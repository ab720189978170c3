//! AWS S3 backend: SigV4 request signing, the S3 REST adapter and the STS
//! temporary-credential client.

pub mod bucket;
pub mod config;
pub mod signer;
pub mod sts;

pub use bucket::S3Bucket;
pub use config::{AwsCredentials, S3Config, S3Options};
pub use signer::{AwsSigner, CredentialsProvider};
pub use sts::{AssumeRoleProvider, StsClient};

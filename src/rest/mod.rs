//! Signed, retrying REST plumbing shared by every storage backend.

pub mod encode;
pub mod request;
pub mod response;
pub mod retry;
pub mod service;
pub mod signer;
pub mod transport;

pub use request::{Headers, Method, Request};
pub use response::Response;
pub use retry::{default_retry_strategy, RetryRequest, RetryStrategy, RetryStrategyBuilder};
pub use service::SignedRestService;
pub use signer::Signer;
pub use transport::{HttpTransport, TransportOptions};

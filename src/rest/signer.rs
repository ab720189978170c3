use async_trait::async_trait;
use time::OffsetDateTime;

use crate::error::Result;
use crate::rest::request::{Headers, Request};

/// Produces per-request authorization headers.
///
/// Implementations are deterministic given `(request, now, credentials)`;
/// the signed service relies on that to cache header sets.
#[async_trait]
pub trait Signer: Send + Sync {
    /// Whether this request needs to be signed at all. SAS-style credentials
    /// travel in the query string and return `false` here.
    fn should_sign(&self, request: &Request) -> bool;

    /// Computes the header set to add to the request.
    fn sign(&self, request: &Request, now: OffsetDateTime) -> Result<Headers>;

    /// Re-acquires credentials, e.g. after a 401 or an STS expiry. Returns
    /// `true` when the credentials actually changed, which invalidates any
    /// cached signatures.
    async fn refresh_credentials(&self) -> Result<bool> {
        Ok(false)
    }

    fn credentials_expired(&self, _now: OffsetDateTime) -> bool {
        false
    }
}

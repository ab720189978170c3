use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use http::StatusCode;
use time::OffsetDateTime;
use tracing::debug;

use crate::error::Result;
use crate::masked::MaskedString;
use crate::rest::request::{Headers, Method, Request};
use crate::rest::response::Response;
use crate::rest::retry::{default_retry_strategy, RetryRequest, RetryStrategy};
use crate::rest::signer::Signer;
use crate::rest::transport::{HttpTransport, TransportOptions};

/// Signatures are valid well within the server's allowed clock skew; caching
/// them avoids recomputing the HMAC/RSA work for every request.
const HEADER_CACHE_TTL: Duration = Duration::from_secs(60);

const AUTHORIZATION_RETRY_LIMIT: u32 = 2;

#[derive(Default)]
struct SignatureCache {
    entries: HashMap<(String, Method), (Headers, Instant)>,
    cleared_at: Option<Instant>,
}

impl SignatureCache {
    /// Lazily drops expired entries so the cache stays bounded.
    fn purge(&mut self, now: Instant) {
        let cleared_at = *self.cleared_at.get_or_insert(now);

        if now.duration_since(cleared_at) > HEADER_CACHE_TTL {
            let before = self.entries.len();
            self.entries
                .retain(|_, (_, at)| now.duration_since(*at) <= HEADER_CACHE_TTL);
            debug!(
                removed = before - self.entries.len(),
                "purged signature cache"
            );
            self.cleared_at = Some(now);
        }
    }

    fn get(&self, key: &(String, Method), now: Instant) -> Option<Headers> {
        self.entries
            .get(key)
            .filter(|(_, at)| now.duration_since(*at) <= HEADER_CACHE_TTL)
            .map(|(headers, _)| headers.clone())
    }

    fn insert(&mut self, key: (String, Method), headers: Headers, now: Instant) {
        self.entries.insert(key, (headers, now));
    }

    fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Signed REST service: one transport per endpoint, a signature cache, and
/// the retry state machine from the request's (or the default) strategy.
///
/// ```text
/// PREPARE -> (sign?) -> EXECUTE -> inspect status ->
///   2xx -> DONE
///   401 and auth retries left -> refresh credentials -> clear cache -> EXECUTE
///   retryable -> wait -> EXECUTE
///   terminal -> ERROR
/// ```
pub struct SignedRestService {
    endpoint: MaskedString,
    label: String,
    transport: HttpTransport,
    signer: Arc<dyn Signer>,
    cache: Mutex<SignatureCache>,
}

impl SignedRestService {
    pub fn new(
        endpoint: MaskedString,
        label: impl Into<String>,
        signer: Arc<dyn Signer>,
        options: &TransportOptions,
    ) -> Result<Self> {
        let transport = HttpTransport::new(endpoint.real(), options)?;

        Ok(Self {
            endpoint,
            label: label.into(),
            transport,
            signer,
            cache: Mutex::new(SignatureCache::default()),
        })
    }

    pub fn endpoint(&self) -> &MaskedString {
        &self.endpoint
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub async fn get(&self, mut request: Request) -> Result<Response> {
        request.method = Method::Get;
        request.body = None;
        self.execute(request).await
    }

    pub async fn head(&self, mut request: Request) -> Result<Response> {
        request.method = Method::Head;
        request.body = None;
        self.execute(request).await
    }

    pub async fn post(&self, mut request: Request) -> Result<Response> {
        request.method = Method::Post;
        self.execute(request).await
    }

    pub async fn put(&self, mut request: Request) -> Result<Response> {
        request.method = Method::Put;
        self.execute(request).await
    }

    pub async fn delete(&self, mut request: Request) -> Result<Response> {
        request.method = Method::Delete;
        request.body = None;
        self.execute(request).await
    }

    async fn execute(&self, request: Request) -> Result<Response> {
        let strategy: RetryStrategy = request
            .retry
            .clone()
            .unwrap_or_else(default_retry_strategy);
        let mut session = strategy.session();
        let mut auth_retries = 0;

        loop {
            let headers = self.request_headers(&request).await?;
            let result = self.transport.execute(&request, &headers).await;

            let retry_request = match result {
                Ok(response) if response.is_success() => return Ok(response),
                Ok(response) => {
                    if StatusCode::UNAUTHORIZED == response.status
                        && auth_retries < AUTHORIZATION_RETRY_LIMIT
                    {
                        auth_retries += 1;

                        if self.signer.refresh_credentials().await? {
                            debug!(
                                endpoint = %self.endpoint,
                                label = self.label,
                                "credentials refreshed, invalidating signature cache"
                            );
                            self.cache.lock().expect("cache mutex").clear();
                            continue;
                        }
                    }

                    let error = response.into_error();
                    let retry_request = RetryRequest::from_error(&error);

                    if !session.should_retry(&retry_request) {
                        return Err(error);
                    }

                    retry_request
                }
                Err(error) => {
                    let retry_request = RetryRequest::from_error(&error);

                    if !session.should_retry(&retry_request) {
                        return Err(error);
                    }

                    retry_request
                }
            };

            debug!(
                endpoint = %self.endpoint,
                path = request.path.masked(),
                attempt = session.retry_count() + 1,
                sleep = ?session.next_sleep_time(),
                reason = ?retry_request,
                "retrying request"
            );
            session.wait_for_retry().await;
        }
    }

    /// Computes the final header set: cached signature (bodyless requests
    /// only) merged with the request's own headers, which win on conflict.
    async fn request_headers(&self, request: &Request) -> Result<Headers> {
        if !self.signer.should_sign(request) {
            return Ok(request.headers.clone());
        }

        let now = OffsetDateTime::now_utc();

        if self.signer.credentials_expired(now) && self.signer.refresh_credentials().await? {
            self.cache.lock().expect("cache mutex").clear();
        }

        let key = (request.path.real().to_string(), request.method);
        let instant = Instant::now();
        let has_body = request.body_len() > 0;

        let cached = if has_body {
            // the body hash is part of the signature, never reuse
            None
        } else {
            let mut cache = self.cache.lock().expect("cache mutex");
            cache.purge(instant);
            cache.get(&key, instant)
        };

        let mut headers = match cached {
            Some(headers) => headers,
            None => {
                let signed = self.signer.sign(request, now)?;

                if !has_body {
                    self.cache
                        .lock()
                        .expect("cache mutex")
                        .insert(key, signed.clone(), instant);
                }

                signed
            }
        };

        for (name, value) in &request.headers {
            headers.insert(name.clone(), value.clone());
        }

        Ok(headers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn cache_expires_entries_after_ttl() {
        let mut cache = SignatureCache::default();
        let t0 = Instant::now();
        let key = ("/bucket/key".to_string(), Method::Get);

        cache.insert(key.clone(), Headers::new(), t0);
        assert!(cache.get(&key, t0).is_some());
        assert!(cache
            .get(&key, t0 + Duration::from_secs(59))
            .is_some());
        assert!(cache
            .get(&key, t0 + Duration::from_secs(61))
            .is_none());
    }

    #[test]
    fn purge_drops_only_stale_entries() {
        let mut cache = SignatureCache::default();
        let t0 = Instant::now();

        cache.purge(t0);
        cache.insert(("/a".to_string(), Method::Get), Headers::new(), t0);
        cache.insert(
            ("/b".to_string(), Method::Get),
            Headers::new(),
            t0 + Duration::from_secs(100),
        );

        cache.purge(t0 + Duration::from_secs(120));
        assert!(cache
            .get(&("/a".to_string(), Method::Get), t0 + Duration::from_secs(120))
            .is_none());
        assert_eq!(cache.entries.len(), 1);
    }

    #[test]
    fn method_is_part_of_the_cache_key() {
        let mut cache = SignatureCache::default();
        let t0 = Instant::now();

        cache.insert(("/a".to_string(), Method::Get), Headers::new(), t0);
        assert!(cache.get(&("/a".to_string(), Method::Head), t0).is_none());
    }
}

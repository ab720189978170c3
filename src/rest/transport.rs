use std::time::Duration;

use url::Url;

use crate::error::{Error, ErrorCode, Result};
use crate::rest::request::{Headers, Request};
use crate::rest::response::Response;

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
const MAX_REDIRECTS: usize = 20;

/// Per-transport tuning knobs.
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// Overall deadline for metadata-style requests.
    pub timeout: Option<Duration>,
    /// Low-throughput guard for transfers: `(min_bytes_per_second, window)`.
    /// A transfer which stays below the rate for the whole window times out.
    pub low_speed: Option<(u64, Duration)>,
    pub connect_timeout: Duration,
    /// Disables TLS peer and host verification. Only for localized mocks.
    pub danger_accept_invalid_certs: bool,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_secs(30)),
            low_speed: Some((1024, Duration::from_secs(60))),
            connect_timeout: Duration::from_secs(10),
            danger_accept_invalid_certs: false,
        }
    }
}

/// Executes single HTTP requests against one endpoint.
///
/// Non-2xx statuses are returned verbatim; only connection-layer failures
/// become errors. The signed service is the layer which decides what a bad
/// status means.
#[derive(Debug)]
pub struct HttpTransport {
    base_url: Url,
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(endpoint: &str, options: &TransportOptions) -> Result<Self> {
        let base_url = endpoint
            .parse::<Url>()
            .map_err(|e| Error::Validation(format!("invalid endpoint '{endpoint}': {e}")))?;

        let mut builder = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .tcp_keepalive(Duration::from_secs(30))
            .pool_idle_timeout(Duration::from_secs(600))
            .connect_timeout(options.connect_timeout)
            .use_rustls_tls();

        if let Some(timeout) = options.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some((_, window)) = options.low_speed {
            // reqwest has no rate-based timeout; a read that produces nothing
            // for the whole window is treated as stalled
            builder = builder.read_timeout(window);
        }
        if options.danger_accept_invalid_certs {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let client = builder
            .build()
            .map_err(|e| Error::connection(ErrorCode::FailedInit, e.to_string()))?;

        Ok(Self { base_url, client })
    }

    pub fn endpoint(&self) -> &Url {
        &self.base_url
    }

    /// Executes `request` with the given final header set (the signed service
    /// computes it; plain callers pass `request.headers`).
    pub async fn execute(&self, request: &Request, headers: &Headers) -> Result<Response> {
        let url = self.build_url(request)?;

        let mut builder = self
            .client
            .request(request.method.into(), url)
            .headers(headers.clone());

        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(|e| connection_error(&e))?;

        let status = http::StatusCode::from_u16(response.status().as_u16())
            .unwrap_or(http::StatusCode::INTERNAL_SERVER_ERROR);
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(|e| connection_error(&e))?;

        Ok(Response {
            status,
            headers,
            body,
        })
    }

    fn build_url(&self, request: &Request) -> Result<Url> {
        let mut url = self.base_url.as_str().trim_end_matches('/').to_string();
        url.push_str(request.path.real());
        url.parse::<Url>().map_err(|e| {
            Error::Validation(format!(
                "invalid request path '{}': {e}",
                request.path.masked()
            ))
        })
    }
}

/// Maps a reqwest failure onto the fixed connection-error code space.
fn connection_error(err: &reqwest::Error) -> Error {
    let code = if err.is_timeout() {
        ErrorCode::OperationTimedout
    } else if err.is_connect() {
        let text = err.to_string();
        if text.contains("dns") || text.contains("resolve") {
            ErrorCode::CouldntResolveHost
        } else {
            ErrorCode::CouldntConnect
        }
    } else if err.is_body() || err.is_decode() {
        ErrorCode::RecvError
    } else if err.is_request() {
        ErrorCode::SendError
    } else if err.is_redirect() {
        ErrorCode::TooManyRedirects
    } else {
        ErrorCode::GotNothing
    };

    Error::connection(code, err.to_string())
}

use std::sync::Arc;

use async_trait::async_trait;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::StatusCode;
use time::OffsetDateTime;
use url::Url;

use crate::error::{Error, Result};
use crate::masked::MaskedString;
use crate::rest::request::{Headers, Request};
use crate::rest::response::Response;
use crate::rest::service::SignedRestService;
use crate::rest::signer::Signer;
use crate::rest::transport::TransportOptions;
use crate::storage::object::DirectoryEntry;

/// Plain HTTP carries its credentials in the URL, if anywhere; nothing to
/// sign.
struct NoSigner;

#[async_trait]
impl Signer for NoSigner {
    fn should_sign(&self, _request: &Request) -> bool {
        false
    }

    fn sign(&self, request: &Request, _now: OffsetDateTime) -> Result<Headers> {
        Ok(request.headers.clone())
    }
}

fn split_url(url: &str) -> Result<(String, String)> {
    if url.is_empty() {
        return Err(Error::Validation("the URL is empty".to_string()));
    }

    let parsed = url
        .parse::<Url>()
        .map_err(|e| Error::Validation(format!("invalid URL '{url}': {e}")))?;

    match parsed.scheme() {
        "http" | "https" => {}
        other => {
            return Err(Error::Validation(format!(
                "unsupported URL scheme '{other}' in '{url}'"
            )))
        }
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| Error::Validation(format!("the URL '{url}' has no host")))?;

    let endpoint = match parsed.port() {
        Some(port) => format!("{}://{host}:{port}", parsed.scheme()),
        None => format!("{}://{host}", parsed.scheme()),
    };

    let mut path = parsed.path().to_string();
    if path.is_empty() {
        path.push('/');
    }
    if let Some(query) = parsed.query() {
        path.push('?');
        path.push_str(query);
    }

    Ok((endpoint, path))
}

enum HttpState {
    Reader { size: u64, offset: u64 },
    Writer { buffer: Vec<u8> },
}

/// A single object behind an arbitrary `http(s)://` URL: ranged GETs for
/// reading, one buffered PUT for writing. Generic HTTP has no DELETE
/// semantics, so `remove()` truncates with a zero-byte PUT instead.
pub struct HttpObject {
    service: SignedRestService,
    /// Path plus query, passed to every request.
    path: String,
    url: String,
    state: Option<HttpState>,
}

impl HttpObject {
    pub fn new(url: &str) -> Result<Self> {
        let (endpoint, path) = split_url(url)?;

        let service = SignedRestService::new(
            MaskedString::plain(endpoint),
            "HTTP",
            Arc::new(NoSigner),
            &TransportOptions::default(),
        )?;

        Ok(Self {
            service,
            path,
            url: url.to_string(),
            state: None,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn filename(&self) -> &str {
        let path = self.path.split('?').next().unwrap_or(&self.path);
        path.rsplit('/').next().unwrap_or(path)
    }

    pub fn is_open(&self) -> bool {
        self.state.is_some()
    }

    async fn head(&self) -> Result<Response> {
        self.service
            .head(Request::new(self.path.clone()))
            .await
            .map_err(|e| e.with_context(&format!("Failed to access object '{}'", self.url)))
    }

    pub async fn exists(&self) -> Result<bool> {
        match self.head().await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn open(&mut self, mode: crate::storage::object::Mode) -> Result<()> {
        use crate::storage::object::Mode;

        if self.is_open() {
            return Err(Error::Validation(format!(
                "object '{}' is already open",
                self.url
            )));
        }

        match mode {
            Mode::Read => {
                let response = self.head().await?;

                if response.header("accept-ranges") != Some("bytes") {
                    return Err(Error::Unsupported(format!(
                        "the server hosting '{}' does not support range requests",
                        self.url
                    )));
                }

                let size = response.content_length().ok_or_else(|| {
                    Error::parse(
                        "HeadObject",
                        format!("missing content-length header for '{}'", self.url),
                    )
                })?;

                self.state = Some(HttpState::Reader { size, offset: 0 });
            }
            Mode::Write => {
                self.state = Some(HttpState::Writer { buffer: Vec::new() });
            }
            Mode::Append => {
                return Err(Error::Unsupported(
                    "append mode is not supported for HTTP objects".to_string(),
                ));
            }
        }

        Ok(())
    }

    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let url = self.url.clone();
        let path = self.path.clone();

        let (size, offset) = match &self.state {
            Some(HttpState::Reader { size, offset }) => (*size, *offset),
            _ => {
                return Err(Error::Validation(format!(
                    "object '{url}' is not open for reading"
                )))
            }
        };

        if buf.is_empty() || offset >= size {
            return Ok(0);
        }

        let first = offset;
        let last = (size - 1).min(first + buf.len() as u64 - 1);

        // http range requests are inclusive on both sides
        let request =
            Request::new(path).header(http::header::RANGE, &format!("bytes={first}-{last}"));

        let response = self
            .service
            .get(request)
            .await
            .map_err(|e| e.with_context(&format!("Failed to get object '{url}'")))?;

        match response.status {
            StatusCode::PARTIAL_CONTENT => {
                let expected = (last - first + 1) as usize;
                if response.body.len() > expected {
                    return Err(Error::Unknown(format!(
                        "got more data than expected reading '{url}'"
                    )));
                }

                let n = response.body.len();
                buf[..n].copy_from_slice(&response.body);

                if let Some(HttpState::Reader { offset, .. }) = &mut self.state {
                    *offset += n as u64;
                }

                Ok(n)
            }
            StatusCode::OK => Err(Error::Unsupported(format!(
                "range request {first}-{last} was ignored by the server hosting '{url}'"
            ))),
            status => Err(Error::response(
                status,
                format!("range request {first}-{last} failed for '{url}'"),
            )),
        }
    }

    pub async fn write(&mut self, data: &[u8]) -> Result<usize> {
        match &mut self.state {
            Some(HttpState::Writer { buffer }) => {
                buffer.extend_from_slice(data);
                Ok(data.len())
            }
            _ => Err(Error::Validation(format!(
                "object '{}' is not open for writing",
                self.url
            ))),
        }
    }

    pub fn seek(&mut self, offset: u64) -> Result<u64> {
        match &mut self.state {
            Some(HttpState::Reader { size, offset: o }) => {
                *o = offset.min(*size);
                Ok(*o)
            }
            Some(HttpState::Writer { .. }) => Ok(0),
            None => Err(Error::Validation("object is not open".to_string())),
        }
    }

    pub fn tell(&self) -> Result<u64> {
        match &self.state {
            Some(HttpState::Reader { offset, .. }) => Ok(*offset),
            Some(HttpState::Writer { buffer }) => Ok(buffer.len() as u64),
            None => Err(Error::Validation("object is not open".to_string())),
        }
    }

    pub async fn file_size(&self) -> Result<u64> {
        match &self.state {
            Some(HttpState::Reader { size, .. }) => Ok(*size),
            Some(HttpState::Writer { buffer }) => Ok(buffer.len() as u64),
            None => {
                let response = self.head().await?;
                response.content_length().ok_or_else(|| {
                    Error::parse(
                        "HeadObject",
                        format!("missing content-length header for '{}'", self.url),
                    )
                })
            }
        }
    }

    async fn put(&self, body: Vec<u8>) -> Result<()> {
        let mut request = Request::new(self.path.clone()).body(body);
        request.headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/octet-stream"),
        );

        self.service
            .put(request)
            .await
            .map_err(|e| e.with_context(&format!("Failed to put object '{}'", self.url)))?;
        Ok(())
    }

    pub async fn close(&mut self) -> Result<()> {
        let state = self.state.take();

        if let Some(HttpState::Writer { buffer }) = state {
            self.put(buffer).await?;
        }

        Ok(())
    }

    /// Generic HTTP has no DELETE; truncating to zero bytes is the closest
    /// equivalent.
    pub async fn remove(&self) -> Result<()> {
        self.put(Vec::new()).await
    }

    /// URL of the directory this object lives in: everything up to and
    /// including the last `/` of the path component.
    pub fn parent_url(&self) -> String {
        let query_start = self.url.find('?').unwrap_or(self.url.len());
        let path_part = &self.url[..query_start];

        match path_part.rfind('/') {
            Some(pos) if pos > path_part.find("//").map_or(0, |p| p + 1) => {
                path_part[..=pos].to_string()
            }
            _ => path_part.to_string(),
        }
    }

    pub fn parent(&self) -> Result<HttpDirectory> {
        HttpDirectory::new(&self.parent_url())
    }
}

/// A flat manifest-style directory behind an HTTP URL. There is no generic
/// way to walk an HTTP tree, so listing hands the fetched document to a
/// caller-supplied parser; `exists`/`create` are not implemented.
pub struct HttpDirectory {
    service: SignedRestService,
    path: String,
    url: String,
}

impl HttpDirectory {
    pub fn new(url: &str) -> Result<Self> {
        let (endpoint, path) = split_url(url)?;

        let service = SignedRestService::new(
            MaskedString::plain(endpoint),
            "HTTP",
            Arc::new(NoSigner),
            &TransportOptions::default(),
        )?;

        Ok(Self {
            service,
            path,
            url: url.to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn exists(&self) -> Result<bool> {
        Err(Error::Unsupported(
            "exists() is not implemented for HTTP directories".to_string(),
        ))
    }

    pub fn create(&self) -> Result<()> {
        Err(Error::Unsupported(
            "create() is not implemented for HTTP directories".to_string(),
        ))
    }

    /// Fetches the directory document and lets `parse` turn it into entries.
    pub async fn list_files_with<F>(&self, parse: F) -> Result<Vec<DirectoryEntry>>
    where
        F: FnOnce(&str) -> Vec<DirectoryEntry>,
    {
        let response = self
            .service
            .get(Request::new(self.path.clone()))
            .await
            .map_err(|e| e.with_context(&format!("Failed to list '{}'", self.url)))?;

        Ok(parse(&response.body_text()))
    }

    pub fn file(&self, name: &str) -> Result<HttpObject> {
        let separator = if self.url.ends_with('/') { "" } else { "/" };
        HttpObject::new(&format!("{}{separator}{name}", self.url))
    }
}

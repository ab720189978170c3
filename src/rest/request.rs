use bytes::Bytes;
use http::{HeaderMap, HeaderValue};

use crate::masked::MaskedString;
use crate::rest::retry::RetryStrategy;

/// Header map carried by requests and responses. `http::HeaderMap` compares
/// names case-insensitively; merges are last-writer-wins.
pub type Headers = HeaderMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl From<Method> for http::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => http::Method::GET,
            Method::Head => http::Method::HEAD,
            Method::Post => http::Method::POST,
            Method::Put => http::Method::PUT,
            Method::Patch => http::Method::PATCH,
            Method::Delete => http::Method::DELETE,
        }
    }
}

/// A single REST request.
///
/// `path` holds the absolute path plus query string, already URL-encoded by
/// the adapter which built it; signers receive it verbatim. The masked form
/// of the path is what ends up in logs and error messages.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub path: MaskedString,
    pub headers: Headers,
    pub body: Option<Bytes>,
    pub retry: Option<RetryStrategy>,
}

impl Request {
    pub fn new(path: impl Into<MaskedString>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            headers: Headers::new(),
            body: None,
            retry: None,
        }
    }

    pub fn with_headers(path: impl Into<MaskedString>, headers: Headers) -> Self {
        Self {
            headers,
            ..Self::new(path)
        }
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn retry(mut self, strategy: RetryStrategy) -> Self {
        self.retry = Some(strategy);
        self
    }

    pub fn header(mut self, name: http::header::HeaderName, value: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.headers.insert(name, value);
        }
        self
    }

    pub fn body_len(&self) -> usize {
        self.body.as_ref().map_or(0, Bytes::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn header_names_compare_case_insensitively() {
        let mut headers = Headers::new();
        headers.insert(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain"),
        );
        assert_eq!(
            headers.get("content-type").and_then(|v| v.to_str().ok()),
            Some("text/plain")
        );

        // last writer wins on merge
        headers.insert(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        assert_eq!(headers.len(), 1);
        assert_eq!(
            headers.get("Content-Type").and_then(|v| v.to_str().ok()),
            Some("application/json")
        );
    }

    #[test]
    fn request_body_length() {
        let req = Request::new("/n/ns/b/bkt/o/obj");
        assert_eq!(req.body_len(), 0);
        let req = req.body(&b"abc"[..]);
        assert_eq!(req.body_len(), 3);
    }
}

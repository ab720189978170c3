use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use quick_xml::events::Event;

use crate::error::Error;

/// A fully buffered REST response.
#[derive(Debug)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Response {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn content_length(&self) -> Option<u64> {
        self.header("content-length").and_then(|v| v.parse().ok())
    }

    pub fn etag(&self) -> Option<&str> {
        self.header("etag")
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Extracts the server-provided error message: S3/Azure wrap it in an XML
    /// `<Error>` document, OCI returns JSON `{"code": …, "message": …}`.
    /// Falls back to the status line when the body carries nothing usable.
    pub fn error_message(&self) -> String {
        let fallback = || status_line(self.status);

        if self.body.is_empty() {
            return fallback();
        }

        let text = String::from_utf8_lossy(&self.body);
        let trimmed = text.trim_start();

        if trimmed.starts_with('{') {
            if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
                if let Some(message) = value.get("message").and_then(|m| m.as_str()) {
                    return message.to_string();
                }
            }
            return fallback();
        }

        if trimmed.starts_with('<') {
            if let Some(message) = xml_error_message(&self.body) {
                return message;
            }
            return fallback();
        }

        let line = text.trim();
        if line.is_empty() {
            fallback()
        } else {
            line.to_string()
        }
    }

    /// Consumes a failed response into a `Response` error carrying both the
    /// numeric status and the parsed server message.
    pub fn into_error(self) -> Error {
        let message = self.error_message();
        Error::response(self.status, format!("{}: {}", status_line(self.status), message))
    }
}

fn status_line(status: StatusCode) -> String {
    match status.canonical_reason() {
        Some(reason) => format!("{} {}", status.as_u16(), reason),
        None => status.as_u16().to_string(),
    }
}

/// Looks for a `<Message>` element anywhere in the error document.
fn xml_error_message(body: &[u8]) -> Option<String> {
    let mut reader = quick_xml::Reader::from_reader(body);
    let mut buf = Vec::new();
    let mut in_message = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                in_message = e.local_name().as_ref().eq_ignore_ascii_case(b"message");
            }
            Ok(Event::Text(t)) if in_message => {
                return t
                    .decode()
                    .ok()
                    .and_then(|s| quick_xml::escape::unescape(&s).ok().map(|s| s.into_owned()));
            }
            Ok(Event::End(_)) => in_message = false,
            Ok(Event::Eof) | Err(_) => return None,
            _ => {}
        }
        buf.clear();
    }
}

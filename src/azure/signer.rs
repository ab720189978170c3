use std::collections::BTreeMap;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use http::header::{HeaderName, HeaderValue, AUTHORIZATION};
use sha2::Sha256;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::OffsetDateTime;

use crate::error::{Error, Result};
use crate::rest::request::{Headers, Request};
use crate::rest::signer::Signer;

/// Service version every request declares and the Shared Key scheme targets.
pub const API_VERSION: &str = "2020-08-04";

const RFC1123_GMT: &[BorrowedFormatItem<'static>] = format_description!(
    "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
);

const DATE_HEADER: &str = "x-ms-date";
const VERSION_HEADER: &str = "x-ms-version";

/// Azure Blob Shared Key signature. With a SAS token configured there is
/// nothing to sign; the credential travels in the query string instead.
pub struct AzureSigner {
    account_name: String,
    /// Base64 account key; `None` in SAS mode.
    account_key: Option<String>,
}

impl AzureSigner {
    pub fn new(account_name: impl Into<String>, account_key: Option<String>) -> Self {
        Self {
            account_name: account_name.into(),
            account_key,
        }
    }

    /// The Shared Key string-to-sign of the 2020-08-04 service version:
    /// verb, the eleven standard headers, the canonicalized `x-ms-*` headers
    /// and the canonicalized resource.
    fn string_to_sign(&self, request: &Request, date: &str) -> Result<String> {
        let header = |name: &str| -> String {
            request
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string()
        };

        // Content-Length is an empty string when the body is empty
        let content_length = match request.body_len() {
            0 => String::new(),
            n => n.to_string(),
        };

        // canonicalized x-ms-* headers: lowercased names, sorted
        let mut ms_headers: BTreeMap<String, String> = BTreeMap::new();
        ms_headers.insert(DATE_HEADER.to_string(), date.to_string());
        ms_headers.insert(VERSION_HEADER.to_string(), API_VERSION.to_string());

        for (name, value) in &request.headers {
            let name = name.as_str().to_ascii_lowercase();
            if name.starts_with("x-ms-") {
                let value = value
                    .to_str()
                    .map_err(|e| Error::Unknown(format!("non-ASCII header value: {e}")))?;
                ms_headers.insert(name, value.trim().to_string());
            }
        }

        let mut canonicalized_headers = String::with_capacity(128);
        for (name, value) in &ms_headers {
            canonicalized_headers.push_str(name);
            canonicalized_headers.push(':');
            canonicalized_headers.push_str(value);
            canonicalized_headers.push('\n');
        }

        // canonicalized resource: /account/path plus lowercased, sorted
        // query parameters
        let path = request.path.real();
        let (uri, query) = match path.split_once('?') {
            Some((uri, query)) => (uri, Some(query)),
            None => (path, None),
        };

        let mut canonicalized_resource = format!("/{}{}", self.account_name, uri);

        if let Some(query) = query {
            let mut parameters: BTreeMap<String, Vec<String>> = BTreeMap::new();

            for item in query.split('&').filter(|i| !i.is_empty()) {
                let (key, value) = match item.split_once('=') {
                    Some((key, value)) => (key, value),
                    None => (item, ""),
                };
                parameters
                    .entry(key.to_ascii_lowercase())
                    .or_default()
                    .push(value.to_string());
            }

            for (key, mut values) in parameters {
                values.sort();
                canonicalized_resource.push('\n');
                canonicalized_resource.push_str(&key);
                canonicalized_resource.push(':');
                canonicalized_resource.push_str(&values.join(","));
            }
        }

        Ok(format!(
            "{verb}\n{content_encoding}\n{content_language}\n{content_length}\n\
             {content_md5}\n{content_type}\n{date_empty}\n{if_modified_since}\n{if_match}\n\
             {if_none_match}\n{if_unmodified_since}\n{range}\n\
             {canonicalized_headers}{canonicalized_resource}",
            verb = request.method.as_str(),
            content_encoding = header("content-encoding"),
            content_language = header("content-language"),
            content_md5 = header("content-md5"),
            content_type = header("content-type"),
            // the Date header is superseded by x-ms-date
            date_empty = "",
            if_modified_since = header("if-modified-since"),
            if_match = header("if-match"),
            if_none_match = header("if-none-match"),
            if_unmodified_since = header("if-unmodified-since"),
            range = header("range"),
        ))
    }
}

#[async_trait]
impl Signer for AzureSigner {
    fn should_sign(&self, _request: &Request) -> bool {
        self.account_key.is_some()
    }

    fn sign(&self, request: &Request, now: OffsetDateTime) -> Result<Headers> {
        let key = self
            .account_key
            .as_ref()
            .ok_or_else(|| Error::Unknown("no Azure account key to sign with".to_string()))?;

        let date = now
            .format(RFC1123_GMT)
            .map_err(|e| Error::Unknown(format!("cannot format signing date: {e}")))?;

        let string_to_sign = self.string_to_sign(request, &date)?;

        let decoded_key = BASE64
            .decode(key)
            .map_err(|e| Error::Validation(format!("the Azure account key is not valid base64: {e}")))?;

        let mut mac = Hmac::<Sha256>::new_from_slice(&decoded_key)
            .map_err(|e| Error::Unknown(format!("cannot initialize HMAC: {e}")))?;
        mac.update(string_to_sign.as_bytes());
        let signature = BASE64.encode(mac.finalize().into_bytes());

        let authorization = format!("SharedKey {}:{signature}", self.account_name);

        let mut headers = Headers::with_capacity(3);
        headers.insert(
            HeaderName::from_static(DATE_HEADER),
            HeaderValue::from_str(&date)
                .map_err(|e| Error::Unknown(format!("invalid date header: {e}")))?,
        );
        headers.insert(
            HeaderName::from_static(VERSION_HEADER),
            HeaderValue::from_static(API_VERSION),
        );
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&authorization)
                .map_err(|e| Error::Unknown(format!("invalid authorization header: {e}")))?,
        );

        Ok(headers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rest::request::Method;
    use pretty_assertions::assert_eq;
    use time::macros::datetime;

    fn signer() -> AzureSigner {
        AzureSigner::new("devaccount1", Some(BASE64.encode(b"secret-key")))
    }

    #[test]
    fn sas_mode_signs_nothing() {
        let signer = AzureSigner::new("devaccount1", None);
        assert!(!signer.should_sign(&Request::new("/dump/a.tsv")));
    }

    #[test]
    fn string_to_sign_layout() {
        let mut request = Request::new("/dump/a.tsv?comp=block&blockid=MDAwMQ%3D%3D")
            .header(http::header::CONTENT_TYPE, "application/octet-stream")
            .body(&b"hello"[..]);
        request.method = Method::Put;

        let string_to_sign = signer()
            .string_to_sign(&request, "Fri, 03 Feb 2023 14:05:06 GMT")
            .unwrap();

        assert_eq!(
            string_to_sign,
            "PUT\n\n\n5\n\napplication/octet-stream\n\n\n\n\n\n\n\
             x-ms-date:Fri, 03 Feb 2023 14:05:06 GMT\n\
             x-ms-version:2020-08-04\n\
             /devaccount1/dump/a.tsv\n\
             blockid:MDAwMQ%3D%3D\n\
             comp:block"
        );
    }

    #[test]
    fn request_x_ms_headers_are_canonicalized() {
        let request = Request::new("/dump/a.tsv")
            .header(
                HeaderName::from_static("x-ms-blob-type"),
                "BlockBlob",
            );

        let string_to_sign = signer()
            .string_to_sign(&request, "Fri, 03 Feb 2023 14:05:06 GMT")
            .unwrap();

        assert!(string_to_sign.contains(
            "x-ms-blob-type:BlockBlob\nx-ms-date:Fri, 03 Feb 2023 14:05:06 GMT"
        ));
    }

    #[test]
    fn signed_headers_and_authorization_shape() {
        let headers = signer()
            .sign(&Request::new("/dump/a.tsv"), datetime!(2023-02-03 14:05:06 UTC))
            .unwrap();

        assert_eq!(
            headers.get(DATE_HEADER).unwrap().to_str().unwrap(),
            "Fri, 03 Feb 2023 14:05:06 GMT"
        );
        assert_eq!(headers.get(VERSION_HEADER).unwrap(), API_VERSION);

        let authorization = headers.get(AUTHORIZATION).unwrap().to_str().unwrap();
        assert!(authorization.starts_with("SharedKey devaccount1:"));
    }

    #[test]
    fn signing_is_deterministic() {
        let request = Request::new("/dump/a.tsv?comp=blocklist");
        let now = datetime!(2023-02-03 14:05:06 UTC);
        let signer = signer();

        assert_eq!(
            signer.sign(&request, now).unwrap(),
            signer.sign(&request, now).unwrap()
        );
    }

    #[test]
    fn invalid_base64_key_is_rejected() {
        let signer = AzureSigner::new("devaccount1", Some("!!not-base64!!".to_string()));
        let err = signer
            .sign(&Request::new("/a"), datetime!(2023-02-03 14:05:06 UTC))
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}

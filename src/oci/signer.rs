use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use http::header::{HeaderName, HeaderValue, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::pkcs1v15::SigningKey;
use rsa::signature::{SignatureEncoding, Signer as _};
use rsa::RsaPrivateKey;
use sha2::{Digest, Sha256};
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::OffsetDateTime;

use crate::error::{Error, Result};
use crate::rest::request::{Headers, Method, Request};
use crate::rest::signer::Signer;

/// RFC-1123 with a literal GMT zone, the only form OCI accepts in `x-date`.
const RFC1123_GMT: &[BorrowedFormatItem<'static>] = format_description!(
    "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
);

const DATE_HEADER: &str = "x-date";
const CONTENT_SHA256_HEADER: &str = "x-content-sha256";
const DEFAULT_CONTENT_TYPE: &str = "application/json";

/// OCI request signature (draft-cavage HTTP signatures, RSA-SHA256).
#[derive(Debug)]
pub struct OciSigner {
    host: String,
    /// `<tenancy>/<user>/<fingerprint>`.
    key_id: String,
    signing_key: SigningKey<Sha256>,
}

impl OciSigner {
    /// `private_key_pem` is the PEM text of the API key (PKCS#8 or PKCS#1);
    /// reading and decrypting key files is the caller's job.
    pub fn new(
        host: impl Into<String>,
        tenancy_id: &str,
        user_id: &str,
        fingerprint: &str,
        private_key_pem: &str,
    ) -> Result<Self> {
        let key = RsaPrivateKey::from_pkcs8_pem(private_key_pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(private_key_pem))
            .map_err(|e| Error::Validation(format!("cannot load the OCI API private key: {e}")))?;

        Ok(Self {
            host: host.into(),
            key_id: format!("{tenancy_id}/{user_id}/{fingerprint}"),
            signing_key: SigningKey::new(key),
        })
    }

    fn format_date(now: OffsetDateTime) -> Result<String> {
        now.format(RFC1123_GMT)
            .map_err(|e| Error::Unknown(format!("cannot format signing date: {e}")))
    }
}

fn request_content_type(request: &Request) -> String {
    request
        .headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(DEFAULT_CONTENT_TYPE)
        .to_string()
}

fn body_sha256_b64(request: &Request) -> String {
    let mut sha = Sha256::default();
    if let Some(body) = &request.body {
        sha.update(body);
    }
    BASE64.encode(sha.finalize())
}

#[async_trait]
impl Signer for OciSigner {
    fn should_sign(&self, _request: &Request) -> bool {
        true
    }

    fn sign(&self, request: &Request, now: OffsetDateTime) -> Result<Headers> {
        let date = Self::format_date(now)?;
        let method = request.method.as_str().to_ascii_lowercase();
        let path = request.path.real();
        let content_type = request_content_type(request);

        let mut string_to_sign = format!(
            "(request-target): {method} {path}\nhost: {}\nx-date: {date}",
            self.host
        );

        let mut headers = Headers::with_capacity(6);
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_str(&content_type)
                .map_err(|e| Error::Unknown(format!("invalid content type: {e}")))?,
        );

        // POST bodies are hashed into the signature
        let is_post = request.method == Method::Post;

        if is_post {
            let content_sha256 = body_sha256_b64(request);
            let content_length = request.body_len().to_string();

            string_to_sign.push_str("\nx-content-sha256: ");
            string_to_sign.push_str(&content_sha256);
            string_to_sign.push_str("\ncontent-length: ");
            string_to_sign.push_str(&content_length);
            string_to_sign.push_str("\ncontent-type: ");
            string_to_sign.push_str(&content_type);

            headers.insert(
                HeaderName::from_static(CONTENT_SHA256_HEADER),
                HeaderValue::from_str(&content_sha256)
                    .map_err(|e| Error::Unknown(format!("invalid content hash: {e}")))?,
            );
            headers.insert(CONTENT_LENGTH, HeaderValue::from(request.body_len()));
        }

        let signature = self
            .signing_key
            .try_sign(string_to_sign.as_bytes())
            .map_err(|e| Error::Unknown(format!("cannot sign request: {e}")))?;
        let signature_b64 = BASE64.encode(signature.to_bytes());

        let signed_headers = if is_post {
            "(request-target) host x-date x-content-sha256 content-length content-type"
        } else {
            "(request-target) host x-date"
        };

        let authorization = format!(
            "Signature version=\"1\",headers=\"{signed_headers}\",keyId=\"{}\",\
             algorithm=\"rsa-sha256\",signature=\"{signature_b64}\"",
            self.key_id
        );

        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&authorization)
                .map_err(|e| Error::Unknown(format!("invalid authorization header: {e}")))?,
        );
        headers.insert(
            HeaderName::from_static(DATE_HEADER),
            HeaderValue::from_str(&date)
                .map_err(|e| Error::Unknown(format!("invalid date header: {e}")))?,
        );

        Ok(headers)
    }
}

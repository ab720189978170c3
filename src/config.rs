use crate::error::{Error, Result};

/// A parsed storage target URI. Backend credentials are supplied separately
/// through the matching config options; the URI only selects the backend and
/// the location inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageUri {
    /// `s3://<bucket>/<key>`; an empty key addresses the bucket root.
    S3 { bucket: String, key: String },
    /// `oci+os://<region>/<namespace>/<bucket>[/<object>]`.
    Oci {
        region: String,
        namespace: String,
        bucket: String,
        object: String,
    },
    /// `azure://<container>/<blob>`.
    Azure { container: String, blob: String },
    /// `http(s)://…`, handed to the HTTP backend verbatim.
    Http(String),
}

pub fn parse_uri(uri: &str) -> Result<StorageUri> {
    if let Some(rest) = uri.strip_prefix("s3://") {
        let (bucket, key) = split_first_segment(rest);

        if bucket.is_empty() {
            return Err(Error::Validation(format!(
                "invalid S3 URI '{uri}': missing bucket name"
            )));
        }

        return Ok(StorageUri::S3 {
            bucket: bucket.to_string(),
            key: key.to_string(),
        });
    }

    if let Some(rest) = uri.strip_prefix("oci+os://") {
        let mut segments = rest.splitn(4, '/');
        let region = segments.next().unwrap_or_default();
        let namespace = segments.next().unwrap_or_default();
        let bucket = segments.next().unwrap_or_default();
        let object = segments.next().unwrap_or_default();

        if region.is_empty() || namespace.is_empty() || bucket.is_empty() {
            return Err(Error::Validation(format!(
                "invalid OCI URI '{uri}': expected oci+os://<region>/<namespace>/<bucket>[/<object>]"
            )));
        }

        return Ok(StorageUri::Oci {
            region: region.to_string(),
            namespace: namespace.to_string(),
            bucket: bucket.to_string(),
            object: object.to_string(),
        });
    }

    if let Some(rest) = uri.strip_prefix("azure://") {
        let (container, blob) = split_first_segment(rest);

        if container.is_empty() {
            return Err(Error::Validation(format!(
                "invalid Azure URI '{uri}': missing container name"
            )));
        }

        return Ok(StorageUri::Azure {
            container: container.to_string(),
            blob: blob.to_string(),
        });
    }

    if uri.starts_with("http://") || uri.starts_with("https://") {
        return Ok(StorageUri::Http(uri.to_string()));
    }

    Err(Error::Validation(format!(
        "unsupported storage URI '{uri}'"
    )))
}

fn split_first_segment(rest: &str) -> (&str, &str) {
    match rest.split_once('/') {
        Some((first, remainder)) => (first, remainder),
        None => (rest, ""),
    }
}

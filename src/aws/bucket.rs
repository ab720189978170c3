use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::StatusCode;
use serde::Deserialize;
use tracing::debug;

use crate::aws::config::{S3Config, MAX_PART_SIZE};
use crate::aws::signer::AwsSigner;
use crate::aws::sts::AssumeRoleProvider;
use crate::error::{Error, Result};
use crate::masked::MaskedString;
use crate::rest::encode::{encode_path, encode_query};
use crate::rest::request::{Headers, Request};
use crate::rest::service::SignedRestService;
use crate::rest::transport::TransportOptions;
use crate::storage::bucket::{
    validate_parts, Bucket, Fields, MultipartObject, MultipartObjectPart, ObjectDetails,
};

/// Sorted query parameters; SigV4 requires the canonical query to be
/// alphabetized, so requests are built that way from the start.
type Query = BTreeMap<&'static str, Option<String>>;

const DELETE_BATCH_SIZE: usize = 1000;

#[derive(Debug, Deserialize)]
struct ListBucketResult {
    #[serde(rename = "Contents", default)]
    contents: Vec<Contents>,
    #[serde(rename = "NextContinuationToken", default)]
    next_continuation_token: Option<String>,
    #[serde(rename = "CommonPrefixes", default)]
    common_prefixes: Vec<CommonPrefix>,
}

#[derive(Debug, Deserialize)]
struct Contents {
    #[serde(rename = "Key")]
    key: String,
    #[serde(rename = "Size", default)]
    size: u64,
    #[serde(rename = "ETag", default)]
    etag: Option<String>,
    #[serde(rename = "LastModified", default)]
    last_modified: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CommonPrefix {
    #[serde(rename = "Prefix")]
    prefix: String,
}

#[derive(Debug, Deserialize)]
struct ListMultipartUploadsResult {
    #[serde(rename = "Upload", default)]
    uploads: Vec<Upload>,
}

#[derive(Debug, Deserialize)]
struct Upload {
    #[serde(rename = "Key")]
    key: String,
    #[serde(rename = "UploadId")]
    upload_id: String,
}

#[derive(Debug, Deserialize)]
struct ListPartsResult {
    #[serde(rename = "Part", default)]
    parts: Vec<ListedPart>,
}

#[derive(Debug, Deserialize)]
struct ListedPart {
    #[serde(rename = "PartNumber")]
    part_number: u64,
    #[serde(rename = "ETag")]
    etag: String,
    #[serde(rename = "Size")]
    size: u64,
}

#[derive(Debug, Deserialize)]
struct InitiateMultipartUploadResult {
    #[serde(rename = "UploadId")]
    upload_id: String,
}

#[derive(Debug, Deserialize)]
struct CopyPartResult {
    #[serde(rename = "ETag")]
    etag: String,
}

fn parse_xml<T: serde::de::DeserializeOwned>(body: &[u8], context: &str) -> Result<T> {
    quick_xml::de::from_reader(body).map_err(|e| Error::parse(context, e.to_string()))
}

fn xml_escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

struct CompleteMultipartUpload<'a>(&'a [MultipartObjectPart]);

impl fmt::Display for CompleteMultipartUpload<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
             <CompleteMultipartUpload xmlns=\"http://s3.amazonaws.com/doc/2006-03-01/\">"
        )?;
        for part in self.0 {
            write!(
                f,
                "<Part><ETag>{}</ETag><PartNumber>{}</PartNumber></Part>",
                xml_escape(&part.etag),
                part.part_num
            )?;
        }
        write!(f, "</CompleteMultipartUpload>")
    }
}

struct DeleteObjects<'a>(&'a [String]);

impl fmt::Display for DeleteObjects<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
             <Delete xmlns=\"http://s3.amazonaws.com/doc/2006-03-01/\">"
        )?;
        for name in self.0 {
            write!(f, "<Object><Key>{}</Key></Object>", xml_escape(name))?;
        }
        write!(f, "<Quiet>true</Quiet></Delete>")
    }
}

fn content_md5(body: &[u8]) -> String {
    BASE64.encode(md5::compute(body).as_ref())
}

/// AWS S3 bucket adapter.
pub struct S3Bucket {
    config: Arc<S3Config>,
    service: SignedRestService,
    /// `/bucket` with path-style access, `/` otherwise.
    bucket_path: String,
    /// `/bucket/` with path-style access, `/` otherwise.
    object_path_prefix: String,
}

impl S3Bucket {
    pub fn new(config: Arc<S3Config>) -> Result<Arc<Self>> {
        let mut signer = AwsSigner::new(
            config.host.clone(),
            config.region.clone(),
            config.credentials.clone(),
        );

        if let Some(role_arn) = &config.role_arn {
            signer = signer.with_provider(Box::new(AssumeRoleProvider::new(
                config.region.clone(),
                config.credentials.clone(),
                role_arn.clone(),
                config.role_session_name.clone(),
            )));
        }

        let mut options = TransportOptions::default();
        if let Some(connect_timeout) = config.connect_timeout {
            options.connect_timeout = connect_timeout;
        }

        let service = SignedRestService::new(
            MaskedString::plain(config.endpoint.clone()),
            "AWS-S3",
            Arc::new(signer),
            &options,
        )?;

        let bucket_path = if config.path_style_access {
            format!("/{}", encode_path(&config.bucket_name))
        } else {
            "/".to_string()
        };
        let object_path_prefix = if config.path_style_access {
            format!("{bucket_path}/")
        } else {
            bucket_path.clone()
        };

        Ok(Arc::new(Self {
            config,
            service,
            bucket_path,
            object_path_prefix,
        }))
    }

    pub fn config(&self) -> &Arc<S3Config> {
        &self.config
    }

    fn object_path(&self, name: &str) -> String {
        format!("{}{}", self.object_path_prefix, encode_path(name))
    }

    fn with_query(path: &str, query: &Query) -> String {
        if query.is_empty() {
            return path.to_string();
        }

        let mut result = String::with_capacity(path.len() + 64);
        result.push_str(path);
        result.push('?');

        for (key, value) in query {
            result.push_str(key);
            result.push('=');
            if let Some(value) = value {
                result.push_str(value);
            }
            result.push('&');
        }

        result.pop();
        result
    }

    fn bucket_request(&self, query: &Query) -> Request {
        Request::new(Self::with_query(&self.bucket_path, query))
    }

    fn object_request(&self, name: &str, query: &Query) -> Request {
        Request::new(Self::with_query(&self.object_path(name), query))
    }

    fn copy_source(&self, name: &str) -> String {
        encode_query(&format!("{}/{name}", self.config.bucket_name))
    }
}

#[async_trait]
impl Bucket for S3Bucket {
    fn bucket_name(&self) -> &str {
        &self.config.bucket_name
    }

    fn max_part_size(&self) -> u64 {
        MAX_PART_SIZE
    }

    async fn list_objects(
        &self,
        prefix: &str,
        limit: usize,
        recursive: bool,
        _fields: Fields,
        mut out_prefixes: Option<&mut HashSet<String>>,
    ) -> Result<Vec<ObjectDetails>> {
        // ListObjectsV2; S3 always returns all attributes
        let mut objects = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut query = Query::new();
            query.insert("list-type", Some("2".to_string()));

            if !prefix.is_empty() {
                query.insert("prefix", Some(encode_query(prefix)));
            }

            if limit > 0 {
                let remaining = limit - objects.len();
                query.insert("max-keys", Some(remaining.to_string()));
            }

            if !recursive {
                query.insert("delimiter", Some("%2F".to_string()));
            }

            if let Some(token) = &continuation_token {
                query.insert("continuation-token", Some(encode_query(token)));
            }

            let response = self
                .service
                .get(self.bucket_request(&query))
                .await
                .map_err(|e| {
                    e.with_context(&format!("Failed to list objects using prefix '{prefix}'"))
                })?;

            let page: ListBucketResult = parse_xml(&response.body, "ListBucketResult")?;

            for contents in page.contents {
                objects.push(ObjectDetails {
                    name: contents.key,
                    size: contents.size,
                    etag: contents.etag.unwrap_or_default(),
                    time_created: contents.last_modified.unwrap_or_default(),
                });
            }

            if let Some(prefixes) = out_prefixes.as_deref_mut() {
                for p in page.common_prefixes {
                    prefixes.insert(p.prefix);
                }
            }

            continuation_token = page.next_continuation_token;

            if continuation_token.is_none() || (limit > 0 && objects.len() >= limit) {
                break;
            }
        }

        if limit > 0 {
            objects.truncate(limit);
        }

        Ok(objects)
    }

    async fn head_object(&self, name: &str) -> Result<u64> {
        let response = self
            .service
            .head(self.object_request(name, &Query::new()))
            .await?;

        response.content_length().ok_or_else(|| {
            Error::parse(
                "HeadObject",
                format!("missing content-length header for object '{name}'"),
            )
        })
    }

    async fn delete_object(&self, name: &str) -> Result<()> {
        self.service
            .delete(self.object_request(name, &Query::new()))
            .await
            .map_err(|e| e.with_context(&format!("Failed to delete object '{name}'")))?;
        Ok(())
    }

    async fn delete_objects(&self, names: &[String]) -> Result<()> {
        let mut query = Query::new();
        query.insert("delete", None);

        for batch in names.chunks(DELETE_BATCH_SIZE) {
            let body = DeleteObjects(batch).to_string();
            let md5 = content_md5(body.as_bytes());

            let request = self
                .bucket_request(&query)
                .header(http::header::HeaderName::from_static("content-md5"), &md5)
                .body(body);

            self.service
                .post(request)
                .await
                .map_err(|e| e.with_context("Failed to delete objects"))?;
        }

        Ok(())
    }

    async fn put_object(&self, name: &str, data: Bytes) -> Result<()> {
        let mut headers = Headers::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/octet-stream"),
        );

        let mut request = self.object_request(name, &Query::new());
        request.headers = headers;
        request = request.body(data);

        self.service
            .put(request)
            .await
            .map_err(|e| e.with_context(&format!("Failed to put object '{name}'")))?;
        Ok(())
    }

    async fn get_object(
        &self,
        name: &str,
        from_byte: Option<u64>,
        to_byte: Option<u64>,
    ) -> Result<Bytes> {
        let mut request = self.object_request(name, &Query::new());
        let ranged = from_byte.is_some() || to_byte.is_some();

        if ranged {
            let range = format!(
                "bytes={}-{}",
                from_byte.map(|b| b.to_string()).unwrap_or_default(),
                to_byte.map(|b| b.to_string()).unwrap_or_default()
            );
            request = request.header(http::header::RANGE, &range);
        }

        let response = self
            .service
            .get(request)
            .await
            .map_err(|e| e.with_context(&format!("Failed to get object '{name}'")))?;

        if ranged && response.status != StatusCode::PARTIAL_CONTENT {
            return Err(Error::Unknown(format!(
                "Failed to get object '{name}': the range request was ignored by the server"
            )));
        }

        Ok(response.body)
    }

    /// CopyObject: a single server-side copy within the bucket.
    async fn copy_object(&self, src_name: &str, new_name: &str) -> Result<()> {
        let request = self
            .object_request(new_name, &Query::new())
            .header(
                http::header::HeaderName::from_static("x-amz-copy-source"),
                &self.copy_source(src_name),
            );
        self.service.put(request).await.map_err(|e| {
            e.with_context(&format!("Failed to copy object '{src_name}'"))
        })?;
        Ok(())
    }

    /// UploadPartCopy: server-side copy of objects above the single-copy
    /// limit; the source is consumed range by range.
    async fn copy_object_multipart(
        &self,
        src_name: &str,
        new_name: &str,
        total_size: u64,
        part_size: u64,
    ) -> Result<()> {
        if part_size > total_size {
            return Err(Error::Validation(
                "Total size has to be greater than part size".to_string(),
            ));
        }

        crate::storage::bucket::validate_part_size(part_size, MAX_PART_SIZE)?;

        let upload = self.create_multipart_upload(new_name).await?;
        let mut parts = Vec::new();
        let mut start = 0;
        let mut part_num = 0;

        let result: Result<()> = async {
            while start < total_size {
                let end = (start + part_size).min(total_size) - 1;
                part_num += 1;

                let mut query = Query::new();
                query.insert("partNumber", Some(part_num.to_string()));
                query.insert("uploadId", Some(upload.upload_id.clone()));

                let request = self
                    .object_request(new_name, &query)
                    .header(
                        http::header::HeaderName::from_static("x-amz-copy-source"),
                        &self.copy_source(src_name),
                    )
                    .header(
                        http::header::HeaderName::from_static("x-amz-copy-source-range"),
                        &format!("bytes={start}-{end}"),
                    );

                let response = self.service.put(request).await?;
                let copied: CopyPartResult = parse_xml(&response.body, "CopyPartResult")?;

                parts.push(MultipartObjectPart {
                    part_num,
                    etag: copied.etag,
                    size: end - start + 1,
                });

                start = end + 1;
            }

            self.commit_multipart_upload(&upload, &parts).await
        }
        .await;

        if result.is_err() {
            let _ = self.abort_multipart_upload(&upload).await;
        }

        result.map_err(|e| e.with_context(&format!("Failed to copy object '{src_name}'")))
    }

    async fn rename_object(&self, src_name: &str, new_name: &str) -> Result<()> {
        let total_size = self.head_object(src_name).await.map_err(|e| {
            e.with_context(&format!("Failed to rename object '{src_name}'"))
        })?;

        // the copy operations carry their own error context
        if total_size <= MAX_PART_SIZE {
            self.copy_object(src_name, new_name).await?;
        } else {
            self.copy_object_multipart(src_name, new_name, total_size, MAX_PART_SIZE)
                .await?;
        }

        self.delete_object(src_name).await
    }

    async fn list_multipart_uploads(&self, limit: usize) -> Result<Vec<MultipartObject>> {
        let mut query = Query::new();
        query.insert("uploads", None);

        if limit > 0 {
            query.insert("max-uploads", Some(limit.to_string()));
        }

        let response = self.service.get(self.bucket_request(&query)).await?;
        let parsed: ListMultipartUploadsResult =
            parse_xml(&response.body, "ListMultipartUploadsResult.Upload")?;

        Ok(parsed
            .uploads
            .into_iter()
            .map(|u| MultipartObject {
                name: u.key,
                upload_id: u.upload_id,
            })
            .collect())
    }

    async fn list_multipart_uploaded_parts(
        &self,
        object: &MultipartObject,
        limit: usize,
    ) -> Result<Vec<MultipartObjectPart>> {
        let mut query = Query::new();
        query.insert("uploadId", Some(object.upload_id.clone()));

        if limit > 0 {
            query.insert("max-parts", Some(limit.to_string()));
        }

        let response = self
            .service
            .get(self.object_request(&object.name, &query))
            .await?;
        let parsed: ListPartsResult = parse_xml(&response.body, "ListPartsResult.Part")?;

        Ok(parsed
            .parts
            .into_iter()
            .map(|p| MultipartObjectPart {
                part_num: p.part_number,
                etag: p.etag,
                size: p.size,
            })
            .collect())
    }

    async fn create_multipart_upload(&self, name: &str) -> Result<MultipartObject> {
        let mut query = Query::new();
        query.insert("uploads", None);

        let response = self
            .service
            .post(self.object_request(name, &query))
            .await
            .map_err(|e| {
                e.with_context(&format!("Failed to create multipart upload '{name}'"))
            })?;

        let parsed: InitiateMultipartUploadResult =
            parse_xml(&response.body, "InitiateMultipartUploadResult")?;

        debug!(object = name, upload_id = parsed.upload_id, "created multipart upload");

        Ok(MultipartObject {
            name: name.to_string(),
            upload_id: parsed.upload_id,
        })
    }

    async fn upload_part(
        &self,
        object: &MultipartObject,
        part_num: u64,
        body: Bytes,
    ) -> Result<MultipartObjectPart> {
        let size = body.len() as u64;

        let mut query = Query::new();
        query.insert("partNumber", Some(part_num.to_string()));
        query.insert("uploadId", Some(object.upload_id.clone()));

        let request = self.object_request(&object.name, &query).body(body);
        let response = self.service.put(request).await.map_err(|e| {
            e.with_context(&format!(
                "Failed to upload part {part_num} of object '{}'",
                object.name
            ))
        })?;

        let etag = response
            .etag()
            .ok_or_else(|| {
                Error::parse(
                    "UploadPart",
                    format!(
                        "missing ETag header for part {part_num} of object '{}'",
                        object.name
                    ),
                )
            })?
            .to_string();

        Ok(MultipartObjectPart {
            part_num,
            etag,
            size,
        })
    }

    async fn commit_multipart_upload(
        &self,
        object: &MultipartObject,
        parts: &[MultipartObjectPart],
    ) -> Result<()> {
        validate_parts(parts)?;

        let mut query = Query::new();
        query.insert("uploadId", Some(object.upload_id.clone()));

        let body = CompleteMultipartUpload(parts).to_string();
        let mut request = self.object_request(&object.name, &query).body(body);
        request
            .headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/xml"));

        self.service.post(request).await.map_err(|e| {
            e.with_context(&format!(
                "Failed to commit multipart upload '{}'",
                object.name
            ))
        })?;
        Ok(())
    }

    async fn abort_multipart_upload(&self, object: &MultipartObject) -> Result<()> {
        let mut query = Query::new();
        query.insert("uploadId", Some(object.upload_id.clone()));

        self.service
            .delete(self.object_request(&object.name, &query))
            .await
            .map_err(|e| {
                e.with_context(&format!(
                    "Failed to abort multipart upload '{}'",
                    object.name
                ))
            })?;
        Ok(())
    }

    async fn exists(&self) -> Result<bool> {
        match self.service.head(self.bucket_request(&Query::new())).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn create(&self) -> Result<()> {
        self.service
            .put(self.bucket_request(&Query::new()))
            .await
            .map_err(|e| {
                e.with_context(&format!(
                    "Failed to create bucket '{}'",
                    self.config.bucket_name
                ))
            })?;
        Ok(())
    }

    async fn delete_bucket(&self) -> Result<()> {
        self.service
            .delete(self.bucket_request(&Query::new()))
            .await
            .map_err(|e| {
                e.with_context(&format!(
                    "Failed to delete bucket '{}'",
                    self.config.bucket_name
                ))
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aws::config::S3Options;
    use pretty_assertions::assert_eq;

    fn config(path_style: bool) -> Arc<S3Config> {
        S3Config::new(S3Options {
            bucket_name: "sakila".to_string(),
            region: Some("us-east-1".to_string()),
            access_key_id: Some("key".to_string()),
            secret_access_key: Some("secret".to_string()),
            path_style_access: path_style,
            ..S3Options::default()
        })
        .unwrap()
    }

    #[test]
    fn object_paths_follow_addressing_style() {
        let virtual_style = S3Bucket::new(config(false)).unwrap();
        assert_eq!(virtual_style.object_path("dump/sales q1.tsv"), "/dump/sales%20q1.tsv");
        assert_eq!(virtual_style.bucket_path, "/");

        let path_style = S3Bucket::new(config(true)).unwrap();
        assert_eq!(path_style.object_path("a.tsv"), "/sakila/a.tsv");
        assert_eq!(path_style.bucket_path, "/sakila");
    }

    #[test]
    fn query_parameters_are_sorted_and_bare_keys_kept() {
        let mut query = Query::new();
        query.insert("uploadId", Some("xyz".to_string()));
        query.insert("partNumber", Some("7".to_string()));
        assert_eq!(
            S3Bucket::with_query("/sakila/a.tsv", &query),
            "/sakila/a.tsv?partNumber=7&uploadId=xyz"
        );

        let mut query = Query::new();
        query.insert("uploads", None);
        assert_eq!(S3Bucket::with_query("/sakila", &query), "/sakila?uploads=");
    }

    #[test]
    fn parses_list_bucket_result() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
            <ListBucketResult>
              <Name>sakila</Name>
              <IsTruncated>true</IsTruncated>
              <NextContinuationToken>token-1</NextContinuationToken>
              <Contents>
                <Key>p/a.tsv</Key>
                <LastModified>2023-01-02T03:04:05.000Z</LastModified>
                <ETag>&quot;d41d8cd98f&quot;</ETag>
                <Size>42</Size>
              </Contents>
              <Contents>
                <Key>p/b.tsv</Key>
                <Size>0</Size>
              </Contents>
              <CommonPrefixes><Prefix>p/sub/</Prefix></CommonPrefixes>
            </ListBucketResult>"#;

        let parsed: ListBucketResult = parse_xml(xml.as_bytes(), "ListBucketResult").unwrap();
        assert_eq!(parsed.contents.len(), 2);
        assert_eq!(parsed.contents[0].key, "p/a.tsv");
        assert_eq!(parsed.contents[0].size, 42);
        assert_eq!(parsed.contents[0].etag.as_deref(), Some("\"d41d8cd98f\""));
        assert_eq!(parsed.next_continuation_token.as_deref(), Some("token-1"));
        assert_eq!(parsed.common_prefixes[0].prefix, "p/sub/");
    }

    #[test]
    fn missing_upload_id_is_a_parse_error() {
        let xml = r#"<ListMultipartUploadsResult>
              <Upload><Key>a.tsv</Key></Upload>
            </ListMultipartUploadsResult>"#;

        let err = parse_xml::<ListMultipartUploadsResult>(
            xml.as_bytes(),
            "ListMultipartUploadsResult.Upload",
        )
        .unwrap_err();

        match err {
            Error::Parse { context, .. } => {
                assert_eq!(context, "ListMultipartUploadsResult.Upload");
            }
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn parses_list_parts_strictly() {
        let xml = r#"<ListPartsResult>
              <Part><PartNumber>1</PartNumber><ETag>"e1"</ETag><Size>5242880</Size></Part>
              <Part><PartNumber>2</PartNumber><ETag>"e2"</ETag><Size>1024</Size></Part>
            </ListPartsResult>"#;

        let parsed: ListPartsResult = parse_xml(xml.as_bytes(), "ListPartsResult.Part").unwrap();
        assert_eq!(parsed.parts.len(), 2);
        assert_eq!(parsed.parts[1].part_number, 2);
        assert_eq!(parsed.parts[1].size, 1024);

        let missing_size = r#"<ListPartsResult>
              <Part><PartNumber>1</PartNumber><ETag>"e1"</ETag></Part>
            </ListPartsResult>"#;
        assert!(parse_xml::<ListPartsResult>(missing_size.as_bytes(), "ListPartsResult.Part")
            .is_err());
    }

    #[test]
    fn complete_multipart_upload_document() {
        let parts = vec![
            MultipartObjectPart {
                part_num: 1,
                etag: "\"e1\"".to_string(),
                size: 5242880,
            },
            MultipartObjectPart {
                part_num: 2,
                etag: "\"e2\"".to_string(),
                size: 1024,
            },
        ];

        assert_eq!(
            CompleteMultipartUpload(&parts).to_string(),
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
             <CompleteMultipartUpload xmlns=\"http://s3.amazonaws.com/doc/2006-03-01/\">\
             <Part><ETag>\"e1\"</ETag><PartNumber>1</PartNumber></Part>\
             <Part><ETag>\"e2\"</ETag><PartNumber>2</PartNumber></Part>\
             </CompleteMultipartUpload>"
        );
    }

    #[test]
    fn delete_objects_document_escapes_keys() {
        let names = vec!["a.tsv".to_string(), "x&y<z.tsv".to_string()];
        assert_eq!(
            DeleteObjects(&names).to_string(),
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
             <Delete xmlns=\"http://s3.amazonaws.com/doc/2006-03-01/\">\
             <Object><Key>a.tsv</Key></Object>\
             <Object><Key>x&amp;y&lt;z.tsv</Key></Object>\
             <Quiet>true</Quiet></Delete>"
        );
    }

    #[test]
    fn copy_source_is_query_encoded() {
        let bucket = S3Bucket::new(config(false)).unwrap();
        assert_eq!(bucket.copy_source("dir/a b.tsv"), "sakila%2Fdir%2Fa%20b.tsv");
    }

    #[tokio::test]
    async fn multipart_copy_validates_sizes_before_any_request() {
        let bucket = S3Bucket::new(config(false)).unwrap();

        // a part larger than the whole object
        let err = bucket
            .copy_object_multipart("src.tsv", "dst.tsv", 10, 100)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(err
            .to_string()
            .contains("Total size has to be greater than part size"));

        // a part below the backend minimum
        let err = bucket
            .copy_object_multipart("src.tsv", "dst.tsv", 10 << 30, 1024)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}

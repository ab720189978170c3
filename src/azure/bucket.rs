use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use http::StatusCode;
use serde::Deserialize;
use tracing::debug;

use crate::azure::config::{AzureConfig, MAX_PART_SIZE};
use crate::azure::signer::AzureSigner;
use crate::error::{Error, Result};
use crate::masked::MaskedString;
use crate::rest::encode::{encode_path, encode_query};
use crate::rest::request::Request;
use crate::rest::service::SignedRestService;
use crate::rest::transport::TransportOptions;
use crate::storage::bucket::{
    validate_parts, Bucket, Fields, MultipartObject, MultipartObjectPart, ObjectDetails,
};

/// Azure caps a single list page at 5000 entries.
const MAX_LIST_LIMIT: usize = 5000;

const BLOB_TYPE_HEADER: &str = "x-ms-blob-type";
const BLOB_CONTENT_TYPE_HEADER: &str = "x-ms-blob-content-type";

#[derive(Debug, Deserialize)]
struct EnumerationResults {
    #[serde(rename = "Blobs", default)]
    blobs: Option<Blobs>,
    #[serde(rename = "NextMarker", default)]
    next_marker: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Blobs {
    #[serde(rename = "Blob", default)]
    blobs: Vec<Blob>,
    #[serde(rename = "BlobPrefix", default)]
    prefixes: Vec<BlobPrefix>,
}

#[derive(Debug, Deserialize)]
struct Blob {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Properties", default)]
    properties: Option<BlobProperties>,
}

#[derive(Debug, Default, Deserialize)]
struct BlobProperties {
    #[serde(rename = "Content-Length", default)]
    content_length: Option<u64>,
    #[serde(rename = "Etag", default)]
    etag: Option<String>,
    #[serde(rename = "Creation-Time", default)]
    creation_time: Option<String>,
    #[serde(rename = "Last-Modified", default)]
    last_modified: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BlockList {
    #[serde(rename = "UncommittedBlocks", default)]
    uncommitted_blocks: Option<UncommittedBlocks>,
}

#[derive(Debug, Default, Deserialize)]
struct UncommittedBlocks {
    #[serde(rename = "Block", default)]
    blocks: Vec<Block>,
}

#[derive(Debug, Deserialize)]
struct Block {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Size")]
    size: u64,
}

struct BlockListBody<'a>(&'a [MultipartObjectPart]);

impl fmt::Display for BlockListBody<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<?xml version=\"1.0\" encoding=\"utf-8\"?><BlockList>")?;
        for part in self.0 {
            write!(f, "<Latest>{}</Latest>", part.etag)?;
        }
        write!(f, "</BlockList>")
    }
}

fn parse_xml<T: serde::de::DeserializeOwned>(body: &[u8], context: &str) -> Result<T> {
    quick_xml::de::from_reader(body).map_err(|e| Error::parse(context, e.to_string()))
}

/// Blocks are named by the zero-padded part number; every id must have the
/// same length for the service to accept the block list.
fn block_id(part_num: u64) -> String {
    BASE64.encode(format!("{part_num:032}"))
}

fn block_part_num(id: &str) -> Option<u64> {
    let decoded = BASE64.decode(id).ok()?;
    std::str::from_utf8(&decoded).ok()?.parse().ok()
}

/// Blocks uploaded before a multipart upload is committed show up as the
/// blob's uncommitted block list; block 0 is the marker which makes a fresh
/// upload discoverable before any real part arrives.
const MARKER_BLOCK: u64 = 0;

/// Azure Blob Storage container adapter. Multipart uploads map onto block
/// blobs: parts are uncommitted blocks, the commit is a block list.
pub struct BlobContainer {
    config: Arc<AzureConfig>,
    service: SignedRestService,
    container_path: String,
}

impl BlobContainer {
    pub fn new(config: Arc<AzureConfig>) -> Result<Arc<Self>> {
        let signer = AzureSigner::new(config.account_name.clone(), config.account_key.clone());

        let mut options = TransportOptions::default();
        if let Some(connect_timeout) = config.connect_timeout {
            options.connect_timeout = connect_timeout;
        }

        let service = SignedRestService::new(
            MaskedString::plain(config.endpoint.clone()),
            "Azure-Blob",
            Arc::new(signer),
            &options,
        )?;

        let container_path = format!("/{}", encode_path(&config.container_name));

        Ok(Arc::new(Self {
            config,
            service,
            container_path,
        }))
    }

    pub fn config(&self) -> &Arc<AzureConfig> {
        &self.config
    }

    fn blob_path(&self, name: &str) -> String {
        format!("{}/{}", self.container_path, encode_path(name))
    }

    /// Appends the SAS token (when configured) to the query string; the
    /// masked form of the path never carries it.
    fn request_path(&self, path: String) -> MaskedString {
        match &self.config.sas_token {
            Some(token) => {
                let separator = if path.contains('?') { '&' } else { '?' };
                MaskedString::new(format!("{path}{separator}{token}"), path)
            }
            None => MaskedString::plain(path),
        }
    }

    fn request(&self, path: String) -> Request {
        Request::new(self.request_path(path))
    }

    async fn list_page(
        &self,
        prefix: &str,
        marker: Option<&str>,
        max_results: Option<usize>,
        recursive: bool,
        include_uncommitted: bool,
    ) -> Result<EnumerationResults> {
        let mut path = format!("{}?restype=container&comp=list", self.container_path);

        if !prefix.is_empty() {
            path.push_str("&prefix=");
            path.push_str(&encode_query(prefix));
        }

        if let Some(marker) = marker {
            path.push_str("&marker=");
            path.push_str(&encode_query(marker));
        }

        if let Some(max_results) = max_results {
            path.push_str(&format!("&maxresults={max_results}"));
        }

        if !recursive {
            path.push_str("&delimiter=%2F");
        }

        if include_uncommitted {
            path.push_str("&include=uncommittedblobs");
        }

        let response = self.service.get(self.request(path)).await?;
        parse_xml(&response.body, "EnumerationResults")
    }
}

#[async_trait]
impl Bucket for BlobContainer {
    fn bucket_name(&self) -> &str {
        &self.config.container_name
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
        let mut objects = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let max_results = (limit > 0)
                .then(|| (limit - objects.len()).min(MAX_LIST_LIMIT));

            let page = self
                .list_page(prefix, marker.as_deref(), max_results, recursive, false)
                .await
                .map_err(|e| {
                    e.with_context(&format!("Failed to list objects using prefix '{prefix}'"))
                })?;

            if let Some(blobs) = page.blobs {
                for blob in blobs.blobs {
                    let properties = blob.properties.unwrap_or_default();
                    objects.push(ObjectDetails {
                        name: blob.name,
                        size: properties.content_length.unwrap_or_default(),
                        etag: properties.etag.unwrap_or_default(),
                        time_created: properties
                            .creation_time
                            .or(properties.last_modified)
                            .unwrap_or_default(),
                    });
                }

                if let Some(prefixes) = out_prefixes.as_deref_mut() {
                    prefixes.extend(blobs.prefixes.into_iter().map(|p| p.name));
                }
            }

            marker = page.next_marker.filter(|m| !m.is_empty());

            if marker.is_none() || (limit > 0 && objects.len() >= limit) {
                break;
            }
        }

        if limit > 0 {
            objects.truncate(limit);
        }

        Ok(objects)
    }

    async fn head_object(&self, name: &str) -> Result<u64> {
        let response = self.service.head(self.request(self.blob_path(name))).await?;

        response.content_length().ok_or_else(|| {
            Error::parse(
                "HeadBlob",
                format!("missing content-length header for object '{name}'"),
            )
        })
    }

    async fn delete_object(&self, name: &str) -> Result<()> {
        self.service
            .delete(self.request(self.blob_path(name)))
            .await
            .map_err(|e| e.with_context(&format!("Failed to delete object '{name}'")))?;
        Ok(())
    }

    async fn put_object(&self, name: &str, data: Bytes) -> Result<()> {
        let mut request = self.request(self.blob_path(name)).body(data);
        request.headers.insert(
            HeaderName::from_static(BLOB_TYPE_HEADER),
            HeaderValue::from_static("BlockBlob"),
        );
        request.headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/octet-stream"),
        );

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
        if from_byte.is_none() && to_byte.is_some() {
            return Err(Error::Unsupported(
                "Retrieving partial object requires starting offset.".to_string(),
            ));
        }

        let mut request = self.request(self.blob_path(name));
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

    async fn rename_object(&self, _src_name: &str, _new_name: &str) -> Result<()> {
        Err(Error::Unsupported(
            "The rename_object operation is not supported in Azure.".to_string(),
        ))
    }

    async fn list_multipart_uploads(&self, limit: usize) -> Result<Vec<MultipartObject>> {
        // uncommitted blobs are only reachable through the listing; a blob
        // with no etag has not been committed yet
        let mut uploads = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let page = self
                .list_page("", marker.as_deref(), None, true, true)
                .await?;

            if let Some(blobs) = page.blobs {
                for blob in blobs.blobs {
                    let committed = blob
                        .properties
                        .as_ref()
                        .and_then(|p| p.etag.as_ref())
                        .is_some_and(|etag| !etag.is_empty());

                    if !committed {
                        uploads.push(MultipartObject {
                            upload_id: blob.name.clone(),
                            name: blob.name,
                        });

                        if limit > 0 && uploads.len() >= limit {
                            return Ok(uploads);
                        }
                    }
                }
            }

            marker = page.next_marker.filter(|m| !m.is_empty());
            if marker.is_none() {
                break;
            }
        }

        Ok(uploads)
    }

    async fn list_multipart_uploaded_parts(
        &self,
        object: &MultipartObject,
        limit: usize,
    ) -> Result<Vec<MultipartObjectPart>> {
        let path = format!(
            "{}?comp=blocklist&blocklisttype=uncommitted",
            self.blob_path(&object.name)
        );

        let response = self.service.get(self.request(path)).await.map_err(|e| {
            e.with_context(&format!(
                "Failed to list parts of multipart upload '{}'",
                object.name
            ))
        })?;

        let parsed: BlockList = parse_xml(&response.body, "BlockList.UncommittedBlocks")?;

        let mut parts = Vec::new();
        for block in parsed.uncommitted_blocks.unwrap_or_default().blocks {
            let Some(part_num) = block_part_num(&block.name) else {
                // a block this crate did not upload, e.g. from another client
                continue;
            };

            if part_num == MARKER_BLOCK {
                continue;
            }

            parts.push(MultipartObjectPart {
                part_num,
                etag: block.name,
                size: block.size,
            });

            if limit > 0 && parts.len() >= limit {
                break;
            }
        }

        parts.sort_by_key(|p| p.part_num);

        Ok(parts)
    }

    async fn create_multipart_upload(&self, name: &str) -> Result<MultipartObject> {
        // there is no explicit initiation; uploading the marker block turns
        // the name into a listable uncommitted blob
        let path = format!(
            "{}?comp=block&blockid={}",
            self.blob_path(name),
            encode_query(&block_id(MARKER_BLOCK))
        );

        self.service
            .put(self.request(path).body(&b"-"[..]))
            .await
            .map_err(|e| {
                e.with_context(&format!("Failed to create multipart upload '{name}'"))
            })?;

        debug!(object = name, "created block blob upload");

        Ok(MultipartObject {
            name: name.to_string(),
            upload_id: name.to_string(),
        })
    }

    async fn upload_part(
        &self,
        object: &MultipartObject,
        part_num: u64,
        body: Bytes,
    ) -> Result<MultipartObjectPart> {
        let size = body.len() as u64;
        let id = block_id(part_num);
        let path = format!(
            "{}?comp=block&blockid={}",
            self.blob_path(&object.name),
            encode_query(&id)
        );

        self.service
            .put(self.request(path).body(body))
            .await
            .map_err(|e| {
                e.with_context(&format!(
                    "Failed to upload part {part_num} of object '{}'",
                    object.name
                ))
            })?;

        Ok(MultipartObjectPart {
            part_num,
            etag: id,
            size,
        })
    }

    async fn commit_multipart_upload(
        &self,
        object: &MultipartObject,
        parts: &[MultipartObjectPart],
    ) -> Result<()> {
        validate_parts(parts)?;

        let path = format!("{}?comp=blocklist", self.blob_path(&object.name));
        let body = BlockListBody(parts).to_string();

        let mut request = self.request(path).body(body);
        request.headers.insert(
            HeaderName::from_static(BLOB_CONTENT_TYPE_HEADER),
            HeaderValue::from_static("application/octet-stream"),
        );

        self.service.put(request).await.map_err(|e| {
            e.with_context(&format!(
                "Failed to commit multipart upload '{}'",
                object.name
            ))
        })?;
        Ok(())
    }

    async fn abort_multipart_upload(&self, object: &MultipartObject) -> Result<()> {
        // uncommitted blocks are garbage-collected by the service; there is
        // nothing to abort explicitly
        debug!(object = object.name, "leaving uncommitted blocks to expire");
        Ok(())
    }

    async fn exists(&self) -> Result<bool> {
        let path = format!("{}?restype=container", self.container_path);

        match self.service.get(self.request(path)).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn create(&self) -> Result<()> {
        let path = format!("{}?restype=container", self.container_path);

        self.service.put(self.request(path)).await.map_err(|e| {
            e.with_context(&format!(
                "Failed to create container '{}'",
                self.config.container_name
            ))
        })?;
        Ok(())
    }

    async fn delete_bucket(&self) -> Result<()> {
        let path = format!("{}?restype=container", self.container_path);

        self.service.delete(self.request(path)).await.map_err(|e| {
            e.with_context(&format!(
                "Failed to delete container '{}'",
                self.config.container_name
            ))
        })?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct BlobPrefix {
    #[serde(rename = "Name")]
    name: String,
}

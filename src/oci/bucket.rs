use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::StatusCode;
use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::masked::MaskedString;
use crate::oci::config::{cache_namespace, cached_namespace, OciConfig, MAX_PART_SIZE};
use crate::oci::signer::OciSigner;
use crate::rest::encode::{encode_path, encode_query};
use crate::rest::request::Request;
use crate::rest::service::SignedRestService;
use crate::rest::transport::TransportOptions;
use crate::storage::bucket::{
    validate_parts, Bucket, Fields, MultipartObject, MultipartObjectPart, ObjectDetails,
};

/// OCI caps a single list page at 1000 entries.
const MAX_LIST_LIMIT: usize = 1000;

#[derive(Debug, Deserialize)]
struct ListObjectsResponse {
    #[serde(default)]
    objects: Vec<OciObject>,
    #[serde(rename = "nextStartWith", default)]
    next_start_with: Option<String>,
    #[serde(default)]
    prefixes: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct OciObject {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    etag: Option<String>,
    #[serde(rename = "timeCreated", default)]
    time_created: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OciMultipartUpload {
    object: String,
    #[serde(rename = "uploadId")]
    upload_id: String,
}

#[derive(Debug, Deserialize)]
struct OciUploadedPart {
    #[serde(rename = "partNumber")]
    part_number: u64,
    etag: String,
    size: u64,
}

#[derive(Debug, Deserialize)]
struct CreateMultipartUploadResponse {
    #[serde(rename = "uploadId")]
    upload_id: String,
}

fn parse_json<T: serde::de::DeserializeOwned>(body: &[u8], context: &str) -> Result<T> {
    serde_json::from_slice(body).map_err(|e| Error::parse(context, e.to_string()))
}

/// OCI Object Storage bucket adapter. Paths follow the
/// `/n/<namespace>/b/<bucket>` scheme; multipart uploads live under `/u`.
pub struct OciBucket {
    config: Arc<OciConfig>,
    service: SignedRestService,
    namespace: String,
    bucket_path: String,
}

impl OciBucket {
    /// Constructing the bucket resolves the tenancy namespace when the
    /// configuration does not carry one; the result is cached process-wide.
    pub async fn new(config: Arc<OciConfig>) -> Result<Arc<Self>> {
        let signer = OciSigner::new(
            config.host.clone(),
            &config.tenancy_id,
            &config.user_id,
            &config.fingerprint,
            &config.private_key_pem,
        )?;

        let mut options = TransportOptions::default();
        if let Some(connect_timeout) = config.connect_timeout {
            options.connect_timeout = connect_timeout;
        }

        let service = SignedRestService::new(
            MaskedString::plain(config.endpoint.clone()),
            "OCI-OS",
            Arc::new(signer),
            &options,
        )?;

        let namespace = match &config.namespace {
            Some(namespace) => namespace.clone(),
            None => Self::resolve_namespace(&service, &config).await?,
        };

        let bucket_path = format!(
            "/n/{}/b/{}",
            encode_path(&namespace),
            encode_path(&config.bucket_name)
        );

        Ok(Arc::new(Self {
            config,
            service,
            namespace,
            bucket_path,
        }))
    }

    async fn resolve_namespace(
        service: &SignedRestService,
        config: &OciConfig,
    ) -> Result<String> {
        let key = config.namespace_cache_key();

        if let Some(namespace) = cached_namespace(&key) {
            return Ok(namespace);
        }

        let response = service
            .get(Request::new("/n/"))
            .await
            .map_err(|e| e.with_context("Failed to discover the object storage namespace"))?;
        let namespace: String = parse_json(&response.body, "GetNamespace")?;

        debug!(namespace, "resolved tenancy namespace");
        cache_namespace(key, namespace.clone());

        Ok(namespace)
    }

    pub fn config(&self) -> &Arc<OciConfig> {
        &self.config
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn object_path(&self, name: &str) -> String {
        format!("{}/o/{}", self.bucket_path, encode_path(name))
    }

    fn upload_path(&self, name: &str) -> String {
        format!("{}/u/{}", self.bucket_path, encode_path(name))
    }

    fn fields_parameter(fields: Fields) -> String {
        let mut include = Vec::with_capacity(4);
        if fields.contains(Fields::NAME) {
            include.push("name");
        }
        if fields.contains(Fields::SIZE) {
            include.push("size");
        }
        if fields.contains(Fields::ETAG) {
            include.push("etag");
        }
        if fields.contains(Fields::TIME_CREATED) {
            include.push("timeCreated");
        }
        include.join(",")
    }

    /// With overwriting disabled the request is conditional and the service
    /// answers an existing object with 412 Precondition Failed.
    fn put_object_request(&self, name: &str, data: Bytes) -> Request {
        let mut request = Request::new(self.object_path(name)).body(data);
        request.headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/octet-stream"),
        );

        if !self.config.overwrite {
            request.headers.insert(
                http::header::IF_NONE_MATCH,
                HeaderValue::from_static("*"),
            );
        }

        request
    }
}

#[async_trait]
impl Bucket for OciBucket {
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
        fields: Fields,
        mut out_prefixes: Option<&mut HashSet<String>>,
    ) -> Result<Vec<ObjectDetails>> {
        let mut objects = Vec::new();
        let mut start: Option<String> = None;
        let fields_parameter = Self::fields_parameter(fields);

        loop {
            let mut parameters = Vec::with_capacity(5);

            if !prefix.is_empty() {
                parameters.push(format!("prefix={}", encode_query(prefix)));
            }

            if let Some(start) = &start {
                parameters.push(format!("start={}", encode_query(start)));
            }

            if limit > 0 {
                let remaining = (limit - objects.len()).min(MAX_LIST_LIMIT);
                parameters.push(format!("limit={remaining}"));
            }

            if !recursive {
                parameters.push("delimiter=/".to_string());
            }

            if !fields_parameter.is_empty() {
                parameters.push(format!("fields={fields_parameter}"));
            }

            let mut path = format!("{}/o", self.bucket_path);
            if !parameters.is_empty() {
                path.push('?');
                path.push_str(&parameters.join("&"));
            }

            let response = self.service.get(Request::new(path)).await.map_err(|e| {
                e.with_context(&format!("Failed to list objects using prefix '{prefix}'"))
            })?;

            let page: ListObjectsResponse = parse_json(&response.body, "ListObjects.objects")?;

            for object in page.objects {
                objects.push(ObjectDetails {
                    name: object.name.unwrap_or_default(),
                    size: object.size.unwrap_or_default(),
                    etag: object.etag.unwrap_or_default(),
                    time_created: object.time_created.unwrap_or_default(),
                });
            }

            if let Some(prefixes) = out_prefixes.as_deref_mut() {
                prefixes.extend(page.prefixes);
            }

            start = page.next_start_with;

            if start.is_none() || (limit > 0 && objects.len() >= limit) {
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
            .head(Request::new(self.object_path(name)))
            .await?;

        response.content_length().ok_or_else(|| {
            Error::parse(
                "HeadObject",
                format!("missing content-length header for object '{name}'"),
            )
        })
    }

    async fn delete_object(&self, name: &str) -> Result<()> {
        let request = Request::new(self.object_path(name))
            .header(http::header::ACCEPT, "*/*");

        self.service
            .delete(request)
            .await
            .map_err(|e| e.with_context(&format!("Failed to delete object '{name}'")))?;
        Ok(())
    }

    async fn put_object(&self, name: &str, data: Bytes) -> Result<()> {
        self.service
            .put(self.put_object_request(name, data))
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
        let mut request = Request::new(self.object_path(name));
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

    async fn rename_object(&self, src_name: &str, new_name: &str) -> Result<()> {
        let body = serde_json::json!({
            "sourceName": src_name,
            "newName": new_name,
        })
        .to_string();

        let request =
            Request::new(format!("{}/actions/renameObject", self.bucket_path)).body(body);

        self.service
            .post(request)
            .await
            .map_err(|e| e.with_context(&format!("Failed to rename object '{src_name}'")))?;
        Ok(())
    }

    async fn list_multipart_uploads(&self, limit: usize) -> Result<Vec<MultipartObject>> {
        let mut path = format!("{}/u", self.bucket_path);
        if limit > 0 {
            path.push_str(&format!("?limit={limit}"));
        }

        let response = self.service.get(Request::new(path)).await?;
        let uploads: Vec<OciMultipartUpload> =
            parse_json(&response.body, "ListMultipartUploads")?;

        Ok(uploads
            .into_iter()
            .map(|u| MultipartObject {
                name: u.object,
                upload_id: u.upload_id,
            })
            .collect())
    }

    async fn list_multipart_uploaded_parts(
        &self,
        object: &MultipartObject,
        limit: usize,
    ) -> Result<Vec<MultipartObjectPart>> {
        let mut path = format!(
            "{}?uploadId={}",
            self.upload_path(&object.name),
            encode_query(&object.upload_id)
        );
        if limit > 0 {
            path.push_str(&format!("&limit={limit}"));
        }

        let response = self.service.get(Request::new(path)).await?;
        let parts: Vec<OciUploadedPart> =
            parse_json(&response.body, "ListMultipartUploadParts")?;

        Ok(parts
            .into_iter()
            .map(|p| MultipartObjectPart {
                part_num: p.part_number,
                etag: p.etag,
                size: p.size,
            })
            .collect())
    }

    async fn create_multipart_upload(&self, name: &str) -> Result<MultipartObject> {
        let body = serde_json::json!({ "object": name }).to_string();
        let request = Request::new(format!("{}/u", self.bucket_path)).body(body);

        let response = self.service.post(request).await.map_err(|e| {
            e.with_context(&format!("Failed to create multipart upload '{name}'"))
        })?;

        let created: CreateMultipartUploadResponse =
            parse_json(&response.body, "CreateMultipartUpload")?;

        debug!(object = name, upload_id = created.upload_id, "created multipart upload");

        Ok(MultipartObject {
            name: name.to_string(),
            upload_id: created.upload_id,
        })
    }

    async fn upload_part(
        &self,
        object: &MultipartObject,
        part_num: u64,
        body: Bytes,
    ) -> Result<MultipartObjectPart> {
        let size = body.len() as u64;
        let path = format!(
            "{}?uploadId={}&uploadPartNum={part_num}",
            self.upload_path(&object.name),
            encode_query(&object.upload_id)
        );

        let response = self.service.put(Request::new(path).body(body)).await.map_err(|e| {
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

        let parts_to_commit: Vec<serde_json::Value> = parts
            .iter()
            .map(|p| serde_json::json!({ "partNum": p.part_num, "etag": p.etag }))
            .collect();
        let body = serde_json::json!({ "partsToCommit": parts_to_commit }).to_string();

        let path = format!(
            "{}?uploadId={}",
            self.upload_path(&object.name),
            encode_query(&object.upload_id)
        );

        self.service
            .post(Request::new(path).body(body))
            .await
            .map_err(|e| {
                e.with_context(&format!(
                    "Failed to commit multipart upload '{}'",
                    object.name
                ))
            })?;
        Ok(())
    }

    async fn abort_multipart_upload(&self, object: &MultipartObject) -> Result<()> {
        let path = format!(
            "{}?uploadId={}",
            self.upload_path(&object.name),
            encode_query(&object.upload_id)
        );

        self.service.delete(Request::new(path)).await.map_err(|e| {
            e.with_context(&format!(
                "Failed to abort multipart upload '{}'",
                object.name
            ))
        })?;
        Ok(())
    }

    async fn exists(&self) -> Result<bool> {
        match self.service.head(Request::new(self.bucket_path.clone())).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn create(&self) -> Result<()> {
        let body = serde_json::json!({
            "name": self.config.bucket_name,
            "compartmentId": self.config.tenancy_id,
        })
        .to_string();

        let path = format!("/n/{}/b/", encode_path(&self.namespace));

        self.service
            .post(Request::new(path).body(body))
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
            .delete(Request::new(self.bucket_path.clone()))
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

use std::collections::HashSet;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{Error, Result};

pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;
pub const DEFAULT_PART_SIZE: u64 = 64 * 1024 * 1024;

/// Attribute selection for listings. Backends which cannot subset attributes
/// (S3, Azure) ignore the mask and always populate everything they have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fields(u8);

impl Fields {
    pub const NAME: Fields = Fields(1);
    pub const SIZE: Fields = Fields(1 << 1);
    pub const ETAG: Fields = Fields(1 << 2);
    pub const TIME_CREATED: Fields = Fields(1 << 3);

    pub const NAME_SIZE: Fields = Fields(1 | 1 << 1);
    pub const ALL: Fields = Fields(0b1111);

    pub fn contains(self, other: Fields) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for Fields {
    type Output = Fields;

    fn bitor(self, rhs: Fields) -> Fields {
        Fields(self.0 | rhs.0)
    }
}

/// Listing entry, normalized across backends.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectDetails {
    pub name: String,
    pub size: u64,
    pub etag: String,
    pub time_created: String,
}

/// Handle of an in-progress multipart upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartObject {
    pub name: String,
    pub upload_id: String,
}

/// One uploaded part of a multipart upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartObjectPart {
    /// 1-based, strictly increasing.
    pub part_num: u64,
    pub etag: String,
    pub size: u64,
}

/// Container-level operations common to all object-storage backends.
///
/// Object names are taken verbatim; adapters perform their own URL encoding
/// when building request paths. Ranges follow HTTP semantics: `from-to` is
/// inclusive on both ends, `from-` reads the tail, `-to` the last `to` bytes
/// (where the backend supports it).
#[async_trait]
pub trait Bucket: Send + Sync {
    fn bucket_name(&self) -> &str;

    /// Largest part the backend accepts for a multipart upload.
    fn max_part_size(&self) -> u64;

    /// Lists objects under `prefix`, paginating until `limit` entries were
    /// collected (0 means unlimited). When not recursive, names of the
    /// "subdirectories" derived from the `/` delimiter land in
    /// `out_prefixes`.
    async fn list_objects(
        &self,
        prefix: &str,
        limit: usize,
        recursive: bool,
        fields: Fields,
        out_prefixes: Option<&mut HashSet<String>>,
    ) -> Result<Vec<ObjectDetails>>;

    /// Size of the object; a 404 response error if it does not exist.
    async fn head_object(&self, name: &str) -> Result<u64>;

    async fn delete_object(&self, name: &str) -> Result<()>;

    /// Bulk deletion; batched where the backend supports it, a per-item loop
    /// otherwise. The default is the per-item loop.
    async fn delete_objects(&self, names: &[String]) -> Result<()> {
        for name in names {
            self.delete_object(name).await?;
        }
        Ok(())
    }

    /// Bulk deletion taking listing results directly.
    async fn delete_object_list(&self, list: &[ObjectDetails]) -> Result<()> {
        let names: Vec<String> = list.iter().map(|o| o.name.clone()).collect();
        self.delete_objects(&names).await
    }

    async fn put_object(&self, name: &str, data: Bytes) -> Result<()>;

    async fn get_object(
        &self,
        name: &str,
        from_byte: Option<u64>,
        to_byte: Option<u64>,
    ) -> Result<Bytes>;

    async fn rename_object(&self, src_name: &str, new_name: &str) -> Result<()>;

    /// Server-side copy of an object within the bucket. Backends without a
    /// synchronous copy operation reject it.
    async fn copy_object(&self, _src_name: &str, _new_name: &str) -> Result<()> {
        Err(Error::Unsupported(
            "The copy_object operation is not supported by this backend.".to_string(),
        ))
    }

    /// Server-side copy for objects above the single-copy limit; the source
    /// is consumed range by range in parts of `part_size` bytes.
    async fn copy_object_multipart(
        &self,
        _src_name: &str,
        _new_name: &str,
        _total_size: u64,
        _part_size: u64,
    ) -> Result<()> {
        Err(Error::Unsupported(
            "The copy_object_multipart operation is not supported by this backend.".to_string(),
        ))
    }

    async fn list_multipart_uploads(&self, limit: usize) -> Result<Vec<MultipartObject>>;

    async fn list_multipart_uploaded_parts(
        &self,
        object: &MultipartObject,
        limit: usize,
    ) -> Result<Vec<MultipartObjectPart>>;

    async fn create_multipart_upload(&self, name: &str) -> Result<MultipartObject>;

    async fn upload_part(
        &self,
        object: &MultipartObject,
        part_num: u64,
        body: Bytes,
    ) -> Result<MultipartObjectPart>;

    async fn commit_multipart_upload(
        &self,
        object: &MultipartObject,
        parts: &[MultipartObjectPart],
    ) -> Result<()>;

    /// Abandons the upload. Best-effort no-op on backends without explicit
    /// abort semantics.
    async fn abort_multipart_upload(&self, object: &MultipartObject) -> Result<()>;

    async fn exists(&self) -> Result<bool>;

    async fn create(&self) -> Result<()>;

    async fn delete_bucket(&self) -> Result<()>;
}

/// Commit preconditions shared by every backend: parts are ordered by their
/// 1-based number and none of them is empty (an object with no content must
/// go through a single PUT instead).
pub fn validate_parts(parts: &[MultipartObjectPart]) -> Result<()> {
    let mut expected = 1;

    for part in parts {
        if part.part_num != expected {
            return Err(Error::Validation(format!(
                "multipart upload parts must be ordered, expected part {expected}, got {}",
                part.part_num
            )));
        }

        if part.size == 0 {
            return Err(Error::Validation(format!(
                "multipart upload part {} is empty",
                part.part_num
            )));
        }

        expected += 1;
    }

    Ok(())
}

/// Validates a requested part size against the backend's limits.
pub fn validate_part_size(part_size: u64, max_part_size: u64) -> Result<()> {
    if part_size < MIN_PART_SIZE {
        return Err(Error::Validation(format!(
            "part size has to be at least {MIN_PART_SIZE} bytes, got {part_size}"
        )));
    }

    if part_size > max_part_size {
        return Err(Error::Validation(format!(
            "part size has to be at most {max_part_size} bytes, got {part_size}"
        )));
    }

    Ok(())
}

//! In-memory bucket used by unit tests across the storage layer.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use http::StatusCode;

use crate::error::{Error, Result};
use crate::storage::bucket::{
    validate_parts, Bucket, Fields, MultipartObject, MultipartObjectPart, ObjectDetails,
};

#[derive(Default)]
pub(crate) struct MockBucket {
    pub(crate) state: Mutex<MockState>,
    /// When set, uploading this part number fails with a 500.
    pub(crate) fail_part: Option<u64>,
}

#[derive(Default)]
pub(crate) struct MockState {
    pub(crate) objects: HashMap<String, Vec<u8>>,
    pub(crate) uploads: HashMap<String, Vec<(u64, Vec<u8>)>>,
    pub(crate) committed: Vec<String>,
    pub(crate) aborted: Vec<String>,
    next_upload: u64,
}

impl MockBucket {
    pub(crate) fn object(&self, name: &str) -> Vec<u8> {
        self.state.lock().unwrap().objects[name].clone()
    }

    pub(crate) fn insert_object(&self, name: &str, data: &[u8]) {
        self.state
            .lock()
            .unwrap()
            .objects
            .insert(name.to_string(), data.to_vec());
    }
}

#[async_trait]
impl Bucket for MockBucket {
    fn bucket_name(&self) -> &str {
        "mock"
    }

    fn max_part_size(&self) -> u64 {
        5 * 1024 * 1024 * 1024
    }

    async fn list_objects(
        &self,
        prefix: &str,
        limit: usize,
        recursive: bool,
        _fields: Fields,
        mut out_prefixes: Option<&mut HashSet<String>>,
    ) -> Result<Vec<ObjectDetails>> {
        let state = self.state.lock().unwrap();
        let mut names: Vec<&String> = state
            .objects
            .keys()
            .filter(|name| name.starts_with(prefix))
            .collect();
        names.sort();

        let mut objects = Vec::new();

        for name in names {
            if !recursive {
                // collapse anything below the next separator into a prefix
                if let Some(pos) = name[prefix.len()..].find('/') {
                    if let Some(prefixes) = out_prefixes.as_deref_mut() {
                        prefixes.insert(name[..prefix.len() + pos + 1].to_string());
                    }
                    continue;
                }
            }

            objects.push(ObjectDetails {
                name: name.clone(),
                size: state.objects[name].len() as u64,
                etag: format!("\"{name}\""),
                time_created: "2023-01-02T03:04:05Z".to_string(),
            });

            if limit > 0 && objects.len() >= limit {
                break;
            }
        }

        Ok(objects)
    }

    async fn head_object(&self, name: &str) -> Result<u64> {
        let state = self.state.lock().unwrap();
        state
            .objects
            .get(name)
            .map(|data| data.len() as u64)
            .ok_or_else(|| Error::response(StatusCode::NOT_FOUND, "404 Not Found"))
    }

    async fn delete_object(&self, name: &str) -> Result<()> {
        self.state.lock().unwrap().objects.remove(name);
        Ok(())
    }

    async fn put_object(&self, name: &str, data: Bytes) -> Result<()> {
        self.insert_object(name, &data);
        Ok(())
    }

    async fn get_object(
        &self,
        name: &str,
        from_byte: Option<u64>,
        to_byte: Option<u64>,
    ) -> Result<Bytes> {
        let state = self.state.lock().unwrap();
        let data = state
            .objects
            .get(name)
            .ok_or_else(|| Error::response(StatusCode::NOT_FOUND, "404 Not Found"))?;
        let from = (from_byte.unwrap_or(0) as usize).min(data.len());
        let to = to_byte.map_or(data.len(), |t| (t as usize + 1).min(data.len()));
        Ok(Bytes::copy_from_slice(&data[from..to.max(from)]))
    }

    async fn rename_object(&self, src_name: &str, new_name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let data = state
            .objects
            .remove(src_name)
            .ok_or_else(|| Error::response(StatusCode::NOT_FOUND, "404 Not Found"))?;
        state.objects.insert(new_name.to_string(), data);
        Ok(())
    }

    async fn list_multipart_uploads(&self, _limit: usize) -> Result<Vec<MultipartObject>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .uploads
            .keys()
            .map(|id| MultipartObject {
                name: id.split('#').next().unwrap_or_default().to_string(),
                upload_id: id.clone(),
            })
            .collect())
    }

    async fn list_multipart_uploaded_parts(
        &self,
        object: &MultipartObject,
        _limit: usize,
    ) -> Result<Vec<MultipartObjectPart>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .uploads
            .get(&object.upload_id)
            .map(|parts| {
                parts
                    .iter()
                    .map(|(num, data)| MultipartObjectPart {
                        part_num: *num,
                        etag: format!("\"{num}\""),
                        size: data.len() as u64,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn create_multipart_upload(&self, name: &str) -> Result<MultipartObject> {
        let mut state = self.state.lock().unwrap();
        state.next_upload += 1;
        let upload_id = format!("{name}#{}", state.next_upload);
        state.uploads.insert(upload_id.clone(), Vec::new());
        Ok(MultipartObject {
            name: name.to_string(),
            upload_id,
        })
    }

    async fn upload_part(
        &self,
        object: &MultipartObject,
        part_num: u64,
        body: Bytes,
    ) -> Result<MultipartObjectPart> {
        if self.fail_part == Some(part_num) {
            return Err(Error::response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "500 Internal Server Error",
            ));
        }

        let size = body.len() as u64;
        let mut state = self.state.lock().unwrap();
        state
            .uploads
            .get_mut(&object.upload_id)
            .expect("upload exists")
            .push((part_num, body.to_vec()));

        Ok(MultipartObjectPart {
            part_num,
            etag: format!("\"{part_num}\""),
            size,
        })
    }

    async fn commit_multipart_upload(
        &self,
        object: &MultipartObject,
        parts: &[MultipartObjectPart],
    ) -> Result<()> {
        validate_parts(parts)?;

        let mut state = self.state.lock().unwrap();
        let uploaded = state
            .uploads
            .remove(&object.upload_id)
            .expect("upload exists");

        let mut content = Vec::new();
        for (_, data) in &uploaded {
            content.extend_from_slice(data);
        }

        state.objects.insert(object.name.clone(), content);
        state.committed.push(object.upload_id.clone());
        Ok(())
    }

    async fn abort_multipart_upload(&self, object: &MultipartObject) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.uploads.remove(&object.upload_id);
        state.aborted.push(object.upload_id.clone());
        Ok(())
    }

    async fn exists(&self) -> Result<bool> {
        Ok(true)
    }

    async fn create(&self) -> Result<()> {
        Ok(())
    }

    async fn delete_bucket(&self) -> Result<()> {
        Ok(())
    }
}

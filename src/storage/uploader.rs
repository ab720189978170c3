use std::sync::Arc;

use bytes::Bytes;
use tracing::{error, info};

use crate::error::Result;
use crate::storage::bucket::{Bucket, MultipartObject, MultipartObjectPart};

/// Streams data into an object as a multipart upload.
///
/// Data is buffered until a full part accumulates; the multipart upload is
/// only initiated on the first spillover, so anything smaller than one part
/// ends up as a plain PUT at [`MultipartUploader::commit`] time. An empty
/// buffer is still uploaded, an empty object is valid.
pub struct MultipartUploader {
    bucket: Arc<dyn Bucket>,
    name: String,
    part_size: usize,
    buffer: Vec<u8>,
    upload: Option<MultipartObject>,
    parts: Vec<MultipartObjectPart>,
    size: u64,
}

impl MultipartUploader {
    pub fn new(bucket: Arc<dyn Bucket>, name: impl Into<String>, part_size: u64) -> Self {
        Self {
            bucket,
            name: name.into(),
            part_size: part_size as usize,
            buffer: Vec::new(),
            upload: None,
            parts: Vec::new(),
            size: 0,
        }
    }

    /// Resumes an in-progress upload: already-uploaded parts contribute to
    /// the effective size and part numbers continue the sequence.
    pub fn resume(
        bucket: Arc<dyn Bucket>,
        upload: MultipartObject,
        parts: Vec<MultipartObjectPart>,
        part_size: u64,
    ) -> Self {
        let size = parts.iter().map(|p| p.size).sum();

        Self {
            bucket,
            name: upload.name.clone(),
            part_size: part_size as usize,
            buffer: Vec::new(),
            upload: Some(upload),
            parts,
            size,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Total bytes this upload represents, including resumed parts.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn is_active(&self) -> bool {
        self.upload.is_some()
    }

    pub async fn append(&mut self, data: &[u8]) -> Result<()> {
        let mut to_send = self.buffer.len() + data.len();

        if self.upload.is_none() && to_send > self.part_size {
            self.upload = Some(self.bucket.create_multipart_upload(&self.name).await?);
        }

        let mut incoming_offset = 0;

        // cut parts of exactly part_size while enough data is on hand,
        // mixing the buffered remainder with the incoming slice
        while to_send > self.part_size {
            let part = if self.buffer.is_empty() {
                let part = Bytes::copy_from_slice(
                    &data[incoming_offset..incoming_offset + self.part_size],
                );
                incoming_offset += self.part_size;
                part
            } else {
                let buffer_space = self.part_size - self.buffer.len();
                self.buffer
                    .extend_from_slice(&data[incoming_offset..incoming_offset + buffer_space]);
                incoming_offset += buffer_space;
                Bytes::copy_from_slice(&self.buffer)
            };

            if let Err(error) = self.upload_next_part(part).await {
                self.maybe_abort("failure uploading part", Some(&error)).await;
                return Err(error);
            }

            self.buffer.clear();
            to_send -= self.part_size;
        }

        self.buffer.extend_from_slice(&data[incoming_offset..]);
        self.size += data.len() as u64;

        Ok(())
    }

    /// Flushes the residual data and finalizes the object. Consumes the
    /// upload state; appending after a commit starts over.
    pub async fn commit(&mut self) -> Result<()> {
        let result = self.try_commit().await;

        if let Err(error) = &result {
            self.maybe_abort("failure completing the upload", Some(error))
                .await;
        }

        result
    }

    async fn try_commit(&mut self) -> Result<()> {
        match self.upload.clone() {
            Some(upload) => {
                if !self.buffer.is_empty() {
                    let residual = Bytes::copy_from_slice(&self.buffer);
                    self.upload_next_part(residual).await?;
                }

                self.bucket
                    .commit_multipart_upload(&upload, &self.parts)
                    .await?;
            }
            None => {
                self.bucket
                    .put_object(&self.name, Bytes::copy_from_slice(&self.buffer))
                    .await?;
            }
        }

        self.buffer.clear();
        self.parts.clear();
        self.upload = None;

        Ok(())
    }

    async fn upload_next_part(&mut self, body: Bytes) -> Result<()> {
        let upload = self.upload.as_ref().expect("active multipart upload");
        let part_num = self.parts.len() as u64 + 1;

        let part = self.bucket.upload_part(upload, part_num, body).await?;
        self.parts.push(part);

        Ok(())
    }

    /// Cancels an active upload, swallowing any secondary error so the
    /// primary failure is the one the caller sees.
    async fn maybe_abort(&mut self, context: &str, cause: Option<&crate::error::Error>) {
        let Some(upload) = self.upload.take() else {
            return;
        };

        info!(
            object = upload.name,
            upload_id = upload.upload_id,
            cause = cause.map(ToString::to_string),
            "cancelling multipart upload after {context}"
        );

        self.buffer.clear();
        self.parts.clear();

        if let Err(abort_error) = self.bucket.abort_multipart_upload(&upload).await {
            error!(
                object = upload.name,
                upload_id = upload.upload_id,
                error = %abort_error,
                "error cancelling multipart upload after {context}"
            );
        }
    }
}

impl Drop for MultipartUploader {
    /// An uploader dropped with an uncommitted upload leaves garbage on the
    /// server; attempt an abort in the background when a runtime is around.
    fn drop(&mut self) {
        let Some(upload) = self.upload.take() else {
            return;
        };

        info!(
            object = upload.name,
            upload_id = upload.upload_id,
            "cancelling multipart upload after unexpected inner state"
        );

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let bucket = Arc::clone(&self.bucket);
            handle.spawn(async move {
                if let Err(error) = bucket.abort_multipart_upload(&upload).await {
                    error!(
                        object = upload.name,
                        upload_id = upload.upload_id,
                        error = %error,
                        "error cancelling multipart upload"
                    );
                }
            });
        }
    }
}

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::storage::bucket::{Bucket, Fields};
use crate::storage::uploader::MultipartUploader;

/// File access mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Read,
    Write,
    /// Resumes an in-progress multipart upload with the same name; degrades
    /// to [`Mode::Write`] when neither an upload nor the object exists.
    Append,
}

/// A directory listing entry; hidden entries are in-progress multipart
/// uploads under the directory's prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub name: String,
    pub size: u64,
}

struct Reader {
    size: u64,
    offset: u64,
}

struct Writer {
    uploader: MultipartUploader,
}

enum FileState {
    Reader(Reader),
    Writer(Writer),
}

/// A single object exposed through a file-like surface. Opened exactly once,
/// closed exactly once; reads issue signed ranged GETs, writes stream through
/// the multipart uploader.
pub struct ObjectFile {
    bucket: Arc<dyn Bucket>,
    name: String,
    /// Slash-terminated directory prefix, empty for the bucket root.
    prefix: String,
    part_size: u64,
    state: Option<FileState>,
}

impl ObjectFile {
    pub fn new(
        bucket: Arc<dyn Bucket>,
        name: impl Into<String>,
        prefix: impl Into<String>,
        part_size: u64,
    ) -> Self {
        Self {
            bucket,
            name: name.into(),
            prefix: prefix.into(),
            part_size,
            state: None,
        }
    }

    pub fn filename(&self) -> &str {
        &self.name
    }

    pub fn full_path(&self) -> String {
        format!("{}{}", self.prefix, self.name)
    }

    pub fn is_open(&self) -> bool {
        self.state.is_some()
    }

    /// Part size used by writers opened later; rejected while open.
    pub fn set_part_size(&mut self, part_size: u64) -> Result<()> {
        if self.is_open() {
            return Err(Error::Validation(
                "cannot change the part size of an open object".to_string(),
            ));
        }
        crate::storage::bucket::validate_part_size(part_size, self.bucket.max_part_size())?;
        self.part_size = part_size;
        Ok(())
    }

    pub async fn open(&mut self, mode: Mode) -> Result<()> {
        if self.is_open() {
            return Err(Error::Validation(format!(
                "object '{}' is already open",
                self.full_path()
            )));
        }

        match mode {
            Mode::Read => {
                let size = self.bucket.head_object(&self.full_path()).await.map_err(|e| {
                    if e.is_not_found() {
                        e.with_context(&format!(
                            "Failed opening object '{}' in READ mode",
                            self.full_path()
                        ))
                    } else {
                        e
                    }
                })?;

                self.state = Some(FileState::Reader(Reader { size, offset: 0 }));
            }
            Mode::Write => {
                self.state = Some(FileState::Writer(Writer {
                    uploader: MultipartUploader::new(
                        Arc::clone(&self.bucket),
                        self.full_path(),
                        self.part_size,
                    ),
                }));
            }
            Mode::Append => {
                let full_path = self.full_path();
                let uploads = self.bucket.list_multipart_uploads(0).await?;
                let active = uploads.into_iter().find(|u| u.name == full_path);

                let uploader = match active {
                    Some(upload) => {
                        let parts = self
                            .bucket
                            .list_multipart_uploaded_parts(&upload, 0)
                            .await?;
                        MultipartUploader::resume(
                            Arc::clone(&self.bucket),
                            upload,
                            parts,
                            self.part_size,
                        )
                    }
                    None => {
                        // appending is only possible to an active upload or a
                        // brand new object
                        match self.bucket.head_object(&full_path).await {
                            Ok(_) => {
                                return Err(Error::Validation(
                                    "Object Storage only supports APPEND mode for in-progress \
                                     multipart uploads or new files."
                                        .to_string(),
                                ));
                            }
                            Err(e) if e.is_not_found() => {}
                            Err(e) => return Err(e),
                        }

                        MultipartUploader::new(
                            Arc::clone(&self.bucket),
                            full_path,
                            self.part_size,
                        )
                    }
                };

                self.state = Some(FileState::Writer(Writer { uploader }));
            }
        }

        Ok(())
    }

    /// Reads up to `buf.len()` bytes at the current offset. Returns 0 at
    /// end of file.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let full_path = self.full_path();
        let (size, offset) = match &self.state {
            Some(FileState::Reader(reader)) => (reader.size, reader.offset),
            _ => {
                return Err(Error::Validation(format!(
                    "object '{full_path}' is not open for reading"
                )))
            }
        };

        if buf.is_empty() || offset >= size {
            return Ok(0);
        }

        let first = offset;
        let last = (size - 1).min(first + buf.len() as u64 - 1);

        let data = self
            .bucket
            .get_object(&full_path, Some(first), Some(last))
            .await?;

        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);

        if let Some(FileState::Reader(reader)) = &mut self.state {
            reader.offset += n as u64;
        }

        Ok(n)
    }

    /// Writes all of `data` or fails.
    pub async fn write(&mut self, data: &[u8]) -> Result<usize> {
        let full_path = self.full_path();
        let writer = match &mut self.state {
            Some(FileState::Writer(writer)) => writer,
            _ => {
                return Err(Error::Validation(format!(
                    "object '{full_path}' is not open for writing"
                )))
            }
        };

        writer.uploader.append(data).await?;

        Ok(data.len())
    }

    /// Readers clamp to `[0, size]`; writers are a non-seekable sink and
    /// report 0.
    pub fn seek(&mut self, offset: u64) -> Result<u64> {
        match &mut self.state {
            Some(FileState::Reader(reader)) => {
                reader.offset = offset.min(reader.size);
                Ok(reader.offset)
            }
            Some(FileState::Writer(_)) => Ok(0),
            None => Err(Error::Validation("object is not open".to_string())),
        }
    }

    /// Current read offset, or total bytes written.
    pub fn tell(&self) -> Result<u64> {
        match &self.state {
            Some(FileState::Reader(reader)) => Ok(reader.offset),
            Some(FileState::Writer(writer)) => Ok(writer.uploader.size()),
            None => Err(Error::Validation("object is not open".to_string())),
        }
    }

    /// Commits any pending write and releases the open state.
    pub async fn close(&mut self) -> Result<()> {
        let state = self.state.take();

        if let Some(FileState::Writer(mut writer)) = state {
            writer.uploader.commit().await?;
        }

        Ok(())
    }

    /// Size measured at open for readers, running total for writers, a HEAD
    /// round trip otherwise.
    pub async fn file_size(&self) -> Result<u64> {
        match &self.state {
            Some(FileState::Reader(reader)) => Ok(reader.size),
            Some(FileState::Writer(writer)) => Ok(writer.uploader.size()),
            None => self.bucket.head_object(&self.full_path()).await,
        }
    }

    /// A 404 is the only signal for non-existence; everything else is an
    /// error.
    pub async fn exists(&self) -> Result<bool> {
        match self.bucket.head_object(&self.full_path()).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn rename(&mut self, new_name: &str) -> Result<()> {
        self.bucket
            .rename_object(
                &self.full_path(),
                &format!("{}{new_name}", self.prefix),
            )
            .await?;
        self.name = new_name.to_string();
        Ok(())
    }

    pub async fn remove(&self) -> Result<()> {
        self.bucket.delete_object(&self.full_path()).await
    }

    /// The directory containing this object.
    pub fn parent(&self) -> Directory {
        let path = self.full_path();
        let name = match path.rfind('/') {
            Some(pos) => path[..pos].to_string(),
            None => String::new(),
        };

        Directory::new(Arc::clone(&self.bucket), name, self.part_size)
    }
}

/// A logical directory: a slash-terminated key prefix. Directories are
/// virtual; they exist once they contain objects or active multipart
/// uploads, or after a `create()` on this handle.
pub struct Directory {
    bucket: Arc<dyn Bucket>,
    name: String,
    prefix: String,
    part_size: u64,
    created: AtomicBool,
}

impl Directory {
    pub fn new(bucket: Arc<dyn Bucket>, name: impl Into<String>, part_size: u64) -> Self {
        let name = name.into();
        let prefix = if name.is_empty() {
            String::new()
        } else {
            format!("{name}/")
        };

        Self {
            bucket,
            name,
            prefix,
            part_size,
            created: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn exists(&self) -> Result<bool> {
        let objects = self
            .bucket
            .list_objects(&self.prefix, 1, false, Fields::NAME, None)
            .await?;

        // an empty prefix is the bucket root: the listing above already
        // proved the connection works
        if !objects.is_empty() || self.prefix.is_empty() || self.created.load(Ordering::Relaxed)
        {
            return Ok(true);
        }

        Ok(!self.multipart_uploads().await?.is_empty())
    }

    /// Directories materialize only once they contain something; creation
    /// just flips the local flag so `exists()` holds for this handle.
    pub fn create(&self) {
        self.created.store(true, Ordering::Relaxed);
    }

    pub async fn list_files(&self, include_hidden: bool) -> Result<Vec<DirectoryEntry>> {
        let objects = self
            .bucket
            .list_objects(&self.prefix, 0, false, Fields::NAME_SIZE, None)
            .await?;

        let mut files: Vec<DirectoryEntry> = objects
            .into_iter()
            .filter_map(|object| {
                let name = object.name.strip_prefix(&self.prefix)?.to_string();
                (!name.is_empty()).then_some(DirectoryEntry {
                    name,
                    size: object.size,
                })
            })
            .collect();

        if include_hidden {
            files.extend(self.multipart_uploads().await?);
        }

        Ok(files)
    }

    /// Files whose names match a glob pattern.
    pub async fn filter_files(&self, pattern: &str) -> Result<Vec<DirectoryEntry>> {
        let mut files = self.list_files(false).await?;
        files.retain(|f| glob_match::glob_match(pattern, &f.name));
        Ok(files)
    }

    async fn multipart_uploads(&self) -> Result<Vec<DirectoryEntry>> {
        let uploads = self.bucket.list_multipart_uploads(0).await?;
        let mut files = Vec::new();

        for upload in uploads {
            if self.prefix.is_empty() {
                // only names without a separator live in the root
                if !upload.name.contains('/') {
                    files.push(DirectoryEntry {
                        name: upload.name,
                        size: 0,
                    });
                }
            } else if let Some(name) = upload.name.strip_prefix(&self.prefix) {
                files.push(DirectoryEntry {
                    name: name.to_string(),
                    size: 0,
                });
            }
        }

        Ok(files)
    }

    /// Names of the subdirectories directly under this one.
    pub async fn subdirectories(&self) -> Result<HashSet<String>> {
        let mut prefixes = HashSet::new();
        self.bucket
            .list_objects(&self.prefix, 0, false, Fields::NAME, Some(&mut prefixes))
            .await?;
        Ok(prefixes)
    }

    pub fn file(&self, name: &str) -> ObjectFile {
        ObjectFile::new(
            Arc::clone(&self.bucket),
            name,
            self.prefix.clone(),
            self.part_size,
        )
    }

    pub fn join_path(a: &str, b: &str) -> String {
        if a.is_empty() {
            b.to_string()
        } else {
            format!("{a}/{b}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::testing::MockBucket;
    use pretty_assertions::assert_eq;

    const PART: u64 = 8;

    fn bucket() -> Arc<MockBucket> {
        Arc::new(MockBucket::default())
    }

    fn file(bucket: &Arc<MockBucket>, name: &str, prefix: &str) -> ObjectFile {
        ObjectFile::new(Arc::clone(bucket) as Arc<dyn Bucket>, name, prefix, PART)
    }

    #[test]
    fn join_path_handles_empty_left() {
        assert_eq!(Directory::join_path("", "a.tsv"), "a.tsv");
        assert_eq!(Directory::join_path("dump", "a.tsv"), "dump/a.tsv");
    }

    #[tokio::test]
    async fn double_open_is_an_error() {
        let bucket = bucket();
        let mut file = file(&bucket, "a.tsv", "");

        file.open(Mode::Write).await.unwrap();
        let err = file.open(Mode::Write).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn read_missing_object_names_the_mode() {
        let bucket = bucket();
        let mut file = file(&bucket, "missing.tsv", "dump/");

        let err = file.open(Mode::Read).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(err
            .to_string()
            .starts_with("Failed opening object 'dump/missing.tsv' in READ mode"));
    }

    #[tokio::test]
    async fn sequential_reads_are_adjacent_and_bounded() {
        let bucket = bucket();
        bucket.insert_object("a.tsv", b"0123456789");

        let mut file = file(&bucket, "a.tsv", "");
        file.open(Mode::Read).await.unwrap();
        assert_eq!(file.file_size().await.unwrap(), 10);

        let mut buf = [0u8; 4];
        assert_eq!(file.read(&mut buf).await.unwrap(), 4);
        assert_eq!(&buf, b"0123");
        assert_eq!(file.tell().unwrap(), 4);

        assert_eq!(file.read(&mut buf).await.unwrap(), 4);
        assert_eq!(&buf, b"4567");

        // reads never run past the end of the object
        assert_eq!(file.read(&mut buf).await.unwrap(), 2);
        assert_eq!(&buf[..2], b"89");
        assert_eq!(file.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn reader_seek_clamps_to_size() {
        let bucket = bucket();
        bucket.insert_object("a.tsv", b"0123456789");

        let mut file = file(&bucket, "a.tsv", "");
        file.open(Mode::Read).await.unwrap();

        assert_eq!(file.seek(4).unwrap(), 4);
        let mut buf = [0u8; 2];
        file.read(&mut buf).await.unwrap();
        assert_eq!(&buf, b"45");

        assert_eq!(file.seek(100).unwrap(), 10);
        assert_eq!(file.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn write_and_close_round_trip() {
        let bucket = bucket();
        let mut file = file(&bucket, "out.tsv", "dump/");

        file.open(Mode::Write).await.unwrap();
        // writer seeks are a no-op
        assert_eq!(file.seek(5).unwrap(), 0);

        let payload = vec![3u8; PART as usize * 2 + 3];
        file.write(&payload).await.unwrap();
        assert_eq!(file.tell().unwrap(), payload.len() as u64);

        file.close().await.unwrap();
        assert!(!file.is_open());
        assert_eq!(bucket.object("dump/out.tsv"), payload);
    }

    #[tokio::test]
    async fn append_degrades_to_write_for_new_objects() {
        let bucket = bucket();
        let mut file = file(&bucket, "new.tsv", "");

        file.open(Mode::Append).await.unwrap();
        file.write(b"abc").await.unwrap();
        file.close().await.unwrap();

        assert_eq!(bucket.object("new.tsv"), b"abc");
    }

    #[tokio::test]
    async fn append_to_completed_object_fails() {
        let bucket = bucket();
        bucket.insert_object("done.tsv", b"data");

        let mut file = file(&bucket, "done.tsv", "");
        let err = file.open(Mode::Append).await.unwrap_err();
        assert!(err
            .to_string()
            .contains("only supports APPEND mode for in-progress multipart uploads"));
    }

    #[tokio::test]
    async fn append_resumes_an_active_upload() {
        let bucket = bucket();

        // start an upload and leave it uncommitted
        {
            let mut writer = file(&bucket, "big.tsv", "");
            writer.open(Mode::Write).await.unwrap();
            writer.write(&vec![1u8; PART as usize + 1]).await.unwrap();
            // drop without close; the part already uploaded stays behind
            let FileState::Writer(w) = writer.state.take().unwrap() else {
                unreachable!()
            };
            std::mem::forget(w);
        }

        let mut file = file(&bucket, "big.tsv", "");
        file.open(Mode::Append).await.unwrap();
        // resumed size covers the uploaded part
        assert_eq!(file.tell().unwrap(), PART);

        file.write(b"xy").await.unwrap();
        file.close().await.unwrap();

        let mut expected = vec![1u8; PART as usize];
        expected.extend_from_slice(b"xy");
        assert_eq!(bucket.object("big.tsv"), expected);
    }

    #[tokio::test]
    async fn exists_and_remove() {
        let bucket = bucket();
        bucket.insert_object("a.tsv", b"x");

        let file_a = file(&bucket, "a.tsv", "");
        assert!(file_a.exists().await.unwrap());

        file_a.remove().await.unwrap();
        assert!(!file_a.exists().await.unwrap());
    }

    #[tokio::test]
    async fn rename_updates_the_handle() {
        let bucket = bucket();
        bucket.insert_object("dump/a.tsv", b"x");

        let mut file = file(&bucket, "a.tsv", "dump/");
        file.rename("b.tsv").await.unwrap();

        assert_eq!(file.filename(), "b.tsv");
        assert_eq!(file.full_path(), "dump/b.tsv");
        assert_eq!(bucket.object("dump/b.tsv"), b"x");
    }

    #[tokio::test]
    async fn parent_of_nested_object() {
        let bucket = bucket();
        let file = file(&bucket, "a.tsv", "dump/2023/");
        assert_eq!(file.parent().name(), "dump/2023");

        let root_file = ObjectFile::new(
            Arc::clone(&bucket) as Arc<dyn Bucket>,
            "a.tsv",
            "",
            PART,
        );
        assert_eq!(root_file.parent().name(), "");
    }

    #[tokio::test]
    async fn directory_listing_strips_the_prefix() {
        let bucket = bucket();
        bucket.insert_object("dump/a.tsv", b"123");
        bucket.insert_object("dump/b.tsv", b"4567");
        bucket.insert_object("dump/sub/c.tsv", b"1");
        bucket.insert_object("other.tsv", b"1");

        let dir = Directory::new(Arc::clone(&bucket) as Arc<dyn Bucket>, "dump", PART);
        let mut files = dir.list_files(false).await.unwrap();
        files.sort_by(|a, b| a.name.cmp(&b.name));

        assert_eq!(
            files,
            vec![
                DirectoryEntry {
                    name: "a.tsv".to_string(),
                    size: 3
                },
                DirectoryEntry {
                    name: "b.tsv".to_string(),
                    size: 4
                },
            ]
        );

        let subdirectories = dir.subdirectories().await.unwrap();
        assert!(subdirectories.contains("dump/sub/"));
    }

    #[tokio::test]
    async fn hidden_files_are_active_uploads() {
        let bucket = bucket();
        bucket
            .create_multipart_upload("dump/pending.tsv")
            .await
            .unwrap();

        let dir = Directory::new(Arc::clone(&bucket) as Arc<dyn Bucket>, "dump", PART);
        assert!(dir.list_files(false).await.unwrap().is_empty());

        let hidden = dir.list_files(true).await.unwrap();
        assert_eq!(hidden.len(), 1);
        assert_eq!(hidden[0].name, "pending.tsv");
        assert_eq!(hidden[0].size, 0);
    }

    #[tokio::test]
    async fn directory_existence() {
        let bucket = bucket();
        let dir = Directory::new(Arc::clone(&bucket) as Arc<dyn Bucket>, "dump", PART);
        assert!(!dir.exists().await.unwrap());

        // a just-created logical directory exists for this handle
        dir.create();
        assert!(dir.exists().await.unwrap());

        // a directory with content exists for everyone
        bucket.insert_object("dump/a.tsv", b"1");
        let other = Directory::new(Arc::clone(&bucket) as Arc<dyn Bucket>, "dump", PART);
        assert!(other.exists().await.unwrap());

        // the root always exists once the connection works
        let root = Directory::new(Arc::clone(&bucket) as Arc<dyn Bucket>, "", PART);
        assert!(root.exists().await.unwrap());
    }

    #[tokio::test]
    async fn directory_exists_via_active_upload() {
        let bucket = bucket();
        bucket
            .create_multipart_upload("dump/pending.tsv")
            .await
            .unwrap();

        let dir = Directory::new(Arc::clone(&bucket) as Arc<dyn Bucket>, "dump", PART);
        assert!(dir.exists().await.unwrap());
    }

    #[tokio::test]
    async fn filter_files_by_glob() {
        let bucket = bucket();
        bucket.insert_object("dump/a.tsv", b"1");
        bucket.insert_object("dump/a.csv", b"1");
        bucket.insert_object("dump/b.tsv", b"1");

        let dir = Directory::new(Arc::clone(&bucket) as Arc<dyn Bucket>, "dump", PART);
        let mut files = dir.filter_files("*.tsv").await.unwrap();
        files.sort_by(|a, b| a.name.cmp(&b.name));

        let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a.tsv", "b.tsv"]);
    }
}

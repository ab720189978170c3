//! The virtual file-system surface: bucket contract, multipart uploader and
//! the object/directory types built on top of them.

pub mod bucket;
pub mod http;
pub mod object;
#[cfg(test)]
pub(crate) mod testing;
pub mod uploader;

pub use bucket::{
    Bucket, Fields, MultipartObject, MultipartObjectPart, ObjectDetails, DEFAULT_PART_SIZE,
    MIN_PART_SIZE,
};
pub use http::{HttpDirectory, HttpObject};
pub use object::{Directory, DirectoryEntry, Mode, ObjectFile};
pub use uploader::MultipartUploader;

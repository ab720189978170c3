#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]

pub use crate::config::{parse_uri, StorageUri};
pub use crate::error::{Error, ErrorCode, Result};
pub use crate::import::{Dialect, Scanner};
pub use crate::masked::MaskedString;
pub use crate::storage::{
    Bucket, Directory, DirectoryEntry, Fields, HttpDirectory, HttpObject, Mode, MultipartObject,
    MultipartObjectPart, MultipartUploader, ObjectDetails, ObjectFile,
};

pub mod aws;
pub mod azure;
pub mod config;
pub mod error;
pub mod import;
pub mod masked;
pub mod oci;
pub mod rest;
pub mod storage;

//! MaxIOFS blob store
//!
//! Key-addressed streaming file I/O under a local directory tree, with
//! optional zstd compression and AES-256-GCM encryption at rest. Writes
//! land in a temp file and are renamed into place so readers never see a
//! partial blob.

pub mod crypt;
pub mod etag;
pub mod store;

pub use crypt::{EncryptionInfo, MasterKey};
pub use etag::{multipart_etag, Md5Writer};
pub use store::{BlobStore, BlobWriteOptions, ByteStream, PutResult};

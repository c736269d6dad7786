//! Key-addressed blob storage on a local directory tree.
//!
//! Versioned object blobs live at
//! `{tenant}/{bucket}/{keyHash[:2]}/{keyHash}/{versionID}` and multipart
//! part blobs at `parts/{uploadID}/{partNumber}`. Writes stream into a
//! temp file in the destination directory and are renamed into place on
//! success, so concurrent readers only ever observe complete blobs.

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::{Duration, SystemTime};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::crypt::{Dek, EncryptionInfo, MasterKey, FRAME_SIZE, NONCE_LEN};
use crate::etag::Md5Writer;
use maxiofs_common::{Error, Result};

/// Stream of body bytes flowing in or out of the store
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Read chunk size for raw (unframed) blobs
const READ_CHUNK: usize = 64 * 1024;

/// Options controlling how a blob is written
#[derive(Default)]
pub struct BlobWriteOptions {
    /// zstd level; `None` disables compression
    pub compress: Option<i32>,
    /// Master key; when set a fresh DEK encrypts the blob
    pub master_key: Option<MasterKey>,
}

impl BlobWriteOptions {
    fn framed(&self) -> bool {
        self.compress.is_some() || self.master_key.is_some()
    }
}

/// Result of a completed blob write
#[derive(Debug)]
pub struct PutResult {
    /// Plaintext (logical) size in bytes
    pub size: u64,
    /// Bytes written to disk (differs from `size` for framed blobs)
    pub stored_size: u64,
    /// Hex MD5 of the plaintext
    pub etag: String,
    /// Raw MD5 digest (for multipart composite ETags)
    pub md5: [u8; 16],
    /// DEK wrap when the blob was encrypted
    pub encryption: Option<EncryptionInfo>,
    /// Whether the blob uses the framed on-disk format
    pub compressed: bool,
}

/// How to interpret a blob when reading it back
#[derive(Default)]
pub struct BlobReadOptions {
    /// The blob was zstd-compressed at write time
    pub compressed: bool,
    /// DEK unwrapped from the version record, for encrypted blobs
    pub dek: Option<Dek>,
}

impl BlobReadOptions {
    fn framed(&self) -> bool {
        self.compressed || self.dek.is_some()
    }
}

/// Local-disk blob store.
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    /// Open the store rooted at `root`, creating the directory tree.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        std::fs::create_dir_all(root.join("parts"))?;
        Ok(Self { root })
    }

    /// Relative path for a versioned object blob.
    #[must_use]
    pub fn version_path(tenant: &str, bucket: &str, key: &str, version_id: &str) -> String {
        let hash = hex::encode(Sha256::digest(key.as_bytes()));
        format!("{tenant}/{bucket}/{}/{hash}/{version_id}", &hash[..2])
    }

    /// Relative path for a multipart part blob.
    #[must_use]
    pub fn part_path(upload_id: &str, part_number: u32) -> String {
        format!("parts/{upload_id}/{part_number}")
    }

    fn abs(&self, rel: &str) -> PathBuf {
        self.root.join(rel)
    }

    /// Stream a body into a blob. The temp file is removed on any
    /// failure; the destination appears atomically via rename.
    pub async fn put_stream<S>(
        &self,
        rel: &str,
        body: S,
        opts: &BlobWriteOptions,
    ) -> Result<PutResult>
    where
        S: Stream<Item = Result<Bytes>> + Send + Unpin,
    {
        let dest = self.abs(rel);
        let parent = dest
            .parent()
            .ok_or_else(|| Error::storage(format!("blob path has no parent: {rel}")))?;
        fs::create_dir_all(parent).await?;

        let tmp = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let result = self.write_body(&tmp, body, opts).await;

        match result {
            Ok(put) => {
                fs::rename(&tmp, &dest).await?;
                debug!(path = rel, size = put.size, "blob committed");
                Ok(put)
            }
            Err(e) => {
                if let Err(rm) = fs::remove_file(&tmp).await {
                    if rm.kind() != std::io::ErrorKind::NotFound {
                        warn!(path = %tmp.display(), error = %rm, "failed to remove temp blob");
                    }
                }
                Err(e)
            }
        }
    }

    async fn write_body<S>(
        &self,
        tmp: &Path,
        mut body: S,
        opts: &BlobWriteOptions,
    ) -> Result<PutResult>
    where
        S: Stream<Item = Result<Bytes>> + Send + Unpin,
    {
        let mut file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(tmp)
            .await?;

        let dek_pair = match &opts.master_key {
            Some(master) => Some(master.generate_dek()?),
            None => None,
        };

        let mut md5 = Md5Writer::new();
        let mut stored: u64 = 0;
        let mut frame_buf: Vec<u8> = Vec::new();

        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            md5.update(&chunk);

            if opts.framed() {
                frame_buf.extend_from_slice(&chunk);
                while frame_buf.len() >= FRAME_SIZE {
                    let rest = frame_buf.split_off(FRAME_SIZE);
                    let frame = std::mem::replace(&mut frame_buf, rest);
                    stored += self
                        .write_frame(&mut file, &frame, opts, dek_pair.as_ref())
                        .await?;
                }
            } else {
                file.write_all(&chunk).await?;
                stored += chunk.len() as u64;
            }
        }

        if opts.framed() && !frame_buf.is_empty() {
            stored += self
                .write_frame(&mut file, &frame_buf, opts, dek_pair.as_ref())
                .await?;
        }

        file.sync_all().await?;
        let size = md5.len();
        let (etag, digest) = md5.finalize();

        Ok(PutResult {
            size,
            stored_size: stored,
            etag,
            md5: digest,
            encryption: dek_pair.map(|(_, info)| info),
            compressed: opts.compress.is_some(),
        })
    }

    async fn write_frame(
        &self,
        file: &mut File,
        plaintext: &[u8],
        opts: &BlobWriteOptions,
        dek: Option<&(Dek, EncryptionInfo)>,
    ) -> Result<u64> {
        let payload = match opts.compress {
            Some(level) => zstd::bulk::compress(plaintext, level)
                .map_err(|e| Error::storage(format!("zstd compress: {e}")))?,
            None => plaintext.to_vec(),
        };

        let framed = match dek {
            Some((dek, _)) => dek.seal_frame(&payload)?,
            None => {
                // Compressed-only frames carry just the length header
                let mut out = Vec::with_capacity(4 + payload.len());
                out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
                out.extend_from_slice(&payload);
                out
            }
        };

        file.write_all(&framed).await?;
        Ok(framed.len() as u64)
    }

    /// Open a blob for reading. `range` is an inclusive byte range over
    /// the plaintext, already validated against the logical size.
    pub async fn get_stream(
        &self,
        rel: &str,
        range: Option<(u64, u64)>,
        opts: BlobReadOptions,
    ) -> Result<ByteStream> {
        let path = self.abs(rel);
        let file = File::open(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::BlobNotFound(rel.to_string())
            } else {
                Error::from(e)
            }
        })?;

        if opts.framed() {
            Ok(framed_stream(file, opts, range))
        } else {
            raw_stream(file, range).await
        }
    }

    /// Delete a blob. Missing blobs are not an error.
    pub async fn delete(&self, rel: &str) -> Result<()> {
        match fs::remove_file(self.abs(rel)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// On-disk size of a blob.
    pub async fn stat(&self, rel: &str) -> Result<u64> {
        match fs::metadata(self.abs(rel)).await {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::BlobNotFound(rel.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Remove every part blob of a multipart upload.
    pub async fn delete_upload_parts(&self, upload_id: &str) -> Result<()> {
        let dir = self.root.join("parts").join(upload_id);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Upload IDs whose part directories have not been touched for
    /// `older_than`. Used by the stale-upload sweep.
    pub async fn stale_part_uploads(&self, older_than: Duration) -> Result<Vec<String>> {
        let mut out = Vec::new();
        let cutoff = SystemTime::now() - older_than;
        let mut entries = match fs::read_dir(self.root.join("parts")).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            if !meta.is_dir() {
                continue;
            }
            if meta.modified().map(|m| m < cutoff).unwrap_or(false) {
                if let Some(name) = entry.file_name().to_str() {
                    out.push(name.to_string());
                }
            }
        }
        Ok(out)
    }
}

async fn raw_stream(mut file: File, range: Option<(u64, u64)>) -> Result<ByteStream> {
    let total = file.metadata().await?.len();
    let (start, end) = range.unwrap_or((0, total.saturating_sub(1)));

    if total == 0 {
        return Ok(Box::pin(stream::empty()));
    }
    file.seek(std::io::SeekFrom::Start(start)).await?;
    let remaining = end - start + 1;

    let s = stream::unfold((file, remaining), |(mut file, remaining)| async move {
        if remaining == 0 {
            return None;
        }
        let want = remaining.min(READ_CHUNK as u64) as usize;
        let mut buf = vec![0u8; want];
        match file.read(&mut buf).await {
            Ok(0) => None,
            Ok(n) => {
                buf.truncate(n);
                Some((Ok(Bytes::from(buf)), (file, remaining - n as u64)))
            }
            Err(e) => Some((Err(Error::from(e)), (file, 0))),
        }
    });
    Ok(Box::pin(s))
}

/// Decode the framed on-disk format, decrypting and/or decompressing
/// each frame, then apply the plaintext range by skipping and trimming.
fn framed_stream(file: File, opts: BlobReadOptions, range: Option<(u64, u64)>) -> ByteStream {
    struct State {
        file: File,
        opts: BlobReadOptions,
        skip: u64,
        remaining: u64,
        done: bool,
    }

    let (skip, remaining) = match range {
        Some((start, end)) => (start, end - start + 1),
        None => (0, u64::MAX),
    };

    let state = State {
        file,
        opts,
        skip,
        remaining,
        done: false,
    };

    let s = stream::unfold(state, |mut st| async move {
        loop {
            if st.done || st.remaining == 0 {
                return None;
            }
            match read_frame(&mut st.file, &st.opts).await {
                Ok(None) => {
                    st.done = true;
                    return None;
                }
                Ok(Some(mut plain)) => {
                    if st.skip >= plain.len() as u64 {
                        st.skip -= plain.len() as u64;
                        continue;
                    }
                    if st.skip > 0 {
                        plain.drain(..st.skip as usize);
                        st.skip = 0;
                    }
                    if (plain.len() as u64) > st.remaining {
                        plain.truncate(st.remaining as usize);
                    }
                    st.remaining -= plain.len() as u64;
                    return Some((Ok(Bytes::from(plain)), st));
                }
                Err(e) => {
                    st.done = true;
                    return Some((Err(e), st));
                }
            }
        }
    });
    Box::pin(s)
}

/// Read and decode one frame; `Ok(None)` at a clean end of file.
async fn read_frame(file: &mut File, opts: &BlobReadOptions) -> Result<Option<Vec<u8>>> {
    let header_len = if opts.dek.is_some() { NONCE_LEN + 4 } else { 4 };
    let mut header = vec![0u8; header_len];
    let n = read_full(file, &mut header).await?;
    if n == 0 {
        return Ok(None);
    }
    if n < header_len {
        return Err(Error::DataCorruption("truncated frame header".into()));
    }

    let payload_len =
        u32::from_be_bytes(header[header_len - 4..].try_into().unwrap()) as usize;
    if payload_len > FRAME_SIZE + 1024 * 64 {
        return Err(Error::DataCorruption("frame length out of bounds".into()));
    }
    let mut payload = vec![0u8; payload_len];
    if read_full(file, &mut payload).await? < payload_len {
        return Err(Error::DataCorruption("truncated frame payload".into()));
    }

    let decrypted = match &opts.dek {
        Some(dek) => dek.open_frame(&header[..NONCE_LEN], &payload)?,
        None => payload,
    };

    let plain = if opts.compressed {
        zstd::bulk::decompress(&decrypted, FRAME_SIZE + 1024)
            .map_err(|e| Error::DataCorruption(format!("zstd decompress: {e}")))?
    } else {
        decrypted
    };
    Ok(Some(plain))
}

/// Fill `buf` as far as possible; returns bytes read (0 at EOF).
async fn read_full(file: &mut File, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(chunks: &[&[u8]]) -> impl Stream<Item = Result<Bytes>> + Send + Unpin {
        stream::iter(
            chunks
                .iter()
                .map(|c| Ok(Bytes::copy_from_slice(c)))
                .collect::<Vec<_>>(),
        )
    }

    async fn collect(mut s: ByteStream) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = s.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_raw_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::open(dir.path()).unwrap();

        let put = store
            .put_stream("t/b/aa/hash/v1", body(&[b"hello ", b"world"]), &BlobWriteOptions::default())
            .await
            .unwrap();
        assert_eq!(put.size, 11);
        assert_eq!(put.stored_size, 11);
        assert!(put.encryption.is_none());

        let got = store
            .get_stream("t/b/aa/hash/v1", None, BlobReadOptions::default())
            .await
            .unwrap();
        assert_eq!(collect(got).await, b"hello world");
    }

    #[tokio::test]
    async fn test_raw_range() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::open(dir.path()).unwrap();
        store
            .put_stream("r", body(&[b"0123456789"]), &BlobWriteOptions::default())
            .await
            .unwrap();

        let got = store
            .get_stream("r", Some((0, 0)), BlobReadOptions::default())
            .await
            .unwrap();
        assert_eq!(collect(got).await, b"0");

        let got = store
            .get_stream("r", Some((3, 6)), BlobReadOptions::default())
            .await
            .unwrap();
        assert_eq!(collect(got).await, b"3456");
    }

    #[tokio::test]
    async fn test_empty_object() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::open(dir.path()).unwrap();
        let put = store
            .put_stream("empty", body(&[]), &BlobWriteOptions::default())
            .await
            .unwrap();
        assert_eq!(put.size, 0);
        assert_eq!(put.etag, "d41d8cd98f00b204e9800998ecf8427e");

        let got = store
            .get_stream("empty", None, BlobReadOptions::default())
            .await
            .unwrap();
        assert!(collect(got).await.is_empty());
    }

    #[tokio::test]
    async fn test_encrypted_compressed_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::open(dir.path()).unwrap();
        let master = MasterKey::new([3u8; 32]);

        // Spans multiple frames
        let payload: Vec<u8> = (0..(2 * FRAME_SIZE + 100)).map(|i| (i % 251) as u8).collect();
        let opts = BlobWriteOptions {
            compress: Some(3),
            master_key: Some(master.clone()),
        };
        let put = store.put_stream("enc", body(&[&payload]), &opts).await.unwrap();
        assert_eq!(put.size, payload.len() as u64);
        let info = put.encryption.expect("encryption info");

        let dek = master.unwrap_dek(&info).unwrap();
        let got = store
            .get_stream(
                "enc",
                None,
                BlobReadOptions {
                    compressed: true,
                    dek: Some(dek),
                },
            )
            .await
            .unwrap();
        assert_eq!(collect(got).await, payload);
    }

    #[tokio::test]
    async fn test_encrypted_range_crosses_frames() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::open(dir.path()).unwrap();
        let master = MasterKey::new([5u8; 32]);

        let payload: Vec<u8> = (0..(FRAME_SIZE + 50)).map(|i| (i % 256) as u8).collect();
        let opts = BlobWriteOptions {
            compress: None,
            master_key: Some(master.clone()),
        };
        let put = store.put_stream("encr", body(&[&payload]), &opts).await.unwrap();
        let dek = master.unwrap_dek(&put.encryption.unwrap()).unwrap();

        let start = FRAME_SIZE as u64 - 10;
        let end = FRAME_SIZE as u64 + 9;
        let got = store
            .get_stream(
                "encr",
                Some((start, end)),
                BlobReadOptions {
                    compressed: false,
                    dek: Some(dek),
                },
            )
            .await
            .unwrap();
        assert_eq!(collect(got).await, &payload[start as usize..=end as usize]);
    }

    #[tokio::test]
    async fn test_failed_write_removes_temp() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::open(dir.path()).unwrap();

        let bad = stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(Error::internal("client went away")),
        ]);
        let err = store
            .put_stream("t/x", bad, &BlobWriteOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Internal(_)));

        // No temp file left behind, destination absent
        let entries: Vec<_> = std::fs::read_dir(dir.path().join("t"))
            .map(|rd| rd.filter_map(|e| e.ok()).collect())
            .unwrap_or_default();
        assert!(entries.is_empty());
        assert!(matches!(store.stat("t/x").await, Err(Error::BlobNotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_and_stat() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::open(dir.path()).unwrap();
        store
            .put_stream("d", body(&[b"abc"]), &BlobWriteOptions::default())
            .await
            .unwrap();
        assert_eq!(store.stat("d").await.unwrap(), 3);
        store.delete("d").await.unwrap();
        assert!(store.delete("d").await.is_ok());
        assert!(matches!(store.stat("d").await, Err(Error::BlobNotFound(_))));
    }

    #[tokio::test]
    async fn test_part_paths_and_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::open(dir.path()).unwrap();
        let p1 = BlobStore::part_path("up1", 1);
        let p2 = BlobStore::part_path("up1", 2);
        store.put_stream(&p1, body(&[b"a"]), &BlobWriteOptions::default()).await.unwrap();
        store.put_stream(&p2, body(&[b"b"]), &BlobWriteOptions::default()).await.unwrap();

        store.delete_upload_parts("up1").await.unwrap();
        assert!(matches!(store.stat(&p1).await, Err(Error::BlobNotFound(_))));
    }

    #[test]
    fn test_version_path_shape() {
        let p = BlobStore::version_path("t1", "photos", "a/b.jpg", "v123");
        let parts: Vec<_> = p.split('/').collect();
        assert_eq!(parts[0], "t1");
        assert_eq!(parts[1], "photos");
        assert_eq!(parts[2].len(), 2);
        assert!(parts[3].starts_with(parts[2]));
        assert_eq!(parts[4], "v123");
    }
}

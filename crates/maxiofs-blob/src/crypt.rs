//! At-rest encryption.
//!
//! Each encrypted object gets a random 256-bit data encryption key
//! (DEK). The DEK encrypts the object body with AES-256-GCM in frames
//! of at most 1 MiB plaintext, each frame written as
//! `nonce(12) ‖ len(4, BE) ‖ ciphertext`. The DEK itself is wrapped
//! with the node's master key (also AES-256-GCM) and the wrap travels
//! in the object's metadata record, never alongside the blob.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use maxiofs_common::{Error, Result};

/// Plaintext bytes per encryption frame
pub const FRAME_SIZE: usize = 1024 * 1024;

/// AES-GCM nonce length
pub const NONCE_LEN: usize = 12;

/// Node master key used to wrap per-object DEKs and stored secrets.
#[derive(Clone)]
pub struct MasterKey([u8; 32]);

impl MasterKey {
    #[must_use]
    pub fn new(key: [u8; 32]) -> Self {
        Self(key)
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0))
    }

    /// Generate a fresh DEK and return it wrapped for storage.
    pub fn generate_dek(&self) -> Result<(Dek, EncryptionInfo)> {
        let mut dek = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut dek);
        let info = self.wrap(&dek)?;
        Ok((Dek::new(dek), info))
    }

    /// Wrap a DEK: `nonce ‖ ciphertext`, base64-encoded.
    fn wrap(&self, dek: &[u8; 32]) -> Result<EncryptionInfo> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);
        let ct = self
            .cipher()
            .encrypt(Nonce::from_slice(&nonce), dek.as_slice())
            .map_err(|_| Error::internal("DEK wrap failed"))?;

        let mut wrapped = Vec::with_capacity(NONCE_LEN + ct.len());
        wrapped.extend_from_slice(&nonce);
        wrapped.extend_from_slice(&ct);

        use base64::Engine;
        Ok(EncryptionInfo {
            algorithm: "AES256".to_string(),
            wrapped_dek: base64::engine::general_purpose::STANDARD.encode(wrapped),
        })
    }

    /// Unwrap a stored DEK.
    pub fn unwrap_dek(&self, info: &EncryptionInfo) -> Result<Dek> {
        use base64::Engine;
        let wrapped = base64::engine::general_purpose::STANDARD
            .decode(&info.wrapped_dek)
            .map_err(|_| Error::DataCorruption("wrapped DEK is not valid base64".into()))?;
        if wrapped.len() <= NONCE_LEN {
            return Err(Error::DataCorruption("wrapped DEK too short".into()));
        }
        let (nonce, ct) = wrapped.split_at(NONCE_LEN);
        let dek = self
            .cipher()
            .decrypt(Nonce::from_slice(nonce), ct)
            .map_err(|_| Error::DataCorruption("DEK unwrap failed".into()))?;
        let dek: [u8; 32] = dek
            .try_into()
            .map_err(|_| Error::DataCorruption("unwrapped DEK has wrong length".into()))?;
        Ok(Dek::new(dek))
    }

    /// Encrypt an arbitrary small secret (access-key secrets at rest).
    pub fn seal_secret(&self, plaintext: &[u8]) -> Result<String> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);
        let ct = self
            .cipher()
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| Error::internal("secret seal failed"))?;
        let mut out = Vec::with_capacity(NONCE_LEN + ct.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ct);
        use base64::Engine;
        Ok(base64::engine::general_purpose::STANDARD.encode(out))
    }

    /// Decrypt a secret sealed with [`MasterKey::seal_secret`].
    pub fn open_secret(&self, sealed: &str) -> Result<Vec<u8>> {
        use base64::Engine;
        let raw = base64::engine::general_purpose::STANDARD
            .decode(sealed)
            .map_err(|_| Error::DataCorruption("sealed secret is not valid base64".into()))?;
        if raw.len() <= NONCE_LEN {
            return Err(Error::DataCorruption("sealed secret too short".into()));
        }
        let (nonce, ct) = raw.split_at(NONCE_LEN);
        self.cipher()
            .decrypt(Nonce::from_slice(nonce), ct)
            .map_err(|_| Error::DataCorruption("secret open failed".into()))
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material
        write!(f, "MasterKey(..)")
    }
}

/// Per-object data encryption key.
pub struct Dek {
    cipher: Aes256Gcm,
}

impl Dek {
    fn new(key: [u8; 32]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key)),
        }
    }

    /// Encrypt one frame of plaintext: returns `nonce ‖ len ‖ ciphertext`.
    pub fn seal_frame(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);
        let ct = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| Error::internal("frame encryption failed"))?;

        let mut frame = Vec::with_capacity(NONCE_LEN + 4 + ct.len());
        frame.extend_from_slice(&nonce);
        frame.extend_from_slice(&(ct.len() as u32).to_be_bytes());
        frame.extend_from_slice(&ct);
        Ok(frame)
    }

    /// Decrypt one frame's ciphertext given its nonce.
    pub fn open_frame(&self, nonce: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| Error::DataCorruption("frame decryption failed".into()))
    }
}

/// Encryption metadata stored with an object version.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EncryptionInfo {
    /// Algorithm tag reported on the wire (`AES256`)
    pub algorithm: String,
    /// Master-key-wrapped DEK, base64
    pub wrapped_dek: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> MasterKey {
        MasterKey::new([7u8; 32])
    }

    #[test]
    fn test_dek_wrap_roundtrip() {
        let master = test_key();
        let (dek, info) = master.generate_dek().unwrap();
        assert_eq!(info.algorithm, "AES256");

        let frame = dek.seal_frame(b"some bytes").unwrap();
        let unwrapped = master.unwrap_dek(&info).unwrap();
        let (nonce, rest) = frame.split_at(NONCE_LEN);
        let ct = &rest[4..];
        assert_eq!(unwrapped.open_frame(nonce, ct).unwrap(), b"some bytes");
    }

    #[test]
    fn test_unwrap_with_wrong_master_fails() {
        let (_, info) = test_key().generate_dek().unwrap();
        let other = MasterKey::new([9u8; 32]);
        assert!(other.unwrap_dek(&info).is_err());
    }

    #[test]
    fn test_frame_layout() {
        let (dek, _) = test_key().generate_dek().unwrap();
        let frame = dek.seal_frame(b"abc").unwrap();
        let ct_len = u32::from_be_bytes(frame[NONCE_LEN..NONCE_LEN + 4].try_into().unwrap());
        assert_eq!(frame.len(), NONCE_LEN + 4 + ct_len as usize);
        // GCM tag adds 16 bytes
        assert_eq!(ct_len as usize, 3 + 16);
    }

    #[test]
    fn test_secret_seal_roundtrip() {
        let master = test_key();
        let sealed = master.seal_secret(b"super-secret-key").unwrap();
        assert_eq!(master.open_secret(&sealed).unwrap(), b"super-secret-key");
        assert!(MasterKey::new([1u8; 32]).open_secret(&sealed).is_err());
    }

    #[test]
    fn test_tampered_frame_rejected() {
        let (dek, _) = test_key().generate_dek().unwrap();
        let mut frame = dek.seal_frame(b"payload").unwrap();
        let last = frame.len() - 1;
        frame[last] ^= 0xff;
        let (nonce, rest) = frame.split_at(NONCE_LEN);
        assert!(dek.open_frame(nonce, &rest[4..]).is_err());
    }
}

pub mod aes_cbc;
pub mod keywrap;

use rand::RngCore;
use sha1::{Digest, Sha1};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{IncryptError, Result};

/// Total key material: 32-byte AES-256 key followed by the 16-byte CBC IV.
pub const KEY_LEN: usize = 48;

/// ASCII tag prefixed (NUL-separated) to the wrapped key blob on the remote.
pub const KEY_FORMAT: &[u8] = b"AES-256-CBC+IV";

/// The repository key, never stored in cleartext on the remote.
/// Zeroized on drop so key material does not linger in memory.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct RepoKey {
    bytes: [u8; KEY_LEN],
}

impl RepoKey {
    /// Generate a fresh key from OS entropy. The IV is part of the key and
    /// fixed for the lifetime of the repository: encrypting the same
    /// cleartext must yield identical ciphertext across pushes.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    pub fn from_bytes(raw: &[u8]) -> Result<Self> {
        if raw.len() != KEY_LEN {
            return Err(IncryptError::CorruptMetadata(format!(
                "key material is {} bytes, expected {KEY_LEN}",
                raw.len()
            )));
        }
        let mut bytes = [0u8; KEY_LEN];
        bytes.copy_from_slice(raw);
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub(crate) fn aes_key(&self) -> &[u8; 32] {
        self.bytes[..32]
            .try_into()
            .expect("48-byte key holds a 32-byte cipher key")
    }

    pub(crate) fn iv(&self) -> &[u8; 16] {
        self.bytes[32..]
            .try_into()
            .expect("48-byte key holds a 16-byte IV")
    }
}

/// SHA-1 of `data` as a 20-byte array.
pub fn sha1(data: &[u8]) -> [u8; 20] {
    Sha1::digest(data).into()
}

/// Encrypt `sha1(data) ‖ data`. The hash prefix is what lets readers reject
/// corrupted or foreign ciphertext without an authentication tag.
pub fn seal(key: &RepoKey, data: &[u8]) -> Vec<u8> {
    let mut plain = Vec::with_capacity(20 + data.len());
    plain.extend_from_slice(&sha1(data));
    plain.extend_from_slice(data);
    aes_cbc::encrypt(key, &plain)
}

/// Reverse of [`seal`]: decrypt and verify the hash prefix.
pub fn open(key: &RepoKey, blob: &[u8]) -> Result<Vec<u8>> {
    let plain = aes_cbc::decrypt(key, blob)?;
    if plain.len() < 20 {
        return Err(IncryptError::CorruptCipher("sealed payload too short"));
    }
    let (prefix, data) = plain.split_at(20);
    if prefix != sha1(data) {
        return Err(IncryptError::CorruptCipher("sealed payload digest mismatch"));
    }
    Ok(data.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_produces_full_length_keys() {
        let key = RepoKey::generate();
        assert_eq!(key.as_bytes().len(), KEY_LEN);
        assert_eq!(key.aes_key().len(), 32);
        assert_eq!(key.iv().len(), 16);
    }

    #[test]
    fn from_bytes_rejects_wrong_length() {
        assert!(RepoKey::from_bytes(&[0u8; 47]).is_err());
        assert!(RepoKey::from_bytes(&[0u8; 49]).is_err());
        assert!(RepoKey::from_bytes(&[0u8; 48]).is_ok());
    }

    #[test]
    fn seal_open_roundtrip() {
        let key = RepoKey::generate();
        let data = b"refs/heads/master";
        let sealed = seal(&key, data);
        assert_ne!(&sealed, data);
        assert_eq!(open(&key, &sealed).unwrap(), data);
    }

    #[test]
    fn open_rejects_tampered_payload() {
        let key = RepoKey::generate();
        let mut sealed = seal(&key, b"some payload");
        sealed[0] ^= 0x01;
        assert!(open(&key, &sealed).is_err());
    }

    #[test]
    fn open_rejects_foreign_key() {
        let sealed = seal(&RepoKey::generate(), b"some payload");
        assert!(open(&RepoKey::generate(), &sealed).is_err());
    }

    #[test]
    fn seal_empty_payload_is_just_the_digest() {
        let key = RepoKey::generate();
        let sealed = seal(&key, b"");
        assert_eq!(open(&key, &sealed).unwrap(), b"");
    }
}

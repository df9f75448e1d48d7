use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};

use super::RepoKey;
use crate::error::{IncryptError, Result};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

const BLOCK: usize = 16;

/// Encrypt with AES-256-CBC and PKCS#7 padding.
///
/// The IV comes out of the repository key and never varies, so identical
/// plaintext encrypts to identical ciphertext. Incremental pushes and
/// stable wrapper ids depend on this.
pub fn encrypt(key: &RepoKey, plaintext: &[u8]) -> Vec<u8> {
    Aes256CbcEnc::new(key.aes_key().into(), key.iv().into())
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext)
}

/// Decrypt data produced by [`encrypt`].
pub fn decrypt(key: &RepoKey, data: &[u8]) -> Result<Vec<u8>> {
    if data.is_empty() || data.len() % BLOCK != 0 {
        return Err(IncryptError::CorruptCipher("ciphertext length not a block multiple"));
    }
    Aes256CbcDec::new(key.aes_key().into(), key.iv().into())
        .decrypt_padded_vec_mut::<Pkcs7>(data)
        .map_err(|_| IncryptError::CorruptCipher("bad PKCS#7 padding"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> RepoKey {
        RepoKey::from_bytes(&[0x42u8; 48]).unwrap()
    }

    #[test]
    fn roundtrip() {
        let key = test_key();
        let plaintext = b"tree walk payload";
        let ciphertext = encrypt(&key, plaintext);
        assert_eq!(ciphertext.len() % BLOCK, 0);
        assert_eq!(decrypt(&key, &ciphertext).unwrap(), plaintext);
    }

    #[test]
    fn roundtrip_empty() {
        let key = test_key();
        let ciphertext = encrypt(&key, b"");
        // PKCS#7 always emits at least one block.
        assert_eq!(ciphertext.len(), BLOCK);
        assert_eq!(decrypt(&key, &ciphertext).unwrap(), b"");
    }

    #[test]
    fn roundtrip_block_sized_input() {
        let key = test_key();
        let plaintext = [0xAB; BLOCK * 3];
        let ciphertext = encrypt(&key, &plaintext);
        assert_eq!(ciphertext.len(), BLOCK * 4);
        assert_eq!(decrypt(&key, &ciphertext).unwrap(), plaintext);
    }

    #[test]
    fn encryption_is_deterministic() {
        let key = test_key();
        assert_eq!(encrypt(&key, b"same bytes"), encrypt(&key, b"same bytes"));
    }

    #[test]
    fn decrypt_rejects_partial_block() {
        let key = test_key();
        let mut ciphertext = encrypt(&key, b"payload");
        ciphertext.truncate(BLOCK - 1);
        assert!(matches!(
            decrypt(&key, &ciphertext),
            Err(IncryptError::CorruptCipher(_))
        ));
    }

    #[test]
    fn decrypt_rejects_empty_input() {
        assert!(decrypt(&test_key(), b"").is_err());
    }

    #[test]
    fn decrypt_rejects_garbage_padding() {
        let key = test_key();
        // Random-looking block will (overwhelmingly) not decrypt to valid padding.
        let bogus = [0x5Au8; BLOCK];
        assert!(decrypt(&key, &bogus).is_err());
    }
}

//! Wrapped-object codec.
//!
//! Each cleartext object travels as one encrypted blob whose plaintext is
//! `clear_id(20) ‖ type_byte(1) ‖ raw_body`. The embedded id doubles as the
//! integrity check: a decrypted object must hash back to it.

use git2::{ObjectType, Oid, Repository};

use crate::crypto::{self, RepoKey};
use crate::error::{IncryptError, Result};

/// Git's on-disk object-type numbering.
fn type_to_byte(kind: ObjectType) -> Result<u8> {
    match kind {
        ObjectType::Commit => Ok(1),
        ObjectType::Tree => Ok(2),
        ObjectType::Blob => Ok(3),
        ObjectType::Tag => Ok(4),
        _ => Err(IncryptError::CorruptCipher("unwrappable object type")),
    }
}

fn type_from_byte(byte: u8) -> Result<ObjectType> {
    match byte {
        1 => Ok(ObjectType::Commit),
        2 => Ok(ObjectType::Tree),
        3 => Ok(ObjectType::Blob),
        4 => Ok(ObjectType::Tag),
        _ => Err(IncryptError::CorruptCipher("unknown object type byte")),
    }
}

/// Read `id` from the cleartext repository and produce its wrapped
/// ciphertext.
pub fn wrap_object(key: &RepoKey, cr: &Repository, id: Oid) -> Result<Vec<u8>> {
    let odb = cr.odb()?;
    let object = odb.read(id)?;
    let body = object.data();
    let mut plain = Vec::with_capacity(21 + body.len());
    plain.extend_from_slice(id.as_bytes());
    plain.push(type_to_byte(object.kind())?);
    plain.extend_from_slice(body);
    Ok(crypto::aes_cbc::encrypt(key, &plain))
}

/// Decrypt a wrapped blob and write the recovered object into the cleartext
/// repository, verifying it hashes back to the embedded id. Returns the id
/// and type of the recovered object.
pub fn unwrap_object(key: &RepoKey, cr: &Repository, data: &[u8]) -> Result<(Oid, ObjectType)> {
    let plain = crypto::aes_cbc::decrypt(key, data)?;
    if plain.len() < 21 {
        return Err(IncryptError::CorruptCipher("wrapped object too short"));
    }
    let clear_id = Oid::from_bytes(&plain[..20])?;
    let kind = type_from_byte(plain[20])?;
    let body = &plain[21..];

    let written = cr.odb()?.write(kind, body)?;
    if written != clear_id {
        return Err(IncryptError::CorruptCipher("recovered object id mismatch"));
    }
    Ok((clear_id, kind))
}

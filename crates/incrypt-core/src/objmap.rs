//! The cleartext↔ciphertext object map.
//!
//! One fixed-width record per encrypted commit or tag:
//! `clear_id(20) ‖ crypt_id(20)`. The persisted payload only ever grows;
//! records whose target object has vanished (history rewrites, manual
//! surgery on the remote) are filtered out on read, never deleted.

use std::collections::{BTreeMap, HashMap};

use git2::{Oid, Repository};

use crate::error::{IncryptError, Result};

const RECORD_LEN: usize = 40;

#[derive(Debug, Default, Clone)]
pub struct ObjectMap {
    records: BTreeMap<Oid, Oid>,
}

impl ObjectMap {
    /// Decode the decrypted map payload (the bytes after the digest prefix).
    pub fn decode(payload: &[u8]) -> Result<Self> {
        if payload.len() % RECORD_LEN != 0 {
            return Err(IncryptError::CorruptMetadata(format!(
                "map payload length {} is not a multiple of {RECORD_LEN}",
                payload.len()
            )));
        }
        let mut records = BTreeMap::new();
        for record in payload.chunks_exact(RECORD_LEN) {
            let clear = Oid::from_bytes(&record[..20])?;
            let crypt = Oid::from_bytes(&record[20..])?;
            records.insert(clear, crypt);
        }
        Ok(Self { records })
    }

    /// Encode every known record. `BTreeMap` ordering keeps the payload
    /// deterministic for a given record set.
    pub fn encode(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(self.records.len() * RECORD_LEN);
        for (clear, crypt) in &self.records {
            payload.extend_from_slice(clear.as_bytes());
            payload.extend_from_slice(crypt.as_bytes());
        }
        payload
    }

    pub fn insert(&mut self, clear: Oid, crypt: Oid) {
        self.records.insert(clear, crypt);
    }

    pub fn get(&self, clear: Oid) -> Option<Oid> {
        self.records.get(&clear).copied()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// `clear → crypt`, restricted to records whose wrapper still exists in
    /// the encrypted repository.
    pub fn forward(&self, er: &Repository) -> Result<HashMap<Oid, Oid>> {
        let odb = er.odb()?;
        Ok(self
            .records
            .iter()
            .filter(|(_, crypt)| odb.exists(**crypt))
            .map(|(c, e)| (*c, *e))
            .collect())
    }

    /// `crypt → clear`, restricted to records whose cleartext object still
    /// exists in the cleartext repository.
    pub fn reverse(&self, cr: &Repository) -> Result<HashMap<Oid, Oid>> {
        let odb = cr.odb()?;
        Ok(self
            .records
            .iter()
            .filter(|(clear, _)| odb.exists(**clear))
            .map(|(c, e)| (*e, *c))
            .collect())
    }
}

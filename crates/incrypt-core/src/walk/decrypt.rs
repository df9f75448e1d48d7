//! The decryption walk: managed ER refs in, cleartext objects and tips out.
//!
//! Discovery recurses through wrapper parents, stopping at wrappers the
//! reverse map already resolves to objects present in the CR. Payload trees
//! are self-contained, so the wrappers themselves decrypt in any order.

use std::collections::{HashMap, HashSet};

use git2::{ObjectType, Oid, Repository};

use crate::crypto::RepoKey;
use crate::error::{IncryptError, Result};
use crate::objmap::ObjectMap;
use crate::refname;
use crate::wrap;

pub struct Decryptor<'a> {
    cr: &'a Repository,
    er: &'a Repository,
    key: &'a RepoKey,
    /// `wrapper → clear`, restricted to cleartext present in the CR.
    rmap: HashMap<Oid, Oid>,
}

impl<'a> Decryptor<'a> {
    pub fn new(
        cr: &'a Repository,
        er: &'a Repository,
        key: &'a RepoKey,
        map: &ObjectMap,
    ) -> Result<Self> {
        Ok(Self {
            cr,
            er,
            key,
            rmap: map.reverse(cr)?,
        })
    }

    /// Decrypt everything new behind the managed references and return the
    /// cleartext `(refname, tip)` pairs. Foreign references (including the
    /// metadata branch) are skipped, never errors.
    pub fn fetch_refs(&mut self) -> Result<Vec<(String, Oid)>> {
        let mut managed: Vec<(String, Oid)> = Vec::new();
        for reference in self.er.references_glob("refs/heads/*")? {
            let reference = reference?;
            let Some(name) = reference.name() else {
                continue;
            };
            let Some(clear) = refname::decrypt(self.key, name) else {
                tracing::debug!(name, "skipping unmanaged reference");
                continue;
            };
            let Some(wrapper) = reference.target() else {
                continue;
            };
            managed.push((clear, wrapper));
        }

        let wrappers = self.discover(managed.iter().map(|(_, w)| *w))?;
        let new = wrappers.len();
        for wrapper in wrappers {
            let clear = self.decrypt_wrapper(wrapper)?;
            self.rmap.insert(wrapper, clear);
        }
        tracing::info!(refs = managed.len(), new, "decryption walk complete");

        managed
            .into_iter()
            .map(|(name, wrapper)| {
                let clear = self.rmap.get(&wrapper).copied().ok_or_else(|| {
                    IncryptError::CorruptMetadata(format!(
                        "wrapper {wrapper} produced no cleartext object"
                    ))
                })?;
                Ok((name, clear))
            })
            .collect()
    }

    /// Wrappers reachable from `tips` whose cleartext the CR does not have.
    fn discover(&self, tips: impl Iterator<Item = Oid>) -> Result<Vec<Oid>> {
        let mut stack: Vec<Oid> = tips.collect();
        let mut seen: HashSet<Oid> = HashSet::new();
        let mut wrappers = Vec::new();

        while let Some(wrapper) = stack.pop() {
            if !seen.insert(wrapper) || self.rmap.contains_key(&wrapper) {
                continue;
            }
            let commit = self.er.find_commit(wrapper)?;
            stack.extend(commit.parent_ids());
            wrappers.push(wrapper);
        }
        Ok(wrappers)
    }

    /// Decrypt one wrapper's payload entries into the CR object database and
    /// return the cleartext commit/tag id it represents.
    fn decrypt_wrapper(&self, wrapper: Oid) -> Result<Oid> {
        let tree = self.er.find_commit(wrapper)?.tree()?;
        let mut root = None;
        for entry in tree.iter() {
            let blob = self.er.find_blob(entry.id())?;
            let (clear_id, kind) = wrap::unwrap_object(self.key, self.cr, blob.content())?;
            if matches!(kind, ObjectType::Commit | ObjectType::Tag) {
                root = Some(clear_id);
            }
        }
        root.ok_or(IncryptError::CorruptCipher(
            "payload tree holds no commit or tag record",
        ))
    }
}

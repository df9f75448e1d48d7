//! The metadata record: a single commit on `refs/heads/_` whose tree holds
//! the version marker, the escrowed key, the encrypted template, the
//! encrypted default branch, the object map, and a README for people who
//! stumble into the encrypted mirror.

use git2::{ObjectType, Oid, Repository};

use crate::crypto::{self, keywrap::KeyTool, RepoKey, KEY_FORMAT};
use crate::error::{IncryptError, Result};
use crate::objmap::ObjectMap;

/// The metadata reference. Deliberately a name no refname token can collide
/// with: `_` is not valid base64 in the token alphabet.
pub const META_REF: &str = "refs/heads/_";

/// Version marker, checked bit-exactly on read.
pub const VERSION: &[u8] = b"git-incrypt\n1.0.0\n";

const README: &str = "\
# git-incrypt

This is an encrypted mirror managed by git-incrypt. Branch names and every
object reachable from them are ciphertext; there is nothing useful to read
or edit here directly.

To work with the cleartext history, add this repository as a remote with the
`incrypt::` prefix and hold a key the repository was escrowed to:

    git remote add origin incrypt::<url-of-this-repository>
";

pub struct MetaData {
    pub key: RepoKey,
    pub template: String,
    pub default_branch: String,
    /// The full `key` blob (format tag, NUL, wrapped key), carried through
    /// verbatim on every write so pushes never re-wrap.
    key_blob: Vec<u8>,
}

impl MetaData {
    /// Create the record for a fresh encrypted repository: generate the key,
    /// escrow it to every recipient, write the record with an empty map.
    pub fn init(
        er: &Repository,
        recipients: &[String],
        template: String,
        default_branch: String,
        keytool: &KeyTool,
    ) -> Result<Self> {
        let key = RepoKey::generate();
        let wrapped = keytool.wrap(key.as_bytes(), recipients)?;

        let mut key_blob = Vec::with_capacity(KEY_FORMAT.len() + 1 + wrapped.len());
        key_blob.extend_from_slice(KEY_FORMAT);
        key_blob.push(0);
        key_blob.extend_from_slice(&wrapped);

        let meta = Self {
            key,
            template,
            default_branch,
            key_blob,
        };
        meta.write(er, &ObjectMap::default())?;
        tracing::info!(recipients = recipients.len(), "metadata record created");
        Ok(meta)
    }

    /// Load and validate the record, unwrapping the key through the external
    /// tool. Every consistency failure is fatal.
    pub fn read(er: &Repository, keytool: &KeyTool) -> Result<Self> {
        let tree = meta_tree(er)?;

        let version = read_blob(er, &tree, "ver")?;
        if version != VERSION {
            return Err(IncryptError::CorruptMetadata(format!(
                "unsupported version marker {:?}",
                String::from_utf8_lossy(&version)
            )));
        }

        let key_blob = read_blob(er, &tree, "key")?;
        let nul = key_blob
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| IncryptError::CorruptMetadata("key blob has no format tag".into()))?;
        if &key_blob[..nul] != KEY_FORMAT {
            return Err(IncryptError::CorruptMetadata(format!(
                "unknown key format {:?}",
                String::from_utf8_lossy(&key_blob[..nul])
            )));
        }
        let raw = keytool.unwrap(&key_blob[nul + 1..])?;
        let key = RepoKey::from_bytes(&raw)?;

        let template = read_sealed_text(&key, er, &tree, "msg")?;
        let default_branch = read_sealed_text(&key, er, &tree, "def")?;

        Ok(Self {
            key,
            template,
            default_branch,
            key_blob,
        })
    }

    /// Write the record (with `map` as the current object map) and
    /// force-update the metadata reference. The commit has no parents; the
    /// old record becomes unreferenced.
    pub fn write(&self, er: &Repository, map: &ObjectMap) -> Result<Oid> {
        let mut tree = er.treebuilder(None)?;
        let mode = 0o100644;
        tree.insert("ver", er.blob(VERSION)?, mode)?;
        tree.insert("key", er.blob(&self.key_blob)?, mode)?;
        tree.insert("msg", er.blob(&crypto::seal(&self.key, self.template.as_bytes()))?, mode)?;
        tree.insert(
            "def",
            er.blob(&crypto::seal(&self.key, self.default_branch.as_bytes()))?,
            mode,
        )?;
        tree.insert("map", er.blob(&crypto::seal(&self.key, &map.encode()))?, mode)?;
        tree.insert("README.md", er.blob(README.as_bytes())?, mode)?;
        let tree_id = tree.write()?;

        let mut buf = format!("tree {tree_id}\n").into_bytes();
        buf.extend_from_slice(self.template.as_bytes());
        let commit = er.odb()?.write(ObjectType::Commit, &buf)?;

        er.reference(META_REF, commit, true, "incrypt: metadata")?;
        tracing::debug!(%commit, entries = map.len(), "metadata record written");
        Ok(commit)
    }

    /// Decode the persisted object map.
    pub fn read_map(&self, er: &Repository) -> Result<ObjectMap> {
        let tree = meta_tree(er)?;
        let sealed = read_blob(er, &tree, "map")?;
        let payload = crypto::open(&self.key, &sealed)?;
        ObjectMap::decode(&payload)
    }
}

fn meta_tree(er: &Repository) -> Result<git2::Tree<'_>> {
    let reference = er.find_reference(META_REF).map_err(|_| {
        IncryptError::CorruptMetadata(format!("missing metadata reference {META_REF}"))
    })?;
    let commit = reference
        .peel_to_commit()
        .map_err(|_| IncryptError::CorruptMetadata("metadata reference is not a commit".into()))?;
    Ok(commit.tree()?)
}

fn read_blob(er: &Repository, tree: &git2::Tree<'_>, name: &str) -> Result<Vec<u8>> {
    let entry = tree
        .get_name(name)
        .ok_or_else(|| IncryptError::CorruptMetadata(format!("metadata entry '{name}' missing")))?;
    Ok(er.find_blob(entry.id())?.content().to_vec())
}

fn read_sealed_text(
    key: &RepoKey,
    er: &Repository,
    tree: &git2::Tree<'_>,
    name: &str,
) -> Result<String> {
    let data = crypto::open(key, &read_blob(er, tree, name)?)?;
    String::from_utf8(data)
        .map_err(|_| IncryptError::CorruptMetadata(format!("metadata entry '{name}' is not UTF-8")))
}

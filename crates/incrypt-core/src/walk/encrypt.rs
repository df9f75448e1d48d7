//! The encryption walk: cleartext tips in, wrapper commits out.
//!
//! Phase 1 discovers every commit/tag not yet covered by the object map and
//! records the dependency graph. Phase 2 drains the graph in topological
//! order, building one self-contained payload tree per node: the post-order
//! of the cleartext tree walk, then the root record itself. Wrapper
//! parentage mirrors cleartext parentage through the map.

use std::collections::{HashMap, VecDeque};

use git2::{ObjectType, Oid, Repository, TreeBuilder};

use super::{Graph, NodeKind};
use crate::crypto::RepoKey;
use crate::error::{IncryptError, Result};
use crate::objmap::ObjectMap;
use crate::wrap;

pub struct Encryptor<'a> {
    cr: &'a Repository,
    er: &'a Repository,
    key: &'a RepoKey,
    template: &'a str,
    map: &'a mut ObjectMap,
    /// Live view of the map: entries whose wrapper exists in the ER, plus
    /// everything produced this push.
    live: HashMap<Oid, Oid>,
    /// Per-push cache of wrapped tree/blob records, so content shared
    /// between commits in one push is encrypted once. Rebuilt every push.
    cryptcache: HashMap<Oid, Oid>,
}

enum Visit {
    Descend(Oid),
    Emit(Oid),
}

impl<'a> Encryptor<'a> {
    pub fn new(
        cr: &'a Repository,
        er: &'a Repository,
        key: &'a RepoKey,
        template: &'a str,
        map: &'a mut ObjectMap,
    ) -> Result<Self> {
        let live = map.forward(er)?;
        Ok(Self {
            cr,
            er,
            key,
            template,
            map,
            live,
            cryptcache: HashMap::new(),
        })
    }

    /// The wrapper commit for a cleartext commit or tag, if one exists.
    pub fn wrapper_of(&self, clear: Oid) -> Option<Oid> {
        self.live.get(&clear).copied()
    }

    /// Encrypt everything reachable from `tips` that the map does not
    /// already cover. On return the map holds an entry for every tip.
    pub fn encrypt(&mut self, tips: &[Oid]) -> Result<()> {
        let mut graph = self.discover(tips)?;
        let total = graph.len();

        while let Some(slot) = graph.pop_ready() {
            let node = graph.node(slot);
            let (id, kind) = (node.id, node.kind);
            let wrapper = match kind {
                NodeKind::Commit => self.encrypt_commit(id)?,
                NodeKind::Tag => self.encrypt_tag(id, node.deps[0])?,
            };
            self.live.insert(id, wrapper);
            self.map.insert(id, wrapper);
            graph.mark_processed(slot);
        }
        graph.check_drained()?;

        tracing::info!(new = total, "encryption walk complete");
        Ok(())
    }

    /// Phase 1: breadth-first discovery of uncovered commits and tags.
    fn discover(&self, tips: &[Oid]) -> Result<Graph> {
        let mut graph = Graph::default();
        let mut found: VecDeque<Oid> = tips
            .iter()
            .copied()
            .filter(|tip| !self.live.contains_key(tip))
            .collect();

        while let Some(id) = found.pop_front() {
            if graph.contains(id) {
                continue;
            }
            let kind = self.cr.odb()?.read(id)?.kind();
            let (node_kind, deps) = match kind {
                ObjectType::Commit => {
                    let commit = self.cr.find_commit(id)?;
                    (NodeKind::Commit, commit.parent_ids().collect::<Vec<_>>())
                }
                ObjectType::Tag => {
                    let tag = self.cr.find_tag(id)?;
                    match tag.target_type() {
                        Some(ObjectType::Commit) | Some(ObjectType::Tag) => {}
                        other => return Err(IncryptError::unexpected_type(tag.target_id(), other)),
                    }
                    (NodeKind::Tag, vec![tag.target_id()])
                }
                other => return Err(IncryptError::unexpected_type(id, Some(other))),
            };
            for dep in &deps {
                if !self.live.contains_key(dep) && !graph.contains(*dep) {
                    found.push_back(*dep);
                }
            }
            graph.add(id, node_kind, deps);
        }
        graph.seal();
        Ok(graph)
    }

    /// Phase 2, one commit: payload tree of the full cleartext tree walk
    /// plus the commit record, then the wrapper commit around it.
    fn encrypt_commit(&mut self, id: Oid) -> Result<Oid> {
        let commit = self.cr.find_commit(id)?;
        let tree_id = commit.tree_id();
        let parents: Vec<Oid> = commit.parent_ids().collect();
        drop(commit);

        let mut payload = self.er.treebuilder(None)?;
        self.wrap_tree_into(&mut payload, tree_id)?;
        self.insert_record(&mut payload, id)?;
        let payload_id = payload.write()?;

        self.write_wrapper(payload_id, &parents)
    }

    /// One tag: the payload carries only the tag record; the wrapper's
    /// single parent is the wrapper of the tag target.
    fn encrypt_tag(&mut self, id: Oid, target: Oid) -> Result<Oid> {
        let mut payload = self.er.treebuilder(None)?;
        self.insert_record(&mut payload, id)?;
        let payload_id = payload.write()?;

        self.write_wrapper(payload_id, &[target])
    }

    fn write_wrapper(&mut self, payload_tree: Oid, clear_parents: &[Oid]) -> Result<Oid> {
        let mut buf = format!("tree {payload_tree}\n").into_bytes();
        for parent in clear_parents {
            let wrapper = self.live.get(parent).ok_or_else(|| {
                IncryptError::CorruptMetadata(format!("no wrapper recorded for parent {parent}"))
            })?;
            buf.extend_from_slice(format!("parent {wrapper}\n").as_bytes());
        }
        buf.extend_from_slice(self.template.as_bytes());
        Ok(self.er.odb()?.write(ObjectType::Commit, &buf)?)
    }

    /// Walk the cleartext tree in post-order with an explicit stack (deep
    /// trees must not recurse) and add one wrapped entry per object: blobs
    /// and sub-trees as encountered, each tree after its children.
    fn wrap_tree_into(&mut self, payload: &mut TreeBuilder<'_>, root: Oid) -> Result<()> {
        let mut stack = vec![Visit::Descend(root)];
        while let Some(step) = stack.pop() {
            match step {
                Visit::Descend(tree_id) => {
                    stack.push(Visit::Emit(tree_id));
                    let tree = self.cr.find_tree(tree_id)?;
                    let entries: Vec<(Oid, Option<ObjectType>)> =
                        tree.iter().map(|e| (e.id(), e.kind())).collect();
                    for (entry_id, kind) in entries.into_iter().rev() {
                        match kind {
                            Some(ObjectType::Tree) => stack.push(Visit::Descend(entry_id)),
                            Some(ObjectType::Blob) => stack.push(Visit::Emit(entry_id)),
                            // Gitlinks point outside this repository; the
                            // tree bytes already carry the pointer.
                            Some(ObjectType::Commit) => {}
                            other => {
                                return Err(IncryptError::unexpected_type(entry_id, other));
                            }
                        }
                    }
                }
                Visit::Emit(id) => self.insert_record(payload, id)?,
            }
        }
        Ok(())
    }

    /// Wrap one object (through the per-push cache) and append it to the
    /// payload under the next numeric name.
    fn insert_record(&mut self, payload: &mut TreeBuilder<'_>, id: Oid) -> Result<()> {
        let wrapped = match self.cryptcache.get(&id) {
            Some(blob) => *blob,
            None => {
                let ciphertext = wrap::wrap_object(self.key, self.cr, id)?;
                let blob = self.er.blob(&ciphertext)?;
                self.cryptcache.insert(id, blob);
                blob
            }
        };
        let name = payload.len().to_string();
        payload.insert(&name, wrapped, 0o100644)?;
        Ok(())
    }
}

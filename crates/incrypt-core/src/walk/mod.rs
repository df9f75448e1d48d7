//! Shared state for the object-graph walks.
//!
//! Discovery produces a dependency graph over commits and tags. Nodes live
//! in an index arena (parents and children reference each other by slot, so
//! there is no cyclic ownership), and each node is in exactly one stage:
//! discovered-but-blocked (`Pending`), safe to process (`Ready`), or done
//! (`Processed`). Objects already covered by the persisted map never enter
//! the graph at all.

pub mod decrypt;
pub mod encrypt;

use std::collections::HashMap;

use git2::Oid;

use crate::error::{IncryptError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NodeKind {
    Commit,
    Tag,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Pending,
    Ready,
    Processed,
}

pub(crate) struct Node {
    pub id: Oid,
    pub kind: NodeKind,
    /// Cleartext parent commits, or the tag target. Includes deps satisfied
    /// by the persisted map; only in-graph deps gate readiness.
    pub deps: Vec<Oid>,
    children: Vec<usize>,
    unready: usize,
    stage: Stage,
}

#[derive(Default)]
pub(crate) struct Graph {
    nodes: Vec<Node>,
    slots: HashMap<Oid, usize>,
    ready: Vec<usize>,
    processed: usize,
}

impl Graph {
    pub fn contains(&self, id: Oid) -> bool {
        self.slots.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn node(&self, slot: usize) -> &Node {
        &self.nodes[slot]
    }

    /// Register a discovered node. Caller guarantees `id` is new.
    pub fn add(&mut self, id: Oid, kind: NodeKind, deps: Vec<Oid>) {
        let slot = self.nodes.len();
        self.nodes.push(Node {
            id,
            kind,
            deps,
            children: Vec::new(),
            unready: 0,
            stage: Stage::Pending,
        });
        self.slots.insert(id, slot);
    }

    /// After discovery: wire up the child adjacency and seed the ready set.
    /// Deps absent from the graph were satisfied before the walk started.
    pub fn seal(&mut self) {
        for slot in 0..self.nodes.len() {
            let deps = self.nodes[slot].deps.clone();
            for dep in deps {
                if let Some(&dep_slot) = self.slots.get(&dep) {
                    self.nodes[dep_slot].children.push(slot);
                    self.nodes[slot].unready += 1;
                }
            }
        }
        for (slot, node) in self.nodes.iter_mut().enumerate() {
            if node.unready == 0 {
                node.stage = Stage::Ready;
                self.ready.push(slot);
            }
        }
    }

    pub fn pop_ready(&mut self) -> Option<usize> {
        self.ready.pop()
    }

    /// Mark a node processed and promote any children this completes.
    pub fn mark_processed(&mut self, slot: usize) {
        debug_assert_eq!(self.nodes[slot].stage, Stage::Ready);
        self.nodes[slot].stage = Stage::Processed;
        self.processed += 1;
        let children = self.nodes[slot].children.clone();
        for child in children {
            let node = &mut self.nodes[child];
            node.unready -= 1;
            if node.unready == 0 && node.stage == Stage::Pending {
                node.stage = Stage::Ready;
                self.ready.push(child);
            }
        }
    }

    /// Every discovered node must end up processed; anything left pending
    /// means the dependency graph had a hole or a cycle.
    pub fn check_drained(&self) -> Result<()> {
        let pending = self.nodes.len() - self.processed;
        if pending > 0 {
            return Err(IncryptError::IncompleteGraph(pending));
        }
        Ok(())
    }
}

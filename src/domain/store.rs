//! Arena-backed hierarchy store with a code index.
//!
//! The arena owns every node; each node is referenced by exactly one parent
//! through its `children` list, so the arena plus the child lists form the
//! owned tree. The code index maps trimmed codes to arena slots.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};
use generational_arena::{Arena, Index};
use serde::{Deserialize, Serialize};
use termtree::Tree;
use tracing::{debug, instrument};

use crate::domain::entities::{DutyRates, Footnote, HierarchyRecord};
use crate::domain::error::DomainError;

/// Format tag written into every persisted store.
pub const STORE_FORMAT: &str = "hstree-store";
/// Bumped whenever the persisted layout changes.
pub const STORE_VERSION: u32 = 1;

/// One entry of the nomenclature tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HierarchyNode {
    pub code: String,
    pub description: String,
    /// Indentation level from the source; -1 for the synthetic root
    pub depth: i64,
    pub is_group_heading: bool,
    /// Unit(s) of quantity
    pub units: Vec<String>,
    pub duty_rates: DutyRates,
    pub footnotes: Vec<Footnote>,
    /// Descriptions of all ancestors, outermost first (display only)
    pub ancestor_path: Vec<String>,
    pub parent: Option<Index>,
    pub children: Vec<Index>,
}

impl HierarchyNode {
    fn root() -> Self {
        Self {
            code: String::new(),
            description: String::new(),
            depth: -1,
            is_group_heading: true,
            units: Vec::new(),
            duty_rates: DutyRates::default(),
            footnotes: Vec::new(),
            ancestor_path: Vec::new(),
            parent: None,
            children: Vec::new(),
        }
    }

    pub(crate) fn from_record(record: &HierarchyRecord, ancestor_path: Vec<String>) -> Self {
        Self {
            code: record.code.clone(),
            description: record.description.clone(),
            depth: record.depth,
            is_group_heading: record.is_group_heading,
            units: record.units.clone(),
            duty_rates: record.duty_rates(),
            footnotes: record.footnotes.clone(),
            ancestor_path,
            parent: None,
            children: Vec::new(),
        }
    }

    /// Ancestor descriptions followed by this node's own description.
    pub fn full_path(&self) -> Vec<String> {
        let mut path = self.ancestor_path.clone();
        path.push(self.description.clone());
        path
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    fn label(&self) -> String {
        match self.code.trim() {
            "" => self.description.clone(),
            code => format!("{}  {}", code, self.description),
        }
    }
}

impl fmt::Display for HierarchyNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// Summary figures for a built store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    /// All nodes including the synthetic root
    pub total_nodes: usize,
    pub indexed_codes: usize,
    /// Longest root-to-leaf edge count
    pub max_depth: usize,
    /// Two-digit codes directly below the root
    pub chapters: usize,
    pub built_at: DateTime<Utc>,
}

/// Read-only nomenclature tree plus code index.
#[derive(Debug)]
pub struct HierarchyStore {
    arena: Arena<HierarchyNode>,
    root: Index,
    index: HashMap<String, Index>,
    built_at: DateTime<Utc>,
}

impl HierarchyStore {
    /// A store holding only the synthetic root.
    pub(crate) fn empty() -> Self {
        let mut arena = Arena::new();
        let root = arena.insert(HierarchyNode::root());
        Self {
            arena,
            root,
            index: HashMap::new(),
            built_at: Utc::now(),
        }
    }

    /// Insert `node` as the last child of `parent`.
    pub(crate) fn attach(&mut self, parent: Index, mut node: HierarchyNode) -> Index {
        node.parent = Some(parent);
        let idx = self.arena.insert(node);
        if let Some(parent) = self.arena.get_mut(parent) {
            parent.children.push(idx);
        }
        idx
    }

    /// Index `idx` under `code`; returns the slot previously indexed there.
    pub(crate) fn register(&mut self, code: String, idx: Index) -> Option<Index> {
        self.index.insert(code, idx)
    }

    /// Ancestor path a new child of `parent` inherits.
    pub(crate) fn child_ancestor_path(&self, parent: Index) -> Vec<String> {
        match self.arena.get(parent) {
            Some(node) => {
                let mut path = node.ancestor_path.clone();
                if !node.description.is_empty() {
                    path.push(node.description.clone());
                }
                path
            }
            None => Vec::new(),
        }
    }

    pub fn root_index(&self) -> Index {
        self.root
    }

    pub fn root(&self) -> &HierarchyNode {
        &self.arena[self.root]
    }

    pub fn node(&self, idx: Index) -> Option<&HierarchyNode> {
        self.arena.get(idx)
    }

    /// O(1) lookup by code. Surrounding whitespace is ignored.
    pub fn lookup(&self, code: &str) -> Option<&HierarchyNode> {
        self.index
            .get(code.trim())
            .and_then(|&idx| self.arena.get(idx))
    }

    pub fn contains(&self, code: &str) -> bool {
        self.index.contains_key(code.trim())
    }

    /// All indexed codes, unordered.
    pub fn codes(&self) -> impl Iterator<Item = &str> {
        self.index.keys().map(String::as_str)
    }

    /// Number of indexed codes.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Number of nodes in the tree, root included.
    pub fn node_count(&self) -> usize {
        self.arena.len()
    }

    pub fn children(&self, idx: Index) -> impl Iterator<Item = &HierarchyNode> {
        self.arena
            .get(idx)
            .into_iter()
            .flat_map(|node| node.children.iter())
            .filter_map(|&child| self.arena.get(child))
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    /// Human readable classification path of `code`.
    ///
    /// Empty for an empty code, `"Code: <code>"` for codes outside the index.
    pub fn display_path(&self, code: &str, separator: &str) -> String {
        if code.trim().is_empty() {
            return String::new();
        }
        match self.lookup(code) {
            Some(node) => node.full_path().join(separator),
            None => format!("Code: {}", code),
        }
    }

    /// Pre-order walk of the whole tree, root first.
    pub fn iter_preorder(&self) -> PreOrder<'_> {
        PreOrder {
            store: self,
            stack: vec![self.root],
        }
    }

    #[instrument(level = "debug", skip(self))]
    pub fn max_depth(&self) -> usize {
        let mut max_depth = 0;
        let mut stack = vec![(self.root, 0usize)];
        while let Some((idx, depth)) = stack.pop() {
            max_depth = max_depth.max(depth);
            if let Some(node) = self.arena.get(idx) {
                for &child in &node.children {
                    stack.push((child, depth + 1));
                }
            }
        }
        max_depth
    }

    pub fn stats(&self) -> StoreStats {
        let chapters = self
            .children(self.root)
            .filter(|node| node.code.trim().len() == 2)
            .count();
        StoreStats {
            total_nodes: self.node_count(),
            indexed_codes: self.len(),
            max_depth: self.max_depth(),
            chapters,
            built_at: self.built_at,
        }
    }

    /// Render the owned tree below `code` (root when `None`), `levels` deep.
    pub fn render_subtree(&self, code: Option<&str>, levels: usize) -> Option<Tree<String>> {
        let start = match code {
            Some(code) => *self.index.get(code.trim())?,
            None => self.root,
        };
        let node = self.arena.get(start)?;
        let label = if start == self.root {
            "HS nomenclature".to_string()
        } else {
            node.label()
        };
        let mut tree = Tree::new(label);
        self.render_children(start, levels, &mut tree);
        Some(tree)
    }

    fn render_children(&self, idx: Index, levels: usize, parent: &mut Tree<String>) {
        if levels == 0 {
            return;
        }
        for &child_idx in self.arena.get(idx).map(|n| n.children.as_slice()).unwrap_or(&[]) {
            if let Some(child) = self.arena.get(child_idx) {
                let mut child_tree = Tree::new(child.label());
                self.render_children(child_idx, levels - 1, &mut child_tree);
                parent.push(child_tree);
            }
        }
    }

    /// Serialize the whole store (tree shape and index) as a versioned document.
    #[instrument(level = "debug", skip(self))]
    pub fn to_bytes(&self) -> Result<Vec<u8>, DomainError> {
        let mut positions: HashMap<Index, usize> = HashMap::with_capacity(self.arena.len());
        let mut nodes = Vec::with_capacity(self.arena.len());

        for (idx, node) in self.iter_preorder() {
            positions.insert(idx, nodes.len());
            nodes.push(PersistedNode {
                parent: node.parent.and_then(|p| positions.get(&p).copied()),
                code: node.code.clone(),
                description: node.description.clone(),
                depth: node.depth,
                is_group_heading: node.is_group_heading,
                units: node.units.clone(),
                duty_rates: node.duty_rates.clone(),
                footnotes: node.footnotes.clone(),
                ancestor_path: node.ancestor_path.clone(),
            });
        }

        let mut index = BTreeMap::new();
        for (code, idx) in &self.index {
            let position = positions.get(idx).copied().ok_or_else(|| {
                DomainError::corrupt_store(format!("index entry {code} points outside the tree"))
            })?;
            index.insert(code.clone(), position);
        }

        let document = PersistedStore {
            format: STORE_FORMAT.to_string(),
            version: STORE_VERSION,
            built_at: self.built_at,
            nodes,
            index,
        };
        serde_json::to_vec(&document)
            .map_err(|e| DomainError::corrupt_store(format!("serialize store: {e}")))
    }

    /// Restore a store written by [`HierarchyStore::to_bytes`].
    #[instrument(level = "debug", skip(bytes), fields(len = bytes.len()))]
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DomainError> {
        let header: PersistedHeader = serde_json::from_slice(bytes)
            .map_err(|e| DomainError::corrupt_store(format!("unreadable store: {e}")))?;
        if header.format != STORE_FORMAT {
            return Err(DomainError::corrupt_store(format!(
                "unexpected format tag {:?}",
                header.format
            )));
        }
        if header.version != STORE_VERSION {
            return Err(DomainError::corrupt_store(format!(
                "store version {} is not supported (expected {})",
                header.version, STORE_VERSION
            )));
        }

        let document: PersistedStore = serde_json::from_slice(bytes)
            .map_err(|e| DomainError::corrupt_store(format!("unreadable store: {e}")))?;

        let mut nodes = document.nodes.into_iter().enumerate();
        let root = match nodes.next() {
            Some((_, node)) if node.parent.is_none() && node.depth == -1 => node,
            _ => return Err(DomainError::corrupt_store("missing synthetic root")),
        };

        let mut arena = Arena::new();
        let mut slots = vec![arena.insert(root.into_node())];
        for (position, persisted) in nodes {
            let parent_slot = persisted
                .parent
                .filter(|&p| p < position)
                .and_then(|p| slots.get(p).copied())
                .ok_or_else(|| {
                    DomainError::corrupt_store(format!("node {position} has no valid parent"))
                })?;
            let mut node = persisted.into_node();
            node.parent = Some(parent_slot);
            let idx = arena.insert(node);
            arena[parent_slot].children.push(idx);
            slots.push(idx);
        }

        let mut index = HashMap::with_capacity(document.index.len());
        for (code, position) in document.index {
            let idx = slots.get(position).copied().ok_or_else(|| {
                DomainError::corrupt_store(format!("index entry {code} points outside the tree"))
            })?;
            if arena[idx].code.trim() != code {
                return Err(DomainError::corrupt_store(format!(
                    "index entry {code} points at node {:?}",
                    arena[idx].code
                )));
            }
            index.insert(code, idx);
        }

        debug!(
            "restored store: {} nodes, {} indexed codes",
            arena.len(),
            index.len()
        );
        Ok(Self {
            arena,
            root: slots[0],
            index,
            built_at: document.built_at,
        })
    }
}

pub struct PreOrder<'a> {
    store: &'a HierarchyStore,
    stack: Vec<Index>,
}

impl<'a> Iterator for PreOrder<'a> {
    type Item = (Index, &'a HierarchyNode);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(idx) = self.stack.pop() {
            if let Some(node) = self.store.arena.get(idx) {
                // Push children in reverse order for left-to-right traversal
                for &child in node.children.iter().rev() {
                    self.stack.push(child);
                }
                return Some((idx, node));
            }
        }
        None
    }
}

#[derive(Deserialize)]
struct PersistedHeader {
    format: String,
    version: u32,
}

#[derive(Serialize, Deserialize)]
struct PersistedStore {
    format: String,
    version: u32,
    built_at: DateTime<Utc>,
    nodes: Vec<PersistedNode>,
    index: BTreeMap<String, usize>,
}

#[derive(Serialize, Deserialize)]
struct PersistedNode {
    parent: Option<usize>,
    code: String,
    description: String,
    depth: i64,
    is_group_heading: bool,
    units: Vec<String>,
    duty_rates: DutyRates,
    footnotes: Vec<Footnote>,
    ancestor_path: Vec<String>,
}

impl PersistedNode {
    fn into_node(self) -> HierarchyNode {
        HierarchyNode {
            code: self.code,
            description: self.description,
            depth: self.depth,
            is_group_heading: self.is_group_heading,
            units: self.units,
            duty_rates: self.duty_rates,
            footnotes: self.footnotes,
            ancestor_path: self.ancestor_path,
            parent: None,
            children: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_empty_store_when_inspecting_then_only_root_exists() {
        let store = HierarchyStore::empty();
        assert_eq!(store.node_count(), 1);
        assert!(store.is_empty());
        assert_eq!(store.root().depth, -1);
        assert_eq!(store.max_depth(), 0);
    }

    #[test]
    fn given_attached_nodes_when_walking_preorder_then_source_order_is_kept() {
        let mut store = HierarchyStore::empty();
        let root = store.root_index();
        let a = store.attach(
            root,
            HierarchyNode::from_record(&HierarchyRecord::new("01", "A", 0), vec![]),
        );
        store.attach(root, HierarchyNode::from_record(&HierarchyRecord::new("02", "B", 0), vec![]));
        store.attach(a, HierarchyNode::from_record(&HierarchyRecord::new("0101", "A1", 1), vec![]));

        let codes: Vec<_> = store.iter_preorder().map(|(_, n)| n.code.clone()).collect();
        assert_eq!(codes, vec!["", "01", "0101", "02"]);
        assert_eq!(store.max_depth(), 2);
    }

    #[test]
    fn given_unknown_code_when_rendering_path_then_falls_back_to_code() {
        let store = HierarchyStore::empty();
        assert_eq!(store.display_path("", " > "), "");
        assert_eq!(store.display_path("9999", " > "), "Code: 9999");
    }
}

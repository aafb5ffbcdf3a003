//! Hierarchical signal schema.
//!
//! The schema is the tree of vehicle signals addressed by dotted paths, e.g.
//! `Vehicle.Cabin.Door.IsOpen`. Nodes are stored in a flat `Vec` indexed by
//! `NodeId`, with parent/child/sibling links forming an intrusive tree and a
//! path index for O(1) lookups.
//!
//! ```text
//! Vehicle                      (branch)
//! +-- Vehicle.Speed            (sensor, float)
//! +-- Vehicle.Cabin            (branch)
//!     +-- Vehicle.Cabin.Door   (branch)
//! ```
//!
//! Because children are only ever added under an existing parent, every
//! non-root path's prefix resolves to a node.

mod json;

use crate::error::{Result, SandboxError};
use crate::id::NodeId;
use crate::types::{DataType, NodeKind};
use std::collections::HashMap;

/// A single node in the signal schema.
#[derive(Debug, Clone)]
pub struct SignalNode {
    pub id: NodeId,
    /// Full dotted path, e.g. `"Vehicle.Cabin.Door"`.
    pub path: String,
    /// Last segment only, e.g. `"Door"`.
    pub name: String,
    pub kind: NodeKind,
    /// Present on every leaf node.
    pub datatype: Option<DataType>,
    pub description: Option<String>,
    pub unit: Option<String>,
    /// Parent node (NodeId::INVALID for roots).
    pub parent: NodeId,
    /// First child (intrusive linked list).
    pub first_child: NodeId,
    /// Next sibling (intrusive linked list).
    pub next_sibling: NodeId,
    /// Depth in the tree (0 for roots).
    pub depth: u16,
}

impl SignalNode {
    pub fn is_branch(&self) -> bool {
        self.kind == NodeKind::Branch
    }
}

/// Flat-storage signal tree.
#[derive(Debug, Default, Clone)]
pub struct SignalSchema {
    nodes: Vec<SignalNode>,
    path_index: HashMap<String, NodeId>,
}

impl SignalSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of nodes in the schema.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Add a root node (no parent).
    pub fn add_root(
        &mut self,
        name: &str,
        kind: NodeKind,
        datatype: Option<DataType>,
    ) -> Result<NodeId> {
        validate_segment(name)?;
        self.insert(name.to_string(), name.to_string(), kind, datatype, NodeId::INVALID, 0)
    }

    /// Add a child node under `parent`. Returns the child's NodeId.
    pub fn add_child(
        &mut self,
        parent: NodeId,
        name: &str,
        kind: NodeKind,
        datatype: Option<DataType>,
    ) -> Result<NodeId> {
        validate_segment(name)?;
        let parent_node = self
            .get(parent)
            .ok_or_else(|| SandboxError::Schema(format!("Unknown parent {:?}", parent)))?;
        if !parent_node.is_branch() {
            return Err(SandboxError::Schema(format!(
                "Cannot add '{}' under leaf '{}'",
                name, parent_node.path
            )));
        }

        let path = format!("{}.{}", parent_node.path, name);
        let depth = parent_node.depth + 1;
        let id = self.insert(path, name.to_string(), kind, datatype, parent, depth)?;

        // Link into parent's child list
        let first = self.nodes[parent.index()].first_child;
        if !first.is_valid() {
            self.nodes[parent.index()].first_child = id;
        } else {
            // Walk to end of sibling chain
            let mut cur = first;
            loop {
                let next = self.nodes[cur.index()].next_sibling;
                if !next.is_valid() {
                    self.nodes[cur.index()].next_sibling = id;
                    break;
                }
                cur = next;
            }
        }

        Ok(id)
    }

    fn insert(
        &mut self,
        path: String,
        name: String,
        kind: NodeKind,
        datatype: Option<DataType>,
        parent: NodeId,
        depth: u16,
    ) -> Result<NodeId> {
        if self.path_index.contains_key(&path) {
            return Err(SandboxError::Schema(format!("Duplicate signal path '{}'", path)));
        }
        if kind.is_leaf() && datatype.is_none() {
            return Err(SandboxError::Schema(format!(
                "Leaf signal '{}' has no datatype",
                path
            )));
        }

        let id = NodeId(self.nodes.len() as u32);
        self.path_index.insert(path.clone(), id);
        self.nodes.push(SignalNode {
            id,
            path,
            name,
            kind,
            datatype: if kind.is_leaf() { datatype } else { None },
            description: None,
            unit: None,
            parent,
            first_child: NodeId::INVALID,
            next_sibling: NodeId::INVALID,
            depth,
        });
        Ok(id)
    }

    /// Get a node by NodeId (O(1) array index).
    #[inline]
    pub fn get(&self, id: NodeId) -> Option<&SignalNode> {
        if id.is_valid() {
            self.nodes.get(id.index())
        } else {
            None
        }
    }

    #[inline]
    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut SignalNode> {
        if id.is_valid() {
            self.nodes.get_mut(id.index())
        } else {
            None
        }
    }

    /// Look up by full dotted path (O(1) HashMap).
    pub fn find(&self, path: &str) -> Option<NodeId> {
        self.path_index.get(path).copied()
    }

    /// Look up a node by full dotted path.
    pub fn node(&self, path: &str) -> Option<&SignalNode> {
        self.find(path).and_then(|id| self.get(id))
    }

    /// Iterate over all nodes.
    pub fn iter(&self) -> impl Iterator<Item = &SignalNode> {
        self.nodes.iter()
    }

    /// Iterate over children of a given node.
    pub fn children(&self, parent: NodeId) -> ChildIter<'_> {
        let first = self
            .get(parent)
            .map(|n| n.first_child)
            .unwrap_or(NodeId::INVALID);
        ChildIter {
            schema: self,
            current: first,
        }
    }

    /// Iterate over root nodes (depth == 0).
    pub fn roots(&self) -> impl Iterator<Item = &SignalNode> {
        self.nodes.iter().filter(|n| !n.parent.is_valid())
    }

    /// Iterate over all value-carrying nodes.
    pub fn leaves(&self) -> impl Iterator<Item = &SignalNode> {
        self.nodes.iter().filter(|n| !n.is_branch())
    }

    /// Parse a schema from JSON text. See [`SignalSchema::from_json_value`].
    pub fn from_json_str(text: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| SandboxError::Schema(format!("Invalid schema JSON: {}", e)))?;
        Self::from_json_value(value)
    }

    /// Build a schema from a JSON document.
    ///
    /// Accepts a single node `{ name, type, datatype?, children? }`, a map of
    /// root name to node (`{ "Vehicle": { "type": "branch", ... } }`), or a
    /// list of named nodes. `children` may itself be a map or a list.
    pub fn from_json_value(value: serde_json::Value) -> Result<Self> {
        json::parse_document(value)
    }

    /// Render the schema as a map of root name to node, children keyed by name.
    pub fn to_json(&self) -> serde_json::Value {
        let mut roots = serde_json::Map::new();
        for root in self.roots() {
            roots.insert(root.name.clone(), self.node_to_json(root));
        }
        serde_json::Value::Object(roots)
    }

    fn node_to_json(&self, node: &SignalNode) -> serde_json::Value {
        let mut obj = serde_json::Map::new();
        obj.insert("type".into(), node.kind.to_string().into());
        if let Some(datatype) = &node.datatype {
            obj.insert("datatype".into(), datatype.to_string().into());
        }
        if let Some(description) = &node.description {
            obj.insert("description".into(), description.clone().into());
        }
        if let Some(unit) = &node.unit {
            obj.insert("unit".into(), unit.clone().into());
        }
        if node.is_branch() {
            let mut children = serde_json::Map::new();
            for child in self.children(node.id) {
                children.insert(child.name.clone(), self.node_to_json(child));
            }
            obj.insert("children".into(), serde_json::Value::Object(children));
        }
        serde_json::Value::Object(obj)
    }
}

fn validate_segment(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('.') {
        return Err(SandboxError::Schema(format!(
            "Invalid signal name '{}': must be non-empty and contain no '.'",
            name
        )));
    }
    Ok(())
}

/// Iterator over the direct children of a node.
pub struct ChildIter<'a> {
    schema: &'a SignalSchema,
    current: NodeId,
}

impl<'a> Iterator for ChildIter<'a> {
    type Item = &'a SignalNode;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.schema.get(self.current)?;
        self.current = node.next_sibling;
        Some(node)
    }
}

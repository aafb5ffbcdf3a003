//! JSON schema documents.

use super::SignalSchema;
use crate::error::{Result, SandboxError};
use crate::id::NodeId;
use crate::types::{DataType, NodeKind};
use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Debug, Deserialize)]
struct RawNode {
    #[serde(default)]
    name: Option<String>,
    #[serde(rename = "type")]
    kind: NodeKind,
    #[serde(default)]
    datatype: Option<DataType>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    unit: Option<String>,
    #[serde(default)]
    children: Option<RawChildren>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawChildren {
    Named(BTreeMap<String, RawNode>),
    Listed(Vec<RawNode>),
}

pub(super) fn parse_document(value: serde_json::Value) -> Result<SignalSchema> {
    let mut schema = SignalSchema::new();

    // A lone node carries a "type" key; anything else is a root map or list.
    let is_single = value
        .as_object()
        .map(|obj| obj.contains_key("type"))
        .unwrap_or(false);

    if is_single {
        let raw: RawNode = serde_json::from_value(value)
            .map_err(|e| SandboxError::Schema(format!("Invalid schema node: {}", e)))?;
        let name = raw
            .name
            .clone()
            .ok_or_else(|| SandboxError::Schema("Root node has no name".to_string()))?;
        insert_node(&mut schema, None, &name, raw)?;
    } else {
        let roots: RawChildren = serde_json::from_value(value)
            .map_err(|e| SandboxError::Schema(format!("Invalid schema document: {}", e)))?;
        insert_children(&mut schema, None, roots, "<root>")?;
    }

    if schema.is_empty() {
        return Err(SandboxError::Schema("Schema has no nodes".to_string()));
    }

    tracing::debug!(
        "Parsed signal schema: {} nodes, {} leaves",
        schema.len(),
        schema.leaves().count()
    );
    Ok(schema)
}

fn insert_children(
    schema: &mut SignalSchema,
    parent: Option<NodeId>,
    children: RawChildren,
    parent_path: &str,
) -> Result<()> {
    match children {
        RawChildren::Named(map) => {
            for (name, raw) in map {
                insert_node(schema, parent, &name, raw)?;
            }
        }
        RawChildren::Listed(list) => {
            for raw in list {
                let name = raw.name.clone().ok_or_else(|| {
                    SandboxError::Schema(format!("Unnamed child under '{}'", parent_path))
                })?;
                insert_node(schema, parent, &name, raw)?;
            }
        }
    }
    Ok(())
}

fn insert_node(
    schema: &mut SignalSchema,
    parent: Option<NodeId>,
    name: &str,
    raw: RawNode,
) -> Result<NodeId> {
    let id = match parent {
        Some(parent) => schema.add_child(parent, name, raw.kind, raw.datatype)?,
        None => schema.add_root(name, raw.kind, raw.datatype)?,
    };

    let path = match schema.get_mut(id) {
        Some(node) => {
            node.description = raw.description;
            node.unit = raw.unit;
            node.path.clone()
        }
        None => return Err(SandboxError::Schema(format!("Lost node '{}'", name))),
    };

    match (raw.kind, raw.children) {
        (NodeKind::Branch, Some(children)) => {
            insert_children(schema, Some(id), children, &path)?;
            if !schema.children(id).any(|_| true) {
                tracing::warn!("Branch '{}' has no children", path);
            }
        }
        (NodeKind::Branch, None) => {
            tracing::warn!("Branch '{}' has no children", path);
        }
        (kind, Some(_)) => {
            return Err(SandboxError::Schema(format!(
                "{} '{}' cannot have children",
                kind, path
            )));
        }
        (_, None) => {}
    }

    Ok(id)
}

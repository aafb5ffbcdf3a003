//! Test data builders for schemas and plugin directories

use proto_sandbox::id::NodeId;
use proto_sandbox::{DataType, NodeKind, PluginDescriptor, SignalSchema};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Builds a schema from dotted paths, creating intermediate branches
pub struct SchemaBuilder {
    schema: SignalSchema,
}

impl SchemaBuilder {
    pub fn new() -> Self {
        Self {
            schema: SignalSchema::new(),
        }
    }

    fn ensure_branch(&mut self, path: &str) -> NodeId {
        if let Some(id) = self.schema.find(path) {
            return id;
        }
        match path.rsplit_once('.') {
            Some((parent, name)) => {
                let parent = self.ensure_branch(parent);
                self.schema
                    .add_child(parent, name, NodeKind::Branch, None)
                    .unwrap()
            }
            None => self.schema.add_root(path, NodeKind::Branch, None).unwrap(),
        }
    }

    pub fn branch(mut self, path: &str) -> Self {
        self.ensure_branch(path);
        self
    }

    pub fn leaf(mut self, path: &str, kind: NodeKind, datatype: &str) -> Self {
        let (parent, name) = path.rsplit_once('.').expect("leaf paths have a parent");
        let parent = self.ensure_branch(parent);
        self.schema
            .add_child(parent, name, kind, Some(DataType::parse(datatype)))
            .unwrap();
        self
    }

    pub fn sensor(self, path: &str, datatype: &str) -> Self {
        self.leaf(path, NodeKind::Sensor, datatype)
    }

    pub fn actuator(self, path: &str, datatype: &str) -> Self {
        self.leaf(path, NodeKind::Actuator, datatype)
    }

    pub fn build(self) -> SignalSchema {
        self.schema
    }
}

/// Plugin modules written to a temporary directory
pub struct PluginDirBuilder {
    dir: TempDir,
    descriptors: Vec<PluginDescriptor>,
}

impl PluginDirBuilder {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
            descriptors: Vec::new(),
        }
    }

    /// Write `source` to `<name>.rhai` and describe it by relative path
    pub fn plugin(mut self, name: &str, source: &str) -> Self {
        let file = format!("{}.rhai", name);
        std::fs::write(self.dir.path().join(&file), source).unwrap();
        self.descriptors.push(PluginDescriptor::new(name, file));
        self
    }

    /// Describe a plugin whose module does not exist
    pub fn missing(mut self, name: &str) -> Self {
        self.descriptors
            .push(PluginDescriptor::new(name, format!("{}.rhai", name)));
        self
    }

    /// Write an arbitrary file, e.g. a bootstrap library
    pub fn file(self, name: &str, contents: &str) -> Self {
        std::fs::write(self.dir.path().join(name), contents).unwrap();
        self
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn join(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn descriptors(&self) -> &[PluginDescriptor] {
        &self.descriptors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_builder_creates_branches() {
        let schema = SchemaBuilder::new()
            .sensor("Vehicle.Cabin.Temperature", "float")
            .build();

        assert_eq!(schema.len(), 3);
        assert!(schema.node("Vehicle.Cabin").unwrap().is_branch());
        assert_eq!(
            schema.node("Vehicle.Cabin.Temperature").unwrap().datatype,
            Some(DataType::Float)
        );
    }
}

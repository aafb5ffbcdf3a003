//! Signal proxy
//!
//! Presents the signal schema as a navigable address space. Paths are built
//! incrementally: [`NodeHandle::child`] appends one segment and checks it
//! against the schema, so a typo fails at the segment that is wrong.
//!
//! # Value resolution
//!
//! [`NodeHandle::get`] resolves a leaf value in layers, later layers winning:
//!
//! 1. the datatype default (`0`, `0.0`, `""`, `false`, `[]`)
//! 2. the monitor's last-known value
//! 3. the session value store
//! 4. the `(path, get)` interceptor, called with `args = []`
//!
//! The monitor records the value before the interceptor runs, so repeated
//! reads do not feed interceptor output back into itself.

use crate::error::{Result, SandboxError};
use crate::id::NodeId;
use crate::session::Session;
use crate::types::{DataType, NodeKind, Operation, SignalValue};
use std::fmt;

/// A resolved schema node bound to a session
#[derive(Clone)]
pub struct NodeHandle {
    session: Session,
    id: NodeId,
    path: String,
    kind: NodeKind,
    datatype: Option<DataType>,
}

impl NodeHandle {
    fn from_id(session: Session, id: NodeId) -> Result<Self> {
        let node = session
            .schema()
            .get(id)
            .ok_or_else(|| SandboxError::Schema(format!("Unknown node {:?}", id)))?;
        let (path, kind, datatype) = (node.path.clone(), node.kind, node.datatype.clone());
        Ok(Self {
            session,
            id,
            path,
            kind,
            datatype,
        })
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Last path segment
    pub fn name(&self) -> &str {
        self.path.rsplit('.').next().unwrap_or(&self.path)
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn datatype(&self) -> Option<&DataType> {
        self.datatype.as_ref()
    }

    pub fn is_branch(&self) -> bool {
        self.kind == NodeKind::Branch
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Resolve the direct child `name`
    pub fn child(&self, name: &str) -> Result<NodeHandle> {
        let child_path = format!("{}.{}", self.path, name);
        match self.session.schema().find(&child_path) {
            Some(id) => NodeHandle::from_id(self.session.clone(), id),
            None => Err(SandboxError::SchemaLookup {
                parent: self.path.clone(),
                child: name.to_string(),
            }),
        }
    }

    /// Resolve a dotted path relative to this node
    pub fn resolve(&self, relative: &str) -> Result<NodeHandle> {
        if relative.is_empty() {
            return Ok(self.clone());
        }
        relative
            .split('.')
            .try_fold(self.clone(), |node, segment| node.child(segment))
    }

    /// Direct children in schema order
    pub fn children(&self) -> Vec<NodeHandle> {
        self.session
            .schema()
            .children(self.id)
            .filter_map(|child| NodeHandle::from_id(self.session.clone(), child.id).ok())
            .collect()
    }

    /// Read the node's current value
    pub fn get(&self) -> Result<SignalValue> {
        if self.is_branch() {
            return Err(SandboxError::invalid_operation(
                Operation::Get,
                &self.path,
                "branch nodes have no value",
            ));
        }

        let mut value = self
            .datatype
            .as_ref()
            .and_then(DataType::default_value)
            .ok_or_else(|| SandboxError::UnknownDatatype {
                path: self.path.clone(),
                datatype: self
                    .datatype
                    .as_ref()
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| "<none>".to_string()),
            })?;

        if let Some(observed) = self.session.monitor().last_value(&self.path) {
            value = observed;
        }
        if let Some(stored) = self.session.values().get(&self.path) {
            value = stored;
        }

        self.session
            .monitor()
            .record(&self.path, Operation::Get, value.clone());

        if let Some(interceptor) = self
            .session
            .simulators()
            .interceptor(&self.path, Operation::Get)
        {
            tracing::debug!(
                "get({}) through {} simulator stage(s)",
                self.path,
                interceptor.depth()
            );
            value = interceptor.apply(&[], value)?;
        }

        Ok(value)
    }

    /// Write `value` into the session value store
    pub fn set(&self, value: SignalValue) -> Result<()> {
        if self.is_branch() {
            return Err(SandboxError::invalid_operation(
                Operation::Set,
                &self.path,
                "branch nodes have no value",
            ));
        }

        tracing::debug!("set({}) = {}", self.path, value);
        self.session
            .monitor()
            .record(&self.path, Operation::Set, value.clone());
        self.session.values().set(self.path.clone(), value);
        Ok(())
    }

    /// Like [`NodeHandle::set`], but first passes `value` through the
    /// `(path, set)` interceptor when one is registered, with `args = [value]`.
    ///
    /// A failing transform is logged and `value` is written unchanged, so
    /// this fails only where [`NodeHandle::set`] would.
    pub fn set_intercepted(&self, value: SignalValue) -> Result<()> {
        if self.is_branch() {
            return self.set(value);
        }
        let value = match self
            .session
            .simulators()
            .interceptor(&self.path, Operation::Set)
        {
            Some(interceptor) => interceptor
                .apply(std::slice::from_ref(&value), value.clone())
                .unwrap_or_else(|e| {
                    tracing::warn!(
                        "set({}) interceptor failed, writing as is: {}",
                        self.path,
                        e
                    );
                    value
                }),
            None => value,
        };
        self.set(value)
    }

    /// Subscriptions are not available to plugin code
    pub fn subscribe(&self) -> Result<()> {
        Err(SandboxError::invalid_operation(
            Operation::Subscribe,
            &self.path,
            "cannot be called from a plugin",
        ))
    }
}

impl fmt::Debug for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeHandle")
            .field("path", &self.path)
            .field("kind", &self.kind)
            .field("datatype", &self.datatype)
            .finish()
    }
}

/// Proxy over one root of the schema
#[derive(Debug, Clone)]
pub struct VehicleProxy {
    root: NodeHandle,
}

impl VehicleProxy {
    pub fn new(session: Session, root: &str) -> Result<Self> {
        let id = session
            .schema()
            .find(root)
            .ok_or_else(|| SandboxError::SchemaLookup {
                parent: "<schema>".to_string(),
                child: root.to_string(),
            })?;
        Ok(Self {
            root: NodeHandle::from_id(session, id)?,
        })
    }

    pub fn root(&self) -> &NodeHandle {
        &self.root
    }

    pub fn session(&self) -> &Session {
        self.root.session()
    }

    /// Resolve `path`, either absolute (`Vehicle.Speed`) or relative to the root (`Speed`)
    pub fn resolve(&self, path: &str) -> Result<NodeHandle> {
        let root = self.root.path();
        if path == root {
            return Ok(self.root.clone());
        }
        match path.strip_prefix(root).and_then(|rest| rest.strip_prefix('.')) {
            Some(relative) => self.root.resolve(relative),
            None => self.root.resolve(path),
        }
    }

    pub fn get(&self, path: &str) -> Result<SignalValue> {
        self.resolve(path)?.get()
    }

    pub fn set(&self, path: &str, value: SignalValue) -> Result<()> {
        self.resolve(path)?.set(value)
    }
}

/// Builds proxies rooted at other schema roots
#[derive(Debug, Clone)]
pub struct ModelObjectCreator {
    session: Session,
}

impl ModelObjectCreator {
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    pub fn create(&self, root: &str) -> Result<VehicleProxy> {
        VehicleProxy::new(self.session.clone(), root)
    }
}

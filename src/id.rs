//! Identity types for the runtime.
//!
//! `NodeId` is a newtype over `u32` that serves as a direct index into the
//! schema's node storage. `ExecutionId` is minted per script run and routes
//! completion signals; `SessionId` names one runtime session.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Index into `SignalSchema::nodes`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct NodeId(pub u32);

impl NodeId {
    pub const INVALID: NodeId = NodeId(u32::MAX);

    #[inline]
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "NodeId(INVALID)")
        } else {
            write!(f, "NodeId({})", self.0)
        }
    }
}

/// Identifier of one script execution.
///
/// Unique among the executions of a sandbox; also used to suffix the
/// symbols injected for that execution.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExecutionId(pub u64);

impl fmt::Debug for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ExecutionId({})", self.0)
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic source of execution ids.
#[derive(Debug, Default)]
pub struct ExecutionIdGen {
    next: AtomicU64,
}

impl ExecutionIdGen {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> ExecutionId {
        ExecutionId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

/// Identifier of a runtime session.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_node_id_invalid() {
        assert!(!NodeId::INVALID.is_valid());
        assert!(NodeId(0).is_valid());
        assert_eq!(format!("{:?}", NodeId::INVALID), "NodeId(INVALID)");
    }

    #[test]
    fn test_execution_ids_are_unique() {
        let ids = ExecutionIdGen::new();
        let seen: HashSet<_> = (0..1000).map(|_| ids.next_id()).collect();
        assert_eq!(seen.len(), 1000);
    }

    #[test]
    fn test_session_ids_differ() {
        assert_ne!(SessionId::new(), SessionId::new());
    }
}

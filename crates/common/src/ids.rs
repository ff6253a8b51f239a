//! Identifiers shared by the runtime and the connector gateway.
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one top-level query execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The node half of a sub-request id.
///
/// Real plan nodes and code table loads live in separate id spaces. Load ids are
/// additionally always negative so the two never compare equal even once flattened
/// to an integer (e.g. in log lines).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeId {
    /// A node of the query plan.
    Plan(u32),
    /// A synthetic node that loads a code table. Always `< 0`.
    CodeTableLoad(i64),
}

impl NodeId {
    pub fn is_code_table_load(&self) -> bool {
        matches!(self, NodeId::CodeTableLoad(_))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeId::Plan(id) => write!(f, "{}", id),
            NodeId::CodeTableLoad(id) => write!(f, "{}", id),
        }
    }
}

/// One (request, node) pair routed to a single connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubRequestId {
    pub request: RequestId,
    pub node: NodeId,
}

impl SubRequestId {
    pub fn new(request: RequestId, node: NodeId) -> Self {
        Self { request, node }
    }
}

impl fmt::Display for SubRequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.request, self.node)
    }
}

/// Opaque reference to the connector instance the gateway selected for a binding.
///
/// Only the gateway interprets `instance`; the runtime passes the handle back unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectorHandle {
    pub binding: String,
    pub instance: usize,
}

impl fmt::Display for ConnectorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.binding, self.instance)
    }
}

/// Handle of the transaction a request runs in, owned by the transaction coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionHandle(pub String);

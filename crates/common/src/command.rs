//! Sub-commands and the sub-request envelope handed to the connector gateway.
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ids::{SubRequestId, TransactionHandle};

/// The command a connector executes for one sub-request.
///
/// The planner's output is opaque here; the runtime only ever builds `Select`
/// itself, for code table loads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Command {
    /// Connector-native text produced upstream, passed through untouched.
    Native { text: String },
    /// Projection of named columns from one table, in the given order.
    Select { table: String, columns: Vec<String> },
}

impl Command {
    pub fn native(text: impl Into<String>) -> Self {
        Command::Native { text: text.into() }
    }

    pub fn select(table: impl Into<String>, columns: &[&str]) -> Self {
        Command::Select {
            table: table.into(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Native { text } => write!(f, "{}", text),
            Command::Select { table, columns } => {
                write!(f, "SELECT {} FROM {}", columns.join(", "), table)
            }
        }
    }
}

/// Everything the gateway needs to execute one (request, node) pair.
#[derive(Debug, Clone)]
pub struct SubRequest {
    pub id: SubRequestId,
    pub model: String,
    pub binding: String,
    pub command: Command,
    pub fetch_size: usize,
    pub transaction: Option<TransactionHandle>,
}

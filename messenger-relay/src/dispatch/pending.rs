//! Per-user in-flight flags.

use std::collections::HashSet;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Kind of long-running operation a user can have in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Download,
    Generation,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Download => write!(f, "download"),
            Self::Generation => write!(f, "generation"),
        }
    }
}

/// At most one in-flight operation per user per kind.
#[derive(Debug, Default)]
pub struct PendingFlags {
    inner: Mutex<HashSet<(String, OperationKind)>>,
}

impl PendingFlags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the operation in flight. Returns `false` if it already was.
    pub fn try_acquire(&self, user_id: &str, kind: OperationKind) -> bool {
        self.inner.lock().insert((user_id.to_string(), kind))
    }

    pub fn release(&self, user_id: &str, kind: OperationKind) {
        self.inner.lock().remove(&(user_id.to_string(), kind));
    }

    pub fn is_pending(&self, user_id: &str, kind: OperationKind) -> bool {
        self.inner.lock().contains(&(user_id.to_string(), kind))
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

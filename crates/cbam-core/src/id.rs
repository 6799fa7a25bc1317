//! Stable ID newtypes for ledger entities.
//!
//! All IDs are distinct newtype wrappers over `i64` (aligned with SQLite's
//! `INTEGER PRIMARY KEY`), so a `ProcessId` cannot be passed where a
//! `ProductId` or `EdgeId` is expected.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of an edge, owned by the edge store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EdgeId(pub i64);

/// Identifier of a process master record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessId(pub i64);

/// Identifier of a product master record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(pub i64);

// Display implementations -- just print the inner value.

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prints_inner_value() {
        assert_eq!(format!("{}", EdgeId(99)), "99");
        assert_eq!(format!("{}", ProcessId(7)), "7");
        assert_eq!(format!("{}", ProductId(0)), "0");
    }

    #[test]
    fn ids_serialize_transparently() {
        assert_eq!(serde_json::to_string(&ProcessId(42)).unwrap(), "42");
        let back: EdgeId = serde_json::from_str("5").unwrap();
        assert_eq!(back, EdgeId(5));
    }
}

//! Consistency levels carried on bound statements.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Consistency level requested for a statement.
///
/// When a binder carries no override the driver's session default applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConsistencyLevel {
    /// Any replica, including hinted handoff.
    Any,
    /// One replica.
    One,
    /// Two replicas.
    Two,
    /// Three replicas.
    Three,
    /// A majority of replicas.
    Quorum,
    /// Every replica.
    All,
    /// A majority of replicas in the local datacenter.
    LocalQuorum,
    /// A majority of replicas in every datacenter.
    EachQuorum,
    /// One replica in the local datacenter.
    LocalOne,
    /// Serial (lightweight transaction) consistency.
    Serial,
    /// Serial consistency restricted to the local datacenter.
    LocalSerial,
}

impl ConsistencyLevel {
    /// Returns true for levels valid as a serial consistency.
    #[must_use]
    pub const fn is_serial(&self) -> bool {
        matches!(self, ConsistencyLevel::Serial | ConsistencyLevel::LocalSerial)
    }

    /// Returns the CQL name of the level.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ConsistencyLevel::Any => "ANY",
            ConsistencyLevel::One => "ONE",
            ConsistencyLevel::Two => "TWO",
            ConsistencyLevel::Three => "THREE",
            ConsistencyLevel::Quorum => "QUORUM",
            ConsistencyLevel::All => "ALL",
            ConsistencyLevel::LocalQuorum => "LOCAL_QUORUM",
            ConsistencyLevel::EachQuorum => "EACH_QUORUM",
            ConsistencyLevel::LocalOne => "LOCAL_ONE",
            ConsistencyLevel::Serial => "SERIAL",
            ConsistencyLevel::LocalSerial => "LOCAL_SERIAL",
        }
    }
}

impl fmt::Display for ConsistencyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_serial() {
        assert!(ConsistencyLevel::Serial.is_serial());
        assert!(ConsistencyLevel::LocalSerial.is_serial());
        assert!(!ConsistencyLevel::Quorum.is_serial());
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&ConsistencyLevel::LocalQuorum).unwrap();
        assert_eq!(json, "\"LOCAL_QUORUM\"");
        let level: ConsistencyLevel = serde_json::from_str("\"EACH_QUORUM\"").unwrap();
        assert_eq!(level, ConsistencyLevel::EachQuorum);
        assert_eq!(level.to_string(), "EACH_QUORUM");
    }
}

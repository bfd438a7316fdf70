use std::fmt;

use serde::{Deserialize, Serialize};

/// Which of the two backing stores an operation targets.
///
/// The primary is the authoritative source of truth; the secondary holds an
/// eventually identical copy for durability and disaster recovery.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreRole {
    Primary,
    Secondary,
}

impl fmt::Display for StoreRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Secondary => write!(f, "secondary"),
        }
    }
}

//! Row status and the lease state machine.
//!
//! ```text
//! AVAILABLE --claim--> CLAIMED --fetch--> IN_PROGRESS --finish--> COMPLETED | EXCEPTION | ...
//! CLAIMED | IN_PROGRESS --recovery timeout / forced destroy--> DESTROYED
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Name rendered for lookups of identifiers that are absent. Never persisted.
pub const DOES_NOT_EXIST: &str = "DOESNOTEXIST";

/// Persisted status of a queue row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Status {
    Available,
    Claimed,
    InProgress,
    Completed,
    Exception,
    Destroyed,
    Recoverable,
    /// Caller-defined terminal status.
    Custom(String),
}

impl Status {
    /// Build a caller-defined status. Built-in names map to their variants.
    pub fn custom(name: impl Into<String>) -> Result<Self> {
        name.into().parse()
    }

    pub fn as_str(&self) -> &str {
        match self {
            Status::Available => "AVAILABLE",
            Status::Claimed => "CLAIMED",
            Status::InProgress => "IN_PROGRESS",
            Status::Completed => "COMPLETED",
            Status::Exception => "EXCEPTION",
            Status::Destroyed => "DESTROYED",
            Status::Recoverable => "RECOVERABLE",
            Status::Custom(name) => name,
        }
    }

    /// Whether `finish` may move an in-progress row into this status.
    pub fn is_finish_status(&self) -> bool {
        matches!(
            self,
            Status::Completed | Status::Exception | Status::Recoverable | Status::Custom(_)
        )
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let status = match s {
            "AVAILABLE" => Status::Available,
            "CLAIMED" => Status::Claimed,
            "IN_PROGRESS" => Status::InProgress,
            "COMPLETED" => Status::Completed,
            "EXCEPTION" => Status::Exception,
            "DESTROYED" => Status::Destroyed,
            "RECOVERABLE" => Status::Recoverable,
            "" | DOES_NOT_EXIST => return Err(Error::InvalidStatus(s.to_string())),
            other => Status::Custom(other.to_string()),
        };
        Ok(status)
    }
}

impl TryFrom<String> for Status {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Status> for String {
    fn from(status: Status) -> Self {
        match status {
            Status::Custom(name) => name,
            other => other.as_str().to_string(),
        }
    }
}

//! Row priority.

use derive_more::Display;
use serde::{Deserialize, Serialize};

/// Priority of a queue row. Higher values are claimed first.
///
/// Always within [`Priority::MIN`]..=[`Priority::MAX`]; every constructor clamps.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display,
)]
#[display("{_0}")]
#[serde(from = "i64", into = "i64")]
pub struct Priority(i32);

impl Priority {
    pub const MIN: Priority = Priority(1);
    pub const MAX: Priority = Priority(10);

    /// Clamp an arbitrary integer into the valid priority range.
    pub fn clamped(value: i64) -> Self {
        let clamped = value.clamp(i64::from(Self::MIN.0), i64::from(Self::MAX.0));
        Self(clamped as i32)
    }

    pub fn get(&self) -> i32 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::MIN
    }
}

impl From<i64> for Priority {
    fn from(value: i64) -> Self {
        Self::clamped(value)
    }
}

impl From<Priority> for i64 {
    fn from(priority: Priority) -> Self {
        i64::from(priority.0)
    }
}

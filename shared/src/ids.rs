//! Strongly-typed identifiers used across the scheduler
//!
//! The scheduler hands clients an opaque, scheduler-minted identifier for
//! every virtual task (`ClientTaskId`) and separately tracks whatever
//! identifier the downstream execution service assigns once a task is
//! actually submitted (`RealTaskId`). Keeping these as distinct newtypes
//! (rather than passing `String`/`Uuid` around directly) makes it a compile
//! error to accidentally look a client id up in the `pending` map, or vice
//! versa.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque identifier minted by the scheduler and returned to the submitting
/// client. Stable for the lifetime of a virtual task, even across backups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientTaskId(Uuid);

impl ClientTaskId {
    /// Mints a fresh, random client task id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClientTaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientTaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl std::str::FromStr for ClientTaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Identifier assigned by the downstream execution service upon accepting a
/// submission. Treated as an opaque string: the executor is the sole
/// authority on its format.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RealTaskId(String);

impl RealTaskId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RealTaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Opaque key into the endpoint registry. Never interpreted by the
/// scheduler beyond equality and hashing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointId(String);

impl EndpointId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl From<&str> for EndpointId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for EndpointId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Opaque name of a registered function on the executor; never interpreted
/// by the scheduler beyond equality and hashing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FunctionId(String);

impl FunctionId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl From<&str> for FunctionId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for FunctionId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

// ── Core identity types ──
//
// EntityId identifies rows, racks, shelves and assignments; DeviceEntityId
// identifies a device in the external registry (`light.shelf_a1`).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ── EntityId ────────────────────────────────────────────────────────

/// Canonical identifier for a stored record.
///
/// The backend issues UUID primary keys, but fixtures and older tables use
/// opaque strings, so both are accepted transparently.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityId {
    Uuid(Uuid),
    Key(String),
}

impl EntityId {
    pub fn as_uuid(&self) -> Option<&Uuid> {
        match self {
            Self::Uuid(u) => Some(u),
            Self::Key(_) => None,
        }
    }

    /// Generate a fresh random id.
    pub fn new_v4() -> Self {
        Self::Uuid(Uuid::new_v4())
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uuid(u) => write!(f, "{u}"),
            Self::Key(s) => write!(f, "{s}"),
        }
    }
}

impl FromStr for EntityId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s.to_owned()))
    }
}

impl From<Uuid> for EntityId {
    fn from(u: Uuid) -> Self {
        Self::Uuid(u)
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        match Uuid::parse_str(&s) {
            Ok(u) => Self::Uuid(u),
            Err(_) => Self::Key(s),
        }
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self::from(s.to_owned())
    }
}

// ── DeviceEntityId ──────────────────────────────────────────────────

/// Device registry identifier, normalized to lowercase (`light.shelf_a1`).
///
/// The part before the first `.` is the device domain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct DeviceEntityId(String);

impl DeviceEntityId {
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Domain prefix, e.g. `light` for `light.shelf_a1`.
    pub fn domain(&self) -> Option<&str> {
        self.0.split_once('.').map(|(domain, _)| domain)
    }
}

impl fmt::Display for DeviceEntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DeviceEntityId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

impl From<String> for DeviceEntityId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for DeviceEntityId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<DeviceEntityId> for String {
    fn from(id: DeviceEntityId) -> Self {
        id.0
    }
}

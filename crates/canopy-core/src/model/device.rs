// ── Device domain types ──
//
// Devices come from the external registry and are read-only here.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::DeviceEntityId;

/// Device domain (the registry's type prefix).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
#[non_exhaustive]
pub enum DeviceDomain {
    Light,
    Switch,
    Fan,
    Sensor,
    BinarySensor,
    Climate,
    Valve,
    Camera,
    Humidifier,
    Other(String),
}

impl DeviceDomain {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Light => "light",
            Self::Switch => "switch",
            Self::Fan => "fan",
            Self::Sensor => "sensor",
            Self::BinarySensor => "binary_sensor",
            Self::Climate => "climate",
            Self::Valve => "valve",
            Self::Camera => "camera",
            Self::Humidifier => "humidifier",
            Self::Other(s) => s,
        }
    }

    /// Sensors feed the monitoring overlay.
    pub fn is_sensor(&self) -> bool {
        matches!(self, Self::Sensor | Self::BinarySensor)
    }
}

impl From<&str> for DeviceDomain {
    fn from(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "light" => Self::Light,
            "switch" => Self::Switch,
            "fan" => Self::Fan,
            "sensor" => Self::Sensor,
            "binary_sensor" => Self::BinarySensor,
            "climate" => Self::Climate,
            "valve" => Self::Valve,
            "camera" => Self::Camera,
            "humidifier" => Self::Humidifier,
            other => Self::Other(other.to_owned()),
        }
    }
}

impl From<String> for DeviceDomain {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

impl From<DeviceDomain> for String {
    fn from(d: DeviceDomain) -> Self {
        d.as_str().to_owned()
    }
}

impl std::str::FromStr for DeviceDomain {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s))
    }
}

impl fmt::Display for DeviceDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A device mirrored from the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub entity_id: DeviceEntityId,
    pub name: String,
    pub domain: DeviceDomain,
    /// Registry state string (`on`, `off`, `unavailable`, `22.5`, ...).
    pub state: Option<String>,
    pub area: Option<String>,
    pub last_changed: Option<DateTime<Utc>>,
}

impl Device {
    /// The registry cannot reach the device.
    pub fn is_unavailable(&self) -> bool {
        matches!(self.state.as_deref(), Some("unavailable" | "unknown"))
    }

    /// A binary sensor reporting a problem, or any unreachable sensor.
    pub fn reports_problem(&self) -> bool {
        self.domain.is_sensor()
            && (self.is_unavailable() || matches!(self.state.as_deref(), Some("problem")))
    }
}

/// A search hit annotated for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankedDevice {
    #[serde(flatten)]
    pub device: Device,
    /// The domain is recommended for the target's granularity.
    pub recommended: bool,
}

/// Device search filters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceFilter {
    pub domain: Option<DeviceDomain>,
    /// `Some(false)` hides devices that already have an assignment;
    /// `Some(true)` keeps only assigned ones.
    pub assigned: Option<bool>,
}

impl DeviceFilter {
    pub fn available() -> Self {
        Self {
            domain: None,
            assigned: Some(false),
        }
    }

    #[must_use]
    pub fn with_domain(mut self, domain: DeviceDomain) -> Self {
        self.domain = Some(domain);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(domain: &str, state: &str) -> Device {
        Device {
            entity_id: DeviceEntityId::new(format!("{domain}.x")),
            name: "x".into(),
            domain: DeviceDomain::from(domain),
            state: Some(state.into()),
            area: None,
            last_changed: None,
        }
    }

    #[test]
    fn domain_round_trips_known_and_unknown() {
        assert_eq!(DeviceDomain::from("Binary_Sensor"), DeviceDomain::BinarySensor);
        assert_eq!(DeviceDomain::from("pump").as_str(), "pump");
    }

    #[test]
    fn problem_detection_only_for_sensors() {
        assert!(device("binary_sensor", "problem").reports_problem());
        assert!(device("sensor", "unavailable").reports_problem());
        assert!(!device("light", "unavailable").reports_problem());
        assert!(device("light", "unavailable").is_unavailable());
    }
}

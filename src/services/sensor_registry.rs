//! Sensor descriptors derived from the register table
//!
//! One data-driven table describes every exposed reading (register, unit,
//! icon, device class). A single generic renderer turns a [`Snapshot`] into
//! typed values.

use crate::client::Register;
use crate::services::reading_store::Snapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Physical class of a reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    Water,
    Duration,
    Timestamp,
    Enum,
    None,
}

/// Where a sensor takes its value from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorSource {
    /// Numeric register value
    Numeric(Register),
    /// Register value mapped through [`RegenerationStep`]
    RegenerationStep(Register),
    /// Completion time of the snapshot's fetch
    LastUpdate,
}

/// Static description of one exposed reading
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorDescriptor {
    /// Stable identifier
    pub key: &'static str,
    /// Source of the value
    pub source: SensorSource,
    /// Human-readable name
    pub display_name: &'static str,
    /// Unit of measurement
    pub unit: Option<&'static str>,
    /// Material Design icon
    pub icon: &'static str,
    /// Device class
    pub device_class: DeviceClass,
    /// Diagnostic rather than primary reading
    pub diagnostic: bool,
}

/// All readings exposed for a softener
pub const SENSORS: &[SensorDescriptor] = &[
    SensorDescriptor {
        key: "remaining_capacity",
        source: SensorSource::Numeric(Register::DA1_2),
        display_name: "Remaining capacity",
        unit: Some("m³"),
        icon: "mdi:arrow-expand-vertical",
        device_class: DeviceClass::Water,
        diagnostic: false,
    },
    SensorDescriptor {
        key: "actual_flow",
        source: SensorSource::Numeric(Register::DA1_1),
        display_name: "Actual flow",
        unit: Some("L"),
        icon: "mdi:swap-vertical",
        device_class: DeviceClass::Water,
        diagnostic: false,
    },
    SensorDescriptor {
        key: "time_since_last_regeneration",
        source: SensorSource::Numeric(Register::DA3_1),
        display_name: "Time since last regeneration",
        unit: Some("h"),
        icon: "mdi:progress-clock",
        device_class: DeviceClass::Duration,
        diagnostic: false,
    },
    SensorDescriptor {
        key: "regeneration_percent",
        source: SensorSource::Numeric(Register::DA3_2),
        display_name: "Running regeneration",
        unit: Some("%"),
        icon: "mdi:refresh-auto",
        device_class: DeviceClass::None,
        diagnostic: false,
    },
    SensorDescriptor {
        key: "regeneration_step_time_left",
        source: SensorSource::Numeric(Register::DA2_1),
        display_name: "Time left in regeneration step",
        unit: Some("min"),
        icon: "mdi:progress-clock",
        device_class: DeviceClass::Duration,
        diagnostic: false,
    },
    SensorDescriptor {
        key: "regeneration_step",
        source: SensorSource::RegenerationStep(Register::DY5),
        display_name: "Regeneration step",
        unit: None,
        icon: "mdi:debug-step-over",
        device_class: DeviceClass::Enum,
        diagnostic: false,
    },
    SensorDescriptor {
        key: "last_update",
        source: SensorSource::LastUpdate,
        display_name: "Last update",
        unit: None,
        icon: "mdi:clock",
        device_class: DeviceClass::Timestamp,
        diagnostic: true,
    },
];

/// Step of the regeneration cycle reported in `D_Y_5`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegenerationStep {
    None,
    FillingBrineTank,
    Brining,
    Displacement,
    Backwash,
    Rinse,
}

impl RegenerationStep {
    /// Map the device's step code
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::None),
            1 => Some(Self::FillingBrineTank),
            2 => Some(Self::Brining),
            3 => Some(Self::Displacement),
            4 => Some(Self::Backwash),
            5 => Some(Self::Rinse),
            _ => None,
        }
    }

    /// Display name
    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "no regeneration",
            Self::FillingBrineTank => "filling brine tank",
            Self::Brining => "brining",
            Self::Displacement => "displacement",
            Self::Backwash => "backwash",
            Self::Rinse => "rinse",
        }
    }
}

impl fmt::Display for RegenerationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Rendered value of a sensor
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SensorValue {
    Number(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
}

impl fmt::Display for SensorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorValue::Number(n) => write!(f, "{n}"),
            SensorValue::Text(s) => f.write_str(s),
            SensorValue::Timestamp(ts) => write!(f, "{}", ts.format("%Y-%m-%dT%H:%M:%S%.3fZ")),
        }
    }
}

impl SensorDescriptor {
    /// Look up a descriptor by key
    pub fn find(key: &str) -> Option<&'static SensorDescriptor> {
        SENSORS.iter().find(|sensor| sensor.key == key)
    }

    /// Register this sensor reads, if any
    pub fn register(&self) -> Option<Register> {
        match self.source {
            SensorSource::Numeric(register) | SensorSource::RegenerationStep(register) => {
                Some(register)
            }
            SensorSource::LastUpdate => None,
        }
    }

    /// Render the sensor from a snapshot; `None` when the value is missing
    /// or does not fit the sensor's type
    pub fn render(&self, snapshot: &Snapshot) -> Option<SensorValue> {
        match self.source {
            SensorSource::Numeric(register) => snapshot
                .get(register)
                .and_then(|raw| raw.trim().replace(',', ".").parse::<f64>().ok())
                .map(SensorValue::Number),
            SensorSource::RegenerationStep(register) => snapshot
                .get(register)
                .and_then(|raw| raw.trim().parse::<u8>().ok())
                .and_then(RegenerationStep::from_code)
                .map(|step| SensorValue::Text(step.name().to_string())),
            SensorSource::LastUpdate => snapshot.fetched_at.map(SensorValue::Timestamp),
        }
    }
}

/// Rendered reading, ready for export
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorReading {
    pub key: &'static str,
    pub name: &'static str,
    pub value: Option<SensorValue>,
    pub unit: Option<&'static str>,
}

/// Render every descriptor against a snapshot
pub fn render_all(snapshot: &Snapshot) -> Vec<SensorReading> {
    SENSORS
        .iter()
        .map(|sensor| SensorReading {
            key: sensor.key,
            name: sensor.display_name,
            value: sensor.render(snapshot),
            unit: sensor.unit,
        })
        .collect()
}

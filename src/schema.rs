//! Versioned column layouts for the telemetry log
//!
//! Every persisted row is laid out by exactly one [`SchemaVersion`]. A column
//! pairs the header label written to the log with the place its value comes
//! from in a flattened telemetry event.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Error;

/// Where a column's value is taken from during normalization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnSource {
    /// Gateway-assigned arrival time
    ArrivalTime,
    /// Timestamp reported by the controller
    ControllerTime,
    /// Classified event kind
    EventKind,
    /// A key of the flattened event
    Field(&'static str),
    /// A fermentation program parameter, keyed by its name in the event
    ProgramParam(&'static str),
}

/// A single persisted column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    /// Header label
    pub name: &'static str,
    pub source: ColumnSource,
}

const fn col(name: &'static str, source: ColumnSource) -> Column {
    Column { name, source }
}

const fn field(name: &'static str, key: &'static str) -> Column {
    col(name, ColumnSource::Field(key))
}

const fn param(name: &'static str, key: &'static str) -> Column {
    col(name, ColumnSource::ProgramParam(key))
}

const IDENTITY: [Column; 3] = [
    col("Backend_Time", ColumnSource::ArrivalTime),
    col("ESP_Time", ColumnSource::ControllerTime),
    col("Event_Type", ColumnSource::EventKind),
];

const STATE: [Column; 2] = [
    field("currentProgram", "currentProgram"),
    field("programState", "programState"),
];

const SENSORS: [Column; 7] = [
    field("waterTemp", "sensorData_waterTemp"),
    field("airTemp", "sensorData_airTemp"),
    field("elecTemp", "sensorData_elecTemp"),
    field("pH", "sensorData_pH"),
    field("turbidity", "sensorData_turbidity"),
    field("oxygen", "sensorData_oxygen"),
    field("airFlow", "sensorData_airFlow"),
];

const ACTUATORS: [Column; 9] = [
    field("airPump", "actuatorData_airPump"),
    field("drainPump", "actuatorData_drainPump"),
    field("samplePump", "actuatorData_samplePump"),
    field("nutrientPump", "actuatorData_nutrientPump"),
    field("basePump", "actuatorData_basePump"),
    field("fillPump", "actuatorData_fillPump"),
    field("stirringMotor", "actuatorData_stirringMotor"),
    field("heatingPlate", "actuatorData_heatingPlate"),
    field("ledGrowLight", "actuatorData_ledGrowLight"),
];

const SETPOINTS: [Column; 9] = [
    field("airPumpSetpoint", "actuatorSetpoints_airPumpValue"),
    field("drainPumpSetpoint", "actuatorSetpoints_drainPumpValue"),
    field("samplePumpSetpoint", "actuatorSetpoints_samplePumpValue"),
    field("nutrientPumpSetpoint", "actuatorSetpoints_nutrientPumpValue"),
    field("basePumpSetpoint", "actuatorSetpoints_basePumpValue"),
    field("fillPumpSetpoint", "actuatorSetpoints_fillPumpValue"),
    field("stirringMotorSetpoint", "actuatorSetpoints_stirringMotorValue"),
    field("heatingPlateSetpoint", "actuatorSetpoints_heatingPlateValue"),
    field("ledGrowLightSetpoint", "actuatorSetpoints_ledGrowLightValue"),
];

const VOLUME: [Column; 6] = [
    field("currentVolume", "volumeData_currentVolume"),
    field("availableVolume", "volumeData_availableVolume"),
    field("addedNaOH", "volumeData_addedNaOH"),
    field("addedNutrient", "volumeData_addedNutrient"),
    field("addedMicroalgae", "volumeData_addedMicroalgae"),
    field("removedVolume", "volumeData_removedVolume"),
];

const PROGRAM: [Column; 10] = [
    param("program", "program"),
    param("tempSetpoint", "temperatureSetpoint"),
    param("pHSetpoint", "phSetpoint"),
    param("DOSetpoint", "O2Setpoint"),
    param("nutrientConc", "nutrientConcentration"),
    param("baseConc", "baseConcentration"),
    param("duration", "duration"),
    param("nutrientDelay", "nutrientDelay"),
    param("experimentName", "experimentName"),
    param("comment", "comment"),
];

/// Identifies one column layout of the telemetry log
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaVersion {
    /// Actuator states only
    V1,
    /// Adds actuator setpoints and volume accounting
    #[default]
    V2,
}

impl SchemaVersion {
    /// The version new log files are written with
    pub const CURRENT: Self = Self::V2;

    /// All known versions, oldest first
    pub const ALL: [Self; 2] = [Self::V1, Self::V2];

    /// Ordered columns of this version
    #[must_use]
    pub fn columns(self) -> Vec<Column> {
        let sections: &[&[Column]] = match self {
            Self::V1 => &[&IDENTITY, &STATE, &SENSORS, &ACTUATORS, &PROGRAM],
            Self::V2 => &[
                &IDENTITY, &STATE, &SENSORS, &ACTUATORS, &SETPOINTS, &VOLUME, &PROGRAM,
            ],
        };
        sections.iter().flat_map(|s| s.iter().copied()).collect()
    }

    /// Header labels in column order
    #[must_use]
    pub fn header(self) -> Vec<&'static str> {
        self.columns().iter().map(|c| c.name).collect()
    }

    /// Whether `header` is exactly this version's header
    #[must_use]
    pub fn matches_header<S: AsRef<str>>(self, header: &[S]) -> bool {
        let expected = self.header();
        expected.len() == header.len()
            && expected.iter().zip(header).all(|(e, h)| *e == h.as_ref())
    }

    /// Find the version whose header matches exactly
    #[must_use]
    pub fn detect<S: AsRef<str>>(header: &[S]) -> Option<Self> {
        Self::ALL.into_iter().find(|v| v.matches_header(header))
    }
}

/// Ordered column identifiers of a version
#[must_use]
pub fn columns(version: SchemaVersion) -> Vec<Column> {
    version.columns()
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V1 => write!(f, "v1"),
            Self::V2 => write!(f, "v2"),
        }
    }
}

impl FromStr for SchemaVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "v1" | "1" => Ok(Self::V1),
            "v2" | "2" | "current" => Ok(Self::V2),
            other => Err(Error::Config(format!("unknown schema version '{other}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn current_is_v2() {
        assert_eq!(SchemaVersion::CURRENT, SchemaVersion::V2);
        assert_eq!(SchemaVersion::default(), SchemaVersion::CURRENT);
    }

    #[test]
    fn identity_columns_lead_every_version() {
        for version in SchemaVersion::ALL {
            let header = version.header();
            assert_eq!(&header[..3], &["Backend_Time", "ESP_Time", "Event_Type"]);
        }
    }

    #[test]
    fn program_columns_close_every_version() {
        for version in SchemaVersion::ALL {
            let header = version.header();
            assert_eq!(header[header.len() - 10], "program");
            assert_eq!(header.last(), Some(&"comment"));
        }
    }

    #[test]
    fn column_names_are_unique() {
        for version in SchemaVersion::ALL {
            let header = version.header();
            let unique: HashSet<_> = header.iter().collect();
            assert_eq!(unique.len(), header.len(), "duplicate column in {version}");
        }
    }

    #[test]
    fn v2_extends_v1() {
        assert_eq!(SchemaVersion::V1.columns().len(), 31);
        assert_eq!(SchemaVersion::V2.columns().len(), 46);

        let v2 = SchemaVersion::V2.header();
        for name in SchemaVersion::V1.header() {
            assert!(v2.contains(&name));
        }
        assert!(v2.contains(&"airPumpSetpoint"));
        assert!(v2.contains(&"currentVolume"));
    }

    #[test]
    fn detect_round_trips_headers() {
        for version in SchemaVersion::ALL {
            assert_eq!(SchemaVersion::detect(&version.header()), Some(version));
        }
        assert_eq!(SchemaVersion::detect(&["Backend_Time", "pH"]), None);
    }

    #[test]
    fn parse_and_display() {
        assert_eq!("v1".parse::<SchemaVersion>().unwrap(), SchemaVersion::V1);
        assert_eq!("V2".parse::<SchemaVersion>().unwrap(), SchemaVersion::V2);
        assert_eq!("current".parse::<SchemaVersion>().unwrap(), SchemaVersion::CURRENT);
        assert!("v9".parse::<SchemaVersion>().is_err());
        assert_eq!(SchemaVersion::V1.to_string(), "v1");
    }
}

//! Telemetry classification and normalization
//!
//! Controller payloads are arbitrary nested mappings. They are classified
//! into a [`Telemetry`] variant, flattened, and projected onto the columns of
//! a [`SchemaVersion`] to produce a [`NormalizedRecord`].

pub mod flatten;

use std::fmt;

use chrono::{DateTime, Local};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::schema::{ColumnSource, SchemaVersion};
use crate::{Error, Result};

pub use flatten::{SEPARATOR, cell, flatten};

/// Key whose presence marks a periodic sensor snapshot
pub const SENSOR_BRANCH: &str = "sensorData";

/// Key whose presence marks a program lifecycle event
pub const PROGRAM_FIELD: &str = "program";

/// Program whose parameters are copied into the program columns
pub const FERMENTATION_PROGRAM: &str = "Fermentation";

/// Format of the gateway arrival timestamp
pub const ARRIVAL_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One inbound telemetry payload, before normalization
#[derive(Debug, Clone)]
pub struct TelemetryEvent {
    /// Raw nested payload as sent by the controller
    pub payload: Value,
    /// Timestamp string reported by the controller
    pub controller_time: String,
    /// When the gateway received the payload
    pub arrival_time: DateTime<Local>,
}

impl TelemetryEvent {
    /// Create an event stamped with the current local time
    #[must_use]
    pub fn new(payload: Value, controller_time: impl Into<String>) -> Self {
        Self {
            payload,
            controller_time: controller_time.into(),
            arrival_time: Local::now(),
        }
    }
}

/// Event kind written to the `Event_Type` column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Periodic,
    ProgramEvent,
    Unknown,
}

impl EventKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Periodic => "periodic",
            Self::ProgramEvent => "program_event",
            Self::Unknown => "unknown",
        }
    }

    /// Parse a stored `Event_Type` cell
    #[must_use]
    pub fn from_column(value: &str) -> Option<Self> {
        match value {
            "periodic" => Some(Self::Periodic),
            "program_event" => Some(Self::ProgramEvent),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified telemetry payload
#[derive(Debug, Clone, PartialEq)]
pub enum Telemetry {
    /// Periodic snapshot carrying a sensor branch
    Periodic(Map<String, Value>),
    /// Program start/stop notification
    ProgramEvent {
        /// Program name as reported by the controller
        program: String,
        fields: Map<String, Value>,
    },
    /// Anything else; still logged
    Unknown(Map<String, Value>),
}

impl Telemetry {
    /// Classify a raw payload
    ///
    /// A sensor branch wins over a program field when both are present.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Structural`] if the payload is not a mapping
    pub fn classify(payload: &Value) -> Result<Self> {
        let Value::Object(map) = payload else {
            return Err(Error::Structural(format!(
                "telemetry payload must be a mapping, got {}",
                json_type(payload)
            )));
        };

        if map.contains_key(SENSOR_BRANCH) {
            return Ok(Self::Periodic(map.clone()));
        }

        if let Some(program) = map.get(PROGRAM_FIELD) {
            return Ok(Self::ProgramEvent {
                program: cell(program),
                fields: map.clone(),
            });
        }

        Ok(Self::Unknown(map.clone()))
    }

    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Periodic(_) => EventKind::Periodic,
            Self::ProgramEvent { .. } => EventKind::ProgramEvent,
            Self::Unknown(_) => EventKind::Unknown,
        }
    }

    /// The underlying mapping
    #[must_use]
    pub const fn fields(&self) -> &Map<String, Value> {
        match self {
            Self::Periodic(fields) | Self::Unknown(fields) | Self::ProgramEvent { fields, .. } => {
                fields
            }
        }
    }

    /// Parameters eligible for the program columns
    ///
    /// Only fermentation events populate them.
    #[must_use]
    pub fn program_params(&self) -> Option<&Map<String, Value>> {
        match self {
            Self::ProgramEvent { program, fields }
                if program.eq_ignore_ascii_case(FERMENTATION_PROGRAM) =>
            {
                Some(fields)
            }
            _ => None,
        }
    }
}

/// A flattened, schema-conformant telemetry row
///
/// Column order is the order of the schema (or of the file header when read
/// back from disk).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NormalizedRecord(IndexMap<String, String>);

impl NormalizedRecord {
    /// Build a record from ordered `(column, value)` pairs
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }

    /// Value of a column, if the column exists
    #[must_use]
    pub fn get(&self, column: &str) -> Option<&str> {
        self.0.get(column).map(String::as_str)
    }

    /// Column names in order
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Values in column order
    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.0.values().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Event kind recorded in the row, if present
    #[must_use]
    pub fn kind(&self) -> Option<&str> {
        self.get("Event_Type")
    }

    /// Typed event kind; rows without a recognizable kind count as unknown
    #[must_use]
    pub fn event_kind(&self) -> EventKind {
        self.kind()
            .and_then(EventKind::from_column)
            .unwrap_or(EventKind::Unknown)
    }
}

/// Normalize an event against a schema version
///
/// Missing keys produce empty cells; only a non-mapping payload is rejected.
///
/// # Errors
///
/// Returns [`Error::Structural`] if the payload is not a mapping
pub fn normalize(event: &TelemetryEvent, version: SchemaVersion) -> Result<NormalizedRecord> {
    let telemetry = Telemetry::classify(&event.payload)?;
    let kind = telemetry.kind();
    let flat = flatten(telemetry.fields());
    let params = telemetry.program_params();

    let arrival = event.arrival_time.format(ARRIVAL_TIME_FORMAT).to_string();

    let record = NormalizedRecord::from_pairs(version.columns().into_iter().map(|column| {
        let value = match column.source {
            ColumnSource::ArrivalTime => arrival.clone(),
            ColumnSource::ControllerTime => event.controller_time.clone(),
            ColumnSource::EventKind => kind.as_str().to_string(),
            ColumnSource::Field(key) => flat.get(key).map(cell).unwrap_or_default(),
            ColumnSource::ProgramParam(key) => params
                .and_then(|p| p.get(key))
                .map(cell)
                .unwrap_or_default(),
        };
        (column.name, value)
    }));

    tracing::debug!(
        kind = %kind,
        fields = flat.len(),
        schema = %version,
        "normalized telemetry event"
    );

    Ok(record)
}

const fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    const PROGRAM_COLUMNS: [&str; 10] = [
        "program",
        "tempSetpoint",
        "pHSetpoint",
        "DOSetpoint",
        "nutrientConc",
        "baseConc",
        "duration",
        "nutrientDelay",
        "experimentName",
        "comment",
    ];

    fn event(payload: Value) -> TelemetryEvent {
        TelemetryEvent::new(payload, "2024-01-01T00:00:00")
    }

    #[test]
    fn classifies_sensor_branch_as_periodic() {
        let t = Telemetry::classify(&json!({"sensorData": {"pH": 7.0}})).unwrap();
        assert_eq!(t.kind(), EventKind::Periodic);
    }

    #[test]
    fn sensor_branch_wins_over_program() {
        let t = Telemetry::classify(&json!({"sensorData": {}, "program": "Mix"})).unwrap();
        assert_eq!(t.kind(), EventKind::Periodic);
    }

    #[test]
    fn classifies_program_field() {
        let t = Telemetry::classify(&json!({"program": "Drain", "rate": 10})).unwrap();
        assert_eq!(t.kind(), EventKind::ProgramEvent);
        assert!(t.program_params().is_none());
    }

    #[test]
    fn classifies_everything_else_as_unknown() {
        let t = Telemetry::classify(&json!({"hello": "world"})).unwrap();
        assert_eq!(t.kind(), EventKind::Unknown);
    }

    #[test]
    fn rejects_non_mappings() {
        for payload in [json!("not-a-mapping"), json!(42), json!([1, 2]), Value::Null] {
            let err = Telemetry::classify(&payload).unwrap_err();
            assert!(matches!(err, Error::Structural(_)));
        }
    }

    #[test]
    fn periodic_record_fills_sensor_columns() {
        let record = normalize(
            &event(json!({"sensorData": {"pH": 7.1, "waterTemp": 28.4}})),
            SchemaVersion::CURRENT,
        )
        .unwrap();

        assert_eq!(record.kind(), Some("periodic"));
        assert_eq!(record.get("pH"), Some("7.1"));
        assert_eq!(record.get("waterTemp"), Some("28.4"));
        assert_eq!(record.get("ESP_Time"), Some("2024-01-01T00:00:00"));
        assert_eq!(record.get("airTemp"), Some(""));
        for column in PROGRAM_COLUMNS {
            assert_eq!(record.get(column), Some(""), "{column} should be empty");
        }
    }

    #[test]
    fn fermentation_event_fills_program_columns() {
        let record = normalize(
            &event(json!({
                "program": "Fermentation",
                "temperatureSetpoint": 30,
                "phSetpoint": 6.8,
                "O2Setpoint": 40,
                "nutrientConcentration": 1.5,
                "baseConcentration": 0.5,
                "duration": 48,
                "nutrientDelay": 12,
                "experimentName": "run-7",
                "comment": "baseline"
            })),
            SchemaVersion::CURRENT,
        )
        .unwrap();

        assert_eq!(record.kind(), Some("program_event"));
        assert_eq!(record.get("program"), Some("Fermentation"));
        assert_eq!(record.get("tempSetpoint"), Some("30"));
        assert_eq!(record.get("pHSetpoint"), Some("6.8"));
        assert_eq!(record.get("DOSetpoint"), Some("40"));
        assert_eq!(record.get("experimentName"), Some("run-7"));
        assert_eq!(record.get("comment"), Some("baseline"));
        assert_eq!(record.get("pH"), Some(""));
    }

    #[test]
    fn other_programs_leave_program_columns_empty() {
        let record = normalize(
            &event(json!({"program": "Mix", "duration": 10})),
            SchemaVersion::CURRENT,
        )
        .unwrap();

        assert_eq!(record.kind(), Some("program_event"));
        for column in PROGRAM_COLUMNS {
            assert_eq!(record.get(column), Some(""));
        }
    }

    #[test]
    fn records_are_never_short() {
        let payloads = [
            json!({}),
            json!({"sensorData": {}}),
            json!({"program": "Stop"}),
            json!({"actuatorData": {"airPump": true}, "volumeData": {"currentVolume": 1.2}}),
        ];
        for version in SchemaVersion::ALL {
            for payload in &payloads {
                let record = normalize(&event(payload.clone()), version).unwrap();
                assert_eq!(record.len(), version.columns().len());
                assert!(record.columns().eq(version.header()));
            }
        }
    }

    #[test]
    fn nested_actuator_and_volume_data() {
        let record = normalize(
            &event(json!({
                "currentProgram": "Fermentation",
                "programState": 2,
                "sensorData": {"oxygen": 87.5},
                "actuatorData": {"airPump": true, "stirringMotor": false},
                "actuatorSetpoints": {"airPumpValue": 60},
                "volumeData": {"currentVolume": 1.25}
            })),
            SchemaVersion::V2,
        )
        .unwrap();

        assert_eq!(record.get("currentProgram"), Some("Fermentation"));
        assert_eq!(record.get("programState"), Some("2"));
        assert_eq!(record.get("oxygen"), Some("87.5"));
        assert_eq!(record.get("airPump"), Some("true"));
        assert_eq!(record.get("stirringMotor"), Some("false"));
        assert_eq!(record.get("airPumpSetpoint"), Some("60"));
        assert_eq!(record.get("currentVolume"), Some("1.25"));
    }

    #[test]
    fn arrival_time_uses_gateway_format() {
        let record = normalize(&event(json!({})), SchemaVersion::V1).unwrap();
        let arrival = record.get("Backend_Time").unwrap();
        assert!(chrono::NaiveDateTime::parse_from_str(arrival, ARRIVAL_TIME_FORMAT).is_ok());
    }
}

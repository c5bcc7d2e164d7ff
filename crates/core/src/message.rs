//! Inbound payloads pushed by the server.
//!
//! The body shape is determined by the topic it arrives on, never guessed
//! from the JSON itself.

use crate::error::ClinicPulseError;
use crate::scope::Scope;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// Lifecycle of a schedule slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SlotStatus {
    Available,
    Booked,
    Completed,
    Cancelled,
}

/// One schedule slot, as fetched and as pushed in a `SlotUpdate`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleSlot {
    pub id: i64,
    #[serde(with = "iso8601")]
    pub start_time: NaiveDateTime,
    #[serde(with = "iso8601")]
    pub end_time: NaiveDateTime,
    pub status: SlotStatus,
    /// Fields the server adds that this crate does not model
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

/// Appointment notification delivered to the personal queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentNotice {
    pub patient_full_name: String,
    #[serde(with = "iso8601")]
    pub appointment_time: NaiveDateTime,
    pub message: String,
}

/// Emergency call broadcast to every connected client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyAlert {
    pub call_id: i64,
    pub patient_full_name: String,
    pub address: String,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: f64,
    #[serde(with = "iso8601")]
    pub call_time: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    SlotUpdate(ScheduleSlot),
    Notification(AppointmentNotice),
    EmergencyAlert(EmergencyAlert),
}

impl InboundMessage {
    /// Decode a frame body according to the scope it was routed to.
    pub fn decode(scope: &Scope, body: &str) -> Result<Self, ClinicPulseError> {
        let result = match scope {
            Scope::SlotsForDoctorDate { .. } => {
                serde_json::from_str(body).map(InboundMessage::SlotUpdate)
            }
            Scope::PersonalQueue => serde_json::from_str(body).map(InboundMessage::Notification),
            Scope::EmergencyAlerts => {
                serde_json::from_str(body).map(InboundMessage::EmergencyAlert)
            }
        };
        result.map_err(|e| ClinicPulseError::payload(scope.topic(), e.to_string()))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::SlotUpdate(_) => "slot-update",
            Self::Notification(_) => "notification",
            Self::EmergencyAlert(_) => "emergency-alert",
        }
    }
}

/// ISO-8601 timestamps with or without an offset.
///
/// Offsets are dropped after conversion to the wall-clock time they carry,
/// which is what the portal displays.
pub mod iso8601 {
    use chrono::{DateTime, NaiveDateTime};
    use serde::{Deserialize, Deserializer, Serializer};

    const OUTPUT_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";
    const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"];

    pub fn parse(raw: &str) -> Option<NaiveDateTime> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.naive_local());
        }
        NAIVE_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
    }

    pub fn format(dt: &NaiveDateTime) -> String {
        dt.format(OUTPUT_FORMAT).to_string()
    }

    pub fn serialize<S>(dt: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format(dt))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| {
            serde::de::Error::custom(format!("invalid ISO-8601 timestamp: {}", raw))
        })
    }
}

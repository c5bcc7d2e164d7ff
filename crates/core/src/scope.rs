//! Scopes and their transport topics.
//!
//! A scope names *what* stream of updates a view wants; the topic is the
//! string the broker knows it by. The mapping is a pure function in both
//! directions so producers and consumers can never disagree on it.

use crate::cache::CacheKey;
use crate::error::ClinicPulseError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

pub type DoctorId = i64;

pub const SLOTS_TOPIC_PREFIX: &str = "/topic/slots";
pub const EMERGENCY_TOPIC: &str = "/topic/emergency-alerts";
pub const PERSONAL_QUEUE_TOPIC: &str = "/user/queue/notifications";

/// Date format used in slot topics and schedule fetch keys
pub const SCOPE_DATE_FORMAT: &str = "%Y-%m-%d";

/// Application-level stream identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Scope {
    /// The caller's personal notification queue (resolved per session by the broker)
    PersonalQueue,
    /// Schedule slot changes for one doctor on one day
    #[serde(rename_all = "camelCase")]
    SlotsForDoctorDate { doctor_id: DoctorId, date: NaiveDate },
    /// Global emergency-call channel
    EmergencyAlerts,
}

impl Scope {
    pub fn slots(doctor_id: DoctorId, date: NaiveDate) -> Self {
        Self::SlotsForDoctorDate { doctor_id, date }
    }

    /// Transport topic for this scope
    pub fn topic(&self) -> String {
        match self {
            Self::PersonalQueue => PERSONAL_QUEUE_TOPIC.to_string(),
            Self::SlotsForDoctorDate { doctor_id, date } => format!(
                "{}/{}/{}",
                SLOTS_TOPIC_PREFIX,
                doctor_id,
                date.format(SCOPE_DATE_FORMAT)
            ),
            Self::EmergencyAlerts => EMERGENCY_TOPIC.to_string(),
        }
    }

    /// Read-cache key holding the data this scope patches, if any
    pub fn fetch_key(&self) -> Option<CacheKey> {
        match self {
            Self::SlotsForDoctorDate { doctor_id, date } => {
                Some(CacheKey::schedules(*doctor_id, *date))
            }
            Self::PersonalQueue | Self::EmergencyAlerts => None,
        }
    }

    /// Inverse of [`Scope::topic`].
    pub fn from_topic(topic: &str) -> Result<Self, ClinicPulseError> {
        match topic {
            PERSONAL_QUEUE_TOPIC => return Ok(Self::PersonalQueue),
            EMERGENCY_TOPIC => return Ok(Self::EmergencyAlerts),
            _ => {}
        }

        let rest = topic
            .strip_prefix(SLOTS_TOPIC_PREFIX)
            .and_then(|r| r.strip_prefix('/'))
            .ok_or_else(|| ClinicPulseError::unknown_topic(topic))?;

        let mut parts = rest.split('/');
        let (doctor, date) = match (parts.next(), parts.next(), parts.next()) {
            (Some(doctor), Some(date), None) => (doctor, date),
            _ => return Err(ClinicPulseError::unknown_topic(topic)),
        };

        let doctor_id = doctor
            .parse::<DoctorId>()
            .map_err(|_| ClinicPulseError::unknown_topic(topic))?;
        let date = NaiveDate::parse_from_str(date, SCOPE_DATE_FORMAT)
            .map_err(|_| ClinicPulseError::unknown_topic(topic))?;

        Ok(Self::SlotsForDoctorDate { doctor_id, date })
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PersonalQueue => write!(f, "personal-queue"),
            Self::SlotsForDoctorDate { doctor_id, date } => write!(
                f,
                "slots(doctor={}, date={})",
                doctor_id,
                date.format(SCOPE_DATE_FORMAT)
            ),
            Self::EmergencyAlerts => write!(f, "emergency-alerts"),
        }
    }
}

// Emergency Alerts
//
// Active emergency calls shown to operators. Acknowledging an alert only
// dismisses it locally; the server is never told.

use crate::message::EmergencyAlert;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::VecDeque;

pub const DEFAULT_ALERT_CAPACITY: usize = 50;

#[derive(Debug, Clone, PartialEq)]
pub struct ActiveAlert {
    pub alert: EmergencyAlert,
    pub received_at: DateTime<Utc>,
}

pub struct EmergencyAlerts {
    active: RwLock<VecDeque<ActiveAlert>>,
    capacity: usize,
}

impl EmergencyAlerts {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_ALERT_CAPACITY)
    }

    /// Keeps at most `capacity` unacknowledged alerts; the oldest go first.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            active: RwLock::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn push(&self, alert: EmergencyAlert) {
        tracing::info!(
            "Emergency call {} from {} at {}",
            alert.call_id,
            alert.patient_full_name,
            alert.address
        );
        let mut active = self.active.write();
        active.push_back(ActiveAlert {
            alert,
            received_at: Utc::now(),
        });
        while active.len() > self.capacity {
            if let Some(evicted) = active.pop_front() {
                tracing::warn!(
                    "Dropping unacknowledged emergency call {}",
                    evicted.alert.call_id
                );
            }
        }
    }

    /// Dismiss every active alert for `call_id`; returns how many were removed.
    pub fn acknowledge(&self, call_id: i64) -> usize {
        let mut active = self.active.write();
        let before = active.len();
        active.retain(|a| a.alert.call_id != call_id);
        before - active.len()
    }

    pub fn snapshot(&self) -> Vec<ActiveAlert> {
        self.active.read().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.active.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.read().is_empty()
    }
}

impl Default for EmergencyAlerts {
    fn default() -> Self {
        Self::new()
    }
}

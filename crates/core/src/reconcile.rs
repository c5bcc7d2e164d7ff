//! Cache reconciliation
//!
//! Applies pushed messages to local state without a network round-trip:
//! slot updates patch the schedule entry in place, notifications land in the
//! notification log and mark aggregate views stale, emergency alerts join the
//! active alert list.

use crate::cache::{CacheKey, ReadCache};
use crate::emergency::EmergencyAlerts;
use crate::message::{AppointmentNotice, EmergencyAlert, InboundMessage, ScheduleSlot};
use crate::notifications::{NotificationEntry, NotificationLog};
use crate::scope::{DoctorId, Scope};
use chrono::{NaiveDate, Utc};
use serde_json::Value as JsonValue;
use std::sync::Arc;

/// Receives every decoded inbound message exactly once.
pub trait MessageSink: Send + Sync {
    fn accept(&self, scope: &Scope, message: &InboundMessage);
}

/// What a slot update did to its cache entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotMerge {
    Created,
    Replaced { index: usize },
    Appended { index: usize },
    /// The cached value was not a list; it was marked stale instead
    Skipped,
}

pub struct CacheReconciler {
    cache: Arc<dyn ReadCache>,
    notifications: Arc<NotificationLog>,
    alerts: Arc<EmergencyAlerts>,
    stale_on_notification: Vec<CacheKey>,
}

impl CacheReconciler {
    pub fn new(
        cache: Arc<dyn ReadCache>,
        notifications: Arc<NotificationLog>,
        alerts: Arc<EmergencyAlerts>,
    ) -> Self {
        Self {
            cache,
            notifications,
            alerts,
            stale_on_notification: vec![
                CacheKey::upcoming_appointments(),
                CacheKey::todays_appointments(),
            ],
        }
    }

    /// Replace the keys marked stale when a notification arrives.
    pub fn with_stale_keys(mut self, keys: Vec<CacheKey>) -> Self {
        self.stale_on_notification = keys;
        self
    }

    pub fn notifications(&self) -> &Arc<NotificationLog> {
        &self.notifications
    }

    pub fn alerts(&self) -> &Arc<EmergencyAlerts> {
        &self.alerts
    }

    pub fn apply_slot_update(
        &self,
        doctor_id: DoctorId,
        date: NaiveDate,
        slot: &ScheduleSlot,
    ) -> SlotMerge {
        let key = CacheKey::schedules(doctor_id, date);
        let pushed = match serde_json::to_value(slot) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("Cannot encode slot {} for {}: {}", slot.id, key, e);
                return SlotMerge::Skipped;
            }
        };

        let Some(entry) = self.cache.get(&key) else {
            tracing::debug!("Creating {} from pushed slot {}", key, slot.id);
            self.cache.set(key, JsonValue::Array(vec![pushed]));
            return SlotMerge::Created;
        };

        let JsonValue::Array(mut slots) = entry.value else {
            tracing::warn!("Cached value for {} is not a list, marking stale", key);
            self.cache.mark_stale(&key);
            return SlotMerge::Skipped;
        };

        let merge = match slots.iter().position(|s| slot_id(s) == Some(slot.id)) {
            Some(index) => {
                slots[index] = pushed;
                SlotMerge::Replaced { index }
            }
            None => {
                slots.push(pushed);
                SlotMerge::Appended {
                    index: slots.len() - 1,
                }
            }
        };

        tracing::debug!("Slot {} merged into {}: {:?}", slot.id, key, merge);
        self.cache.set(key, JsonValue::Array(slots));
        merge
    }

    pub fn apply_notification(&self, notice: &AppointmentNotice) {
        self.notifications
            .push(NotificationEntry::from_notice(notice, Utc::now()));
        for key in &self.stale_on_notification {
            self.cache.mark_stale(key);
        }
    }

    pub fn apply_emergency_alert(&self, alert: &EmergencyAlert) {
        self.alerts.push(alert.clone());
    }

    pub fn apply(&self, scope: &Scope, message: &InboundMessage) {
        match (scope, message) {
            (Scope::SlotsForDoctorDate { doctor_id, date }, InboundMessage::SlotUpdate(slot)) => {
                self.apply_slot_update(*doctor_id, *date, slot);
            }
            (Scope::PersonalQueue, InboundMessage::Notification(notice)) => {
                self.apply_notification(notice);
            }
            (Scope::EmergencyAlerts, InboundMessage::EmergencyAlert(alert)) => {
                self.apply_emergency_alert(alert);
            }
            (scope, message) => {
                tracing::warn!("Ignoring {} routed to {}", message.kind(), scope);
            }
        }
    }
}

impl MessageSink for CacheReconciler {
    fn accept(&self, scope: &Scope, message: &InboundMessage) {
        self.apply(scope, message);
    }
}

fn slot_id(value: &JsonValue) -> Option<i64> {
    value.get("id").and_then(JsonValue::as_i64)
}

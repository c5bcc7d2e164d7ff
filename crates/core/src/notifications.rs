//! Bounded notification log
//!
//! Append-only from the live path, oldest entries evicted past capacity.
//! The whole log is written back to the injected store after every change.

use crate::message::{iso8601, AppointmentNotice};
use chrono::{DateTime, NaiveDateTime, Utc};
use clinicpulse_store::KeyValueStore;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;

pub const NOTIFICATIONS_KEY: &str = "notifications";
pub const DEFAULT_NOTIFICATION_CAPACITY: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEntry {
    pub message: String,
    pub patient_full_name: String,
    #[serde(with = "iso8601")]
    pub appointment_time: NaiveDateTime,
    pub received_at: DateTime<Utc>,
    pub read: bool,
}

impl NotificationEntry {
    pub fn from_notice(notice: &AppointmentNotice, received_at: DateTime<Utc>) -> Self {
        Self {
            message: notice.message.clone(),
            patient_full_name: notice.patient_full_name.clone(),
            appointment_time: notice.appointment_time,
            received_at,
            read: false,
        }
    }
}

pub struct NotificationLog {
    entries: Mutex<VecDeque<NotificationEntry>>,
    capacity: usize,
    store: Option<Arc<dyn KeyValueStore>>,
}

impl NotificationLog {
    /// Log that lives only in memory
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            store: None,
        }
    }

    /// Log backed by `store`, preloaded with whatever it already holds.
    ///
    /// An unreadable persisted log is discarded with a warning rather than
    /// preventing startup.
    pub fn with_store(capacity: usize, store: Arc<dyn KeyValueStore>) -> Self {
        let capacity = capacity.max(1);
        let mut entries = match load_entries(store.as_ref()) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("Discarding unreadable notification log: {}", e);
                VecDeque::new()
            }
        };
        while entries.len() > capacity {
            entries.pop_front();
        }
        Self {
            entries: Mutex::new(entries),
            capacity,
            store: Some(store),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn push(&self, entry: NotificationEntry) {
        let snapshot = {
            let mut entries = self.entries.lock();
            entries.push_back(entry);
            while entries.len() > self.capacity {
                entries.pop_front();
            }
            entries.clone()
        };
        self.persist(&snapshot);
    }

    /// Oldest first
    pub fn entries(&self) -> Vec<NotificationEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn unread_count(&self) -> usize {
        self.entries.lock().iter().filter(|e| !e.read).count()
    }

    /// Returns how many entries flipped from unread to read.
    pub fn mark_all_read(&self) -> usize {
        let (changed, snapshot) = {
            let mut entries = self.entries.lock();
            let mut changed = 0;
            for entry in entries.iter_mut().filter(|e| !e.read) {
                entry.read = true;
                changed += 1;
            }
            (changed, entries.clone())
        };
        if changed > 0 {
            self.persist(&snapshot);
        }
        changed
    }

    pub fn clear(&self) {
        let snapshot = {
            let mut entries = self.entries.lock();
            entries.clear();
            entries.clone()
        };
        self.persist(&snapshot);
    }

    fn persist(&self, entries: &VecDeque<NotificationEntry>) {
        let Some(store) = &self.store else {
            return;
        };
        let result = serde_json::to_string(entries)
            .map_err(clinicpulse_store::StoreError::from)
            .and_then(|raw| store.put(NOTIFICATIONS_KEY, &raw));
        if let Err(e) = result {
            tracing::error!("Failed to persist notification log: {}", e);
        }
    }
}

impl Default for NotificationLog {
    fn default() -> Self {
        Self::new(DEFAULT_NOTIFICATION_CAPACITY)
    }
}

fn load_entries(
    store: &dyn KeyValueStore,
) -> Result<VecDeque<NotificationEntry>, clinicpulse_store::StoreError> {
    match store.get(NOTIFICATIONS_KEY)? {
        Some(raw) => Ok(serde_json::from_str(&raw)?),
        None => Ok(VecDeque::new()),
    }
}

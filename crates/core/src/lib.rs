pub mod cache;
pub mod config;
pub mod emergency;
pub mod error;
pub mod message;
pub mod notifications;
pub mod reconcile;
pub mod scope;
pub mod session;

// Re-export commonly used types
pub use cache::{CacheEntry, CacheEvent, CacheKey, KeyPart, MemoryCache, ReadCache};
pub use config::{CacheConfig, Config, LiveConfig, NotificationConfig};
pub use emergency::{ActiveAlert, EmergencyAlerts};
pub use error::{ClinicPulseError, DomainError, InfraError};
pub use message::{AppointmentNotice, EmergencyAlert, InboundMessage, ScheduleSlot, SlotStatus};
pub use notifications::{NotificationEntry, NotificationLog};
pub use reconcile::{CacheReconciler, MessageSink, SlotMerge};
pub use scope::{DoctorId, Scope};
pub use session::{Credential, Role, Session, SessionEvent, SessionListener, SessionProvider};

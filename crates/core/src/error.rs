//! ClinicPulse Error Types
//!
//! This module defines a layered error hierarchy:
//! - `DomainError`: failures of the live-update domain (config, scopes, payloads, handshake)
//! - `InfraError`: infrastructure failures (IO, serialization, persistence, transport)
//! - `ClinicPulseError`: top-level error that wraps both categories

use std::fmt;

/// Domain-level errors
#[derive(Debug)]
pub enum DomainError {
    /// Configuration file not found at the specified path
    ConfigNotFound { path: String },
    /// Configuration validation failed
    ConfigInvalid { field: String, reason: String },
    /// Configuration parsing failed
    ConfigParse { source: String },
    /// A topic string does not map back to any known scope
    UnknownTopic { topic: String },
    /// An inbound payload could not be decoded for its topic
    Payload { topic: String, reason: String },
    /// The messaging handshake was rejected or timed out
    Handshake { reason: String },
    /// An operation was requested from a state that does not allow it
    InvalidTransition { from: String, operation: String },
}

impl fmt::Display for DomainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigNotFound { path } => write!(f, "Config not found: {}", path),
            Self::ConfigInvalid { field, reason } => {
                write!(f, "Config invalid [{}]: {}", field, reason)
            }
            Self::ConfigParse { source } => write!(f, "Config parse error: {}", source),
            Self::UnknownTopic { topic } => write!(f, "Unknown topic: {}", topic),
            Self::Payload { topic, reason } => {
                write!(f, "Malformed payload on '{}': {}", topic, reason)
            }
            Self::Handshake { reason } => write!(f, "Handshake failed: {}", reason),
            Self::InvalidTransition { from, operation } => {
                write!(f, "Cannot {} while {}", operation, from)
            }
        }
    }
}

impl std::error::Error for DomainError {}

/// Infrastructure-level errors
#[derive(Debug)]
pub enum InfraError {
    /// IO operation failed
    Io(std::io::Error),
    /// JSON serialization/deserialization failed
    Json(serde_json::Error),
    /// YAML serialization/deserialization failed
    Yaml(serde_yml::Error),
    /// Key-value persistence failed
    Store(clinicpulse_store::StoreError),
    /// Transport could not be opened or broke mid-session
    Transport { url: String, reason: String },
}

impl fmt::Display for InfraError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "IO error: {}", err),
            Self::Json(err) => write!(f, "JSON error: {}", err),
            Self::Yaml(err) => write!(f, "YAML error: {}", err),
            Self::Store(err) => write!(f, "Store error: {}", err),
            Self::Transport { url, reason } => write!(f, "Transport error [{}]: {}", url, reason),
        }
    }
}

impl std::error::Error for InfraError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Json(e) => Some(e),
            Self::Yaml(e) => Some(e),
            Self::Store(e) => Some(e),
            Self::Transport { .. } => None,
        }
    }
}

/// Top-level error type for ClinicPulse
#[derive(Debug)]
pub enum ClinicPulseError {
    Domain(DomainError),
    Infra(InfraError),
    Other(String),
}

impl fmt::Display for ClinicPulseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Domain(e) => write!(f, "{}", e),
            Self::Infra(e) => write!(f, "{}", e),
            Self::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for ClinicPulseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Domain(e) => Some(e),
            Self::Infra(e) => Some(e),
            Self::Other(_) => None,
        }
    }
}

impl From<DomainError> for ClinicPulseError {
    fn from(err: DomainError) -> Self {
        Self::Domain(err)
    }
}

impl From<InfraError> for ClinicPulseError {
    fn from(err: InfraError) -> Self {
        Self::Infra(err)
    }
}

impl From<std::io::Error> for ClinicPulseError {
    fn from(err: std::io::Error) -> Self {
        Self::Infra(InfraError::Io(err))
    }
}

impl From<serde_json::Error> for ClinicPulseError {
    fn from(err: serde_json::Error) -> Self {
        Self::Infra(InfraError::Json(err))
    }
}

impl From<serde_yml::Error> for ClinicPulseError {
    fn from(err: serde_yml::Error) -> Self {
        Self::Infra(InfraError::Yaml(err))
    }
}

impl From<clinicpulse_store::StoreError> for ClinicPulseError {
    fn from(err: clinicpulse_store::StoreError) -> Self {
        Self::Infra(InfraError::Store(err))
    }
}

impl ClinicPulseError {
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::Domain(DomainError::ConfigNotFound { path: path.into() })
    }

    pub fn config_parse_error(source: impl Into<String>) -> Self {
        Self::Domain(DomainError::ConfigParse {
            source: source.into(),
        })
    }

    pub fn config_invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Domain(DomainError::ConfigInvalid {
            field: field.into(),
            reason: reason.into(),
        })
    }

    pub fn payload(topic: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Domain(DomainError::Payload {
            topic: topic.into(),
            reason: reason.into(),
        })
    }

    pub fn unknown_topic(topic: impl Into<String>) -> Self {
        Self::Domain(DomainError::UnknownTopic {
            topic: topic.into(),
        })
    }

    pub fn handshake(reason: impl Into<String>) -> Self {
        Self::Domain(DomainError::Handshake {
            reason: reason.into(),
        })
    }

    pub fn invalid_transition(from: impl ToString, operation: impl Into<String>) -> Self {
        Self::Domain(DomainError::InvalidTransition {
            from: from.to_string(),
            operation: operation.into(),
        })
    }

    /// True for errors the live layer recovers from by reconnecting.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Domain(DomainError::Handshake { .. })
                | Self::Infra(InfraError::Transport { .. })
                | Self::Infra(InfraError::Io(_))
        )
    }
}

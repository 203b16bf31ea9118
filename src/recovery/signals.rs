//! Signals published by the recovery layer.
//!
//! Hosts observe classification and breaker activity through a closed,
//! serde-tagged enum delivered over an unbounded channel. The receiver is
//! returned by [`RecoveryCoordinator::new`](super::RecoveryCoordinator::new);
//! dropping it is allowed and simply discards signals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::classify::{ErrorCategory, ErrorDetails, ErrorSeverity};

/// One recovery-layer signal with its emission time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoverySignal {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: RecoverySignalPayload,
}

impl RecoverySignal {
    #[must_use]
    pub fn new(payload: RecoverySignalPayload) -> Self {
        Self {
            timestamp: Utc::now(),
            payload,
        }
    }
}

/// Signal payloads, tagged by `type` on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecoverySignalPayload {
    /// Every handled error, regardless of category.
    ErrorOccurred { details: ErrorDetails },

    /// Rebroadcast keyed by category, for hosts filtering on one.
    CategoryError {
        category: ErrorCategory,
        details: ErrorDetails,
    },

    /// Rebroadcast keyed by severity.
    SeverityError {
        severity: ErrorSeverity,
        details: ErrorDetails,
    },

    /// Sanitized text suitable for direct display.
    UserNotice {
        message: String,
        troubleshooting: Vec<String>,
    },

    /// An operation's breaker crossed its failure threshold.
    CircuitOpened {
        operation: String,
        failure_count: u32,
    },

    /// The sweep moved an operation's breaker to half-open.
    CircuitHalfOpen { operation: String },

    /// An operation's breaker recovered to closed.
    CircuitClosed { operation: String },

    /// An open circuit pre-empted recovery for an error.
    CircuitTripped { operation: String },

    /// A retry delay elapsed; the caller may re-submit the operation.
    Retrying { attempt: u32, delay_ms: u64 },

    /// The attempt budget for an error is spent.
    RecoveryExhausted { details: ErrorDetails },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recovery::classify::classify;

    #[test]
    fn payloads_serialize_with_type_tag() {
        let signal = RecoverySignal::new(RecoverySignalPayload::UserNotice {
            message: "Connection problem.".to_string(),
            troubleshooting: vec!["Retry in a few moments".to_string()],
        });
        let json = serde_json::to_string(&signal).unwrap();

        assert!(json.contains("\"type\":\"user_notice\""));
        assert!(json.contains("\"timestamp\""));
    }

    #[test]
    fn circuit_signal_roundtrip() {
        let signal = RecoverySignal::new(RecoverySignalPayload::CircuitOpened {
            operation: "chat_completion".to_string(),
            failure_count: 5,
        });
        let json = serde_json::to_string(&signal).unwrap();
        let parsed: RecoverySignal = serde_json::from_str(&json).unwrap();

        match parsed.payload {
            RecoverySignalPayload::CircuitOpened {
                operation,
                failure_count,
            } => {
                assert_eq!(operation, "chat_completion");
                assert_eq!(failure_count, 5);
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn error_signal_carries_details() {
        let details = classify("network down").with_conversation("conv-1");
        let signal = RecoverySignal::new(RecoverySignalPayload::ErrorOccurred {
            details: details.clone(),
        });
        let json = serde_json::to_string(&signal).unwrap();

        assert!(json.contains("\"type\":\"error_occurred\""));
        assert!(json.contains("\"category\":\"network\""));
        assert!(json.contains("conv-1"));
    }
}

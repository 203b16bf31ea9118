//! Error taxonomy and classification.
//!
//! Every failure entering the recovery layer is normalized into an
//! [`ErrorDetails`] record: a stable numeric code, a category, a severity,
//! a credential-redacted technical message, a canned user-facing message,
//! and troubleshooting steps. Classification from a raw message string is
//! keyword-based and order-sensitive; callers that know more than the
//! message text refine the record through the builder methods.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const DEFAULT_MAX_RECOVERY_ATTEMPTS: u32 = 3;

const REDACTED: &str = "[redacted]";

/// `key=value` tokens whose key contains one of these are redacted.
const SENSITIVE_KEYS: &[&str] = &[
    "key",
    "token",
    "secret",
    "password",
    "credential",
    "authorization",
];

// ============================================================================
// Taxonomy
// ============================================================================

/// Failure categories. Each category owns a reserved block of 100 codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Network,
    Authentication,
    Authorization,
    Validation,
    Resource,
    ToolExecution,
    Provider,
    Schema,
    Timeout,
    Internal,
    Unknown,
}

impl ErrorCategory {
    /// Base code of this category's reserved block.
    #[must_use]
    pub fn code_base(self) -> u16 {
        match self {
            Self::Network => 1000,
            Self::Authentication => 1100,
            Self::Authorization => 1200,
            Self::Validation => 1300,
            Self::Resource => 1400,
            Self::ToolExecution => 1500,
            Self::Provider => 1600,
            Self::Schema => 1700,
            Self::Timeout => 1800,
            Self::Internal => 1900,
            Self::Unknown => 9000,
        }
    }

    /// Severity assigned when the caller does not override it.
    #[must_use]
    pub fn default_severity(self) -> ErrorSeverity {
        match self {
            Self::Network | Self::Resource | Self::ToolExecution | Self::Provider => {
                ErrorSeverity::Error
            }
            Self::Authentication | Self::Authorization | Self::Internal => ErrorSeverity::Critical,
            Self::Validation | Self::Schema | Self::Timeout => ErrorSeverity::Warning,
            Self::Unknown => ErrorSeverity::Error,
        }
    }

    /// Recovery strategy assigned when the caller does not override it.
    #[must_use]
    pub fn default_strategy(self) -> RecoveryStrategy {
        match self {
            Self::Network | Self::Provider | Self::Timeout => RecoveryStrategy::Retry,
            Self::Resource => RecoveryStrategy::GracefulDegradation,
            Self::ToolExecution => RecoveryStrategy::Fallback,
            Self::Authentication
            | Self::Authorization
            | Self::Validation
            | Self::Schema
            | Self::Internal
            | Self::Unknown => RecoveryStrategy::None,
        }
    }

    fn user_message(self) -> &'static str {
        match self {
            Self::Network => "Connection problem. Check your network and try again.",
            Self::Authentication => "Authentication failed. Check your API credentials.",
            Self::Authorization => "You do not have permission to perform this action.",
            Self::Validation => "The request was rejected as invalid.",
            Self::Resource => "A resource limit was reached. Try again later.",
            Self::ToolExecution => "A tool invoked by the assistant failed.",
            Self::Provider => "The model provider returned an error.",
            Self::Schema => "The provider response did not match the expected format.",
            Self::Timeout => "The operation timed out. Try again.",
            Self::Internal => "An internal error occurred.",
            Self::Unknown => "An unexpected error occurred.",
        }
    }

    fn troubleshooting(self) -> &'static [&'static str] {
        match self {
            Self::Network => &[
                "Check your internet connection",
                "Verify proxy or VPN settings",
                "Retry in a few moments",
            ],
            Self::Authentication => &[
                "Verify the API key is set and has not expired",
                "Confirm the key has access to the requested model",
                "Re-enter your credentials in the provider settings",
            ],
            Self::Authorization => &[
                "Confirm your account has access to this resource",
                "Check the permissions attached to your API key",
            ],
            Self::Validation => &[
                "Review the request parameters",
                "Reduce the request size if it exceeds provider limits",
            ],
            Self::Resource => &[
                "Wait for the provider rate limit to reset",
                "Reduce the frequency of requests",
            ],
            Self::ToolExecution => &[
                "Check the tool's own logs for details",
                "Verify the tool is installed and reachable",
            ],
            Self::Provider => &[
                "Check the provider status page",
                "Retry in a few moments",
            ],
            Self::Schema => &[
                "Update to the latest client version",
                "Report the response shape if the problem persists",
            ],
            Self::Timeout => &[
                "Retry the operation",
                "Check your network latency",
            ],
            Self::Internal => &["Restart the application", "Report this if it persists"],
            Self::Unknown => &["Retry the operation", "Report this if it persists"],
        }
    }
}

/// How serious a classified failure is.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
    Fatal,
}

/// How the recovery coordinator should respond to a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStrategy {
    Retry,
    Fallback,
    CircuitBreaker,
    GracefulDegradation,
    None,
}

// ============================================================================
// Error Record
// ============================================================================

/// A normalized failure record.
///
/// Records are immutable once issued: each handling round produces a
/// successor via [`next_attempt`](Self::next_attempt) rather than mutating
/// a shared value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: u16,
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    /// Technical message with credential-like tokens redacted.
    pub message: String,
    /// Raw message as received. Never shown to users.
    pub original_error: String,
    pub timestamp: DateTime<Utc>,
    /// Free-form context; `conversation_id` and `operation` are the keys
    /// other components look for.
    pub context: HashMap<String, String>,
    pub recovery_strategy: RecoveryStrategy,
    pub recovery_attempts: u32,
    pub max_recovery_attempts: u32,
    pub handled: bool,
    pub user_message: String,
    pub troubleshooting: Vec<String>,
}

impl ErrorDetails {
    /// Build a record for `category` with that category's defaults.
    #[must_use]
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        let original = message.into();
        Self {
            code: category.code_base(),
            category,
            severity: category.default_severity(),
            message: redact_credentials(&original),
            original_error: original,
            timestamp: Utc::now(),
            context: HashMap::new(),
            recovery_strategy: category.default_strategy(),
            recovery_attempts: 0,
            max_recovery_attempts: DEFAULT_MAX_RECOVERY_ATTEMPTS,
            handled: false,
            user_message: category.user_message().to_string(),
            troubleshooting: category
                .troubleshooting()
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        }
    }

    /// Tag the record with the operation it failed in (circuit breaker key).
    #[must_use]
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.context.insert("operation".to_string(), operation.into());
        self
    }

    /// Tag the record with the conversation it belongs to.
    #[must_use]
    pub fn with_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.context
            .insert("conversation_id".to_string(), conversation_id.into());
        self
    }

    #[must_use]
    pub fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = severity;
        self
    }

    #[must_use]
    pub fn with_strategy(mut self, strategy: RecoveryStrategy) -> Self {
        self.recovery_strategy = strategy;
        self
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_recovery_attempts = max;
        self
    }

    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Operation key, when tagged.
    #[must_use]
    pub fn operation(&self) -> Option<&str> {
        self.context.get("operation").map(String::as_str)
    }

    /// Conversation id, when tagged.
    #[must_use]
    pub fn conversation(&self) -> Option<&str> {
        self.context.get("conversation_id").map(String::as_str)
    }

    /// Successor record for the next handling round.
    #[must_use]
    pub fn next_attempt(&self) -> Self {
        Self {
            recovery_attempts: self.recovery_attempts + 1,
            ..self.clone()
        }
    }

    /// True while the attempt budget is not exhausted.
    #[must_use]
    pub fn attempts_remaining(&self) -> bool {
        self.recovery_attempts < self.max_recovery_attempts
    }
}

// ============================================================================
// Classification
// ============================================================================

/// Classify a raw error message into a normalized record.
///
/// Matching is case-insensitive and order-sensitive: the first matching
/// category wins, so "network timeout" classifies as network, not timeout.
#[must_use]
pub fn classify(message: &str) -> ErrorDetails {
    let lower = message.to_lowercase();

    let category = if lower.contains("network")
        || lower.contains("connection")
        || lower.contains("offline")
    {
        ErrorCategory::Network
    } else if lower.contains("timeout") {
        ErrorCategory::Timeout
    } else if lower.contains("authentication")
        || lower.contains("api key")
        || lower.contains("credentials")
    {
        ErrorCategory::Authentication
    } else {
        ErrorCategory::Unknown
    };

    ErrorDetails::new(category, message)
}

/// Replace credential-like tokens in an error message.
///
/// Redacts `sk-`-prefixed keys, values following `bearer`, and the value
/// half of `key=value` tokens whose key names a secret. Whitespace is
/// normalized to single spaces.
#[must_use]
pub fn redact_credentials(message: &str) -> String {
    let mut out: Vec<String> = Vec::new();
    let mut redact_next = false;

    for word in message.split_whitespace() {
        if redact_next {
            out.push(REDACTED.to_string());
            redact_next = false;
            continue;
        }

        let lower = word.to_lowercase();

        if let Some((key, _)) = word.split_once('=') {
            let key_lower = key.to_lowercase();
            if SENSITIVE_KEYS.iter().any(|k| key_lower.contains(k)) {
                out.push(format!("{key}={REDACTED}"));
                continue;
            }
        }

        if lower.starts_with("sk-") && word.len() > 8 {
            out.push(REDACTED.to_string());
            continue;
        }

        if lower == "bearer" {
            out.push(word.to_string());
            redact_next = true;
            continue;
        }

        out.push(word.to_string());
    }

    out.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_network_keywords() {
        assert_eq!(classify("network unreachable").category, ErrorCategory::Network);
        assert_eq!(classify("Connection refused").category, ErrorCategory::Network);
        assert_eq!(classify("host is offline").category, ErrorCategory::Network);
    }

    #[test]
    fn classifies_timeout_and_authentication() {
        assert_eq!(classify("request timeout").category, ErrorCategory::Timeout);
        assert_eq!(
            classify("authentication rejected").category,
            ErrorCategory::Authentication
        );
        assert_eq!(
            classify("invalid API key supplied").category,
            ErrorCategory::Authentication
        );
        assert_eq!(
            classify("bad credentials").category,
            ErrorCategory::Authentication
        );
    }

    #[test]
    fn first_matching_category_wins() {
        // Contains both "network" and "timeout"; network is checked first.
        assert_eq!(classify("network timeout").category, ErrorCategory::Network);
        // Contains both "timeout" and "credentials"; timeout is checked first.
        assert_eq!(
            classify("timeout fetching credentials").category,
            ErrorCategory::Timeout
        );
    }

    #[test]
    fn unmatched_message_is_unknown() {
        let details = classify("something odd happened");
        assert_eq!(details.category, ErrorCategory::Unknown);
        assert_eq!(details.code, 9000);
        assert_eq!(details.recovery_strategy, RecoveryStrategy::None);
    }

    #[test]
    fn category_defaults_follow_the_code_table() {
        let details = classify("connection reset by peer");
        assert_eq!(details.code, 1000);
        assert_eq!(details.severity, ErrorSeverity::Error);
        assert_eq!(details.recovery_strategy, RecoveryStrategy::Retry);

        let details = classify("deadline timeout exceeded");
        assert_eq!(details.code, 1800);
        assert_eq!(details.severity, ErrorSeverity::Warning);
        assert_eq!(details.recovery_strategy, RecoveryStrategy::Retry);

        let details = classify("authentication failure");
        assert_eq!(details.code, 1100);
        assert_eq!(details.severity, ErrorSeverity::Critical);
        assert_eq!(details.recovery_strategy, RecoveryStrategy::None);
    }

    #[test]
    fn redacts_api_keys_and_bearer_tokens() {
        let redacted = redact_credentials("rejected key sk-abcdef1234567890");
        assert!(!redacted.contains("sk-abcdef1234567890"));
        assert!(redacted.contains("[redacted]"));

        let redacted = redact_credentials("header Bearer eyJhbGciOi sent");
        assert_eq!(redacted, "header Bearer [redacted] sent");
    }

    #[test]
    fn redacts_sensitive_assignments() {
        let redacted = redact_credentials("auth failed: api_key=abc123 retrying");
        assert_eq!(redacted, "auth failed: api_key=[redacted] retrying");

        // Non-sensitive assignments pass through.
        let untouched = redact_credentials("retry count=3");
        assert_eq!(untouched, "retry count=3");
    }

    #[test]
    fn classified_message_is_redacted_but_original_kept() {
        let details = classify("authentication failed for api_key=abc123");
        assert!(details.message.contains("api_key=[redacted]"));
        assert_eq!(details.original_error, "authentication failed for api_key=abc123");
        assert!(!details.user_message.contains("abc123"));
    }

    #[test]
    fn builders_tag_context() {
        let details = classify("network down")
            .with_operation("chat_completion")
            .with_conversation("conv-1")
            .with_severity(ErrorSeverity::Fatal)
            .with_context("model", "gpt-4o");

        assert_eq!(details.operation(), Some("chat_completion"));
        assert_eq!(details.conversation(), Some("conv-1"));
        assert_eq!(details.severity, ErrorSeverity::Fatal);
        assert_eq!(details.context.get("model").map(String::as_str), Some("gpt-4o"));
    }

    #[test]
    fn next_attempt_increments_without_mutating() {
        let first = classify("connection lost");
        let second = first.next_attempt();

        assert_eq!(first.recovery_attempts, 0);
        assert_eq!(second.recovery_attempts, 1);
        assert!(second.attempts_remaining());

        let exhausted = second.next_attempt().next_attempt();
        assert_eq!(exhausted.recovery_attempts, 3);
        assert!(!exhausted.attempts_remaining());
    }

    #[test]
    fn category_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorCategory::ToolExecution).unwrap();
        assert_eq!(json, "\"tool_execution\"");

        let json = serde_json::to_string(&RecoveryStrategy::GracefulDegradation).unwrap();
        assert_eq!(json, "\"graceful_degradation\"");
    }
}

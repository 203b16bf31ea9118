//! Error classification, circuit breaking, and recovery coordination.

pub mod breaker;
pub mod classify;
pub mod coordinator;
pub mod signals;

// Classification
pub use classify::{
    classify, redact_credentials, ErrorCategory, ErrorDetails, ErrorSeverity, RecoveryStrategy,
};

// Circuit breaking
pub use breaker::{BreakerSnapshot, CircuitBreaker, CircuitBreakerRegistry, CircuitState};

// Coordination
pub use coordinator::{
    DegradationHandler, FallbackHandler, HandleOptions, RecoveryCoordinator, RecoveryOutcome,
};

// Signals
pub use signals::{RecoverySignal, RecoverySignalPayload};

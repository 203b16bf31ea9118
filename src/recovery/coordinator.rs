//! Recovery coordination.
//!
//! The coordinator takes normalized [`ErrorDetails`] records and runs the
//! handling pipeline: append to the bounded error log, log/notify/emit per
//! the caller's toggles, short-circuit when the operation's breaker is
//! open, dispatch the record's recovery strategy, and finally count
//! unrecovered failures against the breaker.
//!
//! Records are never mutated in place. Each handling round returns a
//! successor record inside [`RecoveryOutcome`]; callers that re-submit a
//! failed operation thread that successor into the next round so the
//! attempt budget is tracked across rounds.
//!
//! The coordinator never re-invokes a failed operation itself. For the
//! retry strategy it waits out the computed backoff delay and emits a
//! retrying signal; re-submission is the caller's job.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use super::breaker::CircuitBreakerRegistry;
use super::classify::{classify, ErrorDetails, ErrorSeverity, RecoveryStrategy};
use super::signals::{RecoverySignal, RecoverySignalPayload};
use crate::config::RecoveryConfig;

// ============================================================================
// Constants
// ============================================================================

/// Most-recent error records retained for diagnostics.
const MAX_ERROR_LOG_ENTRIES: usize = 100;

// ============================================================================
// Hooks
// ============================================================================

/// Caller-supplied alternate behavior for the fallback strategy.
#[async_trait]
pub trait FallbackHandler: Send + Sync {
    /// Attempt to absorb the failure. Returns true when recovered.
    async fn attempt(&self, details: &ErrorDetails) -> bool;
}

/// Caller-supplied reduced-functionality mode for graceful degradation.
#[async_trait]
pub trait DegradationHandler: Send + Sync {
    /// Attempt to continue in degraded form. Returns true when recovered.
    async fn attempt(&self, details: &ErrorDetails) -> bool;
}

// ============================================================================
// Options & Outcome
// ============================================================================

/// Per-call toggles for the handling pipeline. Everything defaults to on.
#[derive(Debug, Clone, Copy)]
pub struct HandleOptions {
    /// Write the record to the tracing log at its severity's level.
    pub log_error: bool,
    /// Emit a user-notice signal with the sanitized message.
    pub notify_user: bool,
    /// Emit the generic, category and severity error signals.
    pub emit_events: bool,
    /// Run the record's recovery strategy.
    pub attempt_recovery: bool,
}

impl Default for HandleOptions {
    fn default() -> Self {
        Self {
            log_error: true,
            notify_user: true,
            emit_events: true,
            attempt_recovery: true,
        }
    }
}

/// Result of one handling round.
#[derive(Debug, Clone)]
pub struct RecoveryOutcome {
    /// The record was processed. Processed does not mean resolved.
    pub handled: bool,
    /// A recovery hook absorbed the failure.
    pub recovered: bool,
    /// Successor record for the next round, attempt counter advanced.
    pub details: ErrorDetails,
}

// ============================================================================
// Coordinator
// ============================================================================

/// Applies recovery strategies to classified errors.
pub struct RecoveryCoordinator {
    config: RecoveryConfig,
    breakers: CircuitBreakerRegistry,
    error_log: Mutex<VecDeque<ErrorDetails>>,
    signal_tx: mpsc::UnboundedSender<RecoverySignal>,
    fallback: Option<Arc<dyn FallbackHandler>>,
    degradation: Option<Arc<dyn DegradationHandler>>,
}

impl RecoveryCoordinator {
    /// Create a coordinator and the receiver for its signals.
    ///
    /// The breaker sweep task is not started; call
    /// [`start_sweep`](Self::start_sweep) once the coordinator lives on a
    /// runtime.
    #[must_use]
    pub fn new(config: RecoveryConfig) -> (Self, mpsc::UnboundedReceiver<RecoverySignal>) {
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let breakers = CircuitBreakerRegistry::new(&config, signal_tx.clone());
        let coordinator = Self {
            config,
            breakers,
            error_log: Mutex::new(VecDeque::new()),
            signal_tx,
            fallback: None,
            degradation: None,
        };
        (coordinator, signal_rx)
    }

    /// Register the fallback hook.
    #[must_use]
    pub fn with_fallback(mut self, handler: Arc<dyn FallbackHandler>) -> Self {
        self.fallback = Some(handler);
        self
    }

    /// Register the graceful-degradation hook.
    #[must_use]
    pub fn with_degradation(mut self, handler: Arc<dyn DegradationHandler>) -> Self {
        self.degradation = Some(handler);
        self
    }

    /// Start the periodic breaker sweep.
    pub async fn start_sweep(&self) {
        self.breakers.start_sweep().await;
        info!("Recovery coordinator started");
    }

    /// Stop the breaker sweep and wait for it.
    pub async fn shutdown(&self) {
        self.breakers.shutdown().await;
        info!("Recovery coordinator stopped");
    }

    /// Classify a raw message with this coordinator's attempt budget.
    #[must_use]
    pub fn classify(&self, message: &str) -> ErrorDetails {
        classify(message).with_max_attempts(self.config.max_recovery_attempts)
    }

    /// The breaker registry, for success reporting and diagnostics.
    #[must_use]
    pub fn circuit_breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    /// Report that an operation succeeded, feeding its breaker.
    pub fn record_success(&self, operation: &str) {
        self.breakers.record_success(operation);
    }

    /// Handle an error with default options.
    pub async fn handle_error(&self, details: ErrorDetails) -> RecoveryOutcome {
        self.handle_error_with(details, HandleOptions::default())
            .await
    }

    /// Handle an error with explicit per-call toggles.
    pub async fn handle_error_with(
        &self,
        details: ErrorDetails,
        options: HandleOptions,
    ) -> RecoveryOutcome {
        self.push_log(details.clone()).await;

        if options.log_error {
            log_classified(&details);
        }
        if options.notify_user {
            let _ = self.signal_tx.send(RecoverySignal::new(
                RecoverySignalPayload::UserNotice {
                    message: details.user_message.clone(),
                    troubleshooting: details.troubleshooting.clone(),
                },
            ));
        }
        if options.emit_events {
            self.emit_error_signals(&details);
        }

        // An open circuit pre-empts recovery entirely; the failure that
        // opened it was already counted.
        if let Some(operation) = details.operation() {
            if self.breakers.is_open(operation) {
                debug!(operation, "Recovery pre-empted by open circuit");
                let _ = self.signal_tx.send(RecoverySignal::new(
                    RecoverySignalPayload::CircuitTripped {
                        operation: operation.to_string(),
                    },
                ));
                let mut details = details;
                details.recovery_strategy = RecoveryStrategy::CircuitBreaker;
                details.handled = true;
                return RecoveryOutcome {
                    handled: true,
                    recovered: false,
                    details,
                };
            }
        }

        let mut details = details;
        let mut recovered = false;

        if options.attempt_recovery {
            if details.attempts_remaining() {
                details = details.next_attempt();
                recovered = self.dispatch_strategy(&details).await;
            } else {
                warn!(
                    category = ?details.category,
                    attempts = details.recovery_attempts,
                    "Recovery attempts exhausted"
                );
                let _ = self.signal_tx.send(RecoverySignal::new(
                    RecoverySignalPayload::RecoveryExhausted {
                        details: details.clone(),
                    },
                ));
            }
        }

        if !recovered {
            if let Some(operation) = details.operation() {
                self.breakers.record_failure(operation);
            }
        }

        details.handled = true;
        RecoveryOutcome {
            handled: true,
            recovered,
            details,
        }
    }

    /// Snapshot of the bounded error log, oldest first.
    pub async fn recent_errors(&self) -> Vec<ErrorDetails> {
        self.error_log.lock().await.iter().cloned().collect()
    }

    /// Backoff delay for the given 1-based attempt number.
    ///
    /// With exponential backoff the delay doubles per attempt, then the
    /// whole value is widened by a uniform jitter of up to
    /// `jitter_factor` of itself in either direction.
    #[must_use]
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.config.retry_base_delay_ms as f64;
        let delay_ms = if self.config.exponential_backoff {
            base_ms * 2f64.powi(attempt.saturating_sub(1) as i32)
        } else {
            base_ms
        };

        let jitter = (rand::random::<f64>() * 2.0 - 1.0) * self.config.jitter_factor;
        let delay_ms = (delay_ms * (1.0 + jitter)).max(0.0);
        Duration::from_millis(delay_ms as u64)
    }

    async fn dispatch_strategy(&self, details: &ErrorDetails) -> bool {
        match details.recovery_strategy {
            RecoveryStrategy::Retry => {
                let delay = self.retry_delay(details.recovery_attempts);
                debug!(
                    attempt = details.recovery_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Waiting out retry backoff"
                );
                tokio::time::sleep(delay).await;
                let _ = self.signal_tx.send(RecoverySignal::new(
                    RecoverySignalPayload::Retrying {
                        attempt: details.recovery_attempts,
                        delay_ms: delay.as_millis() as u64,
                    },
                ));
                // The caller owns re-submission; nothing is recovered yet.
                false
            }
            RecoveryStrategy::Fallback => match &self.fallback {
                Some(handler) => handler.attempt(details).await,
                None => false,
            },
            RecoveryStrategy::GracefulDegradation => match &self.degradation {
                Some(handler) => handler.attempt(details).await,
                None => false,
            },
            // The breaker prevents future attempts; it does not recover
            // this one.
            RecoveryStrategy::CircuitBreaker | RecoveryStrategy::None => false,
        }
    }

    fn emit_error_signals(&self, details: &ErrorDetails) {
        let _ = self.signal_tx.send(RecoverySignal::new(
            RecoverySignalPayload::ErrorOccurred {
                details: details.clone(),
            },
        ));
        let _ = self.signal_tx.send(RecoverySignal::new(
            RecoverySignalPayload::CategoryError {
                category: details.category,
                details: details.clone(),
            },
        ));
        let _ = self.signal_tx.send(RecoverySignal::new(
            RecoverySignalPayload::SeverityError {
                severity: details.severity,
                details: details.clone(),
            },
        ));
    }

    async fn push_log(&self, details: ErrorDetails) {
        let mut log = self.error_log.lock().await;
        if log.len() == MAX_ERROR_LOG_ENTRIES {
            log.pop_front();
        }
        log.push_back(details);
    }
}

fn log_classified(details: &ErrorDetails) {
    match details.severity {
        ErrorSeverity::Debug => {
            debug!(code = details.code, category = ?details.category, "{}", details.message);
        }
        ErrorSeverity::Info => {
            info!(code = details.code, category = ?details.category, "{}", details.message);
        }
        ErrorSeverity::Warning => {
            warn!(code = details.code, category = ?details.category, "{}", details.message);
        }
        ErrorSeverity::Error | ErrorSeverity::Critical | ErrorSeverity::Fatal => {
            error!(code = details.code, category = ?details.category, "{}", details.message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recovery::breaker::CircuitState;
    use crate::recovery::classify::ErrorCategory;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingFallback {
        calls: AtomicU32,
        succeed: bool,
    }

    #[async_trait]
    impl FallbackHandler for CountingFallback {
        async fn attempt(&self, _details: &ErrorDetails) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.succeed
        }
    }

    fn drain_payloads(
        rx: &mut mpsc::UnboundedReceiver<RecoverySignal>,
    ) -> Vec<RecoverySignalPayload> {
        let mut payloads = Vec::new();
        while let Ok(signal) = rx.try_recv() {
            payloads.push(signal.payload);
        }
        payloads
    }

    fn quiet() -> HandleOptions {
        HandleOptions {
            log_error: false,
            notify_user: false,
            emit_events: false,
            attempt_recovery: false,
        }
    }

    #[test]
    fn retry_delay_stays_in_jitter_window() {
        let config = RecoveryConfig::default();
        let (coordinator, _rx) = RecoveryCoordinator::new(config.clone());

        for attempt in 1..=3u32 {
            let expected = config.retry_base_delay_ms as f64 * 2f64.powi(attempt as i32 - 1);
            let low = (expected * (1.0 - config.jitter_factor)) as u128;
            let high = (expected * (1.0 + config.jitter_factor)) as u128;
            for _ in 0..25 {
                let delay = coordinator.retry_delay(attempt).as_millis();
                assert!(
                    delay >= low && delay <= high,
                    "attempt {attempt}: {delay}ms outside [{low}, {high}]"
                );
            }
        }
    }

    #[test]
    fn retry_delay_without_backoff_or_jitter_is_base() {
        let config = RecoveryConfig {
            exponential_backoff: false,
            jitter_factor: 0.0,
            ..RecoveryConfig::default()
        };
        let (coordinator, _rx) = RecoveryCoordinator::new(config);

        assert_eq!(coordinator.retry_delay(1), Duration::from_millis(1000));
        assert_eq!(coordinator.retry_delay(3), Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_round_sleeps_then_signals() {
        let (coordinator, mut rx) = RecoveryCoordinator::new(RecoveryConfig::default());
        let details = coordinator.classify("network unreachable");

        let outcome = coordinator.handle_error(details).await;

        assert!(outcome.handled);
        assert!(!outcome.recovered);
        assert_eq!(outcome.details.recovery_attempts, 1);
        assert!(outcome.details.handled);

        let payloads = drain_payloads(&mut rx);
        let retrying = payloads.iter().find_map(|p| match p {
            RecoverySignalPayload::Retrying { attempt, delay_ms } => Some((*attempt, *delay_ms)),
            _ => None,
        });
        let (attempt, delay_ms) = retrying.expect("retrying signal");
        assert_eq!(attempt, 1);
        assert!((800..=1200).contains(&delay_ms), "delay {delay_ms}ms");
    }

    #[tokio::test]
    async fn exhausted_budget_emits_and_counts_failure() {
        let (coordinator, mut rx) = RecoveryCoordinator::new(RecoveryConfig::default());
        let mut details = coordinator
            .classify("network down")
            .with_operation("chat_completion");
        details.recovery_attempts = details.max_recovery_attempts;

        let outcome = coordinator.handle_error(details).await;

        assert!(!outcome.recovered);
        assert!(drain_payloads(&mut rx)
            .iter()
            .any(|p| matches!(p, RecoverySignalPayload::RecoveryExhausted { .. })));
        let snapshot = coordinator
            .circuit_breakers()
            .snapshot("chat_completion")
            .unwrap();
        assert_eq!(snapshot.failure_count, 1);
    }

    #[tokio::test]
    async fn open_circuit_short_circuits_without_counting() {
        let config = RecoveryConfig::default();
        let (coordinator, mut rx) = RecoveryCoordinator::new(config.clone());

        for _ in 0..config.failure_threshold {
            coordinator.circuit_breakers().record_failure("tool_call");
        }
        assert!(coordinator.circuit_breakers().is_open("tool_call"));
        let before = coordinator
            .circuit_breakers()
            .snapshot("tool_call")
            .unwrap()
            .failure_count;
        drain_payloads(&mut rx);

        let details = coordinator
            .classify("tool broke in a new way")
            .with_operation("tool_call");
        let outcome = coordinator.handle_error(details).await;

        assert!(outcome.handled);
        assert!(!outcome.recovered);
        assert_eq!(
            outcome.details.recovery_strategy,
            RecoveryStrategy::CircuitBreaker
        );
        assert!(drain_payloads(&mut rx)
            .iter()
            .any(|p| matches!(p, RecoverySignalPayload::CircuitTripped { .. })));

        let after = coordinator
            .circuit_breakers()
            .snapshot("tool_call")
            .unwrap()
            .failure_count;
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn fallback_hook_absorbs_tool_failures() {
        let fallback = Arc::new(CountingFallback {
            calls: AtomicU32::new(0),
            succeed: true,
        });
        let (coordinator, _rx) = RecoveryCoordinator::new(RecoveryConfig::default());
        let coordinator = coordinator.with_fallback(fallback.clone());

        let details = ErrorDetails::new(ErrorCategory::ToolExecution, "tool exploded")
            .with_operation("tool_call");
        let outcome = coordinator.handle_error(details).await;

        assert!(outcome.recovered);
        assert_eq!(fallback.calls.load(Ordering::SeqCst), 1);
        // A recovered failure does not feed the breaker.
        assert!(coordinator.circuit_breakers().snapshot("tool_call").is_none());
    }

    #[tokio::test]
    async fn missing_hook_reports_not_recovered() {
        let (coordinator, _rx) = RecoveryCoordinator::new(RecoveryConfig::default());

        let details = ErrorDetails::new(ErrorCategory::ToolExecution, "tool exploded")
            .with_operation("tool_call");
        let outcome = coordinator.handle_error(details).await;

        assert!(!outcome.recovered);
        let snapshot = coordinator.circuit_breakers().snapshot("tool_call").unwrap();
        assert_eq!(snapshot.failure_count, 1);
        assert_eq!(snapshot.state, CircuitState::Closed);
    }

    #[tokio::test]
    async fn toggles_silence_notice_and_error_signals() {
        let (coordinator, mut rx) = RecoveryCoordinator::new(RecoveryConfig::default());

        let details = coordinator.classify("mystery");
        let options = HandleOptions {
            notify_user: false,
            emit_events: false,
            ..HandleOptions::default()
        };
        coordinator.handle_error_with(details, options).await;

        let payloads = drain_payloads(&mut rx);
        assert!(!payloads.iter().any(|p| matches!(
            p,
            RecoverySignalPayload::ErrorOccurred { .. }
                | RecoverySignalPayload::CategoryError { .. }
                | RecoverySignalPayload::SeverityError { .. }
                | RecoverySignalPayload::UserNotice { .. }
        )));
    }

    #[tokio::test]
    async fn error_log_keeps_most_recent_hundred() {
        let (coordinator, _rx) = RecoveryCoordinator::new(RecoveryConfig::default());

        for i in 0..105 {
            let details = ErrorDetails::new(ErrorCategory::Unknown, format!("oddity {i}"));
            coordinator.handle_error_with(details, quiet()).await;
        }

        let log = coordinator.recent_errors().await;
        assert_eq!(log.len(), 100);
        assert_eq!(log[0].original_error, "oddity 5");
        assert_eq!(log[99].original_error, "oddity 104");
    }
}

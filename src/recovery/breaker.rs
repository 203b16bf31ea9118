//! Per-operation circuit breakers.
//!
//! Each operation key gets its own breaker. Failures within a key
//! accumulate until the breaker opens; an open breaker tells the recovery
//! coordinator to pre-empt further attempts. A periodic sweep moves open
//! breakers to half-open once their reset timeout has elapsed, and
//! successive successes while half-open close them again.
//!
//! Breakers use [`tokio::time::Instant`] so the reset timeout and sweep
//! can be driven by the paused test clock.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::{debug, info, warn};

use super::signals::{RecoverySignal, RecoverySignalPayload};
use crate::config::RecoveryConfig;

// ============================================================================
// Breaker
// ============================================================================

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation; failures are being counted.
    Closed,
    /// Attempts are pre-empted until the reset timeout elapses.
    Open,
    /// Probing; successes accumulate toward closing.
    HalfOpen,
}

/// Failure gate for one operation key.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure: Option<Instant>,
    last_state_change: Instant,
    failure_threshold: u32,
    reset_timeout: Duration,
    success_threshold: u32,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(failure_threshold: u32, reset_timeout: Duration, success_threshold: u32) -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure: None,
            last_state_change: Instant::now(),
            failure_threshold,
            reset_timeout,
            success_threshold,
        }
    }

    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.state
    }

    #[must_use]
    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    #[must_use]
    pub fn success_count(&self) -> u32 {
        self.success_count
    }

    /// Count a failure. Returns true when this failure opened the circuit.
    pub fn record_failure(&mut self) -> bool {
        self.failure_count += 1;
        self.last_failure = Some(Instant::now());

        if self.state != CircuitState::Open && self.failure_count >= self.failure_threshold {
            self.state = CircuitState::Open;
            self.last_state_change = Instant::now();
            return true;
        }
        false
    }

    /// Count a success. Returns true when this success closed the circuit.
    pub fn record_success(&mut self) -> bool {
        self.failure_count = 0;

        if self.state == CircuitState::HalfOpen {
            self.success_count += 1;
            if self.success_count >= self.success_threshold {
                self.state = CircuitState::Closed;
                self.success_count = 0;
                self.last_state_change = Instant::now();
                return true;
            }
        }
        false
    }

    /// Move an open breaker to half-open once the reset timeout has
    /// elapsed since the last failure. Returns true on transition.
    pub fn try_half_open(&mut self) -> bool {
        if self.state != CircuitState::Open {
            return false;
        }
        let elapsed_since_failure = match self.last_failure {
            Some(at) => at.elapsed(),
            None => return false,
        };
        if elapsed_since_failure > self.reset_timeout {
            self.state = CircuitState::HalfOpen;
            self.success_count = 0;
            self.last_state_change = Instant::now();
            return true;
        }
        false
    }

    /// Force the breaker back to closed, clearing all counters.
    pub fn reset(&mut self) {
        self.state = CircuitState::Closed;
        self.failure_count = 0;
        self.success_count = 0;
        self.last_failure = None;
        self.last_state_change = Instant::now();
    }
}

/// Point-in-time breaker counters for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
}

// ============================================================================
// Registry
// ============================================================================

/// All breakers, keyed by operation, plus the sweep task that ages them.
pub struct CircuitBreakerRegistry {
    breakers: Arc<DashMap<String, CircuitBreaker>>,
    failure_threshold: u32,
    reset_timeout: Duration,
    success_threshold: u32,
    sweep_interval: Duration,
    signal_tx: mpsc::UnboundedSender<RecoverySignal>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    sweep_handle: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl CircuitBreakerRegistry {
    /// Create a registry. The sweep task is not started until
    /// [`start_sweep`](Self::start_sweep) is called.
    #[must_use]
    pub fn new(config: &RecoveryConfig, signal_tx: mpsc::UnboundedSender<RecoverySignal>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            breakers: Arc::new(DashMap::new()),
            failure_threshold: config.failure_threshold,
            reset_timeout: config.reset_timeout(),
            success_threshold: config.success_threshold,
            sweep_interval: config.sweep_interval(),
            signal_tx,
            shutdown_tx,
            shutdown_rx,
            sweep_handle: Arc::new(Mutex::new(None)),
        }
    }

    /// Spawn the periodic sweep that ages open breakers to half-open.
    pub async fn start_sweep(&self) {
        let breakers = Arc::clone(&self.breakers);
        let signal_tx = self.signal_tx.clone();
        let interval = self.sweep_interval;
        let mut shutdown_rx = self.shutdown_rx.clone();
        // Anchor the first tick here rather than at the task's first poll,
        // so a paused test clock advanced right after spawning still
        // reaches it.
        let start = Instant::now() + interval;

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(start, interval);
            debug!("Circuit breaker sweep started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        sweep_open_breakers(&breakers, &signal_tx);
                    }
                }
            }
            debug!("Circuit breaker sweep stopped");
        });

        *self.sweep_handle.lock().await = Some(handle);
    }

    /// Run one sweep pass immediately.
    pub fn sweep(&self) {
        sweep_open_breakers(&self.breakers, &self.signal_tx);
    }

    /// Count a failure against an operation, creating its breaker on first
    /// use.
    pub fn record_failure(&self, operation: &str) {
        let opened = {
            let mut breaker = self
                .breakers
                .entry(operation.to_string())
                .or_insert_with(|| {
                    CircuitBreaker::new(
                        self.failure_threshold,
                        self.reset_timeout,
                        self.success_threshold,
                    )
                });
            if breaker.record_failure() {
                Some(breaker.failure_count())
            } else {
                None
            }
        };

        if let Some(failure_count) = opened {
            warn!(operation, failure_count, "Circuit breaker opened");
            let _ = self.signal_tx.send(RecoverySignal::new(
                RecoverySignalPayload::CircuitOpened {
                    operation: operation.to_string(),
                    failure_count,
                },
            ));
        }
    }

    /// Count a success against an operation. Unknown operations are a
    /// no-op.
    pub fn record_success(&self, operation: &str) {
        let closed = match self.breakers.get_mut(operation) {
            Some(mut breaker) => breaker.record_success(),
            None => false,
        };

        if closed {
            info!(operation, "Circuit breaker closed");
            let _ = self.signal_tx.send(RecoverySignal::new(
                RecoverySignalPayload::CircuitClosed {
                    operation: operation.to_string(),
                },
            ));
        }
    }

    /// True when the operation's breaker is open.
    #[must_use]
    pub fn is_open(&self, operation: &str) -> bool {
        self.breakers
            .get(operation)
            .map(|b| b.state() == CircuitState::Open)
            .unwrap_or(false)
    }

    /// Current state of an operation's breaker, if one exists.
    #[must_use]
    pub fn state(&self, operation: &str) -> Option<CircuitState> {
        self.breakers.get(operation).map(|b| b.state())
    }

    /// Counters for an operation's breaker, if one exists.
    #[must_use]
    pub fn snapshot(&self, operation: &str) -> Option<BreakerSnapshot> {
        self.breakers.get(operation).map(|b| BreakerSnapshot {
            state: b.state(),
            failure_count: b.failure_count(),
            success_count: b.success_count(),
        })
    }

    /// Force-close an operation's breaker. Returns false if none exists.
    pub fn reset(&self, operation: &str) -> bool {
        let reset = match self.breakers.get_mut(operation) {
            Some(mut breaker) => {
                breaker.reset();
                true
            }
            None => false,
        };

        if reset {
            info!(operation, "Circuit breaker reset");
            let _ = self.signal_tx.send(RecoverySignal::new(
                RecoverySignalPayload::CircuitClosed {
                    operation: operation.to_string(),
                },
            ));
        }
        reset
    }

    /// Stop the sweep task and wait for it to finish.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.sweep_handle.lock().await.take() {
            if let Err(e) = handle.await {
                warn!("Circuit breaker sweep panicked during shutdown: {e}");
            }
        }
    }
}

fn sweep_open_breakers(
    breakers: &DashMap<String, CircuitBreaker>,
    signal_tx: &mpsc::UnboundedSender<RecoverySignal>,
) {
    let mut transitioned = Vec::new();
    for mut entry in breakers.iter_mut() {
        if entry.try_half_open() {
            transitioned.push(entry.key().clone());
        }
    }

    for operation in transitioned {
        debug!(operation = %operation, "Circuit breaker half-open");
        let _ = signal_tx.send(RecoverySignal::new(
            RecoverySignalPayload::CircuitHalfOpen { operation },
        ));
    }
}

//! Common test utilities.

use serde_json::{json, Value};
use tokio::sync::mpsc;

use durastream::config::{DeliveryMode, RecoveryConfig, StreamingConfig};
use durastream::session::{StreamSignal, StreamSignalPayload};

/// Streaming config that flushes every chunk as it arrives.
pub fn immediate_config() -> StreamingConfig {
    StreamingConfig {
        delivery: DeliveryMode::Immediate,
        ..StreamingConfig::default()
    }
}

/// Recovery config with millisecond windows and no jitter, so tests can
/// wait out retries and reset timeouts on a real clock.
pub fn fast_recovery_config() -> RecoveryConfig {
    RecoveryConfig {
        retry_base_delay_ms: 10,
        jitter_factor: 0.0,
        reset_timeout_ms: 50,
        sweep_interval_ms: 20,
        ..RecoveryConfig::default()
    }
}

/// A provider chunk carrying only text content.
pub fn text_chunk(text: &str) -> Value {
    json!({"choices": [{"delta": {"content": text}}]})
}

/// Pop every session signal currently queued on the receiver.
pub fn drain_payloads(rx: &mut mpsc::UnboundedReceiver<StreamSignal>) -> Vec<StreamSignalPayload> {
    let mut payloads = Vec::new();
    while let Ok(signal) = rx.try_recv() {
        payloads.push(signal.payload);
    }
    payloads
}

/// Yield to the runtime until spawned background work gets a chance to
/// run.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

//! The gateway heartbeater task.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Shared heartbeat bookkeeping between the session and its heartbeater.
#[derive(Debug)]
pub struct HeartbeatState {
    /// Latest dispatch sequence number observed by the receiver.
    pub sequence: AtomicU64,
    /// Whether any dispatch has been received (sequence 0 is valid).
    pub has_sequence: AtomicBool,
    /// Set by the receiver on heartbeat-ack, cleared on each beat.
    pub ack_received: AtomicBool,
}

impl HeartbeatState {
    pub fn new() -> Arc<HeartbeatState> {
        Arc::new(HeartbeatState {
            sequence: AtomicU64::new(0),
            has_sequence: AtomicBool::new(false),
            ack_received: AtomicBool::new(true),
        })
    }

    pub fn observe_sequence(&self, sequence: u64) {
        self.sequence.store(sequence, Ordering::Relaxed);
        self.has_sequence.store(true, Ordering::Relaxed);
    }

    pub fn last_sequence(&self) -> Option<u64> {
        self.has_sequence
            .load(Ordering::Relaxed)
            .then(|| self.sequence.load(Ordering::Relaxed))
    }
}

/// Handle used to stop a heartbeater on disconnect or resume.
pub struct HeartbeatHandle {
    shutdown: Option<oneshot::Sender<()>>,
}

impl HeartbeatHandle {
    pub fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

impl Drop for HeartbeatHandle {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

/// Spawn the heartbeater.
///
/// Each period is `interval × jitter` with jitter uniform in [0.1, 0.9],
/// re-rolled per beat. A beat whose predecessor was never acked stops the
/// task and asks the session (through `missed_ack`) to resume.
pub fn spawn(
    interval_ms: u64,
    state: Arc<HeartbeatState>,
    outbound: mpsc::UnboundedSender<serde_json::Value>,
    missed_ack: mpsc::UnboundedSender<()>,
) -> HeartbeatHandle {
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

    tokio::spawn(async move {
        loop {
            let jitter = rand::thread_rng().gen_range(0.1..0.9);
            let period = Duration::from_millis((interval_ms as f64 * jitter) as u64);
            tokio::select! {
                _ = tokio::time::sleep(period) => {}
                _ = &mut shutdown_rx => {
                    debug!("heartbeater stopped");
                    return;
                }
            }

            if !state.ack_received.swap(false, Ordering::Relaxed) {
                warn!("heartbeat ack missed, requesting resume");
                let _ = missed_ack.send(());
                return;
            }

            let beat = json!({
                "op": 1,
                "d": state.last_sequence(),
            });
            if outbound.send(beat).is_err() {
                return;
            }
            debug!("heartbeat sent");
        }
    });

    HeartbeatHandle {
        shutdown: Some(shutdown_tx),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn beats_and_detects_missed_ack() {
        let state = HeartbeatState::new();
        state.observe_sequence(42);
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
        let (missed_tx, mut missed_rx) = mpsc::unbounded_channel();
        let _handle = spawn(1000, state.clone(), outbound_tx, missed_tx);

        // first beat goes out with the current sequence
        tokio::time::advance(Duration::from_millis(950)).await;
        let beat = outbound_rx.recv().await.unwrap();
        assert_eq!(beat["op"], 1);
        assert_eq!(beat["d"], 42);

        // no ack arrives: the next beat reports the miss instead
        tokio::time::advance(Duration::from_millis(950)).await;
        missed_rx.recv().await.unwrap();
        assert!(outbound_rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn acked_heartbeats_continue() {
        let state = HeartbeatState::new();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
        let (missed_tx, mut missed_rx) = mpsc::unbounded_channel();
        let _handle = spawn(1000, state.clone(), outbound_tx, missed_tx);

        for _ in 0..3 {
            tokio::time::advance(Duration::from_millis(950)).await;
            assert!(outbound_rx.recv().await.is_some());
            state.ack_received.store(true, Ordering::Relaxed);
        }
        assert!(missed_rx.try_recv().is_err());
    }
}

//! Process-wide stop signal
//!
//! A `watch` channel flipped once from `false` to `true`. Every long-running
//! loop holds a [`StopSignal`] and races it against its suspension points.

use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: watch::Sender<bool>,
}

#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
}

pub fn stop_channel() -> (StopHandle, StopSignal) {
    let (tx, rx) = watch::channel(false);
    (StopHandle { tx }, StopSignal { rx })
}

impl StopHandle {
    /// Idempotent.
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    pub fn signal(&self) -> StopSignal {
        StopSignal {
            rx: self.tx.subscribe(),
        }
    }
}

impl StopSignal {
    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once stop is requested (immediately if it already was). A
    /// dropped handle counts as stop.
    pub async fn stopped(&mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Sleep for `dur` unless stopped first. Returns `false` when stopped.
    pub async fn sleep(&mut self, dur: Duration) -> bool {
        let interrupted = tokio::select! {
            _ = self.stopped() => true,
            _ = tokio::time::sleep(dur) => false,
        };
        !interrupted && !self.is_stopped()
    }
}

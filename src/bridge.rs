// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Single-slot hand-off from the camera's notification context to the
//! capture thread.
//!
//! The camera invokes its completion callback on a thread we do not
//! control. The callback only stores the finished request in the slot and
//! opens the gate with [`Notifier::notify`]; everything else happens on the
//! consumer side after [`CompletionGate::wait`] returns. The slot is a
//! bounded channel of capacity one, which also gives the consumer a
//! happens-before edge on the stored request.
//!
//! One gate serves one capture: waiting consumes it. A notification sent
//! before the wait is kept in the slot and observed by the wait.

use crate::error::{CaptureError, Result};
use kanal::{ReceiveErrorTimeout, Receiver, Sender};
use std::time::Duration;
use tracing::warn;

/// Creates a connected notifier/gate pair with an empty slot.
pub fn completion_bridge<T>() -> (Notifier<T>, CompletionGate<T>) {
    let (tx, rx) = kanal::bounded(1);
    (Notifier { tx }, CompletionGate { rx })
}

/// Producer half, handed to the camera's completion callback.
pub struct Notifier<T> {
    tx: Sender<T>,
}

impl<T> Clone for Notifier<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> Notifier<T> {
    /// Stores `value` and opens the gate. Never blocks.
    ///
    /// Returns `false` when the slot is already occupied or the gate was
    /// dropped; the value is discarded in both cases.
    pub fn notify(&self, value: T) -> bool {
        match self.tx.try_send(value) {
            Ok(true) => true,
            Ok(false) => {
                warn!("completion slot already full, dropping notification");
                false
            }
            Err(_) => {
                warn!("completion gate closed, dropping notification");
                false
            }
        }
    }
}

/// Consumer half.
pub struct CompletionGate<T> {
    rx: Receiver<T>,
}

impl<T> CompletionGate<T> {
    /// Blocks until the notifier fires and returns the stored value.
    ///
    /// Fails with `CompletionLost` if every notifier was dropped without
    /// firing.
    pub fn wait(self) -> Result<T> {
        self.rx.recv().map_err(|_| CaptureError::CompletionLost)
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`.
    pub fn wait_timeout(self, timeout: Duration) -> Result<T> {
        match self.rx.recv_timeout(timeout) {
            Ok(value) => Ok(value),
            Err(ReceiveErrorTimeout::Timeout) => Err(CaptureError::TimedOut(timeout)),
            Err(_) => Err(CaptureError::CompletionLost),
        }
    }

    /// Waits with the optional timeout, blocking indefinitely without one.
    pub fn wait_for(self, timeout: Option<Duration>) -> Result<T> {
        match timeout {
            Some(timeout) => self.wait_timeout(timeout),
            None => self.wait(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        thread,
        time::{Duration, Instant},
    };

    #[test]
    fn test_wait_blocks_until_signalled() {
        let (notifier, gate) = completion_bridge::<u64>();
        let start = Instant::now();
        let producer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            notifier.notify(7)
        });

        assert_eq!(gate.wait().unwrap(), 7);
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert!(producer.join().unwrap());
    }

    #[test]
    fn test_signal_before_wait_is_not_lost() {
        let (notifier, gate) = completion_bridge::<&'static str>();
        assert!(notifier.notify("done"));
        assert_eq!(gate.wait().unwrap(), "done");
    }

    #[test]
    fn test_single_slot() {
        let (notifier, gate) = completion_bridge::<u32>();
        assert!(notifier.notify(1));
        assert!(!notifier.notify(2));
        assert_eq!(gate.wait().unwrap(), 1);
    }

    #[test]
    fn test_no_signal_times_out() {
        let (_notifier, gate) = completion_bridge::<u32>();
        let err = gate.wait_timeout(Duration::from_millis(20)).unwrap_err();
        assert!(matches!(err, CaptureError::TimedOut(_)));
    }

    #[test]
    fn test_dropped_notifier_is_lost() {
        let (notifier, gate) = completion_bridge::<u32>();
        drop(notifier);
        assert!(matches!(gate.wait(), Err(CaptureError::CompletionLost)));
    }

    #[test]
    fn test_notify_after_gate_dropped() {
        let (notifier, gate) = completion_bridge::<u32>();
        drop(gate);
        assert!(!notifier.notify(3));
    }
}

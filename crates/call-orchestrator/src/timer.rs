//! Cancellable one-shot timers delivered into the worker
//!
//! Every wait in the orchestrator (registration retry, notification tick, route
//! verification) is a spawned `tokio::time::sleep` that reports back into the worker
//! as a [`TimerEvent`]. A [`TimerSlot`] owns at most one such task: re-arming aborts
//! the previous task, and each expiry carries the generation it was armed with so an
//! expiry that was already in flight when the slot was re-armed or cancelled is
//! recognized as stale and dropped.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::trace;

/// Timer expiries, tagged with the generation of the arming that produced them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    RegistrationRetryDue { generation: u64 },
    NotificationTick { generation: u64 },
    RouteVerificationDue { generation: u64 },
}

pub type TimerSender = mpsc::UnboundedSender<TimerEvent>;
pub type TimerReceiver = mpsc::UnboundedReceiver<TimerEvent>;

pub fn timer_channel() -> (TimerSender, TimerReceiver) {
    mpsc::unbounded_channel()
}

struct ArmedTimer {
    generation: u64,
    deadline: Instant,
    task: JoinHandle<()>,
}

/// A slot holding at most one pending timer
pub struct TimerSlot {
    name: &'static str,
    generation: u64,
    armed: Option<ArmedTimer>,
}

impl TimerSlot {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            generation: 0,
            armed: None,
        }
    }

    /// Arm the slot, cancelling whatever was pending. Returns the new generation.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn arm<F>(&mut self, delay: Duration, sender: &TimerSender, event: F) -> u64
    where
        F: FnOnce(u64) -> TimerEvent,
    {
        self.cancel();
        self.generation += 1;
        let generation = self.generation;
        let expiry = event(generation);
        let sender = sender.clone();

        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // The worker may already be gone during shutdown.
            let _ = sender.send(expiry);
        });

        trace!(timer = self.name, generation, delay_ms = delay.as_millis() as u64, "Timer armed");
        self.armed = Some(ArmedTimer {
            generation,
            deadline: Instant::now() + delay,
            task,
        });
        generation
    }

    pub fn cancel(&mut self) {
        if let Some(armed) = self.armed.take() {
            armed.task.abort();
            trace!(timer = self.name, generation = armed.generation, "Timer cancelled");
        }
    }

    /// Consume an expiry. Returns true only for the expiry of the currently armed
    /// generation, which also disarms the slot.
    pub fn accept(&mut self, generation: u64) -> bool {
        match &self.armed {
            Some(armed) if armed.generation == generation => {
                self.armed = None;
                true
            }
            _ => {
                trace!(timer = self.name, generation, "Stale timer expiry dropped");
                false
            }
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.armed.as_ref().map(|armed| armed.deadline)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl Drop for TimerSlot {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for TimerSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerSlot")
            .field("name", &self.name)
            .field("generation", &self.generation)
            .field("armed", &self.is_armed())
            .finish()
    }
}

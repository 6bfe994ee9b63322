//! Idle detection for signed-in sessions.
//!
//! One timer per session. Interaction signals push its deadline forward
//! synchronously through a `watch` channel, so the timer task never needs to
//! be respawned while the user is active. When the deadline passes the task
//! sends a single `IdleTimeout` and exits.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use super::event::{Generation, SessionEvent};

/// Classes of user interaction that count as activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivitySignal {
    PointerMove,
    KeyPress,
    Touch,
    Scroll,
    Click,
}

impl ActivitySignal {
    pub const ALL: [ActivitySignal; 5] = [
        ActivitySignal::PointerMove,
        ActivitySignal::KeyPress,
        ActivitySignal::Touch,
        ActivitySignal::Scroll,
        ActivitySignal::Click,
    ];

    /// Map a DOM event name onto a signal class
    pub fn from_event_name(name: &str) -> Option<Self> {
        match name {
            "mousemove" | "pointermove" => Some(ActivitySignal::PointerMove),
            "keydown" | "keypress" => Some(ActivitySignal::KeyPress),
            "touchstart" | "touchmove" => Some(ActivitySignal::Touch),
            "scroll" | "wheel" => Some(ActivitySignal::Scroll),
            "click" | "mousedown" => Some(ActivitySignal::Click),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct Armed {
    generation: Generation,
    deadline: watch::Sender<Instant>,
    tx: mpsc::Sender<SessionEvent>,
    timer: JoinHandle<()>,
}

#[derive(Debug)]
pub struct InactivityMonitor {
    idle_timeout: Duration,
    armed: Option<Armed>,
}

impl InactivityMonitor {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            idle_timeout,
            armed: None,
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Start watching for `generation`. Any previous timer is torn down first.
    pub fn attach(&mut self, generation: Generation, tx: mpsc::Sender<SessionEvent>) {
        self.detach();
        let (deadline, rx) = watch::channel(Instant::now() + self.idle_timeout);
        let timer = tokio::spawn(run_timer(rx, generation, tx.clone()));
        self.armed = Some(Armed {
            generation,
            deadline,
            tx,
            timer,
        });
        debug!(generation = %generation, idle_secs = self.idle_timeout.as_secs(), "Inactivity monitor attached");
    }

    /// Record an interaction. Returns false when the monitor is detached and
    /// the signal was ignored.
    pub fn observe(&mut self, signal: ActivitySignal) -> bool {
        match &self.armed {
            Some(armed) => {
                armed.deadline.send_replace(Instant::now() + self.idle_timeout);
                debug!(?signal, "Activity observed");
                true
            }
            None => false,
        }
    }

    pub fn is_attached(&self) -> bool {
        self.armed.is_some()
    }

    pub fn generation(&self) -> Option<Generation> {
        self.armed.as_ref().map(|a| a.generation)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.armed.as_ref().map(|a| *a.deadline.borrow())
    }

    /// True when attached and the idle deadline has passed
    pub fn has_elapsed(&self) -> bool {
        self.deadline().is_some_and(|d| d <= Instant::now())
    }

    /// Restart the timer after a firing that activity made stale. Keeps the
    /// current deadline and replaces whatever task is there, so exactly one
    /// timer runs afterwards. No-op if detached.
    pub fn rearm(&mut self) {
        if let Some(armed) = &mut self.armed {
            armed.timer.abort();
            armed.timer = tokio::spawn(run_timer(
                armed.deadline.subscribe(),
                armed.generation,
                armed.tx.clone(),
            ));
            debug!(generation = %armed.generation, "Inactivity timer re-armed");
        }
    }

    /// Stop watching. Safe to call repeatedly.
    pub fn detach(&mut self) {
        if let Some(armed) = self.armed.take() {
            armed.timer.abort();
            debug!(generation = %armed.generation, "Inactivity monitor detached");
        }
    }
}

impl Drop for InactivityMonitor {
    fn drop(&mut self) {
        self.detach();
    }
}

async fn run_timer(
    mut deadline: watch::Receiver<Instant>,
    generation: Generation,
    tx: mpsc::Sender<SessionEvent>,
) {
    loop {
        let current = *deadline.borrow_and_update();
        tokio::select! {
            _ = tokio::time::sleep_until(current) => {
                // Activity may have landed after the sleep completed
                if *deadline.borrow() > Instant::now() {
                    continue;
                }
                let _ = tx.send(SessionEvent::IdleTimeout { generation }).await;
                return;
            }
            changed = deadline.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

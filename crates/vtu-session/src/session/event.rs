use std::fmt;

use crate::api::ApiError;
use crate::models::Profile;

use super::validator::VerifyOutcome;

/// Counter identifying one signed-in session. Every transition into or out of
/// a signed-in state advances it; async results carrying an older generation
/// are stale and get discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Generation(u64);

impl Generation {
    pub fn next(self) -> Self {
        Generation(self.0 + 1)
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Results and timer firings delivered to the controller by its background
/// tasks, each tagged with the generation it was issued under.
#[derive(Debug)]
pub enum SessionEvent {
    /// Background profile fetch finished
    ProfileLoaded {
        generation: Generation,
        result: Result<Profile, ApiError>,
    },
    /// Periodic re-check interval elapsed
    VerifyDue { generation: Generation },
    /// Remote verification finished
    Verified {
        generation: Generation,
        outcome: VerifyOutcome,
    },
    /// Inactivity monitor's timer fired
    IdleTimeout { generation: Generation },
}

impl SessionEvent {
    pub fn generation(&self) -> Generation {
        match self {
            SessionEvent::ProfileLoaded { generation, .. }
            | SessionEvent::VerifyDue { generation }
            | SessionEvent::Verified { generation, .. }
            | SessionEvent::IdleTimeout { generation } => *generation,
        }
    }

    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::ProfileLoaded { .. } => "profile_loaded",
            SessionEvent::VerifyDue { .. } => "verify_due",
            SessionEvent::Verified { .. } => "verified",
            SessionEvent::IdleTimeout { .. } => "idle_timeout",
        }
    }
}

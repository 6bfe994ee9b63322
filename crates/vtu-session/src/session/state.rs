use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::Profile;
use crate::store::PersistenceMode;

use super::credential::Credential;

/// Authentication state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum AuthState {
    /// Process start, before the stored credential has been examined
    Bootstrapping,
    Unauthenticated,
    Authenticated,
    /// Signed in, remote verification in flight
    Validating,
    /// Signed in, credential expiry is close
    ExpiringSoon,
    /// Tearing down a session
    LoggingOut,
}

impl AuthState {
    /// States that hold a credential
    pub fn is_signed_in(&self) -> bool {
        matches!(
            self,
            AuthState::Authenticated | AuthState::Validating | AuthState::ExpiringSoon
        )
    }

    /// States the navigation guard may act on
    pub fn is_settled(&self) -> bool {
        !matches!(self, AuthState::Bootstrapping | AuthState::LoggingOut)
    }
}

impl fmt::Display for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AuthState::Bootstrapping => "bootstrapping",
            AuthState::Unauthenticated => "unauthenticated",
            AuthState::Authenticated => "authenticated",
            AuthState::Validating => "validating",
            AuthState::ExpiringSoon => "expiring soon",
            AuthState::LoggingOut => "logging out",
        };
        write!(f, "{}", name)
    }
}

/// Why a session was ended without the user asking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum LogoutReason {
    Inactivity,
    Expired,
}

impl LogoutReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogoutReason::Inactivity => "inactivity",
            LogoutReason::Expired => "expired",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "inactivity" => Some(LogoutReason::Inactivity),
            "expired" => Some(LogoutReason::Expired),
            _ => None,
        }
    }

    /// Message the login surface shows for this reason
    pub fn message(&self) -> &'static str {
        match self {
            LogoutReason::Inactivity => "You were signed out after a period of inactivity.",
            LogoutReason::Expired => "Your session has expired. Please sign in again.",
        }
    }
}

/// Navigation the host should perform after a session ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub path: String,
    /// `None` for a manual logout
    pub reason: Option<LogoutReason>,
}

impl Redirect {
    pub fn to_login(login_route: &str, reason: Option<LogoutReason>) -> Self {
        Self {
            path: login_route.to_string(),
            reason,
        }
    }

    /// Path with the `reason` query parameter, e.g. `/login?reason=inactivity`
    pub fn url(&self) -> String {
        match self.reason {
            Some(reason) => format!("{}?reason={}", self.path, reason.as_str()),
            None => self.path.clone(),
        }
    }
}

/// Live session aggregate. Only the controller mutates it.
#[derive(Debug, Clone)]
pub struct Session {
    pub state: AuthState,
    pub credential: Option<Credential>,
    pub user: Option<Profile>,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub persistence_mode: Option<PersistenceMode>,
    /// Persistence failed at login; the session lives in memory only
    pub storage_degraded: bool,
}

impl Default for Session {
    fn default() -> Self {
        Self::with_state(AuthState::Bootstrapping)
    }
}

impl Session {
    pub(crate) fn with_state(state: AuthState) -> Self {
        Self {
            state,
            credential: None,
            user: None,
            last_activity_at: None,
            persistence_mode: None,
            storage_degraded: false,
        }
    }

    pub(crate) fn signed_in(
        state: AuthState,
        credential: Credential,
        user: Option<Profile>,
        mode: PersistenceMode,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            state,
            credential: Some(credential),
            user,
            last_activity_at: Some(now),
            persistence_mode: Some(mode),
            storage_degraded: false,
        }
    }

    /// Advance `last_activity_at`, never moving it backwards
    pub(crate) fn touch(&mut self, now: DateTime<Utc>) -> DateTime<Utc> {
        let next = match self.last_activity_at {
            Some(prev) if prev > now => prev,
            _ => now,
        };
        self.last_activity_at = Some(next);
        next
    }

    /// A credential is held exactly when the state is a signed-in state
    pub fn invariants_hold(&self) -> bool {
        self.credential.is_some() == self.state.is_signed_in()
    }

    pub fn token(&self) -> Option<&str> {
        self.credential.as_ref().map(|c| c.token())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_signed_in_states() {
        assert!(AuthState::Authenticated.is_signed_in());
        assert!(AuthState::Validating.is_signed_in());
        assert!(AuthState::ExpiringSoon.is_signed_in());
        assert!(!AuthState::Bootstrapping.is_signed_in());
        assert!(!AuthState::LoggingOut.is_signed_in());
        assert!(!AuthState::Unauthenticated.is_signed_in());
        assert!(!AuthState::Bootstrapping.is_settled());
        assert!(AuthState::Unauthenticated.is_settled());
    }

    #[test]
    fn test_redirect_url() {
        let forced = Redirect::to_login("/login", Some(LogoutReason::Inactivity));
        assert_eq!(forced.url(), "/login?reason=inactivity");
        let expired = Redirect::to_login("/login", Some(LogoutReason::Expired));
        assert_eq!(expired.url(), "/login?reason=expired");
        let manual = Redirect::to_login("/login", None);
        assert_eq!(manual.url(), "/login");
    }

    #[test]
    fn test_logout_reason_round_trips_query_value() {
        for reason in [LogoutReason::Inactivity, LogoutReason::Expired] {
            assert_eq!(LogoutReason::parse(reason.as_str()), Some(reason));
        }
        assert_eq!(LogoutReason::parse("manual"), None);
    }

    #[test]
    fn test_touch_is_monotonic() {
        let mut session = Session::with_state(AuthState::Authenticated);
        let now = Utc::now();
        assert_eq!(session.touch(now), now);
        // Clock stepped backwards
        assert_eq!(session.touch(now - Duration::seconds(30)), now);
        let later = now + Duration::seconds(5);
        assert_eq!(session.touch(later), later);
    }

    #[test]
    fn test_default_session_is_bootstrapping_without_credential() {
        let session = Session::default();
        assert_eq!(session.state, AuthState::Bootstrapping);
        assert!(session.invariants_hold());
        assert!(session.token().is_none());
    }
}

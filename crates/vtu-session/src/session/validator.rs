//! Credential validation, local and remote.
//!
//! Local classification is pure and fail-closed: anything that can't be
//! decoded counts as expired. Remote verification separates "the server said
//! no" from "we couldn't find out", and only the former is fatal.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::api::{ApiError, AuthApi};

use super::credential::{Credential, CredentialError};
use super::event::{Generation, SessionEvent};

/// Shortest allowed re-check interval
const MIN_VERIFY_INTERVAL: Duration = Duration::from_secs(1);

/// Local view of a stored token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenStatus {
    Valid(Credential),
    Expired,
    Malformed(CredentialError),
}

/// What the server said about a credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// Server honoured the credential
    Valid,
    /// Server explicitly rejected the credential (401)
    Invalid,
    /// Network failure, timeout, or server fault. Retry later.
    Indeterminate(String),
}

impl VerifyOutcome {
    pub fn from_result(result: Result<(), ApiError>) -> Self {
        match result {
            Ok(()) => VerifyOutcome::Valid,
            Err(e) if e.is_indeterminate() => VerifyOutcome::Indeterminate(e.to_string()),
            Err(_) => VerifyOutcome::Invalid,
        }
    }
}

/// Classify `token` at `now` without touching the network.
pub fn classify(token: &str, now: DateTime<Utc>) -> TokenStatus {
    match Credential::parse(token) {
        Ok(credential) if credential.is_expired_at(now) => TokenStatus::Expired,
        Ok(credential) => TokenStatus::Valid(credential),
        Err(e) => TokenStatus::Malformed(e),
    }
}

/// Fail-closed expiry check: malformed tokens are expired.
pub fn is_expired(token: &str, now: DateTime<Utc>) -> bool {
    !matches!(classify(token, now), TokenStatus::Valid(_))
}

/// Remote half of validation. Clone is cheap - the backend is shared.
#[derive(Clone)]
pub struct TokenValidator {
    api: Arc<dyn AuthApi>,
    request_timeout: Duration,
}

impl TokenValidator {
    pub fn new(api: Arc<dyn AuthApi>, request_timeout: Duration) -> Self {
        Self {
            api,
            request_timeout,
        }
    }

    /// Ask the server about `credential`. Never fails: exceeding the request
    /// timeout is an indeterminate outcome like any other transport failure.
    pub async fn verify_remotely(&self, credential: &Credential) -> VerifyOutcome {
        let result = match tokio::time::timeout(
            self.request_timeout,
            self.api.verify(credential.token()),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ApiError::Timeout),
        };

        let outcome = VerifyOutcome::from_result(result);
        match &outcome {
            VerifyOutcome::Valid => debug!("Remote verification confirmed credential"),
            VerifyOutcome::Invalid => warn!("Server rejected credential"),
            VerifyOutcome::Indeterminate(reason) => {
                warn!(reason = %reason, "Remote verification indeterminate, will retry")
            }
        }
        outcome
    }
}

/// Periodic re-check driver. Emits `VerifyDue` on a fixed interval until
/// stopped; at most one ticker task is alive at a time.
#[derive(Debug, Default)]
pub struct VerificationTicker {
    handle: Option<JoinHandle<()>>,
}

impl VerificationTicker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start ticking for `generation`, replacing any running ticker.
    pub fn start(
        &mut self,
        period: Duration,
        generation: Generation,
        tx: mpsc::Sender<SessionEvent>,
    ) {
        self.stop();
        let period = period.max(MIN_VERIFY_INTERVAL);
        self.handle = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if tx.send(SessionEvent::VerifyDue { generation }).await.is_err() {
                    break;
                }
            }
        }));
        debug!(generation = %generation, period_secs = period.as_secs(), "Verification ticker started");
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            debug!("Verification ticker stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for VerificationTicker {
    fn drop(&mut self) {
        self.stop();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LoginRequest, LoginResponse, Profile};
    use crate::session::credential::tests::{token_expiring_in, token_with_payload};
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;

    /// Backend whose verify endpoint behaves according to `mode`
    struct VerifyOnly {
        mode: &'static str,
    }

    #[async_trait]
    impl AuthApi for VerifyOnly {
        async fn login(&self, _request: &LoginRequest) -> Result<LoginResponse, ApiError> {
            Err(ApiError::Unauthorized)
        }

        async fn fetch_profile(&self, _token: &str) -> Result<Profile, ApiError> {
            Err(ApiError::Unauthorized)
        }

        async fn verify(&self, _token: &str) -> Result<(), ApiError> {
            match self.mode {
                "ok" => Ok(()),
                "401" => Err(ApiError::Unauthorized),
                "503" => Err(ApiError::ServerError("maintenance".to_string())),
                _ => {
                    // Hang until the caller's timeout fires
                    std::future::pending::<()>().await;
                    Ok(())
                }
            }
        }

        async fn logout(&self, _token: &str) -> Result<(), ApiError> {
            Ok(())
        }
    }

    fn validator(mode: &'static str) -> TokenValidator {
        TokenValidator::new(Arc::new(VerifyOnly { mode }), Duration::from_secs(30))
    }

    fn credential() -> Credential {
        Credential::parse(token_expiring_in(ChronoDuration::hours(1))).unwrap()
    }

    // -------------------------------------------------------------------------
    // Local classification
    // -------------------------------------------------------------------------

    #[test]
    fn test_unparseable_tokens_are_expired_at_any_time() {
        let garbage: [&str; 7] = [
            "",
            "not-a-token",
            "a.b",
            "h.%%%.s",
            "h.e30.s.extra",
            &token_with_payload("42"),
            &token_with_payload(r#"{"exp":"soon"}"#),
        ];
        let instants = [
            DateTime::<Utc>::MIN_UTC,
            DateTime::from_timestamp(0, 0).unwrap(),
            Utc::now(),
            DateTime::<Utc>::MAX_UTC,
        ];
        for token in garbage {
            for now in instants {
                assert!(is_expired(token, now), "{:?} should be expired at {}", token, now);
            }
        }
    }

    #[test]
    fn test_classify_valid_and_expired() {
        let now = Utc::now();
        let fresh = token_expiring_in(ChronoDuration::minutes(10));
        let stale = token_expiring_in(ChronoDuration::minutes(-10));

        assert!(matches!(classify(&fresh, now), TokenStatus::Valid(_)));
        assert_eq!(classify(&stale, now), TokenStatus::Expired);
        assert!(!is_expired(&fresh, now));
        assert!(is_expired(&stale, now));
    }

    #[test]
    fn test_token_without_exp_defers_to_server() {
        let token = token_with_payload(r#"{"sub":"abc"}"#);
        assert!(!is_expired(&token, DateTime::<Utc>::MAX_UTC));
    }

    // -------------------------------------------------------------------------
    // Remote verification
    // -------------------------------------------------------------------------

    #[test]
    fn test_outcome_from_result() {
        assert_eq!(VerifyOutcome::from_result(Ok(())), VerifyOutcome::Valid);
        assert_eq!(
            VerifyOutcome::from_result(Err(ApiError::Unauthorized)),
            VerifyOutcome::Invalid
        );
        assert!(matches!(
            VerifyOutcome::from_result(Err(ApiError::RateLimited)),
            VerifyOutcome::Indeterminate(_)
        ));
    }

    #[tokio::test]
    async fn test_verify_remotely_outcomes() {
        let credential = credential();
        assert_eq!(validator("ok").verify_remotely(&credential).await, VerifyOutcome::Valid);
        assert_eq!(validator("401").verify_remotely(&credential).await, VerifyOutcome::Invalid);
        assert!(matches!(
            validator("503").verify_remotely(&credential).await,
            VerifyOutcome::Indeterminate(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_verify_remotely_timeout_is_indeterminate() {
        let outcome = validator("hang").verify_remotely(&credential()).await;
        assert!(matches!(outcome, VerifyOutcome::Indeterminate(_)));
    }

    // -------------------------------------------------------------------------
    // Ticker
    // -------------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_ticker_emits_tagged_events_until_stopped() {
        let (tx, mut rx) = mpsc::channel(8);
        let generation = Generation::default().next();
        let mut ticker = VerificationTicker::new();
        ticker.start(Duration::from_secs(60), generation, tx);
        assert!(ticker.is_running());

        let start = Instant::now();
        for _ in 0..2 {
            match rx.recv().await {
                Some(SessionEvent::VerifyDue { generation: g }) => assert_eq!(g, generation),
                other => panic!("unexpected {:?}", other),
            }
        }
        assert!(start.elapsed() >= Duration::from_secs(120));

        ticker.stop();
        assert!(!ticker.is_running());
        // Sender dropped with the aborted task
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restarting_ticker_replaces_previous() {
        let (tx, mut rx) = mpsc::channel(8);
        let first = Generation::default().next();
        let second = first.next();
        let mut ticker = VerificationTicker::new();
        ticker.start(Duration::from_secs(30), first, tx.clone());
        ticker.start(Duration::from_secs(30), second, tx);

        match rx.recv().await {
            Some(SessionEvent::VerifyDue { generation }) => assert_eq!(generation, second),
            other => panic!("unexpected {:?}", other),
        }
    }
}

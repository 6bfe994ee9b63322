//! Session state machine.
//!
//! `SessionController` is the only writer of `Session` and of the token store.
//! It is driven by the host's event loop: direct calls for user actions
//! (`login`, `logout`, `record_activity`) and `handle_event` for results coming
//! back from its own background tasks (profile fetch, periodic verification,
//! inactivity timer). Every background result carries the generation it was
//! issued under and is dropped if the session has moved on since.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::api::{ApiError, AuthApi, DEFAULT_REQUEST_TIMEOUT_SECS};
use crate::models::{LoginRequest, Profile};
use crate::store::{PersistenceMode, TokenStore};

use super::credential::Credential;
use super::event::{Generation, SessionEvent};
use super::inactivity::{ActivitySignal, InactivityMonitor};
use super::state::{AuthState, LogoutReason, Redirect, Session};
use super::validator::{self, TokenStatus, TokenValidator, VerificationTicker, VerifyOutcome};
use super::SessionError;

// ============================================================================
// Constants
// ============================================================================

/// Buffer size for the background event channel.
/// At most a ticker, an idle timer, and a couple of requests are live at once.
const CHANNEL_BUFFER_SIZE: usize = 32;

/// Default idle duration before a forced logout (15 minutes)
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 900;

/// Default interval between remote verifications
pub const DEFAULT_VERIFY_INTERVAL_SECS: u64 = 60;

/// Default window before expiry in which the session reports `ExpiringSoon`
pub const DEFAULT_EXPIRY_WARNING_SECS: u64 = 300;

/// Timing and routing knobs for a controller.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub idle_timeout: Duration,
    pub verify_interval: Duration,
    pub request_timeout: Duration,
    pub expiry_warning: Duration,
    pub login_route: String,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
            verify_interval: Duration::from_secs(DEFAULT_VERIFY_INTERVAL_SECS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            expiry_warning: Duration::from_secs(DEFAULT_EXPIRY_WARNING_SECS),
            login_route: "/login".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Created,
    Running,
    Disposed,
}

pub struct SessionController {
    options: SessionOptions,
    store: TokenStore,
    api: Arc<dyn AuthApi>,
    validator: TokenValidator,
    monitor: InactivityMonitor,
    ticker: VerificationTicker,

    session: Session,
    generation: Generation,
    lifecycle: Lifecycle,

    events_tx: mpsc::Sender<SessionEvent>,
    events_rx: mpsc::Receiver<SessionEvent>,
    in_flight: JoinSet<()>,
    verification_in_flight: bool,
    indeterminate_streak: u32,
    activity_dirty: bool,

    pending_redirect: Option<Redirect>,
    state_tx: watch::Sender<AuthState>,
}

impl SessionController {
    pub fn new(options: SessionOptions, store: TokenStore, api: Arc<dyn AuthApi>) -> Self {
        let (events_tx, events_rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
        let (state_tx, _) = watch::channel(AuthState::Bootstrapping);
        let validator = TokenValidator::new(api.clone(), options.request_timeout);
        let monitor = InactivityMonitor::new(options.idle_timeout);

        Self {
            options,
            store,
            api,
            validator,
            monitor,
            ticker: VerificationTicker::new(),
            session: Session::default(),
            generation: Generation::default(),
            lifecycle: Lifecycle::Created,
            events_tx,
            events_rx,
            in_flight: JoinSet::new(),
            verification_in_flight: false,
            indeterminate_streak: 0,
            activity_dirty: false,
            pending_redirect: None,
            state_tx,
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn state(&self) -> AuthState {
        self.session.state
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Watch the auth state, e.g. to drive a navigation guard
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state_tx.subscribe()
    }

    /// Redirect left behind by the last session end, if not yet consumed
    pub fn pending_redirect(&self) -> Option<&Redirect> {
        self.pending_redirect.as_ref()
    }

    pub fn take_redirect(&mut self) -> Option<Redirect> {
        self.pending_redirect.take()
    }

    pub fn is_disposed(&self) -> bool {
        self.lifecycle == Lifecycle::Disposed
    }

    /// Credential to authorize backend requests with
    pub fn credential(&self) -> Result<&Credential, SessionError> {
        self.session
            .credential
            .as_ref()
            .ok_or(SessionError::CredentialMissing)
    }

    /// `StorageUnavailable` when the signed-in session could not be persisted
    /// and will end with this process.
    pub fn persistence_status(&self) -> Result<(), SessionError> {
        match self.session.persistence_mode {
            Some(mode) if self.session.storage_degraded => Err(SessionError::StorageUnavailable(
                format!("{} storage did not keep the credential", mode),
            )),
            _ => Ok(()),
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Hydrate from the token store. Runs once; later calls return the
    /// current state untouched.
    pub async fn init(&mut self) -> AuthState {
        if self.lifecycle != Lifecycle::Created {
            warn!(state = %self.session.state, "Session controller already initialized");
            return self.session.state;
        }
        self.lifecycle = Lifecycle::Running;
        self.bootstrap().await;
        self.session.state
    }

    /// Release timers, tasks, and listeners. The persisted credential stays
    /// so the next process can hydrate from it.
    pub async fn dispose(&mut self) {
        if self.lifecycle == Lifecycle::Disposed {
            return;
        }
        self.flush_activity().await;
        self.stop_background();
        self.lifecycle = Lifecycle::Disposed;
        info!("Session controller disposed");
    }

    async fn bootstrap(&mut self) {
        let Some(stored) = self.store.load_credential().await else {
            debug!("No stored credential, starting unauthenticated");
            self.settle_unauthenticated(None);
            return;
        };

        let now = Utc::now();
        let credential = match validator::classify(&stored.token, now) {
            TokenStatus::Valid(credential) => credential,
            TokenStatus::Expired => {
                info!(tier = %stored.mode, "Stored credential expired");
                self.store.clear(stored.mode).await;
                self.settle_unauthenticated(None);
                return;
            }
            TokenStatus::Malformed(e) => {
                warn!(error = %e, tier = %stored.mode, "Stored credential malformed, discarding");
                self.store.clear(stored.mode).await;
                self.settle_unauthenticated(None);
                return;
            }
        };

        if let Some(last_activity) = stored.last_activity {
            if now - last_activity >= to_chrono(self.options.idle_timeout) {
                info!(%last_activity, "Idle timeout elapsed while the app was closed");
                self.store.clear(stored.mode).await;
                self.settle_unauthenticated(Some(LogoutReason::Inactivity));
                return;
            }
        }

        self.generation = self.generation.next();
        let state = self.signed_in_state(&credential, now);
        self.session = Session::signed_in(state, credential, None, stored.mode, now);
        self.activity_dirty = true;
        self.flush_activity().await;
        self.start_watchers();
        self.spawn_profile_fetch();
        self.publish();
        info!(tier = %stored.mode, generation = %self.generation, "Session restored");
    }

    // =========================================================================
    // User actions
    // =========================================================================

    /// Exchange credentials for a session. The credential is written to the
    /// tier picked by `remember` and read back before this returns.
    pub async fn login(&mut self, request: LoginRequest, remember: bool) -> Result<(), SessionError> {
        if self.lifecycle == Lifecycle::Disposed {
            return Err(SessionError::Disposed);
        }
        if self.session.state != AuthState::Unauthenticated {
            return Err(SessionError::InvalidTransition(self.session.state));
        }
        if request.email.trim().is_empty() || request.password.is_empty() {
            return Err(SessionError::MissingCredentials);
        }

        let response = match tokio::time::timeout(
            self.options.request_timeout,
            self.api.login(&request),
        )
        .await
        {
            Ok(Ok(response)) => response,
            Ok(Err(ApiError::Unauthorized)) => {
                info!(email = %request.email, "Login rejected");
                return Err(SessionError::Unauthorized);
            }
            Ok(Err(ApiError::InvalidResponse(msg))) => {
                warn!(error = %msg, "Login response did not match schema");
                return Err(SessionError::CredentialMalformed(msg));
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Login request failed");
                return Err(SessionError::NetworkOrServerUnavailable(e.to_string()));
            }
            Err(_) => {
                warn!("Login request timed out");
                return Err(SessionError::NetworkOrServerUnavailable(
                    ApiError::Timeout.to_string(),
                ));
            }
        };

        let now = Utc::now();
        let credential = match validator::classify(&response.token, now) {
            TokenStatus::Valid(credential) => credential,
            TokenStatus::Expired => return Err(SessionError::CredentialExpiredLocally),
            TokenStatus::Malformed(e) => return Err(SessionError::CredentialMalformed(e.to_string())),
        };

        let mode = PersistenceMode::from_remember_me(remember);
        // The other tier must not hold a credential a later bootstrap could find
        self.store.clear(mode.other()).await;
        let persisted = self.store.write_credential(mode, credential.token()).await;
        if persisted {
            self.store.save_last_activity(mode, now).await;
        } else {
            warn!(tier = %mode, "Credential not persisted, session will not outlive this process");
            // Drop whatever half-written value the tier may still hold
            self.store.clear(mode).await;
        }

        self.generation = self.generation.next();
        let state = self.signed_in_state(&credential, now);
        self.session = Session::signed_in(state, credential, Some(response.user), mode, now);
        self.session.storage_degraded = !persisted;
        self.pending_redirect = None;
        self.indeterminate_streak = 0;
        self.start_watchers();
        self.publish();
        info!(tier = %mode, generation = %self.generation, "Login successful");
        Ok(())
    }

    /// Manual logout. Notifies the server in the background; the local
    /// session ends regardless of how that goes.
    pub async fn logout(&mut self) {
        self.end_session(None, true).await;
    }

    /// Feed a user interaction to the inactivity monitor. Returns false when
    /// nobody is signed in.
    pub fn record_activity(&mut self, signal: ActivitySignal) -> bool {
        if !self.session.state.is_signed_in() || !self.monitor.observe(signal) {
            return false;
        }
        self.session.touch(Utc::now());
        self.activity_dirty = true;
        true
    }

    // =========================================================================
    // Background events
    // =========================================================================

    /// Wait for the next background event
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events_rx.recv().await
    }

    /// Handle every event already queued, without waiting. Returns how many
    /// were handled.
    pub async fn process_pending_events(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event).await;
            handled += 1;
        }
        handled
    }

    pub async fn handle_event(&mut self, event: SessionEvent) {
        self.reap_finished_tasks();

        if self.lifecycle != Lifecycle::Running {
            debug!(event = event.name(), "Ignoring event, controller not running");
            return;
        }
        if event.generation() != self.generation || !self.session.state.is_signed_in() {
            debug!(
                event = event.name(),
                event_generation = %event.generation(),
                current_generation = %self.generation,
                "Discarding stale session event"
            );
            return;
        }

        match event {
            SessionEvent::ProfileLoaded { result, .. } => self.on_profile_loaded(result).await,
            SessionEvent::VerifyDue { .. } => self.on_verify_due().await,
            SessionEvent::Verified { outcome, .. } => self.on_verified(outcome).await,
            SessionEvent::IdleTimeout { .. } => self.on_idle_timeout().await,
        }
    }

    async fn on_profile_loaded(&mut self, result: Result<Profile, ApiError>) {
        match result {
            Ok(profile) => {
                debug!(user_id = %profile.id, "Profile loaded");
                self.session.user = Some(profile);
            }
            Err(ApiError::Unauthorized) => {
                warn!("Profile fetch rejected credential");
                self.end_session(Some(LogoutReason::Expired), false).await;
            }
            Err(e) => warn!(error = %e, "Profile fetch failed, keeping session"),
        }
    }

    async fn on_verify_due(&mut self) {
        self.flush_activity().await;

        let now = Utc::now();
        let Ok(credential) = self.credential().cloned() else {
            return;
        };
        if credential.is_expired_at(now) {
            info!("Credential expired locally");
            self.end_session(Some(LogoutReason::Expired), false).await;
            return;
        }
        if self.verification_in_flight {
            debug!("Verification still in flight, skipping tick");
            return;
        }

        self.verification_in_flight = true;
        self.set_state(AuthState::Validating);

        let validator = self.validator.clone();
        let tx = self.events_tx.clone();
        let generation = self.generation;
        self.in_flight.spawn(async move {
            let outcome = validator.verify_remotely(&credential).await;
            let _ = tx.send(SessionEvent::Verified { generation, outcome }).await;
        });
    }

    async fn on_verified(&mut self, outcome: VerifyOutcome) {
        self.verification_in_flight = false;
        match outcome {
            VerifyOutcome::Valid => self.indeterminate_streak = 0,
            VerifyOutcome::Invalid => {
                self.end_session(Some(LogoutReason::Expired), false).await;
                return;
            }
            VerifyOutcome::Indeterminate(reason) => {
                self.indeterminate_streak += 1;
                warn!(
                    attempts = self.indeterminate_streak,
                    reason = %reason,
                    "Could not verify session, keeping it until the next check"
                );
            }
        }
        self.settle_signed_in().await;
    }

    async fn on_idle_timeout(&mut self) {
        if !self.monitor.has_elapsed() {
            // Activity landed between the timer firing and this event
            debug!("Idle timer fired but activity was recorded since");
            self.monitor.rearm();
            return;
        }
        info!(idle_secs = self.options.idle_timeout.as_secs(), "Idle timeout reached");
        self.end_session(Some(LogoutReason::Inactivity), false).await;
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    /// Leave the signed-in states. No-op if not signed in, so repeated
    /// triggers cause exactly one store clear and one redirect.
    async fn end_session(&mut self, reason: Option<LogoutReason>, notify_server: bool) {
        if !self.session.state.is_signed_in() {
            debug!(?reason, "No active session to end");
            return;
        }

        self.generation = self.generation.next();
        let credential = self.session.credential.take();
        let mode = self.session.persistence_mode;
        self.set_state(AuthState::LoggingOut);
        self.stop_background();

        if notify_server {
            if let Some(credential) = credential {
                self.notify_logout(credential);
            }
        }
        if let Some(mode) = mode {
            self.store.clear(mode).await;
        }

        self.session = Session::with_state(AuthState::Unauthenticated);
        self.pending_redirect = Some(Redirect::to_login(&self.options.login_route, reason));
        self.publish();
        info!(
            reason = reason.map(|r| r.as_str()).unwrap_or("manual"),
            generation = %self.generation,
            "Session ended"
        );
    }

    fn settle_unauthenticated(&mut self, reason: Option<LogoutReason>) {
        self.session = Session::with_state(AuthState::Unauthenticated);
        self.pending_redirect =
            reason.map(|r| Redirect::to_login(&self.options.login_route, Some(r)));
        self.publish();
    }

    /// Return from `Validating` to the signed-in state the clock calls for
    async fn settle_signed_in(&mut self) {
        let now = Utc::now();
        let Some(credential) = self.session.credential.as_ref() else {
            return;
        };
        if credential.is_expired_at(now) {
            self.end_session(Some(LogoutReason::Expired), false).await;
            return;
        }
        let state = self.signed_in_state(credential, now);
        self.set_state(state);
    }

    fn signed_in_state(&self, credential: &Credential, now: DateTime<Utc>) -> AuthState {
        if credential.expires_within(now, to_chrono(self.options.expiry_warning)) {
            AuthState::ExpiringSoon
        } else {
            AuthState::Authenticated
        }
    }

    fn set_state(&mut self, state: AuthState) {
        if self.session.state != state {
            debug!(from = %self.session.state, to = %state, "Auth state changed");
        }
        self.session.state = state;
        self.publish();
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.session.state);
    }

    // =========================================================================
    // Background work
    // =========================================================================

    fn start_watchers(&mut self) {
        self.monitor.attach(self.generation, self.events_tx.clone());
        self.ticker.start(
            self.options.verify_interval,
            self.generation,
            self.events_tx.clone(),
        );
    }

    fn stop_background(&mut self) {
        self.monitor.detach();
        self.ticker.stop();
        self.in_flight.abort_all();
        self.verification_in_flight = false;
        self.activity_dirty = false;
    }

    fn spawn_profile_fetch(&mut self) {
        let token = match self.credential() {
            Ok(credential) => credential.token().to_string(),
            Err(e) => {
                debug!(error = %e, "Skipping profile fetch");
                return;
            }
        };
        let api = self.api.clone();
        let tx = self.events_tx.clone();
        let generation = self.generation;
        let timeout = self.options.request_timeout;
        self.in_flight.spawn(async move {
            let result = match tokio::time::timeout(timeout, api.fetch_profile(&token)).await {
                Ok(result) => result,
                Err(_) => Err(ApiError::Timeout),
            };
            let _ = tx.send(SessionEvent::ProfileLoaded { generation, result }).await;
        });
    }

    /// Fire-and-forget server logout. Not tracked in `in_flight`, so ending
    /// the session doesn't cancel it.
    fn notify_logout(&self, credential: Credential) {
        let api = self.api.clone();
        let timeout = self.options.request_timeout;
        tokio::spawn(async move {
            match tokio::time::timeout(timeout, api.logout(credential.token())).await {
                Ok(Ok(())) => debug!("Server acknowledged logout"),
                Ok(Err(e)) => warn!(error = %e, "Logout notification failed"),
                Err(_) => warn!("Logout notification timed out"),
            }
        });
    }

    fn reap_finished_tasks(&mut self) {
        while self.in_flight.try_join_next().is_some() {}
    }

    /// Persist the last-activity timestamp if it moved since the last flush
    async fn flush_activity(&mut self) {
        if !self.activity_dirty || self.session.storage_degraded {
            return;
        }
        self.activity_dirty = false;
        if let (Some(mode), Some(at)) = (self.session.persistence_mode, self.session.last_activity_at) {
            self.store.save_last_activity(mode, at).await;
        }
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::weeks(52 * 100))
}

// ============================================================================
// Tests
// ============================================================================

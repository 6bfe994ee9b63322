//! Client-side session lifecycle.
//!
//! `SessionController` owns the live `Session` and drives it through
//! `AuthState`. It leans on three helpers:
//! - `TokenValidator` / `VerificationTicker`: local expiry plus periodic
//!   server-side verification
//! - `InactivityMonitor`: idle detection from user interaction signals
//! - `NavigationGuard`: read-only route decisions from the current state

pub mod controller;
pub mod credential;
pub mod error;
pub mod event;
pub mod guard;
pub mod inactivity;
pub mod state;
pub mod validator;

pub use controller::{SessionController, SessionOptions};
pub use credential::{Credential, CredentialError};
pub use error::SessionError;
pub use event::{Generation, SessionEvent};
pub use guard::{GuardDecision, NavigationGuard, RouteTable};
pub use inactivity::{ActivitySignal, InactivityMonitor};
pub use state::{AuthState, LogoutReason, Redirect, Session};
pub use validator::{TokenStatus, TokenValidator, VerificationTicker, VerifyOutcome};

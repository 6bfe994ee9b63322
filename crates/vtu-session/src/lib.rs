//! Session lifecycle core for VTU clients.
//!
//! Holds everything a client needs to keep a bearer-token session honest:
//! two-tier token persistence, local and remote credential validation,
//! idle logout, and route guarding. Client shells (web, mobile, desktop, CLI)
//! supply a `StorageBackend` per tier and forward user interaction signals;
//! the `SessionController` does the rest.

pub mod api;
pub mod config;
pub mod models;
pub mod session;
pub mod store;

pub use config::Config;
pub use session::{AuthState, SessionController, SessionError};

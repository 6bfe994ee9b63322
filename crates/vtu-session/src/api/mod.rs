//! REST client module for the VTU backend's auth endpoints.
//!
//! The session core only consumes four contracts: login, profile fetch,
//! credential verification, and logout notification. `AuthApi` is the seam;
//! `ApiClient` is the reqwest implementation.

pub mod client;
pub mod error;

pub use client::{ApiClient, AuthApi, DEFAULT_REQUEST_TIMEOUT_SECS};
pub use error::ApiError;

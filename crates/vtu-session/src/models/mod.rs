//! Data models for the backend's auth contracts.
//!
//! Responses are deserialized into one pinned schema. Payloads that don't match
//! are rejected at the boundary rather than read defensively.

pub mod profile;

pub use profile::{LoginRequest, LoginResponse, Profile};

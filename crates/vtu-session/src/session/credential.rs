//! Bearer credential and its embedded claims.
//!
//! The token is opaque except for its payload segment, which is decoded only
//! to read the `exp` and `sub` claims. The signature is never checked here;
//! that is the server's job.

use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("token is not three dot-separated segments")]
    Structure,

    #[error("payload is not base64url: {0}")]
    Encoding(String),

    #[error("payload is not a claims object: {0}")]
    Claims(String),

    #[error("expiry claim out of range")]
    ExpiryOutOfRange,
}

#[derive(Debug, Deserialize)]
struct Claims {
    #[serde(default)]
    exp: Option<f64>,
    #[serde(default)]
    sub: Option<SubjectClaim>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SubjectClaim {
    Text(String),
    Number(i64),
}

/// A bearer token plus the fields derived from its claims.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    token: String,
    expires_at: Option<DateTime<Utc>>,
    subject_id: Option<String>,
}

impl Credential {
    /// Decode `token`'s payload. Any structural or parse failure is an error;
    /// a payload without `exp` is accepted and never expires locally.
    pub fn parse(token: impl Into<String>) -> Result<Self, CredentialError> {
        let token = token.into();
        let claims = decode_claims(&token)?;

        let expires_at = match claims.exp {
            Some(exp) => {
                if !exp.is_finite() {
                    return Err(CredentialError::ExpiryOutOfRange);
                }
                Some(
                    DateTime::from_timestamp(exp.trunc() as i64, 0)
                        .ok_or(CredentialError::ExpiryOutOfRange)?,
                )
            }
            None => None,
        };

        let subject_id = claims.sub.map(|sub| match sub {
            SubjectClaim::Text(s) => s,
            SubjectClaim::Number(n) => n.to_string(),
        });

        Ok(Self {
            token,
            expires_at,
            subject_id,
        })
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn subject_id(&self) -> Option<&str> {
        self.subject_id.as_deref()
    }

    /// True once `now` reaches the expiry claim. Without a claim, never.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|exp| now >= exp).unwrap_or(false)
    }

    pub fn time_until_expiry(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.expires_at.map(|exp| exp - now)
    }

    /// Check if the credential expires within `window` of `now`
    pub fn expires_within(&self, now: DateTime<Utc>, window: Duration) -> bool {
        self.expires_at
            .map(|exp| exp - now <= window)
            .unwrap_or(false)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("subject_id", &self.subject_id)
            .finish()
    }
}

fn decode_claims(token: &str) -> Result<Claims, CredentialError> {
    let mut segments = token.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(CredentialError::Structure);
    };
    if payload.is_empty() {
        return Err(CredentialError::Structure);
    }

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| CredentialError::Encoding(e.to_string()))?;

    serde_json::from_slice(&bytes).map_err(|e| CredentialError::Claims(e.to_string()))
}

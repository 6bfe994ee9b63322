use thiserror::Error;

use super::AuthState;

/// Failure classes of the session lifecycle.
///
/// Only `Unauthorized` and `CredentialExpiredLocally` (plus an idle timeout,
/// which is an event rather than an error) ever force a logout. Everything
/// else is absorbed where it happens.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// No credential held: signed out, or a cold start with nothing stored.
    #[error("No stored credential")]
    CredentialMissing,

    #[error("Credential is malformed: {0}")]
    CredentialMalformed(String),

    #[error("Credential has expired")]
    CredentialExpiredLocally,

    #[error("Server rejected the credential")]
    Unauthorized,

    #[error("Server unavailable: {0}")]
    NetworkOrServerUnavailable(String),

    /// Persistence failed; the session lives in memory only
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Email and password required")]
    MissingCredentials,

    #[error("Cannot do that while {0}")]
    InvalidTransition(AuthState),

    #[error("Session controller has been disposed")]
    Disposed,
}

impl SessionError {
    /// Whether this error ends the current session
    pub fn forces_logout(&self) -> bool {
        matches!(
            self,
            SessionError::Unauthorized | SessionError::CredentialExpiredLocally
        )
    }

    /// Message suitable for a login form or banner
    pub fn user_message(&self) -> String {
        match self {
            SessionError::Unauthorized => "Invalid email or password".to_string(),
            SessionError::NetworkOrServerUnavailable(_) => {
                "Unable to reach the server. Check your internet connection.".to_string()
            }
            SessionError::CredentialMalformed(_) | SessionError::CredentialExpiredLocally => {
                "The server issued an unusable session. Please try again.".to_string()
            }
            SessionError::StorageUnavailable(_) => {
                "Your session could not be saved and will end when this app closes.".to_string()
            }
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_fatal_errors_force_logout() {
        assert!(SessionError::Unauthorized.forces_logout());
        assert!(SessionError::CredentialExpiredLocally.forces_logout());
        assert!(!SessionError::NetworkOrServerUnavailable("timeout".into()).forces_logout());
        assert!(!SessionError::StorageUnavailable("quota".into()).forces_logout());
        assert!(!SessionError::CredentialMissing.forces_logout());
        assert!(!SessionError::CredentialMalformed("bad".into()).forces_logout());
    }

    #[test]
    fn test_user_message() {
        assert_eq!(
            SessionError::Unauthorized.user_message(),
            "Invalid email or password"
        );
        assert!(SessionError::NetworkOrServerUnavailable("x".into())
            .user_message()
            .contains("internet"));
        assert!(SessionError::StorageUnavailable("durable".into())
            .user_message()
            .contains("could not be saved"));
        assert_eq!(
            SessionError::MissingCredentials.user_message(),
            "Email and password required"
        );
    }
}

//! Upstream Authentication
//!
//! Tracks the authentication handshake on a freshly opened link.
//!
//! # Authentication Flow
//!
//! ## Frame auth (Polygon)
//! 1. Connect to the WebSocket endpoint
//! 2. Send `{"action":"auth","params":"KEY"}`
//! 3. Receive `{"ev":"status","status":"connected"}` (informational)
//! 4. Receive `auth_success` or `auth_failed`
//!
//! ## URI auth (Finnhub)
//! The token rides in the connection URI. A rejected token fails the HTTP
//! upgrade with 401/403; an accepted socket is authenticated on open.
//!
//! A rejection is fatal and never retried. A handshake that does not finish
//! within `AUTH_TIMEOUT` is treated as a connection failure.

use std::time::Duration;

use thiserror::Error;

use super::codec::StatusEvent;
use super::provider::AuthMode;

/// Maximum time allowed for the auth handshake after the socket opens.
pub const AUTH_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during authentication.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// Provider rejected the credentials.
    #[error("credentials rejected: {0}")]
    Rejected(String),

    /// HTTP upgrade refused with an auth status.
    #[error("upgrade refused with HTTP {0}")]
    HttpStatus(u16),

    /// No verdict within `AUTH_TIMEOUT`.
    #[error("authentication timed out after {}s", AUTH_TIMEOUT.as_secs())]
    Timeout,

    /// Socket closed before a verdict.
    #[error("connection closed during authentication")]
    Closed,
}

impl AuthError {
    /// Check if the provider definitively rejected the credentials.
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected(_) | Self::HttpStatus(_))
    }

    /// Check if an HTTP status means the credentials were refused.
    #[must_use]
    pub const fn is_auth_status(status: u16) -> bool {
        matches!(status, 401 | 403)
    }
}

// =============================================================================
// Authentication State
// =============================================================================

/// Current state of authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthState {
    /// Socket not open.
    #[default]
    Disconnected,
    /// Auth frame sent, awaiting verdict.
    Authenticating,
    /// Credentials accepted.
    Authenticated,
    /// Credentials rejected.
    Failed,
}

impl AuthState {
    /// Check if currently authenticated.
    #[must_use]
    pub const fn is_authenticated(self) -> bool {
        matches!(self, Self::Authenticated)
    }
}

// =============================================================================
// Authentication Handler
// =============================================================================

/// Authentication state machine for one link.
#[derive(Debug)]
pub struct AuthHandler {
    mode: AuthMode,
    state: AuthState,
}

impl AuthHandler {
    /// Create a handler for a provider's auth mode.
    #[must_use]
    pub const fn new(mode: AuthMode) -> Self {
        Self {
            mode,
            state: AuthState::Disconnected,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> AuthState {
        self.state
    }

    /// Check if currently authenticated.
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        self.state.is_authenticated()
    }

    /// Called once the socket is open.
    ///
    /// Returns true if the link is already authenticated (URI auth).
    pub const fn on_open(&mut self) -> bool {
        self.state = match self.mode {
            AuthMode::Frame => AuthState::Authenticating,
            AuthMode::Uri => AuthState::Authenticated,
        };
        self.state.is_authenticated()
    }

    /// Process a status event while authenticating.
    ///
    /// # Returns
    ///
    /// - `Ok(true)` once authentication is complete
    /// - `Ok(false)` for informational events
    ///
    /// # Errors
    ///
    /// `AuthError::Rejected` if the provider refused the credentials.
    pub fn on_status(&mut self, status: &StatusEvent) -> Result<bool, AuthError> {
        match status {
            StatusEvent::AuthSuccess => {
                self.state = AuthState::Authenticated;
                Ok(true)
            }
            StatusEvent::AuthFailed(message) => {
                self.state = AuthState::Failed;
                Err(AuthError::Rejected(message.clone()))
            }
            StatusEvent::Connected | StatusEvent::Error(_) | StatusEvent::Other(_) => {
                Ok(self.state.is_authenticated())
            }
        }
    }

    /// Reset after the link closes.
    pub const fn reset(&mut self) {
        self.state = AuthState::Disconnected;
    }
}

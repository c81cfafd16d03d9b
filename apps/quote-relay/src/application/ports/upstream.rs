//! Upstream Feed Port
//!
//! The single shared connection to the market-data provider. Every link the
//! connector establishes gets a new generation number; a caller that sees
//! the generation change knows the provider has forgotten all prior
//! subscriptions and must replay them.

use async_trait::async_trait;

use crate::domain::market::Symbol;

// =============================================================================
// Commands
// =============================================================================

/// Command forwarded to the upstream provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamCommand {
    /// Start receiving quotes for these symbols.
    Subscribe(Vec<Symbol>),
    /// Stop receiving quotes for these symbols.
    Unsubscribe(Vec<Symbol>),
}

impl UpstreamCommand {
    /// Symbols the command applies to.
    #[must_use]
    pub fn symbols(&self) -> &[Symbol] {
        match self {
            Self::Subscribe(symbols) | Self::Unsubscribe(symbols) => symbols,
        }
    }

    /// Check if the command carries no symbols.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.symbols().is_empty()
    }

    /// Command name for logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Subscribe(_) => "subscribe",
            Self::Unsubscribe(_) => "unsubscribe",
        }
    }
}

// =============================================================================
// Session
// =============================================================================

/// Handle to a live upstream link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    /// Link generation, incremented on every (re)connect.
    pub generation: u64,
}

impl Session {
    /// Create a session handle.
    #[must_use]
    pub const fn new(generation: u64) -> Self {
        Self { generation }
    }
}

/// Upstream connection state machine.
///
/// `Disconnected → Connecting → Connected → Disconnected` on close, or
/// `Failed` when the provider rejects the credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No link.
    #[default]
    Disconnected,
    /// Opening a link or authenticating.
    Connecting,
    /// Authenticated and streaming.
    Connected,
    /// Authentication was rejected.
    Failed,
}

impl ConnectionState {
    /// State name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Failed => "failed",
        }
    }

    /// Check if a link is live.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Upstream connection errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UpstreamError {
    /// Provider rejected the credentials. Fatal, never retried.
    #[error("upstream authentication failed: {0}")]
    Auth(String),

    /// Link could not be restored within the bounded attempts.
    #[error("upstream disconnected after {attempts} connection attempts")]
    Disconnected {
        /// Attempts made before giving up.
        attempts: u32,
    },

    /// Single connection attempt failed.
    #[error("upstream connection failed: {0}")]
    Connect(String),

    /// Link closed while sending and the retry also failed.
    #[error("upstream link closed")]
    Closed,

    /// Command could not be encoded for the provider.
    #[error("upstream protocol error: {0}")]
    Protocol(String),

    /// Shutdown in progress.
    #[error("upstream connector cancelled")]
    Cancelled,
}

impl UpstreamError {
    /// Check if retrying cannot help.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Auth(_) | Self::Protocol(_) | Self::Cancelled)
    }
}

// =============================================================================
// Port
// =============================================================================

/// The shared upstream market-data connection.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UpstreamPort: Send + Sync {
    /// Return the live link, establishing one if absent.
    ///
    /// # Errors
    ///
    /// `Auth` if credentials are rejected, `Disconnected` if the bounded
    /// reconnect attempts are exhausted.
    async fn ensure_connected(&self) -> Result<Session, UpstreamError>;

    /// Forward a command over the live link.
    ///
    /// A send on a closed link reconnects and retries once. The returned
    /// session is the link the command actually went out on.
    ///
    /// # Errors
    ///
    /// Same as `ensure_connected`, plus `Closed` if the retry also fails.
    async fn send(&self, command: UpstreamCommand) -> Result<Session, UpstreamError>;

    /// The live link, if any, without connecting.
    fn current_session(&self) -> Option<Session>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_accessors() {
        let aapl = Symbol::parse("AAPL").unwrap();
        let cmd = UpstreamCommand::Subscribe(vec![aapl.clone()]);
        assert_eq!(cmd.kind(), "subscribe");
        assert_eq!(cmd.symbols(), &[aapl]);
        assert!(!cmd.is_empty());
        assert!(UpstreamCommand::Unsubscribe(vec![]).is_empty());
    }

    #[test]
    fn fatal_errors() {
        assert!(UpstreamError::Auth("bad key".into()).is_fatal());
        assert!(!UpstreamError::Disconnected { attempts: 3 }.is_fatal());
        assert!(!UpstreamError::Connect("refused".into()).is_fatal());
        assert!(!UpstreamError::Closed.is_fatal());
    }

    #[test]
    fn connection_state_serialization() {
        assert_eq!(
            serde_json::to_string(&ConnectionState::Connected).unwrap(),
            "\"connected\""
        );
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::Failed.is_connected());
    }
}

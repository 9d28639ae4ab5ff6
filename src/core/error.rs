use thiserror::Error;

/// Failure taxonomy of the bridge. Every variant renders to the single
/// user-facing string the popup shows; no structured codes cross the
/// message boundary.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("No API URL candidates configured.")]
    Config,

    #[error("{0}")]
    Validation(String),

    /// Transport-level failure (DNS, TLS, refused connection, CORS).
    /// Recoverable by the tab proxy or the next candidate.
    #[error("{0}")]
    Network(String),

    /// The server answered and rejected the request. The message already
    /// carries the `[apiUrl+path]` annotation from classification.
    #[error("{message}")]
    Http { status: u16, message: String },

    #[error("{0}")]
    TabUnavailable(String),

    #[error("Please log in from the extension popup first.")]
    Auth,
}

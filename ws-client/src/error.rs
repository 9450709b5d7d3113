use std::error::Error as StdError;
use std::fmt;

/// Errors surfaced by the realtime client.
#[derive(Debug)]
pub enum Error {
    /// `connect` was called with an empty or whitespace-only token.
    MissingCredential,
    /// The underlying WebSocket transport failed.
    Transport(tokio_tungstenite::tungstenite::Error),
    /// A frame could not be encoded or decoded.
    Serialization(serde_json::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::MissingCredential => write!(f, "a non-empty auth token is required"),
            Error::Transport(e) => write!(f, "transport error: {e}"),
            Error::Serialization(e) => write!(f, "serialization error: {e}"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::MissingCredential => None,
            Error::Transport(e) => Some(e),
            Error::Serialization(e) => Some(e),
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::Transport(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e)
    }
}

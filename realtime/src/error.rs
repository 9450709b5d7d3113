//! Error types for the `realtime` layer.
use std::error::Error as StdError;
use std::fmt;

/// Top-level realtime error type.
/// Errors are modeled as a root struct holding a tree of `error_kind`
/// enums, with the original error preserved in `source`. The intent is to
/// translate errors between layers while maintaining layer boundaries: the
/// `web` layer maps these kinds to HTTP status codes (an auth kind becomes
/// a handshake rejection) without depending on the underlying crates.
#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: ErrorKind,
}

/// Enum representing the major categories of errors that can occur in the
/// `realtime` layer.
#[derive(Debug, PartialEq)]
pub enum ErrorKind {
    Auth(AuthErrorKind),
    Other(String),
}

/// Enum representing the ways a handshake credential can be unacceptable.
#[derive(Debug, PartialEq)]
pub enum AuthErrorKind {
    /// No credential was supplied with the handshake.
    MissingToken,
    /// The credential failed decoding or signature verification.
    InvalidToken,
    /// The credential was valid once but its expiry has passed.
    ExpiredToken,
}

impl Error {
    pub fn auth(kind: AuthErrorKind) -> Self {
        Self {
            source: None,
            error_kind: ErrorKind::Auth(kind),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Realtime Error: {self:?}")
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

// Translate credential verification failures into this layer's taxonomy so
// callers can distinguish "expired" (refresh out-of-band and retry) from
// "invalid" (do not retry).
impl From<jsonwebtoken::errors::Error> for Error {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        let kind = match err.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthErrorKind::ExpiredToken,
            _ => AuthErrorKind::InvalidToken,
        };

        Error {
            source: Some(Box::new(err)),
            error_kind: ErrorKind::Auth(kind),
        }
    }
}

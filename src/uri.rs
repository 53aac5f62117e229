//! WebSocket endpoint URIs.
//!
//! [`WsUri`] is a newtype around [`url::Url`] that can only be built through
//! [`validate_uri`], so holding one proves the address is absolute, uses the
//! `ws` or `wss` scheme, and has no fragment.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use url::Url;

use crate::error::ValidationError;

/// A validated, canonicalized WebSocket endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct WsUri(Url);

impl WsUri {
    /// Returns the canonical string form (scheme and host lowercased).
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Returns `"ws"` or `"wss"`.
    #[must_use]
    pub fn scheme(&self) -> &str {
        self.0.scheme()
    }

    /// Returns the host component, if any.
    #[must_use]
    pub fn host(&self) -> Option<&str> {
        self.0.host_str()
    }

    /// Returns `true` for `wss` endpoints.
    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.0.scheme() == "wss"
    }
}

impl fmt::Display for WsUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

impl FromStr for WsUri {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        validate_uri(s)
    }
}

impl From<WsUri> for Url {
    fn from(uri: WsUri) -> Self {
        uri.0
    }
}

/// Validates user-supplied text as a WebSocket URI.
///
/// Leading and trailing whitespace is ignored. No network I/O is performed.
///
/// # Errors
///
/// - [`ValidationError::InvalidUri`] if the text is not an absolute URI.
/// - [`ValidationError::FragmentNotAllowed`] if it has a fragment, even an
///   empty one.
/// - [`ValidationError::UnsupportedScheme`] if the scheme is not `ws` or
///   `wss` (compared after canonicalization, so `WS://` is accepted).
pub fn validate_uri(input: &str) -> Result<WsUri, ValidationError> {
    let trimmed = input.trim();
    let url = Url::parse(trimmed).map_err(|e| ValidationError::InvalidUri {
        input: trimmed.to_string(),
        reason: e.to_string(),
    })?;

    if url.fragment().is_some() {
        return Err(ValidationError::FragmentNotAllowed);
    }

    // `Url` lowercases the scheme while parsing.
    match url.scheme() {
        "ws" | "wss" => Ok(WsUri(url)),
        other => Err(ValidationError::UnsupportedScheme(other.to_string())),
    }
}

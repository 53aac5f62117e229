//! Talker configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`). [`SessionConfig`] holds the part a
//! [`crate::session::Session`] needs; [`TalkerConfig`] adds the settings of
//! the terminal front end.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Default time allowed for writing a close frame during disconnect.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_millis(2_000);

/// Default reason text sent with a local disconnect.
pub const DEFAULT_CLOSE_REASON: &str = "closing";

/// Per-session tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Upper bound on the connect handshake; `None` waits indefinitely.
    pub connect_timeout: Option<Duration>,

    /// Upper bound on writing the close frame during disconnect.
    pub close_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: None,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }
}

/// How the terminal front end renders session events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// `[status] ...` / `[error] ...` / `< message` lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

/// Returned when `TALKER_OUTPUT` holds an unknown format.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown output format {0:?}: expected \"text\" or \"json\"")]
pub struct UnknownOutputFormat(String);

impl FromStr for OutputFormat {
    type Err = UnknownOutputFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(UnknownOutputFormat(s.to_string())),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Text => "text",
            Self::Json => "json",
        })
    }
}

/// Top-level configuration of the `ws-talker` binary.
///
/// Loaded once at startup via [`TalkerConfig::from_env`].
#[derive(Debug, Clone)]
pub struct TalkerConfig {
    /// Endpoint used by a bare `/connect` (`TALKER_URI`).
    pub default_uri: Option<String>,

    /// Reason sent by a bare `/disconnect` (`TALKER_CLOSE_REASON`).
    pub close_reason: String,

    /// Event rendering (`TALKER_OUTPUT`).
    pub output: OutputFormat,

    /// Emit logs as JSON (`TALKER_LOG_JSON`).
    pub log_json: bool,

    /// Session tuning (`TALKER_CONNECT_TIMEOUT_MS`, `TALKER_CLOSE_TIMEOUT_MS`).
    pub session: SessionConfig,
}

impl TalkerConfig {
    /// Loads configuration from environment variables.
    ///
    /// Falls back to defaults when a variable is not set. Calls
    /// `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns an error if `TALKER_OUTPUT` is set to anything other than
    /// `text` or `json`.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        dotenvy::dotenv().ok();

        let default_uri = std::env::var("TALKER_URI")
            .ok()
            .filter(|v| !v.trim().is_empty());
        let close_reason = std::env::var("TALKER_CLOSE_REASON")
            .unwrap_or_else(|_| DEFAULT_CLOSE_REASON.to_string());

        let output = match std::env::var("TALKER_OUTPUT") {
            Ok(raw) => raw.parse()?,
            Err(_) => OutputFormat::default(),
        };
        let log_json = parse_env_bool("TALKER_LOG_JSON", false);

        let connect_timeout = millis_or_none(parse_env("TALKER_CONNECT_TIMEOUT_MS", 0));
        let close_timeout = Duration::from_millis(parse_env(
            "TALKER_CLOSE_TIMEOUT_MS",
            u64::try_from(DEFAULT_CLOSE_TIMEOUT.as_millis()).unwrap_or(2_000),
        ));

        Ok(Self {
            default_uri,
            close_reason,
            output,
            log_json,
            session: SessionConfig {
                connect_timeout,
                close_timeout,
            },
        })
    }
}

/// `0` disables the timeout.
fn millis_or_none(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

/// Parses an environment variable as `T`, returning `default` on missing
/// or invalid values.
fn parse_env<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Parses an environment variable as a boolean. Accepts `"true"`, `"1"`,
/// `"false"`, `"0"` (case-insensitive). Returns `default` otherwise.
fn parse_env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .as_deref()
        .map_or(default, |v| parse_bool(v).unwrap_or(default))
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

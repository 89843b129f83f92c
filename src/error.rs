use serde::Serialize;
use thiserror::Error;

/// Typed application error hierarchy for the engine's host-facing API.
///
/// Serializes as a plain string (hosts render `error.message` directly)
/// while giving Rust code typed variants that can be matched or
/// propagated with `?`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Database(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid video reference: {0}")]
    InvalidTarget(String),

    #[error("{0}")]
    Io(String),

    #[error("{0}")]
    Json(String),

    #[error("{0}")]
    Other(String),
}

impl serde::Serialize for AppError {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        AppError::Database(e.to_string())
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(e: rusqlite::Error) -> Self {
        AppError::Database(e.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::Json(e.to_string())
    }
}

/// Allows `.map_err(|e| format!("…", e))?` without changing call sites.
impl From<String> for AppError {
    fn from(s: String) -> Self {
        AppError::Other(s)
    }
}

impl From<&str> for AppError {
    fn from(s: &str) -> Self {
        AppError::Other(s.to_string())
    }
}

/// Classification of a terminal pipeline failure.
///
/// Consumers react differently to "try again later" vs. "will never
/// succeed", so the raw transport/tool error is mapped to one of these
/// before it reaches the status log or a broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Could not reach a backend (server down, DNS failure, refused).
    Network,
    /// The model/API rejected us: quota exhausted, bad or missing key.
    Upstream,
    /// The source will not serve this video: age/region/private.
    Restricted,
    /// The source is throttling us; a later retry may succeed.
    RateLimited,
    Generic,
}

impl FailureKind {
    /// Whether a later retry by the user is worthwhile.
    pub fn retryable(&self) -> bool {
        !matches!(self, FailureKind::Restricted | FailureKind::Upstream)
    }

    /// Short human-readable explanation for error panels.
    pub fn user_message(&self) -> &'static str {
        match self {
            FailureKind::Network => "Could not reach the backend. Check that it is running.",
            FailureKind::Upstream => "The AI backend rejected the request (quota or API key).",
            FailureKind::Restricted => "This video is restricted (age, region, or private).",
            FailureKind::RateLimited => "The source is rate-limiting downloads. Try again later.",
            FailureKind::Generic => "Something went wrong while processing this video.",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::Upstream => write!(f, "upstream"),
            Self::Restricted => write!(f, "restricted"),
            Self::RateLimited => write!(f, "rate_limited"),
            Self::Generic => write!(f, "generic"),
        }
    }
}

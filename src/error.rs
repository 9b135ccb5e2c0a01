//! Error taxonomy for the ingestion pipeline.
//!
//! Per-source and per-entry errors are isolated: they are counted and logged,
//! never propagated past the stage that produced them. Only [`RunError`]
//! aborts a run.

use std::time::Duration;

/// A single source could not be fetched or parsed. The source is skipped for this run.
#[derive(Debug, thiserror::Error)]
pub enum SourceFetchError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("http status {0}")]
    Status(u16),

    #[error("unsupported content type {0}")]
    ContentType(String),

    #[error("body exceeds {limit} bytes")]
    TooLarge { limit: u64 },

    #[error("parse error: {0}")]
    Parse(String),
}

/// AI call failed at the transport level.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("ai call timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },

    #[error("server error (status {0})")]
    Server(u16),

    #[error("unauthorized (status {0})")]
    Unauthorized(u16),

    #[error("request rejected (status {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("malformed completion envelope: {0}")]
    Envelope(String),
}

impl TransportError {
    /// Timeouts, connection failures, 429 and 5xx are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Connect(_) | Self::RateLimited { .. } | Self::Server(_)
        )
    }

    /// Failures that will hit every entry the same way (bad credentials).
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// The AI answered, but the answer is structurally unusable. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("response is empty")]
    Empty,

    #[error("response is not structured data: {0}")]
    Unparsable(String),

    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("score is not an integer: {0}")]
    ScoreNotInteger(String),

    #[error("score {0} outside 0..=100")]
    ScoreOutOfRange(i64),

    #[error("field `{0}` has the wrong type")]
    WrongType(&'static str),
}

/// Why a single entry did not come out of the analyzer.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AnalysisError {
    #[error("transport failed after {attempts} attempt(s): {last}")]
    Transport { attempts: u32, last: TransportError },

    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("abandoned on shutdown")]
    Cancelled,
}

/// The persistence boundary refused an entry. The identity stays unmarked.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("store rejected entry: {0}")]
    Rejected(String),
}

/// The dedup backing store failed.
#[derive(Debug, thiserror::Error)]
pub enum DedupError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt dedup record at line {line}: {message}")]
    Corrupt { line: usize, message: String },

    #[error("dedup store unavailable: {0}")]
    Unavailable(String),
}

/// Strategy/category configuration problems.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid config in {file}: {message}")]
    Invalid { file: String, message: String },

    #[error("duplicate category key `{0}`")]
    DuplicateCategory(String),

    #[error("unknown category `{0}`")]
    UnknownCategory(String),

    #[error("category directory not found: {0}")]
    MissingDir(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Conditions that end a run early. No identity is marked seen for
/// entries that were not emitted before the abort.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("strategy resolver failed: {0}")]
    Strategy(#[from] ConfigError),

    #[error("dedup store failed: {0}")]
    Dedup(#[from] DedupError),

    #[error("ai service unavailable: {0}")]
    AiUnavailable(String),
}

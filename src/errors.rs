// =============================================================================
// Error taxonomy for the trading core
// =============================================================================
//
// Errors are classified by kind, not by call site:
//   - ConfigError   — fatal at startup, never raised at cycle time.
//   - DataError     — bar fetch / validation failure; the cycle aborts without
//                     mutating state and the next cycle retries.
//   - FeatureError  — insufficient data, NaN, schema mismatch; the cycle emits
//                     HOLD and logs.
//   - ModelError    — load/inference failures fall through the degradation
//                     ladder; a feature-shape mismatch is a hard no-trade error.
//   - ExchangeError — carries a transience kind: auth errors get bounded
//                     retries then a critical alert, transient errors retry
//                     with jitter, permanent errors abort and roll back.
//   - AtomicEntryError — TP or SL unplaceable after retries; the position is
//                     market-closed and the sibling order cancelled.
//
// A risk rejection is a normal HOLD outcome, not an error, and lives in the
// risk module as a verdict variant.
// =============================================================================

use thiserror::Error;

/// Bitbank error code for failed API authentication.
pub const AUTH_ERROR_CODE: i64 = 20001;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum DataError {
    #[error("insufficient bars: have {have}, need {need}")]
    InsufficientBars { have: usize, need: usize },

    #[error("bar timestamps not strictly increasing at index {index}")]
    NonMonotonic { index: usize },

    #[error("bar timestamp gap at index {index}: expected {expected}, got {got}")]
    Gap {
        index: usize,
        expected: String,
        got: String,
    },

    #[error("non-finite or negative value in bar at index {index}")]
    InvalidBar { index: usize },

    #[error("bar fetch failed: {0}")]
    Fetch(String),
}

#[derive(Debug, Error)]
pub enum FeatureError {
    #[error("insufficient data for feature generation: have {have} bars, need {need}")]
    InsufficientData { have: usize, need: usize },

    #[error("non-finite value in feature column '{column}' at row {row}")]
    NonFinite { column: String, row: usize },

    #[error("feature schema mismatch: {0}")]
    SchemaMismatch(String),
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model artifact load failed: {0}")]
    Load(String),

    #[error("model inference failed: {0}")]
    Inference(String),

    #[error("feature shape mismatch: model expects {expected} features, got {got}")]
    ShapeMismatch { expected: usize, got: usize },
}

/// Transience classification used by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeErrorKind {
    /// Authentication failure (Bitbank 20001 class): bounded retry, then a
    /// critical alert.
    Auth,
    /// Rate limit / timeout / transport hiccup: retry with jitter.
    Transient,
    /// Validation or other non-retryable rejection: abort the order.
    Permanent,
}

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("authentication rejected (code {code}): {message}")]
    Auth { code: i64, message: String },

    #[error("rate limited by exchange")]
    RateLimited,

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("exchange rejected request (code {code}): {message}")]
    Api { code: i64, message: String },

    #[error("order validation failed: {0}")]
    Validation(String),

    #[error("order not found")]
    OrderNotFound,
}

impl ExchangeError {
    pub fn kind(&self) -> ExchangeErrorKind {
        match self {
            Self::Auth { .. } => ExchangeErrorKind::Auth,
            Self::RateLimited | Self::Timeout(_) | Self::Transport(_) => {
                ExchangeErrorKind::Transient
            }
            Self::Api { .. } | Self::Validation(_) | Self::OrderNotFound => {
                ExchangeErrorKind::Permanent
            }
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ExchangeErrorKind::Auth | ExchangeErrorKind::Transient
        )
    }

    /// Map a Bitbank error code onto the taxonomy.
    pub fn from_api_code(code: i64, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            AUTH_ERROR_CODE | 20003 | 20005 => Self::Auth { code, message },
            // 70009: "system busy" class — transient by contract.
            70009 => Self::RateLimited,
            _ => Self::Api { code, message },
        }
    }
}

#[derive(Debug, Error)]
pub enum AtomicEntryError {
    #[error("take-profit placement failed after {attempts} attempts: {source}")]
    TakeProfitFailed {
        attempts: u32,
        #[source]
        source: ExchangeError,
    },

    #[error("stop-loss placement failed after {attempts} attempts: {source}")]
    StopLossFailed {
        attempts: u32,
        #[source]
        source: ExchangeError,
    },

    #[error("entry order failed: {0}")]
    EntryFailed(#[from] ExchangeError),

    #[error("rollback close failed — manual intervention required: {0}")]
    RollbackFailed(String),
}

//! Error taxonomy, classification, and normalized API error responses.
//!
//! Every error surfaced to the embedding API layer passes through
//! [`ErrorManager`], which classifies it into an [`ErrorCategory`], counts it,
//! keeps it in a bounded recent-errors buffer, and renders a normalized
//! [`ApiErrorResponse`]. Raw error values (and their internals: upstream
//! URLs, stack traces) never reach clients.
//!
//! Different categories require different handling:
//! - Validation errors are the caller's fault and are never retried
//! - Network errors are transient and retried with bounded backoff before
//!   degrading to cached/fallback data
//! - Circuit-open errors fast-fail against a known-bad source
//! - Dependency-injection failures are fatal to the triggering call

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use uuid::Uuid;

/// Maximum number of metadata entries kept on a single error context.
const MAX_METADATA_ENTRIES: usize = 16;

/// Maximum length of a single metadata value before truncation.
const MAX_METADATA_VALUE_LEN: usize = 256;

/// Number of recent error records retained for reporting.
const RECENT_ERRORS_CAPACITY: usize = 100;

/// Errors produced by the service runtime.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ServiceError {
    /// Bad input from the caller. Never retried.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Upstream or RPC failure. Retried with bounded backoff, then the caller
    /// degrades to cached or fallback data.
    #[error("Network error: {0}")]
    Network(String),

    /// A source's circuit breaker is open; the call was short-circuited.
    #[error("Circuit open for source: {0}")]
    CircuitOpen(String),

    /// Unknown service, queue, or resource name.
    #[error("Not found: {0}")]
    NotFound(String),

    /// An operation exceeded its deadline.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Rejected configuration supplied at setup time.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A dependency cycle was detected during service resolution.
    /// Fatal to the triggering call.
    #[error("Circular dependency: {0}")]
    CircularDependency(String),

    /// Unexpected/programmer error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Returns `true` if the operation may be retried after a delay.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout(_))
    }

    /// Classifies this error into a reporting category.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Validation(_) => ErrorCategory::Validation,
            Self::Network(_) => ErrorCategory::Network,
            Self::CircuitOpen(_) => ErrorCategory::CircuitOpen,
            Self::NotFound(_) => ErrorCategory::NotFound,
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::InvalidConfiguration(_) | Self::CircularDependency(_) | Self::Internal(_) => {
                ErrorCategory::Internal
            }
        }
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(err: reqwest::Error) -> Self {
        // Keep the classification, drop the URL and internals.
        if err.is_timeout() {
            Self::Timeout("upstream request timed out".to_string())
        } else if err.is_connect() {
            Self::Network("connection refused or unreachable".to_string())
        } else if err.is_decode() || err.is_body() {
            Self::Network("malformed upstream response".to_string())
        } else {
            Self::Network("upstream request failed".to_string())
        }
    }
}

/// Reporting category of a classified error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Validation,
    Network,
    CircuitOpen,
    NotFound,
    Timeout,
    Internal,
}

impl ErrorCategory {
    /// All categories, in counter order.
    pub const ALL: [ErrorCategory; 6] = [
        ErrorCategory::Validation,
        ErrorCategory::Network,
        ErrorCategory::CircuitOpen,
        ErrorCategory::NotFound,
        ErrorCategory::Timeout,
        ErrorCategory::Internal,
    ];

    /// Static label for metrics and logging.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Network => "network",
            Self::CircuitOpen => "circuit_open",
            Self::NotFound => "not_found",
            Self::Timeout => "timeout",
            Self::Internal => "internal",
        }
    }

    /// Default HTTP status for responses in this category.
    #[must_use]
    pub fn default_status_code(&self) -> u16 {
        match self {
            Self::Validation => 400,
            Self::NotFound => 404,
            Self::Network | Self::CircuitOpen | Self::Timeout => 503,
            Self::Internal => 500,
        }
    }

    /// Reporting severity for this category.
    #[must_use]
    pub fn severity(&self) -> Severity {
        match self {
            Self::Validation | Self::NotFound => Severity::Warning,
            Self::Network | Self::CircuitOpen | Self::Timeout => Severity::Error,
            Self::Internal => Severity::Critical,
        }
    }

    fn index(self) -> usize {
        match self {
            Self::Validation => 0,
            Self::Network => 1,
            Self::CircuitOpen => 2,
            Self::NotFound => 3,
            Self::Timeout => 4,
            Self::Internal => 5,
        }
    }
}

/// Severity attached to classified errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Error,
    Critical,
}

/// Flat, explicitly-typed context attached to a handled error.
///
/// Contexts carry only strings, a timestamp, and a size-bounded metadata map,
/// so serializing a record never has to traverse arbitrary object graphs.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorContext {
    /// Logical operation being performed (e.g. `"get_snapshot"`).
    pub operation: String,
    /// Request path or component locator.
    pub path: String,
    /// When the context was created.
    pub timestamp: DateTime<Utc>,
    /// Bounded free-form metadata.
    pub metadata: HashMap<String, String>,
}

impl ErrorContext {
    /// Creates a context stamped with the current UTC time.
    #[must_use]
    pub fn new(operation: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            path: path.into(),
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    /// Attaches a metadata entry, ignoring entries past the bound and
    /// truncating oversized values.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        if self.metadata.len() < MAX_METADATA_ENTRIES {
            let mut value = value.into();
            if value.len() > MAX_METADATA_VALUE_LEN {
                let mut cut = MAX_METADATA_VALUE_LEN;
                while !value.is_char_boundary(cut) {
                    cut -= 1;
                }
                value.truncate(cut);
            }
            self.metadata.insert(key.into(), value);
        }
        self
    }
}

/// A classified, normalized error record.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    /// Unique id for correlating logs and responses.
    pub id: String,
    pub category: ErrorCategory,
    pub message: String,
    pub severity: Severity,
    pub context: ErrorContext,
}

/// Normalized error response returned to the API layer.
#[derive(Debug, Clone, Serialize)]
pub struct ApiErrorResponse {
    /// Always `false`.
    pub success: bool,
    /// Classified display message. Never a raw error chain.
    pub error: String,
    pub category: ErrorCategory,
    pub status_code: u16,
    /// Correlation id of the underlying [`ErrorRecord`].
    pub error_id: String,
}

/// Aggregated error statistics.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorStats {
    pub total: u64,
    pub by_category: HashMap<&'static str, u64>,
    pub recent_count: usize,
}

/// Classifies errors, tracks statistics, and renders normalized responses.
///
/// Cheap to share behind an `Arc`; counters are atomic and the recent-errors
/// buffer sits behind a short-lived mutex.
pub struct ErrorManager {
    counters: [AtomicU64; 6],
    recent: Mutex<VecDeque<ErrorRecord>>,
}

impl Default for ErrorManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorManager {
    #[must_use]
    pub fn new() -> Self {
        Self {
            counters: Default::default(),
            recent: Mutex::new(VecDeque::with_capacity(RECENT_ERRORS_CAPACITY)),
        }
    }

    /// Builds a context for `operation` at `path`, stamped with the current time.
    #[must_use]
    pub fn context(&self, operation: &str, path: &str) -> ErrorContext {
        ErrorContext::new(operation, path)
    }

    /// Classifies `error`, updates counters, appends to the recent buffer,
    /// and returns the normalized record.
    pub fn handle(&self, error: &ServiceError, context: ErrorContext) -> ErrorRecord {
        let category = error.category();
        let record = ErrorRecord {
            id: Uuid::new_v4().to_string(),
            category,
            message: error.to_string(),
            severity: category.severity(),
            context,
        };

        self.counters[category.index()].fetch_add(1, Ordering::Relaxed);

        match record.severity {
            Severity::Warning => tracing::warn!(
                error_id = %record.id,
                category = category.as_str(),
                operation = %record.context.operation,
                "{}", record.message
            ),
            Severity::Error | Severity::Critical => tracing::error!(
                error_id = %record.id,
                category = category.as_str(),
                operation = %record.context.operation,
                "{}", record.message
            ),
        }

        let mut recent = self.recent.lock();
        if recent.len() == RECENT_ERRORS_CAPACITY {
            recent.pop_front();
        }
        recent.push_back(record.clone());

        record
    }

    /// Classifies `error` and renders the response the API layer returns.
    ///
    /// The status code defaults from the category unless `status_hint` is
    /// supplied. Also records the error as [`handle`](Self::handle) does.
    pub fn error_response(
        &self,
        error: &ServiceError,
        context: ErrorContext,
        status_hint: Option<u16>,
    ) -> ApiErrorResponse {
        let record = self.handle(error, context);
        ApiErrorResponse {
            success: false,
            error: record.message.clone(),
            category: record.category,
            status_code: status_hint.unwrap_or_else(|| record.category.default_status_code()),
            error_id: record.id,
        }
    }

    /// Returns a request-handler-shaped closure that classifies and responds.
    ///
    /// The closure never panics: classification is total over [`ServiceError`]
    /// and response construction is infallible.
    #[must_use]
    pub fn global_handler(
        self: &std::sync::Arc<Self>,
    ) -> impl Fn(ServiceError, ErrorContext) -> ApiErrorResponse + Send + Sync + 'static {
        let manager = std::sync::Arc::clone(self);
        move |error, context| manager.error_response(&error, context, None)
    }

    /// Returns up to the last [`RECENT_ERRORS_CAPACITY`] records, oldest first.
    #[must_use]
    pub fn recent(&self) -> Vec<ErrorRecord> {
        self.recent.lock().iter().cloned().collect()
    }

    /// Returns aggregate counters.
    #[must_use]
    pub fn stats(&self) -> ErrorStats {
        let mut by_category = HashMap::new();
        let mut total = 0;
        for category in ErrorCategory::ALL {
            let count = self.counters[category.index()].load(Ordering::Relaxed);
            total += count;
            by_category.insert(category.as_str(), count);
        }
        ErrorStats { total, by_category, recent_count: self.recent.lock().len() }
    }

    /// Clears counters and the recent-errors buffer.
    pub fn reset(&self) {
        for counter in &self.counters {
            counter.store(0, Ordering::Relaxed);
        }
        self.recent.lock().clear();
    }
}

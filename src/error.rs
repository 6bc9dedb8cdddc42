//! Unified error handling for the route-stitcher library.
//!
//! Ingestion failures are split by source kind ([`ParseError`] for local
//! containers, [`FetchError`] for remote services) so callers can report them
//! per source. Generation never fails for lack of routes: that outcome is
//! carried by [`crate::GenerationStats`].

use thiserror::Error;

/// Failure to turn a local feature container into segments.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    /// Input is not a recognised line-feature container
    #[error("unsupported format: {reason}")]
    UnsupportedFormat { reason: String },
    /// Input parsed but holds no usable line geometry
    #[error("malformed geometry: {reason}")]
    MalformedGeometry { reason: String },
    /// Compressed archive could not be read
    #[error("archive error: {message}")]
    Archive { message: String },
    /// Facility catalog entry with a type outside the known set
    #[error("unknown facility type '{value}'")]
    UnknownFacilityType { value: String },
}

/// Failure to read a remote feature service.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FetchError {
    /// Endpoint unreachable or non-2xx after retries
    #[error("feature service unavailable at {url}{}: {message}", status_suffix(.status))]
    Unavailable {
        url: String,
        status: Option<u16>,
        message: String,
    },
    /// Response body or pagination state could not be interpreted
    #[error("invalid feature service response: {message}")]
    InvalidResponse { message: String },
    /// The caller cancelled the fetch
    #[error("fetch cancelled after {pages_fetched} pages")]
    Cancelled { pages_fetched: u32 },
    /// HTTP client could not be constructed
    #[error("http client error: {message}")]
    Client { message: String },
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default()
}

/// Failure inside a batch store.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("storage backend error: {message}")]
    Backend { message: String },
    #[error("failed to encode or decode stored record: {message}")]
    Codec { message: String },
    /// Record cannot be stored as given (untagged, or batch kind mismatch)
    #[error("invalid record: {message}")]
    InvalidRecord { message: String },
}

/// Invalid generation or fetch configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("{field} must be positive, got {value}")]
    NotPositive { field: &'static str, value: f64 },
    #[error("tier targets must be strictly ascending ({previous} then {next})")]
    TiersNotAscending { previous: f64, next: f64 },
    #[error("at least one tier is required")]
    NoTiers,
    #[error("tier name '{name}' is used more than once")]
    DuplicateTierName { name: String },
    #[error("tier ratios must satisfy 0 < lower <= 1 <= upper (lower {lower}, upper {upper})")]
    InvalidTierRatios { lower: f64, upper: f64 },
    #[error("closure tolerance {closure}m is below snapping tolerance {snapping}m")]
    ClosureBelowSnapping { closure: f64, snapping: f64 },
    #[error("invalid configuration document: {message}")]
    Document { message: String },
}

/// Umbrella error type for route-stitcher operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StitchError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("unknown activity type '{0}'")]
    UnknownActivity(String),
    #[error("internal error: {message}")]
    Internal { message: String },
}

/// Result type alias for route-stitcher operations.
pub type Result<T> = std::result::Result<T, StitchError>;

/// Extension trait for converting Option to StitchError.
pub trait OptionExt<T> {
    /// Convert Option to Result with a malformed geometry error.
    fn ok_or_malformed(self, reason: &str) -> std::result::Result<T, ParseError>;

    /// Convert Option to Result with generic internal error.
    fn ok_or_internal(self, message: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_malformed(self, reason: &str) -> std::result::Result<T, ParseError> {
        self.ok_or_else(|| ParseError::MalformedGeometry {
            reason: reason.to_string(),
        })
    }

    fn ok_or_internal(self, message: &str) -> Result<T> {
        self.ok_or_else(|| StitchError::Internal {
            message: message.to_string(),
        })
    }
}

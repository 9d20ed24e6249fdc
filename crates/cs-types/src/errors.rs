use thiserror::Error;

/// Boxed error returned by caller-supplied collaborators (builders, verifiers).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Main error type for the certsearch engine
#[derive(Error, Debug)]
pub enum CsError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid bounds for variable {name}: lower {lower} must be finite and below upper {upper}")]
    InvalidBounds { name: String, lower: f64, upper: f64 },

    #[error("Duplicate variable name: {name}")]
    DuplicateVariable { name: String },

    #[error("Low-discrepancy sampling supports up to {max} dimensions, got {dims}")]
    UnsupportedDimension { dims: usize, max: usize },

    #[error("Budget must be positive")]
    NonPositiveBudget,

    #[error("Builder failed for candidate {index}: {source}")]
    Builder {
        index: usize,
        #[source]
        source: BoxError,
    },

    #[error("Verifier failed for candidate {index}: {source}")]
    Verifier {
        index: usize,
        #[source]
        source: BoxError,
    },

    #[error("Digest mismatch: recorded {recorded}, recomputed {recomputed}")]
    DigestMismatch { recorded: String, recomputed: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CsError {
    /// Index of the candidate that triggered a collaborator failure, if any.
    pub fn candidate_index(&self) -> Option<usize> {
        match self {
            Self::Builder { index, .. } | Self::Verifier { index, .. } => Some(*index),
            _ => None,
        }
    }

    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::Config(_)
                | Self::InvalidBounds { .. }
                | Self::DuplicateVariable { .. }
                | Self::UnsupportedDimension { .. }
                | Self::NonPositiveBudget
        )
    }
}

/// Failures inside the acceptance-guided acceleration stage.
///
/// The orchestrator recovers from all of these by falling back to
/// low-discrepancy sampling.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AccelerationError {
    #[error("Insufficient training rows: have {have}, need {need}")]
    InsufficientTraining { have: usize, need: usize },

    #[error("Invalid bounds for {name}: ({lower}, {upper})")]
    InvalidBounds { name: String, lower: f64, upper: f64 },

    #[error("Ridge system for {target} is not positive definite")]
    SingularSystem { target: String },

    #[error("No finite objective values among training rows")]
    NoObjective,

    #[error("Candidate pool sampling failed: {0}")]
    Sampling(String),

    #[error("Candidate pool produced no admissible proposals")]
    NoProposals,
}

/// Result type alias for certsearch operations
pub type CsResult<T> = Result<T, CsError>;

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::CsError::Config(format!($($arg)*))
    };
}

use slate_query::FilterParseError;

/// Broad classification of a planning failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    BadValue,
    IndexNotFound,
    Internal,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PlannerError {
    /// Malformed or self-contradictory input.
    #[error("bad value: {0}")]
    BadValue(String),
    /// A hint could not be resolved to a single index.
    #[error("index not found: {0}")]
    IndexNotFound(String),
    /// A cached plan no longer fits the query it is replayed against.
    #[error("internal planner error: {0}")]
    Internal(String),
    #[error(transparent)]
    Parse(#[from] FilterParseError),
}

impl PlannerError {
    pub fn bad_value(msg: impl Into<String>) -> Self {
        PlannerError::BadValue(msg.into())
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            PlannerError::BadValue(_) | PlannerError::Parse(_) => ErrorCode::BadValue,
            PlannerError::IndexNotFound(_) => ErrorCode::IndexNotFound,
            PlannerError::Internal(_) => ErrorCode::Internal,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            PlannerError::BadValue(m) | PlannerError::IndexNotFound(m) | PlannerError::Internal(m) => m,
            PlannerError::Parse(e) => &e.0,
        }
    }
}

pub type Result<T, E = PlannerError> = std::result::Result<T, E>;

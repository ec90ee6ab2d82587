use thiserror::Error;

/// Failure kinds surfaced by code-index queries.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub(crate) enum QueryError {
    #[error("decompiler not initialized. Please call init_session first.")]
    NotInitialized,
    #[error("Class not found: {0}")]
    ClassNotFound(String),
    #[error("Method not found: {method} in class {class}")]
    MethodNotFound { class: String, method: String },
    /// A lookup that completed but matched nothing.
    #[error("{0}")]
    NoResultsFound(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("{context}: {message}")]
    Internal { context: String, message: String },
}

impl QueryError {
    /// Wrap a backend failure, keeping its full context chain.
    pub(crate) fn internal(context: impl Into<String>, err: &anyhow::Error) -> Self {
        Self::Internal {
            context: context.into(),
            message: format!("{err:#}"),
        }
    }

    /// Stable identifier used in logs and structured output.
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Self::NotInitialized => "not_initialized",
            Self::ClassNotFound(_) => "class_not_found",
            Self::MethodNotFound { .. } => "method_not_found",
            Self::NoResultsFound(_) => "no_results",
            Self::InvalidInput(_) => "invalid_input",
            Self::Internal { .. } => "internal",
        }
    }
}

pub(crate) type QueryResult<T> = Result<T, QueryError>;

use serde::Serialize;
use serde_json::Value;

use crate::error::{QueryError, QueryResult};

/// Uniform `{success, error, data}` reply shared by every transport.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub(crate) struct Envelope {
    pub(crate) success: bool,
    pub(crate) error: Option<String>,
    pub(crate) data: Option<Value>,
}

impl Envelope {
    pub(crate) fn ok(data: Value) -> Self {
        Self {
            success: true,
            error: None,
            data: Some(data),
        }
    }

    /// Map a query error. Empty lookups stay successful and carry only a message.
    pub(crate) fn from_error(error: &QueryError) -> Self {
        tracing::debug!(kind = error.kind(), "query error");
        Self {
            success: matches!(error, QueryError::NoResultsFound(_)),
            error: Some(error.to_string()),
            data: None,
        }
    }

    pub(crate) fn from_result<T: Serialize>(result: QueryResult<T>) -> Self {
        match result {
            Ok(data) => match serde_json::to_value(data) {
                Ok(value) => Self::ok(value),
                Err(err) => Self::from_error(&QueryError::internal(
                    "failed to serialize response",
                    &err.into(),
                )),
            },
            Err(error) => Self::from_error(&error),
        }
    }
}

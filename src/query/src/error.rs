use std::result;

use common::error::CommonError;
use thiserror::Error;

use crate::provider::BreakdownResolutionError;

pub type Result<T> = result::Result<T, QueryError>;

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("invalid spec: {0}")]
    InvalidSpec(String),
    #[error("execution timed out")]
    ExecutionTimeout,
    #[error("execution failed at {stage}: {message}")]
    Execution { stage: String, message: String },
    #[error("breakdown resolution: {0}")]
    BreakdownResolution(String),
    #[error("common: {0:?}")]
    Common(#[from] CommonError),
    #[error("serde: {0:?}")]
    Serde(#[from] serde_json::Error),
}

impl From<BreakdownResolutionError> for QueryError {
    fn from(err: BreakdownResolutionError) -> Self {
        QueryError::BreakdownResolution(err.0)
    }
}

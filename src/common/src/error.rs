use std::result;

use thiserror::Error;

pub type Result<T> = result::Result<T, CommonError>;

#[derive(Error, Debug)]
pub enum CommonError {
    #[error("BadRequest: {0:?}")]
    BadRequest(String),
    #[error("serde: {0:?}")]
    Serde(#[from] serde_json::Error),
}

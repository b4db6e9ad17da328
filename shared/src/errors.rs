//! Shared error types for the supervisor system

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SharedError {
    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: String, value: String },
}

pub type SharedResult<T> = Result<T, SharedError>;

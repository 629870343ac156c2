//! API handlers module

pub mod chat;
pub mod health;
pub mod search;

use lexforge_common::errors::AppError;
use validator::ValidationErrors;

/// Map request validation failures onto the API error type
pub(crate) fn invalid(errors: ValidationErrors) -> AppError {
    let field = errors.field_errors().keys().next().map(|f| f.to_string());
    AppError::Validation {
        message: errors.to_string(),
        field,
    }
}

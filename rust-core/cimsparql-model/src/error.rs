// SPDX-License-Identifier: PMPL-1.0-or-later
//! Model-level errors.

use cimsparql_client::error::ErrorCategory;
use cimsparql_client::table::TableError;
use cimsparql_client::SparqlError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error(transparent)]
    Client(#[from] SparqlError),

    #[error("Cannot convert '{value}' in column '{column}' to {target}")]
    TypeCoercion {
        column: String,
        value: String,
        target: &'static str,
    },

    #[error("{schema}: {reason}")]
    Schema { schema: &'static str, reason: String },

    #[error("Template error: {0}")]
    Template(String),

    #[error("Invalid value mapper pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error(transparent)]
    Table(#[from] TableError),
}

impl ModelError {
    /// Configuration, transport or data; model-side failures are data errors.
    pub fn category(&self) -> ErrorCategory {
        match self {
            ModelError::Client(err) => err.category(),
            ModelError::Template(_) | ModelError::InvalidPattern { .. } => {
                ErrorCategory::Configuration
            }
            _ => ErrorCategory::Data,
        }
    }
}

pub type Result<T> = std::result::Result<T, ModelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        let err = ModelError::from(SparqlError::Configuration("x".into()));
        assert_eq!(err.category(), ErrorCategory::Configuration);
        let err = ModelError::TypeCoercion {
            column: "p".into(),
            value: "abc".into(),
            target: "float",
        };
        assert_eq!(err.category(), ErrorCategory::Data);
        assert_eq!(err.to_string(), "Cannot convert 'abc' in column 'p' to float");
    }
}

//! Document merge evaluation.
//!
//! Fragments are folded into one document with [`MergeEvaluator::merge`]:
//! - Mappings: deep-merge by key
//! - Sequences: replaced by the overlay unless it starts with a directive
//!   (`(( append ))`, `(( prepend ))`, `(( replace ))`, `(( inline ))`,
//!   `(( delete ... ))`)
//! - Scalars: overlay wins
//!
//! With `evaluate` set, `(( grab ... ))`, `(( concat ... ))` and
//! `(( prune ))` expressions are resolved against the merged document.

mod expr;
mod structural;

use serde_json::{Map, Value};
use thiserror::Error;

pub use expr::evaluate;
pub use structural::{deep_merge, merge_documents};

/// A resolved (or partially resolved) configuration document.
pub type Document = Map<String, Value>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MergeError {
    #[error("Invalid directive '{directive}' at '{path}': {reason}")]
    InvalidDirective {
        path: String,
        directive: String,
        reason: String,
    },

    #[error("Unknown operator '{operator}' at '{path}'")]
    UnknownOperator { path: String, operator: String },

    #[error("Invalid expression '{expression}' at '{path}': {reason}")]
    InvalidExpression {
        path: String,
        expression: String,
        reason: String,
    },

    #[error("Unable to resolve '{reference}' referenced at '{path}'")]
    UnresolvedReference { path: String, reference: String },

    #[error("Cyclic reference through '{path}'")]
    CyclicReference { path: String },
}

/// Folds an overlay document into a base document.
///
/// Implementations must not retain state between calls; the same evaluator
/// is shared by concurrent resolutions.
pub trait MergeEvaluator: Send + Sync {
    fn merge(&self, base: Document, overlay: Document, evaluate: bool)
        -> Result<Document, MergeError>;
}

/// Default evaluator implementing the `(( ... ))` operator syntax.
#[derive(Debug, Clone, Copy, Default)]
pub struct OperatorEvaluator;

impl MergeEvaluator for OperatorEvaluator {
    fn merge(
        &self,
        base: Document,
        overlay: Document,
        evaluate: bool,
    ) -> Result<Document, MergeError> {
        let merged = merge_documents(base, overlay)?;
        if evaluate {
            expr::evaluate(merged)
        } else {
            Ok(merged)
        }
    }
}

/// Returns the body of a `(( ... ))` operator string, trimmed.
pub(crate) fn operator_body(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    trimmed
        .strip_prefix("((")
        .and_then(|rest| rest.strip_suffix("))"))
        .map(str::trim)
}

pub(crate) fn child_path(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", parent, key)
    }
}

//! Structured error handling for the tally engine
//!
//! Parse-boundary failures and fatal evaluation failures are the only
//! conditions reported through [`TallyError`]. Matching validation rules are
//! ordinary result data and never travel through this type.

use thiserror::Error;

/// Error type covering every fatal condition in the engine
#[derive(Error, Debug, Clone)]
pub enum TallyError {
    /// Structurally invalid rule set (empty event id, malformed expression
    /// shape, unresolved or cyclic rule references)
    #[error("Rule set error: {message}")]
    RuleSet {
        message: String,
        rule_id: Option<String>,
        detail: Option<String>,
    },

    /// Fatal expression evaluation errors (non-numeric comparison operands,
    /// invalid datetime literals, unresolved rule references at runtime)
    #[error("Expression error: {message}")]
    Expression {
        message: String,
        field: Option<String>,
        detail: Option<String>,
    },

    /// Fatal pricing action errors (missing price fields, malformed targets)
    #[error("Action error: {message}")]
    Action {
        message: String,
        rule_id: Option<String>,
        action: Option<String>,
    },

    /// Unknown or non-numeric `$variables.<name>` reference
    #[error("Variable error: {message}")]
    Variable { message: String, name: Option<String> },

    /// JSON decoding and conversion errors
    #[error("Serialization error: {message}")]
    Serialization { message: String, operation: Option<String> },
}

/// Broad classification used by callers that only need to distinguish the
/// parse boundary from runtime evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Raised while decoding or structurally validating a rule set
    Parse,
    /// Raised while evaluating a rule set against a context
    Evaluation,
}

impl TallyError {
    /// Get the error category for logging and metrics
    pub fn category(&self) -> &'static str {
        match self {
            TallyError::RuleSet { .. } => "rule_set",
            TallyError::Expression { .. } => "expression",
            TallyError::Action { .. } => "action",
            TallyError::Variable { .. } => "variable",
            TallyError::Serialization { .. } => "serialization",
        }
    }

    /// Classify this error as a parse-boundary or evaluation failure
    pub fn kind(&self) -> ErrorKind {
        match self {
            TallyError::RuleSet { .. } | TallyError::Serialization { .. } => ErrorKind::Parse,
            TallyError::Expression { .. }
            | TallyError::Action { .. }
            | TallyError::Variable { .. } => ErrorKind::Evaluation,
        }
    }
}

/// Result type alias for engine operations
pub type TallyResult<T> = Result<T, TallyError>;

/// Convenience constructors for common error scenarios
impl TallyError {
    /// Create a rule set validation error
    pub fn rule_set(message: impl Into<String>) -> Self {
        Self::RuleSet { message: message.into(), rule_id: None, detail: None }
    }

    /// Create a rule set validation error attributed to one rule
    pub fn rule_set_with_id(rule_id: &str, message: impl Into<String>) -> Self {
        Self::RuleSet {
            message: message.into(),
            rule_id: Some(rule_id.to_string()),
            detail: None,
        }
    }

    /// Create an expression evaluation error
    pub fn expression(message: impl Into<String>) -> Self {
        Self::Expression { message: message.into(), field: None, detail: None }
    }

    /// Create an expression evaluation error attributed to one field path
    pub fn expression_on_field(field: &str, message: impl Into<String>) -> Self {
        Self::Expression {
            message: message.into(),
            field: Some(field.to_string()),
            detail: None,
        }
    }

    /// Create a pricing action error
    pub fn action(rule_id: &str, action: &str, message: impl Into<String>) -> Self {
        Self::Action {
            message: message.into(),
            rule_id: Some(rule_id.to_string()),
            action: Some(action.to_string()),
        }
    }

    /// Create an unknown-variable error
    pub fn unknown_variable(name: &str) -> Self {
        Self::Variable {
            message: format!("unknown variable '{name}'"),
            name: Some(name.to_string()),
        }
    }

    /// Create a variable resolution error
    pub fn variable(name: &str, message: impl Into<String>) -> Self {
        Self::Variable { message: message.into(), name: Some(name.to_string()) }
    }

    /// Create a serialization error
    pub fn serialization(operation: &str, message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
            operation: Some(operation.to_string()),
        }
    }
}

impl From<serde_json::Error> for TallyError {
    fn from(err: serde_json::Error) -> Self {
        TallyError::serialization(
            if err.is_syntax() {
                "parse"
            } else if err.is_data() {
                "validate"
            } else {
                "unknown"
            },
            format!("JSON error: {err}"),
        )
    }
}

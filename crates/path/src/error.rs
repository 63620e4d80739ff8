use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PathError {
    #[error("Parse error in '{input}': {message}")]
    Parse { input: String, message: String },

    #[error("Unknown function '{0}'")]
    UnknownFunction(String),

    #[error("Function '{function}' error: {message}")]
    FunctionError { function: String, message: String },

    #[error("Type error: {0}")]
    TypeError(String),

    #[error("Variable '${0}' not declared")]
    UnknownVariable(String),

    #[error("Namespace prefix '{0}' not declared")]
    UnknownPrefix(String),

    #[error("Context node required")]
    NoContextNode,
}

impl PathError {
    pub(crate) fn function(function: &str, message: impl Into<String>) -> Self {
        PathError::FunctionError {
            function: function.to_string(),
            message: message.into(),
        }
    }
}

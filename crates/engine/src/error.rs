use std::fmt;
use stxflow_path::PathError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StxError {
    #[error("Definition error: {0}")]
    Definition(String),

    #[error("Evaluation error: {0}")]
    Evaluation(#[from] PathError),

    #[error("Resource error: {0}")]
    Resource(String),

    #[error("Input error: {0}")]
    Input(String),

    #[error("Output error: {0}")]
    Output(String),

    #[error("Error parsing XML at position {position}: {message}")]
    Xml { position: u64, message: String },

    #[error("Recursion limit of {0} nested calls exceeded")]
    RecursionLimit(usize),

    #[error("Transformation terminated by message: {0}")]
    Terminated(String),
}

impl StxError {
    pub fn definition(msg: impl Into<String>) -> Self {
        Self::Definition(msg.into())
    }

    pub fn resource(msg: impl Into<String>) -> Self {
        Self::Resource(msg.into())
    }

    pub fn input(msg: impl Into<String>) -> Self {
        Self::Input(msg.into())
    }

    pub fn output(msg: impl Into<String>) -> Self {
        Self::Output(msg.into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Warning,
    Error,
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Fatal => "fatal error",
        };
        f.write_str(label)
    }
}

/// Position of an instruction in the rule set it was built from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Location {
    pub line: u32,
    pub column: u32,
}

impl Location {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }

    /// Instructions built without an explicit position carry line 0.
    pub fn is_known(&self) -> bool {
        self.line > 0
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// A reported problem together with how serious it is and where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub error: StxError,
    pub location: Option<Location>,
}

impl Diagnostic {
    pub fn new(severity: Severity, error: StxError, location: Option<Location>) -> Self {
        Self {
            severity,
            error,
            location: location.filter(Location::is_known),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(location) => write!(f, "{} at {}: {}", self.severity, location, self.error),
            None => write!(f, "{}: {}", self.severity, self.error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostic_display() {
        let diagnostic = Diagnostic::new(
            Severity::Error,
            StxError::definition("Group `g' not defined"),
            Some(Location::new(12, 4)),
        );
        assert_eq!(
            diagnostic.to_string(),
            "error at 12:4: Definition error: Group `g' not defined"
        );

        let unknown = Diagnostic::new(Severity::Warning, StxError::input("x"), Some(Location::default()));
        assert_eq!(unknown.location, None);
        assert_eq!(unknown.to_string(), "warning: Input error: x");
    }

    #[test]
    fn test_path_errors_convert() {
        let err: StxError = PathError::UnknownVariable("x".into()).into();
        assert_eq!(err.to_string(), "Evaluation error: Variable '$x' not declared");
    }
}

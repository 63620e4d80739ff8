//! The error channel. Every non-fatal problem is reported to an [`ErrorListener`],
//! which decides whether the transformation continues.

use crate::error::{Diagnostic, Severity, StxError};
use std::cell::RefCell;
use std::rc::Rc;

pub trait ErrorListener {
    /// Returning `Err` aborts the transformation with that error.
    fn report(&mut self, diagnostic: &Diagnostic) -> Result<(), StxError>;
}

/// Logs warnings and errors through `log`; aborts on fatal errors, and on every
/// error when strict.
#[derive(Debug, Default, Clone)]
pub struct LogErrorListener {
    strict: bool,
}

impl LogErrorListener {
    pub fn new(strict: bool) -> Self {
        Self { strict }
    }
}

impl ErrorListener for LogErrorListener {
    fn report(&mut self, diagnostic: &Diagnostic) -> Result<(), StxError> {
        match diagnostic.severity {
            Severity::Warning => {
                log::warn!("{}", diagnostic);
                Ok(())
            }
            Severity::Error if !self.strict => {
                log::warn!("{}", diagnostic);
                Ok(())
            }
            Severity::Error | Severity::Fatal => {
                log::error!("{}", diagnostic);
                Err(diagnostic.error.clone())
            }
        }
    }
}

/// Records every diagnostic; only fatal ones abort. Clones share the same record.
#[derive(Debug, Default, Clone)]
pub struct CollectingErrorListener {
    diagnostics: Rc<RefCell<Vec<Diagnostic>>>,
}

impl CollectingErrorListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics.borrow().clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.diagnostics
            .borrow()
            .iter()
            .map(|d| d.error.to_string())
            .collect()
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .borrow()
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }
}

impl ErrorListener for CollectingErrorListener {
    fn report(&mut self, diagnostic: &Diagnostic) -> Result<(), StxError> {
        self.diagnostics.borrow_mut().push(diagnostic.clone());
        if diagnostic.severity == Severity::Fatal {
            return Err(diagnostic.error.clone());
        }
        Ok(())
    }
}

//! Streaming STX transformations.
//!
//! A [`Program`] is a set of compiled templates, procedures and groups, built
//! with [`ProgramBuilder`]. A [`Processor`] runs a program over a stream of
//! input events and writes the result to an [`OutputSink`]. Templates are
//! suspended while the children, the node itself or its following siblings
//! are processed, so no part of the input is ever kept beyond its ancestors.

pub mod config;
pub mod diagnostics;
pub(crate) mod emitter;
pub mod error;
mod executor_handlers;
pub mod observer;
pub mod output;
pub mod processor;
pub mod program;
pub(crate) mod scope;
pub mod source;

pub use config::{PassThrough, ProcessorConfig};
pub use diagnostics::{CollectingErrorListener, ErrorListener, LogErrorListener};
pub use error::{Diagnostic, Location, Severity, StxError};
pub use observer::{TraceObserver, TraceRecorder};
pub use output::{EventRecorder, OutputEvent, OutputResolver, OutputSink, StringSink};
pub use processor::Processor;
pub use program::{
    BodyBuilder, ChooseBuilder, GroupId, Program, ProgramBuilder, TemplateDecl, Traverse,
    Visibility,
};
pub use source::{feed_str, transform_str};

#[cfg(test)]
mod tests;

//! stxflow: streaming transformations over XML event streams.
//!
//! The engine crate holds the processor and the program builder; the path
//! crate holds the event model and the expression language. Both are
//! re-exported here so callers need a single dependency.
//!
//! ```no_run
//! use stxflow::{EventRecorder, ProcessorConfig, ProgramBuilder, transform_str};
//!
//! let mut builder = ProgramBuilder::new();
//! builder.template("item", |t| {
//!     t.literal_element("entry", &[("id", "{@id}")], |e| {
//!         e.process_children();
//!     });
//! });
//! let program = builder.build()?;
//! let mut out = EventRecorder::new();
//! transform_str(&program, r#"<list><item id="1"/></list>"#, ProcessorConfig::default(), &mut out)?;
//! assert_eq!(out.render(), r#"<list><entry id="1"></entry></list>"#);
//! # Ok::<(), stxflow::StxError>(())
//! ```

pub use stxflow_engine::*;
pub use stxflow_path as path;

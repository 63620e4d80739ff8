//! Helpers shared by the integration tests.

#![allow(dead_code)]

use stxflow::{
    CollectingErrorListener, EventRecorder, Processor, ProcessorConfig, Program, ProgramBuilder,
    StxError, feed_str,
};

pub type TestResult = Result<(), Box<dyn std::error::Error>>;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Builds a program from a closure over the builder.
pub fn build(declare: impl FnOnce(&mut ProgramBuilder)) -> Result<Program, StxError> {
    let mut builder = ProgramBuilder::new();
    declare(&mut builder);
    builder.build()
}

/// Runs `program` over `input` with the default configuration and renders the result.
pub fn run(program: &Program, input: &str) -> Result<String, StxError> {
    run_with(program, input, ProcessorConfig::default())
}

pub fn run_with(program: &Program, input: &str, config: ProcessorConfig) -> Result<String, StxError> {
    init_logger();
    let mut out = EventRecorder::new();
    stxflow::transform_str(program, input, config, &mut out)?;
    Ok(out.render())
}

/// Like [`run`], but collects the diagnostics instead of logging them.
pub fn run_collecting(
    program: &Program,
    input: &str,
) -> Result<(String, CollectingErrorListener), StxError> {
    init_logger();
    let listener = CollectingErrorListener::new();
    let mut out = EventRecorder::new();
    {
        let mut processor = Processor::new(program, &mut out).with_error_listener(listener.clone());
        feed_str(input, &mut processor)?;
    }
    Ok((out.render(), listener))
}

//! Hooks for debuggers and tracers. Every method has a no-op default.

use crate::output::OutputEvent;
use crate::program::Template;
use stxflow_path::{Event, EventKind};

pub trait TraceObserver {
    fn start_document(&mut self) {}
    fn end_document(&mut self) {}
    /// A node became current at the given stack depth.
    fn enter_event(&mut self, _event: &Event, _depth: usize) {}
    fn leave_event(&mut self, _event: &Event, _depth: usize) {}
    fn enter_template(&mut self, _template: &Template, _event: &Event) {}
    fn leave_template(&mut self, _template: &Template) {}
    /// A result event is about to be written to the innermost sink.
    fn emit(&mut self, _event: &OutputEvent) {}
}

/// Records a one-line description of every callback.
#[derive(Debug, Default, Clone)]
pub struct TraceRecorder {
    pub lines: Vec<String>,
}

impl TraceRecorder {
    pub fn new() -> Self {
        Self::default()
    }
}

fn describe(event: &Event) -> String {
    match event.kind() {
        EventKind::Root => "/".to_string(),
        EventKind::Element => event.name().map(|n| n.to_string()).unwrap_or_default(),
        EventKind::Attribute => format!(
            "@{}",
            event.name().map(|n| n.to_string()).unwrap_or_default()
        ),
        EventKind::Text => format!("text({:?})", event.value()),
        EventKind::Comment => "comment()".to_string(),
        EventKind::ProcessingInstruction => format!(
            "processing-instruction({})",
            event.name().map(|n| n.to_string()).unwrap_or_default()
        ),
    }
}

impl TraceObserver for TraceRecorder {
    fn start_document(&mut self) {
        self.lines.push("start-document".to_string());
    }

    fn end_document(&mut self) {
        self.lines.push("end-document".to_string());
    }

    fn enter_event(&mut self, event: &Event, depth: usize) {
        self.lines.push(format!("enter {} {}", depth, describe(event)));
    }

    fn leave_event(&mut self, event: &Event, depth: usize) {
        self.lines.push(format!("leave {} {}", depth, describe(event)));
    }

    fn enter_template(&mut self, template: &Template, event: &Event) {
        self.lines
            .push(format!("template `{}' for {}", template.source, describe(event)));
    }

    fn leave_template(&mut self, template: &Template) {
        self.lines.push(format!("end template `{}'", template.source));
    }

    fn emit(&mut self, event: &OutputEvent) {
        self.lines.push(format!("emit {:?}", event));
    }
}

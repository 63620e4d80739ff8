//! Output sinks: the receivers of the result event stream.

use crate::error::StxError;
use stxflow_path::{Attribute, QName};

/// Receives the result of a transformation as a stream of document events.
pub trait OutputSink {
    fn start_document(&mut self) -> Result<(), StxError> {
        Ok(())
    }
    fn end_document(&mut self) -> Result<(), StxError> {
        Ok(())
    }
    fn start_element(&mut self, name: &QName, attributes: &[Attribute]) -> Result<(), StxError>;
    fn end_element(&mut self, name: &QName) -> Result<(), StxError>;
    fn characters(&mut self, text: &str) -> Result<(), StxError>;
    fn comment(&mut self, text: &str) -> Result<(), StxError>;
    fn processing_instruction(&mut self, target: &str, data: &str) -> Result<(), StxError>;
    fn start_cdata(&mut self) -> Result<(), StxError>;
    fn end_cdata(&mut self) -> Result<(), StxError>;
}

/// One result event, as seen by trace observers and recorded by [`EventRecorder`].
#[derive(Debug, Clone, PartialEq)]
pub enum OutputEvent {
    StartDocument,
    EndDocument,
    StartElement {
        name: QName,
        attributes: Vec<Attribute>,
    },
    EndElement(QName),
    Characters(String),
    Comment(String),
    ProcessingInstruction { target: String, data: String },
    StartCdata,
    EndCdata,
}

impl OutputEvent {
    pub fn send_to(&self, sink: &mut dyn OutputSink) -> Result<(), StxError> {
        match self {
            OutputEvent::StartDocument => sink.start_document(),
            OutputEvent::EndDocument => sink.end_document(),
            OutputEvent::StartElement { name, attributes } => sink.start_element(name, attributes),
            OutputEvent::EndElement(name) => sink.end_element(name),
            OutputEvent::Characters(text) => sink.characters(text),
            OutputEvent::Comment(text) => sink.comment(text),
            OutputEvent::ProcessingInstruction { target, data } => {
                sink.processing_instruction(target, data)
            }
            OutputEvent::StartCdata => sink.start_cdata(),
            OutputEvent::EndCdata => sink.end_cdata(),
        }
    }
}

/// Collects character content only. Used to capture the text of variables,
/// attributes, comments and the like; markup is rejected.
#[derive(Debug, Default, Clone)]
pub struct StringSink {
    buffer: String,
    /// Describes what is being captured, for error messages.
    context: String,
}

impl StringSink {
    pub fn new(context: impl Into<String>) -> Self {
        Self {
            buffer: String::new(),
            context: context.into(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.buffer
    }

    pub fn into_string(self) -> String {
        self.buffer
    }

    fn reject(&self, what: &str) -> StxError {
        StxError::output(format!("Can't create {} here ({})", what, self.context))
    }
}

impl OutputSink for StringSink {
    fn start_element(&mut self, name: &QName, _attributes: &[Attribute]) -> Result<(), StxError> {
        Err(self.reject(&format!("element `{}'", name)))
    }

    fn end_element(&mut self, name: &QName) -> Result<(), StxError> {
        Err(self.reject(&format!("element `{}'", name)))
    }

    fn characters(&mut self, text: &str) -> Result<(), StxError> {
        self.buffer.push_str(text);
        Ok(())
    }

    fn comment(&mut self, _text: &str) -> Result<(), StxError> {
        Err(self.reject("a comment"))
    }

    fn processing_instruction(&mut self, target: &str, _data: &str) -> Result<(), StxError> {
        Err(self.reject(&format!("processing instruction `{}'", target)))
    }

    fn start_cdata(&mut self) -> Result<(), StxError> {
        Ok(())
    }

    fn end_cdata(&mut self) -> Result<(), StxError> {
        Ok(())
    }
}

/// Records every event it receives, merging adjacent character events.
#[derive(Debug, Default, Clone)]
pub struct EventRecorder {
    events: Vec<OutputEvent>,
}

impl EventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[OutputEvent] {
        &self.events
    }

    pub fn into_events(self) -> Vec<OutputEvent> {
        self.events
    }

    /// A compact markup rendering of the recorded stream, for inspection.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let mut in_cdata = false;
        for event in &self.events {
            match event {
                OutputEvent::StartDocument | OutputEvent::EndDocument => {}
                OutputEvent::StartElement { name, attributes } => {
                    out.push('<');
                    out.push_str(&name.to_string());
                    for attribute in attributes {
                        out.push_str(&format!(
                            " {}=\"{}\"",
                            attribute.name,
                            escape(&attribute.value).replace('"', "&quot;")
                        ));
                    }
                    out.push('>');
                }
                OutputEvent::EndElement(name) => out.push_str(&format!("</{}>", name)),
                OutputEvent::Characters(text) if in_cdata => out.push_str(text),
                OutputEvent::Characters(text) => out.push_str(&escape(text)),
                OutputEvent::Comment(text) => out.push_str(&format!("<!--{}-->", text)),
                OutputEvent::ProcessingInstruction { target, data } if data.is_empty() => {
                    out.push_str(&format!("<?{}?>", target))
                }
                OutputEvent::ProcessingInstruction { target, data } => {
                    out.push_str(&format!("<?{} {}?>", target, data))
                }
                OutputEvent::StartCdata => {
                    in_cdata = true;
                    out.push_str("<![CDATA[");
                }
                OutputEvent::EndCdata => {
                    in_cdata = false;
                    out.push_str("]]>");
                }
            }
        }
        out
    }

    fn record(&mut self, event: OutputEvent) -> Result<(), StxError> {
        if let OutputEvent::Characters(text) = &event
            && let Some(OutputEvent::Characters(previous)) = self.events.last_mut()
        {
            previous.push_str(text);
            return Ok(());
        }
        self.events.push(event);
        Ok(())
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

impl OutputSink for EventRecorder {
    fn start_document(&mut self) -> Result<(), StxError> {
        self.record(OutputEvent::StartDocument)
    }

    fn end_document(&mut self) -> Result<(), StxError> {
        self.record(OutputEvent::EndDocument)
    }

    fn start_element(&mut self, name: &QName, attributes: &[Attribute]) -> Result<(), StxError> {
        self.record(OutputEvent::StartElement {
            name: name.clone(),
            attributes: attributes.to_vec(),
        })
    }

    fn end_element(&mut self, name: &QName) -> Result<(), StxError> {
        self.record(OutputEvent::EndElement(name.clone()))
    }

    fn characters(&mut self, text: &str) -> Result<(), StxError> {
        if text.is_empty() {
            return Ok(());
        }
        self.record(OutputEvent::Characters(text.to_string()))
    }

    fn comment(&mut self, text: &str) -> Result<(), StxError> {
        self.record(OutputEvent::Comment(text.to_string()))
    }

    fn processing_instruction(&mut self, target: &str, data: &str) -> Result<(), StxError> {
        self.record(OutputEvent::ProcessingInstruction {
            target: target.to_string(),
            data: data.to_string(),
        })
    }

    fn start_cdata(&mut self) -> Result<(), StxError> {
        self.record(OutputEvent::StartCdata)
    }

    fn end_cdata(&mut self) -> Result<(), StxError> {
        self.record(OutputEvent::EndCdata)
    }
}

/// Opens the secondary sinks that `result-document` redirects output to.
pub trait OutputResolver {
    fn resolve(&mut self, href: &str) -> Result<Box<dyn OutputSink>, StxError>;
}

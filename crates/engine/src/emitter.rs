//! The emitter stack: routes result events to the innermost active sink.
//!
//! The bottom entry is the transformation's output. Capturing instructions
//! (variables, attributes, comments, CDATA sections...) push a [`StringSink`]
//! for their content and `result-document` pushes a redirected sink; both are
//! owned by the instruction that pushed them and popped in LIFO order.

use crate::error::StxError;
use crate::output::{OutputEvent, OutputSink, StringSink};
use crate::program::NodeId;
use stxflow_path::{Attribute, QName};

enum Target<'a> {
    Output(&'a mut dyn OutputSink),
    Redirect(Box<dyn OutputSink>),
    Capture(StringSink),
}

struct Entry<'a> {
    target: Target<'a>,
    owner: Option<NodeId>,
    /// A start tag that may still receive attributes.
    pending: Option<(QName, Vec<Attribute>)>,
    open: Vec<QName>,
}

impl<'a> Entry<'a> {
    fn new(target: Target<'a>, owner: Option<NodeId>) -> Self {
        Self {
            target,
            owner,
            pending: None,
            open: Vec::new(),
        }
    }

    fn sink(&mut self) -> &mut dyn OutputSink {
        match &mut self.target {
            Target::Output(sink) => &mut **sink,
            Target::Redirect(sink) => sink.as_mut(),
            Target::Capture(sink) => sink,
        }
    }

    fn flush(&mut self) -> Result<(), StxError> {
        match self.pending.take() {
            Some((name, attributes)) => self.sink().start_element(&name, &attributes),
            None => Ok(()),
        }
    }

    fn check_closed(&self) -> Result<(), StxError> {
        match self.open.last() {
            Some(name) => Err(StxError::output(format!(
                "Element `{}' was never closed",
                name
            ))),
            None => Ok(()),
        }
    }
}

pub(crate) struct EmitterStack<'a> {
    entries: Vec<Entry<'a>>,
}

impl<'a> EmitterStack<'a> {
    pub fn new(output: &'a mut dyn OutputSink) -> Self {
        Self {
            entries: vec![Entry::new(Target::Output(output), None)],
        }
    }

    /// True when the sink owned by `owner` is somewhere on the stack.
    pub fn is_active(&self, owner: NodeId) -> bool {
        self.entries.iter().any(|e| e.owner == Some(owner))
    }

    pub fn push_capture(&mut self, owner: NodeId, context: impl Into<String>) -> Result<(), StxError> {
        if self.is_active(owner) {
            return Err(StxError::definition(format!(
                "Nested use of the same {} is not allowed",
                context.into()
            )));
        }
        self.entries
            .push(Entry::new(Target::Capture(StringSink::new(context)), Some(owner)));
        Ok(())
    }

    pub fn pop_capture(&mut self, owner: NodeId) -> Result<String, StxError> {
        match self.pop_owned(owner)?.target {
            Target::Capture(sink) => Ok(sink.into_string()),
            _ => Err(StxError::output("Output redirection closed as a capture")),
        }
    }

    pub fn push_redirect(&mut self, owner: NodeId, mut sink: Box<dyn OutputSink>) -> Result<(), StxError> {
        if self.is_active(owner) {
            return Err(StxError::definition(
                "Nested use of the same result document is not allowed",
            ));
        }
        sink.start_document()?;
        self.entries
            .push(Entry::new(Target::Redirect(sink), Some(owner)));
        Ok(())
    }

    pub fn pop_redirect(&mut self, owner: NodeId) -> Result<(), StxError> {
        let mut entry = self.pop_owned(owner)?;
        entry.flush()?;
        entry.check_closed()?;
        entry.sink().end_document()
    }

    fn pop_owned(&mut self, owner: NodeId) -> Result<Entry<'a>, StxError> {
        match self.entries.last() {
            Some(entry) if entry.owner == Some(owner) => {}
            _ => return Err(StxError::output("Unbalanced output scopes")),
        }
        self.entries
            .pop()
            .ok_or_else(|| StxError::output("Unbalanced output scopes"))
    }

    fn top(&mut self) -> Result<&mut Entry<'a>, StxError> {
        self.entries
            .last_mut()
            .ok_or_else(|| StxError::output("No output sink"))
    }

    pub fn emit(&mut self, event: OutputEvent) -> Result<(), StxError> {
        let entry = self.top()?;
        match event {
            OutputEvent::StartElement { name, attributes } => {
                entry.flush()?;
                if let Target::Capture(sink) = &mut entry.target {
                    return sink.start_element(&name, &attributes);
                }
                entry.open.push(name.clone());
                entry.pending = Some((name, attributes));
                Ok(())
            }
            OutputEvent::EndElement(name) => {
                entry.flush()?;
                if let Target::Capture(sink) = &mut entry.target {
                    return sink.end_element(&name);
                }
                match entry.open.last() {
                    Some(open) if open.uri() == name.uri() && open.local_name == name.local_name => {
                        entry.open.pop();
                        entry.sink().end_element(&name)
                    }
                    Some(open) => Err(StxError::output(format!(
                        "Attempt to close `{}' while `{}' is open",
                        name, open
                    ))),
                    None => Err(StxError::output(format!(
                        "Attempt to close `{}' but no element is open",
                        name
                    ))),
                }
            }
            OutputEvent::EndDocument => {
                entry.flush()?;
                entry.check_closed()?;
                entry.sink().end_document()
            }
            other => {
                entry.flush()?;
                other.send_to(entry.sink())
            }
        }
    }

    /// Adds an attribute to the start tag most recently emitted, which must
    /// not have received any content yet.
    pub fn add_attribute(&mut self, attribute: Attribute) -> Result<(), StxError> {
        let entry = self.top()?;
        match &mut entry.pending {
            Some((_, attributes)) => {
                match attributes.iter_mut().find(|a| {
                    a.name.uri() == attribute.name.uri()
                        && a.name.local_name == attribute.name.local_name
                }) {
                    Some(existing) => existing.value = attribute.value,
                    None => attributes.push(attribute),
                }
                Ok(())
            }
            None => Err(StxError::output(format!(
                "Can't create attribute `{}' here: no pending start tag",
                attribute.name
            ))),
        }
    }
}

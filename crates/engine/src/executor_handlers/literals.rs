//! Result-tree construction: literal and computed elements, attributes, text,
//! `value-of` and `copy`.

use super::output::handle_capture;
use crate::error::{Severity, StxError};
use crate::output::OutputEvent;
use crate::processor::Processor;
use crate::processor::activation::Activation;
use crate::processor::execute::Flow;
use crate::program::NodeId;
use std::collections::HashMap;
use stxflow_path::{Attribute, AttributeValueTemplate, Event, EventKind, Expression, QName, Value};

pub(crate) fn handle_literal_element(
    processor: &mut Processor<'_>,
    act: &mut Activation,
    id: NodeId,
    name: &QName,
    attributes: &[(QName, AttributeValueTemplate)],
) -> Result<Flow, StxError> {
    let mut evaluated = Vec::with_capacity(attributes.len());
    for (attr_name, avt) in attributes {
        let value = processor.evaluate_avt(act, avt, id)?;
        evaluated.push(Attribute::new(attr_name.clone(), value));
    }
    processor.emit(
        OutputEvent::StartElement {
            name: name.clone(),
            attributes: evaluated,
        },
        Some(id),
    )?;
    act.open_scope();
    Ok(Flow::Next)
}

pub(crate) fn end_literal_element(
    processor: &mut Processor<'_>,
    name: &QName,
    end: NodeId,
) -> Result<Flow, StxError> {
    processor.emit(OutputEvent::EndElement(name.clone()), Some(end))?;
    Ok(Flow::Next)
}

pub(crate) fn handle_element(
    processor: &mut Processor<'_>,
    act: &mut Activation,
    id: NodeId,
    name: &AttributeValueTemplate,
    namespace: Option<&AttributeValueTemplate>,
    namespaces: &HashMap<String, String>,
) -> Result<Flow, StxError> {
    let Some(qname) = computed_name(processor, act, id, name, namespace, namespaces)? else {
        return Ok(processor.skip(id));
    };
    processor.emit(
        OutputEvent::StartElement {
            name: qname.clone(),
            attributes: Vec::new(),
        },
        Some(id),
    )?;
    if let Some(frame) = act.frame_mut() {
        frame.names.push(qname);
    }
    act.open_scope();
    Ok(Flow::Next)
}

pub(crate) fn end_element(
    processor: &mut Processor<'_>,
    act: &mut Activation,
    end: NodeId,
) -> Result<Flow, StxError> {
    if let Some(name) = act.frame_mut().and_then(|f| f.names.pop()) {
        processor.emit(OutputEvent::EndElement(name), Some(end))?;
    }
    Ok(Flow::Next)
}

pub(crate) fn handle_start_element(
    processor: &mut Processor<'_>,
    act: &mut Activation,
    id: NodeId,
    name: &AttributeValueTemplate,
    namespace: Option<&AttributeValueTemplate>,
    namespaces: &HashMap<String, String>,
) -> Result<Flow, StxError> {
    if let Some(qname) = computed_name(processor, act, id, name, namespace, namespaces)? {
        processor.emit(
            OutputEvent::StartElement {
                name: qname,
                attributes: Vec::new(),
            },
            Some(id),
        )?;
    }
    Ok(Flow::Next)
}

pub(crate) fn handle_end_element(
    processor: &mut Processor<'_>,
    act: &mut Activation,
    id: NodeId,
    name: &AttributeValueTemplate,
    namespace: Option<&AttributeValueTemplate>,
    namespaces: &HashMap<String, String>,
) -> Result<Flow, StxError> {
    if let Some(qname) = computed_name(processor, act, id, name, namespace, namespaces)? {
        processor.emit(OutputEvent::EndElement(qname), Some(id))?;
    }
    Ok(Flow::Next)
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn handle_attribute(
    processor: &mut Processor<'_>,
    act: &mut Activation,
    id: NodeId,
    name: &AttributeValueTemplate,
    namespace: Option<&AttributeValueTemplate>,
    namespaces: &HashMap<String, String>,
    select: Option<&Expression>,
) -> Result<Flow, StxError> {
    let Some(qname) = computed_name(processor, act, id, name, namespace, namespaces)? else {
        return Ok(processor.skip(id));
    };
    let Some(select) = select else {
        let context = format!("attribute `{}'", qname);
        let flow = handle_capture(processor, act, id, context)?;
        if let Flow::Next = flow
            && let Some(frame) = act.frame_mut()
        {
            frame.names.push(qname);
        }
        return Ok(flow);
    };
    let value = processor.evaluate(act, select, id)?;
    add_attribute(processor, Attribute::new(qname, join_items(&value, " ")), id)?;
    Ok(processor.skip(id))
}

pub(crate) fn end_attribute(
    processor: &mut Processor<'_>,
    act: &mut Activation,
    start: NodeId,
    end: NodeId,
) -> Result<Flow, StxError> {
    let value = match processor.emitter.pop_capture(start) {
        Ok(value) => value,
        Err(err) => {
            processor.report(Severity::Error, err, Some(end))?;
            return Ok(Flow::Next);
        }
    };
    if let Some(name) = act.frame_mut().and_then(|f| f.names.pop()) {
        add_attribute(processor, Attribute::new(name, value), end)?;
    }
    Ok(Flow::Next)
}

/// Attaches an attribute to the element whose start tag is still open.
pub(crate) fn add_attribute(
    processor: &mut Processor<'_>,
    attribute: Attribute,
    at: NodeId,
) -> Result<(), StxError> {
    match processor.emitter.add_attribute(attribute) {
        Ok(()) => Ok(()),
        Err(err) => processor.report(Severity::Error, err, Some(at)),
    }
}

pub(crate) fn handle_text(
    processor: &mut Processor<'_>,
    id: NodeId,
    text: &str,
) -> Result<Flow, StxError> {
    if !text.is_empty() {
        processor.emit(OutputEvent::Characters(text.to_string()), Some(id))?;
    }
    Ok(Flow::Next)
}

pub(crate) fn handle_value_of(
    processor: &mut Processor<'_>,
    act: &mut Activation,
    id: NodeId,
    select: &Expression,
    separator: &AttributeValueTemplate,
) -> Result<Flow, StxError> {
    let value = processor.evaluate(act, select, id)?;
    let separator = processor.evaluate_avt(act, separator, id)?;
    handle_text(processor, id, &join_items(&value, &separator))
}

/// String values of all items of `value`.
pub(crate) fn join_items(value: &Value, separator: &str) -> String {
    value
        .items()
        .iter()
        .map(|item| item.string_value())
        .collect::<Vec<_>>()
        .join(separator)
}

/// Shallow copy of the activation's node. Elements stay open until the
/// instruction's content has run.
pub(crate) fn handle_copy(
    processor: &mut Processor<'_>,
    act: &mut Activation,
    id: NodeId,
    attributes: bool,
) -> Result<Flow, StxError> {
    let event = processor.event_at(act.depth)?;
    match event.kind() {
        EventKind::Element => {
            let attributes = if attributes {
                event.attributes().to_vec()
            } else {
                Vec::new()
            };
            processor.emit(
                OutputEvent::StartElement {
                    name: event.name().cloned().unwrap_or_default(),
                    attributes,
                },
                Some(id),
            )?;
        }
        EventKind::Attribute => {
            let name = event.name().cloned().unwrap_or_default();
            add_attribute(processor, Attribute::new(name, event.value()), id)?;
        }
        EventKind::Root => {}
        _ => processor.emit(copy_of_leaf(&event), Some(id))?,
    }
    act.open_scope();
    Ok(Flow::Next)
}

pub(crate) fn end_copy(
    processor: &mut Processor<'_>,
    act: &mut Activation,
    end: NodeId,
) -> Result<Flow, StxError> {
    let event = processor.event_at(act.depth)?;
    if event.kind() == EventKind::Element {
        let name = event.name().cloned().unwrap_or_default();
        processor.emit(OutputEvent::EndElement(name), Some(end))?;
    }
    Ok(Flow::Next)
}

fn copy_of_leaf(event: &Event) -> OutputEvent {
    match event.kind() {
        EventKind::Comment => OutputEvent::Comment(event.value().to_string()),
        EventKind::ProcessingInstruction => OutputEvent::ProcessingInstruction {
            target: event
                .name()
                .map(|n| n.local_name.clone())
                .unwrap_or_default(),
            data: event.value().to_string(),
        },
        _ => OutputEvent::Characters(event.value().to_string()),
    }
}

/// Evaluates a computed name and resolves its prefix. Invalid names are
/// reported and yield `None`.
fn computed_name(
    processor: &mut Processor<'_>,
    act: &Activation,
    id: NodeId,
    name: &AttributeValueTemplate,
    namespace: Option<&AttributeValueTemplate>,
    namespaces: &HashMap<String, String>,
) -> Result<Option<QName>, StxError> {
    let lexical = processor.evaluate_avt(act, name, id)?;
    let namespace = match namespace {
        Some(avt) => Some(processor.evaluate_avt(act, avt, id)?),
        None => None,
    };
    match resolve_qname(&lexical, namespace, namespaces) {
        Ok(qname) => Ok(Some(qname)),
        Err(err) => {
            processor.report(Severity::Error, err, Some(id))?;
            Ok(None)
        }
    }
}

/// Splits `prefix:local`. An explicit namespace wins over the prefix
/// bindings in scope; an empty one means no namespace.
pub(crate) fn resolve_qname(
    lexical: &str,
    namespace: Option<String>,
    namespaces: &HashMap<String, String>,
) -> Result<QName, StxError> {
    let (prefix, local) = match lexical.split_once(':') {
        Some((prefix, local)) => (Some(prefix), local),
        None => (None, lexical),
    };
    if !is_ncname(local) || prefix.is_some_and(|p| !is_ncname(p)) {
        return Err(StxError::definition(format!(
            "`{}' is not a valid name",
            lexical
        )));
    }
    let uri = match (namespace, prefix) {
        (Some(ns), _) => (!ns.is_empty()).then_some(ns),
        (None, Some(prefix)) => match namespaces.get(prefix) {
            Some(uri) => Some(uri.clone()),
            None => {
                return Err(StxError::definition(format!(
                    "Undeclared namespace prefix `{}'",
                    prefix
                )));
            }
        },
        (None, None) => None,
    };
    Ok(QName::with_namespace(prefix.map(String::from), local, uri))
}

pub(crate) fn is_ncname(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_qname() {
        let mut namespaces = HashMap::new();
        namespaces.insert("h".to_string(), "http://www.w3.org/1999/xhtml".to_string());

        let plain = resolve_qname("p", None, &namespaces).unwrap();
        assert_eq!(plain.local_name, "p");
        assert_eq!(plain.uri(), "");

        let prefixed = resolve_qname("h:p", None, &namespaces).unwrap();
        assert_eq!(prefixed.prefix.as_deref(), Some("h"));
        assert_eq!(prefixed.uri(), "http://www.w3.org/1999/xhtml");

        let explicit = resolve_qname("x:p", Some("urn:x".to_string()), &namespaces).unwrap();
        assert_eq!(explicit.uri(), "urn:x");

        let unbound = resolve_qname("q:p", None, &namespaces).unwrap_err();
        assert!(unbound.to_string().contains("Undeclared namespace prefix `q'"));
    }

    #[test]
    fn test_invalid_names() {
        let namespaces = HashMap::new();
        for name in ["", "1abc", "a b", ":x", "x:"] {
            assert!(resolve_qname(name, None, &namespaces).is_err(), "{name:?}");
        }
        assert!(is_ncname("first-name.v2"));
    }

    #[test]
    fn test_join_items() {
        let mut value = Value::string("a");
        value.append(Value::number(2.0));
        assert_eq!(join_items(&value, ", "), "a, 2");
        assert_eq!(join_items(&Value::empty(), " "), "");
    }
}

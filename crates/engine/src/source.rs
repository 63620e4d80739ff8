//! XML input: parses a document with quick-xml and feeds the processor one
//! event at a time.

use crate::config::ProcessorConfig;
use crate::error::StxError;
use crate::output::OutputSink;
use crate::processor::Processor;
use crate::program::Program;
use quick_xml::NsReader;
use quick_xml::escape::resolve_predefined_entity;
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::ResolveResult;
use std::borrow::Cow;
use stxflow_path::{Attribute, QName};

/// Transforms `input` with `program`, writing the result to `output`.
pub fn transform_str(
    program: &Program,
    input: &str,
    config: ProcessorConfig,
    output: &mut dyn OutputSink,
) -> Result<(), StxError> {
    let mut processor = Processor::new(program, output).with_config(config);
    feed_str(input, &mut processor)
}

/// Parses `input` and delivers the whole document to `processor`, from
/// `start_document` to `end_document`. Malformed XML is fatal.
pub fn feed_str(input: &str, processor: &mut Processor<'_>) -> Result<(), StxError> {
    let mut reader = NsReader::from_str(input);
    reader.config_mut().expand_empty_elements = true;

    processor.start_document()?;
    match pump(&mut reader, processor) {
        Err(err @ StxError::Xml { .. }) => processor.abort(err),
        other => other,
    }?;
    processor.end_document()
}

fn pump(reader: &mut NsReader<&[u8]>, processor: &mut Processor<'_>) -> Result<(), StxError> {
    let mut buf = Vec::new();
    let mut depth = 0usize;
    loop {
        let (namespace, event) = match reader.read_resolved_event_into(&mut buf) {
            Ok((resolved, event)) => (namespace_of(resolved), event),
            Err(e) => return Err(xml_error(reader, e)),
        };
        match event {
            Event::Start(e) => {
                let name = QName::with_namespace(
                    e.name().prefix().map(|p| lossy(p.as_ref())),
                    lossy(e.local_name().as_ref()),
                    namespace,
                );
                let attributes = attributes(reader, &e)?;
                depth += 1;
                processor.start_element(name, attributes)?;
            }
            Event::End(e) => {
                let name = QName::with_namespace(
                    e.name().prefix().map(|p| lossy(p.as_ref())),
                    lossy(e.local_name().as_ref()),
                    namespace,
                );
                depth = depth.saturating_sub(1);
                processor.end_element(&name)?;
            }
            Event::Text(e) if depth > 0 => {
                let text = e.decode().map_err(|e| xml_error(reader, e))?;
                processor.characters(&text)?;
            }
            Event::CData(e) if depth > 0 => {
                processor.characters(&String::from_utf8_lossy(&e))?;
            }
            Event::GeneralRef(r) if depth > 0 => {
                let text = match r.resolve_char_ref().map_err(|e| xml_error(reader, e))? {
                    Some(c) => c.to_string(),
                    None => {
                        let name = r.decode().map_err(|e| xml_error(reader, e))?;
                        match resolve_predefined_entity(&name) {
                            Some(text) => text.to_string(),
                            None => {
                                let message = format!("Unknown entity `&{};'", name);
                                return Err(xml_error(reader, message));
                            }
                        }
                    }
                };
                processor.characters(&text)?;
            }
            Event::Comment(e) => {
                let text = e.decode().map_err(|e| xml_error(reader, e))?;
                processor.comment(&text)?;
            }
            Event::PI(e) => {
                let target = lossy(e.target());
                let data = String::from_utf8_lossy(e.content());
                processor.processing_instruction(&target, data.trim_start())?;
            }
            Event::Eof => return Ok(()),
            _ => {}
        }
        buf.clear();
    }
}

fn namespace_of(resolved: ResolveResult<'_>) -> Option<String> {
    match resolved {
        ResolveResult::Bound(ns) => Some(lossy(ns.as_ref())),
        _ => None,
    }
}

/// Attributes with resolved names and unescaped values. Namespace
/// declarations are not attributes.
fn attributes(reader: &NsReader<&[u8]>, e: &BytesStart<'_>) -> Result<Vec<Attribute>, StxError> {
    let mut result = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|e| xml_error(reader, e))?;
        if attr.key.as_namespace_binding().is_some() {
            continue;
        }
        let (resolved, local) = reader.resolve_attribute(attr.key);
        let name = QName::with_namespace(
            attr.key.prefix().map(|p| lossy(p.as_ref())),
            lossy(local.as_ref()),
            namespace_of(resolved),
        );
        let value = attr
            .decode_and_unescape_value(reader.decoder())
            .map_err(|e| xml_error(reader, e))?;
        result.push(Attribute::new(name, value.into_owned()));
    }
    Ok(result)
}

fn lossy(bytes: &[u8]) -> String {
    match String::from_utf8_lossy(bytes) {
        Cow::Borrowed(s) => s.to_string(),
        Cow::Owned(s) => s,
    }
}

fn xml_error(reader: &NsReader<&[u8]>, e: impl std::fmt::Display) -> StxError {
    StxError::Xml {
        position: reader.buffer_position(),
        message: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PassThrough;
    use crate::output::{EventRecorder, OutputEvent};
    use crate::program::ProgramBuilder;

    fn copy_all() -> Program {
        ProgramBuilder::new().build().unwrap()
    }

    fn run(program: &Program, input: &str) -> Result<String, StxError> {
        let mut out = EventRecorder::new();
        let config = ProcessorConfig::default().with_pass_through(PassThrough::All);
        transform_str(program, input, config, &mut out)?;
        Ok(out.render())
    }

    #[test]
    fn test_identity_through_default_rules() {
        let program = copy_all();
        let input = r#"<a x="1"><b>t &amp; u</b><!--c--><?pi some data?><e/></a>"#;
        assert_eq!(
            run(&program, input).unwrap(),
            r#"<a x="1"><b>t &amp; u</b><!--c--><?pi some data?><e></e></a>"#
        );
    }

    #[test]
    fn test_character_references_and_cdata_are_text() {
        let program = copy_all();
        let out = run(&program, "<a>&#65;<![CDATA[<x>]]>&lt;</a>").unwrap();
        assert_eq!(out, "<a>A&lt;x&gt;&lt;</a>");
    }

    #[test]
    fn test_predefined_entities_become_one_text_node() {
        let program = copy_all();
        let mut out = EventRecorder::new();
        transform_str(
            &program,
            "<a>&amp;&lt;&gt;&quot;&apos;</a>",
            ProcessorConfig::default(),
            &mut out,
        )
        .unwrap();
        let texts: Vec<_> = out
            .events()
            .iter()
            .filter_map(|e| match e {
                OutputEvent::Characters(text) => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(texts, ["&<>\"'"]);
    }

    #[test]
    fn test_unknown_entity_is_fatal() {
        let program = copy_all();
        let err = run(&program, "<a>&nbsp;</a>").unwrap_err();
        assert!(matches!(err, StxError::Xml { .. }), "{err:?}");
    }

    #[test]
    fn test_namespaces_are_resolved() {
        let mut b = ProgramBuilder::new();
        b.namespace("n", "urn:n")
            .template("n:item", |t| {
                t.value_of("namespace-uri()");
            });
        let program = b.build().unwrap();
        let out = run(&program, r#"<r xmlns:p="urn:n"><p:item/></r>"#).unwrap();
        assert_eq!(out, "<r>urn:n</r>");
    }

    #[test]
    fn test_malformed_input_is_fatal() {
        let program = copy_all();
        let err = run(&program, "<a><b></a>").unwrap_err();
        assert!(matches!(err, StxError::Xml { .. } | StxError::Input(_)), "{err:?}");
    }
}

//! Instructions whose content is captured as text before it is written:
//! comments, processing instructions, CDATA sections and messages, plus
//! `result-document`.

use crate::error::{Severity, StxError};
use crate::output::OutputEvent;
use crate::processor::Processor;
use crate::processor::activation::Activation;
use crate::processor::execute::Flow;
use crate::program::NodeId;
use stxflow_path::{AttributeValueTemplate, Expression, QName};

use super::literals::{is_ncname, join_items};

/// Starts collecting the instruction's content as a string. A second capture
/// for the same instruction is reported and the content skipped.
pub(crate) fn handle_capture(
    processor: &mut Processor<'_>,
    act: &mut Activation,
    id: NodeId,
    context: String,
) -> Result<Flow, StxError> {
    if let Err(err) = processor.emitter.push_capture(id, context) {
        processor.report(Severity::Error, err, Some(id))?;
        return Ok(processor.skip(id));
    }
    act.open_scope();
    Ok(Flow::Next)
}

/// The captured content of `start`, or `None` after reporting a failure.
pub(crate) fn finish_capture(
    processor: &mut Processor<'_>,
    start: NodeId,
    end: NodeId,
) -> Result<Option<String>, StxError> {
    match processor.emitter.pop_capture(start) {
        Ok(text) => Ok(Some(text)),
        Err(err) => {
            processor.report(Severity::Error, err, Some(end))?;
            Ok(None)
        }
    }
}

pub(crate) fn end_comment(
    processor: &mut Processor<'_>,
    start: NodeId,
    end: NodeId,
) -> Result<Flow, StxError> {
    if let Some(text) = finish_capture(processor, start, end)? {
        processor.emit(OutputEvent::Comment(comment_text(&text)), Some(end))?;
    }
    Ok(Flow::Next)
}

/// `--` may not occur in a comment and it may not end in `-`.
fn comment_text(text: &str) -> String {
    let mut result = text.to_string();
    while result.contains("--") {
        result = result.replace("--", "- -");
    }
    if result.ends_with('-') {
        result.push(' ');
    }
    result
}

pub(crate) fn handle_processing_instruction(
    processor: &mut Processor<'_>,
    act: &mut Activation,
    id: NodeId,
    target: &AttributeValueTemplate,
) -> Result<Flow, StxError> {
    let target = processor.evaluate_avt(act, target, id)?;
    if !is_ncname(&target) || target.eq_ignore_ascii_case("xml") {
        let err = StxError::definition(format!(
            "`{}' is not a valid processing instruction target",
            target
        ));
        processor.report(Severity::Error, err, Some(id))?;
        return Ok(processor.skip(id));
    }
    let context = format!("processing-instruction `{}'", target);
    let flow = handle_capture(processor, act, id, context)?;
    if let Flow::Next = flow
        && let Some(frame) = act.frame_mut()
    {
        frame.names.push(QName::new(target));
    }
    Ok(flow)
}

pub(crate) fn end_processing_instruction(
    processor: &mut Processor<'_>,
    act: &mut Activation,
    start: NodeId,
    end: NodeId,
) -> Result<Flow, StxError> {
    let target = act.frame_mut().and_then(|f| f.names.pop());
    if let (Some(data), Some(target)) = (finish_capture(processor, start, end)?, target) {
        let event = OutputEvent::ProcessingInstruction {
            target: target.local_name,
            data: data.replace("?>", "? >"),
        };
        processor.emit(event, Some(end))?;
    }
    Ok(Flow::Next)
}

pub(crate) fn end_cdata(
    processor: &mut Processor<'_>,
    start: NodeId,
    end: NodeId,
) -> Result<Flow, StxError> {
    if let Some(text) = finish_capture(processor, start, end)? {
        processor.emit(OutputEvent::StartCdata, Some(end))?;
        processor.emit(OutputEvent::Characters(text), Some(end))?;
        processor.emit(OutputEvent::EndCdata, Some(end))?;
    }
    Ok(Flow::Next)
}

/// Redirects the content to the sink the resolver returns for `href`. If no
/// sink can be had the content is skipped.
pub(crate) fn handle_result_document(
    processor: &mut Processor<'_>,
    act: &mut Activation,
    id: NodeId,
    href: &AttributeValueTemplate,
) -> Result<Flow, StxError> {
    let href = processor.evaluate_avt(act, href, id)?;
    let resolved = match processor.resolver.as_deref_mut() {
        Some(resolver) => resolver.resolve(&href),
        None => Err(StxError::resource(format!(
            "No output resolver to create `{}'",
            href
        ))),
    };
    let pushed = resolved.and_then(|sink| processor.emitter.push_redirect(id, sink));
    if let Err(err) = pushed {
        processor.report(Severity::Error, err, Some(id))?;
        return Ok(processor.skip(id));
    }
    log::debug!("writing result document `{}'", href);
    act.open_scope();
    Ok(Flow::Next)
}

pub(crate) fn end_result_document(
    processor: &mut Processor<'_>,
    start: NodeId,
    end: NodeId,
) -> Result<Flow, StxError> {
    if let Err(err) = processor.emitter.pop_redirect(start) {
        processor.report(Severity::Error, err, Some(end))?;
    }
    Ok(Flow::Next)
}

pub(crate) fn handle_message(
    processor: &mut Processor<'_>,
    act: &mut Activation,
    id: NodeId,
    select: Option<&Expression>,
    terminate: bool,
) -> Result<Flow, StxError> {
    let Some(select) = select else {
        return handle_capture(processor, act, id, "message".to_string());
    };
    let value = processor.evaluate(act, select, id)?;
    deliver_message(processor, join_items(&value, " "), terminate)?;
    Ok(processor.skip(id))
}

pub(crate) fn end_message(
    processor: &mut Processor<'_>,
    start: NodeId,
    end: NodeId,
    terminate: bool,
) -> Result<Flow, StxError> {
    if let Some(text) = finish_capture(processor, start, end)? {
        deliver_message(processor, text, terminate)?;
    }
    Ok(Flow::Next)
}

fn deliver_message(
    processor: &mut Processor<'_>,
    text: String,
    terminate: bool,
) -> Result<(), StxError> {
    log::info!("{}", text);
    if terminate {
        return processor.fatal(StxError::Terminated(text));
    }
    Ok(())
}

//! `variable`, `param` and `assign`, at template and group level.

use super::output::{finish_capture, handle_capture};
use crate::error::{Severity, StxError};
use crate::processor::Processor;
use crate::processor::activation::Activation;
use crate::processor::execute::Flow;
use crate::program::{NodeId, VariableKind};
use crate::scope;
use stxflow_path::{Expression, Value};

pub(crate) fn handle_variable(
    processor: &mut Processor<'_>,
    act: &mut Activation,
    id: NodeId,
    name: &str,
    select: Option<&Expression>,
    kind: VariableKind,
) -> Result<Flow, StxError> {
    let Some(select) = select else {
        return handle_capture(processor, act, id, format!("variable `{}'", name));
    };
    let value = processor.evaluate(act, select, id)?;
    declare(processor, act, id, name, kind, value)?;
    Ok(processor.skip(id))
}

/// A passed value wins over the declared default.
#[allow(clippy::too_many_arguments)]
pub(crate) fn handle_param(
    processor: &mut Processor<'_>,
    act: &mut Activation,
    id: NodeId,
    name: &str,
    select: Option<&Expression>,
    required: bool,
    kind: VariableKind,
) -> Result<Flow, StxError> {
    if let Some(value) = act.frame().and_then(|f| f.passed.get(name).cloned()) {
        declare(processor, act, id, name, kind, value)?;
        return Ok(processor.skip(id));
    }
    if required {
        let err = StxError::definition(format!("Missing value for required parameter `{}'", name));
        processor.report(Severity::Error, err, Some(id))?;
        declare(processor, act, id, name, kind, Value::empty())?;
        return Ok(processor.skip(id));
    }
    handle_variable(processor, act, id, name, select, kind)
}

pub(crate) fn end_variable(
    processor: &mut Processor<'_>,
    act: &mut Activation,
    start: NodeId,
    end: NodeId,
    name: &str,
    kind: VariableKind,
) -> Result<Flow, StxError> {
    if let Some(text) = finish_capture(processor, start, end)? {
        declare(processor, act, end, name, kind, Value::string(text))?;
    }
    Ok(Flow::Next)
}

fn declare(
    processor: &mut Processor<'_>,
    act: &mut Activation,
    at: NodeId,
    name: &str,
    kind: VariableKind,
    value: Value,
) -> Result<(), StxError> {
    match kind {
        VariableKind::Local => {
            act.declare_local(name, value);
            Ok(())
        }
        VariableKind::Group(group) => match processor.group_frames.declare(group, name, value) {
            Ok(()) => Ok(()),
            Err(err) => processor.report(Severity::Error, err, Some(at)),
        },
    }
}

pub(crate) fn handle_assign(
    processor: &mut Processor<'_>,
    act: &mut Activation,
    id: NodeId,
    name: &str,
    select: Option<&Expression>,
) -> Result<Flow, StxError> {
    let Some(select) = select else {
        return handle_capture(processor, act, id, format!("assign `{}'", name));
    };
    let value = processor.evaluate(act, select, id)?;
    assign(processor, act, id, name, value)?;
    Ok(processor.skip(id))
}

pub(crate) fn end_assign(
    processor: &mut Processor<'_>,
    act: &mut Activation,
    start: NodeId,
    end: NodeId,
    name: &str,
) -> Result<Flow, StxError> {
    if let Some(text) = finish_capture(processor, start, end)? {
        assign(processor, act, end, name, Value::string(text))?;
    }
    Ok(Flow::Next)
}

fn assign(
    processor: &mut Processor<'_>,
    act: &mut Activation,
    at: NodeId,
    name: &str,
    value: Value,
) -> Result<(), StxError> {
    let program = processor.program;
    let Some(frame) = act.frame_mut() else {
        return Ok(());
    };
    let chain = &program.group(frame.group).ancestry;
    match scope::assign(&mut frame.locals, &mut processor.group_frames, chain, name, value) {
        Ok(()) => Ok(()),
        Err(err) => processor.report(Severity::Error, err, Some(at)),
    }
}

//! `process-*` and `call-procedure`.

use crate::error::{Severity, StxError};
use crate::processor::Processor;
use crate::processor::activation::{Activation, ActivationKind, Params, Request, SiblingRequest};
use crate::processor::execute::Flow;
use crate::program::{GroupId, Instruction, NodeId, Traversal};
use std::collections::HashMap;
use std::rc::Rc;

pub(crate) fn handle_traversal(
    processor: &mut Processor<'_>,
    act: &mut Activation,
    id: NodeId,
    instruction: &Instruction,
) -> Result<Flow, StxError> {
    if act.resuming {
        act.resuming = false;
        return Ok(Flow::Next);
    }
    let name = instruction.name();
    if let ActivationKind::GroupInit(_) = act.kind {
        let err = StxError::definition(format!(
            "`{}' is not allowed in a group variable declaration",
            name
        ));
        processor.report(Severity::Error, err, Some(id))?;
        return Ok(Flow::Next);
    }

    let traversal = match instruction {
        Instruction::ProcessChildren(t)
        | Instruction::ProcessAttributes(t)
        | Instruction::ProcessSelf(t) => t,
        Instruction::ProcessSiblings { traversal, .. } => traversal,
        _ => return Ok(Flow::Next),
    };
    let suspends = !matches!(instruction, Instruction::ProcessAttributes(_));
    if suspends && let Some(previous) = act.suspended_by {
        let err = StxError::definition(format!("Encountered `{}' after `{}'", name, previous));
        processor.report(Severity::Error, err, Some(id))?;
        return Ok(Flow::Next);
    }

    let Some(group) = target_group(processor, act, traversal, id)? else {
        return Ok(Flow::Next);
    };
    let params = evaluate_params(processor, act, traversal, id)?;
    let request = match instruction {
        Instruction::ProcessChildren(_) => Request::Children { group, params },
        Instruction::ProcessAttributes(_) => Request::Attributes { group, params },
        Instruction::ProcessSelf(_) => Request::SelfNode { group, params },
        _ => Request::Siblings(SiblingRequest {
            group,
            params,
            instruction: id,
        }),
    };
    if request.suspends() {
        act.suspended_by = Some(name);
    }
    Ok(Flow::Suspend(request))
}

pub(crate) fn handle_call_procedure(
    processor: &mut Processor<'_>,
    act: &mut Activation,
    id: NodeId,
    name: &str,
    traversal: &Traversal,
) -> Result<Flow, StxError> {
    let Some(group) = target_group(processor, act, traversal, id)? else {
        return Ok(Flow::Next);
    };
    let Some(procedure) = processor.program.find_procedure(name, group) else {
        let err = StxError::definition(format!("Procedure `{}' not defined", name));
        processor.report(Severity::Error, err, Some(id))?;
        return Ok(Flow::Next);
    };
    let params = evaluate_params(processor, act, traversal, id)?;
    Ok(Flow::Call { procedure, params })
}

/// The named group, or the group of the running template or procedure.
fn target_group(
    processor: &mut Processor<'_>,
    act: &Activation,
    traversal: &Traversal,
    id: NodeId,
) -> Result<Option<GroupId>, StxError> {
    let Some(name) = &traversal.group else {
        let program = processor.program;
        return Ok(Some(act.frame().map_or(program.root_group(), |f| f.group)));
    };
    match processor.program.group_by_name(name) {
        Some(group) => Ok(Some(group)),
        None => {
            let err = StxError::definition(format!("Group `{}' not defined", name));
            processor.report(Severity::Error, err, Some(id))?;
            Ok(None)
        }
    }
}

fn evaluate_params(
    processor: &mut Processor<'_>,
    act: &Activation,
    traversal: &Traversal,
    id: NodeId,
) -> Result<Params, StxError> {
    let mut params = HashMap::with_capacity(traversal.params.len());
    for (name, select) in &traversal.params {
        let value = processor.evaluate(act, select, id)?;
        params.insert(name.clone(), value);
    }
    Ok(Rc::new(params))
}

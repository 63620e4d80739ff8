//! The instruction loop of one activation.

use super::Processor;
use super::activation::{Activation, Frame, Params, Request};
use crate::error::{Severity, StxError};
use crate::executor_handlers::{control_flow, literals, loops, output, traversal, variables};
use crate::program::{Instruction, NodeId, ProcedureId};
use crate::scope::ScopeView;
use std::collections::HashMap;
use stxflow_path::{
    AttributeValueTemplate, EvaluationContext, Expression, PathError, Value, evaluate,
    evaluate_avt,
};

pub(crate) enum Outcome {
    Finished,
    Suspended(Request),
}

/// Where the cursor goes after an instruction.
#[derive(Debug)]
pub(crate) enum Flow {
    Next,
    Jump(NodeId),
    /// Continue after the given End node, skipping the container's body.
    SkipPast(NodeId),
    Suspend(Request),
    Call {
        procedure: ProcedureId,
        params: Params,
    },
    Return,
}

impl<'a> Processor<'a> {
    /// Executes instructions until the activation finishes or suspends.
    pub(crate) fn run(&mut self, act: &mut Activation) -> Result<Outcome, StxError> {
        let program = self.program;
        loop {
            let Some(frame) = act.frames.last() else {
                return Ok(Outcome::Finished);
            };
            let Some(id) = frame.cursor else {
                act.frames.pop();
                advance_caller(self, act);
                continue;
            };
            match self.execute(act, id)? {
                Flow::Next => set_cursor(act, program.next(id)),
                Flow::Jump(target) => set_cursor(act, Some(target)),
                Flow::SkipPast(end) => set_cursor(act, program.next(end)),
                Flow::Suspend(request) => return Ok(Outcome::Suspended(request)),
                Flow::Call { procedure, params } => {
                    let limit = self.config.recursion_limit;
                    if act.frames.len() >= limit {
                        return self.fatal(StxError::RecursionLimit(limit));
                    }
                    let procedure = program.procedure(procedure);
                    log::trace!("calling procedure `{}'", procedure.name);
                    act.frames
                        .push(Frame::new(procedure.group, procedure.body, params));
                }
                Flow::Return => {
                    act.frames.pop();
                    advance_caller(self, act);
                }
            }
        }
    }

    fn execute(&mut self, act: &mut Activation, id: NodeId) -> Result<Flow, StxError> {
        let program = self.program;
        match &program.node(id).instruction {
            Instruction::Body => {
                act.open_scope();
                Ok(Flow::Next)
            }
            Instruction::End { start } => {
                act.close_scope();
                self.execute_end(act, *start, id)
            }
            instruction @ (Instruction::ProcessChildren(_)
            | Instruction::ProcessAttributes(_)
            | Instruction::ProcessSelf(_)
            | Instruction::ProcessSiblings { .. }) => {
                traversal::handle_traversal(self, act, id, instruction)
            }
            Instruction::CallProcedure { name, traversal } => {
                traversal::handle_call_procedure(self, act, id, name, traversal)
            }
            Instruction::LiteralElement { name, attributes } => {
                literals::handle_literal_element(self, act, id, name, attributes)
            }
            Instruction::Element {
                name,
                namespace,
                namespaces,
            } => literals::handle_element(self, act, id, name, namespace.as_ref(), namespaces),
            Instruction::ElementStart {
                name,
                namespace,
                namespaces,
            } => literals::handle_start_element(self, act, id, name, namespace.as_ref(), namespaces),
            Instruction::ElementEnd {
                name,
                namespace,
                namespaces,
            } => literals::handle_end_element(self, act, id, name, namespace.as_ref(), namespaces),
            Instruction::Attribute {
                name,
                namespace,
                namespaces,
                select,
            } => literals::handle_attribute(
                self,
                act,
                id,
                name,
                namespace.as_ref(),
                namespaces,
                select.as_ref(),
            ),
            Instruction::Text(text) => literals::handle_text(self, id, text),
            Instruction::ValueOf { select, separator } => {
                literals::handle_value_of(self, act, id, select, separator)
            }
            Instruction::Copy { attributes } => literals::handle_copy(self, act, id, *attributes),
            Instruction::Comment => output::handle_capture(self, act, id, "comment".to_string()),
            Instruction::ProcessingInstruction { target } => {
                output::handle_processing_instruction(self, act, id, target)
            }
            Instruction::Cdata => {
                output::handle_capture(self, act, id, "CDATA section".to_string())
            }
            Instruction::ResultDocument { href } => {
                output::handle_result_document(self, act, id, href)
            }
            Instruction::Message { select, terminate } => {
                output::handle_message(self, act, id, select.as_ref(), *terminate)
            }
            Instruction::Variable { name, select, kind } => {
                variables::handle_variable(self, act, id, name, select.as_ref(), *kind)
            }
            Instruction::Param {
                name,
                select,
                required,
                kind,
            } => variables::handle_param(self, act, id, name, select.as_ref(), *required, *kind),
            Instruction::Assign { name, select } => {
                variables::handle_assign(self, act, id, name, select.as_ref())
            }
            Instruction::If { test, .. } | Instruction::When { test, .. } => {
                control_flow::handle_condition(self, act, id, test)
            }
            Instruction::Else | Instruction::Choose | Instruction::Otherwise => {
                act.open_scope();
                Ok(Flow::Next)
            }
            Instruction::While { test } => loops::handle_while(self, act, id, test),
            Instruction::ForEachItem { name, select } => {
                loops::handle_for_each_item(self, act, id, name, select)
            }
        }
    }

    fn execute_end(
        &mut self,
        act: &mut Activation,
        start: NodeId,
        end: NodeId,
    ) -> Result<Flow, StxError> {
        let program = self.program;
        match &program.node(start).instruction {
            Instruction::Body => Ok(Flow::Return),
            Instruction::LiteralElement { name, .. } => {
                literals::end_literal_element(self, name, end)
            }
            Instruction::Element { .. } => literals::end_element(self, act, end),
            Instruction::Attribute { .. } => literals::end_attribute(self, act, start, end),
            Instruction::Copy { .. } => literals::end_copy(self, act, end),
            Instruction::Comment => output::end_comment(self, start, end),
            Instruction::ProcessingInstruction { .. } => {
                output::end_processing_instruction(self, act, start, end)
            }
            Instruction::Cdata => output::end_cdata(self, start, end),
            Instruction::ResultDocument { .. } => output::end_result_document(self, start, end),
            Instruction::Message { terminate, .. } => {
                output::end_message(self, start, end, *terminate)
            }
            Instruction::Variable { name, kind, .. } | Instruction::Param { name, kind, .. } => {
                variables::end_variable(self, act, start, end, name, *kind)
            }
            Instruction::Assign { name, .. } => variables::end_assign(self, act, start, end, name),
            Instruction::If { else_branch, .. } => Ok(control_flow::end_if(self, *else_branch)),
            Instruction::When { choose, .. } => Ok(control_flow::end_when(self, *choose)),
            Instruction::While { .. } | Instruction::ForEachItem { .. } => Ok(Flow::Jump(start)),
            _ => Ok(Flow::Next),
        }
    }

    /// Continues after the End of the container starting at `id`.
    pub(crate) fn skip(&self, id: NodeId) -> Flow {
        match self.program.end_of(id) {
            Some(end) => Flow::SkipPast(end),
            None => Flow::Next,
        }
    }

    /// Evaluates `expr` for the activation's node. Failures are reported as
    /// errors and yield the empty sequence.
    pub(crate) fn evaluate(
        &mut self,
        act: &Activation,
        expr: &Expression,
        at: NodeId,
    ) -> Result<Value, StxError> {
        let result = self.with_context(act, |e_ctx, top| evaluate(expr, e_ctx, top));
        match result {
            Ok(value) => Ok(value),
            Err(e) => {
                self.report(Severity::Error, e.into(), Some(at))?;
                Ok(Value::empty())
            }
        }
    }

    pub(crate) fn evaluate_avt(
        &mut self,
        act: &Activation,
        avt: &AttributeValueTemplate,
        at: NodeId,
    ) -> Result<String, StxError> {
        let result = self.with_context(act, |e_ctx, top| evaluate_avt(avt, e_ctx, top));
        match result {
            Ok(value) => Ok(value),
            Err(e) => {
                self.report(Severity::Error, e.into(), Some(at))?;
                Ok(String::new())
            }
        }
    }

    fn with_context<T>(
        &self,
        act: &Activation,
        evaluate: impl FnOnce(&EvaluationContext<'_>, usize) -> Result<T, PathError>,
    ) -> Result<T, PathError> {
        let program = self.program;
        let (locals, group): (&[HashMap<String, Value>], _) = match act.frame() {
            Some(frame) => (&frame.locals, frame.group),
            None => (&[], program.root_group()),
        };
        let scope = ScopeView::new(locals, &self.group_frames, &program.group(group).ancestry);
        let e_ctx = EvaluationContext::new(&self.ancestors, &scope)
            .with_position(act.position)
            .with_child_nodes(act.has_children);
        evaluate(&e_ctx, act.depth)
    }
}

fn set_cursor(act: &mut Activation, cursor: Option<NodeId>) {
    if let Some(frame) = act.frames.last_mut() {
        frame.cursor = cursor;
    }
}

/// Moves a caller past its `call-procedure` once the callee returns.
fn advance_caller(processor: &Processor<'_>, act: &mut Activation) {
    if let Some(frame) = act.frames.last_mut() {
        frame.cursor = frame.cursor.and_then(|id| processor.program.next(id));
    }
}

//! Template selection and the activation life cycle: start, suspend, resume, finish.

use super::activation::{
    Activation, ActivationKind, ActivationState, ChildDispatch, Frame, Level, Params, Request,
    SiblingRequest, SiblingWait,
};
use super::{CloseMode, Processor};
use crate::error::{Severity, StxError};
use crate::output::OutputEvent;
use crate::program::{GroupId, Instruction, TemplateId};
use crate::scope::ScopeView;
use std::rc::Rc;
use stxflow_path::{
    Attribute, Event, EventKind, EventRef, EvaluationContext, PathError, Pattern,
};

impl<'a> Processor<'a> {
    /// Runs the best template of `group` for the current node, or the default rule.
    pub(crate) fn dispatch(
        &mut self,
        group: GroupId,
        params: Params,
        exclude: &[TemplateId],
        has_children: bool,
    ) -> Result<(), StxError> {
        let Some((id, position)) = self.find_template(group, exclude, has_children)? else {
            return self.apply_default(group, params, has_children);
        };
        let program = self.program;
        let template = program.template(id);
        let depth = self.ancestors.len();
        log::debug!(
            "template `{}' (priority {}) for node at depth {}",
            template.source,
            template.priority,
            depth
        );
        let event = self.current_event()?;
        self.observe(|o| o.enter_template(template, &event));

        let mut act = Activation::new(ActivationKind::Template(id), depth, position, has_children);
        act.frames
            .push(Frame::new(template.group, template.body, params));
        if template.recursion_entry_point {
            self.enter_group_frame(template.group)?;
            act.scope_entered = Some(template.group);
        }
        self.drive(act)
    }

    /// Highest priority first; among equals the earliest declared wins and a
    /// second match is reported as ambiguous. Global templates are the fallback.
    fn find_template(
        &mut self,
        group: GroupId,
        exclude: &[TemplateId],
        has_children: bool,
    ) -> Result<Option<(TemplateId, usize)>, StxError> {
        let program = self.program;
        let mut failures = Vec::new();
        let mut selected = None;

        for candidates in [&program.group(group).candidates, &program.globals] {
            let mut found = None;
            for (index, &id) in candidates.iter().enumerate() {
                if exclude.contains(&id) {
                    continue;
                }
                match self.try_match(id, has_children) {
                    Ok(Some(position)) => {
                        found = Some((index, id, position));
                        break;
                    }
                    Ok(None) => {}
                    Err(e) => failures.push((id, e)),
                }
            }
            let Some((index, id, position)) = found else {
                continue;
            };

            let priority = program.template(id).priority;
            let rival = candidates[index + 1..]
                .iter()
                .take_while(|t| program.template(**t).priority == priority)
                .find(|t| {
                    !exclude.contains(t) && matches!(self.try_match(**t, has_children), Ok(Some(_)))
                });
            if let Some(rival) = rival {
                let (chosen, other) = (program.template(id), program.template(*rival));
                let warning = StxError::definition(format!(
                    "Ambiguous template rule with priority {}: `{}' and `{}' both match; using `{}'",
                    priority, chosen.source, other.source, chosen.source
                ));
                self.report(Severity::Warning, warning, Some(other.body))?;
            }
            selected = Some((id, position));
            break;
        }

        for (id, error) in failures {
            let at = program.template(id).body;
            self.report(Severity::Error, error.into(), Some(at))?;
        }
        if let Some((id, _)) = selected {
            log::trace!("matched `{}'", program.template(id).source);
        }
        Ok(selected)
    }

    fn try_match(&self, id: TemplateId, has_children: bool) -> Result<Option<usize>, PathError> {
        let program = self.program;
        let template = program.template(id);
        let scope = ScopeView::new(
            &[],
            &self.group_frames,
            &program.group(template.group).ancestry,
        );
        let mut e_ctx =
            EvaluationContext::new(&self.ancestors, &scope).with_child_nodes(has_children);
        let top = self.ancestors.len();
        Ok(template
            .pattern
            .matches(&mut e_ctx, top, true)?
            .then_some(e_ctx.position))
    }

    /// The built-in rule: descend into elements and the root, copy what the
    /// configured pass-through level allows.
    fn apply_default(
        &mut self,
        group: GroupId,
        params: Params,
        has_children: bool,
    ) -> Result<(), StxError> {
        let event = self.current_event()?;
        let depth = self.ancestors.len();
        let pass = self.config.pass_through;
        log::trace!("no template for node at depth {}; default rule", depth);

        match event.kind() {
            EventKind::Root | EventKind::Element => {
                let copied = match event.name() {
                    Some(name) if event.kind() == EventKind::Element && pass.copies_markup() => {
                        self.emit(
                            OutputEvent::StartElement {
                                name: name.clone(),
                                attributes: event.attributes().to_vec(),
                            },
                            None,
                        )?;
                        Some(name.clone())
                    }
                    _ => None,
                };
                let mut act =
                    Activation::new(ActivationKind::Default { copied }, depth, 1, has_children);
                act.state = ActivationState::AwaitingChildren;
                let level = self.current_level()?;
                level.children = Some(ChildDispatch { group, params });
                level.activations.push(act);
                Ok(())
            }
            EventKind::Text if pass.copies_text() => {
                self.emit(OutputEvent::Characters(event.value().to_string()), None)
            }
            EventKind::Comment if pass.copies_everything() => {
                self.emit(OutputEvent::Comment(event.value().to_string()), None)
            }
            EventKind::ProcessingInstruction if pass.copies_everything() => {
                let target = event.name().map(|n| n.local_name.clone()).unwrap_or_default();
                self.emit(
                    OutputEvent::ProcessingInstruction {
                        target,
                        data: event.value().to_string(),
                    },
                    None,
                )
            }
            EventKind::Attribute if pass.copies_markup() => {
                let name = event.name().cloned().unwrap_or_default();
                let attribute = Attribute::new(name, event.value());
                match self.emitter.add_attribute(attribute) {
                    Ok(()) => Ok(()),
                    Err(err) => self.report(Severity::Error, err, None),
                }
            }
            _ => Ok(()),
        }
    }

    /// Runs `act` until it finishes or parks itself on the current level.
    pub(crate) fn drive(&mut self, mut act: Activation) -> Result<(), StxError> {
        loop {
            let request = match self.run(&mut act)? {
                super::execute::Outcome::Finished => return self.finish(act),
                super::execute::Outcome::Suspended(request) => request,
            };
            log::trace!("activation at depth {} suspends: {:?}", act.depth, request_name(&request));
            match request {
                Request::Attributes { group, params } => {
                    self.process_attributes(group, params)?;
                    act.resuming = true;
                }
                Request::Children { group, params } => {
                    act.state = ActivationState::AwaitingChildren;
                    let level = self.current_level()?;
                    level.children = Some(ChildDispatch { group, params });
                    level.activations.push(act);
                    return Ok(());
                }
                Request::Siblings(request) => {
                    act.state = ActivationState::AwaitingSiblings(request);
                    self.current_level()?.activations.push(act);
                    return Ok(());
                }
                Request::SelfNode { group, params } => {
                    act.state = ActivationState::AwaitingSelf(group);
                    let has_children = act.has_children;
                    let level = self.current_level()?;
                    let mut exclude: Vec<TemplateId> = level
                        .activations
                        .iter()
                        .filter_map(Activation::template)
                        .collect();
                    exclude.extend(act.template());
                    let index = level.activations.len();
                    level.activations.push(act);

                    self.dispatch(group, params, &exclude, has_children)?;

                    // Resume at once unless the inner activations are still waiting.
                    let level = self.current_level()?;
                    if level.activations.len() != index + 1 {
                        return Ok(());
                    }
                    let Some(mut waiting) = level.activations.pop() else {
                        return Ok(());
                    };
                    waiting.state = ActivationState::Advancing;
                    waiting.resuming = true;
                    act = waiting;
                }
            }
        }
    }

    pub(crate) fn resume(&mut self, mut act: Activation) -> Result<(), StxError> {
        if let ActivationKind::Default { copied } = &act.kind {
            if let Some(name) = copied.clone() {
                self.emit(OutputEvent::EndElement(name), None)?;
            }
            return Ok(());
        }
        log::trace!("resuming activation at depth {}", act.depth);
        act.state = ActivationState::Advancing;
        act.resuming = true;
        self.drive(act)
    }

    fn finish(&mut self, act: Activation) -> Result<(), StxError> {
        if let Some(group) = act.scope_entered {
            self.group_frames.pop(group);
        }
        if let Some(id) = act.template() {
            let template = self.program.template(id);
            log::trace!("leaving template `{}'", template.source);
            self.observe(|o| o.leave_template(template));
        }
        Ok(())
    }

    /// Pushes a fresh variable frame for `group` and runs its declarations.
    pub(crate) fn enter_group_frame(&mut self, group: GroupId) -> Result<(), StxError> {
        self.group_frames.push(group);
        let Some(body) = self.program.group(group).init else {
            return Ok(());
        };
        let passed: Params = if group == self.program.root_group() {
            Rc::new(self.parameters().clone())
        } else {
            Params::default()
        };
        let depth = self.ancestors.len();
        let mut act = Activation::new(ActivationKind::GroupInit(group), depth, 1, false);
        act.frames.push(Frame::new(group, body, passed));
        self.drive(act)
    }

    /// Dispatches every attribute of the current element as a node of its own.
    fn process_attributes(&mut self, group: GroupId, params: Params) -> Result<(), StxError> {
        let element = self.current_event()?;
        for (index, attribute) in element.attributes().iter().enumerate() {
            let event = Rc::new(Event::attribute(attribute, index + 1));
            self.ancestors.push(event.clone());
            self.levels.push(Level::default());
            let depth = self.ancestors.len();
            self.observe(|o| o.enter_event(&event, depth));
            self.dispatch(group, params.clone(), &[], false)?;
            self.close_node(CloseMode::Final)?;
        }
        Ok(())
    }

    /// Offers a new child to the sibling waiters of its parent, innermost
    /// first. Waiters that decline are resumed; the first that accepts decides
    /// the group the child is processed in.
    pub(crate) fn sibling_target(
        &mut self,
        event: &EventRef,
    ) -> Result<Option<ChildDispatch>, StxError> {
        loop {
            let Some(wait) = self.levels.last_mut().and_then(|l| l.sibling_waits.pop()) else {
                return Ok(None);
            };
            let Some(request) = wait.request().cloned() else {
                self.resume_sibling_wait(wait)?;
                continue;
            };
            if self.sibling_accepted(&wait, &request, event)? {
                self.current_level()?.sibling_waits.push(wait);
                return Ok(Some(ChildDispatch {
                    group: request.group,
                    params: request.params,
                }));
            }
            self.resume_sibling_wait(wait)?;
        }
    }

    fn sibling_accepted(
        &mut self,
        wait: &SiblingWait,
        request: &SiblingRequest,
        event: &EventRef,
    ) -> Result<bool, StxError> {
        let program = self.program;
        let Instruction::ProcessSiblings {
            while_pattern,
            until_pattern,
            ..
        } = &program.node(request.instruction).instruction
        else {
            return Ok(true);
        };
        let frame = wait.activations.last().and_then(Activation::frame);
        let locals = frame.map(|f| f.locals.as_slice()).unwrap_or_default();
        let group = frame.map_or(request.group, |f| f.group);

        self.ancestors.push(event.clone());
        let result = {
            let scope = ScopeView::new(locals, &self.group_frames, &program.group(group).ancestry);
            let mut e_ctx = EvaluationContext::new(&self.ancestors, &scope);
            sibling_condition(
                while_pattern.as_ref(),
                until_pattern.as_ref(),
                &mut e_ctx,
                self.ancestors.len(),
            )
        };
        self.ancestors.pop();

        match result {
            Ok(accepted) => Ok(accepted),
            Err(e) => {
                self.report(Severity::Error, e.into(), Some(request.instruction))?;
                Ok(false)
            }
        }
    }
}

fn sibling_condition(
    while_pattern: Option<&Pattern>,
    until_pattern: Option<&Pattern>,
    e_ctx: &mut EvaluationContext<'_>,
    top: usize,
) -> Result<bool, PathError> {
    if let Some(pattern) = while_pattern
        && !pattern.matches(e_ctx, top, false)?
    {
        return Ok(false);
    }
    if let Some(pattern) = until_pattern
        && pattern.matches(e_ctx, top, false)?
    {
        return Ok(false);
    }
    Ok(true)
}

fn request_name(request: &Request) -> &'static str {
    match request {
        Request::Children { .. } => "children",
        Request::Attributes { .. } => "attributes",
        Request::SelfNode { .. } => "self",
        Request::Siblings(_) => "siblings",
    }
}

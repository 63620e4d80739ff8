//! The streaming processor: receives input events one at a time, keeps the
//! ancestor stack, and drives template activations through the processing
//! status state machine.
//!
//! Each open node owns a [`Level`] holding the activations started for it.
//! An activation runs until it finishes or asks for a traversal; a suspended
//! activation stays on its level and is resumed when the requested part of the
//! stream has gone by (the node's end for children and self, the first
//! non-qualifying sibling or the parent's end for siblings).

pub(crate) mod activation;
mod dispatch;
pub(crate) mod execute;

use crate::config::ProcessorConfig;
use crate::diagnostics::{ErrorListener, LogErrorListener};
use crate::emitter::EmitterStack;
use crate::error::{Diagnostic, Severity, StxError};
use crate::observer::TraceObserver;
use crate::output::{OutputEvent, OutputResolver, OutputSink};
use crate::program::{NodeId, Program};
use crate::scope::GroupFrames;
use activation::{Level, SiblingWait};
use std::collections::HashMap;
use std::rc::Rc;
use stxflow_path::{Attribute, Event, EventKind, EventRef, QName, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DocumentState {
    NotStarted,
    Running,
    Finished,
    Aborted,
}

/// How a node's level is torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CloseMode {
    /// Siblings may follow; sibling waiters are handed to the parent.
    Sibling,
    /// Nothing can follow (root, attributes); every activation is resumed.
    Final,
    /// A node restored to resume its sibling waiters.
    Restored,
}

pub struct Processor<'a> {
    pub(crate) program: &'a Program,
    pub(crate) config: ProcessorConfig,
    listener: Option<Box<dyn ErrorListener + 'a>>,
    observer: Option<&'a mut dyn TraceObserver>,
    pub(crate) resolver: Option<Box<dyn OutputResolver + 'a>>,
    pub(crate) emitter: EmitterStack<'a>,
    pub(crate) ancestors: Vec<EventRef>,
    pub(crate) levels: Vec<Level>,
    pub(crate) group_frames: GroupFrames,
    parameters: HashMap<String, Value>,
    /// Open input elements, for well-formedness checks.
    input_open: Vec<QName>,
    /// Depth inside a subtree nobody asked to process.
    skip_depth: usize,
    /// Start tag held back until the next event tells whether it has children.
    pending_start: Option<EventRef>,
    pending_text: String,
    state: DocumentState,
}

impl<'a> Processor<'a> {
    pub fn new(program: &'a Program, output: &'a mut dyn OutputSink) -> Self {
        Self {
            program,
            config: ProcessorConfig::default(),
            listener: None,
            observer: None,
            resolver: None,
            emitter: EmitterStack::new(output),
            ancestors: Vec::new(),
            levels: Vec::new(),
            group_frames: GroupFrames::new(program.group_count()),
            parameters: HashMap::new(),
            input_open: Vec::new(),
            skip_depth: 0,
            pending_start: None,
            pending_text: String::new(),
            state: DocumentState::NotStarted,
        }
    }

    pub fn with_config(mut self, config: ProcessorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_error_listener(mut self, listener: impl ErrorListener + 'a) -> Self {
        self.listener = Some(Box::new(listener));
        self
    }

    pub fn with_observer(mut self, observer: &'a mut dyn TraceObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn with_output_resolver(mut self, resolver: impl OutputResolver + 'a) -> Self {
        self.resolver = Some(Box::new(resolver));
        self
    }

    /// Supplies a value for a parameter declared in the top-level group.
    pub fn set_parameter(&mut self, name: &str, value: impl Into<Value>) {
        self.parameters.insert(name.to_string(), value.into());
    }

    pub fn start_document(&mut self) -> Result<(), StxError> {
        if self.state != DocumentState::NotStarted {
            return Err(StxError::input("Document already started"));
        }
        self.state = DocumentState::Running;
        let result = self.on_start_document();
        self.track(result)
    }

    pub fn end_document(&mut self) -> Result<(), StxError> {
        self.ensure_running()?;
        let result = self.on_end_document();
        if result.is_ok() {
            self.state = DocumentState::Finished;
        }
        self.track(result)
    }

    pub fn start_element(&mut self, name: QName, attributes: Vec<Attribute>) -> Result<(), StxError> {
        self.ensure_running()?;
        let result = self.on_start_element(name, attributes);
        self.track(result)
    }

    pub fn end_element(&mut self, name: &QName) -> Result<(), StxError> {
        self.ensure_running()?;
        let result = self.on_end_element(name);
        self.track(result)
    }

    /// Adjacent calls are coalesced into a single text node.
    pub fn characters(&mut self, text: &str) -> Result<(), StxError> {
        self.ensure_running()?;
        self.pending_text.push_str(text);
        Ok(())
    }

    pub fn comment(&mut self, text: &str) -> Result<(), StxError> {
        self.ensure_running()?;
        let result = self.on_leaf(Event::comment(text));
        self.track(result)
    }

    pub fn processing_instruction(&mut self, target: &str, data: &str) -> Result<(), StxError> {
        self.ensure_running()?;
        let result = self.on_leaf(Event::processing_instruction(target, data));
        self.track(result)
    }

    fn ensure_running(&self) -> Result<(), StxError> {
        match self.state {
            DocumentState::Running => Ok(()),
            DocumentState::NotStarted => Err(StxError::input("Document not started")),
            DocumentState::Finished => Err(StxError::input("Document already ended")),
            DocumentState::Aborted => Err(StxError::input("Transformation was aborted")),
        }
    }

    fn track<T>(&mut self, result: Result<T, StxError>) -> Result<T, StxError> {
        if result.is_err() {
            self.state = DocumentState::Aborted;
        }
        result
    }

    fn on_start_document(&mut self) -> Result<(), StxError> {
        log::debug!("start of document");
        self.observe(|o| o.start_document());
        self.emit(OutputEvent::StartDocument, None)?;

        let root = Rc::new(Event::root());
        self.ancestors.push(root.clone());
        self.levels.push(Level::default());
        self.observe(|o| o.enter_event(&root, 1));

        for index in 0..self.program.group_count() {
            self.enter_group_frame(crate::program::GroupId(index))?;
        }
        let group = self.program.root_group();
        self.dispatch(group, Rc::default(), &[], true)
    }

    fn on_end_document(&mut self) -> Result<(), StxError> {
        if let Some(open) = self.input_open.last() {
            let err = StxError::input(format!("Element `{}' was never closed", open));
            return self.fatal(err);
        }
        self.flush_pending(false)?;
        self.close_node(CloseMode::Final)?;
        self.emit(OutputEvent::EndDocument, None)?;
        self.observe(|o| o.end_document());
        log::debug!("end of document");
        Ok(())
    }

    fn on_start_element(&mut self, name: QName, attributes: Vec<Attribute>) -> Result<(), StxError> {
        self.flush_pending(false)?;
        self.input_open.push(name.clone());
        self.pending_start = Some(Rc::new(Event::element(name, attributes)));
        Ok(())
    }

    fn on_end_element(&mut self, name: &QName) -> Result<(), StxError> {
        match self.input_open.pop() {
            Some(open) if open.uri() == name.uri() && open.local_name == name.local_name => {}
            Some(open) => {
                let err = StxError::input(format!(
                    "End tag `{}' does not match start tag `{}'",
                    name, open
                ));
                return self.fatal(err);
            }
            None => {
                let err = StxError::input(format!("End tag `{}' without start tag", name));
                return self.fatal(err);
            }
        }
        self.flush_pending(true)?;
        if self.skip_depth > 0 {
            self.skip_depth -= 1;
            return Ok(());
        }
        self.close_node(CloseMode::Sibling)
    }

    fn on_leaf(&mut self, event: Event) -> Result<(), StxError> {
        self.flush_pending(false)?;
        self.open_node(Rc::new(event), false)
    }

    /// Delivers the held-back start tag and any collected text. `closing` says
    /// the event that triggered the flush is the held-back element's end.
    fn flush_pending(&mut self, closing: bool) -> Result<(), StxError> {
        let text = self.take_text();
        if let Some(start) = self.pending_start.take() {
            let has_children = text.is_some() || !closing;
            self.open_node(start, has_children)?;
        }
        if let Some(text) = text {
            self.open_node(Rc::new(Event::text(text)), false)?;
        }
        Ok(())
    }

    fn take_text(&mut self) -> Option<String> {
        if self.pending_text.is_empty() {
            return None;
        }
        let text = std::mem::take(&mut self.pending_text);
        if self.config.strip_space && text.chars().all(|c| matches!(c, ' ' | '\t' | '\n' | '\r')) {
            return None;
        }
        Some(text)
    }

    /// Makes `event` the current node and dispatches it. Leaves (everything
    /// but elements) are closed again right away.
    fn open_node(&mut self, event: EventRef, has_children: bool) -> Result<(), StxError> {
        let is_element = event.kind() == EventKind::Element;
        if self.skip_depth > 0 {
            if is_element {
                self.skip_depth += 1;
            }
            return Ok(());
        }
        let Some(parent) = self.ancestors.last() else {
            return self.fatal(StxError::input("Content outside of the document"));
        };
        parent.register_child(&event);

        let target = match self.sibling_target(&event)? {
            Some(target) => Some(target),
            None => self.levels.last().and_then(|l| l.children.clone()),
        };
        let Some(target) = target else {
            log::trace!("skipping unrequested node at depth {}", self.ancestors.len() + 1);
            if is_element {
                self.skip_depth = 1;
            }
            return Ok(());
        };

        self.ancestors.push(event.clone());
        self.levels.push(Level::default());
        let depth = self.ancestors.len();
        self.observe(|o| o.enter_event(&event, depth));
        self.dispatch(target.group, target.params, &[], has_children)?;
        if !is_element {
            self.close_node(CloseMode::Sibling)?;
        }
        Ok(())
    }

    /// Ends the current node: releases sibling waiters among its children,
    /// resumes its suspended activations innermost first, and pops it.
    pub(crate) fn close_node(&mut self, mode: CloseMode) -> Result<(), StxError> {
        while let Some(wait) = self.levels.last_mut().and_then(|l| l.sibling_waits.pop()) {
            self.resume_sibling_wait(wait)?;
        }

        loop {
            let Some(level) = self.levels.last_mut() else {
                break;
            };
            match level.activations.last() {
                None => break,
                Some(act)
                    if mode == CloseMode::Sibling
                        && matches!(act.state, activation::ActivationState::AwaitingSiblings(_)) =>
                {
                    break;
                }
                Some(_) => {}
            }
            level.children = None;
            let Some(act) = level.activations.pop() else {
                break;
            };
            self.resume(act)?;
        }

        let depth = self.ancestors.len();
        let (Some(level), Some(event)) = (self.levels.pop(), self.ancestors.pop()) else {
            return Err(StxError::input("Unbalanced end of node"));
        };
        if mode != CloseMode::Restored {
            self.observe(|o| o.leave_event(&event, depth));
        }
        if !level.activations.is_empty() {
            log::trace!(
                "{} activation(s) at depth {} wait for following siblings",
                level.activations.len(),
                depth
            );
            if let Some(parent) = self.levels.last_mut() {
                parent.sibling_waits.push(SiblingWait {
                    event,
                    activations: level.activations,
                });
            }
        }
        Ok(())
    }

    pub(crate) fn resume_sibling_wait(&mut self, wait: SiblingWait) -> Result<(), StxError> {
        log::trace!("resuming process-siblings at depth {}", self.ancestors.len() + 1);
        self.ancestors.push(wait.event);
        self.levels.push(Level::with_activations(wait.activations));
        self.close_node(CloseMode::Restored)
    }

    pub(crate) fn current_event(&self) -> Result<EventRef, StxError> {
        self.ancestors
            .last()
            .cloned()
            .ok_or_else(|| StxError::input("No current node"))
    }

    /// The node at stack depth `depth` (1 is the root).
    pub(crate) fn event_at(&self, depth: usize) -> Result<EventRef, StxError> {
        depth
            .checked_sub(1)
            .and_then(|i| self.ancestors.get(i))
            .cloned()
            .ok_or_else(|| StxError::input(format!("No node at depth {}", depth)))
    }

    pub(crate) fn current_level(&mut self) -> Result<&mut Level, StxError> {
        self.levels
            .last_mut()
            .ok_or_else(|| StxError::input("No current node"))
    }

    pub(crate) fn observe(&mut self, callback: impl FnOnce(&mut dyn TraceObserver)) {
        if let Some(observer) = self.observer.as_deref_mut() {
            callback(observer);
        }
    }

    /// Sends a result event to the innermost sink. Sink errors are reported
    /// and do not stop the transformation unless the listener says so.
    pub(crate) fn emit(&mut self, event: OutputEvent, at: Option<NodeId>) -> Result<(), StxError> {
        self.observe(|o| o.emit(&event));
        match self.emitter.emit(event) {
            Ok(()) => Ok(()),
            Err(err) => self.report(Severity::Error, err, at),
        }
    }

    pub(crate) fn report(
        &mut self,
        severity: Severity,
        error: StxError,
        at: Option<NodeId>,
    ) -> Result<(), StxError> {
        let location = at.map(|id| self.program.node(id).location);
        let diagnostic = Diagnostic::new(severity, error, location);
        match self.listener.as_deref_mut() {
            Some(listener) => listener.report(&diagnostic),
            None => LogErrorListener::new(self.config.strict).report(&diagnostic),
        }
    }

    /// Stops the transformation on behalf of the event source.
    pub(crate) fn abort<T>(&mut self, error: StxError) -> Result<T, StxError> {
        self.state = DocumentState::Aborted;
        self.fatal(error)
    }

    /// Reports a fatal error and stops, whatever the listener decides.
    pub(crate) fn fatal<T>(&mut self, error: StxError) -> Result<T, StxError> {
        self.report(Severity::Fatal, error.clone(), None)?;
        Err(error)
    }

    pub(crate) fn parameters(&self) -> &HashMap<String, Value> {
        &self.parameters
    }
}

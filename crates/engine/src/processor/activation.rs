//! Activation records: the saved state of a template running for one node.

use crate::program::{GroupId, NodeId, TemplateId};
use std::collections::HashMap;
use std::rc::Rc;
use stxflow_path::{EventRef, Item, QName, Value};

/// Values passed by `with-param`, shared by every template a traversal starts.
pub(crate) type Params = Rc<HashMap<String, Value>>;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ActivationKind {
    Template(TemplateId),
    /// The built-in rule for unmatched nodes; `copied` is the element whose
    /// end tag is still owed.
    Default { copied: Option<QName> },
    GroupInit(GroupId),
}

#[derive(Debug, Clone)]
pub(crate) struct SiblingRequest {
    pub group: GroupId,
    pub params: Params,
    /// The `process-siblings` instruction holding the `while`/`until` patterns.
    pub instruction: NodeId,
}

#[derive(Debug, Clone)]
pub(crate) enum ActivationState {
    Advancing,
    AwaitingChildren,
    /// Waiting for the templates started by `process-self` in this group.
    AwaitingSelf(GroupId),
    AwaitingSiblings(SiblingRequest),
}

/// What a suspended activation asks the processor to do.
#[derive(Debug, Clone)]
pub(crate) enum Request {
    Children { group: GroupId, params: Params },
    Attributes { group: GroupId, params: Params },
    SelfNode { group: GroupId, params: Params },
    Siblings(SiblingRequest),
}

impl Request {
    /// Attribute processing completes before the requester continues, so it
    /// does not count as the activation's single suspension.
    pub fn suspends(&self) -> bool {
        !matches!(self, Request::Attributes { .. })
    }
}

#[derive(Debug)]
pub(crate) struct LoopState {
    pub node: NodeId,
    pub items: std::vec::IntoIter<Item>,
}

/// One template, procedure or initialiser body in execution.
#[derive(Debug)]
pub(crate) struct Frame {
    pub group: GroupId,
    pub cursor: Option<NodeId>,
    /// One map per open container, innermost last.
    pub locals: Vec<HashMap<String, Value>>,
    pub passed: Params,
    pub loops: Vec<LoopState>,
    /// Names owed an end event by open element, attribute and PI instructions.
    pub names: Vec<QName>,
}

impl Frame {
    pub fn new(group: GroupId, body: NodeId, passed: Params) -> Self {
        Self {
            group,
            cursor: Some(body),
            locals: Vec::new(),
            passed,
            loops: Vec::new(),
            names: Vec::new(),
        }
    }
}

#[derive(Debug)]
pub(crate) struct Activation {
    pub kind: ActivationKind,
    /// Stack depth of the node this activation runs for.
    pub depth: usize,
    pub position: usize,
    pub has_children: bool,
    pub state: ActivationState,
    /// The instruction that already suspended this activation, if any.
    pub suspended_by: Option<&'static str>,
    /// Set when control returns to the instruction that suspended.
    pub resuming: bool,
    pub frames: Vec<Frame>,
    /// Group whose fresh variable frame must be dropped when this finishes.
    pub scope_entered: Option<GroupId>,
}

impl Activation {
    pub fn new(kind: ActivationKind, depth: usize, position: usize, has_children: bool) -> Self {
        Self {
            kind,
            depth,
            position,
            has_children,
            state: ActivationState::Advancing,
            suspended_by: None,
            resuming: false,
            frames: Vec::new(),
            scope_entered: None,
        }
    }

    pub fn template(&self) -> Option<TemplateId> {
        match self.kind {
            ActivationKind::Template(id) => Some(id),
            _ => None,
        }
    }

    pub fn frame(&self) -> Option<&Frame> {
        self.frames.last()
    }

    pub fn frame_mut(&mut self) -> Option<&mut Frame> {
        self.frames.last_mut()
    }

    pub fn open_scope(&mut self) {
        if let Some(frame) = self.frames.last_mut() {
            frame.locals.push(HashMap::new());
        }
    }

    pub fn close_scope(&mut self) {
        if let Some(frame) = self.frames.last_mut() {
            frame.locals.pop();
        }
    }

    pub fn declare_local(&mut self, name: &str, value: Value) {
        if let Some(scope) = self.frames.last_mut().and_then(|f| f.locals.last_mut()) {
            scope.insert(name.to_string(), value);
        }
    }
}

/// What the current node's children are dispatched with.
#[derive(Debug, Clone)]
pub(crate) struct ChildDispatch {
    pub group: GroupId,
    pub params: Params,
}

/// Activations of a finished node that wait for its following siblings.
#[derive(Debug)]
pub(crate) struct SiblingWait {
    pub event: EventRef,
    pub activations: Vec<Activation>,
}

impl SiblingWait {
    pub fn request(&self) -> Option<&SiblingRequest> {
        match self.activations.last().map(|a| &a.state) {
            Some(ActivationState::AwaitingSiblings(request)) => Some(request),
            _ => None,
        }
    }
}

/// Processing state of one node on the ancestor stack.
#[derive(Debug, Default)]
pub(crate) struct Level {
    /// Activations started for this node, innermost last. Only the last one
    /// can be resumed.
    pub activations: Vec<Activation>,
    pub children: Option<ChildDispatch>,
    /// Waiters among this node's children, innermost last.
    pub sibling_waits: Vec<SiblingWait>,
}

impl Level {
    pub fn with_activations(activations: Vec<Activation>) -> Self {
        Self {
            activations,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scopes_nest_within_frame() {
        let mut act = Activation::new(ActivationKind::Template(TemplateId(0)), 2, 1, true);
        act.frames
            .push(Frame::new(GroupId(0), NodeId(0), Params::default()));
        act.open_scope();
        act.declare_local("a", Value::number(1.0));
        act.open_scope();
        act.declare_local("b", Value::number(2.0));
        assert_eq!(act.frame().unwrap().locals.len(), 2);
        act.close_scope();
        let locals = &act.frame().unwrap().locals;
        assert!(locals[0].contains_key("a") && locals.len() == 1);
        assert_eq!(act.template(), Some(TemplateId(0)));
    }

    #[test]
    fn test_attribute_requests_do_not_suspend() {
        let params = Params::default();
        assert!(!Request::Attributes { group: GroupId(0), params: params.clone() }.suspends());
        assert!(Request::Children { group: GroupId(0), params }.suspends());
    }
}

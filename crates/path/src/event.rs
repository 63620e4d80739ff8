//! Structural events of the input document.
//!
//! Events are shared through [`EventRef`] handles: the live ancestor stack holds one
//! handle per open event and any node-typed [`crate::Value`] holds another, so an
//! event stays alive for as long as either still refers to it.
//!
//! Each parent keeps a counter per [`PositionKey`]. When a child arrives it is
//! registered with its parent, which fixes the child's position among the
//! siblings that satisfy the same structural test.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// Shared, counted handle to an event.
pub type EventRef = Rc<Event>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct QName {
    pub prefix: Option<String>,
    pub local_name: String,
    pub namespace_uri: Option<String>,
}

impl QName {
    pub fn new(local_name: impl Into<String>) -> Self {
        Self {
            prefix: None,
            local_name: local_name.into(),
            namespace_uri: None,
        }
    }

    pub fn with_namespace(
        prefix: Option<String>,
        local_name: impl Into<String>,
        namespace_uri: Option<String>,
    ) -> Self {
        Self {
            prefix,
            local_name: local_name.into(),
            namespace_uri,
        }
    }

    /// The namespace URI, or the empty string for names in no namespace.
    pub fn uri(&self) -> &str {
        self.namespace_uri.as_deref().unwrap_or("")
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.prefix {
            Some(prefix) if !prefix.is_empty() => write!(f, "{}:{}", prefix, self.local_name),
            _ => write!(f, "{}", self.local_name),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: QName,
    pub value: String,
}

impl Attribute {
    pub fn new(name: QName, value: impl Into<String>) -> Self {
        Self {
            name,
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Root,
    Element,
    Attribute,
    Text,
    Comment,
    ProcessingInstruction,
}

/// The "same test" groups used for sibling position counting.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PositionKey {
    /// `prefix:local` or `local`
    Name { uri: String, local: String },
    /// `*:local`
    LocalName(String),
    /// `prefix:*`
    Namespace(String),
    /// `*`
    AnyElement,
    Text,
    Comment,
    /// `processing-instruction('target')` or `processing-instruction()`
    ProcessingInstruction(Option<String>),
    /// `node()`
    Node,
}

impl PositionKey {
    /// Every key a child event of this kind and name is counted under.
    fn keys_for(event: &Event) -> Vec<PositionKey> {
        match event.kind {
            EventKind::Element => {
                let (uri, local) = event
                    .name
                    .as_ref()
                    .map(|n| (n.uri().to_string(), n.local_name.clone()))
                    .unwrap_or_default();
                vec![
                    PositionKey::Name {
                        uri: uri.clone(),
                        local: local.clone(),
                    },
                    PositionKey::LocalName(local),
                    PositionKey::Namespace(uri),
                    PositionKey::AnyElement,
                    PositionKey::Node,
                ]
            }
            EventKind::Text => vec![PositionKey::Text, PositionKey::Node],
            EventKind::Comment => vec![PositionKey::Comment, PositionKey::Node],
            EventKind::ProcessingInstruction => {
                let target = event.name.as_ref().map(|n| n.local_name.clone());
                vec![
                    PositionKey::ProcessingInstruction(target),
                    PositionKey::ProcessingInstruction(None),
                    PositionKey::Node,
                ]
            }
            EventKind::Root | EventKind::Attribute => Vec::new(),
        }
    }
}

#[derive(Debug)]
pub struct Event {
    kind: EventKind,
    name: Option<QName>,
    value: String,
    attributes: Vec<Attribute>,
    /// Fixed ordinal for attribute events, which are not counted by a parent.
    ordinal: Option<usize>,
    positions: RefCell<HashMap<PositionKey, usize>>,
    child_counters: RefCell<HashMap<PositionKey, usize>>,
}

impl Event {
    fn new(kind: EventKind, name: Option<QName>, value: String) -> Self {
        Self {
            kind,
            name,
            value,
            attributes: Vec::new(),
            ordinal: None,
            positions: RefCell::new(HashMap::new()),
            child_counters: RefCell::new(HashMap::new()),
        }
    }

    pub fn root() -> Self {
        Self::new(EventKind::Root, None, String::new())
    }

    pub fn element(name: QName, attributes: Vec<Attribute>) -> Self {
        let mut event = Self::new(EventKind::Element, Some(name), String::new());
        event.attributes = attributes;
        event
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new(EventKind::Text, None, text.into())
    }

    pub fn comment(text: impl Into<String>) -> Self {
        Self::new(EventKind::Comment, None, text.into())
    }

    pub fn processing_instruction(target: impl Into<String>, data: impl Into<String>) -> Self {
        Self::new(
            EventKind::ProcessingInstruction,
            Some(QName::new(target)),
            data.into(),
        )
    }

    /// An attribute event with its 1-based position within the owning element.
    pub fn attribute(attribute: &Attribute, ordinal: usize) -> Self {
        let mut event = Self::new(
            EventKind::Attribute,
            Some(attribute.name.clone()),
            attribute.value.clone(),
        );
        event.ordinal = Some(ordinal);
        event
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Element or attribute name; the target of a processing instruction.
    pub fn name(&self) -> Option<&QName> {
        self.name.as_ref()
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    /// Character content of text, comment and attribute events; PI data.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Element and root content is never retained, so their string value is empty.
    pub fn string_value(&self) -> String {
        match self.kind {
            EventKind::Root | EventKind::Element => String::new(),
            _ => self.value.clone(),
        }
    }

    pub fn is_text(&self) -> bool {
        self.kind == EventKind::Text
    }

    /// Counts `child` among this event's children and records its sibling positions.
    pub fn register_child(&self, child: &Event) {
        let mut counters = self.child_counters.borrow_mut();
        let mut positions = child.positions.borrow_mut();
        for key in PositionKey::keys_for(child) {
            let counter = counters.entry(key.clone()).or_insert(0);
            *counter += 1;
            positions.insert(key, *counter);
        }
    }

    /// 1-based position among the siblings satisfying the same test.
    pub fn position_of(&self, key: &PositionKey) -> usize {
        if let Some(ordinal) = self.ordinal {
            return ordinal;
        }
        self.positions.borrow().get(key).copied().unwrap_or(1)
    }

    /// Number of children counted so far under `key`.
    pub fn child_count(&self, key: &PositionKey) -> usize {
        self.child_counters.borrow().get(key).copied().unwrap_or(0)
    }
}

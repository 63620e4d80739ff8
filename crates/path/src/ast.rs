//! Abstract syntax trees for STXPath expressions and patterns.

use crate::event::{Event, EventKind, PositionKey};

/// An expression that can be evaluated against the ancestor stack.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(String),
    Number(f64),
    /// `(a, b, ...)`; `()` is the empty sequence.
    Sequence(Vec<Expression>),
    Variable(String),
    LocationPath(LocationPath),
    FunctionCall {
        name: String,
        args: Vec<Expression>,
    },
    BinaryOp {
        left: Box<Expression>,
        op: BinaryOperator,
        right: Box<Expression>,
    },
    UnaryOp {
        op: UnaryOperator,
        expr: Box<Expression>,
    },
    /// `if (condition) then a else b`
    Conditional {
        condition: Box<Expression>,
        then_branch: Box<Expression>,
        else_branch: Box<Expression>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Minus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    // Logical
    Or,
    And,
    // Equality
    Equals,
    NotEquals,
    // Relational
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    // Additive
    Plus,
    Minus,
    // Multiplicative
    Multiply,
    Divide,
    Modulo,
}

/// A path over the ancestor stack, like `/doc/section`, `../@id` or `.`.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationPath {
    /// True if the path starts at the document root.
    pub is_absolute: bool,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub axis: Axis,
    pub node_test: NodeTest,
    pub predicates: Vec<Expression>,
}

/// Movement along the ancestor stack. Child and descendant steps can only reach
/// nodes that are currently open, i.e. deeper entries of the same stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Child,
    Descendant,
    Attribute,
    Parent,
    SelfAxis,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeTest {
    /// `prefix:local` or `local`; `uri` is filled in when prefixes are bound.
    Name {
        prefix: Option<String>,
        local: String,
        uri: String,
    },
    /// `*:local`
    LocalName(String),
    /// `prefix:*`
    Namespace { prefix: String, uri: String },
    /// `*`
    Wildcard,
    Text,
    Comment,
    ProcessingInstruction(Option<String>),
    Node,
}

impl NodeTest {
    pub fn name(local: impl Into<String>) -> Self {
        NodeTest::Name {
            prefix: None,
            local: local.into(),
            uri: String::new(),
        }
    }

    /// Tests an event reached along `axis`.
    pub fn matches(&self, event: &Event, axis: Axis) -> bool {
        let principal = if axis == Axis::Attribute {
            EventKind::Attribute
        } else {
            EventKind::Element
        };
        let name = event.name();
        match self {
            NodeTest::Name { local, uri, .. } => {
                event.kind() == principal
                    && name.is_some_and(|n| n.local_name == *local && n.uri() == uri)
            }
            NodeTest::LocalName(local) => {
                event.kind() == principal && name.is_some_and(|n| n.local_name == *local)
            }
            NodeTest::Namespace { uri, .. } => {
                event.kind() == principal && name.is_some_and(|n| n.uri() == uri)
            }
            NodeTest::Wildcard => event.kind() == principal,
            NodeTest::Text => event.kind() == EventKind::Text,
            NodeTest::Comment => event.kind() == EventKind::Comment,
            NodeTest::ProcessingInstruction(target) => {
                event.kind() == EventKind::ProcessingInstruction
                    && target
                        .as_ref()
                        .is_none_or(|t| name.is_some_and(|n| n.local_name == *t))
            }
            NodeTest::Node => match axis {
                Axis::Attribute => event.kind() == EventKind::Attribute,
                _ => !matches!(event.kind(), EventKind::Root | EventKind::Attribute),
            },
        }
    }

    /// The sibling group a node matched by this test is counted in.
    pub fn position_key(&self) -> PositionKey {
        match self {
            NodeTest::Name { local, uri, .. } => PositionKey::Name {
                uri: uri.clone(),
                local: local.clone(),
            },
            NodeTest::LocalName(local) => PositionKey::LocalName(local.clone()),
            NodeTest::Namespace { uri, .. } => PositionKey::Namespace(uri.clone()),
            NodeTest::Wildcard => PositionKey::AnyElement,
            NodeTest::Text => PositionKey::Text,
            NodeTest::Comment => PositionKey::Comment,
            NodeTest::ProcessingInstruction(target) => {
                PositionKey::ProcessingInstruction(target.clone())
            }
            NodeTest::Node => PositionKey::Node,
        }
    }

    /// Default template priority of a single-step pattern using this test.
    pub fn default_priority(&self) -> f64 {
        match self {
            NodeTest::Name { .. } | NodeTest::ProcessingInstruction(Some(_)) => 0.0,
            NodeTest::LocalName(_) | NodeTest::Namespace { .. } => -0.25,
            NodeTest::Wildcard
            | NodeTest::Text
            | NodeTest::Comment
            | NodeTest::ProcessingInstruction(None)
            | NodeTest::Node => -0.5,
        }
    }
}

/// A template-matching pattern: one path pattern or a union of them.
#[derive(Debug, Clone, PartialEq)]
pub enum Pattern {
    Path(PathPattern),
    Union(Vec<PathPattern>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PathPattern {
    /// `/a/b` must start directly below the root; `/` alone matches the root.
    pub is_absolute: bool,
    pub steps: Vec<PatternStep>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PatternStep {
    pub node_test: NodeTest,
    /// `@test`; only valid as the last step.
    pub is_attribute: bool,
    /// The separator before this step is `//` rather than `/`.
    pub descendant_gap: bool,
    pub predicates: Vec<Expression>,
}

impl Pattern {
    /// Splits a union into its alternatives; a plain path yields itself.
    pub fn split_union(self) -> Vec<Pattern> {
        match self {
            Pattern::Path(path) => vec![Pattern::Path(path)],
            Pattern::Union(paths) => paths.into_iter().map(Pattern::Path).collect(),
        }
    }

    /// The priority a template gets when none is given explicitly. A union has
    /// no single priority; each alternative is computed on its own after splitting.
    pub fn default_priority(&self) -> f64 {
        match self {
            Pattern::Union(_) => f64::NAN,
            Pattern::Path(path) => path.default_priority(),
        }
    }
}

impl PathPattern {
    pub fn default_priority(&self) -> f64 {
        match self.steps.as_slice() {
            [step]
                if !self.is_absolute
                    && !step.is_attribute
                    && !step.descendant_gap
                    && step.predicates.is_empty() =>
            {
                step.node_test.default_priority()
            }
            _ => 0.5,
        }
    }
}

/// An attribute value with embedded `{expression}` parts.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValueTemplate {
    Static(String),
    Dynamic(Vec<AvtPart>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum AvtPart {
    Static(String),
    Dynamic(Expression),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(node_test: NodeTest) -> PatternStep {
        PatternStep {
            node_test,
            is_attribute: false,
            descendant_gap: false,
            predicates: vec![],
        }
    }

    fn single(node_test: NodeTest) -> Pattern {
        Pattern::Path(PathPattern {
            is_absolute: false,
            steps: vec![step(node_test)],
        })
    }

    #[test]
    fn test_default_priorities() {
        assert_eq!(single(NodeTest::name("a")).default_priority(), 0.0);
        assert_eq!(
            single(NodeTest::LocalName("a".to_string())).default_priority(),
            -0.25
        );
        assert_eq!(single(NodeTest::Wildcard).default_priority(), -0.5);
        assert_eq!(single(NodeTest::Text).default_priority(), -0.5);
        assert_eq!(
            single(NodeTest::ProcessingInstruction(Some("x".to_string()))).default_priority(),
            0.0
        );

        let two_steps = Pattern::Path(PathPattern {
            is_absolute: false,
            steps: vec![step(NodeTest::name("a")), step(NodeTest::name("b"))],
        });
        assert_eq!(two_steps.default_priority(), 0.5);
    }

    #[test]
    fn test_union_is_split_with_own_priorities() {
        let union = Pattern::Union(vec![
            PathPattern {
                is_absolute: false,
                steps: vec![step(NodeTest::name("a"))],
            },
            PathPattern {
                is_absolute: false,
                steps: vec![step(NodeTest::Wildcard)],
            },
        ]);
        assert!(union.default_priority().is_nan());

        let parts = union.split_union();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].default_priority(), 0.0);
        assert_eq!(parts[1].default_priority(), -0.5);
    }

    #[test]
    fn test_node_test_against_events() {
        let elem = Event::element(crate::event::QName::new("a"), vec![]);
        let text = Event::text("t");
        assert!(NodeTest::name("a").matches(&elem, Axis::Child));
        assert!(!NodeTest::name("a").matches(&text, Axis::Child));
        assert!(NodeTest::Node.matches(&text, Axis::Child));
        assert!(!NodeTest::Node.matches(&Event::root(), Axis::Child));
        assert!(!NodeTest::Wildcard.matches(&elem, Axis::Attribute));
    }
}

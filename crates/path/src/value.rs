//! The STXPath value model: ordered, possibly empty sequences of typed items.
//!
//! A value is immutable once produced. Operations that combine values build a new
//! sequence instead of mutating their inputs. Node items hold a counted handle to
//! their event plus the ancestor-stack depth at which the node was captured.

use crate::event::EventRef;
use std::fmt;
use std::rc::Rc;

/// A node captured from the ancestor stack.
#[derive(Debug, Clone)]
pub struct NodeRef {
    pub event: EventRef,
    /// 1-based ancestor-stack depth of the node when it was captured.
    pub depth: usize,
}

impl NodeRef {
    pub fn new(event: EventRef, depth: usize) -> Self {
        Self { event, depth }
    }

    pub fn is_same_node(&self, other: &NodeRef) -> bool {
        Rc::ptr_eq(&self.event, &other.event)
    }
}

/// Node identity: two references are equal when they hold the same event.
impl PartialEq for NodeRef {
    fn eq(&self, other: &Self) -> bool {
        self.is_same_node(other)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Boolean(bool),
    Number(f64),
    String(String),
    Node(NodeRef),
}

impl Item {
    pub fn to_boolean(&self) -> bool {
        match self {
            Item::Boolean(b) => *b,
            Item::Number(n) => *n != 0.0 && !n.is_nan(),
            Item::String(s) => !s.is_empty(),
            Item::Node(_) => true,
        }
    }

    pub fn to_number(&self) -> f64 {
        match self {
            Item::Boolean(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Item::Number(n) => *n,
            Item::String(s) => parse_number(s),
            Item::Node(node) => parse_number(&node.event.string_value()),
        }
    }

    pub fn string_value(&self) -> String {
        match self {
            Item::Boolean(b) => b.to_string(),
            Item::Number(n) => format_number(*n),
            Item::String(s) => s.clone(),
            Item::Node(node) => node.event.string_value(),
        }
    }

    pub fn is_boolean(&self) -> bool {
        matches!(self, Item::Boolean(_))
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Item::Number(_))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Value {
    items: Vec<Item>,
}

impl Value {
    pub fn empty() -> Self {
        Self { items: Vec::new() }
    }

    pub fn boolean(b: bool) -> Self {
        Self::from_item(Item::Boolean(b))
    }

    pub fn number(n: f64) -> Self {
        Self::from_item(Item::Number(n))
    }

    pub fn string(s: impl Into<String>) -> Self {
        Self::from_item(Item::String(s.into()))
    }

    pub fn node(event: EventRef, depth: usize) -> Self {
        Self::from_item(Item::Node(NodeRef::new(event, depth)))
    }

    pub fn from_item(item: Item) -> Self {
        Self { items: vec![item] }
    }

    pub fn from_items(items: Vec<Item>) -> Self {
        Self { items }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn into_items(self) -> Vec<Item> {
        self.items
    }

    pub fn first(&self) -> Option<&Item> {
        self.items.first()
    }

    /// Appends the items of `other` to this sequence.
    pub fn append(&mut self, other: Value) {
        self.items.extend(other.items);
    }

    /// The first node item, if the value starts with one.
    pub fn as_node(&self) -> Option<&NodeRef> {
        match self.items.first() {
            Some(Item::Node(node)) => Some(node),
            _ => None,
        }
    }

    pub fn to_boolean(&self) -> bool {
        self.first().is_some_and(Item::to_boolean)
    }

    pub fn to_number(&self) -> f64 {
        self.first().map_or(f64::NAN, Item::to_number)
    }

    pub fn string_value(&self) -> String {
        self.first().map(Item::string_value).unwrap_or_default()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.string_value())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::boolean(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::string(s)
    }
}

/// Formats a number the way STXPath converts numbers to strings.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n == 0.0 {
        "0".to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// Parses the lexical form `-? digits ('.' digits?)? | -? '.' digits`, surrounded
/// by optional whitespace. Anything else is NaN.
pub fn parse_number(s: &str) -> f64 {
    let trimmed = s.trim();
    let unsigned = trimmed.strip_prefix('-').unwrap_or(trimmed);
    let mut digits = 0;
    let mut dots = 0;
    for c in unsigned.chars() {
        match c {
            '0'..='9' => digits += 1,
            '.' => dots += 1,
            _ => return f64::NAN,
        }
    }
    if digits == 0 || dots > 1 {
        return f64::NAN;
    }
    trimmed.parse().unwrap_or(f64::NAN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(2.5), "2.5");
        assert_eq!(format_number(f64::NAN), "NaN");
        assert_eq!(format_number(f64::NEG_INFINITY), "-Infinity");
        assert_eq!(format_number(1.0 / 3.0), "0.3333333333333333");
    }

    #[test]
    fn test_parse_number_is_strict() {
        assert_eq!(parse_number(" 42 "), 42.0);
        assert_eq!(parse_number("-.5"), -0.5);
        assert_eq!(parse_number("7."), 7.0);
        assert!(parse_number("1e3").is_nan());
        assert!(parse_number("+1").is_nan());
        assert!(parse_number("").is_nan());
        assert!(parse_number("1.2.3").is_nan());
        assert!(parse_number("inf").is_nan());
    }

    #[test]
    fn test_conversions_use_first_item() {
        let mut seq = Value::number(0.0);
        seq.append(Value::string("x"));
        assert_eq!(seq.len(), 2);
        assert!(!seq.to_boolean());
        assert_eq!(seq.string_value(), "0");
        assert!(Value::empty().to_number().is_nan());
        assert_eq!(Value::empty().string_value(), "");
        assert!(!Value::empty().to_boolean());
    }

    #[test]
    fn test_node_values_keep_event_alive() {
        let event = Rc::new(Event::text("12"));
        let value = Value::node(Rc::clone(&event), 3);
        drop(event);
        let node = value.as_node().map(|n| n.depth);
        assert_eq!(node, Some(3));
        assert_eq!(value.to_number(), 12.0);
        assert!(value.to_boolean());
    }
}

//! Values, events and the STXPath expression/pattern language evaluated over a
//! streaming ancestor stack.

pub mod ast;
pub mod engine;
pub mod error;
pub mod event;
pub mod functions;
pub mod operators;
pub mod parser;
pub mod pattern;
pub mod value;

pub use ast::{
    AttributeValueTemplate, AvtPart, Axis, BinaryOperator, Expression, LocationPath, NodeTest,
    PathPattern, Pattern, PatternStep, Step,
};
pub use engine::{EvaluationContext, VariableScope, evaluate, evaluate_avt};
pub use error::PathError;
pub use event::{Attribute, Event, EventKind, EventRef, PositionKey, QName};
pub use parser::{
    parse_avt, parse_expression, parse_expression_with, parse_pattern, parse_pattern_with,
};
pub use value::{Item, NodeRef, Value};

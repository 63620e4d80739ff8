//! The evaluation engine: executes a parsed expression against the live ancestor stack.

use crate::ast::{
    AttributeValueTemplate, AvtPart, Axis, BinaryOperator, Expression, LocationPath, NodeTest,
    Step, UnaryOperator,
};
use crate::error::PathError;
use crate::event::{Event, EventKind, EventRef};
use crate::functions;
use crate::operators;
use crate::value::{Item, NodeRef, Value};
use std::collections::HashMap;
use std::rc::Rc;

/// Resolves `$name` references during evaluation.
pub trait VariableScope {
    fn variable(&self, name: &str) -> Option<&Value>;
}

impl VariableScope for HashMap<String, Value> {
    fn variable(&self, name: &str) -> Option<&Value> {
        self.get(name)
    }
}

/// Everything an expression can observe. `ancestors[0]` is the document root and
/// the last entry is the most recently opened node.
#[derive(Clone, Copy)]
pub struct EvaluationContext<'a> {
    pub ancestors: &'a [EventRef],
    pub variables: &'a dyn VariableScope,
    /// 1-based position of the current node, as recorded by the last pattern match.
    pub position: usize,
    /// Whether the top-most node is known to have children.
    pub has_child_nodes: bool,
}

impl<'a> EvaluationContext<'a> {
    pub fn new(ancestors: &'a [EventRef], variables: &'a dyn VariableScope) -> Self {
        Self {
            ancestors,
            variables,
            position: 1,
            has_child_nodes: false,
        }
    }

    pub fn with_position(mut self, position: usize) -> Self {
        self.position = position;
        self
    }

    pub fn with_child_nodes(mut self, has_child_nodes: bool) -> Self {
        self.has_child_nodes = has_child_nodes;
        self
    }

    /// The node at 1-based stack depth `depth`.
    pub fn node_at(&self, depth: usize) -> Result<&'a EventRef, PathError> {
        depth
            .checked_sub(1)
            .and_then(|i| self.ancestors.get(i))
            .ok_or(PathError::NoContextNode)
    }

    /// True when `node` is still the live stack entry at its recorded depth.
    fn is_live(&self, node: &NodeRef) -> bool {
        self.node_at(node.depth)
            .is_ok_and(|event| Rc::ptr_eq(event, &node.event))
    }
}

/// Evaluates `expr` with the node at stack depth `top` as the current node.
pub fn evaluate(
    expr: &Expression,
    e_ctx: &EvaluationContext<'_>,
    top: usize,
) -> Result<Value, PathError> {
    match expr {
        Expression::Literal(s) => Ok(Value::string(s.clone())),
        Expression::Number(n) => Ok(Value::number(*n)),
        Expression::Sequence(parts) => {
            let mut result = Value::empty();
            for part in parts {
                result.append(evaluate(part, e_ctx, top)?);
            }
            Ok(result)
        }
        Expression::Variable(name) => e_ctx
            .variables
            .variable(name)
            .cloned()
            .ok_or_else(|| PathError::UnknownVariable(name.clone())),
        Expression::LocationPath(path) => evaluate_location_path(path, e_ctx, top),
        Expression::FunctionCall { name, args } => {
            let mut evaluated_args = Vec::with_capacity(args.len());
            for arg in args {
                evaluated_args.push(evaluate(arg, e_ctx, top)?);
            }
            functions::evaluate_function(name, evaluated_args, e_ctx, top)
        }
        Expression::BinaryOp { left, op, right } => match op {
            BinaryOperator::Or => Ok(Value::boolean(
                evaluate(left, e_ctx, top)?.to_boolean() || evaluate(right, e_ctx, top)?.to_boolean(),
            )),
            BinaryOperator::And => Ok(Value::boolean(
                evaluate(left, e_ctx, top)?.to_boolean() && evaluate(right, e_ctx, top)?.to_boolean(),
            )),
            BinaryOperator::Equals
            | BinaryOperator::NotEquals
            | BinaryOperator::LessThan
            | BinaryOperator::LessThanOrEqual
            | BinaryOperator::GreaterThan
            | BinaryOperator::GreaterThanOrEqual => {
                let left_val = evaluate(left, e_ctx, top)?;
                let right_val = evaluate(right, e_ctx, top)?;
                Ok(Value::boolean(operators::compare(*op, &left_val, &right_val)))
            }
            _ => {
                // The right operand is not evaluated when the left one is empty.
                let left_val = evaluate(left, e_ctx, top)?;
                if left_val.is_empty() {
                    return Ok(Value::empty());
                }
                let right_val = evaluate(right, e_ctx, top)?;
                operators::arithmetic(*op, &left_val, &right_val)
            }
        },
        Expression::UnaryOp { op, expr } => {
            let val = evaluate(expr, e_ctx, top)?;
            if val.is_empty() {
                return Ok(val);
            }
            match op {
                UnaryOperator::Minus => Ok(Value::number(-val.to_number())),
            }
        }
        Expression::Conditional {
            condition,
            then_branch,
            else_branch,
        } => {
            if evaluate(condition, e_ctx, top)?.to_boolean() {
                evaluate(then_branch, e_ctx, top)
            } else {
                evaluate(else_branch, e_ctx, top)
            }
        }
    }
}

/// Evaluates an attribute value template to its string.
pub fn evaluate_avt(
    avt: &AttributeValueTemplate,
    e_ctx: &EvaluationContext<'_>,
    top: usize,
) -> Result<String, PathError> {
    match avt {
        AttributeValueTemplate::Static(s) => Ok(s.clone()),
        AttributeValueTemplate::Dynamic(parts) => {
            let mut result = String::new();
            for part in parts {
                match part {
                    AvtPart::Static(s) => result.push_str(s),
                    AvtPart::Dynamic(expr) => {
                        result.push_str(&evaluate(expr, e_ctx, top)?.string_value())
                    }
                }
            }
            Ok(result)
        }
    }
}

fn evaluate_location_path(
    path: &LocationPath,
    e_ctx: &EvaluationContext<'_>,
    top: usize,
) -> Result<Value, PathError> {
    let start = if path.is_absolute { 1 } else { top };
    let mut current_nodes = vec![NodeRef::new(Rc::clone(e_ctx.node_at(start)?), start)];
    for step in &path.steps {
        current_nodes = evaluate_step(step, &current_nodes, e_ctx)?;
    }
    Ok(Value::from_items(
        current_nodes.into_iter().map(Item::Node).collect(),
    ))
}

fn evaluate_step(
    step: &Step,
    context_nodes: &[NodeRef],
    e_ctx: &EvaluationContext<'_>,
) -> Result<Vec<NodeRef>, PathError> {
    let mut result = Vec::new();
    for node in context_nodes {
        for candidate in collect_axis_nodes(step.axis, node, e_ctx) {
            if passes_node_test(&step.node_test, &candidate.event, step.axis)
                && predicates_hold(step, &candidate, e_ctx)?
            {
                result.push(candidate);
            }
        }
    }
    Ok(result)
}

/// `.` and `..` are written with a `node()` test that also has to accept the root.
fn passes_node_test(test: &NodeTest, event: &Event, axis: Axis) -> bool {
    match (axis, test) {
        (Axis::SelfAxis | Axis::Parent, NodeTest::Node) => true,
        _ => test.matches(event, axis),
    }
}

fn collect_axis_nodes(axis: Axis, node: &NodeRef, e_ctx: &EvaluationContext<'_>) -> Vec<NodeRef> {
    let depth = node.depth;
    let stack_node = |d: usize| {
        e_ctx
            .node_at(d)
            .ok()
            .map(|event| NodeRef::new(Rc::clone(event), d))
    };
    match axis {
        Axis::SelfAxis => vec![node.clone()],
        Axis::Parent => {
            let attached = node.event.kind() == EventKind::Attribute || e_ctx.is_live(node);
            if attached && depth > 1 {
                stack_node(depth - 1).into_iter().collect()
            } else {
                Vec::new()
            }
        }
        Axis::Child if e_ctx.is_live(node) => stack_node(depth + 1).into_iter().collect(),
        Axis::Descendant if e_ctx.is_live(node) => {
            (depth + 1..=e_ctx.ancestors.len()).filter_map(stack_node).collect()
        }
        Axis::Attribute => node
            .event
            .attributes()
            .iter()
            .enumerate()
            .map(|(i, attr)| NodeRef::new(Rc::new(Event::attribute(attr, i + 1)), depth + 1))
            .collect(),
        Axis::Child | Axis::Descendant => Vec::new(),
    }
}

fn predicates_hold(
    step: &Step,
    candidate: &NodeRef,
    e_ctx: &EvaluationContext<'_>,
) -> Result<bool, PathError> {
    if step.predicates.is_empty() {
        return Ok(true);
    }
    let position = candidate.event.position_of(&step.node_test.position_key());
    // Detached nodes (attributes) are judged from their owner element.
    let depth = if e_ctx.is_live(candidate) {
        candidate.depth
    } else {
        candidate.depth.saturating_sub(1).max(1)
    };
    let sub_ctx = e_ctx
        .with_position(position)
        .with_child_nodes(depth < e_ctx.ancestors.len() || e_ctx.has_child_nodes);
    for predicate in &step.predicates {
        if !predicate_holds(predicate, &sub_ctx, depth, position)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// A numeric predicate selects by position; anything else by its boolean value.
pub(crate) fn predicate_holds(
    predicate: &Expression,
    e_ctx: &EvaluationContext<'_>,
    depth: usize,
    position: usize,
) -> Result<bool, PathError> {
    let value = evaluate(predicate, e_ctx, depth)?;
    Ok(match value.items() {
        [Item::Number(n)] => *n == position as f64,
        _ => value.to_boolean(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Attribute, QName};
    use crate::parser::parse_expression;

    fn stack() -> Vec<EventRef> {
        let root = Rc::new(Event::root());
        let doc = Rc::new(Event::element(
            QName::new("doc"),
            vec![Attribute::new(QName::new("version"), "2")],
        ));
        let item = Rc::new(Event::element(
            QName::new("item"),
            vec![
                Attribute::new(QName::new("id"), "a7"),
                Attribute::new(QName::new("qty"), "3"),
            ],
        ));
        root.register_child(&doc);
        doc.register_child(&Event::element(QName::new("item"), vec![]));
        doc.register_child(&item);
        vec![root, doc, item]
    }

    fn eval_str(expr: &str, ancestors: &[EventRef], vars: &HashMap<String, Value>) -> Value {
        let e_ctx = EvaluationContext::new(ancestors, vars);
        let parsed = parse_expression(expr).unwrap();
        evaluate(&parsed, &e_ctx, ancestors.len()).unwrap()
    }

    #[test]
    fn test_literals_and_arithmetic() {
        let ancestors = stack();
        let vars = HashMap::new();
        assert_eq!(eval_str("1 + 2 * 3", &ancestors, &vars).to_number(), 7.0);
        assert_eq!(eval_str("10 mod 3", &ancestors, &vars).to_number(), 1.0);
        assert_eq!(eval_str("7 div 2", &ancestors, &vars).to_number(), 3.5);
        assert_eq!(eval_str("-(2)", &ancestors, &vars).to_number(), -2.0);
        assert_eq!(eval_str("'a' = 'a' and 1 < 2", &ancestors, &vars).to_boolean(), true);
    }

    #[test]
    fn test_empty_left_operand_skips_right() {
        let ancestors = stack();
        let vars = HashMap::new();
        // $missing would be an error if it were evaluated.
        assert!(eval_str("() mod $missing", &ancestors, &vars).is_empty());

        let e_ctx = EvaluationContext::new(&ancestors, &vars);
        let parsed = parse_expression("3 mod $missing").unwrap();
        assert_eq!(
            evaluate(&parsed, &e_ctx, 3).unwrap_err(),
            PathError::UnknownVariable("missing".to_string())
        );
    }

    #[test]
    fn test_paths_over_the_stack() {
        let ancestors = stack();
        let vars = HashMap::new();
        assert_eq!(eval_str("@id", &ancestors, &vars).string_value(), "a7");
        assert_eq!(eval_str("../@version", &ancestors, &vars).string_value(), "2");
        assert_eq!(eval_str("count(/doc/item)", &ancestors, &vars).to_number(), 1.0);
        assert_eq!(eval_str("count(@*)", &ancestors, &vars).to_number(), 2.0);
        assert_eq!(eval_str("name(/doc/item[2])", &ancestors, &vars).string_value(), "item");
        assert!(eval_str("/doc/item[1]", &ancestors, &vars).is_empty());
        assert_eq!(eval_str("count(//item)", &ancestors, &vars).to_number(), 1.0);
        assert_eq!(eval_str("name(..)", &ancestors, &vars).string_value(), "doc");
        // A child of the current node has not been seen yet.
        assert!(eval_str("child", &ancestors, &vars).is_empty());
        assert_eq!(eval_str("@qty * 2", &ancestors, &vars).to_number(), 6.0);
    }

    #[test]
    fn test_variables_and_sequences() {
        let ancestors = stack();
        let mut vars = HashMap::new();
        vars.insert("n".to_string(), Value::number(4.0));
        assert_eq!(eval_str("$n + 1", &ancestors, &vars).to_number(), 5.0);
        assert_eq!(eval_str("count((1, 2, $n))", &ancestors, &vars).to_number(), 3.0);
        assert_eq!(eval_str("(1, 2) = (2, 3)", &ancestors, &vars).to_boolean(), true);
        assert_eq!(
            eval_str("if ($n > 3) then 'big' else 'small'", &ancestors, &vars).string_value(),
            "big"
        );
    }

    #[test]
    fn test_attribute_value_template() {
        let ancestors = stack();
        let vars: HashMap<String, Value> = HashMap::new();
        let e_ctx = EvaluationContext::new(&ancestors, &vars);
        let avt = crate::parser::parse_avt("#{@id}-{@qty + 1}", &HashMap::new()).unwrap();
        assert_eq!(evaluate_avt(&avt, &e_ctx, 3).unwrap(), "#a7-4");
    }

    #[test]
    fn test_node_value_outlives_stack() {
        let ancestors = stack();
        let vars = HashMap::new();
        let captured = eval_str("..", &ancestors, &vars);
        drop(ancestors);
        let node = captured.as_node().unwrap();
        assert_eq!(node.depth, 2);
        assert_eq!(node.event.name().map(|n| n.local_name.as_str()), Some("doc"));
    }
}

//! Built-in STXPath functions.

use crate::engine::EvaluationContext;
use crate::error::PathError;
use crate::event::{EventKind, EventRef};
use crate::value::{Item, Value};
use std::rc::Rc;

/// Name, minimum and maximum (`None` = unbounded) argument count.
const FUNCTIONS: &[(&str, usize, Option<usize>)] = &[
    // Context
    ("position", 0, Some(0)),
    ("level", 0, Some(0)),
    ("has-child-nodes", 0, Some(0)),
    ("get-node", 0, Some(0)),
    // Node
    ("name", 0, Some(1)),
    ("local-name", 0, Some(1)),
    ("namespace-uri", 0, Some(1)),
    ("prefix", 0, Some(1)),
    // Boolean
    ("not", 1, Some(1)),
    ("true", 0, Some(0)),
    ("false", 0, Some(0)),
    ("boolean", 1, Some(1)),
    // Conversion
    ("number", 0, Some(1)),
    ("string", 0, Some(1)),
    // String
    ("concat", 1, None),
    ("string-length", 0, Some(1)),
    ("normalize-space", 0, Some(1)),
    ("contains", 2, Some(2)),
    ("starts-with", 2, Some(2)),
    ("ends-with", 2, Some(2)),
    ("substring", 2, Some(3)),
    ("substring-before", 2, Some(2)),
    ("substring-after", 2, Some(2)),
    ("translate", 3, Some(3)),
    ("upper-case", 1, Some(1)),
    ("lower-case", 1, Some(1)),
    ("string-join", 2, Some(2)),
    // Sequence & number
    ("count", 1, Some(1)),
    ("empty", 1, Some(1)),
    ("exists", 1, Some(1)),
    ("sum", 1, Some(1)),
    ("min", 1, Some(1)),
    ("max", 1, Some(1)),
    ("avg", 1, Some(1)),
    ("floor", 1, Some(1)),
    ("ceiling", 1, Some(1)),
    ("round", 1, Some(1)),
];

/// Checks that `name` is a known function accepting `arg_count` arguments.
pub fn check_arity(name: &str, arg_count: usize) -> Result<(), PathError> {
    let (_, min, max) = FUNCTIONS
        .iter()
        .find(|(n, _, _)| *n == name)
        .ok_or_else(|| PathError::UnknownFunction(name.to_string()))?;
    if arg_count < *min || max.is_some_and(|m| arg_count > m) {
        let expected = match max {
            Some(m) if m == min => format!("{}", min),
            Some(m) => format!("{} to {}", min, m),
            None => format!("at least {}", min),
        };
        return Err(PathError::function(
            name,
            format!("Expected {} arguments, got {}", expected, arg_count),
        ));
    }
    Ok(())
}

/// Dispatches a function call to the correct implementation.
pub fn evaluate_function(
    name: &str,
    args: Vec<Value>,
    e_ctx: &EvaluationContext<'_>,
    top: usize,
) -> Result<Value, PathError> {
    check_arity(name, args.len())?;
    match name {
        // Context
        "position" => Ok(Value::number(e_ctx.position as f64)),
        "level" => Ok(Value::number(top.saturating_sub(1) as f64)),
        "has-child-nodes" => Ok(Value::boolean(
            top < e_ctx.ancestors.len() || e_ctx.has_child_nodes,
        )),
        "get-node" => Ok(Value::node(Rc::clone(e_ctx.node_at(top)?), top)),

        // Node
        "name" => func_node_name(name, args, e_ctx, top, |event| {
            event.name().map(|n| n.to_string()).unwrap_or_default()
        }),
        "local-name" => func_node_name(name, args, e_ctx, top, |event| {
            event
                .name()
                .map(|n| n.local_name.clone())
                .unwrap_or_default()
        }),
        "namespace-uri" => func_node_name(name, args, e_ctx, top, |event| match event.kind() {
            EventKind::Element | EventKind::Attribute => {
                event.name().map(|n| n.uri().to_string()).unwrap_or_default()
            }
            _ => String::new(),
        }),
        "prefix" => func_node_name(name, args, e_ctx, top, |event| match event.kind() {
            EventKind::Element | EventKind::Attribute => event
                .name()
                .and_then(|n| n.prefix.clone())
                .unwrap_or_default(),
            _ => String::new(),
        }),

        // Boolean
        "not" => Ok(Value::boolean(!args[0].to_boolean())),
        "true" => Ok(Value::boolean(true)),
        "false" => Ok(Value::boolean(false)),
        "boolean" => Ok(Value::boolean(args[0].to_boolean())),

        // Conversion
        "number" => Ok(Value::number(
            string_arg_or_context(args, e_ctx, top)?
                .map_or(f64::NAN, |s| crate::value::parse_number(&s)),
        )),
        "string" => Ok(Value::string(
            string_arg_or_context(args, e_ctx, top)?.unwrap_or_default(),
        )),

        // String
        "concat" => Ok(Value::string(
            args.iter().map(Value::string_value).collect::<String>(),
        )),
        "string-length" => Ok(Value::number(
            string_arg_or_context(args, e_ctx, top)?
                .unwrap_or_default()
                .chars()
                .count() as f64,
        )),
        "normalize-space" => Ok(Value::string(
            string_arg_or_context(args, e_ctx, top)?
                .unwrap_or_default()
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" "),
        )),
        "contains" => func_string_test(args, |s, t| s.contains(t)),
        "starts-with" => func_string_test(args, |s, t| s.starts_with(t)),
        "ends-with" => func_string_test(args, |s, t| s.ends_with(t)),
        "substring" => func_substring(args),
        "substring-before" => func_substring_before(args),
        "substring-after" => func_substring_after(args),
        "translate" => func_translate(args),
        "upper-case" => Ok(Value::string(args[0].string_value().to_uppercase())),
        "lower-case" => Ok(Value::string(args[0].string_value().to_lowercase())),
        "string-join" => func_string_join(args),

        // Sequence & number
        "count" => Ok(Value::number(args[0].len() as f64)),
        "empty" => Ok(Value::boolean(args[0].is_empty())),
        "exists" => Ok(Value::boolean(!args[0].is_empty())),
        "sum" => Ok(Value::number(
            args[0].items().iter().map(Item::to_number).sum(),
        )),
        "min" => Ok(func_extremum(&args[0], f64::min)),
        "max" => Ok(func_extremum(&args[0], f64::max)),
        "avg" => Ok(func_avg(&args[0])),
        "floor" => Ok(map_number(&args[0], f64::floor)),
        "ceiling" => Ok(map_number(&args[0], f64::ceil)),
        "round" => Ok(map_number(&args[0], round_half_up)),
        _ => Err(PathError::UnknownFunction(name.to_string())),
    }
}

// --- Node Functions ---

fn func_node_name(
    function: &str,
    args: Vec<Value>,
    e_ctx: &EvaluationContext<'_>,
    top: usize,
    extract: impl Fn(&EventRef) -> String,
) -> Result<Value, PathError> {
    let event = match args.first() {
        None => e_ctx.node_at(top)?,
        Some(arg) => match arg.first() {
            None => return Ok(Value::string("")),
            Some(Item::Node(node)) => &node.event,
            Some(_) => {
                return Err(PathError::TypeError(format!(
                    "The parameter passed to the `{}' function was not a node",
                    function
                )));
            }
        },
    };
    Ok(Value::string(extract(event)))
}

/// The first argument's string, or the context node's string value without one.
/// `None` means the argument was the empty sequence.
fn string_arg_or_context(
    mut args: Vec<Value>,
    e_ctx: &EvaluationContext<'_>,
    top: usize,
) -> Result<Option<String>, PathError> {
    if args.is_empty() {
        return Ok(Some(e_ctx.node_at(top)?.string_value()));
    }
    let arg = args.remove(0);
    Ok(arg.first().map(Item::string_value))
}

// --- String Functions ---

fn func_string_test(args: Vec<Value>, test: impl Fn(&str, &str) -> bool) -> Result<Value, PathError> {
    let haystack = args[0].string_value();
    let needle = args[1].string_value();
    Ok(Value::boolean(test(&haystack, &needle)))
}

fn func_substring(mut args: Vec<Value>) -> Result<Value, PathError> {
    let length_val = if args.len() == 3 {
        Some(args.remove(2).to_number())
    } else {
        None
    };
    let start_val = args.remove(1).to_number();
    let s = args.remove(0).string_value();

    let first = round_half_up(start_val);
    // NaN bounds exclude every position.
    let last = length_val.map_or(f64::INFINITY, |l| first + round_half_up(l));

    let result = s
        .chars()
        .enumerate()
        .filter_map(|(i, c)| {
            let pos = (i + 1) as f64;
            (pos >= first && pos < last).then_some(c)
        })
        .collect::<String>();
    Ok(Value::string(result))
}

fn func_substring_before(args: Vec<Value>) -> Result<Value, PathError> {
    let s = args[0].string_value();
    let sep = args[1].string_value();
    let result = s.find(&sep).map(|i| &s[..i]).unwrap_or("");
    Ok(Value::string(result))
}

fn func_substring_after(args: Vec<Value>) -> Result<Value, PathError> {
    let s = args[0].string_value();
    let sep = args[1].string_value();
    let result = s.find(&sep).map(|i| &s[i + sep.len()..]).unwrap_or("");
    Ok(Value::string(result))
}

fn func_translate(mut args: Vec<Value>) -> Result<Value, PathError> {
    let to_str: Vec<char> = args.remove(2).string_value().chars().collect();
    let from_str: Vec<char> = args.remove(1).string_value().chars().collect();
    let source_str = args.remove(0).string_value();
    let result = source_str
        .chars()
        .filter_map(|c| match from_str.iter().position(|&fc| fc == c) {
            Some(pos) => to_str.get(pos).copied(),
            None => Some(c),
        })
        .collect::<String>();
    Ok(Value::string(result))
}

fn func_string_join(args: Vec<Value>) -> Result<Value, PathError> {
    let separator = args[1].string_value();
    let joined = args[0]
        .items()
        .iter()
        .map(Item::string_value)
        .collect::<Vec<_>>()
        .join(&separator);
    Ok(Value::string(joined))
}

// --- Number Functions ---

/// `floor(x + 0.5)`, which rounds halves towards positive infinity.
fn round_half_up(n: f64) -> f64 {
    if n.is_nan() || n.is_infinite() {
        n
    } else {
        (n + 0.5).floor()
    }
}

fn map_number(value: &Value, f: impl Fn(f64) -> f64) -> Value {
    if value.is_empty() {
        Value::empty()
    } else {
        Value::number(f(value.to_number()))
    }
}

fn func_extremum(value: &Value, pick: fn(f64, f64) -> f64) -> Value {
    let mut numbers = value.items().iter().map(Item::to_number);
    let Some(first) = numbers.next() else {
        return Value::empty();
    };
    let mut result = first;
    for n in numbers {
        if n.is_nan() || result.is_nan() {
            result = f64::NAN;
        } else {
            result = pick(result, n);
        }
    }
    Value::number(result)
}

fn func_avg(value: &Value) -> Value {
    if value.is_empty() {
        return Value::empty();
    }
    let total: f64 = value.items().iter().map(Item::to_number).sum();
    Value::number(total / value.len() as f64)
}

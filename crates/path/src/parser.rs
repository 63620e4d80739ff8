//! A `nom`-based parser for STXPath expressions, patterns and attribute value templates.

use super::ast::*;
use crate::error::PathError;
use crate::functions::check_arity;
use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take_while},
    character::complete::{char, digit0, digit1, multispace0, satisfy},
    combinator::{map, map_res, not, opt, recognize, verify},
    multi::{many0, separated_list0, separated_list1},
    sequence::{delimited, pair, preceded, terminated},
};
use std::collections::HashMap;

pub const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

// --- Main Public Parsers ---

pub fn parse_expression(input: &str) -> Result<Expression, PathError> {
    parse_expression_with(input, &HashMap::new())
}

/// Parses an expression, binding name-test prefixes through `namespaces`.
pub fn parse_expression_with(
    input: &str,
    namespaces: &HashMap<String, String>,
) -> Result<Expression, PathError> {
    let mut expr = finish(input, expression(input.trim()))?;
    Binder { namespaces }.expression(&mut expr)?;
    Ok(expr)
}

pub fn parse_pattern(input: &str) -> Result<Pattern, PathError> {
    parse_pattern_with(input, &HashMap::new())
}

/// Parses a pattern, binding name-test prefixes through `namespaces`.
pub fn parse_pattern_with(
    input: &str,
    namespaces: &HashMap<String, String>,
) -> Result<Pattern, PathError> {
    let mut parsed = finish(input, pattern(input.trim()))?;
    let binder = Binder { namespaces };
    match &mut parsed {
        Pattern::Path(path) => binder.path_pattern(input, path)?,
        Pattern::Union(paths) => {
            for path in paths {
                binder.path_pattern(input, path)?;
            }
        }
    }
    Ok(parsed)
}

/// Splits `text {expr} text` into static and dynamic parts. `{{` and `}}` are literal braces.
pub fn parse_avt(
    input: &str,
    namespaces: &HashMap<String, String>,
) -> Result<AttributeValueTemplate, PathError> {
    if !input.contains('{') && !input.contains('}') {
        return Ok(AttributeValueTemplate::Static(input.to_string()));
    }

    let mut parts = Vec::new();
    let mut current_static = String::new();
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                current_static.push('{');
            }
            '{' => {
                if !current_static.is_empty() {
                    parts.push(AvtPart::Static(std::mem::take(&mut current_static)));
                }
                let mut expr_str = String::new();
                let mut quote = None;
                let mut closed = false;
                for ec in chars.by_ref() {
                    match (quote, ec) {
                        (None, '}') => {
                            closed = true;
                            break;
                        }
                        (None, '\'' | '"') => quote = Some(ec),
                        (Some(q), _) if q == ec => quote = None,
                        _ => {}
                    }
                    expr_str.push(ec);
                }
                if !closed {
                    return Err(PathError::Parse {
                        input: input.to_string(),
                        message: "Unterminated '{' in attribute value template".to_string(),
                    });
                }
                parts.push(AvtPart::Dynamic(parse_expression_with(&expr_str, namespaces)?));
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                current_static.push('}');
            }
            '}' => {
                return Err(PathError::Parse {
                    input: input.to_string(),
                    message: "Unmatched '}' in attribute value template".to_string(),
                });
            }
            _ => current_static.push(c),
        }
    }

    if !current_static.is_empty() {
        parts.push(AvtPart::Static(current_static));
    }

    if parts.len() == 1
        && let Some(AvtPart::Static(s)) = parts.first()
    {
        Ok(AttributeValueTemplate::Static(s.clone()))
    } else {
        Ok(AttributeValueTemplate::Dynamic(parts))
    }
}

fn finish<T>(input: &str, result: IResult<&str, T>) -> Result<T, PathError> {
    match result {
        Ok(("", parsed)) => Ok(parsed),
        Ok((rem, _)) => Err(PathError::Parse {
            input: input.to_string(),
            message: format!("Parser did not consume all input. Remainder: '{}'", rem),
        }),
        Err(e) => Err(PathError::Parse {
            input: input.to_string(),
            message: e.to_string(),
        }),
    }
}

// --- Combinators & Helpers ---

fn ws<'a, F, O, E>(inner: F) -> impl Parser<&'a str, Output = O, Error = E>
where
    F: Parser<&'a str, Output = O, Error = E>,
    E: nom::error::ParseError<&'a str>,
{
    delimited(multispace0, inner, multispace0)
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-' || c == '.'
}

/// A word operator such as `div` that must not run into a following name.
fn keyword<'a>(
    word: &'static str,
) -> impl Parser<&'a str, Output = &'a str, Error = nom::error::Error<&'a str>> {
    terminated(tag(word), not(satisfy(is_name_char)))
}

fn build_binary_expr_parser<'a, F, G>(
    sub_expr_parser: F,
    op_parser: G,
) -> impl FnMut(&'a str) -> IResult<&'a str, Expression>
where
    F: Parser<&'a str, Output = Expression, Error = nom::error::Error<&'a str>> + Clone,
    G: Parser<&'a str, Output = BinaryOperator, Error = nom::error::Error<&'a str>> + Clone,
{
    move |input: &str| {
        let (input, mut left) = sub_expr_parser.clone().parse(input)?;
        let (input, remainder) =
            many0(pair(ws(op_parser.clone()), sub_expr_parser.clone())).parse(input)?;

        for (op, right) in remainder {
            left = Expression::BinaryOp {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }
        Ok((input, left))
    }
}

// --- Expression Parsers (in order of precedence) ---

fn expression(input: &str) -> IResult<&str, Expression> {
    or_expr(input)
}

fn or_op(input: &str) -> IResult<&str, BinaryOperator> {
    map(keyword("or"), |_| BinaryOperator::Or).parse(input)
}

fn and_op(input: &str) -> IResult<&str, BinaryOperator> {
    map(keyword("and"), |_| BinaryOperator::And).parse(input)
}

fn equality_op(input: &str) -> IResult<&str, BinaryOperator> {
    alt((
        map(tag("="), |_| BinaryOperator::Equals),
        map(tag("!="), |_| BinaryOperator::NotEquals),
    ))
    .parse(input)
}

fn relational_op(input: &str) -> IResult<&str, BinaryOperator> {
    alt((
        map(tag("<="), |_| BinaryOperator::LessThanOrEqual),
        map(tag(">="), |_| BinaryOperator::GreaterThanOrEqual),
        map(tag("<"), |_| BinaryOperator::LessThan),
        map(tag(">"), |_| BinaryOperator::GreaterThan),
    ))
    .parse(input)
}

fn additive_op(input: &str) -> IResult<&str, BinaryOperator> {
    alt((
        map(char('+'), |_| BinaryOperator::Plus),
        map(char('-'), |_| BinaryOperator::Minus),
    ))
    .parse(input)
}

fn multiplicative_op(input: &str) -> IResult<&str, BinaryOperator> {
    alt((
        map(char('*'), |_| BinaryOperator::Multiply),
        map(keyword("div"), |_| BinaryOperator::Divide),
        map(keyword("mod"), |_| BinaryOperator::Modulo),
    ))
    .parse(input)
}

fn or_expr(input: &str) -> IResult<&str, Expression> {
    build_binary_expr_parser(and_expr, or_op)(input)
}

fn and_expr(input: &str) -> IResult<&str, Expression> {
    build_binary_expr_parser(equality_expr, and_op)(input)
}

fn equality_expr(input: &str) -> IResult<&str, Expression> {
    build_binary_expr_parser(relational_expr, equality_op)(input)
}

fn relational_expr(input: &str) -> IResult<&str, Expression> {
    build_binary_expr_parser(additive_expr, relational_op)(input)
}

fn additive_expr(input: &str) -> IResult<&str, Expression> {
    build_binary_expr_parser(multiplicative_expr, additive_op)(input)
}

fn multiplicative_expr(input: &str) -> IResult<&str, Expression> {
    build_binary_expr_parser(unary_expr, multiplicative_op)(input)
}

fn unary_expr(input: &str) -> IResult<&str, Expression> {
    alt((
        map(preceded(ws(char('-')), unary_expr), |expr| Expression::UnaryOp {
            op: UnaryOperator::Minus,
            expr: Box::new(expr),
        }),
        primary_expr,
    ))
    .parse(input)
}

fn primary_expr(input: &str) -> IResult<&str, Expression> {
    ws(alt((
        conditional_expr,
        number_literal,
        map(string_literal, |s| Expression::Literal(s.to_string())),
        map(preceded(char('$'), qname_string), |name| {
            Expression::Variable(name.to_string())
        }),
        parenthesized_expr,
        function_call,
        map(location_path, Expression::LocationPath),
    )))
    .parse(input)
}

fn conditional_expr(input: &str) -> IResult<&str, Expression> {
    map(
        (
            keyword("if"),
            ws(char('(')),
            expression,
            ws(char(')')),
            ws(keyword("then")),
            expression,
            ws(keyword("else")),
            expression,
        ),
        |(_, _, condition, _, _, then_branch, _, else_branch)| Expression::Conditional {
            condition: Box::new(condition),
            then_branch: Box::new(then_branch),
            else_branch: Box::new(else_branch),
        },
    )
    .parse(input)
}

fn number_literal(input: &str) -> IResult<&str, Expression> {
    map_res(
        recognize(alt((
            recognize(pair(digit1, opt(pair(char('.'), digit0)))),
            recognize(pair(char('.'), digit1)),
        ))),
        |s: &str| s.parse::<f64>().map(Expression::Number),
    )
    .parse(input)
}

fn string_literal(input: &str) -> IResult<&str, &str> {
    alt((
        delimited(char('"'), take_while(|c| c != '"'), char('"')),
        delimited(char('\''), take_while(|c| c != '\''), char('\'')),
    ))
    .parse(input)
}

/// `(a, b)` builds a sequence; `(a)` is plain grouping.
fn parenthesized_expr(input: &str) -> IResult<&str, Expression> {
    map(
        delimited(
            ws(char('(')),
            separated_list0(ws(char(',')), expression),
            ws(char(')')),
        ),
        |mut items| {
            if items.len() == 1
                && let Some(only) = items.pop()
            {
                only
            } else {
                Expression::Sequence(items)
            }
        },
    )
    .parse(input)
}

fn function_call(input: &str) -> IResult<&str, Expression> {
    let (input, name) = verify(qname_string, |name: &str| {
        !matches!(
            name,
            "node" | "text" | "comment" | "processing-instruction" | "if"
        )
    })
    .parse(input)?;
    let (input, args) = delimited(
        ws(char('(')),
        separated_list0(ws(char(',')), expression),
        ws(char(')')),
    )
    .parse(input)?;
    Ok((
        input,
        Expression::FunctionCall {
            name: name.to_string(),
            args,
        },
    ))
}

// --- Names & Node Tests ---

fn ncname(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        satisfy(|c: char| c.is_alphabetic() || c == '_'),
        take_while(is_name_char),
    ))
    .parse(input)
}

fn qname_string(input: &str) -> IResult<&str, &str> {
    recognize(pair(ncname, opt(pair(char(':'), ncname)))).parse(input)
}

fn qname(input: &str) -> IResult<&str, (Option<&str>, &str)> {
    let (rest, first) = ncname(input)?;
    match preceded(char(':'), ncname).parse(rest) {
        Ok((rest, local)) => Ok((rest, (Some(first), local))),
        Err(_) => Ok((rest, (None, first))),
    }
}

fn kind_test<'a>(
    name: &'static str,
) -> impl Parser<&'a str, Output = (), Error = nom::error::Error<&'a str>> {
    map((tag(name), ws(char('(')), char(')')), |_| ())
}

fn processing_instruction_test(input: &str) -> IResult<&str, NodeTest> {
    map(
        preceded(
            pair(tag("processing-instruction"), ws(char('('))),
            terminated(opt(ws(string_literal)), char(')')),
        ),
        |target| NodeTest::ProcessingInstruction(target.map(str::to_string)),
    )
    .parse(input)
}

fn node_test(input: &str) -> IResult<&str, NodeTest> {
    alt((
        map(kind_test("node"), |_| NodeTest::Node),
        map(kind_test("text"), |_| NodeTest::Text),
        map(kind_test("comment"), |_| NodeTest::Comment),
        processing_instruction_test,
        map(preceded(tag("*:"), ncname), |local| {
            NodeTest::LocalName(local.to_string())
        }),
        map(terminated(ncname, tag(":*")), |prefix| NodeTest::Namespace {
            prefix: prefix.to_string(),
            uri: String::new(),
        }),
        map(char('*'), |_| NodeTest::Wildcard),
        map(qname, |(prefix, local)| NodeTest::Name {
            prefix: prefix.map(str::to_string),
            local: local.to_string(),
            uri: String::new(),
        }),
    ))
    .parse(input)
}

fn predicate(input: &str) -> IResult<&str, Expression> {
    delimited(ws(char('[')), expression, ws(char(']'))).parse(input)
}

// --- Location Paths ---

fn axis_specifier(input: &str) -> IResult<&str, Axis> {
    terminated(
        alt((
            map(tag("child"), |_| Axis::Child),
            map(tag("descendant"), |_| Axis::Descendant),
            map(tag("attribute"), |_| Axis::Attribute),
            map(tag("parent"), |_| Axis::Parent),
            map(tag("self"), |_| Axis::SelfAxis),
        )),
        tag("::"),
    )
    .parse(input)
}

fn step(input: &str) -> IResult<&str, Step> {
    alt((
        map(tag(".."), |_| Step {
            axis: Axis::Parent,
            node_test: NodeTest::Node,
            predicates: vec![],
        }),
        map(char('.'), |_| Step {
            axis: Axis::SelfAxis,
            node_test: NodeTest::Node,
            predicates: vec![],
        }),
        map(
            (axis_specifier, node_test, many0(predicate)),
            |(axis, node_test, predicates)| Step {
                axis,
                node_test,
                predicates,
            },
        ),
        map(
            pair(preceded(char('@'), node_test), many0(predicate)),
            |(node_test, predicates)| Step {
                axis: Axis::Attribute,
                node_test,
                predicates,
            },
        ),
        map(pair(node_test, many0(predicate)), |(node_test, predicates)| Step {
            axis: Axis::Child,
            node_test,
            predicates,
        }),
    ))
    .parse(input)
}

fn path_separator(input: &str) -> IResult<&str, bool> {
    ws(alt((map(tag("//"), |_| true), map(tag("/"), |_| false)))).parse(input)
}

/// `//` turns a child step into a descendant step; other steps get an
/// explicit descendant step in front of them.
fn push_step(steps: &mut Vec<Step>, descendant: bool, mut next: Step) {
    if descendant {
        if next.axis == Axis::Child {
            next.axis = Axis::Descendant;
        } else {
            steps.push(Step {
                axis: Axis::Descendant,
                node_test: NodeTest::Node,
                predicates: vec![],
            });
        }
    }
    steps.push(next);
}

fn relative_path(input: &str) -> IResult<&str, Vec<Step>> {
    let (input, first) = step(input)?;
    let (input, rest) = many0(pair(path_separator, step)).parse(input)?;
    let mut steps = vec![first];
    for (descendant, next) in rest {
        push_step(&mut steps, descendant, next);
    }
    Ok((input, steps))
}

fn location_path(input: &str) -> IResult<&str, LocationPath> {
    alt((
        map(preceded(tag("//"), relative_path), |steps| {
            let mut descended = Vec::with_capacity(steps.len() + 1);
            let mut iter = steps.into_iter();
            if let Some(first) = iter.next() {
                push_step(&mut descended, true, first);
            }
            descended.extend(iter);
            LocationPath {
                is_absolute: true,
                steps: descended,
            }
        }),
        map(preceded(char('/'), opt(relative_path)), |steps| LocationPath {
            is_absolute: true,
            steps: steps.unwrap_or_default(),
        }),
        map(relative_path, |steps| LocationPath {
            is_absolute: false,
            steps,
        }),
    ))
    .parse(input)
}

// --- Patterns ---

fn pattern(input: &str) -> IResult<&str, Pattern> {
    map(
        separated_list1(ws(char('|')), ws(path_pattern)),
        |mut paths| {
            if paths.len() == 1
                && let Some(only) = paths.pop()
            {
                Pattern::Path(only)
            } else {
                Pattern::Union(paths)
            }
        },
    )
    .parse(input)
}

fn pattern_step(input: &str) -> IResult<&str, PatternStep> {
    map(
        (opt(char('@')), node_test, many0(predicate)),
        |(at, node_test, predicates)| PatternStep {
            node_test,
            is_attribute: at.is_some(),
            descendant_gap: false,
            predicates,
        },
    )
    .parse(input)
}

fn relative_pattern(input: &str) -> IResult<&str, Vec<PatternStep>> {
    let (input, first) = pattern_step(input)?;
    let (input, rest) = many0(pair(path_separator, pattern_step)).parse(input)?;
    let mut steps = vec![first];
    for (descendant_gap, mut next) in rest {
        next.descendant_gap = descendant_gap;
        steps.push(next);
    }
    Ok((input, steps))
}

fn path_pattern(input: &str) -> IResult<&str, PathPattern> {
    alt((
        map(preceded(tag("//"), relative_pattern), |mut steps| {
            if let Some(first) = steps.first_mut() {
                first.descendant_gap = true;
            }
            PathPattern {
                is_absolute: true,
                steps,
            }
        }),
        map(preceded(char('/'), opt(relative_pattern)), |steps| PathPattern {
            is_absolute: true,
            steps: steps.unwrap_or_default(),
        }),
        map(relative_pattern, |steps| PathPattern {
            is_absolute: false,
            steps,
        }),
    ))
    .parse(input)
}

// --- Post-parse binding ---

/// Resolves prefixes to namespace URIs and checks function arity.
struct Binder<'n> {
    namespaces: &'n HashMap<String, String>,
}

impl Binder<'_> {
    fn resolve(&self, prefix: &str) -> Result<String, PathError> {
        if prefix == "xml" {
            return Ok(XML_NAMESPACE.to_string());
        }
        self.namespaces
            .get(prefix)
            .cloned()
            .ok_or_else(|| PathError::UnknownPrefix(prefix.to_string()))
    }

    fn node_test(&self, test: &mut NodeTest) -> Result<(), PathError> {
        match test {
            NodeTest::Name {
                prefix: Some(prefix),
                uri,
                ..
            } => *uri = self.resolve(prefix)?,
            NodeTest::Namespace { prefix, uri } => *uri = self.resolve(prefix)?,
            _ => {}
        }
        Ok(())
    }

    fn expressions(&self, exprs: &mut [Expression]) -> Result<(), PathError> {
        exprs.iter_mut().try_for_each(|e| self.expression(e))
    }

    fn expression(&self, expr: &mut Expression) -> Result<(), PathError> {
        match expr {
            Expression::Literal(_) | Expression::Number(_) | Expression::Variable(_) => Ok(()),
            Expression::Sequence(items) => self.expressions(items),
            Expression::LocationPath(path) => {
                for step in &mut path.steps {
                    self.node_test(&mut step.node_test)?;
                    self.expressions(&mut step.predicates)?;
                }
                Ok(())
            }
            Expression::FunctionCall { name, args } => {
                check_arity(name, args.len())?;
                self.expressions(args)
            }
            Expression::BinaryOp { left, right, .. } => {
                self.expression(left)?;
                self.expression(right)
            }
            Expression::UnaryOp { expr, .. } => self.expression(expr),
            Expression::Conditional {
                condition,
                then_branch,
                else_branch,
            } => {
                self.expression(condition)?;
                self.expression(then_branch)?;
                self.expression(else_branch)
            }
        }
    }

    fn path_pattern(&self, input: &str, path: &mut PathPattern) -> Result<(), PathError> {
        let last = path.steps.len().saturating_sub(1);
        for (i, step) in path.steps.iter_mut().enumerate() {
            if step.is_attribute && i != last {
                return Err(PathError::Parse {
                    input: input.to_string(),
                    message: "An attribute step must be the last step of a pattern".to_string(),
                });
            }
            self.node_test(&mut step.node_test)?;
            self.expressions(&mut step.predicates)?;
        }
        Ok(())
    }
}

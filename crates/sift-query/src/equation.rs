//! Equation grammar: arithmetic over aggregate function calls.
//!
//! ```text
//! equation := "equation|" expr
//! expr     := term (("+" | "-") term)*
//! term     := factor (("*" | "/") factor)*
//! factor   := number | call | field | "(" expr ")"
//! call     := ident "(" [arg ("," arg)*] ")"
//! ```
//!
//! Bare `field` references are accepted by the grammar so that they can be
//! reported precisely; a well-formed equation has none of them.

use nom::{
    branch::alt,
    bytes::complete::{take_while, take_while1},
    character::complete::{char, multispace0, one_of},
    combinator::{all_consuming, map, opt, recognize},
    multi::{fold_many0, separated_list0},
    number::complete::double,
    sequence::{delimited, pair, preceded},
    IResult,
};

use crate::QueryError;

pub const EQUATION_PREFIX: &str = "equation|";

#[derive(Debug, Clone, PartialEq)]
pub struct AggregateCall {
    pub function: String,
    pub args: Vec<String>,
}

impl AggregateCall {
    /// Renders as `function(arg1,arg2)`.
    pub fn render(&self) -> String {
        format!("{}({})", self.function, self.args.join(","))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Aggregate(AggregateCall),
    Field(String),
    Binary {
        op: char,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

/// A parsed equation body (without the `equation|` prefix).
#[derive(Debug, Clone, PartialEq)]
pub struct Equation {
    pub expr: Expr,
}

impl Equation {
    pub fn aggregates(&self) -> Vec<&AggregateCall> {
        fn walk<'a>(e: &'a Expr, out: &mut Vec<&'a AggregateCall>) {
            match e {
                Expr::Aggregate(call) => out.push(call),
                Expr::Binary { lhs, rhs, .. } => {
                    walk(lhs, out);
                    walk(rhs, out);
                }
                Expr::Number(_) | Expr::Field(_) => {}
            }
        }
        let mut out = Vec::new();
        walk(&self.expr, &mut out);
        out
    }

    pub fn bare_fields(&self) -> Vec<&str> {
        fn walk<'a>(e: &'a Expr, out: &mut Vec<&'a str>) {
            match e {
                Expr::Field(name) => out.push(name),
                Expr::Binary { lhs, rhs, .. } => {
                    walk(lhs, out);
                    walk(rhs, out);
                }
                Expr::Number(_) | Expr::Aggregate(_) => {}
            }
        }
        let mut out = Vec::new();
        walk(&self.expr, &mut out);
        out
    }

    pub fn is_arithmetic(&self) -> bool {
        matches!(self.expr, Expr::Binary { .. })
    }

    /// Arithmetic over aggregates only: the shape a bare (unprefixed) column
    /// must have before it is promoted to an equation.
    pub fn is_promotable(&self) -> bool {
        self.is_arithmetic() && self.bare_fields().is_empty() && !self.aggregates().is_empty()
    }
}

pub fn strip_equation_prefix(s: &str) -> Option<&str> {
    s.strip_prefix(EQUATION_PREFIX)
}

/// Parse an equation body. The `equation|` prefix must already be removed.
pub fn parse_equation(body: &str) -> Result<Equation, QueryError> {
    let invalid = |reason: String| QueryError::InvalidEquation {
        input: body.to_string(),
        reason,
    };
    if body.trim().is_empty() {
        return Err(invalid("empty equation".to_string()));
    }
    match all_consuming(expr)(body) {
        Ok((_, expr)) => {
            let equation = Equation { expr };
            if equation.aggregates().is_empty() && equation.bare_fields().is_empty() {
                return Err(invalid(
                    "equation must reference at least one aggregate function".to_string(),
                ));
            }
            Ok(equation)
        }
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
            let at: String = e.input.chars().take(24).collect();
            Err(invalid(format!("unexpected input at `{at}`")))
        }
        Err(nom::Err::Incomplete(_)) => Err(invalid("incomplete expression".to_string())),
    }
}

/// Parse a whole string as a single aggregate call, e.g. `p95(span.duration)`.
pub fn parse_aggregate_call(s: &str) -> Option<AggregateCall> {
    match all_consuming(delimited(multispace0, call, multispace0))(s) {
        Ok((_, call)) => Some(call),
        Err(_) => None,
    }
}

/// True when `s` is an aggregate call or an equation column.
pub fn is_aggregate_like(s: &str) -> bool {
    strip_equation_prefix(s).is_some() || parse_aggregate_call(s).is_some()
}

fn ws<'a, O, F>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    delimited(multispace0, inner, multispace0)
}

fn identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(|c: char| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '[' | ']')),
    ))(input)
}

fn call_arg(input: &str) -> IResult<&str, &str> {
    map(
        take_while1(|c: char| c != ',' && c != '(' && c != ')'),
        str::trim,
    )(input)
}

fn call_args(input: &str) -> IResult<&str, Vec<&str>> {
    delimited(
        pair(char('('), multispace0),
        separated_list0(char(','), call_arg),
        pair(multispace0, char(')')),
    )(input)
}

fn call(input: &str) -> IResult<&str, AggregateCall> {
    let (rest, function) = identifier(input)?;
    let (rest, args) = preceded(multispace0, call_args)(rest)?;
    Ok((
        rest,
        AggregateCall {
            function: function.to_string(),
            args: args.into_iter().map(String::from).collect(),
        },
    ))
}

fn call_or_field(input: &str) -> IResult<&str, Expr> {
    let (rest, name) = identifier(input)?;
    let (rest, args) = opt(preceded(multispace0, call_args))(rest)?;
    let expr = match args {
        Some(args) => Expr::Aggregate(AggregateCall {
            function: name.to_string(),
            args: args.into_iter().map(String::from).collect(),
        }),
        None => Expr::Field(name.to_string()),
    };
    Ok((rest, expr))
}

fn factor(input: &str) -> IResult<&str, Expr> {
    ws(alt((
        delimited(char('('), expr, char(')')),
        call_or_field,
        map(double, Expr::Number),
    )))(input)
}

fn term(input: &str) -> IResult<&str, Expr> {
    let (input, first) = factor(input)?;
    fold_many0(
        pair(ws(one_of("*/")), factor),
        move || first.clone(),
        |lhs, (op, rhs)| Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        },
    )(input)
}

fn expr(input: &str) -> IResult<&str, Expr> {
    let (input, first) = term(input)?;
    fold_many0(
        pair(ws(one_of("+-")), term),
        move || first.clone(),
        |lhs, (op, rhs)| Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        },
    )(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sum_of_aggregates() {
        let eq = parse_equation("sum(gen_ai.usage.input_tokens) + sum(gen_ai.usage.output_tokens)")
            .unwrap();
        assert!(eq.is_promotable());
        let aggs: Vec<String> = eq.aggregates().iter().map(|a| a.render()).collect();
        assert_eq!(
            aggs,
            vec![
                "sum(gen_ai.usage.input_tokens)",
                "sum(gen_ai.usage.output_tokens)"
            ]
        );
    }

    #[test]
    fn respects_precedence_and_parentheses() {
        let eq = parse_equation("(count() - count_if(span.status,equals,ok)) / count() * 100").unwrap();
        match &eq.expr {
            Expr::Binary { op, .. } => assert_eq!(*op, '*'),
            other => panic!("unexpected root: {other:?}"),
        }
        assert_eq!(eq.aggregates().len(), 3);
        assert_eq!(eq.aggregates()[1].args, vec!["span.status", "equals", "ok"]);
    }

    #[test]
    fn reports_bare_fields() {
        let eq = parse_equation("sum(span.duration) / span.self_time").unwrap();
        assert_eq!(eq.bare_fields(), vec!["span.self_time"]);
        assert!(!eq.is_promotable());
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            parse_equation("sum(a) +"),
            Err(QueryError::InvalidEquation { .. })
        ));
        assert!(parse_equation("").is_err());
        assert!(parse_equation("1 + 2").is_err());
    }

    #[test]
    fn single_calls_parse() {
        let call = parse_aggregate_call("p95(span.duration)").unwrap();
        assert_eq!(call.function, "p95");
        assert_eq!(call.args, vec!["span.duration"]);
        assert_eq!(parse_aggregate_call("count()").unwrap().args.len(), 0);
        assert!(parse_aggregate_call("timestamp").is_none());
        assert!(parse_aggregate_call("count() + 1").is_none());
        assert!(is_aggregate_like("equation|count() * 2"));
    }
}

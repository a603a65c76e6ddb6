//! Trigger expressions for functions.
//!
//! A small, pure boolean language evaluated against the request
//! [`Environment`]:
//! - Literals: `'text'`, `"text"`, `42`, `1.5`, `true`, `false`, `[a, b]`
//! - Variables: `acl`, `category`, `index`, `filter`, `query`, `now`
//! - Comparisons: `==`, `!=`, `<`, `<=`, `>`, `>=`
//! - Membership and text: `in`, `contains`, `startsWith`, `endsWith`, `matches`
//! - Logical: `&&`/`AND`, `||`/`OR`, `!`/`NOT`, parentheses
//!
//! `now` is the unix time in seconds.

use nom::{
    branch::alt,
    bytes::complete::{is_not, tag, tag_no_case, take_while1},
    character::complete::{char, multispace0},
    combinator::{cut, map, opt, recognize},
    multi::{many0, separated_list0},
    number::complete::double,
    sequence::{delimited, pair, preceded},
    IResult,
};
use regex::Regex;
use serde::Serialize;

use crate::error::{GatewayError, Result};

/// Values a trigger expression can see.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct Environment {
    pub acl: String,
    pub category: String,
    pub index: Vec<String>,
    pub filter: Vec<String>,
    pub query: String,
    pub now: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Str(String),
    Num(f64),
    Bool(bool),
    List(Vec<Literal>),
}

impl Literal {
    fn type_name(&self) -> &'static str {
        match self {
            Literal::Str(_) => "string",
            Literal::Num(_) => "number",
            Literal::Bool(_) => "bool",
            Literal::List(_) => "list",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    Contains,
    StartsWith,
    EndsWith,
    Matches,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Lit(Literal),
    Var(String),
    List(Vec<Expr>),
    Not(Box<Expr>),
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Cmp(CmpOp, Box<Expr>, Box<Expr>),
}

const VARIABLES: &[&str] = &["acl", "category", "index", "filter", "query", "now"];

/// Parse a trigger expression.
pub fn parse_expression(input: &str) -> Result<Expr> {
    match or_expr(input.trim()) {
        Ok(("", e)) => Ok(e),
        Ok((rest, _)) => Err(GatewayError::Validation(format!(
            "unexpected input after expression: '{}'",
            rest
        ))),
        Err(e) => Err(GatewayError::Validation(format!(
            "invalid trigger expression: {}",
            e
        ))),
    }
}

fn or_expr(input: &str) -> IResult<&str, Expr> {
    let (input, first) = and_expr(input)?;
    let (input, rest) = many0(preceded(
        delimited(multispace0, alt((tag("||"), keyword("OR"))), multispace0),
        cut(and_expr),
    ))(input)?;
    Ok((input, fold(first, rest, Expr::Or)))
}

fn and_expr(input: &str) -> IResult<&str, Expr> {
    let (input, first) = unary(input)?;
    let (input, rest) = many0(preceded(
        delimited(multispace0, alt((tag("&&"), keyword("AND"))), multispace0),
        cut(unary),
    ))(input)?;
    Ok((input, fold(first, rest, Expr::And)))
}

fn fold(first: Expr, rest: Vec<Expr>, wrap: fn(Vec<Expr>) -> Expr) -> Expr {
    if rest.is_empty() {
        first
    } else {
        let mut all = vec![first];
        all.extend(rest);
        wrap(all)
    }
}

fn keyword<'a>(kw: &'static str) -> impl Fn(&'a str) -> IResult<&'a str, &'a str> {
    move |input: &'a str| {
        let (remaining, matched) = tag_no_case(kw)(input)?;
        if remaining
            .chars()
            .next()
            .is_some_and(|c| c.is_alphanumeric() || c == '_')
        {
            return Err(nom::Err::Error(nom::error::Error::new(
                input,
                nom::error::ErrorKind::Tag,
            )));
        }
        Ok((remaining, matched))
    }
}

fn unary(input: &str) -> IResult<&str, Expr> {
    let (input, _) = multispace0(input)?;
    let negated: IResult<&str, &str> = alt((bang, keyword("NOT")))(input);
    if let Ok((rest, _)) = negated {
        let (rest, inner) = cut(unary)(rest)?;
        return Ok((rest, Expr::Not(Box::new(inner))));
    }
    comparison(input)
}

/// `!` that is not the start of `!=`.
fn bang(input: &str) -> IResult<&str, &str> {
    let (rest, matched) = tag("!")(input)?;
    if rest.starts_with('=') {
        return Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Tag,
        )));
    }
    Ok((rest, matched))
}

fn comparison(input: &str) -> IResult<&str, Expr> {
    let (input, lhs) = operand(input)?;
    let (input, rest) = opt(pair(
        delimited(multispace0, cmp_op, multispace0),
        cut(operand),
    ))(input)?;
    Ok((
        input,
        match rest {
            Some((op, rhs)) => Expr::Cmp(op, Box::new(lhs), Box::new(rhs)),
            None => lhs,
        },
    ))
}

fn cmp_op(input: &str) -> IResult<&str, CmpOp> {
    alt((
        map(tag("=="), |_| CmpOp::Eq),
        map(tag("!="), |_| CmpOp::Ne),
        map(tag("<="), |_| CmpOp::Le),
        map(tag(">="), |_| CmpOp::Ge),
        map(tag("<"), |_| CmpOp::Lt),
        map(tag(">"), |_| CmpOp::Gt),
        map(keyword("in"), |_| CmpOp::In),
        map(keyword("contains"), |_| CmpOp::Contains),
        map(keyword("startsWith"), |_| CmpOp::StartsWith),
        map(keyword("endsWith"), |_| CmpOp::EndsWith),
        map(keyword("matches"), |_| CmpOp::Matches),
    ))(input)
}

fn operand(input: &str) -> IResult<&str, Expr> {
    delimited(
        multispace0,
        alt((
            delimited(char('('), delimited(multispace0, or_expr, multispace0), char(')')),
            list,
            map(string_literal, |s| Expr::Lit(Literal::Str(s))),
            map(keyword("true"), |_| Expr::Lit(Literal::Bool(true))),
            map(keyword("false"), |_| Expr::Lit(Literal::Bool(false))),
            map(double, |n| Expr::Lit(Literal::Num(n))),
            map(identifier, |s: &str| Expr::Var(s.to_string())),
        )),
        multispace0,
    )(input)
}

fn list(input: &str) -> IResult<&str, Expr> {
    map(
        delimited(
            char('['),
            separated_list0(char(','), delimited(multispace0, operand, multispace0)),
            char(']'),
        ),
        Expr::List,
    )(input)
}

fn string_literal(input: &str) -> IResult<&str, String> {
    alt((
        map(
            delimited(char('\''), opt(is_not("'")), char('\'')),
            |s: Option<&str>| s.unwrap_or_default().to_string(),
        ),
        map(
            delimited(char('"'), opt(is_not("\"")), char('"')),
            |s: Option<&str>| s.unwrap_or_default().to_string(),
        ),
    ))(input)
}

fn identifier(input: &str) -> IResult<&str, &str> {
    recognize(take_while1(|c: char| c.is_alphanumeric() || c == '_'))(input)
}

impl Expr {
    /// Variables referenced by the expression that the environment lacks.
    pub fn unknown_variables(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.walk(&mut |e| {
            if let Expr::Var(name) = e {
                if !VARIABLES.contains(&name.as_str()) && !out.contains(name) {
                    out.push(name.clone());
                }
            }
        });
        out
    }

    fn walk(&self, f: &mut dyn FnMut(&Expr)) {
        f(self);
        match self {
            Expr::List(items) | Expr::And(items) | Expr::Or(items) => {
                items.iter().for_each(|i| i.walk(f))
            }
            Expr::Not(inner) => inner.walk(f),
            Expr::Cmp(_, l, r) => {
                l.walk(f);
                r.walk(f);
            }
            Expr::Lit(_) | Expr::Var(_) => {}
        }
    }

    /// Evaluate to a boolean. Type errors are evaluation errors.
    pub fn evaluate(&self, env: &Environment) -> Result<bool> {
        match self.value(env)? {
            Literal::Bool(b) => Ok(b),
            other => Err(eval_error(format!(
                "expression evaluates to a {}, not a bool",
                other.type_name()
            ))),
        }
    }

    fn value(&self, env: &Environment) -> Result<Literal> {
        Ok(match self {
            Expr::Lit(l) => l.clone(),
            Expr::Var(name) => variable(env, name)?,
            Expr::List(items) => Literal::List(
                items
                    .iter()
                    .map(|i| i.value(env))
                    .collect::<Result<Vec<_>>>()?,
            ),
            Expr::Not(inner) => Literal::Bool(!inner.evaluate(env)?),
            Expr::And(items) => {
                for item in items {
                    if !item.evaluate(env)? {
                        return Ok(Literal::Bool(false));
                    }
                }
                Literal::Bool(true)
            }
            Expr::Or(items) => {
                for item in items {
                    if item.evaluate(env)? {
                        return Ok(Literal::Bool(true));
                    }
                }
                Literal::Bool(false)
            }
            Expr::Cmp(op, l, r) => Literal::Bool(compare(*op, &l.value(env)?, &r.value(env)?)?),
        })
    }
}

fn eval_error(msg: String) -> GatewayError {
    GatewayError::Internal(format!("failed to evaluate trigger expression: {}", msg))
}

fn variable(env: &Environment, name: &str) -> Result<Literal> {
    let strings = |v: &[String]| Literal::List(v.iter().cloned().map(Literal::Str).collect());
    Ok(match name {
        "acl" => Literal::Str(env.acl.clone()),
        "category" => Literal::Str(env.category.clone()),
        "index" => strings(&env.index),
        "filter" => strings(&env.filter),
        "query" => Literal::Str(env.query.clone()),
        "now" => Literal::Num(env.now as f64),
        other => return Err(eval_error(format!("unknown variable '{}'", other))),
    })
}

fn compare(op: CmpOp, l: &Literal, r: &Literal) -> Result<bool> {
    use Literal::*;
    let mismatch = || {
        eval_error(format!(
            "cannot compare {} with {}",
            l.type_name(),
            r.type_name()
        ))
    };
    Ok(match op {
        CmpOp::Eq => l == r,
        CmpOp::Ne => l != r,
        CmpOp::Lt | CmpOp::Le | CmpOp::Gt | CmpOp::Ge => {
            let ord = match (l, r) {
                (Num(a), Num(b)) => a.partial_cmp(b),
                (Str(a), Str(b)) => Some(a.cmp(b)),
                _ => return Err(mismatch()),
            }
            .ok_or_else(mismatch)?;
            match op {
                CmpOp::Lt => ord.is_lt(),
                CmpOp::Le => ord.is_le(),
                CmpOp::Gt => ord.is_gt(),
                _ => ord.is_ge(),
            }
        }
        CmpOp::In => return compare(CmpOp::Contains, r, l),
        CmpOp::Contains => match (l, r) {
            (List(items), needle) => items.contains(needle),
            (Str(hay), Str(needle)) => hay.contains(needle.as_str()),
            _ => return Err(mismatch()),
        },
        CmpOp::StartsWith | CmpOp::EndsWith => {
            let test = |s: &str, p: &str| {
                if op == CmpOp::StartsWith {
                    s.starts_with(p)
                } else {
                    s.ends_with(p)
                }
            };
            match (l, r) {
                (Str(s), Str(p)) => test(s.as_str(), p.as_str()),
                (List(items), Str(p)) => items
                    .iter()
                    .any(|i| matches!(i, Str(s) if test(s.as_str(), p.as_str()))),
                _ => return Err(mismatch()),
            }
        }
        CmpOp::Matches => {
            let Str(pattern) = r else {
                return Err(mismatch());
            };
            let re = Regex::new(pattern).map_err(|e| eval_error(e.to_string()))?;
            match l {
                Str(s) => re.is_match(s),
                List(items) => items.iter().any(|i| matches!(i, Str(s) if re.is_match(s))),
                _ => return Err(mismatch()),
            }
        }
    })
}

#![allow(clippy::empty_docs)]
#[derive(Parser)]
#[grammar = "parser/definition.pest"] // relative to src
pub struct DefinitionParser;

use std::collections::BTreeMap;

use pest::error::InputLocation;
use pest::iterators::Pair;
use pest::Parser;

use crate::ast::{self, Expr, Symbol};
use crate::error::ParseError;
use crate::index::Selector;

fn error_at(text: &str, pair: &Pair<Rule>, message: impl Into<String>) -> ParseError {
    ParseError::new(text, pair.as_span().start(), message)
}

//cmp_op     = @{ "<=" | ">=" | "==" | "<" | ">" }
//sum_op     = @{ "+" | "-" }
//product_op = @{ ("*" ~ !"*") | "/" }
fn parse_symbol(text: &str, pair: &Pair<Rule>) -> Result<Symbol, ParseError> {
    pair.as_str()
        .parse()
        .map_err(|_| error_at(text, pair, format!("unknown operator '{}'", pair.as_str())))
}

//signed_int = @{ "-"? ~ ASCII_DIGIT+ }
fn parse_signed(text: &str, pair: &Pair<Rule>) -> Result<isize, ParseError> {
    pair.as_str()
        .parse()
        .map_err(|_| error_at(text, pair, format!("index '{}' is out of range", pair.as_str())))
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// Fold `first (op next)*` left-associatively.
fn parse_chain(text: &str, pair: Pair<'_, Rule>) -> Result<Expr, ParseError> {
    let mut inner = pair.into_inner();
    let mut head = match inner.next() {
        Some(first) => parse_value(text, first)?,
        None => return Err(ParseError::new(text, 0, "empty expression")),
    };
    while let Some(op) = inner.next() {
        let symbol = parse_symbol(text, &op)?;
        let rhs = match inner.next() {
            Some(rhs) => parse_value(text, rhs)?,
            None => return Err(error_at(text, &op, "missing right operand")),
        };
        head = Expr::operator(symbol, vec![head, rhs]);
    }
    Ok(head)
}

fn parse_value(text: &str, pair: Pair<'_, Rule>) -> Result<Expr, ParseError> {
    match pair.as_rule() {
        // expression = { sum ~ (cmp_op ~ sum)* }
        // sum        = { product ~ (sum_op ~ product)* }
        // product    = { unary ~ (product_op ~ unary)* }
        Rule::expression | Rule::sum | Rule::product => parse_chain(text, pair),

        // unary      = { sign* ~ power }
        Rule::unary => {
            let mut signs = Vec::new();
            let mut value = None;
            for inner in pair.into_inner() {
                match inner.as_rule() {
                    Rule::sign => signs.push(inner.as_str() == "-"),
                    _ => value = Some(parse_value(text, inner)?),
                }
            }
            let Some(mut expr) = value else {
                return Err(ParseError::new(text, text.len(), "expected operand"));
            };
            // unary plus is dropped
            for _ in signs.into_iter().filter(|negate| *negate) {
                expr = match expr {
                    Expr::Int(i) => Expr::Int(-i),
                    Expr::Float(f) => Expr::Float(-f),
                    other => Expr::operator(Symbol::Sub, vec![other]),
                };
            }
            Ok(expr)
        }

        // power      = { atom ~ (pow_op ~ unary)? }
        Rule::power => {
            let mut inner = pair.into_inner();
            let base = match inner.next() {
                Some(base) => parse_value(text, base)?,
                None => return Err(ParseError::new(text, 0, "expected operand")),
            };
            match (inner.next(), inner.next()) {
                (Some(_), Some(exponent)) => Ok(Expr::operator(
                    Symbol::Pow,
                    vec![base, parse_value(text, exponent)?],
                )),
                _ => Ok(base),
            }
        }

        // integer    = @{ ASCII_DIGIT+ }
        Rule::integer => pair.as_str().parse().map(Expr::Int).map_err(|_| {
            error_at(text, &pair, format!("integer '{}' is out of range", pair.as_str()))
        }),

        // float      = @{ ... }
        Rule::float => pair
            .as_str()
            .parse()
            .map(Expr::Float)
            .map_err(|_| error_at(text, &pair, format!("invalid number '{}'", pair.as_str()))),

        // string     = ${ ("\"" ~ dq_chars ~ "\"") | ("'" ~ sq_chars ~ "'") }
        Rule::string => Ok(Expr::Str(
            pair.into_inner()
                .next()
                .map(|chars| unescape(chars.as_str()))
                .unwrap_or_default(),
        )),

        // variable   = { name ~ ("[" ~ index ~ ("," ~ index)* ~ "]")? }
        Rule::variable => {
            let mut inner = pair.into_inner();
            let name = inner.next().map(|n| n.as_str().to_string()).unwrap_or_default();
            let indices = inner
                .map(|index| parse_index(text, index))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Expr::Variable(ast::Variable { name, indices }))
        }

        // call       = { name ~ "(" ~ (call_arg ~ ("," ~ call_arg)*)? ~ ")" }
        // call_arg   = { kwarg | expression }
        // kwarg      = { name ~ "=" ~ !"=" ~ expression }
        Rule::call => {
            let mut inner = pair.into_inner();
            let name = inner.next().map(|n| n.as_str().to_string()).unwrap_or_default();
            let mut args = Vec::new();
            let mut kwargs = BTreeMap::new();
            for call_arg in inner {
                let Some(arg) = call_arg.into_inner().next() else {
                    continue;
                };
                if arg.as_rule() == Rule::kwarg {
                    let mut kw = arg.clone().into_inner();
                    let key = kw.next().map(|k| k.as_str().to_string()).unwrap_or_default();
                    let value = match kw.next() {
                        Some(value) => parse_value(text, value)?,
                        None => return Err(error_at(text, &arg, "expected keyword value")),
                    };
                    if kwargs.insert(key.clone(), value).is_some() {
                        return Err(error_at(
                            text,
                            &arg,
                            format!("keyword argument '{}' repeated", key),
                        ));
                    }
                } else if !kwargs.is_empty() {
                    return Err(error_at(
                        text,
                        &arg,
                        "positional argument follows keyword argument",
                    ));
                } else {
                    args.push(parse_value(text, arg)?);
                }
            }
            Ok(Expr::Function(ast::Function { name, args, kwargs }))
        }

        _ => Err(error_at(
            text,
            &pair,
            format!("unexpected {:?} '{}'", pair.as_rule(), pair.as_str()),
        )),
    }
}

// index      = _{ slice | signed_int }
// slice      = { slice_start? ~ ":" ~ slice_stop? ~ (":" ~ slice_step?)? }
fn parse_index(text: &str, pair: Pair<'_, Rule>) -> Result<Selector, ParseError> {
    match pair.as_rule() {
        Rule::signed_int => Ok(Selector::At(parse_signed(text, &pair)?)),
        Rule::slice => {
            let (mut start, mut stop, mut step) = (None, None, None);
            for part in pair.into_inner() {
                let value = match part.clone().into_inner().next() {
                    Some(v) => Some(parse_signed(text, &v)?),
                    None => None,
                };
                match part.as_rule() {
                    Rule::slice_start => start = value,
                    Rule::slice_stop => stop = value,
                    Rule::slice_step => step = value,
                    _ => {}
                }
            }
            Ok(Selector::Slice { start, stop, step })
        }
        _ => Err(error_at(text, &pair, "expected index or slice")),
    }
}

pub fn parse_string(text: &str) -> Result<Expr, ParseError> {
    let main = DefinitionParser::parse(Rule::main, text)
        .map_err(|err| {
            let offset = match err.location {
                InputLocation::Pos(p) => p,
                InputLocation::Span((start, _)) => start,
            };
            ParseError::new(text, offset, err.variant.message())
        })?
        .next()
        .ok_or_else(|| ParseError::new(text, 0, "empty definition"))?;
    match main.into_inner().next() {
        Some(expression) => parse_value(text, expression),
        None => Err(ParseError::new(text, 0, "empty definition")),
    }
}

#[cfg(test)]
mod tests {
    use super::parse_string;
    use crate::ast::{Expr, Symbol};
    use crate::index::Selector;

    fn var(name: &str) -> Expr {
        Expr::variable(name, vec![])
    }

    #[test]
    fn literals() {
        assert_eq!(parse_string("4").unwrap(), Expr::Int(4));
        assert_eq!(parse_string("4.0").unwrap(), Expr::Float(4.0));
        assert_eq!(parse_string("1e3").unwrap(), Expr::Float(1e3));
        assert_eq!(parse_string(".5E-2").unwrap(), Expr::Float(0.005));
        assert_eq!(parse_string("'a\\'b'").unwrap(), Expr::Str("a'b".to_string()));
        assert_eq!(parse_string("\"lat\"").unwrap(), Expr::Str("lat".to_string()));
    }

    #[test]
    fn unary_minus() {
        assert_eq!(parse_string("-3").unwrap(), Expr::Int(-3));
        assert_eq!(parse_string("-2.5").unwrap(), Expr::Float(-2.5));
        assert_eq!(parse_string("+x").unwrap(), var("x"));
        assert_eq!(
            parse_string("-x").unwrap(),
            Expr::operator(Symbol::Sub, vec![var("x")])
        );
        assert_eq!(
            parse_string("-x**2").unwrap(),
            Expr::operator(
                Symbol::Sub,
                vec![Expr::operator(Symbol::Pow, vec![var("x"), Expr::Int(2)])]
            )
        );
        assert_eq!(
            parse_string("2**-1").unwrap(),
            Expr::operator(Symbol::Pow, vec![Expr::Int(2), Expr::Int(-1)])
        );
    }

    #[test]
    fn slices_and_comparison() {
        let expr = parse_string("x[1:4:-1] > 4").unwrap();
        assert_eq!(
            expr,
            Expr::operator(
                Symbol::Greater,
                vec![
                    Expr::variable("x", vec![Selector::slice(Some(1), Some(4), Some(-1))]),
                    Expr::Int(4)
                ]
            )
        );
        let expr = parse_string("x[:, -1, ::2]").unwrap();
        assert_eq!(
            expr.as_variable().unwrap().indices,
            vec![Selector::ALL, Selector::At(-1), Selector::slice(None, None, Some(2))]
        );
    }

    #[test]
    fn precedence() {
        let expr = parse_string("a + b * c ** d ** e - f / g").unwrap();
        assert_eq!(expr.to_string(), "((a+(b*(c**(d**e))))-(f/g))");
        let expr = parse_string("(a + b) * c <= 2").unwrap();
        assert_eq!(expr.to_string(), "(((a+b)*c)<=2)");
    }

    #[test]
    fn calls() {
        let expr = parse_string("mean(ta - 273.15, 'lon', weights = w)").unwrap();
        let f = expr.as_function().unwrap();
        assert_eq!(f.name, "mean");
        assert_eq!(f.args.len(), 2);
        assert_eq!(f.args[1], Expr::Str("lon".to_string()));
        assert_eq!(f.kwargs["weights"], var("w"));
        assert_eq!(
            parse_string("f()").unwrap().as_function().unwrap().args.len(),
            0
        );
        let expr = parse_string("f(x == 1)").unwrap();
        assert_eq!(expr.as_function().unwrap().args.len(), 1);
    }

    #[test]
    fn errors() {
        let err = parse_string("f(units='m', x)").unwrap_err();
        assert_eq!(err.offset, 13);
        assert!(err.message.contains("positional"));
        let err = parse_string("a +\n  * b").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(parse_string("").is_err());
        assert!(parse_string("x[1.5]").is_err());
        assert!(parse_string("f(a=1, a=2)").is_err());
        assert!(parse_string("99999999999999999999").is_err());
    }
}

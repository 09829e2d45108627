use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use itertools::Itertools;

use crate::error::{ConformError, Result};
use crate::index::Selector;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Symbol {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Less,
    Greater,
    LessEqual,
    GreaterEqual,
    Equal,
}

impl Symbol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Symbol::Add => "+",
            Symbol::Sub => "-",
            Symbol::Mul => "*",
            Symbol::Div => "/",
            Symbol::Pow => "**",
            Symbol::Less => "<",
            Symbol::Greater => ">",
            Symbol::LessEqual => "<=",
            Symbol::GreaterEqual => ">=",
            Symbol::Equal => "==",
        }
    }
}

impl FromStr for Symbol {
    type Err = ConformError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "+" => Symbol::Add,
            "-" => Symbol::Sub,
            "*" => Symbol::Mul,
            "/" => Symbol::Div,
            "**" => Symbol::Pow,
            "<" => Symbol::Less,
            ">" => Symbol::Greater,
            "<=" => Symbol::LessEqual,
            ">=" => Symbol::GreaterEqual,
            "==" => Symbol::Equal,
            _ => {
                return Err(ConformError::UndefinedFunction {
                    name: s.to_string(),
                    arity: 2,
                })
            }
        })
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub name: String,
    pub indices: Vec<Selector>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Operator {
    pub symbol: Symbol,
    pub operands: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub args: Vec<Expr>,
    pub kwargs: BTreeMap<String, Expr>,
}

/// A parsed definition.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Int(i64),
    Float(f64),
    Str(String),
    Variable(Variable),
    Operator(Operator),
    Function(Function),
}

impl Expr {
    pub fn variable(name: &str, indices: Vec<Selector>) -> Self {
        Expr::Variable(Variable {
            name: name.to_string(),
            indices,
        })
    }

    pub fn operator(symbol: Symbol, operands: Vec<Expr>) -> Self {
        Expr::Operator(Operator { symbol, operands })
    }

    pub fn as_variable(&self) -> Option<&Variable> {
        match self {
            Expr::Variable(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_operator(&self) -> Option<&Operator> {
        match self {
            Expr::Operator(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&Function> {
        match self {
            Expr::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Expr::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Expr::Int(i) => Some(*i as f64),
            Expr::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Immediate children, in order (keyword arguments last, by name).
    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::Operator(o) => o.operands.iter().collect(),
            Expr::Function(f) => f.args.iter().chain(f.kwargs.values()).collect(),
            _ => vec![],
        }
    }

    /// Names of the variables and functions this expression refers to.
    pub fn dependencies(&self) -> (BTreeSet<&str>, BTreeSet<&str>) {
        let mut variables = BTreeSet::new();
        let mut functions = BTreeSet::new();
        self.collect_dependencies(&mut variables, &mut functions);
        (variables, functions)
    }

    fn collect_dependencies<'a>(&'a self, variables: &mut BTreeSet<&'a str>, functions: &mut BTreeSet<&'a str>) {
        match self {
            Expr::Variable(v) => {
                variables.insert(&v.name);
            }
            Expr::Function(f) => {
                functions.insert(&f.name);
            }
            _ => {}
        }
        for child in self.children() {
            child.collect_dependencies(variables, functions);
        }
    }
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\'', "\\'")
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Expr::Int(i) => write!(f, "{}", i),
            Expr::Float(x) => write!(f, "{:?}", x),
            Expr::Str(s) => write!(f, "'{}'", escape(s)),
            Expr::Variable(v) => {
                write!(f, "{}", v.name)?;
                if !v.indices.is_empty() {
                    write!(f, "[{}]", v.indices.iter().format(", "))?;
                }
                Ok(())
            }
            Expr::Operator(o) => match o.operands.as_slice() {
                [x] => write!(f, "({}{})", o.symbol, x),
                operands => write!(f, "({})", operands.iter().format(&o.symbol.to_string())),
            },
            Expr::Function(func) => {
                let args = func
                    .args
                    .iter()
                    .map(|a| a.to_string())
                    .chain(func.kwargs.iter().map(|(k, v)| format!("{}={}", k, v)));
                write!(f, "{}({})", func.name, args.format(", "))
            }
        }
    }
}

use std::fmt;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ConformError>;

/// Location of a syntax error inside a definition string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub text: String,
    pub line: usize,
    pub column: usize,
    pub offset: usize,
    pub message: String,
}

impl ParseError {
    pub fn new(text: &str, offset: usize, message: impl Into<String>) -> Self {
        let offset = offset.min(text.len());
        let before = &text[..offset];
        let line = before.matches('\n').count() + 1;
        let column = before
            .rfind('\n')
            .map_or(before.chars().count(), |nl| before[nl + 1..].chars().count())
            + 1;
        Self {
            text: text.to_string(),
            line,
            column,
            offset,
            message: message.into(),
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Line {}, Column {}: {} in '{}'",
            self.line, self.column, self.message, self.text
        )
    }
}

impl std::error::Error for ParseError {}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConformError {
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("undefined variable '{name}'")]
    UndefinedVariable { name: String },

    #[error("undefined function '{name}' taking {arity} argument(s)")]
    UndefinedFunction { name: String, arity: usize },

    #[error("invalid argument: {0}")]
    Argument(String),

    #[error("cyclic definition: {}", .cycle.join(" -> "))]
    CyclicDefinition { cycle: Vec<String> },

    #[error("units error: {0}")]
    Units(String),

    #[error("dimensions error: {0}")]
    Dimensions(String),

    #[error("datatype error: {0}")]
    Datatype(String),

    #[error("index error: {0}")]
    Index(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("dataset error: {0}")]
    Dataset(String),

    #[error("i/o error in '{file}': {message}")]
    Io { file: String, message: String },

    #[error("worker {rank} failed: {message}")]
    Worker { rank: usize, message: String },
}

impl ConformError {
    pub fn io(file: &str, message: impl Into<String>) -> Self {
        Self::Io {
            file: file.to_string(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_position() {
        let err = ParseError::new("a +\n  * b", 6, "expected expression");
        assert_eq!(err.line, 2);
        assert_eq!(err.column, 3);
        assert_eq!(
            err.to_string(),
            "Line 2, Column 3: expected expression in 'a +\n  * b'"
        );
    }

    #[test]
    fn cycle_message() {
        let err = ConformError::CyclicDefinition {
            cycle: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "cyclic definition: a -> b -> a");
    }
}

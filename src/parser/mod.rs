pub mod def_parser;
pub use def_parser::DefinitionParser;

use crate::ast::Expr;
use crate::error::ParseError;

/// Parse a variable definition such as `mean(ta - 273.15, "lon")`.
pub fn parse_definition(text: &str) -> Result<Expr, ParseError> {
    def_parser::parse_string(text)
}

#[cfg(test)]
mod tests {
    use super::def_parser::{DefinitionParser, Rule};
    use pest::Parser;

    const DEFINITIONS: &[&str] = &[
        "ta",
        "ps * hyam + hybm",
        "convert(tas, units='degC')",
        "limit(pr, below=0.0)",
        "up(rlut[0:12, :, :])",
        "chunits(time, units=\"days since 1850-01-01\")",
        "x >= 3",
    ];

    #[test]
    fn parse_examples() {
        for text in DEFINITIONS {
            DefinitionParser::parse(Rule::main, text)
                .unwrap_or_else(|e| panic!("unsuccessful parse ({}) {}", text, e));
        }
    }
}

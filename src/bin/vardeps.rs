use anyhow::{anyhow, Result};
use clap::Parser;
use climconform::parse_definition;
use itertools::Itertools;
use log::debug;

/// parses variable definitions and prints the variables and functions each one depends on
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Definitions, each written NAME=DEFINITION
    #[arg(required = true)]
    definitions: Vec<String>,

    /// Print the syntax tree of each definition
    #[arg(short, long)]
    tree: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Args::parse();
    let mut failed = 0;
    for item in &cli.definitions {
        let Some((name, text)) = item.split_once('=') else {
            eprintln!("{}: expected NAME=DEFINITION", item);
            failed += 1;
            continue;
        };
        let (name, text) = (name.trim(), text.trim());
        debug!("parsing {} = {}", name, text);
        match parse_definition(text) {
            Ok(expr) => {
                let (variables, functions) = expr.dependencies();
                println!("{} = {}", name, expr);
                println!("  variables: {}", variables.iter().join(", "));
                println!("  functions: {}", functions.iter().join(", "));
                if cli.tree {
                    println!("{:#?}", expr);
                }
            }
            Err(err) => {
                eprintln!("{}: {}", name, err);
                failed += 1;
            }
        }
    }
    if failed > 0 {
        return Err(anyhow!("{} definition(s) failed to parse", failed));
    }
    Ok(())
}

extern crate pest;
#[macro_use]
extern crate pest_derive;

pub mod ast;
pub mod config;
pub mod dataset;
pub mod error;
pub mod flow;
pub mod functions;
pub mod index;
pub mod io;
pub mod parser;
pub mod physarray;
pub mod scheduler;
pub mod units;

use std::collections::BTreeMap;
use std::sync::Arc;

pub use config::{ConformOptions, CostModel, PartitionMode};
pub use dataset::{Dataset, Dimension, File, FileFormat, Variable};
pub use error::{ConformError, ParseError, Result};
pub use flow::{DataFlow, GraphBuilder, Request};
pub use functions::{Argument, Function, FunctionRegistry};
pub use io::{DataStore, MemoryStore, RawArray};
pub use parser::parse_definition;
pub use physarray::{DataType, PhysArray, Positive};
pub use scheduler::StandardizeReport;
pub use units::Unit;

use scheduler::Scheduler;

/// A function registry and options, ready to standardize datasets.
#[derive(Debug, Clone)]
pub struct Conform {
    registry: Arc<FunctionRegistry>,
    options: ConformOptions,
}

impl Conform {
    pub fn new(options: ConformOptions) -> Self {
        Self {
            registry: Arc::new(FunctionRegistry::builtin()),
            options,
        }
    }

    pub fn with_registry(mut self, registry: FunctionRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    pub fn options(&self) -> &ConformOptions {
        &self.options
    }

    /// A graph builder over `input` and `output`, for inspecting or
    /// evaluating single outputs.
    pub fn builder(
        &self,
        definitions: &BTreeMap<String, String>,
        input: Arc<Dataset>,
        output: Arc<Dataset>,
    ) -> GraphBuilder {
        GraphBuilder::new(input, output, self.registry.clone())
            .with_options(self.options.clone())
            .with_definitions(definitions)
    }

    /// Build the whole graph in one place, without writing anything.
    pub fn build(
        &self,
        definitions: &BTreeMap<String, String>,
        input: Arc<Dataset>,
        output: Arc<Dataset>,
        store: Arc<dyn DataStore>,
    ) -> DataFlow {
        self.builder(definitions, input, output).build_all(store)
    }

    /// Compute every output variable and write it to `store`.
    pub fn standardize(
        &self,
        definitions: &BTreeMap<String, String>,
        input: Arc<Dataset>,
        output: Arc<Dataset>,
        store: Arc<dyn DataStore>,
    ) -> StandardizeReport {
        let builder = self.builder(definitions, input, output);
        Scheduler::new(&builder, store).run()
    }
}

impl Default for Conform {
    fn default() -> Self {
        Self::new(ConformOptions::default())
    }
}

/// Standardize `input` into `output` with the builtin functions.
pub fn standardize(
    definitions: &BTreeMap<String, String>,
    input: Arc<Dataset>,
    output: Arc<Dataset>,
    store: Arc<dyn DataStore>,
    options: ConformOptions,
) -> StandardizeReport {
    Conform::new(options).standardize(definitions, input, output, store)
}

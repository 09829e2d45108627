use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use itertools::Itertools;
use log::{debug, warn};

use super::graph::DataFlow;
use super::node::{DataNode, EvalNode, FlowNode, MapNode, NodeId, Operand, ReadNode, ValidateNode, WriteNode};
use crate::ast::{self, Expr};
use crate::config::ConformOptions;
use crate::dataset::Dataset;
use crate::error::{ConformError, Result};
use crate::functions::{Function, FunctionRegistry};
use crate::index::{Region, Selector};
use crate::io::DataStore;
use crate::parser::parse_definition;
use crate::physarray::{DataType, PhysArray};
use crate::units::Unit;

/// Identity of a node for structural sharing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum NodeKey {
    Int(i64),
    Float(u64),
    Data {
        variable: String,
        indices: Vec<Selector>,
    },
    Read {
        variable: String,
        indices: Vec<Selector>,
    },
    Eval {
        function: String,
        args: Vec<Operand>,
        kwargs: Vec<(String, Operand)>,
    },
}

/// Parse every definition in `definitions`, keeping failures per variable.
pub fn parse_definitions(definitions: &BTreeMap<String, String>) -> BTreeMap<String, Result<Expr>> {
    definitions
        .iter()
        .map(|(name, text)| (name.clone(), parse_definition(text).map_err(ConformError::from)))
        .collect()
}

/// Builds a [`DataFlow`] from output definitions and dataset descriptors.
///
/// Definitions given to [`GraphBuilder::with_definitions`] take precedence
/// over those in the output descriptor. An output with neither a definition
/// nor data copies the input variable of the same name.
#[derive(Debug, Clone)]
pub struct GraphBuilder {
    input: Arc<Dataset>,
    output: Arc<Dataset>,
    registry: Arc<FunctionRegistry>,
    options: ConformOptions,
    definitions: BTreeMap<String, String>,
}

impl GraphBuilder {
    pub fn new(input: Arc<Dataset>, output: Arc<Dataset>, registry: Arc<FunctionRegistry>) -> Self {
        Self {
            input,
            output,
            registry,
            options: ConformOptions::default(),
            definitions: BTreeMap::new(),
        }
    }

    pub fn with_options(mut self, options: ConformOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_definitions(mut self, definitions: &BTreeMap<String, String>) -> Self {
        self.definitions
            .extend(definitions.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn options(&self) -> &ConformOptions {
        &self.options
    }

    pub fn input(&self) -> &Dataset {
        &self.input
    }

    pub fn output(&self) -> &Dataset {
        &self.output
    }

    fn definition(&self, name: &str) -> Option<String> {
        if let Some(text) = self.definitions.get(name) {
            return Some(text.clone());
        }
        let var = self.output.variable(name)?;
        if var.data.is_some() {
            return None;
        }
        var.definition
            .clone()
            .or_else(|| self.input.variable(name).map(|_| name.to_string()))
    }

    /// Every output variable of the output dataset.
    pub fn output_names(&self) -> Vec<String> {
        self.output.variables().map(|v| v.name.clone()).collect()
    }

    /// Build write chains for `outputs`, plus whatever they depend on.
    ///
    /// Dimensions are paired over every output of the dataset, so the graph
    /// of an output does not depend on which others are built with it.
    /// Outputs given by data carry output dimensions; where they enter
    /// definitions they are first renamed to the input dimensions paired
    /// with them by outputs computed from input variables alone.
    pub fn build(&self, store: Arc<dyn DataStore>, outputs: &[String]) -> DataFlow {
        let everything = self.output_names();
        let mut state = BuildState::new(self, store.clone(), BTreeMap::new());
        state.roots(&everything);
        let with_data = state.with_data();
        let mapped = if with_data.is_empty() {
            state.map_dimensions(&BTreeMap::new(), &with_data).0
        } else {
            let (_, seed) = state.map_dimensions(&BTreeMap::new(), &with_data);
            let mut inverse = BTreeMap::new();
            for (i, o) in &seed {
                inverse.entry(o.clone()).or_insert_with(|| i.clone());
            }
            debug!("output data dimensions seen as {:?}", inverse);
            state = BuildState::new(self, store, inverse);
            state.roots(&everything);
            state.map_dimensions(&seed, &BTreeSet::new()).0
        };

        let wanted: BTreeSet<&str> = outputs.iter().map(String::as_str).collect();
        for (name, renames) in mapped {
            if !wanted.contains(name.as_str()) {
                continue;
            }
            if let Err(err) = state.chain(&name, renames) {
                debug!("{} failed to build: {}", name, err);
                state.flow.errors.insert(name, err);
            }
        }
        state.flow.roots.retain(|name, _| wanted.contains(name.as_str()));
        state.flow.errors.retain(|name, _| wanted.contains(name.as_str()));
        state.flow
    }

    pub fn build_all(&self, store: Arc<dyn DataStore>) -> DataFlow {
        self.build(store, &self.output_names())
    }
}

struct BuildState<'a> {
    builder: &'a GraphBuilder,
    flow: DataFlow,
    keys: HashMap<NodeKey, NodeId>,
    parsed: HashMap<String, Result<Expr>>,
    interior: HashMap<String, Result<NodeId>>,
    in_progress: Vec<String>,
    /// Input dimension standing for each output dimension of data outputs.
    data_dimensions: BTreeMap<String, String>,
}

impl<'a> BuildState<'a> {
    fn new(builder: &'a GraphBuilder, store: Arc<dyn DataStore>, data_dimensions: BTreeMap<String, String>) -> Self {
        Self {
            builder,
            flow: DataFlow::new(store, builder.output.clone(), builder.options.provenance),
            keys: HashMap::new(),
            parsed: HashMap::new(),
            interior: HashMap::new(),
            in_progress: vec![],
            data_dimensions,
        }
    }

    fn roots(&mut self, outputs: &[String]) {
        for name in outputs.iter().unique() {
            match self.root(name) {
                Ok(id) => {
                    self.flow.roots.insert(name.clone(), id);
                }
                Err(err) => {
                    debug!("{} failed to build: {}", name, err);
                    self.flow.errors.insert(name.clone(), err);
                }
            }
        }
    }

    /// Outputs whose roots depend on an output given by data with
    /// dimensions.
    fn with_data(&self) -> BTreeSet<String> {
        self.flow
            .roots
            .iter()
            .filter(|(_, root)| {
                let mut stack = vec![**root];
                let mut seen = BTreeSet::new();
                while let Some(id) = stack.pop() {
                    if !seen.insert(id) {
                        continue;
                    }
                    let node = self.flow.node(id);
                    if matches!(node, FlowNode::Data(d) if d.array.rank() > 0) {
                        return true;
                    }
                    stack.extend(node.inputs());
                }
                false
            })
            .map(|(name, _)| name.clone())
            .collect()
    }

    fn add(&mut self, key: NodeKey, node: impl FnOnce() -> Result<FlowNode>) -> Result<NodeId> {
        if let Some(&id) = self.keys.get(&key) {
            return Ok(id);
        }
        let node = node()?;
        let kind = node.kind();
        let id = self.flow.push(node);
        debug!("{} node {} for {:?}", kind, id, key);
        self.keys.insert(key, id);
        Ok(id)
    }

    fn parse(&mut self, name: &str, text: &str) -> Result<Expr> {
        self.parsed
            .entry(name.to_string())
            .or_insert_with(|| parse_definition(text).map_err(ConformError::from))
            .clone()
    }

    /// Root node of output `name`: its data, or its definition.
    fn root(&mut self, name: &str) -> Result<NodeId> {
        let var = self.builder.output.variable(name).ok_or_else(|| ConformError::UndefinedVariable {
            name: name.to_string(),
        })?;
        if var.data.is_some() {
            return self.data(name, &[]);
        }
        self.interior(name)
    }

    /// The subgraph of a defined output variable.
    fn interior(&mut self, name: &str) -> Result<NodeId> {
        if let Some(done) = self.interior.get(name) {
            return done.clone();
        }
        if let Some(start) = self.in_progress.iter().position(|n| n == name) {
            let mut cycle = self.in_progress[start..].to_vec();
            cycle.push(name.to_string());
            return Err(ConformError::CyclicDefinition { cycle });
        }
        let text = self
            .builder
            .definition(name)
            .ok_or_else(|| ConformError::UndefinedVariable {
                name: name.to_string(),
            })?;
        let expr = self.parse(name, &text)?;
        self.in_progress.push(name.to_string());
        let result = self.expr(&expr);
        self.in_progress.pop();
        self.interior.insert(name.to_string(), result.clone());
        result
    }

    fn literal(&mut self, key: NodeKey, value: f64, dtype: DataType, name: String) -> Result<NodeId> {
        let strict = self.builder.options.strict_literal_units;
        self.add(key, || {
            let mut array = PhysArray::literal(value, dtype, name);
            if strict {
                array = array.with_units(Unit::dimensionless());
            }
            Ok(FlowNode::Data(DataNode { array }))
        })
    }

    fn expr(&mut self, expr: &Expr) -> Result<NodeId> {
        match expr {
            Expr::Int(i) => self.literal(NodeKey::Int(*i), *i as f64, DataType::Int64, i.to_string()),
            Expr::Float(f) => self.literal(NodeKey::Float(f.to_bits()), *f, DataType::Float64, format!("{:?}", f)),
            Expr::Str(s) => Err(ConformError::Argument(format!(
                "string '{}' can only be a function argument",
                s
            ))),
            Expr::Variable(v) => self.variable(v),
            Expr::Operator(o) => {
                let function = self.builder.registry.operator(o.symbol, o.operands.len())?;
                let args = o
                    .operands
                    .iter()
                    .map(|x| self.expr(x).map(Operand::Node))
                    .collect::<Result<Vec<_>>>()?;
                self.eval(function, args, BTreeMap::new())
            }
            Expr::Function(f) => {
                let function = self.builder.registry.function(&f.name, f.args.len())?;
                if let Some(k) = f.kwargs.keys().find(|k| !function.keywords().contains(&k.as_str())) {
                    return Err(ConformError::Argument(format!(
                        "{} does not take keyword '{}'",
                        f.name, k
                    )));
                }
                let args = f
                    .args
                    .iter()
                    .map(|a| self.operand(a))
                    .collect::<Result<Vec<_>>>()?;
                let kwargs = f
                    .kwargs
                    .iter()
                    .map(|(k, a)| Ok((k.clone(), self.operand(a)?)))
                    .collect::<Result<BTreeMap<_, _>>>()?;
                self.eval(function, args, kwargs)
            }
        }
    }

    fn operand(&mut self, expr: &Expr) -> Result<Operand> {
        match expr {
            Expr::Str(s) => Ok(Operand::Str(s.clone())),
            other => self.expr(other).map(Operand::Node),
        }
    }

    fn eval(
        &mut self,
        function: Arc<dyn Function>,
        args: Vec<Operand>,
        kwargs: BTreeMap<String, Operand>,
    ) -> Result<NodeId> {
        let key = NodeKey::Eval {
            function: function.name().to_string(),
            args: args.clone(),
            kwargs: kwargs.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        };
        self.add(key, || {
            Ok(FlowNode::Eval(EvalNode {
                function,
                args,
                kwargs,
            }))
        })
    }

    /// Input variables come first, then derived outputs, then outputs given
    /// by data.
    fn variable(&mut self, v: &ast::Variable) -> Result<NodeId> {
        let input = self.builder.input.clone();
        if input.variable(&v.name).is_some() {
            let key = NodeKey::Read {
                variable: v.name.clone(),
                indices: v.indices.clone(),
            };
            return self.add(key, || Ok(FlowNode::Read(ReadNode::new(&input, &v.name, &v.indices)?)));
        }
        match self.builder.output.variable(&v.name) {
            Some(var) if var.data.is_some() => self.data(&v.name, &v.indices),
            Some(_) if self.builder.definition(&v.name).is_some() => {
                if !v.indices.is_empty() {
                    return Err(ConformError::Index(format!(
                        "derived variable '{}' cannot be indexed",
                        v.name
                    )));
                }
                self.interior(&v.name)
            }
            _ => Err(ConformError::UndefinedVariable { name: v.name.clone() }),
        }
    }

    /// Output variable given by explicit data.
    fn data(&mut self, name: &str, indices: &[Selector]) -> Result<NodeId> {
        let output = self.builder.output.clone();
        let data_dimensions = self.data_dimensions.clone();
        let key = NodeKey::Data {
            variable: name.to_string(),
            indices: indices.to_vec(),
        };
        self.add(key, || {
            let var = output
                .variable(name)
                .ok_or_else(|| ConformError::UndefinedVariable { name: name.to_string() })?;
            let data = var
                .data
                .clone()
                .ok_or_else(|| ConformError::UndefinedVariable { name: name.to_string() })?;
            let mut array = PhysArray::new(name, data, var.dimensions.clone())?
                .with_units(var.units()?)
                .with_positive(var.positive()?)
                .with_dtype(var.datatype);
            if !indices.is_empty() {
                let region = Region::resolve(indices, array.shape())?;
                array = array
                    .select(&region)?
                    .with_name(format!("{}[{}]", name, indices.iter().join(", ")));
            }
            let array = array.rename_dimensions(&data_dimensions)?;
            Ok(FlowNode::Data(DataNode { array }))
        })
    }

    /// Pair the dimensions each root produces with the dimensions of its
    /// output, starting from the pairings in `seed` and passing over the
    /// outputs in `skip`. Outputs are visited by rank; a pairing made for
    /// one output holds for all later ones. Remaining dimensions are paired
    /// by name, then in order from the last. Returns the pairings of each
    /// output and of all of them together.
    fn map_dimensions(
        &mut self,
        seed: &BTreeMap<String, String>,
        skip: &BTreeSet<String>,
    ) -> (Vec<(String, BTreeMap<String, String>)>, BTreeMap<String, String>) {
        let mut items = Vec::new();
        let roots = self.flow.roots.clone();
        for (name, root) in roots {
            if skip.contains(&name) {
                continue;
            }
            let Some(var) = self.builder.output.variable(&name) else {
                continue;
            };
            match self.flow.info(root) {
                Ok(info) => items.push((name, info.dimensions().to_vec(), var.dimensions.clone())),
                Err(err) => {
                    self.flow.errors.insert(name, err);
                }
            }
        }
        items.sort_by(|a, b| (a.2.len(), &a.0).cmp(&(b.2.len(), &b.0)));

        let mut global = seed.clone();
        let mut mapped = Vec::new();
        for (name, inputs, outputs) in items {
            match map_one(&global, &inputs, &outputs) {
                Ok(local) => {
                    for (i, o) in &local {
                        global.entry(i.clone()).or_insert_with(|| o.clone());
                    }
                    mapped.push((name, local));
                }
                Err(err) => {
                    self.flow.errors.insert(name, err);
                }
            }
        }
        (mapped, global)
    }

    /// Map, validate and write nodes for output `name`.
    fn chain(&mut self, name: &str, renames: BTreeMap<String, String>) -> Result<()> {
        let output = self.builder.output.clone();
        let var = output
            .variable(name)
            .ok_or_else(|| ConformError::UndefinedVariable { name: name.to_string() })?;
        let root = self.flow.roots[name];
        let map = self.flow.push(FlowNode::Map(MapNode {
            input: root,
            renames,
            dimensions: var.dimensions.clone(),
        }));
        let validate = self.flow.push(FlowNode::Validate(ValidateNode::new(
            map,
            var,
            self.builder.options.error_on_validation,
        )?));
        let write = WriteNode::new(validate, &output, name)?;
        if write.targets.is_empty() {
            warn!("output '{}' is not in any file", name);
        }
        let write = self.flow.push(FlowNode::Write(write));
        self.flow.info(write)?;
        self.flow.outputs.insert(name.to_string(), write);
        Ok(())
    }
}

fn map_one(
    global: &BTreeMap<String, String>,
    inputs: &[String],
    outputs: &[String],
) -> Result<BTreeMap<String, String>> {
    let mut local = BTreeMap::new();
    let mut unmapped = Vec::new();
    for d in inputs {
        match global.get(d) {
            Some(o) if outputs.contains(o) => {
                local.insert(d.clone(), o.clone());
            }
            Some(o) => {
                return Err(ConformError::Dimensions(format!(
                    "input dimension '{}' is mapped to '{}', which is not among ({})",
                    d,
                    o,
                    outputs.join(", ")
                )))
            }
            None => unmapped.push(d.clone()),
        }
    }
    unmapped.retain(|d| {
        if outputs.contains(d) && !local.values().any(|o| o == d) {
            local.insert(d.clone(), d.clone());
            false
        } else {
            true
        }
    });
    let free = outputs
        .iter()
        .filter(|o| !local.values().contains(o))
        .collect_vec();
    if unmapped.len() > free.len() {
        return Err(ConformError::Dimensions(format!(
            "cannot map dimensions ({}) onto ({})",
            inputs.join(", "),
            outputs.join(", ")
        )));
    }
    for (d, o) in unmapped.iter().rev().zip(free.iter().rev()) {
        local.insert(d.clone(), (*o).clone());
    }
    if !local.values().all_unique() {
        return Err(ConformError::Dimensions(format!(
            "dimensions ({}) map onto ({}) more than once",
            inputs.join(", "),
            outputs.join(", ")
        )));
    }
    Ok(local)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{Dimension, File, Variable};
    use crate::flow::Request;
    use crate::index::Index;
    use crate::io::MemoryStore;
    use ndarray::arr1;

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn datasets(outputs: Vec<Variable>) -> (Arc<Dataset>, Arc<Dataset>) {
        let input = Dataset::new(
            "input",
            vec![Dimension::new("x", 3)],
            vec![
                Variable::new("a", DataType::Float64, &["x"]).with_attribute("units", "m"),
                Variable::new("b", DataType::Float64, &["x"]).with_attribute("units", "s"),
            ],
            vec![File::new("in.nc", &["a", "b"])],
        )
        .unwrap();
        let files = vec![File::new(
            "out.nc",
            &outputs.iter().map(|v| v.name.as_str()).collect_vec(),
        )];
        let output = Dataset::new("output", vec![Dimension::new("y", 3)], outputs, files).unwrap();
        (Arc::new(input), Arc::new(output))
    }

    fn build(outputs: Vec<Variable>, definitions: &[(&str, &str)]) -> DataFlow {
        let (input, output) = datasets(outputs);
        let definitions = definitions
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        GraphBuilder::new(input, output, Arc::new(FunctionRegistry::builtin()))
            .with_definitions(&definitions)
            .build_all(Arc::new(MemoryStore::new()))
    }

    fn out(name: &str, units: &str) -> Variable {
        Variable::new(name, DataType::Float64, &["y"]).with_attribute("units", units)
    }

    #[test]
    fn shares_common_subexpressions() {
        let flow = build(
            vec![out("v", "m/s"), out("w", "m2/s")],
            &[("v", "a / b"), ("w", "a * (a / b)")],
        );
        assert!(flow.build_errors().is_empty(), "{:?}", flow.build_errors());
        let v = flow.root("v").unwrap();
        let FlowNode::Eval(w) = flow.node(flow.root("w").unwrap()) else {
            panic!("expected eval node");
        };
        assert_eq!(w.args[1], Operand::Node(v));
        let reads = (0..flow.len())
            .filter(|i| matches!(flow.node(NodeId(*i)), FlowNode::Read(_)))
            .count();
        assert_eq!(reads, 2);
        let header = flow.evaluate(flow.output("w").unwrap(), &Request::Info).unwrap().unwrap();
        assert_eq!(header.dimensions(), &["y".to_string()]);
    }

    #[test]
    fn derived_variables() {
        let flow = build(
            vec![out("v", "m/s"), out("v2", "m2 s-2")],
            &[("v", "a / b"), ("v2", "v ** 2")],
        );
        assert!(flow.build_errors().is_empty(), "{:?}", flow.build_errors());
        let FlowNode::Eval(e) = flow.node(flow.root("v2").unwrap()) else {
            panic!("expected eval node");
        };
        assert_eq!(e.args[0], Operand::Node(flow.root("v").unwrap()));

        let flow = build(vec![out("v", "m/s"), out("w", "1")], &[("v", "a / b"), ("w", "v[0]")]);
        assert!(matches!(flow.error("w"), Some(ConformError::Index(_))));
    }

    #[test]
    fn cycles() {
        let flow = build(
            vec![out("p", "m"), out("q", "m"), out("r", "m")],
            &[("p", "q + a"), ("q", "p + a"), ("r", "a")],
        );
        assert_eq!(
            flow.error("p"),
            Some(&ConformError::CyclicDefinition {
                cycle: names(&["p", "q", "p"])
            })
        );
        assert!(matches!(flow.error("q"), Some(ConformError::CyclicDefinition { .. })));
        assert!(flow.error("r").is_none());
        assert!(flow.output("r").is_some());
    }

    #[test]
    fn per_output_errors() {
        let flow = build(
            vec![out("u", "m"), out("v", "m"), out("w", "m"), out("x", "m"), out("z", "m")],
            &[
                ("u", "a + b"),
                ("v", "nope(a)"),
                ("w", "missing * 2"),
                ("x", "a +"),
                ("z", "a"),
            ],
        );
        assert!(matches!(flow.error("u"), Some(ConformError::Units(_))));
        assert!(matches!(flow.error("v"), Some(ConformError::UndefinedFunction { .. })));
        assert!(matches!(flow.error("w"), Some(ConformError::UndefinedVariable { .. })));
        assert!(matches!(flow.error("x"), Some(ConformError::Parse(_))));
        assert_eq!(flow.outputs().collect_vec(), vec!["z"]);

        let flow = build(vec![out("k", "m")], &[("k", "convert(a, unit='km')")]);
        assert!(matches!(flow.error("k"), Some(ConformError::Argument(_))));
        let flow = build(vec![out("k", "m")], &[("k", "a + 'x'")]);
        assert!(matches!(flow.error("k"), Some(ConformError::Argument(_))));
    }

    fn store_with(values: &[(&str, &[f64], &str)]) -> Arc<MemoryStore> {
        let store = MemoryStore::new();
        for (name, data, units) in values {
            let mut attributes = crate::dataset::Attributes::new();
            attributes.insert("units".into(), (*units).into());
            store
                .insert("in.nc", name, &["x"], arr1(data).into_dyn(), attributes)
                .unwrap();
        }
        Arc::new(store)
    }

    fn written(flow: &DataFlow, name: &str) -> PhysArray {
        let FlowNode::Write(w) = flow.node(flow.output(name).unwrap()) else {
            panic!("expected write node");
        };
        flow.value(w.input, &Index::all()).unwrap()
    }

    #[test]
    fn identity_and_data_outputs() {
        let mut c = out("c", "m");
        c.data = Some(arr1(&[1.0, 2.0, 3.0]).into_dyn());
        let (input, output) = datasets(vec![out("a", "km"), c, out("d", "m")]);
        let store = store_with(&[("a", &[1.0, 2.0, 3.0][..], "m"), ("b", &[1.0, 1.0, 1.0][..], "s")]);
        let flow = GraphBuilder::new(input, output, Arc::new(FunctionRegistry::builtin()))
            .with_definitions(&BTreeMap::from([("d".to_string(), "a + c".to_string())]))
            .build_all(store);
        assert!(flow.build_errors().is_empty(), "{:?}", flow.build_errors());
        assert!(matches!(flow.node(flow.root("c").unwrap()), FlowNode::Data(_)));
        let header = flow.output_info("a").unwrap().header;
        assert_eq!(header.units(), &Unit::parse("km").unwrap());

        let d = written(&flow, "d");
        assert_eq!(d.dimensions(), &["y".to_string()]);
        assert_eq!(d.data(), &arr1(&[2.0, 4.0, 6.0]).into_dyn());
        assert_eq!(written(&flow, "c").data(), &arr1(&[1.0, 2.0, 3.0]).into_dyn());
    }

    #[test]
    fn pairings_span_all_outputs() {
        let input = Dataset::new(
            "input",
            vec![Dimension::new("a", 2), Dimension::new("b", 2)],
            vec![Variable::new("X", DataType::Float64, &["a", "b"]).with_attribute("units", "1")],
            vec![File::new("in.nc", &["X"])],
        )
        .unwrap();
        let output = Dataset::new(
            "output",
            vec![Dimension::new("p", 2), Dimension::new("q", 2)],
            vec![
                Variable::new("V1", DataType::Float64, &["p"]).with_attribute("units", "1"),
                Variable::new("V2", DataType::Float64, &["p", "q"]).with_attribute("units", "1"),
            ],
            vec![File::new("out.nc", &["V1", "V2"])],
        )
        .unwrap();
        let store = MemoryStore::new();
        let mut attributes = crate::dataset::Attributes::new();
        attributes.insert("units".into(), "1".into());
        store
            .insert("in.nc", "X", &["a", "b"], ndarray::arr2(&[[1.0, 2.0], [3.0, 4.0]]).into_dyn(), attributes)
            .unwrap();
        let store: Arc<dyn DataStore> = Arc::new(store);
        let builder = GraphBuilder::new(Arc::new(input), Arc::new(output), Arc::new(FunctionRegistry::builtin()))
            .with_definitions(&BTreeMap::from([
                ("V1".to_string(), "mean(X, 'a')".to_string()),
                ("V2".to_string(), "X".to_string()),
            ]));

        let all = builder.build_all(store.clone());
        let alone = builder.build(store, &names(&["V2"]));
        assert_eq!(alone.outputs().collect_vec(), vec!["V2"]);
        assert!(alone.root("V1").is_none());
        let expected = ndarray::arr2(&[[1.0, 3.0], [2.0, 4.0]]).into_dyn();
        assert_eq!(written(&all, "V2").data(), &expected);
        assert_eq!(written(&alone, "V2").data(), &expected);
    }

    #[test]
    fn dimension_mapping() {
        assert_eq!(
            map_one(&BTreeMap::new(), &names(&["time", "nlat"]), &names(&["time", "lat"])).unwrap(),
            BTreeMap::from([
                ("time".to_string(), "time".to_string()),
                ("nlat".to_string(), "lat".to_string())
            ])
        );
        let global = BTreeMap::from([("nlat".to_string(), "lat".to_string())]);
        assert!(map_one(&global, &names(&["nlat"]), &names(&["lon"])).is_err());
        assert!(map_one(&BTreeMap::new(), &names(&["a", "b"]), &names(&["c"])).is_err());
        let broadcast = map_one(&BTreeMap::new(), &names(&["x"]), &names(&["t", "y"])).unwrap();
        assert_eq!(broadcast["x"], "y");
    }

    #[test]
    fn parses_all_definitions() {
        let parsed = parse_definitions(&BTreeMap::from([
            ("a".to_string(), "x + 1".to_string()),
            ("b".to_string(), "x +".to_string()),
        ]));
        assert!(parsed["a"].is_ok());
        assert!(parsed["b"].is_err());
    }

    #[test]
    fn evaluates_through_the_chain() {
        let (input, output) = datasets(vec![out("v", "km/h")]);
        let store = Arc::new(MemoryStore::new());
        let mut m = crate::dataset::Attributes::new();
        m.insert("units".into(), "m".into());
        let mut s = crate::dataset::Attributes::new();
        s.insert("units".into(), "s".into());
        store.insert("in.nc", "a", &["x"], arr1(&[1.0, 2.0, 3.0]).into_dyn(), m).unwrap();
        store.insert("in.nc", "b", &["x"], arr1(&[1.0, 1.0, 2.0]).into_dyn(), s).unwrap();
        let definitions = BTreeMap::from([("v".to_string(), "a / b".to_string())]);
        let flow = GraphBuilder::new(input, output, Arc::new(FunctionRegistry::builtin()))
            .with_definitions(&definitions)
            .build_all(store.clone());
        let validate = match flow.node(flow.output("v").unwrap()) {
            FlowNode::Write(w) => w.input,
            _ => panic!("expected write node"),
        };
        let v = flow
            .evaluate(validate, &Request::Region(Index::all()))
            .unwrap()
            .unwrap();
        approx::assert_relative_eq!(v.data()[[2]], 5.4, epsilon = 1e-9);
        let part = flow
            .value(validate, &Index::all().with("y", Selector::range(1, 3)))
            .unwrap();
        assert_eq!(part.shape(), &[2]);
        assert_eq!(store.read_count(), 2);
    }
}

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use itertools::Itertools;
use log::{debug, info};

use super::node::{FlowNode, NodeId, Operand};
use crate::dataset::{Dataset, Dimension};
use crate::error::{ConformError, Result};
use crate::functions::Argument;
use crate::index::{chunk_ranges, AxisSel, Index, Region};
use crate::io::{DataStore, FileSpec, VariableSpec};
use crate::physarray::PhysArray;

/// What to evaluate a node for.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// Dimensions, units and datatype only; nothing is read.
    Info,
    Region(Index),
}

/// What evaluating a node will produce: a header array (every axis of length
/// zero) and the full shape.
#[derive(Debug, Clone)]
pub struct ArrayInfo {
    pub header: PhysArray,
    pub shape: Vec<usize>,
}

impl ArrayInfo {
    pub fn dimensions(&self) -> &[String] {
        self.header.dimensions()
    }

    pub fn sizes(&self) -> BTreeMap<String, usize> {
        self.dimensions()
            .iter()
            .cloned()
            .zip(self.shape.iter().copied())
            .collect()
    }

    pub fn region(&self, index: &Index) -> Result<Region> {
        index.resolve(self.dimensions(), &self.shape)
    }
}

/// The computation graph: an arena of nodes, with one write chain per output
/// variable that built successfully.
///
/// Evaluation is lazy and memoized per node and region; a request for a
/// region inside one already computed is served from the cache.
pub struct DataFlow {
    nodes: Vec<FlowNode>,
    store: Arc<dyn DataStore>,
    output: Arc<Dataset>,
    provenance: bool,
    pub(crate) roots: BTreeMap<String, NodeId>,
    pub(crate) outputs: BTreeMap<String, NodeId>,
    pub(crate) errors: BTreeMap<String, ConformError>,
    info: RefCell<HashMap<NodeId, ArrayInfo>>,
    cache: RefCell<HashMap<NodeId, Vec<(Region, PhysArray)>>>,
}

/// Contiguous range of an axis of length `n` selected by `sel`.
fn domain_range(dim: &str, sel: AxisSel) -> Result<Range<usize>> {
    match sel {
        AxisSel::Point(p) => Ok(p..p + 1),
        AxisSel::Range { len: 0, .. } => Ok(0..0),
        AxisSel::Range { start, step: 1, len } => Ok(start..start + len),
        AxisSel::Range { .. } => Err(ConformError::Index(format!(
            "selection of dimension '{}' to execute must be contiguous",
            dim
        ))),
    }
}

impl DataFlow {
    pub(crate) fn new(store: Arc<dyn DataStore>, output: Arc<Dataset>, provenance: bool) -> Self {
        Self {
            nodes: vec![],
            store,
            output,
            provenance,
            roots: BTreeMap::new(),
            outputs: BTreeMap::new(),
            errors: BTreeMap::new(),
            info: RefCell::new(HashMap::new()),
            cache: RefCell::new(HashMap::new()),
        }
    }

    pub(crate) fn push(&mut self, node: FlowNode) -> NodeId {
        self.nodes.push(node);
        NodeId(self.nodes.len() - 1)
    }

    pub fn node(&self, id: NodeId) -> &FlowNode {
        &self.nodes[id.0]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node computing the definition of `name`, before mapping and validation.
    pub fn root(&self, name: &str) -> Option<NodeId> {
        self.roots.get(name).copied()
    }

    /// Write node of output `name`.
    pub fn output(&self, name: &str) -> Option<NodeId> {
        self.outputs.get(name).copied()
    }

    pub fn outputs(&self) -> impl Iterator<Item = &str> {
        self.outputs.keys().map(String::as_str)
    }

    pub fn build_errors(&self) -> &BTreeMap<String, ConformError> {
        &self.errors
    }

    pub fn error(&self, name: &str) -> Option<&ConformError> {
        self.errors.get(name)
    }

    pub fn clear_cache(&self) {
        self.cache.borrow_mut().clear();
    }

    pub fn info(&self, id: NodeId) -> Result<ArrayInfo> {
        if let Some(info) = self.info.borrow().get(&id) {
            return Ok(info.clone());
        }
        let info = self.compute_info(id)?;
        self.info.borrow_mut().insert(id, info.clone());
        Ok(info)
    }

    /// Info of the validated values of output `name`.
    pub fn output_info(&self, name: &str) -> Result<ArrayInfo> {
        match self.outputs.get(name).map(|id| self.node(*id)) {
            Some(FlowNode::Write(w)) => self.info(w.input),
            _ => Err(self.missing(name)),
        }
    }

    fn missing(&self, name: &str) -> ConformError {
        self.errors
            .get(name)
            .cloned()
            .unwrap_or_else(|| ConformError::UndefinedVariable {
                name: name.to_string(),
            })
    }

    fn argument_info(
        &self,
        operand: &Operand,
        sizes: &mut BTreeMap<String, usize>,
        first_shape: &mut Option<Vec<usize>>,
    ) -> Result<Argument> {
        let id = match operand {
            Operand::Str(s) => return Ok(Argument::Str(s.clone())),
            Operand::Node(id) => *id,
        };
        let info = self.info(id)?;
        for (d, &n) in info.dimensions().iter().zip(&info.shape) {
            match sizes.insert(d.clone(), n) {
                Some(m) if m != n => {
                    return Err(ConformError::Dimensions(format!(
                        "dimension '{}' has length {} in one argument and {} in another",
                        d, m, n
                    )))
                }
                _ => {}
            }
        }
        if first_shape.is_none() && !info.shape.is_empty() {
            *first_shape = Some(info.shape.clone());
        }
        Ok(Argument::Array(info.header))
    }

    fn compute_info(&self, id: NodeId) -> Result<ArrayInfo> {
        match self.node(id) {
            FlowNode::Data(d) => Ok(ArrayInfo {
                header: d.array.header(),
                shape: d.array.shape().to_vec(),
            }),
            FlowNode::Read(r) => Ok(ArrayInfo {
                header: r.header(self.store.as_ref())?,
                shape: r.shape(),
            }),
            FlowNode::Eval(e) => {
                let mut sizes = BTreeMap::new();
                let mut first_shape = None;
                let args = e
                    .args
                    .iter()
                    .map(|a| self.argument_info(a, &mut sizes, &mut first_shape))
                    .collect::<Result<Vec<_>>>()?;
                let kwargs = e
                    .kwargs
                    .iter()
                    .map(|(k, a)| Ok((k.clone(), self.argument_info(a, &mut sizes, &mut first_shape)?)))
                    .collect::<Result<BTreeMap<_, _>>>()?;
                let header = e.function.call(&args, &kwargs)?;
                let shape = header
                    .dimensions()
                    .iter()
                    .enumerate()
                    .map(|(i, d)| {
                        sizes
                            .get(d)
                            .copied()
                            .or_else(|| first_shape.as_ref().and_then(|s| s.get(i).copied()))
                            .ok_or_else(|| {
                                ConformError::Dimensions(format!(
                                    "unknown length of dimension '{}' of '{}'",
                                    d,
                                    header.name()
                                ))
                            })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(ArrayInfo { header, shape })
            }
            FlowNode::Map(m) => {
                let input = self.info(m.input)?;
                let zeros: BTreeMap<String, usize> = m.dimensions.iter().map(|d| (d.clone(), 0)).collect();
                let header = m.apply(&input.header, &Index::all(), &zeros)?;
                let input_sizes = input
                    .sizes()
                    .into_iter()
                    .map(|(d, n)| (m.renames.get(&d).cloned().unwrap_or(d), n))
                    .collect::<BTreeMap<_, _>>();
                let shape = m
                    .dimensions
                    .iter()
                    .map(|d| {
                        let declared = self.output.dimension(d).ok_or_else(|| {
                            ConformError::Dimensions(format!("undeclared output dimension '{}'", d))
                        })?;
                        match input_sizes.get(d) {
                            Some(&n) if declared.unlimited || n == declared.size => Ok(n),
                            Some(&n) => Err(ConformError::Dimensions(format!(
                                "'{}' has length {} along '{}', output dimension has length {}",
                                input.header.name(),
                                n,
                                d,
                                declared.size
                            ))),
                            None => Ok(declared.size),
                        }
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(ArrayInfo { header, shape })
            }
            FlowNode::Validate(v) => {
                let input = self.info(v.input)?;
                Ok(ArrayInfo {
                    header: v.conform(&input.header)?,
                    shape: input.shape,
                })
            }
            FlowNode::Write(w) => self.info(w.input),
        }
    }

    fn cached(&self, id: NodeId, region: &Region) -> Result<Option<PhysArray>> {
        let cache = self.cache.borrow();
        let Some(entries) = cache.get(&id) else {
            return Ok(None);
        };
        for (cached, array) in entries {
            if let Some(relative) = cached.relative(region) {
                debug!("{} {}: served {} from cached {}", self.node(id).kind(), id, region, cached);
                return array.select(&relative).map(Some);
            }
        }
        Ok(None)
    }

    /// Values of node `id` over `index`.
    pub fn value(&self, id: NodeId, index: &Index) -> Result<PhysArray> {
        let info = self.info(id)?;
        let region = info.region(index)?;
        if let Some(array) = self.cached(id, &region)? {
            return Ok(array);
        }
        let array = self.compute(id, index, &info)?;
        self.cache
            .borrow_mut()
            .entry(id)
            .or_default()
            .push((region, array.clone()));
        Ok(array)
    }

    fn compute(&self, id: NodeId, index: &Index, info: &ArrayInfo) -> Result<PhysArray> {
        match self.node(id) {
            FlowNode::Data(d) => d.array.select(&info.region(index)?),
            FlowNode::Read(r) => r.read(self.store.as_ref(), &info.region(index)?),
            FlowNode::Eval(e) => {
                let literals = e.literals();
                let args = e
                    .args
                    .iter()
                    .enumerate()
                    .map(|(position, a)| match a {
                        Operand::Str(s) => Ok(Argument::Str(s.clone())),
                        Operand::Node(n) => {
                            let index = e.function.argument_index(position, index, &literals);
                            Ok(Argument::Array(self.value(*n, &index)?))
                        }
                    })
                    .collect::<Result<Vec<_>>>()?;
                let kwargs = e
                    .kwargs
                    .iter()
                    .map(|(k, a)| {
                        let arg = match a {
                            Operand::Str(s) => Argument::Str(s.clone()),
                            Operand::Node(n) => {
                                let index = e.function.keyword_index(k, index, &literals);
                                Argument::Array(self.value(*n, &index)?)
                            }
                        };
                        Ok((k.clone(), arg))
                    })
                    .collect::<Result<BTreeMap<_, _>>>()?;
                e.function.call(&args, &kwargs)
            }
            FlowNode::Map(m) => {
                let input = self.value(m.input, &m.input_index(index))?;
                m.apply(&input, index, &info.sizes())
            }
            FlowNode::Validate(v) => v.apply(&self.value(v.input, index)?),
            FlowNode::Write(w) => self.value(w.input, index),
        }
    }

    /// Evaluate node `id`. Write nodes write their region and return nothing.
    pub fn evaluate(&self, id: NodeId, request: &Request) -> Result<Option<PhysArray>> {
        match (request, self.node(id)) {
            (Request::Info, _) => self.info(id).map(|info| Some(info.header)),
            (Request::Region(index), FlowNode::Write(_)) => self.write_node(id, index).map(|_| None),
            (Request::Region(index), _) => self.value(id, index).map(Some),
        }
    }

    fn write_node(&self, id: NodeId, index: &Index) -> Result<()> {
        let FlowNode::Write(w) = self.node(id) else {
            return Err(ConformError::Argument(format!("node {} does not write", id)));
        };
        let region = self.info(w.input)?.region(index)?;
        let array = self.value(w.input, index)?;
        debug!("writing {} {}", w.variable, region);
        w.write(self.store.as_ref(), &region, &array)
    }

    /// Compute and write `index` of output `name`.
    pub fn write(&self, name: &str, index: &Index) -> Result<()> {
        match self.outputs.get(name) {
            Some(&id) => self.write_node(id, index),
            None => Err(self.missing(name)),
        }
    }

    /// Write `outputs` over `domain` in chunks. Every output is written chunk
    /// by chunk, sharing one chunk plan so that shared nodes are evaluated
    /// once per chunk; the cache is cleared between chunks.
    pub fn execute(
        &self,
        outputs: &[String],
        chunks: &BTreeMap<String, usize>,
        domain: &Index,
    ) -> BTreeMap<String, Result<()>> {
        let mut results = BTreeMap::new();
        let mut active = Vec::new();
        for name in outputs {
            match self.output_info(name) {
                Ok(info) => active.push((name.as_str(), info)),
                Err(err) => {
                    results.insert(name.clone(), Err(err));
                }
            }
        }

        let mut sizes = BTreeMap::new();
        for (_, info) in &active {
            for (d, n) in info.sizes() {
                sizes.entry(d).or_insert(n);
            }
        }
        let dims = sizes.keys().cloned().collect_vec();
        let shape = sizes.values().copied().collect_vec();
        let ranges = dims
            .iter()
            .zip(&shape)
            .map(|(d, &n)| domain_range(d, domain.get(d).resolve(n)?))
            .collect::<Result<Vec<_>>>();
        let plan = match ranges {
            Ok(ranges) => chunk_ranges(&dims, &ranges, &shape, chunks),
            Err(err) => {
                for (name, _) in active.drain(..) {
                    results.insert(name.to_string(), Err(err.clone()));
                }
                vec![]
            }
        };
        info!("writing {} output(s) in {} chunk(s)", active.len(), plan.len());

        let mut written: HashMap<&str, HashSet<Index>> = HashMap::new();
        for chunk in &plan {
            for (name, info) in &active {
                if results.contains_key(*name) {
                    continue;
                }
                let local = chunk.restrict(info.dimensions());
                if !written.entry(*name).or_default().insert(local.clone()) {
                    continue;
                }
                if let Err(err) = self.write(name, &local) {
                    results.insert(name.to_string(), Err(err));
                }
            }
            self.clear_cache();
        }
        for (name, _) in active {
            results.entry(name.to_string()).or_insert(Ok(()));
        }
        results
    }

    /// Specifications of the output files, with a `provenance` attribute on
    /// each variable that built if enabled.
    pub fn file_specs(&self) -> Vec<FileSpec> {
        self.output
            .files()
            .iter()
            .map(|file| {
                let variables = file
                    .variables
                    .iter()
                    .filter_map(|v| self.output.variable(v))
                    .map(|var| {
                        let mut attributes = var.attributes.clone();
                        if self.provenance {
                            if let Ok(info) = self.output_info(&var.name) {
                                attributes.insert("provenance".to_string(), info.header.name().into());
                            }
                        }
                        VariableSpec {
                            name: var.name.clone(),
                            datatype: var.datatype,
                            dimensions: var.dimensions.clone(),
                            attributes,
                        }
                    })
                    .collect_vec();
                let dimensions = variables
                    .iter()
                    .flat_map(|v| v.dimensions.iter())
                    .unique()
                    .filter_map(|d| self.output.dimension(d))
                    .map(|d| match file.records {
                        Some(records) if d.unlimited => Dimension::unlimited(&d.name, records),
                        _ => d.clone(),
                    })
                    .collect_vec();
                FileSpec {
                    name: file.name.clone(),
                    format: file.format,
                    deflate: file.deflate,
                    shuffle: file.shuffle,
                    attributes: file.attributes.clone(),
                    dimensions,
                    variables,
                }
            })
            .collect()
    }
}

impl fmt::Debug for DataFlow {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("DataFlow")
            .field("nodes", &self.nodes)
            .field("outputs", &self.outputs)
            .field("errors", &self.errors)
            .finish()
    }
}

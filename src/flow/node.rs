use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use itertools::Itertools;
use log::warn;
use ndarray::{concatenate, ArrayD, Axis, IxDyn};

use crate::dataset::{Dataset, RecordSlot, Variable};
use crate::error::{ConformError, Result};
use crate::functions::Function;
use crate::index::{AxisSel, Index, Region, Selector};
use crate::io::DataStore;
use crate::physarray::{DataType, PhysArray, Positive};
use crate::units::Unit;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An input of an [`EvalNode`]: another node, or a string literal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operand {
    Node(NodeId),
    Str(String),
}

/// A constant: a literal, or an output variable given by explicit data.
#[derive(Debug, Clone)]
pub struct DataNode {
    pub array: PhysArray,
}

/// Split the positions selected by `sel` along an unlimited axis between the
/// files holding its records. Each piece is `(slot, first position within
/// sel, selection within the file)`, in the order `sel` visits them.
pub fn split_records(sel: &AxisSel, slots: &[RecordSlot]) -> Result<Vec<(usize, usize, AxisSel)>> {
    let locate = |p: usize| {
        slots.iter().position(|s| s.holds(p)).ok_or_else(|| {
            ConformError::Index(format!("record {} is not held by any file", p))
        })
    };
    match *sel {
        AxisSel::Point(p) => {
            let slot = locate(p)?;
            Ok(vec![(slot, 0, AxisSel::Point(p - slots[slot].offset))])
        }
        AxisSel::Range { len: 0, .. } => Ok(vec![(0, 0, AxisSel::Range { start: 0, step: 1, len: 0 })]),
        AxisSel::Range { step, len, .. } => {
            let mut pieces: Vec<(usize, usize, AxisSel)> = Vec::new();
            for k in 0..len {
                let p = sel.position(k);
                let slot = locate(p)?;
                match pieces.last_mut() {
                    Some((s, _, AxisSel::Range { len, .. })) if *s == slot => *len += 1,
                    _ => pieces.push((
                        slot,
                        k,
                        AxisSel::Range {
                            start: p - slots[slot].offset,
                            step,
                            len: 1,
                        },
                    )),
                }
            }
            Ok(pieces)
        }
    }
}

/// Select `n` entries starting at `k0` along `axis` of `array`.
fn take_axis(array: &PhysArray, axis: usize, k0: usize, n: usize) -> Result<PhysArray> {
    let region = Region::full(array.shape()).with_axis(
        axis,
        AxisSel::Range {
            start: k0,
            step: 1,
            len: n,
        },
    );
    array.select(&region)
}

/// Reads an input variable, optionally through a fixed index written in the
/// definition (`x[0, :]`).
#[derive(Debug, Clone)]
pub struct ReadNode {
    pub variable: String,
    pub label: String,
    /// Dimensions of the variable as stored.
    pub dimensions: Vec<String>,
    pub pre_region: Region,
    pub slots: Vec<RecordSlot>,
    pub unlimited_axis: Option<usize>,
    pub units: Unit,
    pub positive: Option<Positive>,
    pub datatype: DataType,
}

fn units_or_dimensionless(variable: &str, units: Result<Unit>) -> Unit {
    units.unwrap_or_else(|err| {
        warn!("{}: {}; assuming dimensionless", variable, err);
        Unit::dimensionless()
    })
}

fn is_packed(var: &Variable) -> bool {
    var.attributes.contains_key("scale_factor") || var.attributes.contains_key("add_offset")
}

impl ReadNode {
    pub fn new(input: &Dataset, variable: &str, indices: &[Selector]) -> Result<Self> {
        let var = input.variable(variable).ok_or_else(|| ConformError::UndefinedVariable {
            name: variable.to_string(),
        })?;
        let shape = input.shape(variable)?;
        let pre_region = Region::resolve(indices, &shape)?;
        let label = if indices.is_empty() {
            variable.to_string()
        } else {
            format!("{}[{}]", variable, indices.iter().join(", "))
        };
        let datatype = if is_packed(var) {
            var.datatype.promote(DataType::Float64)
        } else {
            var.datatype
        };
        Ok(Self {
            variable: variable.to_string(),
            label,
            dimensions: var.dimensions.clone(),
            pre_region,
            slots: input.record_slots(variable)?,
            unlimited_axis: input.unlimited_axis(variable),
            units: units_or_dimensionless(variable, var.units()),
            positive: var.positive()?,
            datatype,
        })
    }

    /// Dimensions left after the fixed index.
    pub fn dimensions_read(&self) -> Vec<String> {
        self.dimensions
            .iter()
            .zip(self.pre_region.axes())
            .filter(|(_, a)| !a.is_point())
            .map(|(d, _)| d.clone())
            .collect()
    }

    pub fn shape(&self) -> Vec<usize> {
        self.pre_region.shape()
    }

    /// Shape-free stand-in for the data. A single value is read in full,
    /// since operators such as `**` depend on it.
    pub fn header(&self, store: &dyn DataStore) -> Result<PhysArray> {
        let dims = self.dimensions_read();
        if dims.is_empty() {
            return self.read(store, &Region::new(vec![]));
        }
        Ok(PhysArray::new(self.label.clone(), ArrayD::zeros(IxDyn(&vec![0; dims.len()])), dims)?
            .with_units(self.units.clone())
            .with_positive(self.positive)
            .with_dtype(self.datatype))
    }

    /// Read `request` (relative to the fixed index) from the store.
    pub fn read(&self, store: &dyn DataStore, request: &Region) -> Result<PhysArray> {
        let region = self.pre_region.join(request)?;
        let first = self.slots.first().ok_or_else(|| {
            ConformError::Dataset(format!("variable '{}' is not held by any file", self.variable))
        })?;
        let pieces = match self.unlimited_axis {
            None => vec![(first.file.as_str(), region.clone())],
            Some(axis) => split_records(&region.axes()[axis], &self.slots)?
                .into_iter()
                .map(|(slot, _, sel)| (self.slots[slot].file.as_str(), region.with_axis(axis, sel)))
                .collect(),
        };
        let mut units = None;
        let mut arrays = Vec::with_capacity(pieces.len());
        for (file, file_region) in &pieces {
            let raw = store.read(&self.variable, file, file_region)?;
            if units.is_none() {
                units = Some(match &raw.units {
                    Some(text) => units_or_dimensionless(
                        &self.variable,
                        Unit::parse_with_calendar(text, raw.calendar.as_deref()),
                    ),
                    None => Unit::dimensionless(),
                });
            }
            arrays.push(raw.unpack());
        }
        let data = match (arrays.len(), self.unlimited_axis.and_then(|a| region.kept_axis(a))) {
            (1, _) => arrays.pop().unwrap_or_else(|| ArrayD::zeros(IxDyn(&region.shape()))),
            (_, Some(axis)) => {
                let views = arrays.iter().map(|a| a.view()).collect_vec();
                concatenate(Axis(axis), &views).map_err(|e| {
                    ConformError::io(&first.file, format!("joining '{}': {}", self.variable, e))
                })?
            }
            (_, None) => {
                return Err(ConformError::Index(format!(
                    "single record of '{}' read from several files",
                    self.variable
                )))
            }
        };
        Ok(PhysArray::new(self.label.clone(), data, self.dimensions_read())?
            .with_units(units.unwrap_or_default())
            .with_positive(self.positive)
            .with_dtype(self.datatype))
    }
}

/// Applies a registered operator or function.
#[derive(Clone)]
pub struct EvalNode {
    pub function: Arc<dyn Function>,
    pub args: Vec<Operand>,
    pub kwargs: BTreeMap<String, Operand>,
}

impl EvalNode {
    /// String literal positional arguments, by position.
    pub fn literals(&self) -> Vec<Option<&str>> {
        self.args
            .iter()
            .map(|a| match a {
                Operand::Str(s) => Some(s.as_str()),
                Operand::Node(_) => None,
            })
            .collect()
    }
}

impl fmt::Debug for EvalNode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("EvalNode")
            .field("function", &self.function.name())
            .field("args", &self.args)
            .field("kwargs", &self.kwargs)
            .finish()
    }
}

/// Renames input dimensions to output dimensions, transposes to the output
/// order and broadcasts over output dimensions the input lacks.
#[derive(Debug, Clone)]
pub struct MapNode {
    pub input: NodeId,
    /// Input dimension name to output dimension name.
    pub renames: BTreeMap<String, String>,
    pub dimensions: Vec<String>,
}

impl MapNode {
    /// The request `index` (over output dimensions) in input dimensions.
    pub fn input_index(&self, index: &Index) -> Index {
        let inverse = self
            .renames
            .iter()
            .map(|(i, o)| (o.clone(), i.clone()))
            .collect();
        index.rename(&inverse)
    }

    /// Map `array`, the input evaluated over `index`; `sizes` are the full
    /// sizes of the output dimensions.
    pub fn apply(&self, array: &PhysArray, index: &Index, sizes: &BTreeMap<String, usize>) -> Result<PhysArray> {
        let renamed = array.rename_dimensions(&self.renames)?;
        let kept = self
            .dimensions
            .iter()
            .filter(|d| !matches!(index.get(d), Selector::At(_)))
            .cloned()
            .collect_vec();
        let mut counts = BTreeMap::new();
        for d in kept.iter().filter(|d| !renamed.dimensions().contains(d)) {
            let n = *sizes.get(d).ok_or_else(|| {
                ConformError::Dimensions(format!("unknown size of output dimension '{}'", d))
            })?;
            counts.insert(d.clone(), index.get(d).resolve(n)?.count());
        }
        renamed.broadcast_to(&kept, &counts)
    }
}

/// Checks an output against its descriptor and brings it into the declared
/// units, direction and datatype.
#[derive(Debug, Clone)]
pub struct ValidateNode {
    pub input: NodeId,
    pub variable: String,
    pub dimensions: Vec<String>,
    pub units: Unit,
    pub datatype: DataType,
    pub positive: Option<Positive>,
    pub valid_min: Option<f64>,
    pub valid_max: Option<f64>,
    pub ok_min_mean_abs: Option<f64>,
    pub ok_max_mean_abs: Option<f64>,
    pub error_on_validation: bool,
}

impl ValidateNode {
    pub fn new(input: NodeId, var: &Variable, error_on_validation: bool) -> Result<Self> {
        Ok(Self {
            input,
            variable: var.name.clone(),
            dimensions: var.dimensions.clone(),
            units: var.units()?,
            datatype: var.datatype,
            positive: var.positive()?,
            valid_min: var.attribute_f64("valid_min"),
            valid_max: var.attribute_f64("valid_max"),
            ok_min_mean_abs: var.attribute_f64("ok_min_mean_abs"),
            ok_max_mean_abs: var.attribute_f64("ok_max_mean_abs"),
            error_on_validation,
        })
    }

    fn check(&self, ok: bool, message: impl FnOnce() -> String) -> Result<()> {
        if ok {
            return Ok(());
        }
        let message = format!("{}: {}", self.variable, message());
        if self.error_on_validation {
            Err(ConformError::Validation(message))
        } else {
            warn!("{}", message);
            Ok(())
        }
    }

    fn check_ranges(&self, array: &PhysArray) -> Result<()> {
        let values = array.data().iter().copied().filter(|v| !v.is_nan()).collect_vec();
        if values.is_empty() {
            return Ok(());
        }
        let (lo, hi) = values
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        if let Some(min) = self.valid_min {
            self.check(lo >= min, || format!("minimum {} is below valid_min {}", lo, min))?;
        }
        if let Some(max) = self.valid_max {
            self.check(hi <= max, || format!("maximum {} is above valid_max {}", hi, max))?;
        }
        let mean_abs = values.iter().map(|v| v.abs()).sum::<f64>() / values.len() as f64;
        if let Some(min) = self.ok_min_mean_abs {
            self.check(mean_abs >= min, || {
                format!("mean absolute value {} is below ok_min_mean_abs {}", mean_abs, min)
            })?;
        }
        if let Some(max) = self.ok_max_mean_abs {
            self.check(mean_abs <= max, || {
                format!("mean absolute value {} is above ok_max_mean_abs {}", mean_abs, max)
            })?;
        }
        Ok(())
    }

    /// Check and convert `array` without looking at its values.
    pub fn conform(&self, array: &PhysArray) -> Result<PhysArray> {
        let declared = self
            .dimensions
            .iter()
            .filter(|d| array.dimensions().contains(d))
            .collect_vec();
        if declared.len() != array.rank() || declared.iter().zip(array.dimensions()).any(|(a, b)| *a != b) {
            return Err(ConformError::Dimensions(format!(
                "'{}' has dimensions ({}), output '{}' declares ({})",
                array.name(),
                array.dimensions().join(", "),
                self.variable,
                self.dimensions.join(", ")
            )));
        }
        let array = if array.units().is_no_unit() {
            array.clone().with_units(self.units.clone())
        } else {
            array.convert(&self.units).map_err(|_| {
                ConformError::Units(format!(
                    "'{}' has units '{}', output '{}' declares '{}'",
                    array.name(),
                    array.units(),
                    self.variable,
                    self.units
                ))
            })?
        };
        let array = match self.positive {
            Some(p) => array.set_positive(p),
            None => array,
        };
        array.cast(self.datatype)
    }

    pub fn apply(&self, array: &PhysArray) -> Result<PhysArray> {
        let array = self.conform(array)?;
        self.check_ranges(&array)?;
        Ok(array)
    }
}

/// Writes an output variable into the files that hold it.
#[derive(Debug, Clone)]
pub struct WriteNode {
    pub input: NodeId,
    pub variable: String,
    pub targets: Vec<RecordSlot>,
    pub unlimited_axis: Option<usize>,
}

impl WriteNode {
    pub fn new(input: NodeId, output: &Dataset, variable: &str) -> Result<Self> {
        let unlimited_axis = output.unlimited_axis(variable);
        let targets = match unlimited_axis {
            Some(_) => output.record_slots(variable)?,
            None => output
                .files_for(variable)
                .into_iter()
                .map(|f| RecordSlot {
                    file: f.name.clone(),
                    offset: 0,
                    records: 0,
                })
                .collect(),
        };
        Ok(Self {
            input,
            variable: variable.to_string(),
            targets,
            unlimited_axis,
        })
    }

    /// Write `array`, which covers `region` of the variable.
    pub fn write(&self, store: &dyn DataStore, region: &Region, array: &PhysArray) -> Result<()> {
        let Some(axis) = self.unlimited_axis else {
            for target in &self.targets {
                store.write(&self.variable, &target.file, region, array)?;
            }
            return Ok(());
        };
        let sel = region.axes()[axis];
        if sel.count() == 0 {
            return Ok(());
        }
        for (slot, k0, file_sel) in split_records(&sel, &self.targets)? {
            let part = match region.kept_axis(axis) {
                Some(kept) => take_axis(array, kept, k0, file_sel.count())?,
                None => array.clone(),
            };
            store.write(
                &self.variable,
                &self.targets[slot].file,
                &region.with_axis(axis, file_sel),
                &part,
            )?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub enum FlowNode {
    Data(DataNode),
    Read(ReadNode),
    Eval(EvalNode),
    Map(MapNode),
    Validate(ValidateNode),
    Write(WriteNode),
}

impl FlowNode {
    pub fn kind(&self) -> &'static str {
        match self {
            FlowNode::Data(_) => "data",
            FlowNode::Read(_) => "read",
            FlowNode::Eval(_) => "eval",
            FlowNode::Map(_) => "map",
            FlowNode::Validate(_) => "validate",
            FlowNode::Write(_) => "write",
        }
    }

    pub fn inputs(&self) -> Vec<NodeId> {
        match self {
            FlowNode::Data(_) | FlowNode::Read(_) => vec![],
            FlowNode::Eval(e) => e
                .args
                .iter()
                .chain(e.kwargs.values())
                .filter_map(|o| match o {
                    Operand::Node(id) => Some(*id),
                    Operand::Str(_) => None,
                })
                .collect(),
            FlowNode::Map(m) => vec![m.input],
            FlowNode::Validate(v) => vec![v.input],
            FlowNode::Write(w) => vec![w.input],
        }
    }
}

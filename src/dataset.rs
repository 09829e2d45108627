//! Descriptors of input and output datasets.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use ndarray::ArrayD;

use crate::error::{ConformError, Result};
use crate::physarray::{DataType, Positive};
use crate::units::Unit;

#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Text(String),
    Number(f64),
}

impl AttrValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Text(s) => Some(s),
            AttrValue::Number(_) => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttrValue::Number(x) => Some(*x),
            AttrValue::Text(s) => s.trim().parse().ok(),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        AttrValue::Text(s.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        AttrValue::Text(s)
    }
}

impl From<f64> for AttrValue {
    fn from(x: f64) -> Self {
        AttrValue::Number(x)
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AttrValue::Text(s) => write!(f, "{}", s),
            AttrValue::Number(x) => write!(f, "{}", x),
        }
    }
}

pub type Attributes = BTreeMap<String, AttrValue>;

#[derive(Debug, Clone, PartialEq)]
pub struct Dimension {
    pub name: String,
    pub size: usize,
    pub unlimited: bool,
}

impl Dimension {
    pub fn new(name: &str, size: usize) -> Self {
        Self {
            name: name.to_string(),
            size,
            unlimited: false,
        }
    }

    pub fn unlimited(name: &str, size: usize) -> Self {
        Self {
            unlimited: true,
            ..Self::new(name, size)
        }
    }
}

#[derive(Debug, Clone)]
pub struct Variable {
    pub name: String,
    pub datatype: DataType,
    pub dimensions: Vec<String>,
    pub attributes: Attributes,
    pub definition: Option<String>,
    pub data: Option<ArrayD<f64>>,
    pub auxiliary: Vec<String>,
}

impl Variable {
    pub fn new(name: &str, datatype: DataType, dimensions: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            datatype,
            dimensions: dimensions.iter().map(|d| d.to_string()).collect(),
            attributes: Attributes::new(),
            definition: None,
            data: None,
            auxiliary: vec![],
        }
    }

    pub fn with_attribute(mut self, key: &str, value: impl Into<AttrValue>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }

    pub fn with_definition(mut self, definition: &str) -> Self {
        self.definition = Some(definition.to_string());
        self
    }

    pub fn with_data(mut self, data: ArrayD<f64>) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_auxiliary(mut self, names: &[&str]) -> Self {
        self.auxiliary = names.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&AttrValue> {
        self.attributes.get(key)
    }

    pub fn attribute_f64(&self, key: &str) -> Option<f64> {
        self.attribute(key).and_then(AttrValue::as_f64)
    }

    pub fn units(&self) -> Result<Unit> {
        let calendar = self.attribute("calendar").and_then(AttrValue::as_str);
        match self.attribute("units") {
            Some(units) => Unit::parse_with_calendar(&units.to_string(), calendar),
            None => Ok(Unit::dimensionless()),
        }
    }

    pub fn declares_units(&self) -> bool {
        self.attributes.contains_key("units")
    }

    pub fn positive(&self) -> Result<Option<Positive>> {
        self.attribute("positive")
            .map(|p| p.to_string().parse())
            .transpose()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FileFormat {
    #[default]
    Netcdf4,
    Netcdf4Classic,
    Netcdf3Classic,
    Netcdf3Offset64,
}

impl FromStr for FileFormat {
    type Err = ConformError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "NETCDF4" => Ok(FileFormat::Netcdf4),
            "NETCDF4_CLASSIC" => Ok(FileFormat::Netcdf4Classic),
            "NETCDF3_CLASSIC" => Ok(FileFormat::Netcdf3Classic),
            "NETCDF3_64BIT_OFFSET" | "NETCDF3_64BIT" => Ok(FileFormat::Netcdf3Offset64),
            other => Err(ConformError::Dataset(format!("unknown file format '{}'", other))),
        }
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            FileFormat::Netcdf4 => "NETCDF4",
            FileFormat::Netcdf4Classic => "NETCDF4_CLASSIC",
            FileFormat::Netcdf3Classic => "NETCDF3_CLASSIC",
            FileFormat::Netcdf3Offset64 => "NETCDF3_64BIT_OFFSET",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone)]
pub struct File {
    pub name: String,
    pub format: FileFormat,
    pub deflate: u8,
    pub shuffle: bool,
    pub attributes: Attributes,
    pub variables: Vec<String>,
    /// Records of the unlimited dimension held by this (input) file.
    pub records: Option<usize>,
}

impl File {
    pub fn new(name: &str, variables: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            format: FileFormat::default(),
            deflate: 0,
            shuffle: false,
            attributes: Attributes::new(),
            variables: variables.iter().map(|v| v.to_string()).collect(),
            records: None,
        }
    }

    pub fn with_records(mut self, records: usize) -> Self {
        self.records = Some(records);
        self
    }

    pub fn with_format(mut self, format: FileFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_compression(mut self, deflate: u8, shuffle: bool) -> Self {
        self.deflate = deflate;
        self.shuffle = shuffle;
        self
    }

    pub fn with_attribute(mut self, key: &str, value: impl Into<AttrValue>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }

    pub fn contains(&self, variable: &str) -> bool {
        self.variables.iter().any(|v| v == variable)
    }
}

/// Where the records of a variable split along its unlimited dimension live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSlot {
    pub file: String,
    pub offset: usize,
    pub records: usize,
}

impl RecordSlot {
    pub fn holds(&self, record: usize) -> bool {
        record >= self.offset && record < self.offset + self.records
    }
}

#[derive(Debug, Clone)]
pub struct Dataset {
    name: String,
    dimensions: BTreeMap<String, Dimension>,
    variables: BTreeMap<String, Variable>,
    files: Vec<File>,
}

fn duplicates<'a>(names: impl Iterator<Item = &'a str>) -> Option<&'a str> {
    let mut seen = BTreeSet::new();
    names.into_iter().find(|n| !seen.insert(*n))
}

impl Dataset {
    pub fn new(
        name: &str,
        dimensions: Vec<Dimension>,
        variables: Vec<Variable>,
        files: Vec<File>,
    ) -> Result<Self> {
        let err = |msg: String| Err(ConformError::Dataset(format!("{}: {}", name, msg)));
        if let Some(d) = duplicates(dimensions.iter().map(|d| d.name.as_str())) {
            return err(format!("dimension '{}' declared twice", d));
        }
        if let Some(v) = duplicates(variables.iter().map(|v| v.name.as_str())) {
            return err(format!("variable '{}' declared twice", v));
        }
        if let Some(f) = duplicates(files.iter().map(|f| f.name.as_str())) {
            return err(format!("file '{}' declared twice", f));
        }
        let dataset = Self {
            name: name.to_string(),
            dimensions: dimensions.into_iter().map(|d| (d.name.clone(), d)).collect(),
            variables: variables.into_iter().map(|v| (v.name.clone(), v)).collect(),
            files,
        };
        for var in dataset.variables.values() {
            if let Some(d) = duplicates(var.dimensions.iter().map(String::as_str)) {
                return err(format!("variable '{}' repeats dimension '{}'", var.name, d));
            }
            if let Some(d) = var.dimensions.iter().find(|d| !dataset.dimensions.contains_key(*d)) {
                return err(format!("variable '{}' has undeclared dimension '{}'", var.name, d));
            }
            if let Some(a) = var.auxiliary.iter().find(|a| !dataset.variables.contains_key(*a)) {
                return err(format!(
                    "variable '{}' refers to undeclared auxiliary coordinate '{}'",
                    var.name, a
                ));
            }
            if var.definition.is_some() && var.data.is_some() {
                return err(format!(
                    "variable '{}' has both a definition and data",
                    var.name
                ));
            }
            if let Some(data) = &var.data {
                let shape = dataset.shape(&var.name)?;
                let fixed_match = data.ndim() == shape.len()
                    && var.dimensions.iter().zip(data.shape()).zip(&shape).all(|((d, n), m)| {
                        n == m || dataset.dimensions[d].unlimited
                    });
                if !fixed_match {
                    return err(format!(
                        "data of variable '{}' has shape {:?}, expected {:?}",
                        var.name,
                        data.shape(),
                        shape
                    ));
                }
            }
        }
        for file in &dataset.files {
            if let Some(v) = file.variables.iter().find(|v| !dataset.variables.contains_key(*v)) {
                return err(format!("file '{}' refers to undeclared variable '{}'", file.name, v));
            }
        }
        for var in dataset.variables.values() {
            dataset.record_slots(&var.name)?;
        }
        Ok(dataset)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dimension(&self, name: &str) -> Option<&Dimension> {
        self.dimensions.get(name)
    }

    pub fn dimensions(&self) -> impl Iterator<Item = &Dimension> {
        self.dimensions.values()
    }

    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.get(name)
    }

    pub fn variables(&self) -> impl Iterator<Item = &Variable> {
        self.variables.values()
    }

    pub fn files(&self) -> &[File] {
        &self.files
    }

    pub fn file(&self, name: &str) -> Option<&File> {
        self.files.iter().find(|f| f.name == name)
    }

    pub fn files_for(&self, variable: &str) -> Vec<&File> {
        self.files.iter().filter(|f| f.contains(variable)).collect()
    }

    pub fn shape(&self, variable: &str) -> Result<Vec<usize>> {
        let var = self.variables.get(variable).ok_or_else(|| ConformError::UndefinedVariable {
            name: variable.to_string(),
        })?;
        Ok(var
            .dimensions
            .iter()
            .filter_map(|d| self.dimensions.get(d))
            .map(|d| d.size)
            .collect())
    }

    /// Axis of `variable` along an unlimited dimension, if any.
    pub fn unlimited_axis(&self, variable: &str) -> Option<usize> {
        self.variables
            .get(variable)?
            .dimensions
            .iter()
            .position(|d| self.dimensions.get(d).is_some_and(|d| d.unlimited))
    }

    /// The files holding `variable`, with the records of its unlimited
    /// dimension each one holds. Variables without an unlimited dimension
    /// get one slot covering the whole variable, as does a single file not
    /// giving its record count. An unlimited dimension of size 0 takes its
    /// size from the records of the files.
    pub fn record_slots(&self, variable: &str) -> Result<Vec<RecordSlot>> {
        let files = self.files_for(variable);
        let Some(axis) = self.unlimited_axis(variable) else {
            return Ok(files
                .first()
                .map(|f| RecordSlot {
                    file: f.name.clone(),
                    offset: 0,
                    records: 0,
                })
                .into_iter()
                .collect());
        };
        let total = self.shape(variable)?[axis];
        if files.len() == 1 {
            return Ok(vec![RecordSlot {
                file: files[0].name.clone(),
                offset: 0,
                records: files[0].records.unwrap_or(usize::MAX),
            }]);
        }
        let mut offset = 0;
        let mut slots = Vec::with_capacity(files.len());
        for file in files {
            let records = file.records.ok_or_else(|| {
                ConformError::Dataset(format!(
                    "file '{}' must give its record count for variable '{}' split across files",
                    file.name, variable
                ))
            })?;
            slots.push(RecordSlot {
                file: file.name.clone(),
                offset,
                records,
            });
            offset += records;
        }
        if total != 0 && offset != total {
            return Err(ConformError::Dataset(format!(
                "files holding '{}' have {} records, dimension size is {}",
                variable, offset, total
            )));
        }
        Ok(slots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{ArrayD, IxDyn};

    fn input() -> Result<Dataset> {
        Dataset::new(
            "input",
            vec![Dimension::unlimited("time", 10), Dimension::new("lat", 3)],
            vec![
                Variable::new("T", DataType::Float32, &["time", "lat"]).with_attribute("units", "K"),
                Variable::new("lat", DataType::Float64, &["lat"])
                    .with_attribute("units", "degrees_north"),
            ],
            vec![
                File::new("a.nc", &["T", "lat"]).with_records(4),
                File::new("b.nc", &["T", "lat"]).with_records(6),
            ],
        )
    }

    #[test]
    fn record_slots() {
        let ds = input().unwrap();
        let slots = ds.record_slots("T").unwrap();
        assert_eq!(slots.len(), 2);
        assert_eq!(slots[1].offset, 4);
        assert!(slots[1].holds(9));
        assert!(!slots[0].holds(4));
        assert_eq!(ds.record_slots("lat").unwrap().len(), 1);

        let open = Dataset::new(
            "x",
            vec![Dimension::unlimited("time", 0)],
            vec![Variable::new("v", DataType::Float64, &["time"])],
            vec![File::new("a.nc", &["v"])],
        )
        .unwrap();
        assert!(open.record_slots("v").unwrap()[0].holds(7));
        let split = Dataset::new(
            "x",
            vec![Dimension::unlimited("time", 0)],
            vec![Variable::new("v", DataType::Float64, &["time"])],
            vec![
                File::new("a.nc", &["v"]).with_records(2),
                File::new("b.nc", &["v"]).with_records(3),
            ],
        )
        .unwrap();
        assert_eq!(split.record_slots("v").unwrap()[1].offset, 2);
        assert_eq!(ds.unlimited_axis("T"), Some(0));
        assert_eq!(ds.variable("T").unwrap().units().unwrap(), Unit::parse("K").unwrap());
    }

    #[test]
    fn invalid_descriptors() {
        let bad_dim = Dataset::new(
            "x",
            vec![],
            vec![Variable::new("v", DataType::Float64, &["nope"])],
            vec![],
        );
        assert!(matches!(bad_dim, Err(ConformError::Dataset(_))));

        let duplicate = Dataset::new(
            "x",
            vec![Dimension::new("a", 1), Dimension::new("a", 2)],
            vec![],
            vec![],
        );
        assert!(duplicate.is_err());

        let bad_records = Dataset::new(
            "x",
            vec![Dimension::unlimited("time", 10)],
            vec![Variable::new("v", DataType::Float64, &["time"])],
            vec![
                File::new("a.nc", &["v"]).with_records(4),
                File::new("b.nc", &["v"]).with_records(4),
            ],
        );
        assert!(bad_records.is_err());

        let bad_data = Dataset::new(
            "x",
            vec![Dimension::new("lat", 3)],
            vec![Variable::new("v", DataType::Float64, &["lat"])
                .with_data(ArrayD::zeros(IxDyn(&[2])))],
            vec![],
        );
        assert!(bad_data.is_err());

        let bad_file = Dataset::new("x", vec![], vec![], vec![File::new("a.nc", &["v"])]);
        assert!(bad_file.is_err());
    }

    #[test]
    fn attributes() {
        let v = Variable::new("rlut", DataType::Float32, &[])
            .with_attribute("positive", "up")
            .with_attribute("valid_min", 0.0)
            .with_attribute("valid_max", "400");
        assert_eq!(v.positive().unwrap(), Some(Positive::Up));
        assert_eq!(v.attribute_f64("valid_max"), Some(400.0));
        assert_eq!(v.units().unwrap(), Unit::dimensionless());
        assert!("NETCDF4_CLASSIC".parse::<FileFormat>().is_ok());
    }
}

//! Arrays with physical meaning: data plus named dimensions, units, positive
//! direction, storage datatype and a name describing how they were computed.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use itertools::Itertools;
use ndarray::{ArrayD, Axis, IxDyn, Zip};

use crate::error::{ConformError, Result};
use crate::index::{Index, Region};
use crate::units::Unit;

/// Storage type of an array. Values are always held as `f64`; the datatype
/// records what they will be written as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum DataType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    Float32,
    #[default]
    Float64,
}

impl DataType {
    fn kind(self) -> u8 {
        match self {
            DataType::Bool => 0,
            DataType::Int8 | DataType::Int16 | DataType::Int32 | DataType::Int64 => 1,
            DataType::Float32 | DataType::Float64 => 2,
        }
    }

    pub fn is_float(self) -> bool {
        self.kind() == 2
    }

    pub fn is_integer(self) -> bool {
        self.kind() == 1
    }

    pub fn promote(self, other: DataType) -> DataType {
        match (self, other) {
            (DataType::Float32, DataType::Int32 | DataType::Int64)
            | (DataType::Int32 | DataType::Int64, DataType::Float32) => DataType::Float64,
            _ => self.max(other),
        }
    }

    /// Same-kind casting: never from floating point to integer or boolean.
    pub fn can_cast(self, to: DataType) -> bool {
        self.kind() <= to.kind()
    }

    /// Round a value to what this datatype can hold.
    pub fn coerce(self, value: f64) -> f64 {
        let int = |min: f64, max: f64| value.trunc().clamp(min, max);
        match self {
            DataType::Bool => (value != 0.0) as u8 as f64,
            DataType::Int8 => int(i8::MIN as f64, i8::MAX as f64),
            DataType::Int16 => int(i16::MIN as f64, i16::MAX as f64),
            DataType::Int32 => int(i32::MIN as f64, i32::MAX as f64),
            DataType::Int64 => int(i64::MIN as f64, i64::MAX as f64),
            DataType::Float32 => value as f32 as f64,
            DataType::Float64 => value,
        }
    }
}

impl FromStr for DataType {
    type Err = ConformError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "double" | "float64" | "f8" | "d" => Ok(DataType::Float64),
            "float" | "float32" | "real" | "f4" | "f" => Ok(DataType::Float32),
            "int64" | "long" => Ok(DataType::Int64),
            "int" | "int32" | "i4" | "i" => Ok(DataType::Int32),
            "short" | "int16" | "i2" | "s" => Ok(DataType::Int16),
            "byte" | "int8" | "i1" | "b" => Ok(DataType::Int8),
            "bool" => Ok(DataType::Bool),
            other => Err(ConformError::Datatype(format!("unknown datatype '{}'", other))),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            DataType::Bool => "bool",
            DataType::Int8 => "byte",
            DataType::Int16 => "short",
            DataType::Int32 => "int",
            DataType::Int64 => "int64",
            DataType::Float32 => "float",
            DataType::Float64 => "double",
        };
        write!(f, "{}", name)
    }
}

/// Direction in which positive values point (CF `positive` attribute).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Positive {
    Up,
    Down,
}

impl Positive {
    pub fn flipped(self) -> Positive {
        match self {
            Positive::Up => Positive::Down,
            Positive::Down => Positive::Up,
        }
    }
}

impl FromStr for Positive {
    type Err = ConformError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "up" => Ok(Positive::Up),
            "down" => Ok(Positive::Down),
            other => Err(ConformError::Argument(format!(
                "positive direction must be 'up' or 'down', not '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for Positive {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Positive::Up => write!(f, "up"),
            Positive::Down => write!(f, "down"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Less,
    Greater,
    LessEqual,
    GreaterEqual,
    Equal,
}

impl Comparison {
    fn symbol(self) -> &'static str {
        match self {
            Comparison::Less => "<",
            Comparison::Greater => ">",
            Comparison::LessEqual => "<=",
            Comparison::GreaterEqual => ">=",
            Comparison::Equal => "==",
        }
    }

    fn test(self, a: f64, b: f64) -> bool {
        match self {
            Comparison::Less => a < b,
            Comparison::Greater => a > b,
            Comparison::LessEqual => a <= b,
            Comparison::GreaterEqual => a >= b,
            Comparison::Equal => a == b,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PhysArray {
    data: ArrayD<f64>,
    dimensions: Vec<String>,
    units: Unit,
    positive: Option<Positive>,
    dtype: DataType,
    name: String,
}

impl PhysArray {
    pub fn new(name: impl Into<String>, data: ArrayD<f64>, dimensions: Vec<String>) -> Result<Self> {
        let name = name.into();
        if data.ndim() != dimensions.len() {
            return Err(ConformError::Dimensions(format!(
                "array '{}' of rank {} cannot have dimensions ({})",
                name,
                data.ndim(),
                dimensions.join(", ")
            )));
        }
        if !dimensions.iter().all_unique() {
            return Err(ConformError::Dimensions(format!(
                "array '{}' has repeated dimensions ({})",
                name,
                dimensions.join(", ")
            )));
        }
        Ok(Self {
            data,
            dimensions,
            units: Unit::dimensionless(),
            positive: None,
            dtype: DataType::Float64,
            name,
        })
    }

    /// A rank-0 array.
    pub fn scalar(name: impl Into<String>, value: f64) -> Self {
        Self {
            data: ArrayD::from_elem(IxDyn(&[]), value),
            dimensions: vec![],
            units: Unit::dimensionless(),
            positive: None,
            dtype: DataType::Float64,
            name: name.into(),
        }
    }

    /// A numeric literal: rank 0, "no unit".
    pub fn literal(value: f64, dtype: DataType, name: impl Into<String>) -> Self {
        Self {
            units: Unit::NoUnit,
            dtype,
            ..Self::scalar(name, value)
        }
    }

    pub fn with_units(mut self, units: Unit) -> Self {
        self.units = units;
        self
    }

    pub fn with_positive(mut self, positive: Option<Positive>) -> Self {
        self.positive = positive;
        self
    }

    pub fn with_dtype(mut self, dtype: DataType) -> Self {
        self.dtype = dtype;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn data(&self) -> &ArrayD<f64> {
        &self.data
    }

    pub fn into_data(self) -> ArrayD<f64> {
        self.data
    }

    pub fn dimensions(&self) -> &[String] {
        &self.dimensions
    }

    pub fn units(&self) -> &Unit {
        &self.units
    }

    pub fn positive(&self) -> Option<Positive> {
        self.positive
    }

    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn rank(&self) -> usize {
        self.data.ndim()
    }

    pub fn scalar_value(&self) -> Option<f64> {
        if self.rank() == 0 {
            self.data.iter().next().copied()
        } else {
            None
        }
    }

    /// The same array with every axis of length zero. Rank-0 arrays keep
    /// their value, since operators such as `**` depend on it.
    pub fn header(&self) -> PhysArray {
        if self.rank() == 0 {
            return self.clone();
        }
        Self {
            data: ArrayD::zeros(IxDyn(&vec![0; self.rank()])),
            ..self.without_data()
        }
    }

    fn without_data(&self) -> Self {
        Self {
            data: ArrayD::zeros(IxDyn(&[])),
            dimensions: self.dimensions.clone(),
            units: self.units.clone(),
            positive: self.positive,
            dtype: self.dtype,
            name: self.name.clone(),
        }
    }

    fn with_data(&self, name: String, data: ArrayD<f64>) -> Self {
        Self {
            data,
            name,
            ..self.without_data()
        }
    }

    pub fn select(&self, region: &Region) -> Result<PhysArray> {
        let data = region.extract(&self.data)?;
        let dimensions = self
            .dimensions
            .iter()
            .zip(region.axes())
            .filter(|(_, a)| !a.is_point())
            .map(|(d, _)| d.clone())
            .collect();
        Ok(Self {
            data,
            dimensions,
            ..self.without_data()
        })
    }

    pub fn subset(&self, index: &Index) -> Result<PhysArray> {
        self.select(&index.resolve(&self.dimensions, self.shape())?)
    }

    pub fn map_values(&self, name: impl Into<String>, f: impl Fn(f64) -> f64) -> PhysArray {
        self.with_data(name.into(), self.data.mapv(f))
    }

    pub fn rename_dimensions(&self, map: &BTreeMap<String, String>) -> Result<PhysArray> {
        let dimensions = self
            .dimensions
            .iter()
            .map(|d| map.get(d).unwrap_or(d).clone())
            .collect_vec();
        if !dimensions.iter().all_unique() {
            return Err(ConformError::Dimensions(format!(
                "renaming ({}) gives repeated dimensions ({})",
                self.dimensions.join(", "),
                dimensions.join(", ")
            )));
        }
        Ok(Self {
            data: self.data.clone(),
            dimensions,
            ..self.without_data()
        })
    }

    pub fn transpose(&self, order: &[String]) -> Result<PhysArray> {
        if order == self.dimensions.as_slice() {
            return Ok(self.clone());
        }
        let axes = order
            .iter()
            .map(|d| self.dimensions.iter().position(|x| x == d))
            .collect::<Option<Vec<_>>>()
            .filter(|axes| axes.len() == self.rank() && axes.iter().all_unique())
            .ok_or_else(|| {
                ConformError::Dimensions(format!(
                    "cannot transpose ({}) to ({})",
                    self.dimensions.join(", "),
                    order.join(", ")
                ))
            })?;
        Ok(Self {
            data: self.data.view().permuted_axes(axes).to_owned(),
            dimensions: order.to_vec(),
            name: format!("transpose({}, to=[{}])", self.name, order.join(", ")),
            ..self.without_data()
        })
    }

    /// Broadcast over the dimensions of `order` this array lacks (sizes from
    /// `sizes`) and transpose to `order`.
    pub fn broadcast_to(&self, order: &[String], sizes: &BTreeMap<String, usize>) -> Result<PhysArray> {
        if let Some(d) = self.dimensions.iter().find(|d| !order.contains(d)) {
            return Err(ConformError::Dimensions(format!(
                "cannot broadcast '{}' with dimension '{}' to ({})",
                self.name,
                d,
                order.join(", ")
            )));
        }
        let missing = order
            .iter()
            .filter(|d| !self.dimensions.contains(d))
            .collect_vec();
        if missing.is_empty() {
            return self.transpose(order);
        }
        let mut data = self.data.clone();
        let mut dimensions = self.dimensions.clone();
        let mut shape = data.shape().to_vec();
        for d in missing {
            let n = *sizes.get(d).ok_or_else(|| {
                ConformError::Dimensions(format!("unknown size of dimension '{}'", d))
            })?;
            data.insert_axis_inplace(Axis(data.ndim()));
            dimensions.push(d.clone());
            shape.push(n);
        }
        let data = data
            .broadcast(IxDyn(&shape))
            .ok_or_else(|| ConformError::Dimensions(format!("cannot broadcast '{}'", self.name)))?
            .to_owned();
        Self {
            data,
            dimensions,
            ..self.without_data()
        }
        .transpose(order)
    }

    pub fn cast(&self, to: DataType) -> Result<PhysArray> {
        if self.dtype == to {
            return Ok(self.clone());
        }
        if !self.dtype.can_cast(to) {
            return Err(ConformError::Datatype(format!(
                "cannot cast '{}' from {} to {}",
                self.name, self.dtype, to
            )));
        }
        Ok(Self {
            dtype: to,
            ..self.map_values(self.name.clone(), |v| to.coerce(v))
        })
    }

    pub fn convert(&self, to: &Unit) -> Result<PhysArray> {
        if &self.units == to {
            return Ok(Self {
                units: to.clone(),
                ..self.clone()
            });
        }
        let (a, b) = self.units.converter(to)?;
        let mut out = self.map_values(format!("convert({}, to={})", self.name, to), |v| a * v + b);
        out.units = to.clone();
        if !out.dtype.is_float() {
            out.dtype = DataType::Float64;
        }
        Ok(out)
    }

    /// Negate values and reverse the positive direction.
    pub fn flip(&self) -> PhysArray {
        let mut out = self.map_values(format!("flip({})", self.name), |v| -v);
        out.positive = self.positive.map(Positive::flipped);
        out
    }

    /// Make the array point in direction `to`, flipping values if it
    /// currently points the other way.
    pub fn set_positive(&self, to: Positive) -> PhysArray {
        match self.positive {
            Some(p) if p != to => {
                let mut out = self.flip();
                out.name = format!("{}({})", to, self.name);
                out
            }
            _ => Self {
                positive: Some(to),
                ..self.clone()
            },
        }
    }

    /// Right operand brought into the left's direction.
    fn match_positive<'a>(&self, other: &'a PhysArray) -> Cow<'a, PhysArray> {
        match (self.positive, other.positive) {
            (Some(a), Some(b)) if a != b => Cow::Owned(other.flip()),
            _ => Cow::Borrowed(other),
        }
    }

    /// Units of an additive result, and the right operand in those units.
    fn match_units<'a>(&self, other: &'a PhysArray) -> Result<(Unit, Cow<'a, PhysArray>)> {
        match (&self.units, &other.units) {
            (Unit::NoUnit, Unit::NoUnit) => Ok((Unit::NoUnit, Cow::Borrowed(other))),
            (Unit::NoUnit, u) | (u, Unit::NoUnit) => {
                let units = if u.is_dimensionless() {
                    u.clone()
                } else {
                    Unit::NoUnit
                };
                Ok((units, Cow::Borrowed(other)))
            }
            (a, b) if a == b => Ok((a.clone(), Cow::Borrowed(other))),
            (a, _) => Ok((a.clone(), Cow::Owned(other.convert(a)?))),
        }
    }

    /// Name of `other` as it enters a combination with `self`: transposed to
    /// the dimension order of `self` when its axes are reordered.
    fn aligned_name(&self, other: &PhysArray) -> String {
        if self.rank() > 0
            && self.rank() == other.rank()
            && self.dimensions != other.dimensions
            && other.dimensions.iter().all(|d| self.dimensions.contains(d))
        {
            format!("transpose({}, to=[{}])", other.name, self.dimensions.join(", "))
        } else {
            other.name.clone()
        }
    }

    /// Elementwise combination after aligning dimensions.
    fn combine(&self, other: &PhysArray, f: impl Fn(f64, f64) -> f64) -> Result<(Vec<String>, ArrayD<f64>)> {
        if let Some(left) = self.scalar_value() {
            return Ok((other.dimensions.clone(), other.data.mapv(|r| f(left, r))));
        }
        let right = if other.rank() == 0 || self.dimensions == other.dimensions {
            other.data.view()
        } else if self.rank() == other.rank()
            && other.dimensions.iter().all(|d| self.dimensions.contains(d))
        {
            let axes = self
                .dimensions
                .iter()
                .filter_map(|d| other.dimensions.iter().position(|x| x == d))
                .collect_vec();
            other.data.view().permuted_axes(axes)
        } else {
            return Err(ConformError::Dimensions(format!(
                "cannot combine '{}' ({}) with '{}' ({})",
                self.name,
                self.dimensions.join(", "),
                other.name,
                other.dimensions.join(", ")
            )));
        };
        let right = right.broadcast(self.data.raw_dim()).ok_or_else(|| {
            ConformError::Dimensions(format!(
                "shape {:?} of '{}' does not match shape {:?} of '{}'",
                other.shape(),
                other.name,
                self.shape(),
                self.name
            ))
        })?;
        let data = Zip::from(&self.data).and(&right).map_collect(|&a, &b| f(a, b));
        Ok((self.dimensions.clone(), data))
    }

    fn additive(&self, other: &PhysArray, symbol: &str, f: impl Fn(f64, f64) -> f64) -> Result<PhysArray> {
        let other = self.match_positive(other);
        let (units, other) = self.match_units(&other)?;
        let (dimensions, data) = self.combine(&other, f)?;
        Ok(PhysArray {
            data,
            dimensions,
            units,
            positive: self.positive,
            dtype: self.dtype.promote(other.dtype),
            name: format!("({}{}{})", self.name, symbol, self.aligned_name(&other)),
        })
    }

    pub fn add(&self, other: &PhysArray) -> Result<PhysArray> {
        self.additive(other, "+", |a, b| a + b)
    }

    pub fn sub(&self, other: &PhysArray) -> Result<PhysArray> {
        self.additive(other, "-", |a, b| a - b)
    }

    pub fn mul(&self, other: &PhysArray) -> Result<PhysArray> {
        let other = self.match_positive(other);
        let (dimensions, data) = self.combine(&other, |a, b| a * b)?;
        Ok(PhysArray {
            data,
            dimensions,
            units: self.units.multiply(&other.units),
            positive: self.positive,
            dtype: self.dtype.promote(other.dtype),
            name: format!("({}*{})", self.name, self.aligned_name(&other)),
        })
    }

    pub fn div(&self, other: &PhysArray) -> Result<PhysArray> {
        let other = self.match_positive(other);
        let (dimensions, data) = self.combine(&other, |a, b| a / b)?;
        Ok(PhysArray {
            data,
            dimensions,
            units: self.units.divide(&other.units),
            positive: self.positive,
            dtype: self.dtype.promote(other.dtype).promote(DataType::Float64),
            name: format!("({}/{})", self.name, self.aligned_name(&other)),
        })
    }

    pub fn pow(&self, exponent: &PhysArray) -> Result<PhysArray> {
        let e = exponent.scalar_value().ok_or_else(|| {
            ConformError::Dimensions(format!("exponent '{}' must be a scalar", exponent.name))
        })?;
        if !(exponent.units.is_no_unit() || exponent.units.is_dimensionless()) {
            return Err(ConformError::Units(format!(
                "exponent '{}' must be dimensionless, not '{}'",
                exponent.name, exponent.units
            )));
        }
        let dtype = if self.dtype.is_integer() && exponent.dtype.is_integer() && e >= 0.0 {
            self.dtype.promote(exponent.dtype)
        } else {
            DataType::Float64
        };
        Ok(PhysArray {
            units: self.units.powf(e)?,
            dtype,
            ..self.map_values(format!("({}**{})", self.name, exponent.name), |v| v.powf(e))
        })
    }

    pub fn neg(&self) -> PhysArray {
        self.map_values(format!("(-{})", self.name), |v| -v)
    }

    pub fn compare(&self, other: &PhysArray, op: Comparison) -> Result<PhysArray> {
        let (_, other) = self.match_units(other)?;
        let (dimensions, data) = self.combine(&other, |a, b| op.test(a, b) as u8 as f64)?;
        Ok(PhysArray {
            data,
            dimensions,
            units: Unit::dimensionless(),
            positive: None,
            dtype: DataType::Bool,
            name: format!("({}{}{})", self.name, op.symbol(), self.aligned_name(&other)),
        })
    }

    pub fn minimum(&self, other: &PhysArray) -> Result<PhysArray> {
        Ok(self
            .additive(other, ",", f64::min)?
            .with_name(format!("min({},{})", self.name, self.aligned_name(other))))
    }

    pub fn maximum(&self, other: &PhysArray) -> Result<PhysArray> {
        Ok(self
            .additive(other, ",", f64::max)?
            .with_name(format!("max({},{})", self.name, self.aligned_name(other))))
    }

    /// Average over the named dimensions, removing them.
    pub fn mean_over(&self, dims: &[String]) -> Result<PhysArray> {
        let mut axes = dims
            .iter()
            .map(|d| {
                self.dimensions.iter().position(|x| x == d).ok_or_else(|| {
                    ConformError::Dimensions(format!(
                        "'{}' has no dimension '{}' to average over",
                        self.name, d
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        axes.sort_unstable();
        axes.dedup();
        let mut data = self.data.clone();
        for &axis in axes.iter().rev() {
            let n = data.len_of(Axis(axis)) as f64;
            data = data.sum_axis(Axis(axis)) / n;
        }
        let dimensions = self
            .dimensions
            .iter()
            .enumerate()
            .filter(|(i, _)| !axes.contains(i))
            .map(|(_, d)| d.clone())
            .collect();
        Ok(PhysArray {
            data,
            dimensions,
            dtype: self.dtype.promote(DataType::Float64),
            name: format!(
                "mean({}, {})",
                self.name,
                dims.iter().map(|d| format!("'{}'", d)).join(", ")
            ),
            ..self.without_data()
        })
    }
}

impl fmt::Display for PhysArray {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}({}) [{}]",
            self.name,
            self.dimensions.join(", "),
            self.units
        )?;
        if let Some(p) = self.positive {
            write!(f, " positive={}", p)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::Selector;
    use approx::assert_relative_eq;
    use ndarray::{arr1, arr2};

    fn array(name: &str, data: ArrayD<f64>, dims: &[&str], units: &str) -> PhysArray {
        PhysArray::new(name, data, dims.iter().map(|d| d.to_string()).collect())
            .unwrap()
            .with_units(Unit::parse(units).unwrap())
    }

    #[test]
    fn divide_units() {
        let m = array("m", arr1(&[2.0, 4.0]).into_dyn(), &["x"], "m");
        let s = array("s", arr1(&[1.0, 2.0]).into_dyn(), &["x"], "s");
        let v = m.div(&s).unwrap();
        assert_eq!(v.units().to_string(), "m/s");
        assert_eq!(v.name(), "(m/s)");
        assert_eq!(v.data(), &arr1(&[2.0, 2.0]).into_dyn());
    }

    #[test]
    fn add_converts_right_operand() {
        let a = array("a", arr1(&[1.0, 2.0]).into_dyn(), &["x"], "kg");
        let b = array("b", arr1(&[500.0, 250.0]).into_dyn(), &["x"], "g");
        let c = a.add(&b).unwrap();
        assert_eq!(c.units(), &Unit::parse("kg").unwrap());
        assert_relative_eq!(c.data()[[0]], 1.5);
        assert_relative_eq!(c.data()[[1]], 2.25);
        assert_eq!(c.name(), "(a+convert(b, to=kg))");
    }

    #[test]
    fn add_incompatible_units() {
        let a = array("a", arr1(&[1.0]).into_dyn(), &["x"], "kg");
        let b = array("b", arr1(&[1.0]).into_dyn(), &["x"], "m");
        assert!(matches!(a.add(&b), Err(ConformError::Units(_))));
    }

    #[test]
    fn literal_units() {
        let t = array("T", arr1(&[300.0]).into_dyn(), &["x"], "K");
        let c = PhysArray::literal(273.15, DataType::Float64, "273.15");
        let diff = t.sub(&c).unwrap();
        assert!(diff.units().is_no_unit());
        assert_eq!(diff.name(), "(T-273.15)");
        let scaled = t.mul(&PhysArray::literal(2.0, DataType::Int64, "2")).unwrap();
        assert_eq!(scaled.units(), &Unit::parse("K").unwrap());
        let inverse = PhysArray::literal(1.0, DataType::Int64, "1").div(&t).unwrap();
        assert_eq!(inverse.units(), &Unit::parse("K-1").unwrap());
        assert_eq!(inverse.dimensions(), &["x".to_string()]);
    }

    #[test]
    fn transposes_right_operand() {
        let a = array("a", arr2(&[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]).into_dyn(), &["y", "x"], "1");
        let b = array("b", arr2(&[[1.0, 4.0], [2.0, 5.0], [3.0, 6.0]]).into_dyn(), &["x", "y"], "1");
        let c = a.sub(&b).unwrap();
        assert_eq!(c.dimensions(), &["y".to_string(), "x".to_string()]);
        assert!(c.data().iter().all(|v| *v == 0.0));
        assert_eq!(c.name(), "(a-transpose(b, to=[y, x]))");
        assert_eq!(a.mul(&b).unwrap().name(), "(a*transpose(b, to=[y, x]))");
        assert_eq!(a.maximum(&b).unwrap().name(), "max(a,transpose(b, to=[y, x]))");
        assert_eq!(a.add(&a).unwrap().name(), "(a+a)");

        let z = array("z", arr1(&[1.0, 2.0]).into_dyn(), &["z"], "1");
        assert!(matches!(a.add(&z), Err(ConformError::Dimensions(_))));
    }

    #[test]
    fn positive_direction() {
        let up = array("up", arr1(&[1.0, 2.0]).into_dyn(), &["x"], "W m-2")
            .with_positive(Some(Positive::Up));
        let down = array("down", arr1(&[1.0, 1.0]).into_dyn(), &["x"], "W m-2")
            .with_positive(Some(Positive::Down));
        let sum = up.add(&down).unwrap();
        assert_eq!(sum.positive(), Some(Positive::Up));
        assert_eq!(sum.data(), &arr1(&[0.0, 1.0]).into_dyn());
        assert_eq!(sum.name(), "(up+flip(down))");

        let flipped = up.set_positive(Positive::Down);
        assert_eq!(flipped.positive(), Some(Positive::Down));
        assert_eq!(flipped.data(), &arr1(&[-1.0, -2.0]).into_dyn());
        assert_eq!(flipped.name(), "down(up)");
    }

    #[test]
    fn power() {
        let x = array("x", arr1(&[2.0, 3.0]).into_dyn(), &["x"], "m");
        let sq = x.pow(&PhysArray::literal(2.0, DataType::Int64, "2")).unwrap();
        assert_eq!(sq.units(), &Unit::parse("m2").unwrap());
        assert_eq!(sq.data(), &arr1(&[4.0, 9.0]).into_dyn());
        assert!(matches!(x.pow(&x), Err(ConformError::Dimensions(_))));
        let metres = PhysArray::scalar("two", 2.0).with_units(Unit::parse("m").unwrap());
        assert!(matches!(x.pow(&metres), Err(ConformError::Units(_))));
    }

    #[test]
    fn comparison_is_dimensionless() {
        let x = array("x", arr1(&[1.0, 5.0]).into_dyn(), &["x"], "K");
        let gt = x.compare(&PhysArray::literal(4.0, DataType::Int64, "4"), Comparison::Greater).unwrap();
        assert!(gt.units().is_dimensionless());
        assert_eq!(gt.dtype(), DataType::Bool);
        assert_eq!(gt.data(), &arr1(&[0.0, 1.0]).into_dyn());
    }

    #[test]
    fn casting() {
        let x = array("x", arr1(&[1.7, -2.5]).into_dyn(), &["x"], "1");
        let ints = x.cast(DataType::Int32);
        assert!(matches!(ints, Err(ConformError::Datatype(_))));
        let f = x.cast(DataType::Float32).unwrap();
        assert_eq!(f.dtype(), DataType::Float32);
        let i = PhysArray::literal(3.0, DataType::Int32, "3").cast(DataType::Float64).unwrap();
        assert_eq!(i.scalar_value(), Some(3.0));
        assert_eq!("short".parse::<DataType>().unwrap(), DataType::Int16);
    }

    #[test]
    fn broadcast_and_mean() {
        let x = array("x", arr1(&[1.0, 3.0]).into_dyn(), &["lat"], "K");
        let mut sizes = BTreeMap::new();
        sizes.insert("time".to_string(), 3);
        let order = vec!["time".to_string(), "lat".to_string()];
        let b = x.broadcast_to(&order, &sizes).unwrap();
        assert_eq!(b.shape(), &[3, 2]);
        assert_eq!(b.data()[[2, 1]], 3.0);
        let m = b.mean_over(&["lat".to_string()]).unwrap();
        assert_eq!(m.dimensions(), &["time".to_string()]);
        assert_relative_eq!(m.data()[[0]], 2.0);
    }

    #[test]
    fn subset_and_header() {
        let x = array("x", arr2(&[[1.0, 2.0], [3.0, 4.0]]).into_dyn(), &["t", "y"], "1");
        let row = x.subset(&Index::all().with("t", Selector::At(1))).unwrap();
        assert_eq!(row.dimensions(), &["y".to_string()]);
        assert_eq!(row.data(), &arr1(&[3.0, 4.0]).into_dyn());
        let header = x.header();
        assert_eq!(header.shape(), &[0, 0]);
        assert_eq!(header.dimensions(), x.dimensions());
    }
}

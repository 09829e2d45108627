//! Operators and named functions callable from definitions.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use itertools::Itertools;

use crate::ast::Symbol;
use crate::error::{ConformError, Result};
use crate::index::Index;
use crate::physarray::{Comparison, DataType, PhysArray, Positive};
use crate::units::Unit;

/// A value passed to a function: an evaluated array or a string literal.
#[derive(Debug, Clone)]
pub enum Argument {
    Array(PhysArray),
    Str(String),
}

impl Argument {
    pub fn as_array(&self) -> Result<&PhysArray> {
        match self {
            Argument::Array(a) => Ok(a),
            Argument::Str(s) => Err(ConformError::Argument(format!(
                "expected an array, found string '{}'",
                s
            ))),
        }
    }

    pub fn as_str(&self) -> Result<&str> {
        match self {
            Argument::Str(s) => Ok(s),
            Argument::Array(a) => Err(ConformError::Argument(format!(
                "expected a string, found array '{}'",
                a.name()
            ))),
        }
    }
}

pub trait Function: Send + Sync {
    fn name(&self) -> &str;

    /// Minimum and (if bounded) maximum number of positional arguments.
    fn arity(&self) -> (usize, Option<usize>);

    /// Keyword arguments accepted.
    fn keywords(&self) -> &[&str] {
        &[]
    }

    /// The index positional argument `position` must be evaluated over so
    /// that the result covers `index`. `literals` holds the string literal
    /// positional arguments.
    fn argument_index(&self, _position: usize, index: &Index, _literals: &[Option<&str>]) -> Index {
        index.clone()
    }

    /// The index keyword argument `keyword` must be evaluated over, as
    /// [`Function::argument_index`] does for positional ones.
    fn keyword_index(&self, _keyword: &str, index: &Index, _literals: &[Option<&str>]) -> Index {
        index.clone()
    }

    fn call(&self, args: &[Argument], kwargs: &BTreeMap<String, Argument>) -> Result<PhysArray>;
}

fn array_args<'a, const N: usize>(name: &str, args: &'a [Argument]) -> Result<[&'a PhysArray; N]> {
    let arrays = args.iter().map(Argument::as_array).collect::<Result<Vec<_>>>()?;
    arrays.try_into().map_err(|arrays: Vec<_>| {
        ConformError::Argument(format!("{} takes {} argument(s), got {}", name, N, arrays.len()))
    })
}

fn keyword<'a>(kwargs: &'a BTreeMap<String, Argument>, key: &str) -> Option<&'a Argument> {
    kwargs.get(key)
}

fn required_str<'a>(name: &str, kwargs: &'a BTreeMap<String, Argument>, key: &str) -> Result<&'a str> {
    keyword(kwargs, key)
        .ok_or_else(|| ConformError::Argument(format!("{} requires keyword '{}'", name, key)))?
        .as_str()
}

pub struct BinaryOperator {
    symbol: Symbol,
}

impl BinaryOperator {
    pub fn new(symbol: Symbol) -> Self {
        Self { symbol }
    }
}

impl Function for BinaryOperator {
    fn name(&self) -> &str {
        self.symbol.as_str()
    }

    fn arity(&self) -> (usize, Option<usize>) {
        (2, Some(2))
    }

    fn call(&self, args: &[Argument], _kwargs: &BTreeMap<String, Argument>) -> Result<PhysArray> {
        let [a, b] = array_args(self.name(), args)?;
        match self.symbol {
            Symbol::Add => a.add(b),
            Symbol::Sub => a.sub(b),
            Symbol::Mul => a.mul(b),
            Symbol::Div => a.div(b),
            Symbol::Pow => a.pow(b),
            Symbol::Less => a.compare(b, Comparison::Less),
            Symbol::Greater => a.compare(b, Comparison::Greater),
            Symbol::LessEqual => a.compare(b, Comparison::LessEqual),
            Symbol::GreaterEqual => a.compare(b, Comparison::GreaterEqual),
            Symbol::Equal => a.compare(b, Comparison::Equal),
        }
    }
}

pub struct Negation;

impl Function for Negation {
    fn name(&self) -> &str {
        "-"
    }

    fn arity(&self) -> (usize, Option<usize>) {
        (1, Some(1))
    }

    fn call(&self, args: &[Argument], _kwargs: &BTreeMap<String, Argument>) -> Result<PhysArray> {
        let [x] = array_args(self.name(), args)?;
        Ok(x.neg())
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum MathKind {
    /// Takes an angle, returns a pure number.
    Trig,
    /// Returns an angle in radians.
    InverseTrig,
    Plain,
}

const UNARY_MATH: &[(&str, MathKind, fn(f64) -> f64)] = &[
    ("exp", MathKind::Plain, f64::exp),
    ("log", MathKind::Plain, f64::ln),
    ("log10", MathKind::Plain, f64::log10),
    ("sinh", MathKind::Plain, f64::sinh),
    ("cosh", MathKind::Plain, f64::cosh),
    ("tanh", MathKind::Plain, f64::tanh),
    ("sin", MathKind::Trig, f64::sin),
    ("cos", MathKind::Trig, f64::cos),
    ("tan", MathKind::Trig, f64::tan),
    ("arcsin", MathKind::InverseTrig, f64::asin),
    ("arccos", MathKind::InverseTrig, f64::acos),
    ("arctan", MathKind::InverseTrig, f64::atan),
];

/// Elementwise transcendental function.
pub struct UnaryMath {
    name: &'static str,
    kind: MathKind,
    f: fn(f64) -> f64,
}

impl Function for UnaryMath {
    fn name(&self) -> &str {
        self.name
    }

    fn arity(&self) -> (usize, Option<usize>) {
        (1, Some(1))
    }

    fn call(&self, args: &[Argument], _kwargs: &BTreeMap<String, Argument>) -> Result<PhysArray> {
        let [x] = array_args(self.name, args)?;
        let is_angle = x.units().physical().is_some_and(|u| u.dimensions().is_angle());
        let x = if self.kind == MathKind::Trig && is_angle {
            x.convert(&Unit::parse("rad")?)?
        } else if x.units().is_no_unit() || x.units().is_dimensionless() {
            x.clone()
        } else {
            return Err(ConformError::Units(format!(
                "{} requires a dimensionless argument, '{}' has units '{}'",
                self.name,
                x.name(),
                x.units()
            )));
        };
        let units = match self.kind {
            MathKind::InverseTrig => Unit::parse("rad")?,
            _ if x.units().is_no_unit() => Unit::NoUnit,
            _ => Unit::dimensionless(),
        };
        Ok(x.map_values(format!("{}({})", self.name, x.name()), self.f)
            .with_units(units)
            .with_positive(None)
            .with_dtype(x.dtype().promote(DataType::Float64)))
    }
}

pub struct SquareRoot;

impl Function for SquareRoot {
    fn name(&self) -> &str {
        "sqrt"
    }

    fn arity(&self) -> (usize, Option<usize>) {
        (1, Some(1))
    }

    fn call(&self, args: &[Argument], _kwargs: &BTreeMap<String, Argument>) -> Result<PhysArray> {
        let [x] = array_args(self.name(), args)?;
        Ok(x.map_values(format!("sqrt({})", x.name()), f64::sqrt)
            .with_units(x.units().root(2)?)
            .with_dtype(x.dtype().promote(DataType::Float64)))
    }
}

pub struct Absolute;

impl Function for Absolute {
    fn name(&self) -> &str {
        "abs"
    }

    fn arity(&self) -> (usize, Option<usize>) {
        (1, Some(1))
    }

    fn call(&self, args: &[Argument], _kwargs: &BTreeMap<String, Argument>) -> Result<PhysArray> {
        let [x] = array_args(self.name(), args)?;
        Ok(x.map_values(format!("abs({})", x.name()), f64::abs))
    }
}

/// `mean(x, "dim", ...)`: average over the named dimensions.
pub struct Mean;

impl Function for Mean {
    fn name(&self) -> &str {
        "mean"
    }

    fn arity(&self) -> (usize, Option<usize>) {
        (2, None)
    }

    fn argument_index(&self, position: usize, index: &Index, literals: &[Option<&str>]) -> Index {
        if position != 0 {
            return index.clone();
        }
        let dims = literals.iter().skip(1).flatten().copied().collect_vec();
        index.without(&dims)
    }

    fn call(&self, args: &[Argument], _kwargs: &BTreeMap<String, Argument>) -> Result<PhysArray> {
        let x = args[0].as_array()?;
        let dims = args[1..]
            .iter()
            .map(|a| a.as_str().map(str::to_string))
            .collect::<Result<Vec<_>>>()?;
        x.mean_over(&dims)
    }
}

/// `chunits(x, units=..., calendar=...)`: replace units without converting.
pub struct ChangeUnits;

impl Function for ChangeUnits {
    fn name(&self) -> &str {
        "chunits"
    }

    fn arity(&self) -> (usize, Option<usize>) {
        (1, Some(1))
    }

    fn keywords(&self) -> &[&str] {
        &["units", "calendar"]
    }

    fn call(&self, args: &[Argument], kwargs: &BTreeMap<String, Argument>) -> Result<PhysArray> {
        let [x] = array_args(self.name(), args)?;
        let text = required_str(self.name(), kwargs, "units")?;
        let calendar = match keyword(kwargs, "calendar") {
            Some(c) => Some(c.as_str()?),
            None => x.units().calendar(),
        };
        let units = Unit::parse_with_calendar(text, calendar)?;
        Ok(x.clone()
            .with_name(format!("chunits({}, units={})", x.name(), units))
            .with_units(units))
    }
}

/// `convert(x, units=...)`
pub struct ConvertUnits;

impl Function for ConvertUnits {
    fn name(&self) -> &str {
        "convert"
    }

    fn arity(&self) -> (usize, Option<usize>) {
        (1, Some(1))
    }

    fn keywords(&self) -> &[&str] {
        &["units"]
    }

    fn call(&self, args: &[Argument], kwargs: &BTreeMap<String, Argument>) -> Result<PhysArray> {
        let [x] = array_args(self.name(), args)?;
        let text = required_str(self.name(), kwargs, "units")?;
        x.convert(&Unit::parse_with_calendar(text, x.units().calendar())?)
    }
}

/// `limit(x, below=..., above=...)`: clip values into a range.
pub struct Limit;

impl Limit {
    fn bound(x: &PhysArray, kwargs: &BTreeMap<String, Argument>, key: &str) -> Result<Option<f64>> {
        let Some(arg) = keyword(kwargs, key) else {
            return Ok(None);
        };
        let bound = arg.as_array()?;
        let value = bound.scalar_value().ok_or_else(|| {
            ConformError::Argument(format!("limit: '{}' must be a scalar", key))
        })?;
        if bound.units().is_no_unit() || x.units().is_no_unit() {
            return Ok(Some(value));
        }
        bound.units().convert_value(value, x.units()).map(Some)
    }
}

impl Function for Limit {
    fn name(&self) -> &str {
        "limit"
    }

    fn arity(&self) -> (usize, Option<usize>) {
        (1, Some(1))
    }

    fn keywords(&self) -> &[&str] {
        &["below", "above"]
    }

    fn call(&self, args: &[Argument], kwargs: &BTreeMap<String, Argument>) -> Result<PhysArray> {
        let [x] = array_args(self.name(), args)?;
        let below = Self::bound(x, kwargs, "below")?;
        let above = Self::bound(x, kwargs, "above")?;
        let mut name = format!("limit({}", x.name());
        if let Some(b) = below {
            name.push_str(&format!(", below={}", b));
        }
        if let Some(a) = above {
            name.push_str(&format!(", above={}", a));
        }
        name.push(')');
        Ok(x.map_values(name, |v| {
            let v = below.map_or(v, |b| v.max(b));
            above.map_or(v, |a| v.min(a))
        }))
    }
}

/// `up(x)` / `down(x)`
pub struct SetPositive {
    direction: Positive,
    name: &'static str,
}

impl Function for SetPositive {
    fn name(&self) -> &str {
        self.name
    }

    fn arity(&self) -> (usize, Option<usize>) {
        (1, Some(1))
    }

    fn call(&self, args: &[Argument], _kwargs: &BTreeMap<String, Argument>) -> Result<PhysArray> {
        let [x] = array_args(self.name, args)?;
        Ok(x.set_positive(self.direction))
    }
}

/// `rename(x, "old", "new")`: rename a dimension.
pub struct RenameDimension;

impl Function for RenameDimension {
    fn name(&self) -> &str {
        "rename"
    }

    fn arity(&self) -> (usize, Option<usize>) {
        (3, Some(3))
    }

    fn argument_index(&self, position: usize, index: &Index, literals: &[Option<&str>]) -> Index {
        match (position, literals.get(1).copied().flatten(), literals.get(2).copied().flatten()) {
            (0, Some(old), Some(new)) => {
                index.rename(&BTreeMap::from([(new.to_string(), old.to_string())]))
            }
            _ => index.clone(),
        }
    }

    fn call(&self, args: &[Argument], _kwargs: &BTreeMap<String, Argument>) -> Result<PhysArray> {
        let x = args[0].as_array()?;
        let (old, new) = (args[1].as_str()?, args[2].as_str()?);
        if !x.dimensions().iter().any(|d| d == old) {
            return Err(ConformError::Dimensions(format!(
                "'{}' has no dimension '{}' to rename",
                x.name(),
                old
            )));
        }
        let renamed = x.rename_dimensions(&BTreeMap::from([(old.to_string(), new.to_string())]))?;
        Ok(renamed.with_name(format!("rename({}, '{}', '{}')", x.name(), old, new)))
    }
}

/// `min(x, y)` / `max(x, y)`
pub struct Extremum {
    largest: bool,
}

impl Function for Extremum {
    fn name(&self) -> &str {
        if self.largest {
            "max"
        } else {
            "min"
        }
    }

    fn arity(&self) -> (usize, Option<usize>) {
        (2, Some(2))
    }

    fn call(&self, args: &[Argument], _kwargs: &BTreeMap<String, Argument>) -> Result<PhysArray> {
        let [a, b] = array_args(self.name(), args)?;
        if self.largest {
            a.maximum(b)
        } else {
            a.minimum(b)
        }
    }
}

/// Operators by symbol and arity, and functions by name.
#[derive(Default, Clone)]
pub struct FunctionRegistry {
    operators: HashMap<(Symbol, usize), Arc<dyn Function>>,
    functions: HashMap<String, Arc<dyn Function>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The operators and functions every definition can use.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for symbol in [
            Symbol::Add,
            Symbol::Sub,
            Symbol::Mul,
            Symbol::Div,
            Symbol::Pow,
            Symbol::Less,
            Symbol::Greater,
            Symbol::LessEqual,
            Symbol::GreaterEqual,
            Symbol::Equal,
        ] {
            registry.register_operator(symbol, 2, Arc::new(BinaryOperator::new(symbol)));
        }
        registry.register_operator(Symbol::Sub, 1, Arc::new(Negation));
        for &(name, kind, f) in UNARY_MATH {
            registry.register(Arc::new(UnaryMath { name, kind, f }));
        }
        registry.register(Arc::new(SquareRoot));
        registry.register(Arc::new(Absolute));
        registry.register(Arc::new(Mean));
        registry.register(Arc::new(ChangeUnits));
        registry.register(Arc::new(ConvertUnits));
        registry.register(Arc::new(Limit));
        registry.register(Arc::new(SetPositive {
            direction: Positive::Up,
            name: "up",
        }));
        registry.register(Arc::new(SetPositive {
            direction: Positive::Down,
            name: "down",
        }));
        registry.register(Arc::new(RenameDimension));
        registry.register(Arc::new(Extremum { largest: false }));
        registry.register(Arc::new(Extremum { largest: true }));
        registry
    }

    /// Register a named function, replacing any previous one of that name.
    pub fn register(&mut self, function: Arc<dyn Function>) {
        self.functions.insert(function.name().to_string(), function);
    }

    pub fn register_operator(&mut self, symbol: Symbol, arity: usize, function: Arc<dyn Function>) {
        self.operators.insert((symbol, arity), function);
    }

    pub fn operator(&self, symbol: Symbol, arity: usize) -> Result<Arc<dyn Function>> {
        self.operators
            .get(&(symbol, arity))
            .cloned()
            .ok_or_else(|| ConformError::UndefinedFunction {
                name: symbol.to_string(),
                arity,
            })
    }

    /// Look up `name` called with `nargs` positional arguments.
    pub fn function(&self, name: &str, nargs: usize) -> Result<Arc<dyn Function>> {
        self.functions
            .get(name)
            .filter(|f| {
                let (min, max) = f.arity();
                nargs >= min && max.map_or(true, |max| nargs <= max)
            })
            .cloned()
            .ok_or_else(|| ConformError::UndefinedFunction {
                name: name.to_string(),
                arity: nargs,
            })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str).sorted()
    }
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field(
                "operators",
                &self
                    .operators
                    .keys()
                    .map(|(s, n)| format!("{}/{}", s, n))
                    .sorted()
                    .collect_vec(),
            )
            .field("functions", &self.names().collect_vec())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{arr1, arr2};

    fn array(name: &str, values: &[f64], units: &str) -> Argument {
        Argument::Array(
            PhysArray::new(name, arr1(values).into_dyn(), vec!["x".to_string()])
                .unwrap()
                .with_units(Unit::parse(units).unwrap()),
        )
    }

    fn call(name: &str, args: Vec<Argument>, kwargs: Vec<(&str, Argument)>) -> Result<PhysArray> {
        let registry = FunctionRegistry::builtin();
        let f = registry.function(name, args.len())?;
        let kwargs = kwargs.into_iter().map(|(k, v)| (k.to_string(), v)).collect();
        f.call(&args, &kwargs)
    }

    #[test]
    fn lookup() {
        let registry = FunctionRegistry::builtin();
        assert!(registry.operator(Symbol::Sub, 1).is_ok());
        assert!(matches!(
            registry.operator(Symbol::Mul, 1),
            Err(ConformError::UndefinedFunction { .. })
        ));
        assert!(registry.function("mean", 3).is_ok());
        assert!(registry.function("mean", 1).is_err());
        assert!(registry.function("sqrt", 2).is_err());
        assert!(registry.function("nope", 1).is_err());
        assert!(format!("{:?}", registry).contains("chunits"));
    }

    #[test]
    fn array_argument_count() {
        let args = vec![array("a", &[1.0], "m"), array("b", &[2.0], "m")];
        let [a, b] = array_args::<2>("pair", &args).unwrap();
        assert_eq!((a.name(), b.name()), ("a", "b"));
        assert!(matches!(array_args::<1>("one", &args), Err(ConformError::Argument(_))));
        let mixed = vec![array("a", &[1.0], "m"), Argument::Str("x".into())];
        assert!(array_args::<2>("pair", &mixed).is_err());
    }

    #[test]
    fn sqrt_halves_units() {
        let out = call("sqrt", vec![array("a", &[4.0, 9.0], "m2 s-2")], vec![]).unwrap();
        assert_eq!(out.units(), &Unit::parse("m/s").unwrap());
        assert_eq!(out.data(), &arr1(&[2.0, 3.0]).into_dyn());
        assert!(call("sqrt", vec![array("a", &[4.0], "m")], vec![]).is_err());
    }

    #[test]
    fn math_requires_dimensionless() {
        assert!(matches!(
            call("exp", vec![array("a", &[1.0], "K")], vec![]),
            Err(ConformError::Units(_))
        ));
        let out = call("sin", vec![array("lat", &[90.0], "degrees")], vec![]).unwrap();
        assert_relative_eq!(out.data()[[0]], 1.0, epsilon = 1e-12);
        assert!(out.units().is_dimensionless());
    }

    #[test]
    fn change_and_convert() {
        let kg = array("m", &[1.5], "kg");
        let out = call("convert", vec![kg.clone()], vec![("units", Argument::Str("g".into()))]).unwrap();
        assert_relative_eq!(out.data()[[0]], 1500.0);
        let out = call("chunits", vec![kg], vec![("units", Argument::Str("m".into()))]).unwrap();
        assert_eq!(out.data()[[0]], 1.5);
        assert_eq!(out.units(), &Unit::parse("m").unwrap());
        let days = call(
            "chunits",
            vec![array("t", &[0.0], "1")],
            vec![
                ("units", Argument::Str("days since 2000-01-01".into())),
                ("calendar", Argument::Str("noleap".into())),
            ],
        )
        .unwrap();
        assert_eq!(days.units().calendar(), Some("noleap"));
        assert!(call("convert", vec![array("x", &[1.0], "kg")], vec![]).is_err());
    }

    #[test]
    fn limit_clips() {
        let below = Argument::Array(PhysArray::literal(0.0, DataType::Int64, "0"));
        let above = Argument::Array(PhysArray::scalar("cap", 0.002).with_units(Unit::parse("kg").unwrap()));
        let out = call(
            "limit",
            vec![array("pr", &[-1.0, 1.0, 5.0], "g")],
            vec![("below", below), ("above", above)],
        )
        .unwrap();
        assert_eq!(out.data(), &arr1(&[0.0, 1.0, 2.0]).into_dyn());
    }

    #[test]
    fn mean_widens_request() {
        let registry = FunctionRegistry::builtin();
        let mean = registry.function("mean", 2).unwrap();
        let index = Index::all()
            .with("lat", crate::index::Selector::At(0))
            .with("time", crate::index::Selector::range(0, 2));
        let arg_index = mean.argument_index(0, &index, &[None, Some("lat")]);
        assert_eq!(arg_index.get("lat"), crate::index::Selector::ALL);
        assert_eq!(arg_index.get("time"), crate::index::Selector::range(0, 2));

        let x = PhysArray::new(
            "x",
            arr2(&[[1.0, 3.0], [5.0, 7.0]]).into_dyn(),
            vec!["time".to_string(), "lat".to_string()],
        )
        .unwrap();
        let out = mean
            .call(&[Argument::Array(x), Argument::Str("lat".into())], &BTreeMap::new())
            .unwrap();
        assert_eq!(out.data(), &arr1(&[2.0, 6.0]).into_dyn());
        assert_eq!(out.name(), "mean(x, 'lat')");
    }

    #[test]
    fn rename_and_positive() {
        let out = call(
            "rename",
            vec![array("a", &[1.0], "1"), Argument::Str("x".into()), Argument::Str("y".into())],
            vec![],
        )
        .unwrap();
        assert_eq!(out.dimensions(), &["y".to_string()]);
        let rename = FunctionRegistry::builtin().function("rename", 3).unwrap();
        let index = Index::all().with("y", crate::index::Selector::At(0));
        let arg_index = rename.argument_index(0, &index, &[None, Some("x"), Some("y")]);
        assert_eq!(arg_index.get("x"), crate::index::Selector::At(0));

        let up = call("up", vec![array("f", &[1.0], "W m-2")], vec![]).unwrap();
        let down = call("down", vec![Argument::Array(up)], vec![]).unwrap();
        assert_eq!(down.positive(), Some(Positive::Down));
        assert_eq!(down.data()[[0]], -1.0);

        let low = call("min", vec![array("a", &[1.0, 5.0], "kg"), array("b", &[2000.0, 2000.0], "g")], vec![])
            .unwrap();
        assert_eq!(low.data(), &arr1(&[1.0, 2.0]).into_dyn());
    }
}

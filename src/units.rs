//! Physical units.
//!
//! A [`Unit`] is either the CF "no unit" marker carried by numeric literals,
//! or a physical unit: integer exponents of the SI base dimensions, a scale
//! factor and offset relating it to the SI base unit (`si = (v + offset) *
//! scale`), and for time units an optional reference (`days since
//! 1850-01-01`, plus calendar).
//!
//! Parsing understands the UDUNITS/CF forms found in climate metadata:
//! products separated by spaces or `*`, division with `/`, exponents written
//! `m2`, `s-1`, `m^2` or `m**2`, parentheses, SI prefixes, bare numeric
//! factors, and the common aliases (`degC`, `degrees_north`, `hPa`, ...).

use std::f64::consts::PI;
use std::fmt;

use crate::error::{ConformError, Result};

/// Exponents of the SI base dimensions (plus plane angle, tracked apart).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Dimensions {
    pub length: i8,
    pub mass: i8,
    pub time: i8,
    pub current: i8,
    pub temperature: i8,
    pub amount: i8,
    pub luminosity: i8,
    pub angle: i8,
}

impl Dimensions {
    pub const NONE: Dimensions = Dimensions {
        length: 0,
        mass: 0,
        time: 0,
        current: 0,
        temperature: 0,
        amount: 0,
        luminosity: 0,
        angle: 0,
    };

    fn exponents(&self) -> [i8; 8] {
        [
            self.length,
            self.mass,
            self.time,
            self.current,
            self.temperature,
            self.amount,
            self.luminosity,
            self.angle,
        ]
    }

    fn from_exponents(e: [i8; 8]) -> Self {
        Dimensions {
            length: e[0],
            mass: e[1],
            time: e[2],
            current: e[3],
            temperature: e[4],
            amount: e[5],
            luminosity: e[6],
            angle: e[7],
        }
    }

    fn zip_with(&self, other: &Dimensions, f: impl Fn(i8, i8) -> i8) -> Dimensions {
        let (a, b) = (self.exponents(), other.exponents());
        Self::from_exponents(std::array::from_fn(|i| f(a[i], b[i])))
    }

    pub fn multiply(&self, other: &Dimensions) -> Dimensions {
        self.zip_with(other, |a, b| a + b)
    }

    pub fn divide(&self, other: &Dimensions) -> Dimensions {
        self.zip_with(other, |a, b| a - b)
    }

    pub fn powi(&self, n: i8) -> Dimensions {
        self.zip_with(&Dimensions::NONE, |a, _| a * n)
    }

    pub fn root(&self, n: i8) -> Option<Dimensions> {
        let e = self.exponents();
        if e.iter().any(|x| x % n != 0) {
            return None;
        }
        Some(Self::from_exponents(e.map(|x| x / n)))
    }

    pub fn is_none(&self) -> bool {
        *self == Dimensions::NONE
    }

    pub fn is_angle(&self) -> bool {
        self.angle != 0 && Dimensions { angle: 0, ..*self }.is_none()
    }

    pub fn is_time(&self) -> bool {
        *self
            == Dimensions {
                time: 1,
                ..Dimensions::NONE
            }
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        const SYMBOLS: [&str; 8] = ["m", "kg", "s", "A", "K", "mol", "cd", "rad"];
        let parts = self
            .exponents()
            .iter()
            .zip(SYMBOLS)
            .filter(|(e, _)| **e != 0)
            .map(|(e, s)| if *e == 1 { s.to_string() } else { format!("{}{}", s, e) })
            .collect::<Vec<_>>();
        if parts.is_empty() {
            write!(f, "1")
        } else {
            write!(f, "{}", parts.join(" "))
        }
    }
}

/// Origin of a time axis, as in `days since 1850-01-01`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeReference {
    pub origin: String,
    pub calendar: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PhysicalUnit {
    dims: Dimensions,
    scale: f64,
    offset: f64,
    reference: Option<TimeReference>,
    text: String,
}

impl PhysicalUnit {
    pub fn dimensions(&self) -> &Dimensions {
        &self.dims
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    pub fn reference(&self) -> Option<&TimeReference> {
        self.reference.as_ref()
    }

    fn is_one(&self) -> bool {
        self.dims.is_none() && self.scale == 1.0 && self.offset == 0.0 && self.reference.is_none()
    }
}

impl PartialEq for PhysicalUnit {
    fn eq(&self, other: &Self) -> bool {
        self.dims == other.dims
            && approx::relative_eq!(self.scale, other.scale, max_relative = 1e-12)
            && approx::relative_eq!(self.offset, other.offset, max_relative = 1e-12)
            && self.reference == other.reference
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Unit {
    /// Values whose unit is unknown, e.g. numeric literals.
    NoUnit,
    Physical(PhysicalUnit),
}

impl Default for Unit {
    fn default() -> Self {
        Unit::dimensionless()
    }
}

impl Unit {
    pub fn dimensionless() -> Self {
        Unit::Physical(PhysicalUnit {
            dims: Dimensions::NONE,
            scale: 1.0,
            offset: 0.0,
            reference: None,
            text: "1".to_string(),
        })
    }

    pub fn parse(text: &str) -> Result<Self> {
        Self::parse_with_calendar(text, None)
    }

    pub fn parse_with_calendar(text: &str, calendar: Option<&str>) -> Result<Self> {
        let trimmed = text.trim();
        if trimmed.eq_ignore_ascii_case("no unit") || trimmed.eq_ignore_ascii_case("no_unit") {
            return Ok(Unit::NoUnit);
        }
        let unrecognized = || ConformError::Units(format!("unrecognized units '{}'", trimmed));
        if let Some((base, origin)) = trimmed.split_once(" since ") {
            let factor = parse_expression(base).ok_or_else(unrecognized)?;
            if !factor.dims.is_time() {
                return Err(ConformError::Units(format!(
                    "reference units '{}' must be a unit of time",
                    trimmed
                )));
            }
            return Ok(Unit::Physical(PhysicalUnit {
                dims: factor.dims,
                scale: factor.scale,
                offset: 0.0,
                reference: Some(TimeReference {
                    origin: origin.trim().to_string(),
                    calendar: calendar.map(|c| c.trim().to_lowercase()),
                }),
                text: trimmed.to_string(),
            }));
        }
        let factor = parse_expression(trimmed).ok_or_else(unrecognized)?;
        Ok(Unit::Physical(PhysicalUnit {
            dims: factor.dims,
            scale: factor.scale,
            offset: factor.offset,
            reference: None,
            text: if trimmed.is_empty() {
                "1".to_string()
            } else {
                trimmed.to_string()
            },
        }))
    }

    pub fn is_no_unit(&self) -> bool {
        matches!(self, Unit::NoUnit)
    }

    /// True for the plain dimensionless unit `1`.
    pub fn is_dimensionless(&self) -> bool {
        match self {
            Unit::NoUnit => false,
            Unit::Physical(u) => u.is_one(),
        }
    }

    pub fn physical(&self) -> Option<&PhysicalUnit> {
        match self {
            Unit::NoUnit => None,
            Unit::Physical(u) => Some(u),
        }
    }

    pub fn calendar(&self) -> Option<&str> {
        self.physical()?.reference.as_ref()?.calendar.as_deref()
    }

    pub fn multiply(&self, other: &Unit) -> Unit {
        match (self, other) {
            (Unit::NoUnit, u) | (u, Unit::NoUnit) => u.clone(),
            (Unit::Physical(a), Unit::Physical(b)) => {
                let text = if a.is_one() {
                    b.text.clone()
                } else if b.is_one() {
                    a.text.clone()
                } else {
                    format!("{} {}", wrap(&a.text, &['/']), wrap(&b.text, &['/']))
                };
                Unit::Physical(PhysicalUnit {
                    dims: a.dims.multiply(&b.dims),
                    scale: a.scale * b.scale,
                    offset: 0.0,
                    reference: None,
                    text,
                })
            }
        }
    }

    pub fn divide(&self, other: &Unit) -> Unit {
        match (self, other) {
            (u, Unit::NoUnit) => u.clone(),
            (Unit::NoUnit, u) => Unit::dimensionless().divide(u),
            (Unit::Physical(a), Unit::Physical(b)) => {
                let text = if b.is_one() {
                    a.text.clone()
                } else {
                    format!("{}/{}", a.text, wrap(&b.text, &[' ', '*', '/']))
                };
                Unit::Physical(PhysicalUnit {
                    dims: a.dims.divide(&b.dims),
                    scale: a.scale / b.scale,
                    offset: 0.0,
                    reference: None,
                    text,
                })
            }
        }
    }

    pub fn powi(&self, n: i32) -> Result<Unit> {
        let u = match self {
            Unit::NoUnit => return Ok(Unit::NoUnit),
            Unit::Physical(u) => u,
        };
        if n == 1 {
            return Ok(self.clone());
        }
        let e = i8::try_from(n)
            .map_err(|_| ConformError::Units(format!("exponent {} is too large", n)))?;
        let dims = u.dims.powi(e);
        let text = if n == 0 || u.is_one() {
            "1".to_string()
        } else {
            format!("{}^{}", wrap(&u.text, &[' ', '*', '/']), n)
        };
        Ok(Unit::Physical(PhysicalUnit {
            dims,
            scale: u.scale.powi(n),
            offset: 0.0,
            reference: None,
            text,
        }))
    }

    pub fn root(&self, n: i8) -> Result<Unit> {
        let u = match self {
            Unit::NoUnit => return Ok(Unit::NoUnit),
            Unit::Physical(u) => u,
        };
        let dims = u.dims.root(n).ok_or_else(|| {
            ConformError::Units(format!("cannot take root {} of units '{}'", n, u.text))
        })?;
        let scale = u.scale.powf(1.0 / n as f64);
        Ok(Unit::Physical(PhysicalUnit {
            dims,
            scale,
            offset: 0.0,
            reference: None,
            text: canonical_text(&dims, scale),
        }))
    }

    /// Raise to a real power; the resulting exponents must be integers.
    pub fn powf(&self, e: f64) -> Result<Unit> {
        if self.is_no_unit() || self.is_dimensionless() {
            return Ok(self.clone());
        }
        if !e.is_finite() {
            return Err(ConformError::Units(format!(
                "cannot raise units '{}' to power {}",
                self, e
            )));
        }
        for n in 1..=4i8 {
            let scaled = e * n as f64;
            if (scaled - scaled.round()).abs() < 1e-9 {
                let base = if n == 1 { self.clone() } else { self.root(n)? };
                return base.powi(scaled.round() as i32);
            }
        }
        Err(ConformError::Units(format!(
            "cannot raise units '{}' to non-rational power {}",
            self, e
        )))
    }

    pub fn is_convertible(&self, other: &Unit) -> bool {
        match (self, other) {
            (Unit::NoUnit, Unit::NoUnit) => true,
            (Unit::Physical(a), Unit::Physical(b)) => {
                a.dims == b.dims && a.reference == b.reference
            }
            _ => false,
        }
    }

    /// Coefficients `(a, b)` such that a value `v` in `self` is `a * v + b`
    /// in `to`.
    pub fn converter(&self, to: &Unit) -> Result<(f64, f64)> {
        match (self, to) {
            (Unit::NoUnit, Unit::NoUnit) => Ok((1.0, 0.0)),
            (Unit::Physical(a), Unit::Physical(b)) if self.is_convertible(to) => {
                let ratio = a.scale / b.scale;
                Ok((ratio, a.offset * ratio - b.offset))
            }
            _ => Err(ConformError::Units(format!(
                "cannot convert units '{}' to '{}'",
                self, to
            ))),
        }
    }

    pub fn convert_value(&self, value: f64, to: &Unit) -> Result<f64> {
        let (a, b) = self.converter(to)?;
        Ok(a * value + b)
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Unit::NoUnit => write!(f, "no unit"),
            Unit::Physical(u) => write!(f, "{}", u.text),
        }
    }
}

fn wrap(text: &str, separators: &[char]) -> String {
    if text.contains(separators) {
        format!("({})", text)
    } else {
        text.to_string()
    }
}

fn canonical_text(dims: &Dimensions, scale: f64) -> String {
    if approx::relative_eq!(scale, 1.0, max_relative = 1e-12) {
        dims.to_string()
    } else if dims.is_none() {
        format!("{}", scale)
    } else {
        format!("{} {}", scale, dims)
    }
}

#[derive(Debug, Clone, Copy)]
struct Factor {
    dims: Dimensions,
    scale: f64,
    offset: f64,
    prefixable: bool,
}

impl Factor {
    const ONE: Factor = Factor::new(Dimensions::NONE, 1.0);

    const fn new(dims: Dimensions, scale: f64) -> Self {
        Factor {
            dims,
            scale,
            offset: 0.0,
            prefixable: false,
        }
    }

    const fn prefixed(self) -> Self {
        Factor {
            prefixable: true,
            ..self
        }
    }

    const fn offset(self, offset: f64) -> Self {
        Factor { offset, ..self }
    }

    fn times(self, other: Factor) -> Factor {
        Factor::new(self.dims.multiply(&other.dims), self.scale * other.scale)
    }

    fn over(self, other: Factor) -> Factor {
        Factor::new(self.dims.divide(&other.dims), self.scale / other.scale)
    }

    fn pow(self, n: i8) -> Factor {
        if n == 1 {
            return self;
        }
        Factor::new(self.dims.powi(n), self.scale.powi(n as i32))
    }
}

const L: Dimensions = Dimensions {
    length: 1,
    ..Dimensions::NONE
};
const M: Dimensions = Dimensions {
    mass: 1,
    ..Dimensions::NONE
};
const T: Dimensions = Dimensions {
    time: 1,
    ..Dimensions::NONE
};
const TEMP: Dimensions = Dimensions {
    temperature: 1,
    ..Dimensions::NONE
};
const ANGLE: Dimensions = Dimensions {
    angle: 1,
    ..Dimensions::NONE
};
const PRESSURE: Dimensions = Dimensions {
    mass: 1,
    length: -1,
    time: -2,
    ..Dimensions::NONE
};
const FORCE: Dimensions = Dimensions {
    mass: 1,
    length: 1,
    time: -2,
    ..Dimensions::NONE
};
const ENERGY: Dimensions = Dimensions {
    mass: 1,
    length: 2,
    time: -2,
    ..Dimensions::NONE
};
const POWER: Dimensions = Dimensions {
    mass: 1,
    length: 2,
    time: -3,
    ..Dimensions::NONE
};

const UNITS: &[(&[&str], Factor)] = &[
    (&["m", "meter", "meters", "metre", "metres"], Factor::new(L, 1.0).prefixed()),
    (&["g", "gram", "grams"], Factor::new(M, 1e-3).prefixed()),
    (&["s", "sec", "second", "seconds"], Factor::new(T, 1.0).prefixed()),
    (&["min", "minute", "minutes"], Factor::new(T, 60.0)),
    (&["h", "hr", "hour", "hours"], Factor::new(T, 3600.0)),
    (&["d", "day", "days"], Factor::new(T, 86400.0)),
    (&["yr", "year", "years"], Factor::new(T, 31556925.9747)),
    (&["K", "kelvin", "degK", "degrees_K", "degree_K"], Factor::new(TEMP, 1.0)),
    (
        &[
            "degC",
            "deg_C",
            "degrees_C",
            "degree_C",
            "celsius",
            "Celsius",
            "degree_Celsius",
            "degrees_Celsius",
        ],
        Factor::new(TEMP, 1.0).offset(273.15),
    ),
    (
        &["degF", "deg_F", "degrees_F", "degree_F", "fahrenheit", "Fahrenheit"],
        Factor::new(TEMP, 5.0 / 9.0).offset(459.67),
    ),
    (&["Pa", "pascal"], Factor::new(PRESSURE, 1.0).prefixed()),
    (&["bar"], Factor::new(PRESSURE, 1e5).prefixed()),
    (&["mb"], Factor::new(PRESSURE, 100.0)),
    (&["atm"], Factor::new(PRESSURE, 101325.0)),
    (&["N", "newton"], Factor::new(FORCE, 1.0).prefixed()),
    (&["J", "joule"], Factor::new(ENERGY, 1.0).prefixed()),
    (&["W", "watt"], Factor::new(POWER, 1.0).prefixed()),
    (
        &["mol", "mole"],
        Factor::new(
            Dimensions {
                amount: 1,
                ..Dimensions::NONE
            },
            1.0,
        )
        .prefixed(),
    ),
    (
        &["A", "ampere"],
        Factor::new(
            Dimensions {
                current: 1,
                ..Dimensions::NONE
            },
            1.0,
        )
        .prefixed(),
    ),
    (
        &["cd", "candela"],
        Factor::new(
            Dimensions {
                luminosity: 1,
                ..Dimensions::NONE
            },
            1.0,
        ),
    ),
    (&["rad", "radian", "radians"], Factor::new(ANGLE, 1.0)),
    (
        &[
            "degree",
            "degrees",
            "arc_degree",
            "degrees_north",
            "degree_north",
            "degrees_N",
            "degree_N",
            "degrees_east",
            "degree_east",
            "degrees_E",
            "degree_E",
        ],
        Factor::new(ANGLE, PI / 180.0),
    ),
    (&["percent", "%"], Factor::new(Dimensions::NONE, 1e-2)),
    (&["ppm"], Factor::new(Dimensions::NONE, 1e-6)),
    (&["ppb"], Factor::new(Dimensions::NONE, 1e-9)),
];

const PREFIXES: &[(&str, f64)] = &[
    ("da", 1e1),
    ("h", 1e2),
    ("k", 1e3),
    ("M", 1e6),
    ("G", 1e9),
    ("T", 1e12),
    ("d", 1e-1),
    ("c", 1e-2),
    ("m", 1e-3),
    ("u", 1e-6),
    ("µ", 1e-6),
    ("n", 1e-9),
    ("p", 1e-12),
];

fn lookup(symbol: &str) -> Option<Factor> {
    let exact = |s: &str| {
        UNITS
            .iter()
            .find(|(names, _)| names.contains(&s))
            .map(|(_, f)| *f)
    };
    if let Some(factor) = exact(symbol) {
        return Some(factor);
    }
    PREFIXES.iter().find_map(|(prefix, scale)| {
        let base = exact(symbol.strip_prefix(prefix)?)?;
        base.prefixable.then(|| Factor {
            scale: base.scale * scale,
            prefixable: false,
            ..base
        })
    })
}

/// Byte offsets of characters matching `pred` outside parentheses.
fn top_level(s: &str, pred: impl Fn(char) -> bool) -> Vec<usize> {
    let mut depth = 0i32;
    s.char_indices()
        .filter(|(_, c)| {
            match c {
                '(' => depth += 1,
                ')' => depth -= 1,
                _ => {}
            }
            depth == 0 && pred(*c)
        })
        .map(|(i, _)| i)
        .collect()
}

fn parse_expression(s: &str) -> Option<Factor> {
    let s = s.trim().replace("**", "^");
    let s = s.as_str();
    if s.is_empty() {
        return Some(Factor::ONE);
    }
    if let Some(&pos) = top_level(s, |c| c == '/').last() {
        let num = parse_expression(&s[..pos])?;
        let den = parse_expression(&s[pos + 1..])?;
        return Some(num.over(den));
    }
    let seps = top_level(s, |c| c == '*' || c.is_whitespace());
    if seps.is_empty() {
        return parse_term(s);
    }
    let mut terms = Vec::new();
    let mut start = 0;
    for pos in seps {
        terms.push(&s[start..pos]);
        start = pos + s[pos..].chars().next().map_or(1, char::len_utf8);
    }
    terms.push(&s[start..]);
    terms
        .into_iter()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(parse_term)
        .try_fold(Factor::ONE, |acc, f| Some(acc.times(f?)))
}

fn split_exponent(term: &str) -> Option<(&str, i8)> {
    if let Some(&pos) = top_level(term, |c| c == '^').last() {
        return Some((term[..pos].trim(), term[pos + 1..].trim().parse().ok()?));
    }
    let digits = term
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit() || *c == '-' || *c == '+')
        .last()
        .map(|(i, _)| i);
    match digits {
        Some(i) if i > 0 && term[..i].ends_with(|c: char| c.is_alphabetic() || c == '%') => {
            Some((&term[..i], term[i..].parse().ok()?))
        }
        _ => Some((term, 1)),
    }
}

fn parse_term(term: &str) -> Option<Factor> {
    let term = term.trim();
    if let Ok(value) = term.parse::<f64>() {
        return Some(Factor::new(Dimensions::NONE, value));
    }
    let (base, exp) = split_exponent(term)?;
    let factor = if let Some(inner) = base.strip_prefix('(').and_then(|b| b.strip_suffix(')')) {
        parse_expression(inner)?
    } else if let Ok(value) = base.parse::<f64>() {
        Factor::new(Dimensions::NONE, value)
    } else {
        lookup(base)?
    };
    Some(factor.pow(exp))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn u(text: &str) -> Unit {
        Unit::parse(text).unwrap()
    }

    #[test]
    fn parse_cf_forms() {
        assert_eq!(u("m s-1"), u("m/s"));
        assert_eq!(u("kg m-2 s-1"), u("kg/(m^2 s)"));
        assert_eq!(u("W m**-2"), u("kg s-3"));
        assert_eq!(u("hPa"), u("100 Pa"));
        assert_eq!(u("mbar"), u("mb"));
        assert_eq!(u("km"), u("1000 m"));
        assert_eq!(u(""), Unit::dimensionless());
        assert_eq!(u("1"), Unit::dimensionless());
        assert!(u("1e-3").physical().unwrap().dimensions().is_none());
        assert!(u("no unit").is_no_unit());
        assert!(Unit::parse("furlongs").is_err());
    }

    #[test]
    fn algebra() {
        let speed = u("m").divide(&u("s"));
        assert_eq!(speed.to_string(), "m/s");
        assert_eq!(speed, u("m s-1"));
        let area = u("m").multiply(&u("m"));
        assert_eq!(area, u("m2"));
        assert_eq!(area.root(2).unwrap(), u("m"));
        assert!(u("m").root(2).is_err());
        assert_eq!(u("m/s").powi(2).unwrap().to_string(), "(m/s)^2");
        assert_eq!(u("m/s").powi(2).unwrap(), u("(m/s)^2"));
        assert_eq!(u("m2").powf(0.5).unwrap(), u("m"));
        assert!(u("m").powf(0.3).is_err());
    }

    #[test]
    fn no_unit_algebra() {
        let literal = Unit::NoUnit;
        assert_eq!(literal.multiply(&u("K")), u("K"));
        assert_eq!(u("K").divide(&literal), u("K"));
        assert_eq!(literal.divide(&u("s")), u("s-1"));
        assert!(literal.powi(3).unwrap().is_no_unit());
        assert!(!literal.is_convertible(&u("1")));
    }

    #[test]
    fn conversions() {
        assert_relative_eq!(u("K").convert_value(300.0, &u("degC")).unwrap(), 26.85, epsilon = 1e-9);
        assert_relative_eq!(u("degC").convert_value(0.0, &u("K")).unwrap(), 273.15);
        assert_relative_eq!(u("degF").convert_value(32.0, &u("degC")).unwrap(), 0.0, epsilon = 1e-9);
        assert_relative_eq!(u("g").convert_value(1500.0, &u("kg")).unwrap(), 1.5);
        assert_relative_eq!(u("hPa").convert_value(1.0, &u("Pa")).unwrap(), 100.0);
        assert!(u("kg").converter(&u("m")).is_err());
    }

    #[test]
    fn time_references() {
        let days = Unit::parse_with_calendar("days since 1850-01-01", Some("noleap")).unwrap();
        let hours = Unit::parse_with_calendar("hours since 1850-01-01", Some("noleap")).unwrap();
        let other = Unit::parse_with_calendar("days since 2000-01-01", Some("noleap")).unwrap();
        assert_eq!(days.calendar(), Some("noleap"));
        assert_relative_eq!(days.convert_value(1.5, &hours).unwrap(), 36.0);
        assert!(!days.is_convertible(&other));
        assert!(!days.is_convertible(&u("days")));
        assert!(Unit::parse("m since 1850-01-01").is_err());
    }
}

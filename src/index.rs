//! Index expressions over named dimensions.
//!
//! A [`Selector`] is what a user writes (`3`, `1:4:-1`), an [`AxisSel`] is a
//! selector resolved against the length of an axis, and a [`Region`] is one
//! resolved selection per axis of an array. Regions can be joined (apply a
//! second selection to the result of a first) and compared (is one region a
//! subset of another, and where does it sit inside it).

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;

use itertools::Itertools;
use ndarray::{ArrayD, Axis, Slice};

use crate::error::{ConformError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Selector {
    At(isize),
    Slice {
        start: Option<isize>,
        stop: Option<isize>,
        step: Option<isize>,
    },
}

impl Selector {
    pub const ALL: Selector = Selector::Slice {
        start: None,
        stop: None,
        step: None,
    };

    pub fn range(start: isize, stop: isize) -> Self {
        Selector::Slice {
            start: Some(start),
            stop: Some(stop),
            step: None,
        }
    }

    pub fn slice(start: Option<isize>, stop: Option<isize>, step: Option<isize>) -> Self {
        Selector::Slice { start, stop, step }
    }

    pub fn is_all(&self) -> bool {
        matches!(
            self,
            Selector::Slice {
                start: None,
                stop: None,
                step: None | Some(1),
            }
        )
    }

    /// Resolve against an axis of length `len` using Python slice rules.
    pub fn resolve(&self, len: usize) -> Result<AxisSel> {
        let n = len as isize;
        match *self {
            Selector::At(i) => {
                let k = if i < 0 { i + n } else { i };
                if k < 0 || k >= n {
                    return Err(ConformError::Index(format!(
                        "index {} is out of bounds for axis of length {}",
                        i, len
                    )));
                }
                Ok(AxisSel::Point(k as usize))
            }
            Selector::Slice { start, stop, step } => {
                let step = step.unwrap_or(1);
                if step == 0 {
                    return Err(ConformError::Index("slice step cannot be zero".to_string()));
                }
                let wrap = |v: isize| if v < 0 { v + n } else { v };
                let (first, count) = if step > 0 {
                    let b = start.map_or(0, |v| wrap(v).clamp(0, n));
                    let e = stop.map_or(n, |v| wrap(v).clamp(0, n));
                    (b, if e > b { (e - b + step - 1) / step } else { 0 })
                } else {
                    let b = start.map_or(n - 1, |v| wrap(v).clamp(-1, n - 1));
                    let e = stop.map_or(-1, |v| wrap(v).clamp(-1, n - 1));
                    (b, if b > e { (b - e - step - 1) / -step } else { 0 })
                };
                Ok(AxisSel::Range {
                    start: first.max(0) as usize,
                    step,
                    len: count as usize,
                })
            }
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Selector::At(i) => write!(f, "{}", i),
            Selector::Slice { start, stop, step } => {
                let part = |v: &Option<isize>| v.map(|v| v.to_string()).unwrap_or_default();
                write!(f, "{}:{}", part(start), part(stop))?;
                if let Some(step) = step {
                    write!(f, ":{}", step)?;
                }
                Ok(())
            }
        }
    }
}

/// A selector resolved against a concrete axis length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AxisSel {
    /// A single position; the axis is dropped from the result.
    Point(usize),
    /// Positions `start + k * step` for `k` in `0..len`.
    Range { start: usize, step: isize, len: usize },
}

impl AxisSel {
    pub fn full(len: usize) -> Self {
        AxisSel::Range {
            start: 0,
            step: 1,
            len,
        }
    }

    pub fn is_point(&self) -> bool {
        matches!(self, AxisSel::Point(_))
    }

    /// Number of positions selected.
    pub fn count(&self) -> usize {
        match self {
            AxisSel::Point(_) => 1,
            AxisSel::Range { len, .. } => *len,
        }
    }

    /// Absolute position of the `k`th selected element.
    pub fn position(&self, k: usize) -> usize {
        match *self {
            AxisSel::Point(p) => p,
            AxisSel::Range { start, step, .. } => (start as isize + k as isize * step) as usize,
        }
    }

    /// Where absolute position `p` sits inside this selection, if at all.
    fn locate(&self, p: usize) -> Option<usize> {
        match *self {
            AxisSel::Point(q) => (p == q).then_some(0),
            AxisSel::Range { start, step, len } => {
                let d = p as isize - start as isize;
                if d % step != 0 {
                    return None;
                }
                let k = d / step;
                (k >= 0 && (k as usize) < len).then_some(k as usize)
            }
        }
    }

    fn as_slice(&self) -> Slice {
        match *self {
            AxisSel::Point(p) => Slice::new(p as isize, Some(p as isize + 1), 1),
            AxisSel::Range { len: 0, .. } => Slice::new(0, Some(0), 1),
            AxisSel::Range { start, step, len } => {
                let start = start as isize;
                let last = start + (len as isize - 1) * step;
                if step > 0 {
                    Slice::new(start, Some(last + 1), step)
                } else {
                    Slice::new(last, Some(start + 1), step)
                }
            }
        }
    }
}

/// One resolved selection per axis of an array.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Region {
    axes: Vec<AxisSel>,
}

impl Region {
    pub fn new(axes: Vec<AxisSel>) -> Self {
        Self { axes }
    }

    pub fn full(shape: &[usize]) -> Self {
        Self {
            axes: shape.iter().map(|&n| AxisSel::full(n)).collect(),
        }
    }

    /// Resolve positional selectors against `shape`; trailing axes with no
    /// selector are taken whole.
    pub fn resolve(selectors: &[Selector], shape: &[usize]) -> Result<Self> {
        if selectors.len() > shape.len() {
            return Err(ConformError::Index(format!(
                "too many indices ({}) for array of rank {}",
                selectors.len(),
                shape.len()
            )));
        }
        let axes = shape
            .iter()
            .enumerate()
            .map(|(i, &n)| selectors.get(i).unwrap_or(&Selector::ALL).resolve(n))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { axes })
    }

    pub fn axes(&self) -> &[AxisSel] {
        &self.axes
    }

    pub fn rank(&self) -> usize {
        self.axes.len()
    }

    /// Shape of the array produced by this region (points drop their axis).
    pub fn shape(&self) -> Vec<usize> {
        self.axes
            .iter()
            .filter_map(|a| match a {
                AxisSel::Range { len, .. } => Some(*len),
                AxisSel::Point(_) => None,
            })
            .collect()
    }

    /// Position of axis `axis` among the axes kept by this region.
    pub fn kept_axis(&self, axis: usize) -> Option<usize> {
        if self.axes.get(axis)?.is_point() {
            return None;
        }
        Some(self.axes[..axis].iter().filter(|a| !a.is_point()).count())
    }

    pub fn with_axis(&self, axis: usize, sel: AxisSel) -> Self {
        let mut axes = self.axes.clone();
        axes[axis] = sel;
        Self { axes }
    }

    /// Apply `inner` (relative to the result of `self`) on top of `self`,
    /// giving a region in the coordinates of the original array.
    pub fn join(&self, inner: &Region) -> Result<Region> {
        let kept = self.axes.iter().filter(|a| !a.is_point()).count();
        if inner.rank() != kept {
            return Err(ConformError::Index(format!(
                "cannot join index of rank {} onto selection of rank {}",
                inner.rank(),
                kept
            )));
        }
        let mut inner_axes = inner.axes.iter();
        let axes = self
            .axes
            .iter()
            .map(|outer| match (outer, outer.is_point()) {
                (_, true) => *outer,
                (AxisSel::Range { start, step, .. }, false) => match inner_axes.next() {
                    Some(AxisSel::Point(k)) => AxisSel::Point(outer.position(*k)),
                    Some(AxisSel::Range { start: k0, step: s, len }) => AxisSel::Range {
                        start: if *len == 0 { *start } else { outer.position(*k0) },
                        step: s * step,
                        len: *len,
                    },
                    None => *outer,
                },
                (AxisSel::Point(_), false) => *outer,
            })
            .collect();
        Ok(Region { axes })
    }

    /// If `other` is a subset of `self`, the region that extracts `other` from
    /// an array produced by `self`.
    pub fn relative(&self, other: &Region) -> Option<Region> {
        if self.rank() != other.rank() {
            return None;
        }
        let mut axes = Vec::new();
        for (outer, inner) in self.axes.iter().zip(other.axes.iter()) {
            match (outer, inner) {
                (AxisSel::Point(p), AxisSel::Point(q)) => {
                    if p != q {
                        return None;
                    }
                }
                (AxisSel::Point(_), AxisSel::Range { .. }) => return None,
                (AxisSel::Range { .. }, AxisSel::Point(q)) => {
                    axes.push(AxisSel::Point(outer.locate(*q)?));
                }
                (AxisSel::Range { step: s1, .. }, AxisSel::Range { start, step, len }) => {
                    if *len == 0 {
                        axes.push(AxisSel::Range {
                            start: 0,
                            step: 1,
                            len: 0,
                        });
                        continue;
                    }
                    let k0 = outer.locate(*start)?;
                    if *len == 1 {
                        axes.push(AxisSel::Range {
                            start: k0,
                            step: 1,
                            len: 1,
                        });
                        continue;
                    }
                    if step % s1 != 0 {
                        return None;
                    }
                    let last = *start as isize + (*len as isize - 1) * step;
                    if last < 0 {
                        return None;
                    }
                    outer.locate(last as usize)?;
                    axes.push(AxisSel::Range {
                        start: k0,
                        step: step / s1,
                        len: *len,
                    });
                }
            }
        }
        Some(Region { axes })
    }

    pub fn contains(&self, other: &Region) -> bool {
        self.relative(other).is_some()
    }

    /// Extract this region from `data`, whose rank must match.
    pub fn extract(&self, data: &ArrayD<f64>) -> Result<ArrayD<f64>> {
        if data.ndim() != self.rank() {
            return Err(ConformError::Index(format!(
                "index of rank {} applied to array of rank {}",
                self.rank(),
                data.ndim()
            )));
        }
        for (axis, (sel, &n)) in self.axes.iter().zip(data.shape()).enumerate() {
            let last = match *sel {
                AxisSel::Point(p) => Some(p),
                AxisSel::Range { len: 0, .. } => None,
                AxisSel::Range { len, .. } => Some(sel.position(0).max(sel.position(len - 1))),
            };
            if last.is_some_and(|p| p >= n) {
                return Err(ConformError::Index(format!(
                    "selection {:?} is out of bounds for axis {} of length {}",
                    sel, axis, n
                )));
            }
        }
        let mut view = data.view();
        for (axis, sel) in self.axes.iter().enumerate() {
            if !sel.is_point() {
                view.slice_axis_inplace(Axis(axis), sel.as_slice());
            }
        }
        for (axis, sel) in self.axes.iter().enumerate().rev() {
            if let AxisSel::Point(p) = sel {
                view = view.index_axis_move(Axis(axis), *p);
            }
        }
        Ok(view.to_owned())
    }

    /// Slice information usable with `slice_axis_inplace` for every axis.
    pub(crate) fn slices(&self) -> impl Iterator<Item = (usize, &AxisSel, Slice)> {
        self.axes
            .iter()
            .enumerate()
            .map(|(axis, sel)| (axis, sel, sel.as_slice()))
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let parts = self.axes.iter().map(|a| match a {
            AxisSel::Point(p) => p.to_string(),
            AxisSel::Range { start, step, len } => format!("{}+{}*{}", start, step, len),
        });
        write!(f, "[{}]", parts.format(", "))
    }
}

/// Selectors keyed by dimension name. Dimensions without a selector are
/// taken whole; selectors for dimensions an array does not have are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Index {
    selectors: BTreeMap<String, Selector>,
}

impl Index {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with(mut self, dim: impl Into<String>, selector: Selector) -> Self {
        self.selectors.insert(dim.into(), selector);
        self
    }

    pub fn positional(dims: &[String], selectors: &[Selector]) -> Result<Self> {
        if selectors.len() > dims.len() {
            return Err(ConformError::Index(format!(
                "too many indices ({}) for dimensions ({})",
                selectors.len(),
                dims.join(", ")
            )));
        }
        Ok(Self {
            selectors: dims
                .iter()
                .cloned()
                .zip(selectors.iter().copied())
                .filter(|(_, s)| !s.is_all())
                .collect(),
        })
    }

    pub fn get(&self, dim: &str) -> Selector {
        self.selectors.get(dim).copied().unwrap_or(Selector::ALL)
    }

    pub fn is_all(&self) -> bool {
        self.selectors.values().all(Selector::is_all)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Selector)> {
        self.selectors.iter()
    }

    pub fn restrict(&self, dims: &[String]) -> Index {
        Index {
            selectors: self
                .selectors
                .iter()
                .filter(|(d, s)| dims.contains(d) && !s.is_all())
                .map(|(d, s)| (d.clone(), *s))
                .collect(),
        }
    }

    pub fn without(&self, dims: &[&str]) -> Index {
        Index {
            selectors: self
                .selectors
                .iter()
                .filter(|(d, _)| !dims.contains(&d.as_str()))
                .map(|(d, s)| (d.clone(), *s))
                .collect(),
        }
    }

    /// Rename keys through `map`; keys absent from `map` are kept as is.
    pub fn rename(&self, map: &BTreeMap<String, String>) -> Index {
        Index {
            selectors: self
                .selectors
                .iter()
                .map(|(d, s)| (map.get(d).unwrap_or(d).clone(), *s))
                .collect(),
        }
    }

    pub fn resolve(&self, dims: &[String], shape: &[usize]) -> Result<Region> {
        if dims.len() != shape.len() {
            return Err(ConformError::Dimensions(format!(
                "dimensions ({}) do not match shape {:?}",
                dims.join(", "),
                shape
            )));
        }
        let axes = dims
            .iter()
            .zip(shape)
            .map(|(d, &n)| self.get(d).resolve(n))
            .collect::<Result<Vec<_>>>()?;
        Ok(Region::new(axes))
    }
}

impl fmt::Display for Index {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{{{}}}",
            self.selectors
                .iter()
                .map(|(d, s)| format!("{}={}", d, s))
                .format(", ")
        )
    }
}

/// Split an array with dimensions `dims` and `shape` into chunks; `chunks`
/// gives the chunk length for each chunked dimension.
pub fn chunk_indices(
    dims: &[String],
    shape: &[usize],
    chunks: &BTreeMap<String, usize>,
) -> Vec<Index> {
    let ranges = shape.iter().map(|&n| 0..n).collect::<Vec<_>>();
    chunk_ranges(dims, &ranges, shape, chunks)
}

/// Like [`chunk_indices`], covering only `ranges` of each dimension.
/// Returns no chunks if any range is empty.
pub fn chunk_ranges(
    dims: &[String],
    ranges: &[Range<usize>],
    shape: &[usize],
    chunks: &BTreeMap<String, usize>,
) -> Vec<Index> {
    if ranges.iter().any(|r| r.is_empty()) {
        return vec![];
    }
    let per_dim = dims
        .iter()
        .zip(ranges)
        .zip(shape)
        .filter_map(|((d, range), &n)| {
            let size = chunks.get(d).copied().filter(|&s| s > 0).unwrap_or(n.max(1));
            if size >= range.len() && range.len() == n {
                return None;
            }
            let pieces = range
                .clone()
                .step_by(size)
                .map(|lo| {
                    let hi = (lo + size).min(range.end);
                    (d.clone(), Selector::range(lo as isize, hi as isize))
                })
                .collect::<Vec<_>>();
            Some(pieces)
        })
        .collect::<Vec<_>>();
    if per_dim.is_empty() {
        return vec![Index::all()];
    }
    per_dim
        .into_iter()
        .multi_cartesian_product()
        .map(|combo| {
            combo
                .into_iter()
                .fold(Index::all(), |index, (d, s)| index.with(d, s))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array, IxDyn};

    fn dims(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn python_slice_rules() {
        let cases = [
            (Selector::slice(Some(1), Some(4), None), 1, 1, 3),
            (Selector::slice(None, None, Some(-1)), 9, -1, 10),
            (Selector::slice(Some(1), Some(4), Some(-1)), 1, -1, 0),
            (Selector::slice(Some(-3), None, None), 7, 1, 3),
            (Selector::slice(Some(8), Some(2), Some(-2)), 8, -2, 3),
            (Selector::slice(None, Some(100), Some(3)), 0, 3, 4),
        ];
        for (sel, start, step, len) in cases {
            assert_eq!(sel.resolve(10).unwrap(), AxisSel::Range { start, step, len }, "{}", sel);
        }
        assert_eq!(Selector::At(-1).resolve(10).unwrap(), AxisSel::Point(9));
        assert!(Selector::At(10).resolve(10).is_err());
        assert!(Selector::slice(None, None, Some(0)).resolve(10).is_err());
    }

    #[test]
    fn extract_negative_step() {
        let data = Array::from_shape_vec(IxDyn(&[2, 5]), (0..10).map(f64::from).collect()).unwrap();
        let region = Region::resolve(
            &[Selector::At(1), Selector::slice(Some(4), Some(0), Some(-2))],
            &[2, 5],
        )
        .unwrap();
        let out = region.extract(&data).unwrap();
        assert_eq!(out.shape(), &[2]);
        assert_eq!(out.iter().copied().collect::<Vec<_>>(), vec![9.0, 7.0]);
    }

    #[test]
    fn join_matches_successive_slicing() {
        let data = Array::from_shape_vec(IxDyn(&[20]), (0..20).map(f64::from).collect()).unwrap();
        let outer = Region::resolve(&[Selector::slice(Some(2), Some(18), Some(2))], &[20]).unwrap();
        let first = outer.extract(&data).unwrap();
        let inner = Region::resolve(&[Selector::slice(None, None, Some(-3))], first.shape()).unwrap();
        let expected = inner.extract(&first).unwrap();
        let joined = outer.join(&inner).unwrap();
        assert_eq!(joined.extract(&data).unwrap(), expected);
    }

    #[test]
    fn relative_subset() {
        let shape = [10, 4];
        let outer = Index::all()
            .with("time", Selector::range(2, 8))
            .resolve(&dims(&["time", "lat"]), &shape)
            .unwrap();
        let inner = Index::all()
            .with("time", Selector::range(3, 5))
            .with("lat", Selector::At(2))
            .resolve(&dims(&["time", "lat"]), &shape)
            .unwrap();
        let rel = outer.relative(&inner).unwrap();
        assert_eq!(
            rel.axes(),
            &[
                AxisSel::Range { start: 1, step: 1, len: 2 },
                AxisSel::Point(2)
            ]
        );
        assert!(!inner.contains(&outer));

        let data = Array::from_shape_vec(IxDyn(&shape), (0..40).map(f64::from).collect()).unwrap();
        let via_cache = rel.extract(&outer.extract(&data).unwrap()).unwrap();
        assert_eq!(via_cache, inner.extract(&data).unwrap());
    }

    #[test]
    fn strided_subset_requires_alignment() {
        let outer = Region::resolve(&[Selector::slice(None, None, Some(2))], &[10]).unwrap();
        let aligned = Region::resolve(&[Selector::slice(Some(2), Some(9), Some(4))], &[10]).unwrap();
        let misaligned = Region::resolve(&[Selector::slice(Some(1), Some(9), Some(2))], &[10]).unwrap();
        assert!(outer.contains(&aligned));
        assert!(!outer.contains(&misaligned));
    }

    #[test]
    fn named_index_ignores_unknown_dims() {
        let index = Index::all().with("lev", Selector::At(0)).with("time", Selector::range(0, 2));
        let region = index.resolve(&dims(&["time"]), &[5]).unwrap();
        assert_eq!(region.shape(), vec![2]);
        assert_eq!(index.without(&["lev"]).to_string(), "{time=0:2}");
    }

    #[test]
    fn chunking() {
        let mut chunks = BTreeMap::new();
        chunks.insert("time".to_string(), 4);
        let parts = chunk_indices(&dims(&["time", "lat"]), &[10, 3], &chunks);
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[2].get("time"), Selector::range(8, 10));
        assert_eq!(parts[0].get("lat"), Selector::ALL);

        let parts = chunk_ranges(&dims(&["time", "lat"]), &[3..10, 0..3], &[10, 3], &chunks);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].get("time"), Selector::range(3, 7));
        assert_eq!(parts[1].get("time"), Selector::range(7, 10));
        let parts = chunk_ranges(&dims(&["time"]), &[2..5], &[10], &BTreeMap::new());
        assert_eq!(parts, vec![Index::all().with("time", Selector::range(2, 5))]);
        assert!(chunk_ranges(&dims(&["time"]), &[4..4], &[10], &chunks).is_empty());
    }
}

//! The storage interface the dataflow reads from and writes to.
//!
//! Real NetCDF access lives outside this crate behind [`DataStore`];
//! [`MemoryStore`] keeps everything in memory and counts calls, which is what
//! the tests, benches and examples use.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use ndarray::{ArrayD, Axis, IxDyn};

use crate::dataset::{AttrValue, Attributes, Dimension, FileFormat};
use crate::error::{ConformError, Result};
use crate::index::{AxisSel, Region};
use crate::physarray::{DataType, PhysArray};

/// Values of one variable exactly as stored, with the attributes needed to
/// interpret them.
#[derive(Debug, Clone)]
pub struct RawArray {
    pub data: ArrayD<f64>,
    pub units: Option<String>,
    pub calendar: Option<String>,
    pub scale_factor: Option<f64>,
    pub add_offset: Option<f64>,
}

impl RawArray {
    /// Apply `scale_factor` and `add_offset`.
    pub fn unpack(&self) -> ArrayD<f64> {
        match (self.scale_factor, self.add_offset) {
            (None, None) => self.data.clone(),
            (scale, offset) => {
                let (a, b) = (scale.unwrap_or(1.0), offset.unwrap_or(0.0));
                self.data.mapv(|v| a * v + b)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariableSpec {
    pub name: String,
    pub datatype: DataType,
    pub dimensions: Vec<String>,
    pub attributes: Attributes,
}

/// Everything needed to create an output file.
#[derive(Debug, Clone, PartialEq)]
pub struct FileSpec {
    pub name: String,
    pub format: FileFormat,
    pub deflate: u8,
    pub shuffle: bool,
    pub attributes: Attributes,
    pub dimensions: Vec<Dimension>,
    pub variables: Vec<VariableSpec>,
}

impl FileSpec {
    pub fn variable(&self, name: &str) -> Option<&VariableSpec> {
        self.variables.iter().find(|v| v.name == name)
    }
}

pub trait DataStore: Send + Sync {
    /// Read exactly `region` (in file coordinates) of `variable` from `file`.
    fn read(&self, variable: &str, file: &str, region: &Region) -> Result<RawArray>;

    /// Write `array` into `region` of `variable`, growing unlimited
    /// dimensions as needed.
    fn write(&self, variable: &str, file: &str, region: &Region, array: &PhysArray) -> Result<()>;

    fn create_file(&self, spec: &FileSpec) -> Result<()>;
}

#[derive(Debug, Clone)]
struct StoredVariable {
    dimensions: Vec<String>,
    unlimited: Vec<bool>,
    attributes: Attributes,
    data: ArrayD<f64>,
}

#[derive(Debug, Default)]
struct StoredFile {
    spec: Option<FileSpec>,
    variables: HashMap<String, StoredVariable>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    files: Mutex<HashMap<String, StoredFile>>,
    reads: Mutex<Vec<(String, String)>>,
    writes: AtomicUsize,
    creates: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an input variable to `file`.
    pub fn insert(
        &self,
        file: &str,
        variable: &str,
        dimensions: &[&str],
        data: ArrayD<f64>,
        attributes: Attributes,
    ) -> Result<()> {
        if data.ndim() != dimensions.len() {
            return Err(ConformError::io(
                file,
                format!("'{}' has rank {} but {} dimensions", variable, data.ndim(), dimensions.len()),
            ));
        }
        let mut files = self.lock()?;
        files.entry(file.to_string()).or_default().variables.insert(
            variable.to_string(),
            StoredVariable {
                dimensions: dimensions.iter().map(|d| d.to_string()).collect(),
                unlimited: vec![false; dimensions.len()],
                attributes,
                data,
            },
        );
        Ok(())
    }

    pub fn variable(&self, file: &str, variable: &str) -> Option<ArrayD<f64>> {
        let files = self.files.lock().ok()?;
        Some(files.get(file)?.variables.get(variable)?.data.clone())
    }

    pub fn attributes(&self, file: &str, variable: &str) -> Option<Attributes> {
        let files = self.files.lock().ok()?;
        Some(files.get(file)?.variables.get(variable)?.attributes.clone())
    }

    pub fn file_spec(&self, file: &str) -> Option<FileSpec> {
        self.files.lock().ok()?.get(file)?.spec.clone()
    }

    pub fn read_count(&self) -> usize {
        self.reads.lock().map_or(0, |r| r.len())
    }

    /// Number of reads of `variable`, over all files.
    pub fn reads_of(&self, variable: &str) -> usize {
        self.reads
            .lock()
            .map_or(0, |r| r.iter().filter(|(v, _)| v == variable).count())
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn create_count(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, StoredFile>>> {
        self.files
            .lock()
            .map_err(|_| ConformError::io("<memory>", "store lock poisoned"))
    }
}

fn text(attributes: &Attributes, key: &str) -> Option<String> {
    attributes.get(key).map(AttrValue::to_string)
}

impl DataStore for MemoryStore {
    fn read(&self, variable: &str, file: &str, region: &Region) -> Result<RawArray> {
        let files = self.lock()?;
        let stored = files
            .get(file)
            .ok_or_else(|| ConformError::io(file, "no such file"))?
            .variables
            .get(variable)
            .ok_or_else(|| ConformError::io(file, format!("no variable '{}'", variable)))?;
        let data = region
            .extract(&stored.data)
            .map_err(|e| ConformError::io(file, format!("reading '{}': {}", variable, e)))?;
        if let Ok(mut reads) = self.reads.lock() {
            reads.push((variable.to_string(), file.to_string()));
        }
        Ok(RawArray {
            data,
            units: text(&stored.attributes, "units"),
            calendar: text(&stored.attributes, "calendar"),
            scale_factor: stored.attributes.get("scale_factor").and_then(AttrValue::as_f64),
            add_offset: stored.attributes.get("add_offset").and_then(AttrValue::as_f64),
        })
    }

    fn write(&self, variable: &str, file: &str, region: &Region, array: &PhysArray) -> Result<()> {
        let mut files = self.lock()?;
        let stored = files
            .get_mut(file)
            .filter(|f| f.spec.is_some())
            .ok_or_else(|| ConformError::io(file, "file has not been created"))?
            .variables
            .get_mut(variable)
            .ok_or_else(|| ConformError::io(file, format!("no variable '{}'", variable)))?;
        if region.rank() != stored.data.ndim() {
            return Err(ConformError::io(
                file,
                format!("region {} does not match rank of '{}'", region, variable),
            ));
        }

        // grow unlimited axes to hold the region
        let mut shape = stored.data.shape().to_vec();
        for (axis, sel) in region.axes().iter().enumerate() {
            let needed = match *sel {
                AxisSel::Point(p) => p + 1,
                AxisSel::Range { len: 0, .. } => 0,
                AxisSel::Range { len, .. } => sel.position(0).max(sel.position(len - 1)) + 1,
            };
            if needed > shape[axis] {
                if !stored.unlimited[axis] {
                    return Err(ConformError::io(
                        file,
                        format!(
                            "region {} exceeds dimension '{}' of '{}'",
                            region, stored.dimensions[axis], variable
                        ),
                    ));
                }
                shape[axis] = needed;
            }
        }
        if shape != stored.data.shape() {
            let mut grown = ArrayD::from_elem(IxDyn(&shape), f64::NAN);
            let mut target = grown.view_mut();
            for (axis, &n) in stored.data.shape().iter().enumerate() {
                target.slice_axis_inplace(Axis(axis), ndarray::Slice::from(0..n));
            }
            target.assign(&stored.data);
            stored.data = grown;
        }

        let mut values = array.data().clone();
        for (axis, sel) in region.axes().iter().enumerate() {
            if sel.is_point() {
                values.insert_axis_inplace(Axis(axis));
            }
        }
        let mut target = stored.data.view_mut();
        for (axis, _, slice) in region.slices() {
            target.slice_axis_inplace(Axis(axis), slice);
        }
        if target.shape() != values.shape() {
            return Err(ConformError::io(
                file,
                format!(
                    "cannot write array of shape {:?} into region {} of '{}'",
                    array.shape(),
                    region,
                    variable
                ),
            ));
        }
        target.assign(&values);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn create_file(&self, spec: &FileSpec) -> Result<()> {
        let mut files = self.lock()?;
        if files.get(&spec.name).is_some_and(|f| f.spec.is_some()) {
            return Err(ConformError::io(&spec.name, "file already created"));
        }
        let mut created = StoredFile {
            spec: Some(spec.clone()),
            variables: HashMap::new(),
        };
        for var in &spec.variables {
            let dims = var
                .dimensions
                .iter()
                .map(|d| {
                    spec.dimensions.iter().find(|x| &x.name == d).ok_or_else(|| {
                        ConformError::io(
                            &spec.name,
                            format!("'{}' uses undeclared dimension '{}'", var.name, d),
                        )
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            let shape = dims
                .iter()
                .map(|d| if d.unlimited { 0 } else { d.size })
                .collect::<Vec<_>>();
            created.variables.insert(
                var.name.clone(),
                StoredVariable {
                    dimensions: var.dimensions.clone(),
                    unlimited: dims.iter().map(|d| d.unlimited).collect(),
                    attributes: var.attributes.clone(),
                    data: ArrayD::from_elem(IxDyn(&shape), f64::NAN),
                },
            );
        }
        files.insert(spec.name.clone(), created);
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::Selector;
    use ndarray::{arr1, arr2};

    fn spec() -> FileSpec {
        FileSpec {
            name: "out.nc".to_string(),
            format: FileFormat::Netcdf4,
            deflate: 1,
            shuffle: true,
            attributes: Attributes::new(),
            dimensions: vec![Dimension::unlimited("time", 4), Dimension::new("lat", 2)],
            variables: vec![VariableSpec {
                name: "x".to_string(),
                datatype: DataType::Float32,
                dimensions: vec!["time".to_string(), "lat".to_string()],
                attributes: Attributes::new(),
            }],
        }
    }

    #[test]
    fn read_unpacks() {
        let store = MemoryStore::new();
        let mut attrs = Attributes::new();
        attrs.insert("units".into(), "K".into());
        attrs.insert("scale_factor".into(), 0.5.into());
        attrs.insert("add_offset".into(), 100.0.into());
        store
            .insert("in.nc", "T", &["time"], arr1(&[0.0, 2.0, 4.0]).into_dyn(), attrs)
            .unwrap();
        let region = Region::resolve(&[Selector::range(1, 3)], &[3]).unwrap();
        let raw = store.read("T", "in.nc", &region).unwrap();
        assert_eq!(raw.units.as_deref(), Some("K"));
        assert_eq!(raw.unpack(), arr1(&[101.0, 102.0]).into_dyn());
        assert_eq!(store.read_count(), 1);
        assert!(store.read("T", "missing.nc", &region).is_err());
    }

    #[test]
    fn write_grows_unlimited() {
        let store = MemoryStore::new();
        let array = PhysArray::new("x", arr1(&[1.0, 2.0]).into_dyn(), vec!["lat".to_string()]).unwrap();
        let region = Region::new(vec![AxisSel::Point(0), AxisSel::full(2)]);
        assert!(store.write("x", "out.nc", &region, &array).is_err());

        store.create_file(&spec()).unwrap();
        store.write("x", "out.nc", &region, &array).unwrap();
        let region = Region::new(vec![AxisSel::Point(2), AxisSel::full(2)]);
        store.write("x", "out.nc", &region, &array).unwrap();
        let data = store.variable("out.nc", "x").unwrap();
        assert_eq!(data.shape(), &[3, 2]);
        assert_eq!(data[[2, 1]], 2.0);
        assert!(data[[1, 0]].is_nan());
        assert_eq!(store.write_count(), 2);

        let too_wide = Region::new(vec![AxisSel::Point(0), AxisSel::full(3)]);
        let wide = PhysArray::new("x", arr1(&[1.0, 2.0, 3.0]).into_dyn(), vec!["lat".to_string()]).unwrap();
        assert!(store.write("x", "out.nc", &too_wide, &wide).is_err());
        assert!(store.create_file(&spec()).is_err());
    }

    #[test]
    fn write_block() {
        let store = MemoryStore::new();
        store.create_file(&spec()).unwrap();
        let block = PhysArray::new(
            "x",
            arr2(&[[1.0, 2.0], [3.0, 4.0]]).into_dyn(),
            vec!["time".to_string(), "lat".to_string()],
        )
        .unwrap();
        let region = Region::resolve(&[Selector::range(2, 4)], &[4, 2]).unwrap();
        store.write("x", "out.nc", &region, &block).unwrap();
        let data = store.variable("out.nc", "x").unwrap();
        assert_eq!(data.shape(), &[4, 2]);
        assert_eq!(data[[3, 0]], 3.0);
    }
}

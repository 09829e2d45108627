use std::collections::BTreeMap;
use std::sync::Arc;

use climconform::dataset::Attributes;
use climconform::index::Index;
use climconform::{
    parse_definition, Conform, DataFlow, DataType, Dataset, Dimension, File, MemoryStore, Variable,
};
use divan::Bencher;
use ndarray::Array1;

fn main() {
    divan::main();
}

fn setup(n: usize, definition: &str) -> DataFlow {
    let input = Dataset::new(
        "input",
        vec![Dimension::new("x", n)],
        vec![Variable::new("u", DataType::Float64, &["x"]).with_attribute("units", "K")],
        vec![File::new("in.nc", &["u"])],
    )
    .unwrap();
    let output = Dataset::new(
        "output",
        vec![Dimension::new("x", n)],
        vec![Variable::new("v", DataType::Float64, &["x"]).with_attribute("units", "K")],
        vec![File::new("out.nc", &["v"])],
    )
    .unwrap();
    let store = MemoryStore::new();
    let mut attributes = Attributes::new();
    attributes.insert("units".into(), "K".into());
    store
        .insert("in.nc", "u", &["x"], Array1::from_elem(n, 1.0).into_dyn(), attributes)
        .unwrap();
    let definitions = BTreeMap::from([("v".to_string(), definition.to_string())]);
    Conform::default().build(&definitions, Arc::new(input), Arc::new(output), Arc::new(store))
}

#[divan::bench(args = ["u", "mean(u * 2 + 1, 'x')", "limit(sqrt(u ** 2) - 273.15, below=0.0)"])]
fn parse(bencher: Bencher, text: &str) {
    bencher.bench_local(|| parse_definition(text).unwrap());
}

#[divan::bench(consts = [1, 10, 100, 1000])]
fn add_scalar_flow<const N: usize>(bencher: Bencher) {
    let flow = setup(N, "u + 1.0");
    let root = flow.root("v").unwrap();

    bencher.bench_local(|| {
        flow.clear_cache();
        flow.value(root, &Index::all()).unwrap()
    });
}

#[divan::bench(consts = [1, 10, 100, 1000])]
fn add_scalar_ndarray<const N: usize>(bencher: Bencher) {
    let n = N;
    let u = Array1::from_shape_vec((n,), vec![1.0; n]).unwrap();

    bencher.bench_local(|| {
        let _ = &u + 1.0;
    });
}

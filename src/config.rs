use std::collections::BTreeMap;

/// How outputs are divided between workers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PartitionMode {
    /// Each worker writes whole output variables.
    #[default]
    Variables,
    /// Each worker writes a contiguous range of records of `dimension` for
    /// every output that has it.
    Records { dimension: String },
}

/// Cost of an output when balancing workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CostModel {
    #[default]
    Uniform,
    /// Number of elements in the output variable.
    Elements,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConformOptions {
    pub workers: usize,
    /// Chunk length for each output dimension evaluated in pieces.
    pub chunks: BTreeMap<String, usize>,
    /// Fail an output whose values break its valid or ok ranges, instead of
    /// logging a warning.
    pub error_on_validation: bool,
    /// Record how each output was computed in a `provenance` attribute.
    pub provenance: bool,
    /// Give numeric literals dimensionless units instead of "no unit".
    pub strict_literal_units: bool,
    pub partition: PartitionMode,
    pub cost: CostModel,
}

impl Default for ConformOptions {
    fn default() -> Self {
        Self {
            workers: 1,
            chunks: BTreeMap::new(),
            error_on_validation: false,
            provenance: true,
            strict_literal_units: false,
            partition: PartitionMode::Variables,
            cost: CostModel::Uniform,
        }
    }
}

impl ConformOptions {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_chunk(mut self, dimension: &str, size: usize) -> Self {
        self.chunks.insert(dimension.to_string(), size);
        self
    }
}

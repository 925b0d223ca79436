use tch::Tensor;

/// `DataInst` is a single raw sample before batching.
///
/// - `index`: identity of the sample within an epoch (e.g. its dataset index)
/// - `data`: one tensor per named data stream, in `data_names` order
/// - `extra_data`: free-form side channel for metadata that is not a tensor
///
/// Produced by an instance-level iterator on every advance and consumed by the
/// batching step.
#[derive(Debug)]
pub struct DataInst {
    pub index: u64,
    pub data: Vec<Tensor>,
    pub extra_data: String,
}

/// Creates a shallow clone: tensor handles are shared, storage is not copied.
impl Clone for DataInst {
    fn clone(&self) -> Self {
        Self {
            index: self.index,
            data: self.data.iter().map(Tensor::shallow_clone).collect(),
            extra_data: self.extra_data.clone(),
        }
    }
}

impl DataInst {
    pub fn new(index: u64, data: Vec<Tensor>) -> Self {
        Self {
            index,
            data,
            extra_data: String::new(),
        }
    }

    /// Attaches side-channel metadata.
    pub fn with_extra_data(mut self, extra: impl Into<String>) -> Self {
        self.extra_data = extra.into();
        self
    }

    /// Number of tensor fields (field arity).
    pub fn num_fields(&self) -> usize {
        self.data.len()
    }
}

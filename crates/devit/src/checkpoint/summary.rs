//! JSON summaries of state dicts.
use crate::checkpoint::StateDict;
use serde::Serialize;
use serde_json::{Map, Value};

/// Shape summary of one tensor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TensorSummary {
    /// Tensor shape.
    pub shape: Vec<usize>,

    /// Element count.
    pub numel: usize,
}

impl TensorSummary {
    /// Summarize a shape.
    pub fn new(shape: Vec<usize>) -> Self {
        let numel = shape.iter().product();
        Self { shape, numel }
    }
}

/// Total element count of a state dict.
pub fn state_dict_numel(state: &StateDict) -> usize {
    state
        .values()
        .map(|data| data.shape.iter().product::<usize>())
        .sum()
}

/// Render ``name -> {shape, numel}`` as a JSON object, in name order.
pub fn summarize_state_dict(state: &StateDict) -> anyhow::Result<Value> {
    let mut obj = Map::new();
    for (name, data) in state {
        obj.insert(
            name.clone(),
            serde_json::to_value(TensorSummary::new(data.shape.clone()))?,
        );
    }
    Ok(Value::Object(obj))
}

/// Pretty-printed [`summarize_state_dict`].
pub fn format_state_dict(state: &StateDict) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(&summarize_state_dict(state)?)?)
}

//! # Named State Dictionaries
//!
//! Flat ``name -> tensor`` maps using the dotted parameter names of the
//! reference checkpoints (``block1.0.attn.q.weight``, ...).
//!
//! Linear weights are stored in ``[out, in]`` layout and transposed to
//! burn's ``[in, out]`` layout on import. LayerNorm ``gamma``/``beta`` are
//! named ``weight``/``bias``.
//!
//! Imports are strict: every parameter must be present with the exact
//! shape, and unconsumed entries are an error.
use burn::module::Param;
use burn::nn::conv::Conv2d;
use burn::nn::{LayerNorm, Linear, PRelu};
use burn::prelude::{Backend, Tensor};
use burn::tensor::TensorData;
use std::collections::BTreeMap;

pub mod legacy;
pub mod summary;

/// Ordered ``name -> tensor`` map.
pub type StateDict = BTreeMap<String, TensorData>;

/// Join a parameter-name prefix and a child name.
pub fn join_name(
    prefix: &str,
    name: &str,
) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

/// Strict consumer of a [`StateDict`].
#[derive(Debug)]
pub struct StateDictReader {
    entries: StateDict,
}

impl StateDictReader {
    /// Wrap a state dict.
    pub fn new(entries: StateDict) -> Self {
        Self { entries }
    }

    /// Number of entries not yet consumed.
    pub fn remaining(&self) -> usize {
        self.entries.len()
    }

    /// Remove and return the named tensor.
    ///
    /// # Arguments
    ///
    /// - `name`: the full parameter name.
    /// - `shape`: the expected (checkpoint layout) shape.
    ///
    /// # Returns
    ///
    /// The tensor data; or an error if the entry is missing or mis-shaped.
    pub fn take(
        &mut self,
        name: &str,
        shape: &[usize],
    ) -> anyhow::Result<TensorData> {
        let data = match self.entries.remove(name) {
            Some(data) => data,
            None => anyhow::bail!("missing parameter: {name}"),
        };
        if data.shape != shape {
            anyhow::bail!(
                "parameter {name}: expected shape {shape:?}, got {:?}",
                data.shape
            );
        }
        Ok(data)
    }

    /// Check that every entry was consumed.
    pub fn finish(self) -> anyhow::Result<()> {
        if !self.entries.is_empty() {
            let names: Vec<&String> = self.entries.keys().collect();
            anyhow::bail!("unexpected parameters: {names:?}");
        }
        Ok(())
    }
}

fn export_param<B: Backend, const D: usize>(
    out: &mut StateDict,
    name: String,
    param: &Param<Tensor<B, D>>,
) {
    out.insert(name, param.val().into_data());
}

fn import_param<B: Backend, const D: usize>(
    reader: &mut StateDictReader,
    name: &str,
    param: Param<Tensor<B, D>>,
) -> anyhow::Result<Param<Tensor<B, D>>> {
    let data = reader.take(name, &param.dims())?;
    Ok(param.map(|t| Tensor::from_data(data, &t.device())))
}

/// Modules with a named checkpoint representation.
pub trait StateDictModule: Sized {
    /// Append this module's tensors under `prefix`.
    fn export_state(
        &self,
        prefix: &str,
        out: &mut StateDict,
    );

    /// Replace this module's tensors with those under `prefix`.
    fn import_state(
        self,
        prefix: &str,
        reader: &mut StateDictReader,
    ) -> anyhow::Result<Self>;
}

impl<B: Backend> StateDictModule for Linear<B> {
    fn export_state(
        &self,
        prefix: &str,
        out: &mut StateDict,
    ) {
        out.insert(
            join_name(prefix, "weight"),
            self.weight.val().transpose().into_data(),
        );
        if let Some(bias) = &self.bias {
            export_param(out, join_name(prefix, "bias"), bias);
        }
    }

    fn import_state(
        mut self,
        prefix: &str,
        reader: &mut StateDictReader,
    ) -> anyhow::Result<Self> {
        let [d_in, d_out] = self.weight.dims();
        let data = reader.take(&join_name(prefix, "weight"), &[d_out, d_in])?;
        self.weight = self
            .weight
            .map(|w| Tensor::<B, 2>::from_data(data, &w.device()).transpose());

        self.bias = match self.bias {
            Some(bias) => Some(import_param(reader, &join_name(prefix, "bias"), bias)?),
            None => None,
        };
        Ok(self)
    }
}

impl<B: Backend> StateDictModule for LayerNorm<B> {
    fn export_state(
        &self,
        prefix: &str,
        out: &mut StateDict,
    ) {
        export_param(out, join_name(prefix, "weight"), &self.gamma);
        export_param(out, join_name(prefix, "bias"), &self.beta);
    }

    fn import_state(
        mut self,
        prefix: &str,
        reader: &mut StateDictReader,
    ) -> anyhow::Result<Self> {
        self.gamma = import_param(reader, &join_name(prefix, "weight"), self.gamma)?;
        self.beta = import_param(reader, &join_name(prefix, "bias"), self.beta)?;
        Ok(self)
    }
}

impl<B: Backend> StateDictModule for Conv2d<B> {
    fn export_state(
        &self,
        prefix: &str,
        out: &mut StateDict,
    ) {
        export_param(out, join_name(prefix, "weight"), &self.weight);
        if let Some(bias) = &self.bias {
            export_param(out, join_name(prefix, "bias"), bias);
        }
    }

    fn import_state(
        mut self,
        prefix: &str,
        reader: &mut StateDictReader,
    ) -> anyhow::Result<Self> {
        self.weight = import_param(reader, &join_name(prefix, "weight"), self.weight)?;
        self.bias = match self.bias {
            Some(bias) => Some(import_param(reader, &join_name(prefix, "bias"), bias)?),
            None => None,
        };
        Ok(self)
    }
}

impl<B: Backend> StateDictModule for PRelu<B> {
    fn export_state(
        &self,
        prefix: &str,
        out: &mut StateDict,
    ) {
        export_param(out, join_name(prefix, "weight"), &self.alpha);
    }

    fn import_state(
        mut self,
        prefix: &str,
        reader: &mut StateDictReader,
    ) -> anyhow::Result<Self> {
        self.alpha = import_param(reader, &join_name(prefix, "weight"), self.alpha)?;
        Ok(self)
    }
}

/// Export a module to a fresh [`StateDict`].
pub fn to_state_dict<M: StateDictModule>(module: &M) -> StateDict {
    let mut out = StateDict::new();
    module.export_state("", &mut out);
    out
}

/// Strictly import a [`StateDict`] into a module.
///
/// Fails on the first missing or mis-shaped parameter, or if any entry
/// is left unconsumed.
pub fn from_state_dict<M: StateDictModule>(
    module: M,
    state: StateDict,
) -> anyhow::Result<M> {
    let total = state.len();
    let mut reader = StateDictReader::new(state);
    let module = module.import_state("", &mut reader)?;
    reader.finish()?;
    tracing::debug!(num_tensors = total, "imported state dict");
    Ok(module)
}

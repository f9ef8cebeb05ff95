//! # DeViT Checkpoint Names
//!
//! Maps the module tree onto the flat reference checkpoint layout:
//!
//! ```text
//! patch_embed{i+1}.{proj,norm}
//! block{i+1}.{j}.norm1
//! block{i+1}.{j}.attn.{q,proj}
//! block{i+1}.{j}.attn.kv.{depth_conv,point_conv}
//! block{i+1}.{j}.attn.{fcs,single_heads,local_convs}.{g}
//! block{i+1}.{j}.norm2
//! block{i+1}.{j}.mlp.{fc1,dwconv.dwconv,fc2}
//! block{i+1}.{j}.mlp.act.weight (PReLU only)
//! norm{i+1}
//! head
//! ```
use crate::checkpoint::{
    StateDict, StateDictModule, StateDictReader, from_state_dict, join_name, to_state_dict,
};
use crate::layers::activation::activation_wrapper::Activation;
use crate::layers::conv::depthwise_separable::DepthwiseSeparableConv;
use crate::layers::conv::spatial_dwconv::SpatialDwConv;
use crate::layers::patching::overlap_patch_embed::OverlapPatchEmbed;
use crate::models::devit::attention::DefactorizedAttention;
use crate::models::devit::block::DevitBlock;
use crate::models::devit::devit_model::Devit;
use crate::models::devit::mlp::SpatialMlp;
use burn::prelude::Backend;

impl<B: Backend> StateDictModule for DepthwiseSeparableConv<B> {
    fn export_state(
        &self,
        prefix: &str,
        out: &mut StateDict,
    ) {
        self.depth_conv
            .export_state(&join_name(prefix, "depth_conv"), out);
        self.point_conv
            .export_state(&join_name(prefix, "point_conv"), out);
    }

    fn import_state(
        mut self,
        prefix: &str,
        reader: &mut StateDictReader,
    ) -> anyhow::Result<Self> {
        self.depth_conv = self
            .depth_conv
            .import_state(&join_name(prefix, "depth_conv"), reader)?;
        self.point_conv = self
            .point_conv
            .import_state(&join_name(prefix, "point_conv"), reader)?;
        Ok(self)
    }
}

impl<B: Backend> StateDictModule for SpatialDwConv<B> {
    fn export_state(
        &self,
        prefix: &str,
        out: &mut StateDict,
    ) {
        self.dwconv.export_state(&join_name(prefix, "dwconv"), out);
    }

    fn import_state(
        mut self,
        prefix: &str,
        reader: &mut StateDictReader,
    ) -> anyhow::Result<Self> {
        self.dwconv = self
            .dwconv
            .import_state(&join_name(prefix, "dwconv"), reader)?;
        Ok(self)
    }
}

impl<B: Backend> StateDictModule for OverlapPatchEmbed<B> {
    fn export_state(
        &self,
        prefix: &str,
        out: &mut StateDict,
    ) {
        self.proj.export_state(&join_name(prefix, "proj"), out);
        self.norm.export_state(&join_name(prefix, "norm"), out);
    }

    fn import_state(
        mut self,
        prefix: &str,
        reader: &mut StateDictReader,
    ) -> anyhow::Result<Self> {
        self.proj = self.proj.import_state(&join_name(prefix, "proj"), reader)?;
        self.norm = self.norm.import_state(&join_name(prefix, "norm"), reader)?;
        Ok(self)
    }
}

impl<B: Backend> StateDictModule for DefactorizedAttention<B> {
    fn export_state(
        &self,
        prefix: &str,
        out: &mut StateDict,
    ) {
        self.q.export_state(&join_name(prefix, "q"), out);
        self.kv.export_state(&join_name(prefix, "kv"), out);
        for group in &self.groups {
            let g = group.index.to_string();
            group
                .fc
                .export_state(&join_name(prefix, &format!("fcs.{g}")), out);
            group
                .single_head
                .export_state(&join_name(prefix, &format!("single_heads.{g}")), out);
            group
                .local_conv
                .export_state(&join_name(prefix, &format!("local_convs.{g}")), out);
        }
        self.proj.export_state(&join_name(prefix, "proj"), out);
    }

    fn import_state(
        mut self,
        prefix: &str,
        reader: &mut StateDictReader,
    ) -> anyhow::Result<Self> {
        self.q = self.q.import_state(&join_name(prefix, "q"), reader)?;
        self.kv = self.kv.import_state(&join_name(prefix, "kv"), reader)?;
        self.groups = self
            .groups
            .into_iter()
            .map(|mut group| {
                let g = group.index.to_string();
                group.fc = group
                    .fc
                    .import_state(&join_name(prefix, &format!("fcs.{g}")), reader)?;
                group.single_head = group
                    .single_head
                    .import_state(&join_name(prefix, &format!("single_heads.{g}")), reader)?;
                group.local_conv = group
                    .local_conv
                    .import_state(&join_name(prefix, &format!("local_convs.{g}")), reader)?;
                Ok(group)
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        self.proj = self.proj.import_state(&join_name(prefix, "proj"), reader)?;
        Ok(self)
    }
}

/// Only learned activations carry parameters.
impl<B: Backend> StateDictModule for Activation<B> {
    fn export_state(
        &self,
        prefix: &str,
        out: &mut StateDict,
    ) {
        if let Activation::PRelu(act) = self {
            act.export_state(prefix, out);
        }
    }

    fn import_state(
        self,
        prefix: &str,
        reader: &mut StateDictReader,
    ) -> anyhow::Result<Self> {
        Ok(match self {
            Activation::PRelu(act) => Activation::PRelu(act.import_state(prefix, reader)?),
            other => other,
        })
    }
}

impl<B: Backend> StateDictModule for SpatialMlp<B> {
    fn export_state(
        &self,
        prefix: &str,
        out: &mut StateDict,
    ) {
        self.fc1.export_state(&join_name(prefix, "fc1"), out);
        self.dwconv.export_state(&join_name(prefix, "dwconv"), out);
        self.act.export_state(&join_name(prefix, "act"), out);
        self.fc2.export_state(&join_name(prefix, "fc2"), out);
    }

    fn import_state(
        mut self,
        prefix: &str,
        reader: &mut StateDictReader,
    ) -> anyhow::Result<Self> {
        self.fc1 = self.fc1.import_state(&join_name(prefix, "fc1"), reader)?;
        self.dwconv = self
            .dwconv
            .import_state(&join_name(prefix, "dwconv"), reader)?;
        self.act = self.act.import_state(&join_name(prefix, "act"), reader)?;
        self.fc2 = self.fc2.import_state(&join_name(prefix, "fc2"), reader)?;
        Ok(self)
    }
}

impl<B: Backend> StateDictModule for DevitBlock<B> {
    fn export_state(
        &self,
        prefix: &str,
        out: &mut StateDict,
    ) {
        self.norm1.export_state(&join_name(prefix, "norm1"), out);
        self.attn.export_state(&join_name(prefix, "attn"), out);
        self.norm2.export_state(&join_name(prefix, "norm2"), out);
        self.mlp.export_state(&join_name(prefix, "mlp"), out);
    }

    fn import_state(
        mut self,
        prefix: &str,
        reader: &mut StateDictReader,
    ) -> anyhow::Result<Self> {
        self.norm1 = self.norm1.import_state(&join_name(prefix, "norm1"), reader)?;
        self.attn = self.attn.import_state(&join_name(prefix, "attn"), reader)?;
        self.norm2 = self.norm2.import_state(&join_name(prefix, "norm2"), reader)?;
        self.mlp = self.mlp.import_state(&join_name(prefix, "mlp"), reader)?;
        Ok(self)
    }
}

impl<B: Backend> StateDictModule for Devit<B> {
    fn export_state(
        &self,
        prefix: &str,
        out: &mut StateDict,
    ) {
        for (i, stage) in self.stages.iter().enumerate() {
            let n = i + 1;
            stage
                .patch_embed
                .export_state(&join_name(prefix, &format!("patch_embed{n}")), out);
            for (j, block) in stage.blocks.iter().enumerate() {
                block.export_state(&join_name(prefix, &format!("block{n}.{j}")), out);
            }
            stage
                .norm
                .export_state(&join_name(prefix, &format!("norm{n}")), out);
        }
        if let Some(head) = &self.head {
            head.export_state(&join_name(prefix, "head"), out);
        }
    }

    fn import_state(
        mut self,
        prefix: &str,
        reader: &mut StateDictReader,
    ) -> anyhow::Result<Self> {
        let mut stages = Vec::with_capacity(self.stages.len());
        for (i, mut stage) in self.stages.into_iter().enumerate() {
            let n = i + 1;
            stage.patch_embed = stage
                .patch_embed
                .import_state(&join_name(prefix, &format!("patch_embed{n}")), reader)?;
            stage.blocks = stage
                .blocks
                .into_iter()
                .enumerate()
                .map(|(j, block)| {
                    block.import_state(&join_name(prefix, &format!("block{n}.{j}")), reader)
                })
                .collect::<anyhow::Result<Vec<_>>>()?;
            stage.norm = stage
                .norm
                .import_state(&join_name(prefix, &format!("norm{n}")), reader)?;

            tracing::debug!(stage = i, remaining = reader.remaining(), "loaded stage");
            stages.push(stage);
        }
        self.stages = stages;

        self.head = match self.head {
            Some(head) => Some(head.import_state(&join_name(prefix, "head"), reader)?),
            None => None,
        };
        Ok(self)
    }
}

impl<B: Backend> Devit<B> {
    /// Export all parameters under their checkpoint names.
    pub fn state_dict(&self) -> StateDict {
        to_state_dict(self)
    }

    /// Replace all parameters from a checkpoint state dict.
    ///
    /// Strict: every parameter must be present with its exact shape, and no
    /// extra entries are allowed. Nothing is returned on failure.
    pub fn load_state_dict(
        self,
        state: StateDict,
    ) -> anyhow::Result<Self> {
        let num_tensors = state.len();
        let model = from_state_dict(self, state)?;
        tracing::info!(num_tensors, "loaded DeViT state dict");
        Ok(model)
    }
}

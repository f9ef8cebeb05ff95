//! # Well-Known DeViT Configurations
use crate::models::devit::DevitConfig;
use crate::prefabs::input::InputConfig;
use crate::prefabs::{PreFabConfig, StaticPreFabConfig, StaticPreFabMap};

/// Static builder for [`DevitPreFabConfig`].
pub type StaticDevitPreFabConfig = StaticPreFabConfig<DevitConfig>;

/// A [`DevitConfig`] Well-Known Pre-Fab.
pub type DevitPreFabConfig = PreFabConfig<DevitConfig>;

const NUM_HEADS: [usize; 4] = [1, 2, 4, 8];
const NARROW_DIMS: [usize; 4] = [32, 64, 128, 256];
const WIDE_DIMS: [usize; 4] = [64, 128, 256, 512];
const MLP_RATIOS: [f64; 4] = [8.0, 6.0, 4.0, 4.0];

fn preset(
    embed_dims: &[usize],
    mlp_ratios: &[f64],
    depths: &[usize],
) -> DevitConfig {
    DevitConfig::build(embed_dims, &NUM_HEADS, mlp_ratios, depths, 1000)
        .with_qkv_bias(true)
        .with_norm_eps(1e-6)
}

/// DeViT b0.
pub fn devit_b0() -> DevitConfig {
    preset(&NARROW_DIMS, &MLP_RATIOS, &[2, 2, 5, 2])
}

/// DeViT b1.
pub fn devit_b1() -> DevitConfig {
    preset(&WIDE_DIMS, &MLP_RATIOS, &[2, 2, 5, 2])
}

/// DeViT b2.
pub fn devit_b2() -> DevitConfig {
    preset(&WIDE_DIMS, &MLP_RATIOS, &[2, 3, 16, 3])
}

/// DeViT b3.
pub fn devit_b3() -> DevitConfig {
    preset(&WIDE_DIMS, &MLP_RATIOS, &[2, 4, 34, 4])
}

/// DeViT b4.
pub fn devit_b4() -> DevitConfig {
    preset(&WIDE_DIMS, &MLP_RATIOS, &[3, 4, 56, 4])
}

/// DeViT b5.
pub fn devit_b5() -> DevitConfig {
    preset(&WIDE_DIMS, &[4.0; 4], &[3, 4, 78, 4])
}

/// Well-known [`super::Devit`] configs.
pub static PREFAB_DEVIT_MAP: StaticPreFabMap<DevitConfig> = StaticPreFabMap {
    name: "devit",
    description: "Well-Known DeViT configs",

    items: &[
        &StaticPreFabConfig {
            name: "devit_b0",
            aliases: &[],
            description: "DeViT-b0: [32, 64, 128, 256] x [2, 2, 5, 2]",
            builder: devit_b0,
            input: InputConfig::imagenet,
        },
        &StaticPreFabConfig {
            name: "devit_b1",
            aliases: &[],
            description: "DeViT-b1: [64, 128, 256, 512] x [2, 2, 5, 2]",
            builder: devit_b1,
            input: InputConfig::imagenet,
        },
        &StaticPreFabConfig {
            name: "devit_b2",
            aliases: &[],
            description: "DeViT-b2: [64, 128, 256, 512] x [2, 3, 16, 3]",
            builder: devit_b2,
            input: InputConfig::imagenet,
        },
        &StaticPreFabConfig {
            name: "devit_b3",
            aliases: &["devit2_b3"],
            description: "DeViT-b3: [64, 128, 256, 512] x [2, 4, 34, 4]",
            builder: devit_b3,
            input: InputConfig::imagenet,
        },
        &StaticPreFabConfig {
            name: "devit_b4",
            aliases: &[],
            description: "DeViT-b4: [64, 128, 256, 512] x [3, 4, 56, 4]",
            builder: devit_b4,
            input: InputConfig::imagenet,
        },
        &StaticPreFabConfig {
            name: "devit_b5",
            aliases: &[],
            description: "DeViT-b5: [64, 128, 256, 512] x [3, 4, 78, 4], mlp_ratio 4",
            builder: devit_b5,
            input: InputConfig::imagenet,
        },
    ],
};

#![recursion_limit = "256"]

use anyhow::Context;
use burn::backend::NdArray;
use burn::prelude::{Module, Tensor};
use burn::tensor::Distribution;
use clap::{Parser, arg};
use devit::checkpoint::summary::{format_state_dict, state_dict_numel};
use devit::layers::activation::activation_wrapper::ActivationConfig;
use devit::models::devit::Devit;
use devit::models::devit::prefabs::PREFAB_DEVIT_MAP;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Name of the pre-fab config.
    #[arg(long, default_value = "devit_b0")]
    preset: String,

    /// Square input image size; defaults to the pre-fab's input size.
    #[arg(long)]
    image_size: Option<usize>,

    /// Batch size of the random input.
    #[arg(long, default_value = "1")]
    batch: usize,

    /// Override the number of classes; `0` for a headless backbone.
    #[arg(long)]
    num_classes: Option<usize>,

    /// MLP activation; defaults to the pre-fab's.
    #[arg(long)]
    act: Option<ActivationConfig>,

    /// Report the per-stage feature maps.
    #[arg(long, default_value = "false")]
    dense: bool,

    /// Print the checkpoint parameter names and shapes.
    #[arg(long, default_value = "false")]
    params: bool,

    /// List the known pre-fabs and exit.
    #[arg(long, default_value = "false")]
    list: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    type B = NdArray<f32>;
    let device = Default::default();

    if args.list {
        for item in PREFAB_DEVIT_MAP.items {
            println!("{:<12} {}", item.name, item.description);
        }
        return Ok(());
    }

    let prefab = PREFAB_DEVIT_MAP.try_lookup(&args.preset)?;
    let mut config = prefab.new_config();
    if let Some(num_classes) = args.num_classes {
        config = config.with_num_classes(num_classes);
    }
    if let Some(act) = args.act.clone() {
        config = config.with_act(act);
    }
    config.try_validate()?;

    let [_, height, width] = prefab.input.input_size;
    let resolution = match args.image_size {
        Some(size) => [size, size],
        None => [height, width],
    };

    let resolutions = config
        .stage_resolutions(resolution)
        .with_context(|| format!("{} at {resolution:?}", prefab.name))?;

    println!("{:#?}", prefab);
    for (i, (stage, grid)) in config.stages.iter().zip(&resolutions).enumerate() {
        println!(
            "stage {i}: embed_dim={} heads={} depth={} grid={grid:?}",
            stage.embed_dim, stage.num_heads, stage.depth
        );
    }

    tracing::info!(preset = prefab.name.as_str(), ?resolution, "building model");
    let model: Devit<B> = config.init(&device);
    let state = model.state_dict();
    println!(
        "parameters: {} ({} tensors)",
        model.num_params(),
        state.len()
    );
    debug_assert_eq!(state_dict_numel(&state), model.num_params());

    if args.params {
        println!("{}", format_state_dict(&state)?);
    }

    let input = Tensor::<B, 4>::random(
        [args.batch, prefab.input.channels(), resolution[0], resolution[1]],
        Distribution::Default,
        &device,
    );
    let input = prefab.input.normalize(input);

    if args.dense {
        for (i, map) in model
            .forward_feature_maps(input.clone())
            .iter()
            .enumerate()
        {
            println!("feature map {i}: {:?}", map.dims());
        }
    }

    let output = model.forward(input);
    println!("output: {:?}", output.dims());

    Ok(())
}

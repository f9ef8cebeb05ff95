//! Conversion of legacy checkpoints with flattened patch-embedding kernels.
use crate::checkpoint::StateDict;

fn is_patch_embed_proj_weight(name: &str) -> bool {
    name.starts_with("patch_embed") && name.ends_with(".proj.weight")
}

/// Reshape flat ``(out, C*p*p)`` patch-embedding projection weights to
/// ``(out, C, p, p)``.
///
/// Entries that are not ``patch_embed*.proj.weight``, that are already
/// rank-4, or whose width is not a multiple of ``p*p`` pass through.
///
/// # Arguments
///
/// - `state`: the legacy state dict.
/// - `patch_size`: the kernel size ``p`` of the flattened projections.
///
/// # Returns
///
/// The converted state dict.
pub fn convert_flat_patch_embed_weights(
    state: StateDict,
    patch_size: usize,
) -> StateDict {
    let area = patch_size * patch_size;
    state
        .into_iter()
        .map(|(name, mut data)| {
            if is_patch_embed_proj_weight(&name) && data.shape.len() == 2 && area > 0 {
                let [out, flat] = [data.shape[0], data.shape[1]];
                if flat % area == 0 {
                    let channels = flat / area;
                    tracing::debug!(
                        name = name.as_str(),
                        channels,
                        patch_size,
                        "unflattening patch embedding weight"
                    );
                    data.shape = vec![out, channels, patch_size, patch_size];
                }
            }
            (name, data)
        })
        .collect()
}

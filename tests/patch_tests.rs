use std::sync::Arc;

use anyhow::Result;
use attention::{Config as AttentionConfig, ExactAttention, PrecisionPolicy};
use candle_core::{DType, Device, IndexOp, Tensor};
use layers::LayerNode;
use model::{Denoiser, ModelConfig, PatchableModel};
use style_aligned::{
    register_shared_norm, restore_shared_norm, PatchConfig, ShareNorm, StyleAlignedArgs,
    StyleAlignedError, StyleAlignedPatch,
};

fn build_model() -> Result<Denoiser> {
    let config = ModelConfig {
        channels: 8,
        n_blocks: 2,
        n_heads: 2,
        head_dim: 4,
        norm_groups: 4,
        ff_ratio: 2,
        dtype: DType::F32,
        device: Device::Cpu,
    };
    let kernel_config = AttentionConfig {
        precision: PrecisionPolicy::ForceF32,
    };
    Ok(Denoiser::with_kernel(
        config,
        Arc::new(ExactAttention::new()),
        kernel_config,
    )?)
}

/// `[batch, 8, 3, 4]` latent whose batch elements all differ.
fn latent(batch: usize) -> Result<Tensor> {
    let total = batch * 8 * 3 * 4;
    let data = (0..total)
        .map(|i| {
            let b = (i / 96) as f32;
            ((i * 7 % 19) as f32) * 0.1 * (1.0 + 0.3 * b) - 0.5 + 0.2 * b
        })
        .collect::<Vec<_>>();
    Ok(Tensor::from_vec(data, (batch, 8, 3, 4), &Device::Cpu)?)
}

fn max_diff(a: &Tensor, b: &Tensor) -> Result<f32> {
    Ok(a.sub(b)?.abs()?.flatten_all()?.max(0)?.to_vec0::<f32>()?)
}

fn count_shared(node: &mut dyn LayerNode) -> usize {
    let own = node
        .norm_handle_mut()
        .map_or(0, |handle| usize::from(handle.is_replaced()));
    own + node
        .children_mut()
        .into_iter()
        .map(count_shared)
        .sum::<usize>()
}

#[test]
fn style_elements_keep_their_output() -> Result<()> {
    let model = build_model()?;
    let input = latent(4)?;
    let plain = model.forward(&input)?;

    for scale in [1.0, 0.5] {
        let patched = StyleAlignedPatch::default().patch(&model, ShareNorm::Both, scale, None)?;
        let styled = patched.forward(&input)?;
        assert_eq!(styled.dims(), plain.dims());

        for style in [0, 2] {
            assert!(max_diff(&styled.i(style)?, &plain.i(style)?)? < 1e-4);
        }
        for other in [1, 3] {
            assert!(max_diff(&styled.i(other)?, &plain.i(other)?)? > 1e-3);
        }
    }
    Ok(())
}

#[test]
fn identical_batches_are_unchanged() -> Result<()> {
    let model = build_model()?;
    let single = latent(1)?;
    let input = Tensor::cat(&[&single, &single, &single, &single], 0)?;

    let patched = StyleAlignedPatch::default().patch(&model, ShareNorm::Both, 1.0, None)?;
    let diff = max_diff(&patched.forward(&input)?, &model.forward(&input)?)?;
    assert!(diff < 1e-4, "diff {diff}");
    Ok(())
}

#[test]
fn patching_leaves_the_source_model_alone() -> Result<()> {
    let model = build_model()?;
    let input = latent(2)?;
    let before = model.forward(&input)?;

    let mut patched = StyleAlignedPatch::default().patch(&model, ShareNorm::Both, 1.0, None)?;
    assert!(patched.self_attention_hook().is_some());
    // Two blocks of (group, layer, layer) plus the output group norm.
    assert_eq!(count_shared(&mut patched), 7);

    assert!(model.self_attention_hook().is_none());
    assert_eq!(count_shared(&mut model.clone()), 0);
    assert!(max_diff(&model.forward(&input)?, &before)? == 0.0);
    Ok(())
}

#[test]
fn share_norm_modes_select_layers() -> Result<()> {
    let model = build_model()?;
    let patch = StyleAlignedPatch::default();
    for (mode, expected) in [
        (ShareNorm::Disabled, 0),
        (ShareNorm::Group, 3),
        (ShareNorm::Layer, 4),
        (ShareNorm::Both, 7),
    ] {
        let mut patched = patch.patch(&model, mode, 1.0, None)?;
        assert_eq!(count_shared(&mut patched), expected, "{mode}");
        assert!(patched.self_attention_hook().is_some());
    }
    Ok(())
}

#[test]
fn repatching_does_not_stack_wrappers() -> Result<()> {
    let model = build_model()?;
    let input = latent(4)?;
    let patch = StyleAlignedPatch::default();

    let once = patch.patch(&model, ShareNorm::Both, 1.0, None)?;
    let mut twice = patch.patch(&once, ShareNorm::Both, 1.0, None)?;
    assert_eq!(count_shared(&mut twice), 7);
    assert!(max_diff(&once.forward(&input)?, &twice.forward(&input)?)? < 1e-6);
    Ok(())
}

#[test]
fn restoring_norms_recovers_attention_only_behaviour() -> Result<()> {
    let model = build_model()?;
    let input = latent(4)?;
    let patch = StyleAlignedPatch::default();

    let attention_only = patch.patch(&model, ShareNorm::Disabled, 1.0, None)?;
    let mut restored = patch.patch(&model, ShareNorm::Both, 1.0, None)?;
    let registry = register_shared_norm(&mut restored, true, true)?;
    assert_eq!(restore_shared_norm(&mut restored, &registry)?, 7);

    assert_eq!(count_shared(&mut restored), 0);
    assert!(max_diff(&restored.forward(&input)?, &attention_only.forward(&input)?)? < 1e-6);
    Ok(())
}

#[test]
fn invalid_scales_are_rejected() -> Result<()> {
    let model = build_model()?;
    for scale in [-0.1, 1.5, f64::NAN] {
        let err = StyleAlignedPatch::default()
            .patch(&model, ShareNorm::Both, scale, None)
            .unwrap_err();
        assert!(matches!(err, StyleAlignedError::InvalidScale(_)));
    }
    Ok(())
}

#[test]
fn config_driven_patch_matches_direct_patch() -> Result<()> {
    let model = build_model()?;
    let input = latent(4)?;
    let config: PatchConfig = serde_json::from_str(
        r#"{"share_norm": "group", "scale": 0.75, "args": {"adain_keys": false}}"#,
    )?;

    let args = StyleAlignedArgs {
        adain_keys: false,
        ..StyleAlignedArgs::default()
    };
    let style = Tensor::zeros((1, 3, 16, 16), DType::F32, &Device::Cpu)?;
    let direct = StyleAlignedPatch::new(args).patch(&model, ShareNorm::Group, 0.75, None)?;
    let configured = StyleAlignedPatch::apply(&model, &config, Some(style))?;

    assert!(max_diff(&direct.forward(&input)?, &configured.forward(&input)?)? < 1e-6);
    Ok(())
}

use candle_core::{DType, Device, Tensor};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use layers::norm::{GroupNorm, LayerNorm, NormConfig, NormKind, NormalizationLayer};

fn bench_norms(c: &mut Criterion) {
    let device = Device::Cpu;
    let batch = 4usize;
    let channels = &[64usize, 320, 640];
    let dtypes = &[DType::F16, DType::F32];

    for &dtype in dtypes {
        let mut group = c.benchmark_group(format!("norm/{dtype:?}"));
        for &width in channels {
            let weight = Tensor::ones((width,), dtype, &device).expect("weight");
            let bias = Tensor::zeros((width,), dtype, &device).expect("bias");

            let tokens = Tensor::randn(0f32, 1.0, (batch, 256, width), &device)
                .expect("tokens")
                .to_dtype(dtype)
                .expect("cast tokens");
            let layer_norm = LayerNorm::new(
                weight.clone(),
                bias.clone(),
                NormConfig::new(width, NormKind::LayerNorm),
            )
            .expect("layer norm");

            let latents = Tensor::randn(0f32, 1.0, (batch, width, 16, 16), &device)
                .expect("latents")
                .to_dtype(dtype)
                .expect("cast latents");
            let group_norm = GroupNorm::new(
                32,
                weight,
                bias,
                NormConfig::new(width, NormKind::LayerNorm),
            )
            .expect("group norm");

            group.throughput(Throughput::Elements((batch * 256 * width) as u64));

            group.bench_with_input(
                BenchmarkId::new("layer", width),
                &(layer_norm, tokens),
                |b, (norm, input)| {
                    b.iter(|| black_box(norm.forward(black_box(input)).expect("forward")));
                },
            );

            group.bench_with_input(
                BenchmarkId::new("group", width),
                &(group_norm, latents),
                |b, (norm, input)| {
                    b.iter(|| black_box(norm.forward(black_box(input)).expect("forward")));
                },
            );
        }
        group.finish();
    }
}

criterion_group!(benches, bench_norms);
criterion_main!(benches);

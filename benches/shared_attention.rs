use attention::{scaled_dot_product, Config, ExactAttention};
use candle_core::{DType, Device, Tensor};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use style_aligned::{SharedAttentionProcessor, StyleAlignedArgs};

fn bench_shared_attention(c: &mut Criterion) {
    let device = Device::Cpu;
    let batch = 4usize;
    let heads = 8usize;
    let kernel = ExactAttention::new();
    let config = Config::default();

    for &dtype in &[DType::F16, DType::F32] {
        let mut group = c.benchmark_group(format!("shared_attention/{dtype:?}"));
        for &(seq, hidden) in &[(256usize, 320usize), (1024, 640)] {
            let projection = || {
                Tensor::randn(0f32, 1.0, (batch, seq, hidden), &device)
                    .expect("projection")
                    .to_dtype(dtype)
                    .expect("cast projection")
            };
            let (q, k, v) = (projection(), projection(), projection());
            group.throughput(Throughput::Elements((batch * seq * hidden) as u64));

            for (label, share) in [("plain", false), ("shared", true)] {
                let args = StyleAlignedArgs {
                    share_attention: share,
                    adain_queries: share,
                    adain_keys: share,
                    ..StyleAlignedArgs::default()
                };
                let processor = SharedAttentionProcessor::new(args, 1.0, None);
                group.bench_with_input(
                    BenchmarkId::new(label, seq),
                    &(q.clone(), k.clone(), v.clone()),
                    |b, (q, k, v)| {
                        b.iter(|| {
                            let (q, k, v) = processor.process(q, k, v).expect("process");
                            black_box(
                                scaled_dot_product(&kernel, &q, &k, &v, None, heads, &config)
                                    .expect("attention"),
                            )
                        });
                    },
                );
            }
        }
        group.finish();
    }
}

criterion_group!(benches, bench_shared_attention);
criterion_main!(benches);

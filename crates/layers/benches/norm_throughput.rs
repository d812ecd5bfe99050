use candle_core::{DType, Device, Tensor};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use layers::{
    dtypes::PrecisionPolicy,
    norm::{LayerNorm, NormConfig},
};
use rand::{rngs::StdRng, SeedableRng};

fn bench_layer_norm(c: &mut Criterion) {
    let device = Device::Cpu;
    let batch = 8usize;
    let seq = 32usize;

    for &dtype in &[DType::F16, DType::BF16, DType::F32] {
        let mut group = c.benchmark_group(format!("layer_norm/{dtype:?}"));
        for &hidden in &[256usize, 512, 1024] {
            let input = Tensor::randn(0f32, 1.0, (batch, seq, hidden), &device)
                .expect("input")
                .to_dtype(dtype)
                .expect("cast input");
            let policy = PrecisionPolicy::from_parameter_dtype(dtype);
            let mut rng = StdRng::seed_from_u64(0);
            let norm = LayerNorm::with_defaults(NormConfig::new(hidden), &mut rng, &device, dtype)
                .expect("layer norm");

            group.throughput(Throughput::Elements((batch * seq * hidden) as u64));
            group.bench_with_input(BenchmarkId::new("layer", hidden), &input, |b, input| {
                b.iter(|| {
                    let out = norm.forward(black_box(input), &policy).expect("forward");
                    black_box(out);
                });
            });
        }
        group.finish();
    }
}

criterion_group!(benches, bench_layer_norm);
criterion_main!(benches);

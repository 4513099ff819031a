use burn_bilinear::{BilinearSampler, SamplerShape};
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};


criterion_group! {
    name = bilinear_benchmarks;
    config = Criterion::default().sample_size(100);
    targets = forward_benchmark, backward_benchmark,
}
criterion_main!(bilinear_benchmarks);


fn shapes() -> [(SamplerShape, &'static str); 3] {
    [
        (SamplerShape::new(1, 64, 32, 32, 1024), "c64_32x32_s1024"),
        (SamplerShape::new(4, 64, 64, 64, 4096), "n4_c64_64x64_s4096"),
        (SamplerShape::new(8, 256, 16, 16, 256), "n8_c256_16x16_s256"),
    ]
}

fn problem(shape: &SamplerShape) -> (Vec<f32>, Vec<f32>, Vec<f32>) {
    let input = (0..shape.input_len())
        .map(|v| (v % 97) as f32 / 97.0)
        .collect();
    let coords = (0..shape.coord_len())
        .map(|k| ((k * 7919) % 1009) as f32 / 1009.0 * 2.2 - 1.1)
        .collect();
    let output_grad = vec![1.0; shape.output_len()];

    (input, coords, output_grad)
}


fn forward_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("bilinear_interp_forward");
    for (shape, name) in shapes() {
        let sampler = BilinearSampler::new(shape);
        let (input, coords, _) = problem(&shape);
        let mut output = vec![0.0; shape.output_len()];

        group.throughput(Throughput::Elements((shape.batch * shape.samples) as u64));
        group.bench_with_input(BenchmarkId::new("serial", name), &shape, |b, _| {
            b.iter(|| sampler.forward(&input, &coords, &mut output).unwrap());
        });

        #[cfg(feature = "parallel")]
        group.bench_with_input(BenchmarkId::new("parallel", name), &shape, |b, _| {
            b.iter(|| sampler.forward_parallel(&input, &coords, &mut output).unwrap());
        });
    }
    group.finish();
}

fn backward_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("bilinear_interp_backward");
    for (shape, name) in shapes() {
        let sampler = BilinearSampler::new(shape);
        let (input, coords, output_grad) = problem(&shape);
        let mut input_grad = vec![0.0; shape.input_len()];
        let mut coords_grad = vec![0.0; shape.coord_len()];

        group.throughput(Throughput::Elements((shape.batch * shape.samples) as u64));
        group.bench_with_input(BenchmarkId::new("serial", name), &shape, |b, _| {
            b.iter(|| {
                sampler
                    .backward(&output_grad, &input, &coords, &mut input_grad, &mut coords_grad)
                    .unwrap()
            });
        });

        #[cfg(feature = "parallel")]
        group.bench_with_input(BenchmarkId::new("parallel", name), &shape, |b, _| {
            b.iter(|| {
                sampler
                    .backward_parallel(&output_grad, &input, &coords, &mut input_grad, &mut coords_grad)
                    .unwrap()
            });
        });
    }
    group.finish();
}

//! Checks the bilinear interp kernel against a recorded reference, or against
//! central differences on random data.
//!
//! Usage:
//!   bilinear_check --reference assets/correctness/bilinear_reference.safetensors
//!   bilinear_check -n 2 -c 8 --height 16 --width 16 -s 64 --dump reference.safetensors

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use burn::{
    backend::NdArray,
    prelude::*,
    tensor::Distribution,
};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use burn_bilinear::{
    correctness::{run_correctness, BilinearReference},
    gradcheck::{check_gradients, GradCheckConfig},
    BilinearSampler,
    SamplerShape,
};

type CheckBackend = NdArray<f32>;


#[derive(Parser, Debug)]
#[command(name = "bilinear_check")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Recorded reference to compare against; skips random data
    #[arg(short, long, value_name = "FILE")]
    reference: Option<PathBuf>,

    #[arg(short = 'n', long, default_value_t = 2)]
    batch: usize,

    #[arg(short, long, default_value_t = 4)]
    channels: usize,

    #[arg(long, default_value_t = 8)]
    height: usize,

    #[arg(long, default_value_t = 8)]
    width: usize,

    #[arg(short, long, default_value_t = 16)]
    samples: usize,

    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Gradient check settings, as saved by `GradCheckConfig::save`
    #[arg(long, value_name = "FILE")]
    gradcheck: Option<PathBuf>,

    /// Writes the random problem and its results as a reference
    #[arg(long, value_name = "FILE")]
    dump: Option<PathBuf>,

    /// Splits batch elements across threads
    #[arg(long)]
    parallel: bool,
}


fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    match &args.reference {
        Some(path) => check_reference(path),
        None => check_random(&args),
    }
}


fn check_reference(path: &Path) -> anyhow::Result<()> {
    let reference = BilinearReference::load(path)
        .with_context(|| format!("failed to load reference {}", path.display()))?;
    info!(shape = ?reference.shape()?, "loaded reference");

    let stats = run_correctness(&reference)?;
    println!("output:      {:?}", stats.output);
    if let Some(input_grad) = stats.input_grad {
        println!("input_grad:  {input_grad:?}");
    }
    if let Some(coords_grad) = stats.coords_grad {
        println!("coords_grad: {coords_grad:?}");
    }

    if !stats.within_defaults() {
        bail!("kernel diverges from reference {}", path.display());
    }

    Ok(())
}


fn check_random(args: &Args) -> anyhow::Result<()> {
    let shape = SamplerShape::from_dims(
        [args.batch, args.channels, args.height, args.width],
        [args.batch, 2, args.samples],
    )?;
    let device = <CheckBackend as Backend>::Device::default();
    CheckBackend::seed(args.seed);

    // coordinates reach past the grid so border fading is covered
    let input = random(shape.input_dims(), Distribution::Uniform(-1.0, 1.0), &device)?;
    let coords = random(shape.coord_dims(), Distribution::Uniform(-1.2, 1.2), &device)?;
    let output_grad = random(shape.output_dims(), Distribution::Uniform(-1.0, 1.0), &device)?;

    let sampler = BilinearSampler::new(shape);
    info!(?shape, parallel = args.parallel, "running random problem");

    let mut output = vec![0.0; shape.output_len()];
    let mut input_grad = vec![0.0; shape.input_len()];
    let mut coords_grad = vec![0.0; shape.coord_len()];
    let start = std::time::Instant::now();
    if args.parallel {
        run_parallel(&sampler, &input, &coords, &output_grad, &mut output, &mut input_grad, &mut coords_grad)?;
    } else {
        sampler.forward(&input, &coords, &mut output)?;
        sampler.backward(&output_grad, &input, &coords, &mut input_grad, &mut coords_grad)?;
    }
    info!(elapsed = ?start.elapsed(), "forward and backward");

    let config = match &args.gradcheck {
        Some(path) => GradCheckConfig::load(path)
            .map_err(|err| anyhow::anyhow!("failed to load {}: {err:?}", path.display()))?,
        None => GradCheckConfig::new(),
    };

    let report = check_gradients(&sampler, &input, &coords, &config)?;
    println!("input_grad:  {:?}", report.input);
    println!("coords_grad: {:?}", report.coords);
    println!(
        "checked {} coordinates, skipped {} near integer pixels",
        report.checked_coords,
        report.skipped_coords,
    );

    if let Some(path) = &args.dump {
        BilinearReference::record(shape, input, coords, Some(output_grad))?
            .save(path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!(path = %path.display(), "wrote reference");
    }

    if !report.passed() {
        bail!("analytic gradients differ from central differences by more than {}", report.tolerance);
    }

    Ok(())
}


fn random<const D: usize>(
    dims: [usize; D],
    distribution: Distribution,
    device: &<CheckBackend as Backend>::Device,
) -> anyhow::Result<Vec<f32>> {
    Tensor::<CheckBackend, D>::random(dims, distribution, device)
        .into_data()
        .to_vec::<f32>()
        .map_err(|err| anyhow::anyhow!("failed to read random tensor: {err:?}"))
}


#[cfg(feature = "parallel")]
fn run_parallel(
    sampler: &BilinearSampler,
    input: &[f32],
    coords: &[f32],
    output_grad: &[f32],
    output: &mut [f32],
    input_grad: &mut [f32],
    coords_grad: &mut [f32],
) -> anyhow::Result<()> {
    sampler.forward_parallel(input, coords, output)?;
    sampler.backward_parallel(output_grad, input, coords, input_grad, coords_grad)?;
    Ok(())
}

#[cfg(not(feature = "parallel"))]
fn run_parallel(
    _sampler: &BilinearSampler,
    _input: &[f32],
    _coords: &[f32],
    _output_grad: &[f32],
    _output: &mut [f32],
    _input_grad: &mut [f32],
    _coords_grad: &mut [f32],
) -> anyhow::Result<()> {
    bail!("--parallel requires building with `--features parallel`")
}

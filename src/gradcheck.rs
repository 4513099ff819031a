//! Central-difference check of the analytic backward pass.
//!
//! The loss is the sum of all sampled values, so the upstream gradient is
//! all ones. Input gradients are exact for a linear loss; coordinate
//! gradients are only compared where the perturbation cannot cross an integer
//! pixel coordinate, since the weight function has kinks there.

use burn::prelude::*;
use tracing::debug;

use crate::{
    correctness::MetricStats,
    error,
    kernels::bilinear_interp::kernel::unnormalize,
    sampler::BilinearSampler,
};


#[derive(Config, Debug)]
pub struct GradCheckConfig {
    /// Perturbation in normalized coordinate / feature units.
    #[config(default = 1e-3)]
    pub epsilon: f32,

    /// Largest accepted absolute difference.
    #[config(default = 2e-2)]
    pub tolerance: f32,

    /// Extra clearance, in pixels, kept from integer pixel coordinates.
    #[config(default = 1e-2)]
    pub kink_margin: f32,
}

impl Default for GradCheckConfig {
    fn default() -> Self {
        Self::new()
    }
}


#[derive(Debug, Clone)]
pub struct GradCheckReport {
    pub input: MetricStats,
    pub coords: MetricStats,
    pub checked_coords: usize,
    pub skipped_coords: usize,
    pub tolerance: f32,
}

impl GradCheckReport {
    pub fn passed(&self) -> bool {
        self.input.max_abs <= self.tolerance && self.coords.max_abs <= self.tolerance
    }
}


pub fn check_gradients(
    sampler: &BilinearSampler,
    input: &[f32],
    coords: &[f32],
    config: &GradCheckConfig,
) -> error::Result<GradCheckReport> {
    let shape = *sampler.shape();

    let ones = vec![1.0; shape.output_len()];
    let mut input_grad = vec![0.0; shape.input_len()];
    let mut coords_grad = vec![0.0; shape.coord_len()];
    sampler.backward(&ones, input, coords, &mut input_grad, &mut coords_grad)?;

    let mut output = vec![0.0; shape.output_len()];
    let mut loss = |input: &[f32], coords: &[f32]| -> error::Result<f64> {
        sampler.forward(input, coords, &mut output)?;
        Ok(output.iter().map(|&v| v as f64).sum())
    };

    let step = config.epsilon as f64;

    let mut numeric_input = Vec::with_capacity(input.len());
    let mut perturbed = input.to_vec();
    for k in 0..input.len() {
        perturbed[k] = input[k] + config.epsilon;
        let plus = loss(&perturbed, coords)?;
        perturbed[k] = input[k] - config.epsilon;
        let minus = loss(&perturbed, coords)?;
        perturbed[k] = input[k];

        numeric_input.push(((plus - minus) / (2.0 * step)) as f32);
    }

    let mut analytic_coords = Vec::new();
    let mut numeric_coords = Vec::new();
    let mut skipped_coords = 0;
    let mut perturbed = coords.to_vec();
    let samples = shape.samples;
    for k in 0..coords.len() {
        // layout per batch element: S x values scaled by H, then S y values scaled by W
        let extent = if k % (2 * samples) < samples {
            shape.height
        } else {
            shape.width
        };

        let pixel = unnormalize(coords[k], extent);
        let pixel_step = config.epsilon * extent as f32 / 2.0;
        let clearance = (pixel - pixel.round()).abs();
        if clearance <= pixel_step + config.kink_margin {
            skipped_coords += 1;
            continue;
        }

        perturbed[k] = coords[k] + config.epsilon;
        let plus = loss(input, &perturbed)?;
        perturbed[k] = coords[k] - config.epsilon;
        let minus = loss(input, &perturbed)?;
        perturbed[k] = coords[k];

        analytic_coords.push(coords_grad[k]);
        numeric_coords.push(((plus - minus) / (2.0 * step)) as f32);
    }

    let report = GradCheckReport {
        input: MetricStats::compute(&input_grad, &numeric_input),
        coords: MetricStats::compute(&analytic_coords, &numeric_coords),
        checked_coords: analytic_coords.len(),
        skipped_coords,
        tolerance: config.tolerance,
    };
    debug!(?report, "gradient check");

    Ok(report)
}

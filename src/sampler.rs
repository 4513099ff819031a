use tracing::trace_span;

use crate::{
    error::Result,
    kernels::bilinear_interp::kernel::{
        sample_plane,
        sample_plane_backward,
        unnormalize,
    },
    shape::SamplerShape,
};


/// Bilinear sampling kernel bound to one [`SamplerShape`].
///
/// Buffers are flat and row-major: input `[N, C, H, W]`, coordinates
/// `[N, 2, S]` (all x values of a batch element, then all y values), output
/// `[N, S, C]`. The sampler only reads and writes the slices it is handed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BilinearSampler {
    shape: SamplerShape,
}

impl BilinearSampler {
    pub fn new(shape: SamplerShape) -> Self {
        Self { shape }
    }

    pub fn shape(&self) -> &SamplerShape {
        &self.shape
    }

    pub fn forward(
        &self,
        input: &[f32],        // [N, C, H, W]
        coords: &[f32],       // [N, 2, S]
        output: &mut [f32],   // [N, S, C]
    ) -> Result<()> {
        self.check_forward(input, coords, output)?;

        let shape = &self.shape;
        let _span = trace_span!(
            "bilinear_interp_forward",
            n = shape.batch,
            c = shape.channels,
            h = shape.height,
            w = shape.width,
            s = shape.samples,
        ).entered();

        output.fill(0.0);

        for i in 0..shape.batch {
            self.forward_item(
                item(input, i, shape.input_item_len()),
                item(coords, i, shape.coord_item_len()),
                item_mut(output, i, shape.output_item_len()),
            );
        }

        Ok(())
    }

    pub fn backward(
        &self,
        output_grad: &[f32],      // [N, S, C]
        input: &[f32],            // [N, C, H, W]
        coords: &[f32],           // [N, 2, S]
        input_grad: &mut [f32],   // [N, C, H, W]
        coords_grad: &mut [f32],  // [N, 2, S]
    ) -> Result<()> {
        self.check_backward(output_grad, input, coords, input_grad, coords_grad)?;

        let shape = &self.shape;
        let _span = trace_span!(
            "bilinear_interp_backward",
            n = shape.batch,
            c = shape.channels,
            h = shape.height,
            w = shape.width,
            s = shape.samples,
        ).entered();

        input_grad.fill(0.0);
        coords_grad.fill(0.0);

        for i in 0..shape.batch {
            self.backward_item(
                item(output_grad, i, shape.output_item_len()),
                item(input, i, shape.input_item_len()),
                item(coords, i, shape.coord_item_len()),
                item_mut(input_grad, i, shape.input_item_len()),
                item_mut(coords_grad, i, shape.coord_item_len()),
            );
        }

        Ok(())
    }

    fn forward_item(
        &self,
        input: &[f32],       // [C, H, W]
        coords: &[f32],      // [2, S]
        output: &mut [f32],  // [S, C]
    ) {
        let SamplerShape { channels, height, width, samples, .. } = self.shape;
        let plane_len = self.shape.plane_len();

        for s in 0..samples {
            let x = unnormalize(coords[s], height);
            let y = unnormalize(coords[s + samples], width);

            for j in 0..channels {
                let plane = &input[j * plane_len..(j + 1) * plane_len];
                output[s * channels + j] = sample_plane(plane, height, width, x, y);
            }
        }
    }

    fn backward_item(
        &self,
        output_grad: &[f32],      // [S, C]
        input: &[f32],            // [C, H, W]
        coords: &[f32],           // [2, S]
        input_grad: &mut [f32],   // [C, H, W]
        coords_grad: &mut [f32],  // [2, S]
    ) {
        let SamplerShape { channels, height, width, samples, .. } = self.shape;
        let plane_len = self.shape.plane_len();

        for s in 0..samples {
            let x = unnormalize(coords[s], height);
            let y = unnormalize(coords[s + samples], width);

            for j in 0..channels {
                let planes = j * plane_len..(j + 1) * plane_len;
                let (dpx, dpy) = sample_plane_backward(
                    output_grad[s * channels + j],
                    &input[planes.clone()],
                    &mut input_grad[planes],
                    height,
                    width,
                    x,
                    y,
                );

                coords_grad[s] += dpx;
                coords_grad[s + samples] += dpy;
            }
        }
    }

    fn check_forward(
        &self,
        input: &[f32],
        coords: &[f32],
        output: &[f32],
    ) -> Result<()> {
        SamplerShape::check_len("input", self.shape.input_len(), input.len())?;
        SamplerShape::check_len("coords", self.shape.coord_len(), coords.len())?;
        SamplerShape::check_len("output", self.shape.output_len(), output.len())
    }

    fn check_backward(
        &self,
        output_grad: &[f32],
        input: &[f32],
        coords: &[f32],
        input_grad: &[f32],
        coords_grad: &[f32],
    ) -> Result<()> {
        SamplerShape::check_len("input", self.shape.input_len(), input.len())?;
        SamplerShape::check_len("coords", self.shape.coord_len(), coords.len())?;
        SamplerShape::check_len("output_grad", self.shape.output_len(), output_grad.len())?;
        SamplerShape::check_len("input_grad", self.shape.input_len(), input_grad.len())?;
        SamplerShape::check_len("coords_grad", self.shape.coord_len(), coords_grad.len())
    }
}


#[cfg(feature = "parallel")]
mod parallel {
    use rayon::prelude::*;
    use tracing::trace_span;

    use super::BilinearSampler;
    use crate::error::Result;

    impl BilinearSampler {
        /// [`BilinearSampler::forward`] split across batch elements.
        pub fn forward_parallel(
            &self,
            input: &[f32],
            coords: &[f32],
            output: &mut [f32],
        ) -> Result<()> {
            if !self.splits_evenly() {
                return self.forward(input, coords, output);
            }

            self.check_forward(input, coords, output)?;
            let _span = trace_span!("bilinear_interp_forward_parallel", n = self.shape.batch).entered();

            let input_len = self.shape.input_item_len();
            let coord_len = self.shape.coord_item_len();

            output
                .par_chunks_mut(self.shape.output_item_len())
                .zip(input.par_chunks(input_len))
                .zip(coords.par_chunks(coord_len))
                .for_each(|((output, input), coords)| {
                    output.fill(0.0);
                    self.forward_item(input, coords, output);
                });

            Ok(())
        }

        /// [`BilinearSampler::backward`] split across batch elements.
        ///
        /// Each batch element owns its slice of both gradient buffers, so
        /// workers never accumulate into a shared cell.
        pub fn backward_parallel(
            &self,
            output_grad: &[f32],
            input: &[f32],
            coords: &[f32],
            input_grad: &mut [f32],
            coords_grad: &mut [f32],
        ) -> Result<()> {
            if !self.splits_evenly() {
                return self.backward(output_grad, input, coords, input_grad, coords_grad);
            }

            self.check_backward(output_grad, input, coords, input_grad, coords_grad)?;
            let _span = trace_span!("bilinear_interp_backward_parallel", n = self.shape.batch).entered();

            let input_len = self.shape.input_item_len();
            let coord_len = self.shape.coord_item_len();
            let output_len = self.shape.output_item_len();

            input_grad
                .par_chunks_mut(input_len)
                .zip(coords_grad.par_chunks_mut(coord_len))
                .zip(output_grad.par_chunks(output_len))
                .zip(input.par_chunks(input_len))
                .zip(coords.par_chunks(coord_len))
                .for_each(|((((input_grad, coords_grad), output_grad), input), coords)| {
                    input_grad.fill(0.0);
                    coords_grad.fill(0.0);
                    self.backward_item(output_grad, input, coords, input_grad, coords_grad);
                });

            Ok(())
        }

        // chunking needs non-empty items on every buffer
        fn splits_evenly(&self) -> bool {
            self.shape.batch > 0
                && self.shape.input_item_len() > 0
                && self.shape.coord_item_len() > 0
                && self.shape.output_item_len() > 0
        }
    }
}


fn item(buffer: &[f32], index: usize, len: usize) -> &[f32] {
    &buffer[index * len..(index + 1) * len]
}

fn item_mut(buffer: &mut [f32], index: usize, len: usize) -> &mut [f32] {
    &mut buffer[index * len..(index + 1) * len]
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BilinearError;

    // inverse of `unnormalize`
    fn normalized(pixel: f32, extent: usize) -> f32 {
        pixel * 2.0 / extent as f32 - 1.0
    }

    fn single_point(
        height: usize,
        width: usize,
        x: f32,
        y: f32,
    ) -> (BilinearSampler, Vec<f32>) {
        let sampler = BilinearSampler::new(SamplerShape::new(1, 1, height, width, 1));
        (sampler, vec![normalized(x, height), normalized(y, width)])
    }

    fn grid_4x4_with_peak() -> Vec<f32> {
        let mut input = vec![0.0; 16];
        input[1 * 4 + 1] = 10.0;
        input
    }

    #[test]
    fn samples_exact_pixel() {
        let (sampler, coords) = single_point(4, 4, 1.0, 1.0);
        let mut output = [0.0];

        sampler.forward(&grid_4x4_with_peak(), &coords, &mut output).unwrap();

        assert_eq!(output[0], 10.0);
    }

    #[test]
    fn outside_point_has_zero_value_and_gradient() {
        let (sampler, coords) = single_point(4, 4, -1.0, -1.0);
        let input = grid_4x4_with_peak();
        let mut output = [7.0];

        sampler.forward(&input, &coords, &mut output).unwrap();
        assert_eq!(output[0], 0.0);

        let mut input_grad = vec![3.0; 16];
        let mut coords_grad = vec![3.0; 2];
        sampler
            .backward(&[1.0], &input, &coords, &mut input_grad, &mut coords_grad)
            .unwrap();

        assert!(input_grad.iter().all(|&g| g == 0.0));
        assert!(coords_grad.iter().all(|&g| g == 0.0));
    }

    #[test]
    fn uniform_neighborhood_is_reproduced() {
        let (sampler, coords) = single_point(4, 4, 0.5, 0.5);
        let input = vec![2.5; 16];
        let mut output = [0.0];

        sampler.forward(&input, &coords, &mut output).unwrap();

        assert!((output[0] - 2.5).abs() < 1e-6);
    }

    #[test]
    fn far_outside_points_are_exactly_zero() {
        let sampler = BilinearSampler::new(SamplerShape::new(1, 2, 4, 4, 4));
        let input = vec![1.0; 2 * 16];
        // x values, then y values
        let coords = vec![
            -3.0, 1.5, 0.0, 2.0, //
            0.0, 0.0, 5.0, -2.0,
        ];
        let mut output = vec![1.0; 4 * 2];

        sampler.forward(&input, &coords, &mut output).unwrap();

        assert!(output.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn integer_pixels_are_exact_in_every_channel() {
        let shape = SamplerShape::new(2, 3, 4, 8, 2);
        let sampler = BilinearSampler::new(shape);
        let input: Vec<f32> = (0..shape.input_len()).map(|v| v as f32 * 0.5).collect();

        // (x, y) = (2, 3) and (1, 0) for both batch elements
        let xs = [normalized(2.0, 4), normalized(1.0, 4)];
        let ys = [normalized(3.0, 8), normalized(0.0, 8)];
        let coords: Vec<f32> = (0..2)
            .flat_map(|_| xs.iter().chain(ys.iter()).copied())
            .collect();
        let mut output = vec![0.0; shape.output_len()];

        sampler.forward(&input, &coords, &mut output).unwrap();

        for i in 0..2 {
            for (s, (m, n)) in [(2, 3), (1, 0)].into_iter().enumerate() {
                for j in 0..3 {
                    let expected = input[((i * 3 + j) * 4 + m) * 8 + n];
                    assert_eq!(output[(i * 2 + s) * 3 + j], expected);
                }
            }
        }
    }

    #[test]
    fn zero_input_yields_zero_output() {
        let shape = SamplerShape::from_dims([3, 2, 6, 5], [3, 2, 4]).unwrap();
        let sampler = BilinearSampler::new(shape);
        let coords: Vec<f32> = (0..shape.coord_len())
            .map(|k| ((k * 7 % 11) as f32 / 11.0) * 2.0 - 1.0)
            .collect();
        let mut output = vec![f32::NAN; shape.output_len()];

        sampler
            .forward(&vec![0.0; shape.input_len()], &coords, &mut output)
            .unwrap();

        assert_eq!(output.len(), 3 * 4 * 2);
        assert!(output.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn input_gradient_mirrors_forward_weights() {
        let sampler = BilinearSampler::new(SamplerShape::new(1, 1, 4, 4, 1));
        let ones = vec![1.0; 16];

        for (x, y) in [(0.3, 2.7), (3.5, 1.25), (-0.4, 0.0), (2.0, 3.9), (1.0, 1.0)] {
            let coords = [normalized(x, 4), normalized(y, 4)];

            let mut weight_sum = [0.0];
            sampler.forward(&ones, &coords, &mut weight_sum).unwrap();

            let mut input_grad = vec![0.0; 16];
            let mut coords_grad = vec![0.0; 2];
            sampler
                .backward(&[1.0], &ones, &coords, &mut input_grad, &mut coords_grad)
                .unwrap();

            let grad_sum: f32 = input_grad.iter().sum();
            assert!(
                (grad_sum - weight_sum[0]).abs() < 1e-6,
                "({x}, {y}): {grad_sum} != {}",
                weight_sum[0],
            );
        }
    }

    #[test]
    fn backward_overwrites_stale_gradients() {
        let (sampler, coords) = single_point(4, 4, 1.5, 2.25);
        let input = grid_4x4_with_peak();

        let mut fresh_input = vec![0.0; 16];
        let mut fresh_coords = vec![0.0; 2];
        sampler
            .backward(&[1.0], &input, &coords, &mut fresh_input, &mut fresh_coords)
            .unwrap();

        let mut stale_input = vec![9.0; 16];
        let mut stale_coords = vec![-9.0; 2];
        sampler
            .backward(&[1.0], &input, &coords, &mut stale_input, &mut stale_coords)
            .unwrap();

        assert_eq!(fresh_input, stale_input);
        assert_eq!(fresh_coords, stale_coords);
    }

    #[test]
    fn coordinate_gradient_accumulates_over_channels() {
        let one = BilinearSampler::new(SamplerShape::new(1, 1, 4, 4, 1));
        let three = BilinearSampler::new(SamplerShape::new(1, 3, 4, 4, 1));
        let plane: Vec<f32> = (0..16).map(|v| v as f32).collect();
        let planes: Vec<f32> = plane.iter().cycle().take(48).copied().collect();
        let coords = [normalized(1.25, 4), normalized(2.5, 4)];

        let mut single = vec![0.0; 2];
        one.backward(&[1.0], &plane, &coords, &mut vec![0.0; 16], &mut single)
            .unwrap();

        let mut triple = vec![0.0; 2];
        three
            .backward(&[1.0; 3], &planes, &coords, &mut vec![0.0; 48], &mut triple)
            .unwrap();

        assert!((triple[0] - 3.0 * single[0]).abs() < 1e-4);
        assert!((triple[1] - 3.0 * single[1]).abs() < 1e-4);
        // x runs along rows (stride 4), y along columns (stride 1)
        assert!((single[0] - 4.0 * 4.0 / 2.0).abs() < 1e-4);
        assert!((single[1] - 1.0 * 4.0 / 2.0).abs() < 1e-4);
    }

    #[test]
    fn buffer_lengths_are_validated() {
        let sampler = BilinearSampler::new(SamplerShape::new(1, 1, 4, 4, 2));

        let err = sampler
            .forward(&[0.0; 15], &[0.0; 4], &mut [0.0; 2])
            .unwrap_err();
        assert!(matches!(
            err,
            BilinearError::BufferLength { buffer: "input", expected: 16, actual: 15 }
        ));

        let err = sampler
            .backward(&[0.0; 3], &[0.0; 16], &[0.0; 4], &mut [0.0; 16], &mut [0.0; 4])
            .unwrap_err();
        assert!(matches!(
            err,
            BilinearError::BufferLength { buffer: "output_grad", expected: 2, actual: 3 }
        ));

        let err = sampler
            .backward(&[0.0; 2], &[0.0; 16], &[0.0; 4], &mut [0.0; 16], &mut [0.0; 2])
            .unwrap_err();
        assert!(matches!(
            err,
            BilinearError::BufferLength { buffer: "coords_grad", .. }
        ));
    }

    #[test]
    fn empty_shapes_are_no_ops() {
        let sampler = BilinearSampler::new(SamplerShape::new(2, 0, 4, 4, 3));
        let mut output: Vec<f32> = vec![];
        let mut coords_grad = vec![1.0; 12];

        sampler.forward(&[], &[0.0; 12], &mut output).unwrap();
        sampler
            .backward(&[], &[], &[0.0; 12], &mut [], &mut coords_grad)
            .unwrap();

        assert!(coords_grad.iter().all(|&g| g == 0.0));
    }

    #[cfg(feature = "parallel")]
    #[test]
    fn parallel_matches_serial() {
        let shape = SamplerShape::new(4, 3, 5, 6, 7);
        let sampler = BilinearSampler::new(shape);
        let input: Vec<f32> = (0..shape.input_len()).map(|v| ((v * 13) % 17) as f32).collect();
        let coords: Vec<f32> = (0..shape.coord_len())
            .map(|k| ((k * 29 % 31) as f32 / 31.0) * 2.4 - 1.2)
            .collect();
        let output_grad: Vec<f32> = (0..shape.output_len()).map(|v| (v % 5) as f32 - 2.0).collect();

        let mut serial = vec![0.0; shape.output_len()];
        let mut parallel = vec![0.0; shape.output_len()];
        sampler.forward(&input, &coords, &mut serial).unwrap();
        sampler.forward_parallel(&input, &coords, &mut parallel).unwrap();
        assert_eq!(serial, parallel);

        let mut serial_input = vec![0.0; shape.input_len()];
        let mut serial_coords = vec![0.0; shape.coord_len()];
        let mut parallel_input = vec![1.0; shape.input_len()];
        let mut parallel_coords = vec![1.0; shape.coord_len()];
        sampler
            .backward(&output_grad, &input, &coords, &mut serial_input, &mut serial_coords)
            .unwrap();
        sampler
            .backward_parallel(&output_grad, &input, &coords, &mut parallel_input, &mut parallel_coords)
            .unwrap();
        assert_eq!(serial_input, parallel_input);
        assert_eq!(serial_coords, parallel_coords);
    }
}

use std::{collections::HashMap, fs, path::Path};

use ndarray::{Array3, Array4};
use safetensors::{
    tensor::{Dtype, SafeTensors, TensorView},
    SafeTensorError,
};
use thiserror::Error;
use tracing::warn;

use crate::{
    error::BilinearError,
    sampler::BilinearSampler,
    shape::SamplerShape,
};


/// Recorded inputs and expected results of one bilinear interp call, as
/// dumped by a reference framework.
#[derive(Debug, Clone)]
pub struct BilinearReference {
    pub input: Array4<f32>,               // [N, C, H, W]
    pub coords: Array3<f32>,              // [N, 2, S]
    pub output: Array3<f32>,              // [N, S, C]
    pub output_grad: Option<Array3<f32>>, // [N, S, C]
    pub input_grad: Option<Array4<f32>>,  // [N, C, H, W]
    pub coords_grad: Option<Array3<f32>>, // [N, 2, S]
}

impl BilinearReference {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CorrectnessError> {
        let bytes = fs::read(path.as_ref())?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CorrectnessError> {
        let tensors = SafeTensors::deserialize(bytes)?;

        Ok(Self {
            input: read_array4(&tensors, "input")?,
            coords: read_array3(&tensors, "coords")?,
            output: read_array3(&tensors, "output")?,
            output_grad: read_optional(&tensors, "output_grad", read_array3)?,
            input_grad: read_optional(&tensors, "input_grad", read_array4)?,
            coords_grad: read_optional(&tensors, "coords_grad", read_array3)?,
        })
    }

    /// Runs the sampler on `input` and `coords` and records its results as a
    /// reference; `output_grad` adds the backward pass.
    pub fn record(
        shape: SamplerShape,
        input: Vec<f32>,
        coords: Vec<f32>,
        output_grad: Option<Vec<f32>>,
    ) -> Result<Self, CorrectnessError> {
        let sampler = BilinearSampler::new(shape);

        let mut output = vec![0.0; shape.output_len()];
        sampler.forward(&input, &coords, &mut output)?;

        let (output_grad, input_grad, coords_grad) = match output_grad {
            Some(output_grad) => {
                let mut input_grad = vec![0.0; shape.input_len()];
                let mut coords_grad = vec![0.0; shape.coord_len()];
                sampler.backward(&output_grad, &input, &coords, &mut input_grad, &mut coords_grad)?;

                (
                    Some(Array3::from_shape_vec(shape.output_dims(), output_grad)?),
                    Some(Array4::from_shape_vec(shape.input_dims(), input_grad)?),
                    Some(Array3::from_shape_vec(shape.coord_dims(), coords_grad)?),
                )
            }
            None => (None, None, None),
        };

        Ok(Self {
            input: Array4::from_shape_vec(shape.input_dims(), input)?,
            coords: Array3::from_shape_vec(shape.coord_dims(), coords)?,
            output: Array3::from_shape_vec(shape.output_dims(), output)?,
            output_grad,
            input_grad,
            coords_grad,
        })
    }

    pub fn shape(&self) -> Result<SamplerShape, CorrectnessError> {
        let input: [usize; 4] = self.input.dim().into();
        let coords: [usize; 3] = self.coords.dim().into();
        let shape = SamplerShape::from_dims(input, coords)?;

        let output: [usize; 3] = self.output.dim().into();
        if output != shape.output_dims() {
            return Err(CorrectnessError::UnexpectedShape {
                tensor: "output",
                expected: shape.output_dims().to_vec(),
                actual: output.to_vec(),
            });
        }

        Ok(shape)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CorrectnessError> {
        let mut entries: Vec<(&'static str, Vec<usize>, Vec<u8>)> = vec![
            ("input", self.input.shape().to_vec(), to_le_bytes(self.input.iter())),
            ("coords", self.coords.shape().to_vec(), to_le_bytes(self.coords.iter())),
            ("output", self.output.shape().to_vec(), to_le_bytes(self.output.iter())),
        ];
        if let Some(grad) = &self.output_grad {
            entries.push(("output_grad", grad.shape().to_vec(), to_le_bytes(grad.iter())));
        }
        if let Some(grad) = &self.input_grad {
            entries.push(("input_grad", grad.shape().to_vec(), to_le_bytes(grad.iter())));
        }
        if let Some(grad) = &self.coords_grad {
            entries.push(("coords_grad", grad.shape().to_vec(), to_le_bytes(grad.iter())));
        }

        let views = entries
            .iter()
            .map(|(name, shape, bytes)| {
                TensorView::new(Dtype::F32, shape.clone(), bytes)
                    .map(|view| (name.to_string(), view))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(safetensors::serialize(
            views.iter().map(|(name, view)| (name.as_str(), view)),
            &None::<HashMap<String, String>>,
        )?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), CorrectnessError> {
        fs::write(path.as_ref(), self.to_bytes()?)?;
        Ok(())
    }
}


#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricStats {
    pub mean_abs: f32,
    pub max_abs: f32,
    pub max_rel: f32,
    pub mse: f32,
}

impl MetricStats {
    pub fn compute(actual: &[f32], expected: &[f32]) -> Self {
        let mut sum_abs = 0.0f32;
        let mut max_abs = 0.0f32;
        let mut max_rel = 0.0f32;
        let mut mse = 0.0f32;

        for (&lhs, &rhs) in actual.iter().zip(expected.iter()) {
            let diff = lhs - rhs;
            let abs = diff.abs();
            sum_abs += abs;
            max_abs = max_abs.max(abs);
            if rhs.abs() > f32::EPSILON {
                max_rel = max_rel.max(abs / rhs.abs());
            }
            mse += diff.powi(2);
        }

        let len = actual.len().min(expected.len()).max(1) as f32;
        Self {
            mean_abs: sum_abs / len,
            max_abs,
            max_rel,
            mse: mse / len,
        }
    }
}


#[derive(Debug)]
pub struct CorrectnessStats {
    pub output: MetricStats,
    pub input_grad: Option<MetricStats>,
    pub coords_grad: Option<MetricStats>,
}

pub const OUTPUT_MAX_ABS: f32 = 1e-5;
pub const OUTPUT_MSE: f32 = 1e-9;
pub const INPUT_GRAD_MAX_ABS: f32 = 1e-5;
// coordinate gradients carry an H / 2 or W / 2 factor
pub const COORDS_GRAD_MAX_ABS: f32 = 1e-3;

impl CorrectnessStats {
    pub fn within_defaults(&self) -> bool {
        let output_ok = self.output.max_abs <= OUTPUT_MAX_ABS
            && self.output.mse <= OUTPUT_MSE;

        let input_grad_ok = self
            .input_grad
            .map(|stats| stats.max_abs <= INPUT_GRAD_MAX_ABS)
            .unwrap_or(true);

        let coords_grad_ok = self
            .coords_grad
            .map(|stats| stats.max_abs <= COORDS_GRAD_MAX_ABS)
            .unwrap_or(true);

        output_ok && input_grad_ok && coords_grad_ok
    }
}


pub fn run_correctness(
    reference: &BilinearReference,
) -> Result<CorrectnessStats, CorrectnessError> {
    let shape = reference.shape()?;
    let sampler = BilinearSampler::new(shape);

    let input = standard_slice(&reference.input, "input")?;
    let coords = standard_slice(&reference.coords, "coords")?;

    let mut output = vec![0.0; shape.output_len()];
    sampler.forward(input, coords, &mut output)?;
    let output_stats = MetricStats::compute(&output, standard_slice(&reference.output, "output")?);

    let (input_grad_stats, coords_grad_stats) = match &reference.output_grad {
        Some(output_grad) => {
            let mut input_grad = vec![0.0; shape.input_len()];
            let mut coords_grad = vec![0.0; shape.coord_len()];
            sampler.backward(
                standard_slice(output_grad, "output_grad")?,
                input,
                coords,
                &mut input_grad,
                &mut coords_grad,
            )?;

            let input_grad_stats = match &reference.input_grad {
                Some(expected) => Some(MetricStats::compute(
                    &input_grad,
                    standard_slice(expected, "input_grad")?,
                )),
                None => None,
            };
            let coords_grad_stats = match &reference.coords_grad {
                Some(expected) => Some(MetricStats::compute(
                    &coords_grad,
                    standard_slice(expected, "coords_grad")?,
                )),
                None => None,
            };

            (input_grad_stats, coords_grad_stats)
        }
        None => (None, None),
    };

    let stats = CorrectnessStats {
        output: output_stats,
        input_grad: input_grad_stats,
        coords_grad: coords_grad_stats,
    };

    if !stats.within_defaults() {
        warn!(?stats, "bilinear interp diverges from reference");
    }

    Ok(stats)
}


fn standard_slice<'a, D: ndarray::Dimension>(
    array: &'a ndarray::Array<f32, D>,
    tensor: &'static str,
) -> Result<&'a [f32], CorrectnessError> {
    array
        .as_slice()
        .ok_or(CorrectnessError::NonContiguous(tensor))
}

fn read_tensor<const D: usize>(
    tensors: &SafeTensors<'_>,
    name: &'static str,
) -> Result<(Vec<f32>, [usize; D]), CorrectnessError> {
    let view = tensors
        .tensor(name)
        .map_err(|_| CorrectnessError::MissingTensor(name))?;

    if view.dtype() != Dtype::F32 {
        return Err(CorrectnessError::UnexpectedDtype {
            tensor: name,
            actual: format!("{:?}", view.dtype()),
        });
    }

    let shape: [usize; D] =
        view.shape()
            .try_into()
            .map_err(|_| CorrectnessError::UnexpectedRank {
                tensor: name,
                expected: D,
                actual: view.shape().len(),
            })?;

    Ok((tensor_view_to_vec(&view), shape))
}

fn read_array3(
    tensors: &SafeTensors<'_>,
    name: &'static str,
) -> Result<Array3<f32>, CorrectnessError> {
    let (values, shape) = read_tensor::<3>(tensors, name)?;
    Ok(Array3::from_shape_vec(shape, values)?)
}

fn read_array4(
    tensors: &SafeTensors<'_>,
    name: &'static str,
) -> Result<Array4<f32>, CorrectnessError> {
    let (values, shape) = read_tensor::<4>(tensors, name)?;
    Ok(Array4::from_shape_vec(shape, values)?)
}

fn read_optional<T>(
    tensors: &SafeTensors<'_>,
    name: &'static str,
    read: fn(&SafeTensors<'_>, &'static str) -> Result<T, CorrectnessError>,
) -> Result<Option<T>, CorrectnessError> {
    if tensors.names().iter().any(|present| present.as_str() == name) {
        read(tensors, name).map(Some)
    } else {
        Ok(None)
    }
}

fn tensor_view_to_vec(view: &TensorView<'_>) -> Vec<f32> {
    view.data()
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

fn to_le_bytes<'a>(values: impl Iterator<Item = &'a f32>) -> Vec<u8> {
    values.flat_map(|value| value.to_le_bytes()).collect()
}


#[derive(Debug, Error)]
pub enum CorrectnessError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("safetensors error: {0}")]
    Safetensors(#[from] SafeTensorError),

    #[error("tensor `{0}` missing from reference")]
    MissingTensor(&'static str),

    #[error("tensor `{tensor}` rank mismatch: expected {expected}, got {actual}")]
    UnexpectedRank {
        tensor: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("tensor `{tensor}` shape mismatch: expected {expected:?}, got {actual:?}")]
    UnexpectedShape {
        tensor: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("tensor `{tensor}` must be F32, got {actual}")]
    UnexpectedDtype {
        tensor: &'static str,
        actual: String,
    },

    #[error("tensor `{0}` is not contiguous")]
    NonContiguous(&'static str),

    #[error("array shape error: {0}")]
    Array(#[from] ndarray::ShapeError),

    #[error(transparent)]
    Sampler(#[from] BilinearError),
}


#[cfg(test)]
mod tests {
    use super::*;

    fn recorded() -> BilinearReference {
        let shape = SamplerShape::new(2, 3, 4, 6, 5);
        let input = (0..shape.input_len()).map(|v| (v % 9) as f32 * 0.25).collect();
        let coords = (0..shape.coord_len())
            .map(|k| ((k * 11 % 23) as f32 / 23.0) * 2.2 - 1.1)
            .collect();
        let output_grad = (0..shape.output_len()).map(|v| (v % 4) as f32 - 1.5).collect();

        BilinearReference::record(shape, input, coords, Some(output_grad)).unwrap()
    }

    #[test]
    fn recorded_reference_matches_itself() {
        let reference = recorded();
        let stats = run_correctness(&reference).unwrap();

        assert!(stats.within_defaults(), "{stats:?}");
        assert_eq!(stats.output.max_abs, 0.0);
        assert_eq!(stats.input_grad.unwrap().max_abs, 0.0);
        assert_eq!(stats.coords_grad.unwrap().max_abs, 0.0);
    }

    #[test]
    fn reference_survives_safetensors_encoding() {
        let reference = recorded();
        let decoded = BilinearReference::from_bytes(&reference.to_bytes().unwrap()).unwrap();

        assert_eq!(decoded.input, reference.input);
        assert_eq!(decoded.coords, reference.coords);
        assert_eq!(decoded.output, reference.output);
        assert_eq!(decoded.coords_grad, reference.coords_grad);
    }

    #[test]
    fn forward_only_reference_skips_gradients() {
        let shape = SamplerShape::new(1, 1, 4, 4, 2);
        let reference = BilinearReference::record(
            shape,
            vec![1.0; 16],
            vec![-0.5, 0.0, -0.5, 0.25],
            None,
        )
        .unwrap();

        let decoded = BilinearReference::from_bytes(&reference.to_bytes().unwrap()).unwrap();
        let stats = run_correctness(&decoded).unwrap();

        assert!(decoded.output_grad.is_none());
        assert!(stats.input_grad.is_none());
        assert!(stats.coords_grad.is_none());
        assert!(stats.within_defaults());
    }

    #[test]
    fn tampered_output_is_flagged() {
        let mut reference = recorded();
        reference.output[[1, 2, 0]] += 0.5;

        let stats = run_correctness(&reference).unwrap();

        assert!(!stats.within_defaults());
        assert!((stats.output.max_abs - 0.5).abs() < 1e-6);
    }

    #[test]
    fn output_shape_is_checked() {
        let mut reference = recorded();
        reference.output = Array3::zeros([2, 3, 5]);

        let err = run_correctness(&reference).unwrap_err();

        assert!(matches!(err, CorrectnessError::UnexpectedShape { tensor: "output", .. }));
    }

    #[test]
    fn missing_tensor_is_reported() {
        let bytes = safetensors::serialize(
            Vec::<(String, &TensorView<'_>)>::new(),
            &None::<HashMap<String, String>>,
        )
        .unwrap();

        let err = BilinearReference::from_bytes(&bytes).unwrap_err();

        assert!(matches!(err, CorrectnessError::MissingTensor("input")));
    }
}

use burn::tensor::{backend::Backend, Tensor};
use tracing::debug;

use super::{tensor_to_vec, vec_to_tensor, BilinearInterpGrads};
use crate::{
    error::BilinearError,
    sampler::BilinearSampler,
    shape::SamplerShape,
};


const OUTPUT_GRAD_AXES: [&str; 3] = [
    "output gradient batch size",
    "output gradient sample count",
    "output gradient channel count",
];

pub fn bilinear_interp_backward_host<B: Backend>(
    output_grad: Tensor<B, 3>,  // [N, S, C]
    input: Tensor<B, 4>,        // [N, C, H, W]
    coords: Tensor<B, 3>,       // [N, 2, S]
) -> Result<BilinearInterpGrads<B>, BilinearError> {
    let device = input.device();
    let shape = SamplerShape::from_dims(input.shape().dims(), coords.shape().dims())?;
    debug!(?shape, "bilinear_interp host backward");

    let output_dims: [usize; 3] = output_grad.shape().dims();
    let expected = shape.output_dims();
    if let Some(axis) = (0..3).find(|&axis| output_dims[axis] != expected[axis]) {
        return Err(BilinearError::ShapeMismatch {
            what: OUTPUT_GRAD_AXES[axis],
            expected: expected[axis],
            actual: output_dims[axis],
        });
    }

    let output_grad = tensor_to_vec(output_grad)?;
    let input = tensor_to_vec(input)?;
    let coords = tensor_to_vec(coords)?;

    let mut input_grad = vec![0.0; shape.input_len()];
    let mut coords_grad = vec![0.0; shape.coord_len()];
    BilinearSampler::new(shape).backward(
        &output_grad,
        &input,
        &coords,
        &mut input_grad,
        &mut coords_grad,
    )?;

    Ok(BilinearInterpGrads {
        input_grad: vec_to_tensor::<B, 4>(input_grad, shape.input_dims(), &device),
        coords_grad: vec_to_tensor::<B, 3>(coords_grad, shape.coord_dims(), &device),
    })
}

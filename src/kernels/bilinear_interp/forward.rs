use burn::tensor::{backend::Backend, Tensor};
use tracing::debug;

use super::{tensor_to_vec, vec_to_tensor};
use crate::{
    error::BilinearError,
    sampler::BilinearSampler,
    shape::SamplerShape,
};


pub fn bilinear_interp_host<B: Backend>(
    input: Tensor<B, 4>,   // [N, C, H, W]
    coords: Tensor<B, 3>,  // [N, 2, S]
) -> Result<Tensor<B, 3>, BilinearError> {
    let device = input.device();
    let shape = SamplerShape::from_dims(input.shape().dims(), coords.shape().dims())?;
    debug!(?shape, "bilinear_interp host forward");

    let input = tensor_to_vec(input)?;
    let coords = tensor_to_vec(coords)?;

    let mut output = vec![0.0; shape.output_len()];
    BilinearSampler::new(shape).forward(&input, &coords, &mut output)?;

    Ok(vec_to_tensor::<B, 3>(output, shape.output_dims(), &device))
}

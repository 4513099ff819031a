use burn::tensor::Tensor;

use crate::error::BilinearError;

pub mod backward;
pub mod forward;
pub mod kernel;


/// Gradients of a loss with respect to both inputs of [`bilinear_interp`].
#[derive(Debug, Clone)]
pub struct BilinearInterpGrads<B: burn::tensor::backend::Backend> {
    pub input_grad: Tensor<B, 4>,   // [N, C, H, W]
    pub coords_grad: Tensor<B, 3>,  // [N, 2, S]
}


/// Backends able to run bilinear interpolation.
///
/// The provided methods round-trip tensor data through the host kernel. A
/// backend with a native kernel overrides them in its impl.
pub trait Backend: burn::tensor::backend::Backend {
    fn bilinear_interp(
        input: Tensor<Self, 4>,   // Input tensor: shape [N, C, H, W]
        coords: Tensor<Self, 3>,  // Coordinates tensor: shape [N, 2, S], values in [-1, 1]
    ) -> Result<Tensor<Self, 3>, BilinearError> {
        forward::bilinear_interp_host(input, coords)
    }

    fn bilinear_interp_backward(
        output_grad: Tensor<Self, 3>,  // Output gradient: shape [N, S, C]
        input: Tensor<Self, 4>,        // Input tensor: shape [N, C, H, W]
        coords: Tensor<Self, 3>,       // Coordinates tensor: shape [N, 2, S]
    ) -> Result<BilinearInterpGrads<Self>, BilinearError> {
        backward::bilinear_interp_backward_host(output_grad, input, coords)
    }
}

#[cfg(feature = "backend_ndarray")]
impl Backend for burn::backend::NdArray<f32> {}

#[cfg(feature = "backend_ndarray")]
impl Backend for burn::backend::NdArray<f64> {}


pub fn bilinear_interp<B: Backend>(
    input: Tensor<B, 4>,   // Input tensor: shape [N, C, H, W]
    coords: Tensor<B, 3>,  // Coordinates tensor: shape [N, 2, S]
) -> Result<Tensor<B, 3>, BilinearError> {
    B::bilinear_interp(input, coords)
}

pub fn bilinear_interp_backward<B: Backend>(
    output_grad: Tensor<B, 3>,  // Output gradient: shape [N, S, C]
    input: Tensor<B, 4>,        // Input tensor: shape [N, C, H, W]
    coords: Tensor<B, 3>,       // Coordinates tensor: shape [N, 2, S]
) -> Result<BilinearInterpGrads<B>, BilinearError> {
    B::bilinear_interp_backward(output_grad, input, coords)
}


pub(crate) fn tensor_to_vec<B: burn::tensor::backend::Backend, const D: usize>(
    tensor: Tensor<B, D>,
) -> Result<Vec<f32>, BilinearError> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|err| BilinearError::TensorData(format!("{err:?}")))
}

pub(crate) fn vec_to_tensor<B: burn::tensor::backend::Backend, const D: usize>(
    values: Vec<f32>,
    dims: [usize; D],
    device: &B::Device,
) -> Tensor<B, D> {
    let data = burn::tensor::TensorData::new(values, dims)
        .convert::<B::FloatElem>();

    Tensor::from_data(data, device)
}

use burn::prelude::*;

use crate::{
    error::BilinearError,
    kernels::bilinear_interp::{
        bilinear_interp,
        bilinear_interp_backward,
        Backend,
        BilinearInterpGrads,
    },
};


#[derive(Config, Debug)]
pub struct BilinearInterpConfig {
    /// Requests gradients with respect to the sample coordinates. Coordinate
    /// gradients are always produced; the flag is carried for callers that
    /// route them.
    #[config(default = "false")]
    pub to_compute_du: bool,
}

impl Default for BilinearInterpConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl BilinearInterpConfig {
    pub fn init(&self) -> BilinearInterp {
        BilinearInterp::new(self)
    }
}


/// Samples a `[N, C, H, W]` feature map at `[N, 2, S]` normalized points,
/// producing `[N, S, C]`.
#[derive(Clone, Debug)]
pub struct BilinearInterp {
    to_compute_du: bool,
}

impl BilinearInterp {
    pub fn new(config: &BilinearInterpConfig) -> Self {
        Self {
            to_compute_du: config.to_compute_du,
        }
    }

    pub fn to_compute_du(&self) -> bool {
        self.to_compute_du
    }

    pub fn forward<B: Backend>(
        &self,
        input: Tensor<B, 4>,
        coords: Tensor<B, 3>,
    ) -> Result<Tensor<B, 3>, BilinearError> {
        bilinear_interp(input, coords)
    }

    pub fn backward<B: Backend>(
        &self,
        output_grad: Tensor<B, 3>,
        input: Tensor<B, 4>,
        coords: Tensor<B, 3>,
    ) -> Result<BilinearInterpGrads<B>, BilinearError> {
        bilinear_interp_backward(output_grad, input, coords)
    }
}

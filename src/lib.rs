pub mod correctness;
pub mod error;
pub mod gradcheck;
pub mod kernels;
pub mod layers;
pub mod sampler;
pub mod shape;

pub use error::{BilinearError, Result};
pub use kernels::bilinear_interp::{
    bilinear_interp,
    bilinear_interp_backward,
    BilinearInterpGrads,
};
pub use layers::bilinear::{BilinearInterp, BilinearInterpConfig};
pub use sampler::BilinearSampler;
pub use shape::SamplerShape;

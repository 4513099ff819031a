//! Tagged dispatch from layer type names to slice-level operators.
//!
//! An [`Operator`] follows the framework layer lifecycle: `reshape` derives
//! the shape from the bottom dimensions and declares the top dimensions,
//! `forward` fills top buffers, `backward` fills bottom gradient buffers. All
//! buffers belong to the caller.

use std::{collections::HashMap, fmt};

use burn::prelude::*;
use tracing::debug;

use crate::{
    error::{self, BilinearError},
    layers::bilinear::{BilinearInterp, BilinearInterpConfig},
    sampler::BilinearSampler,
    shape::SamplerShape,
};


#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OperatorKind {
    BilinearInterp,
}

impl OperatorKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::BilinearInterp => "BiLinearInterp",
        }
    }
}

impl fmt::Display for OperatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}


/// Layer definition: an operator type name plus its parameters.
#[derive(Config, Debug)]
pub struct LayerParams {
    pub kind: String,

    #[config(default = "BilinearInterpConfig::new()")]
    pub bilinear_interp: BilinearInterpConfig,
}


pub trait Operator: fmt::Debug + Send + Sync {
    fn kind(&self) -> OperatorKind;

    /// Returns the top dimensions for the given bottom dimensions.
    fn reshape(&mut self, bottom: &[&[usize]]) -> error::Result<Vec<usize>>;

    fn forward(
        &self,
        bottom: &[&[f32]],
        top: &mut [&mut [f32]],
    ) -> error::Result<()>;

    fn backward(
        &self,
        top_grad: &[&[f32]],
        bottom: &[&[f32]],
        bottom_grad: &mut [&mut [f32]],
    ) -> error::Result<()>;
}


/// Bottom 0 is the `[N, C, H, W]` feature map, bottom 1 the `[N, 2, S]`
/// coordinates, top 0 the `[N, S, C]` samples.
#[derive(Debug)]
pub struct BilinearInterpOperator {
    layer: BilinearInterp,
    sampler: Option<BilinearSampler>,
}

impl BilinearInterpOperator {
    pub fn new(config: &BilinearInterpConfig) -> Self {
        Self {
            layer: config.init(),
            sampler: None,
        }
    }

    pub fn layer(&self) -> &BilinearInterp {
        &self.layer
    }

    pub fn shape(&self) -> Option<&SamplerShape> {
        self.sampler.as_ref().map(BilinearSampler::shape)
    }

    fn sampler(&self) -> error::Result<&BilinearSampler> {
        self.sampler.as_ref().ok_or(BilinearError::NotConfigured)
    }
}

impl Operator for BilinearInterpOperator {
    fn kind(&self) -> OperatorKind {
        OperatorKind::BilinearInterp
    }

    fn reshape(&mut self, bottom: &[&[usize]]) -> error::Result<Vec<usize>> {
        let [input, coords] = expect_count::<&[usize], 2>("bottom shape count", bottom)?;
        let shape = SamplerShape::from_slices(input, coords)?;
        debug!(?shape, to_compute_du = self.layer.to_compute_du(), "bilinear_interp reshape");

        self.sampler = Some(BilinearSampler::new(shape));
        Ok(shape.output_dims().to_vec())
    }

    fn forward(
        &self,
        bottom: &[&[f32]],
        top: &mut [&mut [f32]],
    ) -> error::Result<()> {
        let sampler = self.sampler()?;
        let [input, coords] = expect_count::<&[f32], 2>("bottom count", bottom)?;
        let top_count = top.len();
        let [output] = top else {
            return Err(BilinearError::ShapeMismatch {
                what: "top count",
                expected: 1,
                actual: top_count,
            });
        };

        sampler.forward(input, coords, output)
    }

    fn backward(
        &self,
        top_grad: &[&[f32]],
        bottom: &[&[f32]],
        bottom_grad: &mut [&mut [f32]],
    ) -> error::Result<()> {
        let sampler = self.sampler()?;
        let [output_grad] = expect_count::<&[f32], 1>("top gradient count", top_grad)?;
        let [input, coords] = expect_count::<&[f32], 2>("bottom count", bottom)?;
        let bottom_grad_count = bottom_grad.len();
        let [input_grad, coords_grad] = bottom_grad else {
            return Err(BilinearError::ShapeMismatch {
                what: "bottom gradient count",
                expected: 2,
                actual: bottom_grad_count,
            });
        };

        sampler.backward(output_grad, input, coords, input_grad, coords_grad)
    }
}

fn expect_count<T: Copy, const N: usize>(
    what: &'static str,
    items: &[T],
) -> error::Result<[T; N]> {
    items
        .try_into()
        .map_err(|_| BilinearError::ShapeMismatch {
            what,
            expected: N,
            actual: items.len(),
        })
}


pub type OperatorFactory = fn(&LayerParams) -> Box<dyn Operator>;

#[derive(Clone)]
pub struct OperatorRegistry {
    factories: HashMap<String, (OperatorKind, OperatorFactory)>,
}

impl fmt::Debug for OperatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.factories.keys().collect();
        names.sort();
        f.debug_struct("OperatorRegistry")
            .field("types", &names)
            .finish()
    }
}

impl Default for OperatorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl OperatorRegistry {
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(OperatorKind::BilinearInterp, |params| {
            Box::new(BilinearInterpOperator::new(&params.bilinear_interp))
        });
        registry
    }

    /// Registers `factory` under the type name of `kind`, replacing any
    /// earlier registration.
    pub fn register(&mut self, kind: OperatorKind, factory: OperatorFactory) {
        self.factories
            .insert(kind.type_name().to_string(), (kind, factory));
    }

    pub fn kind_of(&self, type_name: &str) -> Option<OperatorKind> {
        self.factories.get(type_name).map(|(kind, _)| *kind)
    }

    pub fn create(&self, params: &LayerParams) -> error::Result<Box<dyn Operator>> {
        let (_, factory) = self
            .factories
            .get(&params.kind)
            .ok_or_else(|| BilinearError::UnknownOperator(params.kind.clone()))?;

        Ok(factory(params))
    }

    pub fn load(&self, path: impl AsRef<std::path::Path>) -> error::Result<Box<dyn Operator>> {
        let params = LayerParams::load(path.as_ref())
            .map_err(|err| BilinearError::Config(format!("{err:?}")))?;
        self.create(&params)
    }
}

use serde::{Deserialize, Serialize};

use crate::error::{BilinearError, Result};


/// Immutable `(N, C, H, W, S)` shape binding of one forward/backward pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SamplerShape {
    pub batch: usize,
    pub channels: usize,
    pub height: usize,
    pub width: usize,
    pub samples: usize,
}

impl SamplerShape {
    pub fn new(
        batch: usize,
        channels: usize,
        height: usize,
        width: usize,
        samples: usize,
    ) -> Self {
        Self {
            batch,
            channels,
            height,
            width,
            samples,
        }
    }

    /// Derives the shape from the feature map `[N, C, H, W]` and coordinate
    /// `[N, 2, S]` dimensions.
    pub fn from_dims(
        input: [usize; 4],
        coords: [usize; 3],
    ) -> Result<Self> {
        let [batch, channels, height, width] = input;
        let [coord_batch, axes, samples] = coords;

        if coord_batch != batch {
            return Err(BilinearError::ShapeMismatch {
                what: "coordinate batch size",
                expected: batch,
                actual: coord_batch,
            });
        }

        if axes != 2 {
            return Err(BilinearError::ShapeMismatch {
                what: "coordinate axis count",
                expected: 2,
                actual: axes,
            });
        }

        let shape = Self::new(batch, channels, height, width, samples);
        element_count("input", &shape.input_dims())?;
        element_count("coords", &shape.coord_dims())?;
        element_count("output", &shape.output_dims())?;

        Ok(shape)
    }

    /// Same as [`SamplerShape::from_dims`] for dimension slices of unknown rank.
    pub fn from_slices(
        input: &[usize],
        coords: &[usize],
    ) -> Result<Self> {
        let input: [usize; 4] = input
            .try_into()
            .map_err(|_| BilinearError::ShapeMismatch {
                what: "input rank",
                expected: 4,
                actual: input.len(),
            })?;
        let coords: [usize; 3] = coords
            .try_into()
            .map_err(|_| BilinearError::ShapeMismatch {
                what: "coordinate rank",
                expected: 3,
                actual: coords.len(),
            })?;

        Self::from_dims(input, coords)
    }

    pub fn input_dims(&self) -> [usize; 4] {
        [self.batch, self.channels, self.height, self.width]
    }

    pub fn coord_dims(&self) -> [usize; 3] {
        [self.batch, 2, self.samples]
    }

    pub fn output_dims(&self) -> [usize; 3] {
        [self.batch, self.samples, self.channels]
    }

    pub fn plane_len(&self) -> usize {
        self.height * self.width
    }

    // per batch element
    pub(crate) fn input_item_len(&self) -> usize {
        self.channels * self.plane_len()
    }

    pub(crate) fn coord_item_len(&self) -> usize {
        2 * self.samples
    }

    pub(crate) fn output_item_len(&self) -> usize {
        self.samples * self.channels
    }

    pub fn input_len(&self) -> usize {
        self.batch * self.input_item_len()
    }

    pub fn coord_len(&self) -> usize {
        self.batch * self.coord_item_len()
    }

    pub fn output_len(&self) -> usize {
        self.batch * self.output_item_len()
    }

    pub(crate) fn check_len(
        buffer: &'static str,
        expected: usize,
        actual: usize,
    ) -> Result<()> {
        if expected == actual {
            Ok(())
        } else {
            Err(BilinearError::BufferLength {
                buffer,
                expected,
                actual,
            })
        }
    }
}


// innermost first, so per-plane and per-item lengths are checked too
fn element_count(buffer: &'static str, dims: &[usize]) -> Result<usize> {
    dims.iter()
        .rev()
        .try_fold(1usize, |len, &dim| len.checked_mul(dim))
        .ok_or(BilinearError::ElementCountOverflow { buffer })
}

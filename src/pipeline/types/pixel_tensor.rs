use ndarray::{Array3, ShapeError};

/// Normalized image samples in channel-first layout, canonical RGB order.
///
/// There is no batch dimension here; the engine adds and strips it around the
/// forward pass.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelTensor {
    samples: Array3<f32>,
}

impl PixelTensor {
    pub const CHANNELS: usize = 3;

    pub fn from_array(samples: Array3<f32>) -> Self {
        Self { samples }
    }

    pub fn from_shape_vec(shape: (usize, usize, usize), data: Vec<f32>) -> Result<Self, ShapeError> {
        Array3::from_shape_vec(shape, data).map(Self::from_array)
    }

    /// `[channels, height, width]`
    pub fn shape(&self) -> [usize; 3] {
        let (c, h, w) = self.samples.dim();
        [c, h, w]
    }

    pub fn channels(&self) -> usize {
        self.samples.dim().0
    }

    pub fn height(&self) -> usize {
        self.samples.dim().1
    }

    pub fn width(&self) -> usize {
        self.samples.dim().2
    }

    pub fn is_color(&self) -> bool {
        self.channels() == Self::CHANNELS && self.height() > 0 && self.width() > 0
    }

    pub fn samples(&self) -> &Array3<f32> {
        &self.samples
    }

    pub fn into_samples(self) -> Array3<f32> {
        self.samples
    }

    /// Samples flattened in row-major CHW order.
    pub fn to_vec(&self) -> Vec<f32> {
        self.samples.iter().copied().collect()
    }
}

use crate::error::{DecodeError, EncodeError};
use crate::pipeline::types::PixelTensor;
use image::{ImageError, ImageFormat, ImageReader, Rgb, RgbImage};
use ndarray::Array3;
use std::io::Cursor;

// Channel index of red, green, blue inside the canonical RGB tensor.
const RED: usize = 0;
const GREEN: usize = 1;
const BLUE: usize = 2;

/// Converts between raster bytes and the network's tensor convention:
/// `f32` in [0,1], RGB, channel-first.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageCodec {
    max_dimension: Option<u32>,
}

impl ImageCodec {
    pub fn new(max_dimension: Option<u32>) -> Self {
        Self { max_dimension }
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<PixelTensor, DecodeError> {
        if bytes.is_empty() {
            return Err(DecodeError::Empty);
        }

        // Size limits are enforced from the header alone, before any pixel
        // buffer is allocated.
        let (width, height) = reader(bytes)?
            .into_dimensions()
            .map_err(DecodeError::Malformed)?;
        if width == 0 || height == 0 {
            return Err(DecodeError::ZeroSized);
        }
        if let Some(limit) = self.max_dimension {
            if width > limit || height > limit {
                return Err(DecodeError::TooLarge {
                    width,
                    height,
                    limit,
                });
            }
        }

        let image = reader(bytes)?.decode().map_err(DecodeError::Malformed)?;
        let color = image.color();
        if !color.has_color() {
            return Err(DecodeError::InsufficientChannels(color.channel_count()));
        }

        // Drops alpha and narrows 16-bit samples.
        let rgb = image.to_rgb8();
        let samples = Array3::from_shape_fn(
            (PixelTensor::CHANNELS, height as usize, width as usize),
            |(channel, y, x)| {
                let pixel = rgb.get_pixel(x as u32, y as u32);
                let value = match channel {
                    RED => pixel[0],
                    GREEN => pixel[1],
                    _ => pixel[2],
                };
                f32::from(value) / 255.0
            },
        );
        Ok(PixelTensor::from_array(samples))
    }

    pub fn encode(&self, tensor: &PixelTensor) -> Result<Vec<u8>, EncodeError> {
        if !tensor.is_color() {
            return Err(EncodeError::Shape(tensor.shape()));
        }

        let samples = tensor.samples();
        let image = RgbImage::from_fn(tensor.width() as u32, tensor.height() as u32, |x, y| {
            let (x, y) = (x as usize, y as usize);
            Rgb([
                quantize(samples[[RED, y, x]]),
                quantize(samples[[GREEN, y, x]]),
                quantize(samples[[BLUE, y, x]]),
            ])
        });

        let mut png = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .map_err(EncodeError::Png)?;
        Ok(png)
    }
}

fn reader(bytes: &[u8]) -> Result<ImageReader<Cursor<&[u8]>>, DecodeError> {
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| DecodeError::Malformed(ImageError::IoError(e)))
}

fn quantize(sample: f32) -> u8 {
    // NaN saturates to 0 through the cast.
    (sample.clamp(0.0, 1.0) * 255.0).round() as u8
}

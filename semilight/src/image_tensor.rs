//! Host-side channel-first image buffers.
//!
//! Dataset items are produced on worker threads without a device, so images
//! travel as [`ImageTensor`] values and become Burn tensors in the batchers.

use burn::prelude::*;
use image::{Rgb, Rgb32FImage, RgbImage};

/// A 3-channel `f32` image in `[channels, height, width]` layout.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTensor {
    data: Vec<f32>,
    height: usize,
    width: usize,
}

impl ImageTensor {
    pub const CHANNELS: usize = 3;

    /// Wraps channel-first data, returning `None` if the length does not match.
    pub fn new(data: Vec<f32>, height: usize, width: usize) -> Option<Self> {
        (data.len() == Self::CHANNELS * height * width).then_some(Self {
            data,
            height,
            width,
        })
    }

    pub fn from_rgb32f(image: &Rgb32FImage) -> Self {
        let (width, height) = image.dimensions();
        let (width, height) = (width as usize, height as usize);
        let plane = width * height;
        let mut data = vec![0.0; Self::CHANNELS * plane];

        for (i, pixel) in image.pixels().enumerate() {
            for (c, value) in pixel.0.iter().enumerate() {
                data[c * plane + i] = *value;
            }
        }

        Self {
            data,
            height,
            width,
        }
    }

    /// Converts 8-bit pixels to `[0, 1]`.
    pub fn from_rgb8(image: &RgbImage) -> Self {
        let (width, height) = image.dimensions();
        let (width, height) = (width as usize, height as usize);
        let plane = width * height;
        let mut data = vec![0.0; Self::CHANNELS * plane];

        for (i, pixel) in image.pixels().enumerate() {
            for (c, value) in pixel.0.iter().enumerate() {
                data[c * plane + i] = f32::from(*value) / 255.0;
            }
        }

        Self {
            data,
            height,
            width,
        }
    }

    /// Back to an interleaved float image.
    pub fn to_rgb32f(&self) -> Rgb32FImage {
        let plane = self.height * self.width;
        Rgb32FImage::from_fn(self.width as u32, self.height as u32, |x, y| {
            let i = y as usize * self.width + x as usize;
            Rgb([
                self.data[i],
                self.data[plane + i],
                self.data[2 * plane + i],
            ])
        })
    }

    pub const fn shape(&self) -> [usize; 3] {
        [Self::CHANNELS, self.height, self.width]
    }

    pub const fn height(&self) -> usize {
        self.height
    }

    pub const fn width(&self) -> usize {
        self.width
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn into_data(self) -> Vec<f32> {
        self.data
    }

    /// Element-wise combination with `other`, which must have the same length.
    pub fn zip_map(&self, other: &[f32], f: impl Fn(f32, f32) -> f32) -> Self {
        let data = self
            .data
            .iter()
            .zip(other)
            .map(|(a, b)| f(*a, *b))
            .collect();

        Self {
            data,
            height: self.height,
            width: self.width,
        }
    }

    pub fn into_tensor<B: Backend>(self, device: &B::Device) -> Tensor<B, 3> {
        let shape = self.shape();
        Tensor::from_data(TensorData::new(self.data, shape), device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn rgb8_pixels_land_in_their_channel_planes() {
        let image = RgbImage::from_fn(2, 1, |x, _| if x == 0 { Rgb([255, 0, 0]) } else { Rgb([0, 0, 255]) });

        let tensor = ImageTensor::from_rgb8(&image);

        assert_eq!(tensor.shape(), [3, 1, 2]);
        assert_eq!(tensor.data(), &[1.0, 0.0, 0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn float_round_trip_keeps_values() {
        let image = Rgb32FImage::from_fn(3, 2, |x, y| Rgb([x as f32 * 0.1, y as f32 * 0.2, 0.5]));

        let back = ImageTensor::from_rgb32f(&image).to_rgb32f();

        assert_eq!(back, image);
    }

    #[test]
    fn new_rejects_mismatched_lengths() {
        assert!(ImageTensor::new(vec![0.0; 11], 2, 2).is_none());
        assert!(ImageTensor::new(vec![0.0; 12], 2, 2).is_some());
    }

    #[test]
    fn into_tensor_is_channel_first() {
        let device = Default::default();
        let tensor = ImageTensor::new(vec![0.5; 3 * 4 * 5], 4, 5)
            .unwrap()
            .into_tensor::<TestBackend>(&device);

        assert_eq!(tensor.dims(), [3, 4, 5]);
    }
}

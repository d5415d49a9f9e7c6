//! Shared geometric augmentation for co-registered image pairs.
//!
//! A draw is split from its application: [`GeometricPairTransform::sample`]
//! produces a [`PairTransformParams`] record and [`GeometricPairTransform::apply`]
//! is a pure function of that record. Every member of a pair is transformed
//! with the same record, so inputs and targets stay pixel-aligned.

use burn::prelude::*;
use image::{
    imageops::{self, FilterType},
    DynamicImage, ImageBuffer, Pixel, RgbImage,
};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{DatasetError, DatasetResult};

/// One of the eight rotations/flips of the square symmetry group.
///
/// Rotations are counter-clockwise. The flipped variants apply the rotation
/// first and then flip top to bottom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Rotation {
    Identity,
    Rot90,
    Rot180,
    Rot270,
    FlipVertical,
    Rot90FlipVertical,
    Rot180FlipVertical,
    Rot270FlipVertical,
}

impl Rotation {
    pub const ALL: [Self; 8] = [
        Self::Identity,
        Self::Rot90,
        Self::Rot180,
        Self::Rot270,
        Self::FlipVertical,
        Self::Rot90FlipVertical,
        Self::Rot180FlipVertical,
        Self::Rot270FlipVertical,
    ];

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn apply<P>(
        self,
        image: &ImageBuffer<P, Vec<P::Subpixel>>,
    ) -> ImageBuffer<P, Vec<P::Subpixel>>
    where
        P: Pixel + 'static,
    {
        // imageops rotates clockwise.
        match self {
            Self::Identity => image.clone(),
            Self::Rot90 => imageops::rotate270(image),
            Self::Rot180 => imageops::rotate180(image),
            Self::Rot270 => imageops::rotate90(image),
            Self::FlipVertical => imageops::flip_vertical(image),
            Self::Rot90FlipVertical => imageops::flip_vertical(&imageops::rotate270(image)),
            Self::Rot180FlipVertical => imageops::flip_vertical(&imageops::rotate180(image)),
            Self::Rot270FlipVertical => imageops::flip_vertical(&imageops::rotate90(image)),
        }
    }
}

/// Parameters of one pair transform draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairTransformParams {
    /// Left edge of the crop window in the resized image.
    pub x: u32,
    /// Top edge of the crop window in the resized image.
    pub y: u32,
    pub rotation: Rotation,
}

/// Configuration for [`GeometricPairTransform`].
#[derive(Config, Debug)]
pub struct GeometricPairTransformConfig {
    /// Every image is first resized to `load_size` x `load_size`.
    #[config(default = 280)]
    pub load_size: u32,
    /// Side length of the square crop.
    #[config(default = 256)]
    pub crop_size: u32,
}

impl GeometricPairTransformConfig {
    pub fn init(&self) -> DatasetResult<GeometricPairTransform> {
        if self.crop_size == 0 || self.crop_size > self.load_size {
            return Err(DatasetError::InvalidConfiguration {
                reason: format!(
                    "crop size {} must be in 1..={}",
                    self.crop_size, self.load_size
                ),
            });
        }

        Ok(GeometricPairTransform {
            load_size: self.load_size,
            crop_size: self.crop_size,
        })
    }
}

/// Resize, random crop and random rotation shared by all members of a pair.
#[derive(Debug, Clone)]
pub struct GeometricPairTransform {
    load_size: u32,
    crop_size: u32,
}

impl GeometricPairTransform {
    pub const fn crop_size(&self) -> u32 {
        self.crop_size
    }

    /// Draws a crop origin uniformly over all windows that fit, and a rotation
    /// uniformly over [`Rotation::ALL`].
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> PairTransformParams {
        let range = self.load_size - self.crop_size;

        PairTransformParams {
            x: rng.random_range(0..=range),
            y: rng.random_range(0..=range),
            rotation: Rotation::ALL[rng.random_range(0..Rotation::ALL.len())],
        }
    }

    pub fn apply(&self, params: &PairTransformParams, image: &DynamicImage) -> RgbImage {
        let resized = image
            .resize_exact(self.load_size, self.load_size, FilterType::Lanczos3)
            .into_rgb8();
        let cropped =
            imageops::crop_imm(&resized, params.x, params.y, self.crop_size, self.crop_size)
                .to_image();

        params.rotation.apply(&cropped)
    }

    /// Draws once and applies the draw to both images.
    pub fn apply_pair<R: Rng + ?Sized>(
        &self,
        first: &DynamicImage,
        second: &DynamicImage,
        rng: &mut R,
    ) -> (RgbImage, RgbImage) {
        let params = self.sample(rng);
        (self.apply(&params, first), self.apply(&params, second))
    }
}

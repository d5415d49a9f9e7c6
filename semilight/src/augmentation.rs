//! Photometric augmentation for the strong branch of weak/strong pairs.
//!
//! The strong policy runs up to three stages, always in this order:
//! 1. Color jitter (p=0.8) - brightness, contrast, saturation and hue in a random order
//! 2. Grayscale (p=0.2) - ITU-R 601 luma replicated to three channels
//! 3. Gaussian blur (p=0.5) - kernel size 1, 3 or 5, sigma in [0.1, 2.0]
//!
//! Sampling and application are separate steps. [`StrongAugmentation::sample`]
//! returns a [`StrongAugmentationParams`] record, and applying that record is
//! deterministic.
//!
//! The module also hosts the additive Gaussian noise used by the noise variant
//! and the [`TensorDegradation`] seam for externally supplied degradations.

use std::{fmt, str::FromStr};

use burn::prelude::*;
use image::{imageops, Rgb, Rgb32FImage};
use imageproc::filter::separable_filter_equal;
use rand::{rngs::StdRng, seq::SliceRandom, Rng};
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use crate::{
    error::{DatasetError, DatasetResult},
    image_tensor::ImageTensor,
};

/// Luma weights of ITU-R 601.
const LUMA: [f32; 3] = [0.299, 0.587, 0.114];

/// Stages of the strong policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AugmentationStage {
    ColorJitter,
    Grayscale,
    GaussianBlur,
}

/// Configuration for [`StrongAugmentation`].
#[derive(Config, Debug)]
pub struct StrongAugmentationConfig {
    /// Stages that may run. Stage order is fixed regardless of list order.
    #[config(
        default = "vec![AugmentationStage::ColorJitter, AugmentationStage::Grayscale, AugmentationStage::GaussianBlur]"
    )]
    pub enabled_stages: Vec<AugmentationStage>,
    #[config(default = 0.8)]
    pub jitter_probability: f64,
    /// Brightness factor is drawn from `[1 - b, 1 + b]`.
    #[config(default = 0.5)]
    pub brightness: f32,
    #[config(default = 0.5)]
    pub contrast: f32,
    #[config(default = 0.5)]
    pub saturation: f32,
    /// Hue shift is drawn from `[-h, h]`, in turns.
    #[config(default = 0.25)]
    pub hue: f32,
    #[config(default = 0.2)]
    pub grayscale_probability: f64,
    #[config(default = 0.5)]
    pub blur_probability: f64,
    #[config(default = 0.1)]
    pub sigma_min: f32,
    #[config(default = 2.0)]
    pub sigma_max: f32,
}

impl StrongAugmentationConfig {
    pub fn init(&self) -> DatasetResult<StrongAugmentation> {
        let probabilities = [
            ("jitter_probability", self.jitter_probability),
            ("grayscale_probability", self.grayscale_probability),
            ("blur_probability", self.blur_probability),
        ];
        for (name, p) in probabilities {
            if !(0.0..=1.0).contains(&p) {
                return Err(invalid(format!("{name} must be in [0, 1], got {p}")));
            }
        }

        let strengths = [
            ("brightness", self.brightness, 1.0),
            ("contrast", self.contrast, 1.0),
            ("saturation", self.saturation, 1.0),
            ("hue", self.hue, 0.5),
        ];
        for (name, value, max) in strengths {
            if !(0.0..=max).contains(&value) {
                return Err(invalid(format!("{name} must be in [0, {max}], got {value}")));
            }
        }

        if !(self.sigma_min > 0.0 && self.sigma_min <= self.sigma_max) {
            return Err(invalid(format!(
                "sigma range [{}, {}] is empty or not positive",
                self.sigma_min, self.sigma_max
            )));
        }

        let enabled = |stage| self.enabled_stages.contains(&stage);

        Ok(StrongAugmentation {
            jitter: enabled(AugmentationStage::ColorJitter).then_some(self.jitter_probability),
            grayscale: enabled(AugmentationStage::Grayscale).then_some(self.grayscale_probability),
            blur: enabled(AugmentationStage::GaussianBlur).then_some(self.blur_probability),
            brightness: self.brightness,
            contrast: self.contrast,
            saturation: self.saturation,
            hue: self.hue,
            sigma: (self.sigma_min, self.sigma_max),
        })
    }
}

fn invalid(reason: String) -> DatasetError {
    DatasetError::InvalidConfiguration { reason }
}

/// Named ablations of the strong policy.
///
/// Serde, [`FromStr`] and [`Display`](fmt::Display) all use [`name`](Self::name).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StrongVariant {
    #[serde(rename = "full")]
    Full,
    #[serde(rename = "wo_grayscale")]
    WithoutGrayscale,
    #[serde(rename = "wo_blur")]
    WithoutBlur,
    #[serde(rename = "wo_colorjitter")]
    WithoutJitter,
    /// No stage runs, so the strong view equals the weak view.
    #[serde(rename = "baseline")]
    Baseline,
}

impl StrongVariant {
    pub const ALL: [Self; 5] = [
        Self::Full,
        Self::WithoutGrayscale,
        Self::WithoutBlur,
        Self::WithoutJitter,
        Self::Baseline,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::WithoutGrayscale => "wo_grayscale",
            Self::WithoutBlur => "wo_blur",
            Self::WithoutJitter => "wo_colorjitter",
            Self::Baseline => "baseline",
        }
    }

    /// Default policy with exactly this variant's stages enabled.
    pub fn config(self) -> StrongAugmentationConfig {
        use AugmentationStage::*;

        let stages = match self {
            Self::Full => vec![ColorJitter, Grayscale, GaussianBlur],
            Self::WithoutGrayscale => vec![ColorJitter, GaussianBlur],
            Self::WithoutBlur => vec![ColorJitter, Grayscale],
            Self::WithoutJitter => vec![Grayscale, GaussianBlur],
            Self::Baseline => Vec::new(),
        };

        StrongAugmentationConfig::new().with_enabled_stages(stages)
    }
}

impl fmt::Display for StrongVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StrongVariant {
    type Err = DatasetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|variant| variant.name() == s)
            .ok_or_else(|| invalid(format!("unknown strong augmentation variant '{s}'")))
    }
}

/// One color jitter operation with its drawn factor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum JitterOp {
    Brightness(f32),
    Contrast(f32),
    Saturation(f32),
    /// Shift in turns.
    Hue(f32),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BlurParams {
    /// Odd kernel side length.
    pub kernel_size: usize,
    pub sigma: f32,
}

/// One draw of the strong policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StrongAugmentationParams {
    /// Jitter operations in application order, if jitter fired.
    pub jitter: Option<[JitterOp; 4]>,
    pub grayscale: bool,
    pub blur: Option<BlurParams>,
}

impl StrongAugmentationParams {
    /// Parameters that leave every image unchanged.
    pub const IDENTITY: Self = Self {
        jitter: None,
        grayscale: false,
        blur: None,
    };

    pub fn is_identity(&self) -> bool {
        self.jitter.is_none() && !self.grayscale && self.blur.is_none()
    }

    /// Applies the recorded stages to an image with values in `[0, 1]`.
    pub fn apply(&self, image: &Rgb32FImage) -> Rgb32FImage {
        let mut out = image.clone();

        if let Some(ops) = &self.jitter {
            for op in ops {
                match *op {
                    JitterOp::Brightness(f) => adjust_brightness(&mut out, f),
                    JitterOp::Contrast(f) => adjust_contrast(&mut out, f),
                    JitterOp::Saturation(f) => adjust_saturation(&mut out, f),
                    JitterOp::Hue(shift) => adjust_hue(&mut out, shift),
                }
            }
        }
        if self.grayscale {
            to_grayscale(&mut out);
        }
        if let Some(blur) = &self.blur {
            out = gaussian_blur(&out, blur.kernel_size, blur.sigma);
        }

        out
    }
}

/// The configured strong policy. Cheap to share across loader workers.
#[derive(Debug, Clone)]
pub struct StrongAugmentation {
    jitter: Option<f64>,
    grayscale: Option<f64>,
    blur: Option<f64>,
    brightness: f32,
    contrast: f32,
    saturation: f32,
    hue: f32,
    sigma: (f32, f32),
}

impl StrongAugmentation {
    /// True when no stage is enabled, so every draw is the identity.
    pub fn is_baseline(&self) -> bool {
        self.jitter.is_none() && self.grayscale.is_none() && self.blur.is_none()
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> StrongAugmentationParams {
        let jitter = self
            .jitter
            .filter(|p| rng.random_bool(*p))
            .map(|_| self.sample_jitter(rng));
        let grayscale = self.grayscale.is_some_and(|p| rng.random_bool(p));
        let blur = self.blur.filter(|p| rng.random_bool(*p)).map(|_| {
            // floor(u * 4.95) is in 0..=4; even sizes move up to the next odd one.
            let kernel_size = (rng.random::<f32>() * 4.95) as usize;
            BlurParams {
                kernel_size: kernel_size | 1,
                sigma: rng.random_range(self.sigma.0..=self.sigma.1),
            }
        });

        StrongAugmentationParams {
            jitter,
            grayscale,
            blur,
        }
    }

    fn sample_jitter<R: Rng + ?Sized>(&self, rng: &mut R) -> [JitterOp; 4] {
        let mut ops = [
            JitterOp::Brightness(factor(rng, self.brightness)),
            JitterOp::Contrast(factor(rng, self.contrast)),
            JitterOp::Saturation(factor(rng, self.saturation)),
            JitterOp::Hue(rng.random_range(-self.hue..=self.hue)),
        ];
        ops.shuffle(rng);
        ops
    }

    pub fn augment<R: Rng + ?Sized>(&self, image: &Rgb32FImage, rng: &mut R) -> Rgb32FImage {
        self.sample(rng).apply(image)
    }
}

fn factor<R: Rng + ?Sized>(rng: &mut R, strength: f32) -> f32 {
    rng.random_range((1.0 - strength).max(0.0)..=1.0 + strength)
}

fn luma(p: &Rgb<f32>) -> f32 {
    LUMA[0] * p.0[0] + LUMA[1] * p.0[1] + LUMA[2] * p.0[2]
}

fn map_channels(image: &mut Rgb32FImage, f: impl Fn(f32, f32) -> f32) {
    for pixel in image.pixels_mut() {
        let gray = luma(pixel);
        for value in pixel.0.iter_mut() {
            *value = f(*value, gray).clamp(0.0, 1.0);
        }
    }
}

fn adjust_brightness(image: &mut Rgb32FImage, factor: f32) {
    map_channels(image, |x, _| x * factor);
}

fn adjust_contrast(image: &mut Rgb32FImage, factor: f32) {
    let count = (image.width() * image.height()).max(1) as f32;
    let mean = image.pixels().map(luma).sum::<f32>() / count;
    map_channels(image, |x, _| factor * x + (1.0 - factor) * mean);
}

fn adjust_saturation(image: &mut Rgb32FImage, factor: f32) {
    map_channels(image, |x, gray| factor * x + (1.0 - factor) * gray);
}

fn adjust_hue(image: &mut Rgb32FImage, shift: f32) {
    for pixel in image.pixels_mut() {
        let [h, s, v] = rgb_to_hsv(pixel.0);
        pixel.0 = hsv_to_rgb([(h + shift).rem_euclid(1.0), s, v]);
    }
}

fn to_grayscale(image: &mut Rgb32FImage) {
    for pixel in image.pixels_mut() {
        let gray = luma(pixel).clamp(0.0, 1.0);
        pixel.0 = [gray; 3];
    }
}

/// HSV with all components in `[0, 1]`.
fn rgb_to_hsv([r, g, b]: [f32; 3]) -> [f32; 3] {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let s = if max > 0.0 { delta / max } else { 0.0 };
    let h = if delta <= 0.0 {
        0.0
    } else if max == r {
        ((g - b) / delta).rem_euclid(6.0)
    } else if max == g {
        (b - r) / delta + 2.0
    } else {
        (r - g) / delta + 4.0
    };

    [h / 6.0, s, max]
}

fn hsv_to_rgb([h, s, v]: [f32; 3]) -> [f32; 3] {
    let sector = h * 6.0;
    let i = sector.floor();
    let f = sector - i;
    let p = v * (1.0 - s);
    let q = v * (1.0 - s * f);
    let t = v * (1.0 - s * (1.0 - f));

    match (i as i32).rem_euclid(6) {
        0 => [v, t, p],
        1 => [q, v, p],
        2 => [p, v, t],
        3 => [p, q, v],
        4 => [t, p, v],
        _ => [v, p, q],
    }
}

fn gaussian_kernel(size: usize, sigma: f32) -> Vec<f32> {
    let half = (size as f32 - 1.0) / 2.0;
    let weights: Vec<f32> = (0..size)
        .map(|i| {
            let x = (i as f32 - half) / sigma;
            (-0.5 * x * x).exp()
        })
        .collect();
    let total: f32 = weights.iter().sum();
    weights.into_iter().map(|w| w / total).collect()
}

/// Mirror index without repeating the edge sample.
fn reflect(index: isize, len: usize) -> usize {
    if len == 1 {
        return 0;
    }
    let period = 2 * (len as isize - 1);
    let m = index.rem_euclid(period);
    if m >= len as isize {
        (period - m) as usize
    } else {
        m as usize
    }
}

/// Separable Gaussian blur with mirrored borders.
fn gaussian_blur(image: &Rgb32FImage, kernel_size: usize, sigma: f32) -> Rgb32FImage {
    if kernel_size <= 1 {
        return image.clone();
    }
    let kernel = gaussian_kernel(kernel_size, sigma);
    let radius = (kernel_size / 2) as u32;
    let (width, height) = image.dimensions();

    // imageproc clamps at the border, so mirror the margin in first.
    let padded = Rgb32FImage::from_fn(width + 2 * radius, height + 2 * radius, |x, y| {
        let sx = reflect(x as isize - radius as isize, width as usize);
        let sy = reflect(y as isize - radius as isize, height as usize);
        *image.get_pixel(sx as u32, sy as u32)
    });
    let blurred = separable_filter_equal(&padded, kernel.as_slice());

    imageops::crop_imm(&blurred, radius, radius, width, height).to_image()
}

/// Configuration for [`GaussianNoise`].
#[derive(Config, Debug)]
pub struct GaussianNoiseConfig {
    #[config(default = 0.0)]
    pub mean: f32,
    #[config(default = 1.0)]
    pub std: f32,
    /// Multiplier applied to the drawn noise.
    #[config(default = 5.0)]
    pub level: f32,
}

impl GaussianNoiseConfig {
    pub fn init(&self) -> GaussianNoise {
        GaussianNoise {
            mean: self.mean,
            std: self.std,
            level: self.level,
        }
    }
}

/// Additive noise `x + (N(0, 1) * std + mean) * level`.
///
/// The result is not clamped and may leave `[0, 1]`.
#[derive(Debug, Clone)]
pub struct GaussianNoise {
    mean: f32,
    std: f32,
    level: f32,
}

impl GaussianNoise {
    /// Draws `len` samples of `N(0, 1) * std + mean`.
    pub fn sample<R: Rng + ?Sized>(&self, len: usize, rng: &mut R) -> Vec<f32> {
        (0..len)
            .map(|_| rng.sample::<f32, _>(StandardNormal) * self.std + self.mean)
            .collect()
    }

    pub fn apply(&self, image: &ImageTensor, noise: &[f32]) -> ImageTensor {
        let level = self.level;
        image.zip_map(noise, |x, n| x + n * level)
    }

    pub fn perturb<R: Rng + ?Sized>(&self, image: &ImageTensor, rng: &mut R) -> ImageTensor {
        let noise = self.sample(image.data().len(), rng);
        self.apply(image, &noise)
    }
}

/// A degradation applied to an already tensorized image.
///
/// Used for externally supplied strong views such as synthetic night
/// degradation.
pub trait TensorDegradation: Send + Sync {
    fn degrade(&self, image: &ImageTensor, rng: &mut StdRng) -> ImageTensor;
}

impl TensorDegradation for GaussianNoise {
    fn degrade(&self, image: &ImageTensor, rng: &mut StdRng) -> ImageTensor {
        self.perturb(image, rng)
    }
}

//! Dataset Testing Tool
//!
//! Loads every dataset variant from one root and prints shapes, value
//! ranges and batch layouts. Useful for checking a dataset tree before
//! training.
//!
//! ## Usage
//!
//! ```bash
//! # Inspect the train phase
//! cargo run --bin dataset_test -- --dataset-path datasets/LOL
//!
//! # Strong views without blur, with additive noise, reproducibly
//! cargo run --bin dataset_test -- --dataset-path datasets/LOL --variant wo_blur --noise-level 5 --seed 42
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use burn::{
    data::{dataloader::DataLoaderBuilder, dataset::Dataset},
    prelude::*,
    tensor::cast::ToElement,
};
use clap::Parser;
use semilight_burn::{
    dataset::{BankBatcher, LabeledBatcher, WeakStrongBatcher},
    BankDataset, GaussianNoiseConfig, ImageTensor, InferenceDataset, LabeledDataset,
    PairedDatasetConfig, Split, StrongVariant, UnlabeledDataset,
};
use semilight_demos::{
    create_device, init_logging, DatasetTestConfig, SelectedBackend, SelectedDevice, BACKEND_NAME,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Dataset root holding <phase>/{input,GT,candidate}
    #[arg(long)]
    dataset_path: Option<PathBuf>,

    /// Phase directory under the root
    #[arg(long)]
    phase: Option<String>,

    /// Strong augmentation variant (full, wo_grayscale, wo_blur, wo_colorjitter, baseline)
    #[arg(long)]
    variant: Option<StrongVariant>,

    /// Add Gaussian noise of this level to the strong view
    #[arg(long)]
    noise_level: Option<f32>,

    /// Seed for reproducible items
    #[arg(long)]
    seed: Option<u64>,

    /// Number of samples to print
    #[arg(long)]
    num_samples: Option<usize>,

    /// Batch size for testing
    #[arg(long)]
    batch_size: Option<usize>,

    /// Number of workers for data loading
    #[arg(long)]
    num_workers: Option<usize>,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let mut config = if let Some(config_path) = &args.config {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;
        serde_json::from_str::<DatasetTestConfig>(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?
    } else {
        DatasetTestConfig::default()
    };

    // Command line overrides
    if let Some(path) = args.dataset_path {
        config.dataset_path = path;
    }
    if let Some(phase) = args.phase {
        config.phase = phase;
    }
    if let Some(variant) = args.variant {
        config.variant = variant;
    }
    if let Some(level) = args.noise_level {
        config.noise = Some(GaussianNoiseConfig::new().with_level(level));
    }
    if args.seed.is_some() {
        config.seed = args.seed;
    }
    if let Some(n) = args.num_samples {
        config.num_samples = n;
    }
    if let Some(n) = args.batch_size {
        config.batch_size = n;
    }
    if let Some(n) = args.num_workers {
        config.num_workers = n;
    }

    if !config.dataset_path.exists() {
        anyhow::bail!(
            "Dataset path does not exist: {}",
            config.dataset_path.display()
        );
    }

    let device = create_device();
    println!("Using backend: {BACKEND_NAME}");
    println!("Dataset path: {}", config.dataset_path.display());
    println!("Phase: {}", config.phase);
    println!("Strong variant: {}", config.variant);

    let paired = PairedDatasetConfig::new(config.dataset_path.clone())
        .with_phase(config.phase.clone())
        .with_load_size(config.load_size)
        .with_fine_size(config.fine_size)
        .with_seed(config.seed);

    test_labeled(&paired, &config, &device)?;
    test_unlabeled(&paired, &config, &device)?;
    test_bank(&paired, &config, &device)?;
    test_inference(&paired, &config, &device)?;

    println!("\nDataset testing completed successfully!");
    Ok(())
}

fn test_labeled(
    paired: &PairedDatasetConfig,
    config: &DatasetTestConfig,
    device: &SelectedDevice,
) -> Result<()> {
    println!("\n=== Labeled Pairs ===");

    if !paired.target_dir().is_dir() {
        println!(
            "No target directory at {}, skipping",
            paired.target_dir().display()
        );
        return Ok(());
    }

    let train = LabeledDataset::new(paired, Split::Train).context("Failed to create train set")?;
    let validation = LabeledDataset::new(paired, Split::Validation)
        .context("Failed to create validation set")?;
    println!("Train pairs: {}, validation pairs: {}", train.len(), validation.len());

    for i in 0..config.num_samples.min(train.len()) {
        let item = train.try_get(i).context("Failed to get labeled sample")?;
        println!("Sample {i}: {}", item.input_path.display());
        print_stats("input", &item.input, device);
        print_stats("target", &item.target, device);
    }

    let dataloader = DataLoaderBuilder::new(LabeledBatcher::<SelectedBackend>::new())
        .batch_size(config.batch_size)
        .shuffle(42)
        .num_workers(config.num_workers)
        .build(train);
    if let Some(batch) = dataloader.iter().next() {
        println!("Batch inputs: {:?}", batch.inputs.dims());
        println!("Batch targets: {:?}", batch.targets.dims());
    }

    Ok(())
}

fn test_unlabeled(
    paired: &PairedDatasetConfig,
    config: &DatasetTestConfig,
    device: &SelectedDevice,
) -> Result<()> {
    println!("\n=== Unlabeled Weak/Strong Views ===");

    let policy = config
        .variant
        .config()
        .init()
        .context("Invalid strong augmentation")?;
    let mut dataset =
        UnlabeledDataset::new(paired, policy).context("Failed to create unlabeled set")?;
    if let Some(noise) = &config.noise {
        dataset = dataset.with_noise(noise.init());
    }
    println!("Unlabeled images: {}", dataset.len());

    for i in 0..config.num_samples.min(dataset.len()) {
        let item = dataset.try_get(i).context("Failed to get unlabeled sample")?;
        println!("Sample {i}: {}", item.path.display());
        print_stats("weak", &item.weak, device);
        print_stats("strong", &item.strong, device);
    }

    let dataloader = DataLoaderBuilder::new(WeakStrongBatcher::<SelectedBackend>::new())
        .batch_size(config.batch_size)
        .num_workers(config.num_workers)
        .build(dataset);
    if let Some(batch) = dataloader.iter().next() {
        println!("Batch weak: {:?}", batch.weak.dims());
        println!("Batch strong: {:?}", batch.strong.dims());
    }

    Ok(())
}

fn test_bank(
    paired: &PairedDatasetConfig,
    config: &DatasetTestConfig,
    device: &SelectedDevice,
) -> Result<()> {
    println!("\n=== Candidate Bank ===");

    if !paired.candidate_dir().is_dir() {
        println!(
            "No candidate directory at {}, skipping",
            paired.candidate_dir().display()
        );
        return Ok(());
    }

    let policy = config
        .variant
        .config()
        .init()
        .context("Invalid strong augmentation")?;
    let dataset = BankDataset::new(paired, policy).context("Failed to create bank set")?;
    println!("Bank entries: {}", dataset.len());

    for i in 0..config.num_samples.min(dataset.len()) {
        let item = dataset.try_get(i).context("Failed to get bank sample")?;
        println!("Sample {i}: candidate {}", item.candidate_path.display());
        print_stats("candidate", &item.candidate, device);
    }

    let dataloader = DataLoaderBuilder::new(BankBatcher::<SelectedBackend>::new())
        .batch_size(config.batch_size)
        .num_workers(config.num_workers)
        .build(dataset);
    if let Some(batch) = dataloader.iter().next() {
        println!("Batch candidates: {:?}", batch.candidates.dims());
    }

    Ok(())
}

fn test_inference(
    paired: &PairedDatasetConfig,
    config: &DatasetTestConfig,
    device: &SelectedDevice,
) -> Result<()> {
    println!("\n=== Inference Source ===");

    let dataset =
        InferenceDataset::new(paired.phase_dir()).context("Failed to create inference set")?;
    println!("Inference images: {}", dataset.len());

    for i in 0..config.num_samples.min(dataset.len()) {
        let item = dataset.try_get(i).context("Failed to get inference sample")?;
        println!("Sample {i}: {}", item.path.display());
        print_stats("image", &item.image, device);
    }

    Ok(())
}

fn print_stats(label: &str, image: &ImageTensor, device: &SelectedDevice) {
    let shape = image.shape();
    let tensor = image.clone().into_tensor::<SelectedBackend>(device);
    let (min, max, mean) = calculate_tensor_stats(tensor);

    println!("  {label}: shape={shape:?}, min={min:.4}, max={max:.4}, mean={mean:.4}");
    if min < 0.0 || max > 1.0 {
        println!("  NOTE: {label} values outside [0, 1]");
    }
}

fn calculate_tensor_stats<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> (f32, f32, f32) {
    let min_val = tensor.clone().min().into_scalar().to_f32();
    let max_val = tensor.clone().max().into_scalar().to_f32();
    let mean_val = tensor.mean().into_scalar().to_f32();

    (min_val, max_val, mean_val)
}

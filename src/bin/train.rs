//! 画像分類モデルの学習

#![recursion_limit = "256"]

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use image_classifier_lib::ml::{train_model, EpochMetrics};
use image_classifier_lib::model::{AppConfig, DeviceType};

#[derive(Parser, Debug)]
#[command(name = "train")]
#[command(about = "Train an image classifier on a folder-per-class dataset", version)]
struct Args {
    /// Path to the JSON config file (default: config.json if present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Dataset root containing one subdirectory per class
    #[arg(long = "dataset-root")]
    dataset_root: Option<PathBuf>,

    #[arg(long)]
    epochs: Option<usize>,

    #[arg(long = "batch-size")]
    batch_size: Option<usize>,

    #[arg(long = "image-size")]
    image_size: Option<usize>,

    /// Seed for the train/validation split
    #[arg(long)]
    seed: Option<u64>,

    #[arg(long = "val-fraction")]
    val_fraction: Option<f32>,

    /// Pretrained torchvision mobilenet_v2 weights (.pth)
    #[arg(long = "backbone-weights")]
    backbone_weights: Option<PathBuf>,

    /// Compute device
    #[arg(long, value_enum)]
    device: Option<DeviceType>,
}

fn print_epoch(metrics: &EpochMetrics) {
    let val = match (metrics.val_loss, metrics.val_accuracy) {
        (Some(loss), Some(acc)) => format!("val_loss: {:.4}, val_acc: {:.2}%", loss, acc * 100.0),
        _ => "val: -".to_string(),
    };
    println!(
        "エポック {:>3}: loss: {:.4}, acc: {:.2}%, {}",
        metrics.epoch,
        metrics.train_loss,
        metrics.train_accuracy * 100.0,
        val
    );
}

fn main() -> Result<()> {
    image_classifier_lib::init_tracing();
    let args = Args::parse();

    let mut config = AppConfig::load_from(args.config.as_deref())?;
    let training = &mut config.training;
    if let Some(dataset_root) = args.dataset_root {
        training.dataset_root = dataset_root;
    }
    if let Some(epochs) = args.epochs {
        training.epochs = epochs;
    }
    if let Some(batch_size) = args.batch_size {
        training.batch_size = batch_size;
    }
    if let Some(image_size) = args.image_size {
        training.image_size = image_size;
    }
    if let Some(seed) = args.seed {
        training.split_seed = seed;
    }
    if let Some(val_fraction) = args.val_fraction {
        training.val_fraction = val_fraction;
    }
    if let Some(weights) = args.backbone_weights {
        training.backbone_weights = Some(weights);
    }
    if let Some(device) = args.device {
        config.device_type = device;
    }
    config.log_summary();

    let report = match config.device_type {
        DeviceType::Wgpu => train_model::<burn_autodiff::Autodiff<burn::backend::Wgpu>, _>(
            &config.training,
            &config.artifacts,
            burn_wgpu::WgpuDevice::default(),
            print_epoch,
        )?,
        DeviceType::Cpu => train_model::<burn_autodiff::Autodiff<burn_ndarray::NdArray>, _>(
            &config.training,
            &config.artifacts,
            burn_ndarray::NdArrayDevice::Cpu,
            print_epoch,
        )?,
    };

    println!("\n✅ 学習完了");
    println!("  クラス: {:?}", report.class_names);
    if let Some(last) = report.history.last() {
        println!("  最終学習精度: {:.2}%", last.train_accuracy * 100.0);
        if let Some(acc) = last.val_accuracy {
            println!("  最終検証精度: {:.2}%", acc * 100.0);
        }
    }
    println!("  モデル: {}", report.model_path.display());
    Ok(())
}

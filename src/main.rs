//! 画像分類の推論サーバー

#![recursion_limit = "256"]

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use image_classifier_lib::model::{archive_path, AppConfig, DeviceType};
use image_classifier_lib::server::serve;

#[derive(Parser, Debug)]
#[command(name = "image_classifier")]
#[command(about = "Image classification inference server", version)]
struct Args {
    /// Path to the JSON config file (default: config.json if present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Bind address (default: 0.0.0.0:5000)
    #[arg(long)]
    bind: Option<String>,

    /// Path to the trained model archive (.tar.gz)
    #[arg(long)]
    model: Option<PathBuf>,

    /// Path to the class names file
    #[arg(long)]
    labels: Option<PathBuf>,

    /// Directory for temporary uploads
    #[arg(long = "upload-dir")]
    upload_dir: Option<PathBuf>,

    /// Compute device
    #[arg(long, value_enum)]
    device: Option<DeviceType>,
}

#[tokio::main]
async fn main() -> Result<()> {
    image_classifier_lib::init_tracing();
    let args = Args::parse();

    let mut config = AppConfig::load_from(args.config.as_deref())?;
    if let Some(bind) = args.bind {
        config.server.bind_address = bind;
    }
    if let Some(model) = args.model {
        config.artifacts.model_path = model;
    }
    if let Some(labels) = args.labels {
        config.artifacts.class_names_path = labels;
    }
    if let Some(upload_dir) = args.upload_dir {
        config.server.upload_dir = upload_dir;
    }
    if let Some(device) = args.device {
        config.device_type = device;
    }
    tracing::info!("計算デバイス: {}", config.device_type);

    // 学習時と同じ規則で保存先を解決する
    let model_path = archive_path(&config.artifacts.model_path);
    let class_names_path = config.artifacts.class_names_path.clone();

    match config.device_type {
        DeviceType::Wgpu => {
            serve::<burn::backend::Wgpu>(
                &config.server,
                model_path,
                class_names_path,
                burn_wgpu::WgpuDevice::default(),
            )
            .await
        }
        DeviceType::Cpu => {
            serve::<burn_ndarray::NdArray>(
                &config.server,
                model_path,
                class_names_path,
                burn_ndarray::NdArrayDevice::Cpu,
            )
            .await
        }
    }
}

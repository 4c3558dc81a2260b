pub mod backbone;
pub mod ml_model;
pub mod history;
pub mod progress;
pub mod training;
pub mod inference;

pub use backbone::{MobileNetV2, FEATURE_DIM};
pub use ml_model::{ImageClassifier, ModelConfig, normalize_image, load_and_normalize_image_with_size};
pub use history::{EpochMetrics, TrainingHistory};
pub use progress::EpochMetricsRenderer;
pub use training::{ImageFolderDataset, ClassFolder, TrainingReport, scan_dataset, train_model};
pub use inference::InferenceEngine;

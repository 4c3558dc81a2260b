pub mod model_metadata;
pub mod model_storage;
pub mod vocabulary;
pub mod config;

pub use model_metadata::ModelMetadata;
pub use model_storage::{archive_path, save_model_with_metadata, load_model_with_metadata, log_metadata_info};
pub use vocabulary::LabelVocabulary;
pub use config::{AppConfig, DeviceType, TrainingSettings, ArtifactSettings, ServerSettings};

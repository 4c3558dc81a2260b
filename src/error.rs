//! エラー型定義

use std::path::PathBuf;

/// 学習開始前に検出される設定・データセットのエラー
///
/// いずれも致命的で、学習処理は一切行われない。
#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("dataset root does not exist or is not a directory: {0}")]
    RootNotFound(PathBuf),

    #[error("dataset must contain at least 2 classes in separate folders, found {found}")]
    NotEnoughClasses { found: usize },

    #[error("class name {0:?} cannot be stored in the label vocabulary")]
    InvalidClassName(String),

    #[error("invalid training setting: {0}")]
    InvalidSetting(String),

    #[error("failed to read dataset: {0}")]
    Io(#[from] std::io::Error),
}

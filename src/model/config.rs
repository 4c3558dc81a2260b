//! アプリケーション設定管理モジュール
//!
//! 計算デバイス、学習パラメータ、成果物の保存先、サーバー設定をJSON形式で保存・読み込みします。

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::DatasetError;

/// 計算デバイスの種類
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    /// WGPU (GPU) バックエンド
    #[default]
    Wgpu,
    /// NdArray (CPU) バックエンド
    Cpu,
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::Wgpu => write!(f, "WGPU (GPU)"),
            DeviceType::Cpu => write!(f, "CPU (NdArray)"),
        }
    }
}

/// トレーニング設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingSettings {
    /// クラスごとのサブディレクトリを含むデータセットのルート
    pub dataset_root: PathBuf,
    /// 入力画像サイズ（正方形、ピクセル）
    pub image_size: usize,
    /// バッチサイズ
    pub batch_size: usize,
    /// 学習/検証分割とシャッフルに使うシード
    pub split_seed: u64,
    /// 検証データの割合
    pub val_fraction: f32,
    /// エポック数
    pub epochs: usize,
    /// 学習率
    pub learning_rate: f64,
    /// 分類ヘッドの隠れ層ユニット数
    pub hidden_units: usize,
    /// ドロップアウト率
    pub dropout: f64,
    /// データローダーのワーカー数
    pub num_workers: usize,
    /// torchvision MobileNetV2 の学習済み重み (.pth)
    pub backbone_weights: Option<PathBuf>,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            dataset_root: PathBuf::from("dataset"),
            image_size: 224,
            batch_size: 32,
            split_seed: 123,
            val_fraction: 0.2,
            epochs: 10,
            learning_rate: 1e-3,
            hidden_units: 128,
            dropout: 0.3,
            num_workers: 2,
            backbone_weights: None,
        }
    }
}

impl TrainingSettings {
    /// 学習開始前に設定値を検証
    pub fn validate(&self) -> Result<(), DatasetError> {
        if !(0.0..1.0).contains(&self.val_fraction) {
            return Err(DatasetError::InvalidSetting(format!(
                "val_fraction must be in [0, 1), got {}",
                self.val_fraction
            )));
        }
        if self.batch_size == 0 {
            return Err(DatasetError::InvalidSetting("batch_size must be positive".into()));
        }
        if self.epochs == 0 {
            return Err(DatasetError::InvalidSetting("epochs must be positive".into()));
        }
        if self.image_size == 0 {
            return Err(DatasetError::InvalidSetting("image_size must be positive".into()));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(DatasetError::InvalidSetting(format!(
                "dropout must be in [0, 1), got {}",
                self.dropout
            )));
        }
        Ok(())
    }
}

/// 学習成果物の保存先
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactSettings {
    /// モデルファイル (tar.gz)
    pub model_path: PathBuf,
    /// クラス名一覧 (1行1クラス)
    pub class_names_path: PathBuf,
    /// エポックごとの精度履歴 (CSV)
    pub history_path: PathBuf,
    /// 精度推移グラフ (PNG)
    pub chart_path: PathBuf,
}

impl Default for ArtifactSettings {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/image_classifier.tar.gz"),
            class_names_path: PathBuf::from("class_names.txt"),
            history_path: PathBuf::from("training_history.csv"),
            chart_path: PathBuf::from("training_accuracy.png"),
        }
    }
}

/// 推論サーバー設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// バインドアドレス
    pub bind_address: String,
    /// アップロード画像の一時保存先
    pub upload_dir: PathBuf,
    /// リクエストボディの上限（バイト）
    pub max_upload_bytes: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:5000".to_string(),
            upload_dir: PathBuf::from("uploads"),
            max_upload_bytes: 16 * 1024 * 1024,
        }
    }
}

/// アプリケーション設定
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// 計算デバイスの種類
    pub device_type: DeviceType,
    /// トレーニング設定
    pub training: TrainingSettings,
    /// 成果物の保存先
    pub artifacts: ArtifactSettings,
    /// サーバー設定
    pub server: ServerSettings,
}

impl AppConfig {
    /// 設定ファイルのデフォルトパス
    pub fn default_path() -> PathBuf {
        PathBuf::from("config.json")
    }

    /// 設定を読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// 指定パス（省略時はデフォルトパス）から設定を読み込む
    ///
    /// ファイルが存在しない場合はデフォルト設定を返す。
    /// 明示的に指定されたファイルが読めない場合はエラー。
    pub fn load_from(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::load(path).map_err(|e| {
                anyhow::anyhow!("設定ファイルの読み込みに失敗しました ({}): {}", path.display(), e)
            }),
            None => Ok(Self::load_or_default()),
        }
    }

    /// デフォルトパスから設定を読み込む、存在しない場合はデフォルト設定を返す
    pub fn load_or_default() -> Self {
        let path = Self::default_path();
        if path.exists() {
            match Self::load(&path) {
                Ok(config) => {
                    tracing::info!("設定ファイルを読み込みました: {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!(
                        "設定ファイルの読み込みに失敗しました ({}): {}。デフォルト設定を使用します",
                        path.display(),
                        e
                    );
                    Self::default()
                }
            }
        } else {
            tracing::info!("設定ファイルが存在しません。デフォルト設定を使用します");
            Self::default()
        }
    }

    /// 設定情報をログに出力
    pub fn log_summary(&self) {
        tracing::info!("計算デバイス: {}", self.device_type);
        tracing::info!(
            dataset_root = %self.training.dataset_root.display(),
            image_size = self.training.image_size,
            batch_size = self.training.batch_size,
            split_seed = self.training.split_seed,
            val_fraction = self.training.val_fraction,
            epochs = self.training.epochs,
            learning_rate = self.training.learning_rate,
            "トレーニング設定"
        );
        tracing::info!(
            model_path = %self.artifacts.model_path.display(),
            class_names_path = %self.artifacts.class_names_path.display(),
            "成果物の保存先"
        );
    }
}

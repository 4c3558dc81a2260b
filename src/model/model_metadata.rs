//! モデルメタデータの定義
//!
//! tar.gz形式のモデルファイルに metadata.json として格納され、
//! 推論時にモデル構造の再構築とラベル語彙の照合に使われます。

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// 特徴抽出器の識別子
pub const BACKBONE_NAME: &str = "mobilenet_v2";

/// モデルメタデータ
///
/// tar.gz形式で保存される情報：
/// - metadata.json: このメタデータ（JSON形式）
/// - model.bin: モデルの重み（バイナリ）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// 特徴抽出器の種類
    pub backbone: String,

    /// 学習時のクラス名（クラスインデックス順）
    pub class_names: Vec<String>,

    /// モデル入力サイズ（正方形、ピクセル）
    pub image_size: usize,

    /// 分類ヘッドの隠れ層ユニット数
    pub hidden_units: usize,

    /// 学習時のドロップアウト率
    pub dropout: f64,

    /// 学習エポック数
    pub num_epochs: usize,

    /// 最終エポックの検証精度（検証データが無い場合は None）
    #[serde(default)]
    pub final_val_accuracy: Option<f64>,

    /// モデルの学習時刻（ISO8601形式）
    pub trained_at: String,
}

impl ModelMetadata {
    /// 新しいメタデータを作成
    pub fn new(
        class_names: Vec<String>,
        image_size: usize,
        hidden_units: usize,
        dropout: f64,
        num_epochs: usize,
        final_val_accuracy: Option<f64>,
    ) -> Self {
        Self {
            backbone: BACKBONE_NAME.to_string(),
            class_names,
            image_size,
            hidden_units,
            dropout,
            num_epochs,
            final_val_accuracy,
            trained_at: chrono::Local::now().to_rfc3339(),
        }
    }

    /// クラス数
    pub fn num_classes(&self) -> usize {
        self.class_names.len()
    }

    /// メタデータをJSON文字列に変換
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize metadata to JSON")
    }

    /// JSON文字列からメタデータを生成
    pub fn from_json_string(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to deserialize metadata from JSON")
    }
}

use serde::{Deserialize, Serialize};

/// 1枚の画像に対する分類結果（`/predict` のレスポンス）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub predicted_class: String,
    /// 予測クラスの確率 [0, 1]
    pub confidence: f32,
    #[serde(skip)]
    pub class_index: usize,
}

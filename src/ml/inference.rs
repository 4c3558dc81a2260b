//! モデル推論機能

use std::path::Path;

use anyhow::Result;
use burn::{
    module::Module,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::{backend::Backend, cast::ToElement},
};

use crate::ml::ml_model::{image_batch_tensor, load_and_normalize_image_with_size, ImageClassifier, ModelConfig};
use crate::model::{load_model_with_metadata, log_metadata_info, LabelVocabulary};
use crate::types::Prediction;

/// 推論エンジン
pub struct InferenceEngine<B: Backend> {
    model: ImageClassifier<B>,
    vocabulary: LabelVocabulary,
    image_size: usize,
    device: B::Device,
}

impl<B: Backend> InferenceEngine<B> {
    /// モデルとクラス名一覧を読み込んで推論エンジンを初期化
    ///
    /// クラス名一覧がモデルのメタデータと一致しない場合はエラー。
    pub fn load(model_path: &Path, class_names_path: &Path, device: B::Device) -> Result<Self> {
        let (metadata, model_binary) = load_model_with_metadata(model_path)?;
        log_metadata_info(&metadata);

        let vocabulary = LabelVocabulary::load(class_names_path)?;
        if vocabulary.names() != metadata.class_names.as_slice() {
            anyhow::bail!(
                "クラス名一覧 ({}) がモデルのクラス {:?} と一致しません: {:?}",
                class_names_path.display(),
                metadata.class_names,
                vocabulary.names()
            );
        }

        let model_config = ModelConfig::from_metadata(&metadata);
        let model = model_config.init::<B>(&device);

        // モデルの重みを復元
        let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
        let record = recorder
            .load(model_binary, &device)
            .map_err(|e| anyhow::anyhow!("モデル重みの読み込みエラー: {:?}", e))?;
        let model = model.load_record(record);

        tracing::info!(
            "✅ モデルを読み込みました: {} ({} クラス)",
            model_path.display(),
            vocabulary.len()
        );

        Ok(Self::new(model, vocabulary, metadata.image_size, device))
    }

    pub fn new(model: ImageClassifier<B>, vocabulary: LabelVocabulary, image_size: usize, device: B::Device) -> Self {
        Self {
            model,
            vocabulary,
            image_size,
            device,
        }
    }

    /// 単一画像を分類
    pub fn classify_image(&self, image_path: &Path) -> Result<Prediction> {
        let image_data = load_and_normalize_image_with_size(image_path, self.image_size)?;
        self.classify_pixels(&image_data)
    }

    /// 正規化済みの画素データ (CHW) を分類
    pub fn classify_pixels(&self, pixels: &[f32]) -> Result<Prediction> {
        let expected = 3 * self.image_size * self.image_size;
        if pixels.len() != expected {
            anyhow::bail!("画素数が不正です: {} (期待値 {})", pixels.len(), expected);
        }

        let tensor = image_batch_tensor::<B>(pixels, 1, self.image_size, &self.device);
        let probabilities = self.model.forward_probabilities(tensor);
        let [_, num_classes] = probabilities.dims();
        if num_classes != self.vocabulary.len() {
            anyhow::bail!(
                "モデルの出力クラス数 {} がクラス名の数 {} と一致しません",
                num_classes,
                self.vocabulary.len()
            );
        }

        let (confidence, index) = probabilities.max_dim_with_indices(1);
        let class_index = index.into_scalar().to_usize();
        let confidence = confidence.into_scalar().to_f32();

        let predicted_class = self
            .vocabulary
            .name(class_index)
            .ok_or_else(|| anyhow::anyhow!("クラスインデックス {} は範囲外です", class_index))?
            .to_string();

        Ok(Prediction {
            predicted_class,
            confidence,
            class_index,
        })
    }

    pub fn vocabulary(&self) -> &LabelVocabulary {
        &self.vocabulary
    }

    pub fn image_size(&self) -> usize {
        self.image_size
    }
}

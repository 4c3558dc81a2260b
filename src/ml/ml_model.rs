//! 機械学習モデルの共通定義
//!
//! 転移学習による画像分類モデルと、学習・推論で共通の前処理を提供します。

use std::path::Path;

use burn::{
    config::Config,
    module::{AutodiffModule, Module},
    nn::{
        loss::CrossEntropyLossConfig,
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
        Dropout, DropoutConfig, Linear, LinearConfig, Relu,
    },
    tensor::{
        activation::softmax,
        backend::{AutodiffBackend, Backend},
        Int, Tensor,
    },
    train::ClassificationOutput,
};
use image::{imageops::FilterType, DynamicImage, ImageReader};

use crate::ml::backbone::{MobileNetV2, FEATURE_DIM};
use crate::model::ModelMetadata;

/// モデル設定
#[derive(Config, Debug)]
pub struct ModelConfig {
    /// 分類クラス数
    pub num_classes: usize,
    /// 隠れ層ユニット数
    #[config(default = 128)]
    pub hidden_units: usize,
    /// ドロップアウト率
    #[config(default = 0.3)]
    pub dropout: f64,
    /// 入力画像サイズ（正方形）
    #[config(default = 224)]
    pub image_size: usize,
}

impl ModelConfig {
    /// 保存済みモデルのメタデータから設定を復元
    pub fn from_metadata(metadata: &ModelMetadata) -> Self {
        Self::new(metadata.num_classes())
            .with_hidden_units(metadata.hidden_units)
            .with_dropout(metadata.dropout)
            .with_image_size(metadata.image_size)
    }

    /// ランダムな重みでモデルを初期化
    pub fn init<B: Backend>(&self, device: &B::Device) -> ImageClassifier<B> {
        self.init_with_backbone(MobileNetV2::new(device), device)
    }

    /// 既存の特徴抽出器（学習済み重み）を使ってモデルを初期化
    pub fn init_with_backbone<B: Backend>(
        &self,
        backbone: MobileNetV2<B>,
        device: &B::Device,
    ) -> ImageClassifier<B> {
        tracing::debug!(
            "[Model] 入力 {}x{} -> MobileNetV2 ({}ch) -> GAP -> FC {} -> Dropout {} -> FC {}",
            self.image_size,
            self.image_size,
            FEATURE_DIM,
            self.hidden_units,
            self.dropout,
            self.num_classes
        );

        ImageClassifier {
            backbone,
            head: ClassifierHead {
                pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
                hidden: LinearConfig::new(FEATURE_DIM, self.hidden_units).init(device),
                dropout: DropoutConfig::new(self.dropout).init(),
                output: LinearConfig::new(self.hidden_units, self.num_classes).init(device),
                activation: Relu::new(),
            },
        }
    }
}

/// 分類ヘッド（学習対象）
///
/// GAP -> FC + ReLU -> Dropout -> FC (クラス数)
#[derive(Module, Debug)]
pub struct ClassifierHead<B: Backend> {
    pool: AdaptiveAvgPool2d,
    hidden: Linear<B>,
    dropout: Dropout,
    output: Linear<B>,
    activation: Relu,
}

impl<B: Backend> ClassifierHead<B> {
    /// 特徴マップ [batch, 1280, h, w] からクラスごとのロジット [batch, num_classes] を計算
    pub fn forward(&self, features: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.pool.forward(features);
        let x = x.flatten::<2>(1, 3);
        let x = self.activation.forward(self.hidden.forward(x));
        // 推論時（autodiff無効のバックエンド）は恒等写像
        let x = self.dropout.forward(x);
        self.output.forward(x)
    }
}

/// 転移学習による画像分類モデル
///
/// # アーキテクチャ
/// - MobileNetV2 特徴抽出器（凍結）
/// - Global Average Pooling
/// - FC: 1280 -> hidden + ReLU
/// - Dropout
/// - FC: hidden -> num_classes
/// - Softmax (分類時)
#[derive(Module, Debug)]
pub struct ImageClassifier<B: Backend> {
    backbone: MobileNetV2<B>,
    head: ClassifierHead<B>,
}

impl<B: Backend> ImageClassifier<B> {
    /// 順伝播
    ///
    /// # 引数
    /// - `images`: バッチ画像 [batch_size, 3, size, size]
    ///
    /// # 戻り値
    /// - クラスごとのロジット [batch_size, num_classes]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        self.head.forward(self.backbone.forward(images))
    }

    /// クラスごとの確率 [batch_size, num_classes]（各行の和は1）
    pub fn forward_probabilities(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward(images), 1)
    }

    /// 予測を実行
    ///
    /// # 戻り値
    /// - (予測クラスID [batch_size, 1], 確率 [batch_size, num_classes])
    pub fn predict(&self, images: Tensor<B, 4>) -> (Tensor<B, 2, Int>, Tensor<B, 2>) {
        let probabilities = self.forward_probabilities(images);
        let predictions = probabilities.clone().argmax(1);
        (predictions, probabilities)
    }

    /// 順伝播と損失計算（検証用）
    pub fn forward_classification(
        &self,
        images: Tensor<B, 4>,
        targets: Tensor<B, 1, Int>,
    ) -> ClassificationOutput<B> {
        let output = self.forward(images);
        classification_output(output, targets)
    }
}

impl<B: AutodiffBackend> ImageClassifier<B> {
    /// 特徴抽出器を凍結したまま順伝播と損失計算（学習用）
    ///
    /// 特徴抽出器は内部バックエンドで実行されるため、勾配は分類ヘッドにのみ流れ、
    /// BatchNorm は移動統計量を使う推論モードのまま更新されない。
    pub fn forward_classification_frozen(
        &self,
        images: Tensor<B, 4>,
        targets: Tensor<B, 1, Int>,
    ) -> ClassificationOutput<B> {
        let features = self.backbone.valid().forward(images.inner());
        let output = self.head.forward(Tensor::from_inner(features));
        classification_output(output, targets)
    }

    /// 特徴抽出器のパラメータを勾配計算の対象から外す
    pub fn freeze_backbone(mut self) -> Self {
        self.backbone = self.backbone.no_grad();
        self
    }
}

fn classification_output<B: Backend>(
    output: Tensor<B, 2>,
    targets: Tensor<B, 1, Int>,
) -> ClassificationOutput<B> {
    let loss = CrossEntropyLossConfig::new()
        .init(&output.device())
        .forward(output.clone(), targets.clone());

    ClassificationOutput::new(loss, output, targets)
}

/// 画像を指定サイズへリサイズして [0, 1] に正規化
///
/// # 戻り値
/// - RGB画像データ (C, H, W) の順で平坦化
pub fn normalize_image(img: &DynamicImage, image_size: usize) -> Vec<f32> {
    let size = image_size as u32;
    let rgb = if img.width() == size && img.height() == size {
        img.to_rgb8()
    } else {
        img.resize_exact(size, size, FilterType::Triangle).to_rgb8()
    };

    let mut data = Vec::with_capacity(3 * image_size * image_size);
    for channel in 0..3 {
        for pixel in rgb.pixels() {
            data.push(pixel[channel] as f32 / 255.0);
        }
    }
    data
}

/// 画像を読み込んで正規化（サイズ指定版）
///
/// フォーマットは拡張子ではなくファイル内容から判定する。
pub fn load_and_normalize_image_with_size(path: &Path, image_size: usize) -> anyhow::Result<Vec<f32>> {
    let img = ImageReader::open(path)?.with_guessed_format()?.decode()?;
    Ok(normalize_image(&img, image_size))
}

/// 正規化済み画素データをバッチテンソル [batch, 3, size, size] に変換
pub fn image_batch_tensor<B: Backend>(
    pixels: &[f32],
    batch_size: usize,
    image_size: usize,
    device: &B::Device,
) -> Tensor<B, 4> {
    Tensor::<B, 1>::from_floats(pixels, device).reshape([batch_size, 3, image_size, image_size])
}

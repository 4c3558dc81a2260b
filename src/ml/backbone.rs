//! MobileNetV2 特徴抽出器
//!
//! ImageNetで学習済みの torchvision `mobilenet_v2` の重み (.pth) を読み込み、
//! 分類器の凍結された特徴抽出部として使用します。
//!
//! # アーキテクチャ
//! - Stem: Conv 3x3 stride 2 (3 -> 32) + BN + ReLU6
//! - Inverted Residual ブロック x 17
//! - Head: Conv 1x1 (320 -> 1280) + BN + ReLU6
//!
//! 出力は空間次元を保持した特徴マップ [batch, 1280, H/32, W/32]。

use std::path::Path;

use anyhow::Result;
use burn::{
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        BatchNorm, BatchNormConfig, PaddingConfig2d,
    },
    record::{FullPrecisionSettings, Recorder},
    tensor::{backend::Backend, Tensor},
};
use burn_import::pytorch::{LoadArgs, PyTorchFileRecorder};

/// 特徴マップのチャネル数
pub const FEATURE_DIM: usize = 1280;

const STEM_CHANNELS: usize = 32;

/// (拡張率 t, 出力チャネル c, 繰り返し回数 n, 最初のストライド s)
const INVERTED_RESIDUAL_SETTINGS: [(usize, usize, usize, usize); 7] = [
    (1, 16, 1, 1),
    (6, 24, 2, 2),
    (6, 32, 3, 2),
    (6, 64, 4, 2),
    (6, 96, 3, 1),
    (6, 160, 3, 2),
    (6, 320, 1, 1),
];

fn relu6<B: Backend>(x: Tensor<B, 4>) -> Tensor<B, 4> {
    x.clamp(0.0, 6.0)
}

/// Conv + BatchNorm + ReLU6
#[derive(Module, Debug)]
pub struct ConvNormActivation<B: Backend> {
    conv: Conv2d<B>,
    norm: BatchNorm<B>,
}

impl<B: Backend> ConvNormActivation<B> {
    fn new(
        channels: [usize; 2],
        kernel_size: usize,
        stride: usize,
        groups: usize,
        device: &B::Device,
    ) -> Self {
        let padding = (kernel_size - 1) / 2;
        Self {
            conv: Conv2dConfig::new(channels, [kernel_size, kernel_size])
                .with_stride([stride, stride])
                .with_padding(PaddingConfig2d::Explicit(padding, padding))
                .with_groups(groups)
                .with_bias(false)
                .init(device),
            norm: BatchNormConfig::new(channels[1]).init(device),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        relu6(self.norm.forward(self.conv.forward(x)))
    }
}

/// Inverted Residual ブロック
///
/// 1x1 拡張 (拡張率1なら省略) -> 3x3 depthwise -> 1x1 線形射影。
/// 入出力の形状が一致する場合（stride 1 かつ同チャネル数）のみ残差接続を行う。
#[derive(Module, Debug)]
pub struct InvertedResidual<B: Backend> {
    expand: Option<ConvNormActivation<B>>,
    depthwise: ConvNormActivation<B>,
    project: Conv2d<B>,
    project_norm: BatchNorm<B>,
}

impl<B: Backend> InvertedResidual<B> {
    fn new(
        in_channels: usize,
        out_channels: usize,
        stride: usize,
        expand_ratio: usize,
        device: &B::Device,
    ) -> Self {
        let hidden = in_channels * expand_ratio;
        let expand = (expand_ratio != 1)
            .then(|| ConvNormActivation::new([in_channels, hidden], 1, 1, 1, device));

        Self {
            expand,
            depthwise: ConvNormActivation::new([hidden, hidden], 3, stride, hidden, device),
            project: Conv2dConfig::new([hidden, out_channels], [1, 1])
                .with_bias(false)
                .init(device),
            project_norm: BatchNormConfig::new(out_channels).init(device),
        }
    }

    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = match &self.expand {
            Some(expand) => expand.forward(input.clone()),
            None => input.clone(),
        };
        let x = self.depthwise.forward(x);
        let x = self.project_norm.forward(self.project.forward(x));

        if x.dims() == input.dims() {
            x + input
        } else {
            x
        }
    }
}

/// MobileNetV2 特徴抽出器（分類層なし）
#[derive(Module, Debug)]
pub struct MobileNetV2<B: Backend> {
    stem: ConvNormActivation<B>,
    blocks: Vec<InvertedResidual<B>>,
    head_conv: ConvNormActivation<B>,
}

impl<B: Backend> MobileNetV2<B> {
    /// ランダムな重みで初期化
    pub fn new(device: &B::Device) -> Self {
        let stem = ConvNormActivation::new([3, STEM_CHANNELS], 3, 2, 1, device);

        let mut blocks = Vec::new();
        let mut in_channels = STEM_CHANNELS;
        for (expand_ratio, out_channels, repeats, first_stride) in INVERTED_RESIDUAL_SETTINGS {
            for i in 0..repeats {
                let stride = if i == 0 { first_stride } else { 1 };
                blocks.push(InvertedResidual::new(in_channels, out_channels, stride, expand_ratio, device));
                in_channels = out_channels;
            }
        }

        let head_conv = ConvNormActivation::new([in_channels, FEATURE_DIM], 1, 1, 1, device);

        Self { stem, blocks, head_conv }
    }

    /// torchvision の学習済み重み (.pth) から初期化
    pub fn load_pretrained(weights_path: &Path, device: &B::Device) -> Result<Self> {
        if !weights_path.is_file() {
            anyhow::bail!("学習済み重みファイルが見つかりません: {}", weights_path.display());
        }

        let record = PyTorchFileRecorder::<FullPrecisionSettings>::default()
            .load(torchvision_load_args(weights_path), device)
            .map_err(|e| anyhow::anyhow!("学習済み重みの読み込みエラー ({}): {:?}", weights_path.display(), e))?;

        Ok(Self::new(device).load_record(record))
    }

    /// 順伝播
    ///
    /// # 引数
    /// - `images`: バッチ画像 [batch_size, 3, size, size]（画素値は [0, 1]）
    ///
    /// # 戻り値
    /// - 特徴マップ [batch_size, 1280, size/32, size/32]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x = self.stem.forward(images);
        for block in &self.blocks {
            x = block.forward(x);
        }
        self.head_conv.forward(x)
    }
}

/// ブロック数（torchvision の features.1 ～ features.17 に対応）
fn num_blocks() -> usize {
    INVERTED_RESIDUAL_SETTINGS.iter().map(|(_, _, n, _)| n).sum()
}

/// torchvision のキー名 (features.N...) をこのモジュールのフィールド名へ変換する
///
/// - features.0          -> stem
/// - features.1..=17     -> blocks.0..=16
/// - features.18         -> head_conv
/// - classifier.*        -> 使用しない（読み込み時に無視される）
fn torchvision_load_args(weights_path: &Path) -> LoadArgs {
    let head_index = num_blocks() + 1;

    let mut args = LoadArgs::new(weights_path.to_path_buf())
        .with_key_remap(r"^features\.0\.0\.(.+)", "stem.conv.$1")
        .with_key_remap(r"^features\.0\.1\.(.+)", "stem.norm.$1")
        .with_key_remap(&format!(r"^features\.{head_index}\.0\.(.+)"), "head_conv.conv.$1")
        .with_key_remap(&format!(r"^features\.{head_index}\.1\.(.+)"), "head_conv.norm.$1");

    let mut block = 0;
    for (expand_ratio, _, repeats, _) in INVERTED_RESIDUAL_SETTINGS {
        for _ in 0..repeats {
            let feature = block + 1;
            let layers: &[(&str, &str)] = if expand_ratio == 1 {
                &[
                    ("0\\.0", "depthwise.conv"),
                    ("0\\.1", "depthwise.norm"),
                    ("1", "project"),
                    ("2", "project_norm"),
                ]
            } else {
                &[
                    ("0\\.0", "expand.conv"),
                    ("0\\.1", "expand.norm"),
                    ("1\\.0", "depthwise.conv"),
                    ("1\\.1", "depthwise.norm"),
                    ("2", "project"),
                    ("3", "project_norm"),
                ]
            };

            for (source, target) in layers {
                args = args.with_key_remap(
                    &format!(r"^features\.{feature}\.conv\.{source}\.(.+)"),
                    &format!("blocks.{block}.{target}.$1"),
                );
            }
            block += 1;
        }
    }

    args
}

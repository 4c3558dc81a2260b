//! データセット読み込みとモデル学習

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use burn::{
    data::dataloader::{batcher::Batcher, DataLoaderBuilder},
    module::Module,
    optim::AdamConfig,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::{
        backend::{AutodiffBackend, Backend},
        Int, Tensor,
    },
    train::{
        metric::{AccuracyMetric, LossMetric},
        ClassificationOutput, Interrupter, LearnerBuilder, LearningStrategy, TrainOutput, TrainStep, ValidStep,
    },
};
use burn_dataset::Dataset;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::error::DatasetError;
use crate::ml::backbone::MobileNetV2;
use crate::ml::history::{EpochMetrics, TrainingHistory};
use crate::ml::ml_model::{image_batch_tensor, load_and_normalize_image_with_size, ImageClassifier, ModelConfig};
use crate::ml::progress::EpochMetricsRenderer;
use crate::model::{save_model_with_metadata, ArtifactSettings, LabelVocabulary, ModelMetadata, TrainingSettings};

/// 学習に使う画像の拡張子
const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "gif"];

/// クラスディレクトリ（クラス名と画像パス一覧）
#[derive(Debug, Clone)]
pub struct ClassFolder {
    pub name: String,
    pub images: Vec<PathBuf>,
}

fn is_image_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

/// データセットのルートを走査してクラスディレクトリを列挙する
///
/// クラスはディレクトリ名の昇順で並び、この順序がクラスIDになる。
/// クラス数が2未満の場合はエラー。画像の無いクラスも警告のうえクラスとして残す。
pub fn scan_dataset(root: &Path) -> Result<Vec<ClassFolder>, DatasetError> {
    if !root.is_dir() {
        return Err(DatasetError::RootNotFound(root.to_path_buf()));
    }

    let mut class_dirs = Vec::new();
    for entry in std::fs::read_dir(root)? {
        let path = entry?.path();
        if path.is_dir() {
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| DatasetError::InvalidClassName(path.display().to_string()))?
                .to_string();
            class_dirs.push((name, path));
        }
    }
    class_dirs.sort();

    if class_dirs.len() < 2 {
        return Err(DatasetError::NotEnoughClasses { found: class_dirs.len() });
    }

    let mut classes = Vec::with_capacity(class_dirs.len());
    for (name, dir) in class_dirs {
        let mut images = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if is_image_file(&path) {
                images.push(path);
            }
        }
        images.sort();
        classes.push(ClassFolder { name, images });
    }

    tracing::info!("📊 クラス分布:");
    for class in &classes {
        tracing::info!("  {}: {} 枚", class.name, class.images.len());
    }

    for class in classes.iter().filter(|c| c.images.is_empty()) {
        tracing::warn!("クラス '{}' に画像がありません（クラスとしては残します）", class.name);
    }

    Ok(classes)
}

/// 学習データセット（画像パスとクラスIDのみ保持）
#[derive(Debug, Clone, Default)]
pub struct ImageFolderDataset {
    samples: Vec<ImageItem>,
}

impl ImageFolderDataset {
    /// クラスごとに学習用と検証用へ分割する
    ///
    /// 各クラスの画像をシード付きでシャッフルし、先頭 `floor(n * val_fraction)` 枚を検証用、
    /// 残りを学習用とする。同じシードなら常に同じ分割になる。
    pub fn split(classes: &[ClassFolder], val_fraction: f32, seed: u64) -> (Self, Self) {
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        let mut train = Vec::new();
        let mut valid = Vec::new();

        for (label, class) in classes.iter().enumerate() {
            let mut images = class.images.clone();
            images.shuffle(&mut rng);

            let val_len = validation_count(images.len(), val_fraction);
            for (i, path) in images.into_iter().enumerate() {
                let item = ImageItem { path, label };
                if i < val_len {
                    valid.push(item);
                } else {
                    train.push(item);
                }
            }
        }

        (Self { samples: train }, Self { samples: valid })
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// 検証用の枚数 `floor(n * val_fraction)`
///
/// f32 の誤差で 10 * 0.7 が 6 にならないよう、f64 で計算してから丸める。
fn validation_count(n: usize, val_fraction: f32) -> usize {
    let exact = n as f64 * f64::from(val_fraction);
    (exact + 1e-6).floor() as usize
}

/// データセットアイテム（画像パスのみ保持）
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageItem {
    pub path: PathBuf,
    pub label: usize,
}

impl Dataset<ImageItem> for ImageFolderDataset {
    fn get(&self, index: usize) -> Option<ImageItem> {
        self.samples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

/// バッチ作成中に発生した最初の画像読み込みエラー
///
/// バッチャーは失敗を返せないため、ここに記録して Learner を停止させ、学習後にエラーとして返す。
#[derive(Clone, Default)]
pub struct DecodeFailures {
    first: Arc<Mutex<Option<String>>>,
    interrupter: Interrupter,
}

impl std::fmt::Debug for DecodeFailures {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodeFailures")
            .field("first", &self.first)
            .field("stopped", &self.interrupter.should_stop())
            .finish()
    }
}

impl DecodeFailures {
    fn new(interrupter: Interrupter) -> Self {
        Self {
            first: Arc::default(),
            interrupter,
        }
    }

    fn record(&self, message: String) {
        let mut slot = self.first.lock().unwrap_or_else(PoisonError::into_inner);
        slot.get_or_insert(message);
        self.interrupter.stop();
    }

    fn check(&self) -> Result<()> {
        let failure = self.first.lock().unwrap_or_else(PoisonError::into_inner).clone();
        match failure {
            Some(message) => Err(anyhow::anyhow!(message)),
            None => Ok(()),
        }
    }
}

/// バッチャー
#[derive(Clone, Debug)]
pub struct ImageBatcher<B: Backend> {
    device: B::Device,
    image_size: usize,
    failures: DecodeFailures,
}

impl<B: Backend> ImageBatcher<B> {
    pub fn new(device: B::Device, image_size: usize, failures: DecodeFailures) -> Self {
        Self { device, image_size, failures }
    }
}

impl<B: Backend> Batcher<B, ImageItem, ImageBatch<B>> for ImageBatcher<B> {
    fn batch(&self, items: Vec<ImageItem>, _device: &B::Device) -> ImageBatch<B> {
        let batch_size = items.len();
        let image_size = self.image_size;
        let mut all_pixels = Vec::with_capacity(batch_size * 3 * image_size * image_size);
        let mut targets_vec = Vec::with_capacity(batch_size);

        for item in items {
            match load_and_normalize_image_with_size(&item.path, image_size) {
                Ok(image_data) => all_pixels.extend_from_slice(&image_data),
                Err(e) => {
                    self.failures
                        .record(format!("画像の読み込みに失敗しました {}: {}", item.path.display(), e));
                    // 形状を保つためゼロで埋める（学習はこのイテレーションで停止し、モデルは保存されない）
                    all_pixels.extend(std::iter::repeat(0.0f32).take(3 * image_size * image_size));
                }
            }
            targets_vec.push(item.label as i64);
        }

        let images = image_batch_tensor::<B>(&all_pixels, batch_size, image_size, &self.device);
        let targets = Tensor::<B, 1, Int>::from_ints(targets_vec.as_slice(), &self.device);

        ImageBatch { images, targets }
    }
}

/// バッチデータ
#[derive(Clone, Debug)]
pub struct ImageBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub targets: Tensor<B, 1, Int>,
}

/// TrainStep実装 (学習時の順伝播 + 逆伝播)
///
/// 特徴抽出器は凍結したまま、分類ヘッドにのみ勾配を流す。
impl<B: AutodiffBackend> TrainStep<ImageBatch<B>, ClassificationOutput<B>> for ImageClassifier<B> {
    fn step(&self, batch: ImageBatch<B>) -> TrainOutput<ClassificationOutput<B>> {
        let item = self.forward_classification_frozen(batch.images, batch.targets);
        let grads = item.loss.backward();
        TrainOutput::new(self, grads, item)
    }
}

/// ValidStep実装 (検証時の順伝播のみ)
impl<B: Backend> ValidStep<ImageBatch<B>, ClassificationOutput<B>> for ImageClassifier<B> {
    fn step(&self, batch: ImageBatch<B>) -> ClassificationOutput<B> {
        self.forward_classification(batch.images, batch.targets)
    }
}

/// 学習結果
#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub class_names: Vec<String>,
    pub history: TrainingHistory,
    pub model_path: PathBuf,
}

/// モデル学習を実行
///
/// 1. データセットを走査し（2クラス未満なら即エラー）、クラスごとに学習/検証へ分割
/// 2. クラス名一覧を保存
/// 3. 凍結した MobileNetV2 の上の分類ヘッドのみを Learner (Adam) で学習し、エポックごとに検証
/// 4. モデル・学習履歴CSV・精度グラフを保存
///
/// `on_epoch` はエポック終了ごとに呼ばれる。
pub fn train_model<B, F>(
    settings: &TrainingSettings,
    artifacts: &ArtifactSettings,
    device: B::Device,
    on_epoch: F,
) -> Result<TrainingReport>
where
    B: AutodiffBackend,
    F: FnMut(&EpochMetrics) + Send + 'static,
{
    settings.validate()?;

    let classes = scan_dataset(&settings.dataset_root)?;
    let vocabulary = LabelVocabulary::new(classes.iter().map(|c| c.name.clone()).collect())?;

    let (dataset_train, dataset_val) =
        ImageFolderDataset::split(&classes, settings.val_fraction, settings.split_seed);
    if dataset_train.is_empty() {
        anyhow::bail!("学習データが見つかりません: {}", settings.dataset_root.display());
    }
    tracing::info!("学習データ: {} 枚", dataset_train.len());
    tracing::info!("検証データ: {} 枚", dataset_val.len());
    if dataset_val.is_empty() {
        tracing::warn!("検証データがありません。検証精度は記録されません");
    }

    vocabulary.save(&artifacts.class_names_path)?;
    tracing::info!(
        "✅ {} クラスを検出しました: {:?} -> {}",
        vocabulary.len(),
        vocabulary.names(),
        artifacts.class_names_path.display()
    );

    let model_config = ModelConfig::new(vocabulary.len())
        .with_hidden_units(settings.hidden_units)
        .with_dropout(settings.dropout)
        .with_image_size(settings.image_size);

    let backbone = match &settings.backbone_weights {
        Some(path) => {
            tracing::info!("学習済み特徴抽出器を読み込みます: {}", path.display());
            MobileNetV2::load_pretrained(path, &device)?
        }
        None => {
            tracing::warn!("backbone_weights が未設定のため、特徴抽出器はランダム初期化されます");
            MobileNetV2::new(&device)
        }
    };
    let model = model_config
        .init_with_backbone::<B>(backbone, &device)
        .freeze_backbone();

    let interrupter = Interrupter::new();
    let failures = DecodeFailures::new(interrupter.clone());
    let batcher_train = ImageBatcher::<B>::new(device.clone(), settings.image_size, failures.clone());
    let batcher_val = ImageBatcher::<B::InnerBackend>::new(device.clone(), settings.image_size, failures.clone());

    let dataloader_train = DataLoaderBuilder::new(batcher_train)
        .batch_size(settings.batch_size)
        .shuffle(settings.split_seed)
        .num_workers(settings.num_workers)
        .build(dataset_train);

    let dataloader_val = DataLoaderBuilder::new(batcher_val)
        .batch_size(settings.batch_size)
        .num_workers(settings.num_workers)
        .build(dataset_val);

    // Learner のメトリクスログ置き場（学習後に削除）
    let artifact_dir = tempfile::Builder::new()
        .prefix("image_classifier_training")
        .tempdir()
        .context("学習用の作業ディレクトリを作成できません")?;

    let (renderer, epoch_metrics) = EpochMetricsRenderer::new(Box::new(on_epoch));

    tracing::info!(
        "学習を開始します (エポック数: {}, バッチサイズ: {}, 学習率: {})",
        settings.epochs,
        settings.batch_size,
        settings.learning_rate
    );

    let learner = LearnerBuilder::new(artifact_dir.path())
        .metric_train_numeric(AccuracyMetric::new())
        .metric_valid_numeric(AccuracyMetric::new())
        .metric_train_numeric(LossMetric::new())
        .metric_valid_numeric(LossMetric::new())
        .learning_strategy(LearningStrategy::SingleDevice(device.clone()))
        .num_epochs(settings.epochs)
        .with_interrupter(interrupter)
        // ログ出力は tracing で初期化済み
        .with_application_logger(None)
        .renderer(renderer)
        .build(model, AdamConfig::new().init(), settings.learning_rate);

    let trained = learner.fit(dataloader_train, dataloader_val);
    failures.check()?;
    let history = epoch_metrics.finish();

    // f32精度のまま保存
    let model_binary = BinBytesRecorder::<FullPrecisionSettings>::default()
        .record(trained.model.into_record(), ())
        .map_err(|e| anyhow::anyhow!("モデル重みのシリアライズエラー: {:?}", e))?;

    let metadata = ModelMetadata::new(
        vocabulary.names().to_vec(),
        settings.image_size,
        settings.hidden_units,
        settings.dropout,
        settings.epochs,
        history.last().and_then(|m| m.val_accuracy),
    );
    let model_path = save_model_with_metadata(&artifacts.model_path, &metadata, &model_binary)?;
    tracing::info!(
        "✅ モデルを保存しました: {} ({:.2} MB)",
        model_path.display(),
        model_binary.len() as f64 / 1024.0 / 1024.0
    );

    history
        .write_csv(&artifacts.history_path)
        .context("学習履歴の保存に失敗しました")?;
    history
        .render_accuracy_chart(&artifacts.chart_path)
        .context("精度グラフの保存に失敗しました")?;
    tracing::info!(
        "学習履歴: {} / 精度グラフ: {} (青=Train, オレンジ=Val)",
        artifacts.history_path.display(),
        artifacts.chart_path.display()
    );

    Ok(TrainingReport {
        class_names: vocabulary.names().to_vec(),
        history,
        model_path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::InferenceEngine;
    use burn_autodiff::Autodiff;
    use burn_ndarray::NdArray;
    use image::{Rgb, RgbImage};

    type TestBackend = Autodiff<NdArray>;

    fn write_image(path: &Path, color: [u8; 3]) {
        RgbImage::from_pixel(40, 40, Rgb(color)).save(path).unwrap();
    }

    /// クラスごとに `count` 枚の単色画像を持つデータセットを作成
    fn create_dataset(root: &Path, classes: &[(&str, [u8; 3])], count: usize) {
        for (name, color) in classes {
            let dir = root.join(name);
            std::fs::create_dir_all(&dir).unwrap();
            for i in 0..count {
                write_image(&dir.join(format!("{i:02}.png")), *color);
            }
        }
    }

    fn test_settings(root: &Path) -> (TrainingSettings, ArtifactSettings) {
        let settings = TrainingSettings {
            dataset_root: root.join("dataset"),
            image_size: 32,
            batch_size: 4,
            epochs: 2,
            num_workers: 0,
            ..TrainingSettings::default()
        };
        let artifacts = ArtifactSettings {
            model_path: root.join("out/model.tar.gz"),
            class_names_path: root.join("out/class_names.txt"),
            history_path: root.join("out/history.csv"),
            chart_path: root.join("out/accuracy.png"),
        };
        (settings, artifacts)
    }

    #[test]
    fn test_scan_dataset_sorts_classes_and_filters_files() {
        let dir = tempfile::tempdir().unwrap();
        create_dataset(dir.path(), &[("siamese", [200, 200, 200]), ("bengal", [150, 100, 50])], 2);
        std::fs::write(dir.path().join("bengal/notes.txt"), "not an image").unwrap();
        std::fs::write(dir.path().join("README.md"), "top-level file").unwrap();

        let classes = scan_dataset(dir.path()).unwrap();

        let names: Vec<&str> = classes.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["bengal", "siamese"]);
        assert_eq!(classes[0].images.len(), 2);
    }

    #[test]
    fn test_single_class_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        create_dataset(dir.path(), &[("only", [0, 0, 0])], 3);

        let err = scan_dataset(dir.path()).unwrap_err();
        assert!(matches!(err, DatasetError::NotEnoughClasses { found: 1 }));
    }

    #[test]
    fn test_missing_root_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            scan_dataset(&dir.path().join("missing")).unwrap_err(),
            DatasetError::RootNotFound(_)
        ));
    }

    #[test]
    fn test_empty_class_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        create_dataset(dir.path(), &[("a", [0, 0, 0]), ("c", [9, 9, 9])], 2);
        std::fs::create_dir_all(dir.path().join("b")).unwrap();

        let classes = scan_dataset(dir.path()).unwrap();

        let names: Vec<&str> = classes.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["a", "b", "c"]);
        assert!(classes[1].images.is_empty());
    }

    #[test]
    fn test_split_is_deterministic_and_stratified() {
        let classes = vec![
            ClassFolder { name: "a".into(), images: (0..10).map(|i| PathBuf::from(format!("a/{i}.png"))).collect() },
            ClassFolder { name: "b".into(), images: (0..5).map(|i| PathBuf::from(format!("b/{i}.png"))).collect() },
        ];

        let (train, valid) = ImageFolderDataset::split(&classes, 0.2, 123);
        let (train_again, valid_again) = ImageFolderDataset::split(&classes, 0.2, 123);

        assert_eq!(train.samples, train_again.samples);
        assert_eq!(valid.samples, valid_again.samples);
        assert_eq!(valid.samples.iter().filter(|s| s.label == 0).count(), 2);
        assert_eq!(valid.samples.iter().filter(|s| s.label == 1).count(), 1);
        assert_eq!(train.len() + valid.len(), 15);
    }

    #[test]
    fn test_split_floor_is_not_skewed_by_f32() {
        let classes = vec![ClassFolder {
            name: "a".into(),
            images: (0..10).map(|i| PathBuf::from(format!("a/{i}.png"))).collect(),
        }];

        let (train, valid) = ImageFolderDataset::split(&classes, 0.7, 1);
        assert_eq!(valid.len(), 7);
        assert_eq!(train.len(), 3);

        assert_eq!(validation_count(10, 0.3), 3);
        assert_eq!(validation_count(7, 0.5), 3);
        assert_eq!(validation_count(4, 0.2), 0);
    }

    #[test]
    fn test_batcher_shapes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.png");
        write_image(&path, [10, 20, 30]);

        let device = Default::default();
        let batcher = ImageBatcher::<NdArray>::new(device, 16, DecodeFailures::default());
        let items = vec![ImageItem { path: path.clone(), label: 1 }, ImageItem { path, label: 0 }];
        let batch = batcher.batch(items, &device);

        assert_eq!(batch.images.dims(), [2, 3, 16, 16]);
        assert_eq!(batch.targets.into_data().to_vec::<i64>().unwrap(), vec![1, 0]);
    }

    #[test]
    fn test_batcher_records_decode_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"definitely not a png").unwrap();

        let interrupter = Interrupter::new();
        let failures = DecodeFailures::new(interrupter.clone());
        let device = Default::default();
        let batcher = ImageBatcher::<NdArray>::new(device, 8, failures.clone());
        let batch = batcher.batch(vec![ImageItem { path, label: 0 }], &device);

        assert_eq!(batch.images.dims(), [1, 3, 8, 8]);
        assert!(failures.check().is_err());
        // 学習は次のイテレーションで停止する
        assert!(interrupter.should_stop());
    }

    #[test]
    fn test_one_class_fails_before_writing_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let (settings, artifacts) = test_settings(dir.path());
        create_dataset(&settings.dataset_root, &[("only", [0, 0, 0])], 3);

        let err = train_model::<TestBackend, _>(&settings, &artifacts, Default::default(), |_| {}).unwrap_err();

        assert!(matches!(
            err.downcast_ref::<DatasetError>(),
            Some(DatasetError::NotEnoughClasses { found: 1 })
        ));
        assert!(!artifacts.class_names_path.exists());
        assert!(!artifacts.model_path.exists());
    }

    #[test]
    fn test_train_model_writes_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let (settings, artifacts) = test_settings(dir.path());
        create_dataset(
            &settings.dataset_root,
            &[("ragdoll", [240, 240, 240]), ("bengal", [160, 90, 30]), ("siamese", [90, 70, 60])],
            5,
        );

        let epochs_seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::clone(&epochs_seen);
        let report = train_model::<TestBackend, _>(&settings, &artifacts, Default::default(), move |m| {
            recorder.lock().unwrap().push(m.epoch)
        })
        .unwrap();

        assert_eq!(*epochs_seen.lock().unwrap(), vec![1, 2]);
        assert_eq!(report.class_names, ["bengal", "ragdoll", "siamese"]);
        assert_eq!(report.history.epochs().len(), 2);
        for m in report.history.epochs() {
            assert!((0.0..=1.0).contains(&m.train_accuracy));
            assert!(m.train_loss.is_finite());
            assert!(m.val_accuracy.is_some_and(|acc| (0.0..=1.0).contains(&acc)));
            assert!(m.val_loss.is_some());
        }

        let vocabulary = LabelVocabulary::load(&artifacts.class_names_path).unwrap();
        assert_eq!(vocabulary.names(), report.class_names.as_slice());
        assert!(artifacts.history_path.exists());
        assert!(artifacts.chart_path.exists());

        // 保存したモデルで推論できる
        let engine = InferenceEngine::<NdArray>::load(&report.model_path, &artifacts.class_names_path, Default::default())
            .unwrap();
        let image_path = settings.dataset_root.join("bengal/00.png");
        let prediction = engine.classify_image(&image_path).unwrap();
        assert!(report.class_names.contains(&prediction.predicted_class));
        assert!((0.0..=1.0).contains(&prediction.confidence));
    }

    #[test]
    fn test_train_model_keeps_empty_class_in_vocabulary() {
        let dir = tempfile::tempdir().unwrap();
        let (mut settings, artifacts) = test_settings(dir.path());
        settings.epochs = 1;
        create_dataset(&settings.dataset_root, &[("bengal", [160, 90, 30]), ("siamese", [90, 70, 60])], 4);
        std::fs::create_dir_all(settings.dataset_root.join("persian")).unwrap();

        let report = train_model::<TestBackend, _>(&settings, &artifacts, Default::default(), |_| {}).unwrap();

        assert_eq!(report.class_names, ["bengal", "persian", "siamese"]);
        let vocabulary = LabelVocabulary::load(&artifacts.class_names_path).unwrap();
        assert_eq!(vocabulary.names(), report.class_names.as_slice());

        let engine = InferenceEngine::<NdArray>::load(&report.model_path, &artifacts.class_names_path, Default::default())
            .unwrap();
        assert_eq!(engine.vocabulary().len(), 3);
    }

    #[test]
    fn test_undecodable_image_aborts_training() {
        let dir = tempfile::tempdir().unwrap();
        let (settings, artifacts) = test_settings(dir.path());
        create_dataset(&settings.dataset_root, &[("bengal", [160, 90, 30]), ("siamese", [90, 70, 60])], 4);
        std::fs::write(settings.dataset_root.join("siamese/broken.png"), b"not an image").unwrap();

        let err = train_model::<TestBackend, _>(&settings, &artifacts, Default::default(), |_| {}).unwrap_err();

        assert!(err.to_string().contains("broken.png"));
        assert!(!artifacts.model_path.exists());
    }
}

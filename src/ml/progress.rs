//! 学習中のメトリクス収集
//!
//! burn の Learner が出力する Accuracy / Loss を受け取り、エポックごとの
//! [`EpochMetrics`] にまとめる。集計値は学習終了後に [`EpochMetricsHandle`] から取り出す。

use std::sync::{Arc, Mutex, PoisonError};

use burn::train::{
    metric::NumericEntry,
    renderer::{
        EvaluationName, EvaluationProgress, MetricState, MetricsRenderer, MetricsRendererEvaluation,
        MetricsRendererTraining, TrainingProgress,
    },
    LearnerSummary,
};

use crate::ml::history::{EpochMetrics, TrainingHistory};

const ACCURACY: &str = "Accuracy";
const LOSS: &str = "Loss";

/// エポック完了時のコールバック
pub type EpochCallback = Box<dyn FnMut(&EpochMetrics) + Send>;

/// 学習または検証のどちらか一方の集計値
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct SplitMetrics {
    loss: Option<f64>,
    /// [0, 1]
    accuracy: Option<f64>,
}

impl SplitMetrics {
    fn update(&mut self, state: MetricState) {
        // Accuracy と Loss は数値メトリクスとして登録される
        let MetricState::Numeric(entry, value) = state else {
            return;
        };
        let mean = epoch_mean(&value);
        match entry.name.as_str() {
            ACCURACY => self.accuracy = Some(mean / 100.0),
            LOSS => self.loss = Some(mean),
            _ => {}
        }
    }
}

/// エポック開始からの平均（件数で重み付け）
fn epoch_mean(value: &NumericEntry) -> f64 {
    match value {
        NumericEntry::Aggregated { sum, count, .. } if *count > 0 => sum / *count as f64,
        other => other.current(),
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingEpoch {
    epoch: usize,
    epoch_total: usize,
    train: SplitMetrics,
    valid: SplitMetrics,
}

struct Collector {
    current_train: SplitMetrics,
    current_valid: SplitMetrics,
    pending: Option<PendingEpoch>,
    history: TrainingHistory,
    on_epoch: EpochCallback,
}

impl Collector {
    fn render_train(&mut self, epoch: usize, epoch_total: usize) {
        if self.pending.is_some_and(|p| p.epoch != epoch) {
            self.finish_epoch();
        }
        let train = self.current_train;
        self.pending
            .get_or_insert(PendingEpoch {
                epoch,
                epoch_total,
                train,
                valid: SplitMetrics::default(),
            })
            .train = train;
    }

    fn render_valid(&mut self, epoch: usize) {
        let valid = self.current_valid;
        if let Some(pending) = self.pending.as_mut().filter(|p| p.epoch == epoch) {
            pending.valid = valid;
        }
    }

    /// 集計中のエポックを確定する（未集計なら何もしない）
    fn finish_epoch(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };

        let metrics = EpochMetrics {
            epoch: pending.epoch,
            train_loss: pending.train.loss.unwrap_or(f64::NAN),
            train_accuracy: pending.train.accuracy.unwrap_or(0.0),
            val_loss: pending.valid.loss,
            val_accuracy: pending.valid.accuracy,
        };
        tracing::info!(
            epoch = metrics.epoch,
            train_loss = metrics.train_loss,
            train_accuracy = metrics.train_accuracy,
            val_loss = ?metrics.val_loss,
            val_accuracy = ?metrics.val_accuracy,
            "エポック {}/{} 完了",
            pending.epoch,
            pending.epoch_total
        );
        (self.on_epoch)(&metrics);
        self.history.push(metrics);
    }
}

/// 集計結果の取り出し口
#[derive(Clone)]
pub struct EpochMetricsHandle(Arc<Mutex<Collector>>);

impl EpochMetricsHandle {
    /// 最後のエポックを確定して履歴を返す
    pub fn finish(&self) -> TrainingHistory {
        let mut collector = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        collector.finish_epoch();
        collector.history.clone()
    }
}

/// Learner 用のレンダラー
///
/// 画面には何も描かず、エポックごとの平均値を集計してログに出す。
pub struct EpochMetricsRenderer {
    collector: Arc<Mutex<Collector>>,
}

impl EpochMetricsRenderer {
    pub fn new(on_epoch: EpochCallback) -> (Self, EpochMetricsHandle) {
        let collector = Arc::new(Mutex::new(Collector {
            current_train: SplitMetrics::default(),
            current_valid: SplitMetrics::default(),
            pending: None,
            history: TrainingHistory::default(),
            on_epoch,
        }));
        let handle = EpochMetricsHandle(Arc::clone(&collector));
        (Self { collector }, handle)
    }

    fn with_collector<R>(&self, f: impl FnOnce(&mut Collector) -> R) -> R {
        let mut collector = self.collector.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut collector)
    }
}

impl MetricsRendererTraining for EpochMetricsRenderer {
    fn update_train(&mut self, state: MetricState) {
        self.with_collector(|c| c.current_train.update(state));
    }

    fn update_valid(&mut self, state: MetricState) {
        self.with_collector(|c| c.current_valid.update(state));
    }

    fn render_train(&mut self, item: TrainingProgress) {
        self.with_collector(|c| c.render_train(item.epoch, item.epoch_total));
    }

    fn render_valid(&mut self, item: TrainingProgress) {
        self.with_collector(|c| c.render_valid(item.epoch));
    }

    fn on_train_end(&mut self, _summary: Option<LearnerSummary>) -> Result<(), Box<dyn std::error::Error>> {
        self.with_collector(Collector::finish_epoch);
        Ok(())
    }
}

impl MetricsRendererEvaluation for EpochMetricsRenderer {
    fn update_test(&mut self, _name: EvaluationName, _state: MetricState) {}

    fn render_test(&mut self, _item: EvaluationProgress) {}
}

impl MetricsRenderer for EpochMetricsRenderer {
    fn manual_close(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::data::dataloader::Progress;
    use burn::train::metric::MetricEntry;

    fn numeric(name: &str, sum: f64, count: usize) -> MetricState {
        let entry = MetricEntry::new(Arc::new(name.to_string()), String::new(), String::new());
        MetricState::Numeric(entry, NumericEntry::Aggregated { sum, count, current: 0.0 })
    }

    fn progress(epoch: usize) -> TrainingProgress {
        TrainingProgress {
            progress: Progress {
                items_processed: 0,
                items_total: 0,
            },
            epoch,
            epoch_total: 2,
            iteration: 0,
        }
    }

    #[test]
    fn test_epoch_means_from_learner_metrics() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_in_callback = Arc::clone(&seen);
        let (mut renderer, handle) =
            EpochMetricsRenderer::new(Box::new(move |m: &EpochMetrics| seen_in_callback.lock().unwrap().push(m.epoch)));

        // エポック1: 学習 2 バッチ、検証 1 バッチ（sum は件数で重み付けされた累計）
        renderer.update_train(numeric(ACCURACY, 50.0 * 4.0, 4));
        renderer.update_train(numeric(LOSS, 1.2 * 4.0, 4));
        renderer.render_train(progress(1));
        renderer.update_train(numeric(ACCURACY, 50.0 * 4.0 + 100.0 * 2.0, 6));
        renderer.update_train(numeric(LOSS, 1.2 * 4.0 + 0.6 * 2.0, 6));
        renderer.render_train(progress(1));
        renderer.update_valid(numeric(ACCURACY, 75.0 * 4.0, 4));
        renderer.update_valid(numeric(LOSS, 0.8 * 4.0, 4));
        renderer.render_valid(progress(1));

        // エポック2 の最初のバッチでエポック1が確定する
        renderer.update_train(numeric(ACCURACY, 100.0 * 6.0, 6));
        renderer.update_train(numeric(LOSS, 0.3 * 6.0, 6));
        renderer.render_train(progress(2));
        assert_eq!(*seen.lock().unwrap(), vec![1]);

        renderer.on_train_end(None).unwrap();
        let history = handle.finish();

        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
        let epochs = history.epochs();
        assert_eq!(epochs.len(), 2);
        assert!((epochs[0].train_accuracy - 400.0 / 600.0).abs() < 1e-9);
        assert!((epochs[0].train_loss - 1.0).abs() < 1e-9);
        assert_eq!(epochs[0].val_accuracy, Some(0.75));
        assert!((epochs[0].val_loss.unwrap() - 0.8).abs() < 1e-9);
        assert!((epochs[1].train_accuracy - 1.0).abs() < 1e-9);
        // エポック2は検証バッチが無い
        assert_eq!(epochs[1].val_accuracy, None);
        assert_eq!(epochs[1].val_loss, None);
    }

    #[test]
    fn test_finish_is_idempotent() {
        let (mut renderer, handle) = EpochMetricsRenderer::new(Box::new(|_: &EpochMetrics| {}));
        renderer.update_train(numeric(ACCURACY, 100.0, 1));
        renderer.render_train(progress(1));

        assert_eq!(handle.finish().epochs().len(), 1);
        assert_eq!(handle.finish().epochs().len(), 1);
    }

    #[test]
    fn test_generic_metrics_are_ignored() {
        let mut split = SplitMetrics::default();
        let entry = MetricEntry::new(Arc::new(ACCURACY.to_string()), String::new(), String::new());
        split.update(MetricState::Generic(entry));
        assert_eq!(split, SplitMetrics::default());
    }
}

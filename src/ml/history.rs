//! 学習履歴の記録と可視化
//!
//! エポックごとの損失・精度をCSVに保存し、精度の推移をPNGグラフとして描画します。
//! グラフは学習精度を青、検証精度をオレンジで描き、縦軸は [0, 1] 固定。

use std::path::Path;

use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use serde::Serialize;

/// 1エポック分の学習結果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub train_loss: f64,
    pub train_accuracy: f64,
    /// 検証データが無い場合は None
    pub val_loss: Option<f64>,
    pub val_accuracy: Option<f64>,
}

/// エポックごとの学習結果の履歴
#[derive(Debug, Clone, Default)]
pub struct TrainingHistory {
    epochs: Vec<EpochMetrics>,
}

const CHART_WIDTH: u32 = 640;
const CHART_HEIGHT: u32 = 400;
const MARGIN: i64 = 40;

const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const AXIS: Rgb<u8> = Rgb([40, 40, 40]);
const GRID: Rgb<u8> = Rgb([225, 225, 225]);
const TRAIN_COLOR: Rgb<u8> = Rgb([31, 119, 180]);
const VAL_COLOR: Rgb<u8> = Rgb([255, 127, 14]);

impl TrainingHistory {
    pub fn push(&mut self, metrics: EpochMetrics) {
        self.epochs.push(metrics);
    }

    pub fn epochs(&self) -> &[EpochMetrics] {
        &self.epochs
    }

    pub fn last(&self) -> Option<&EpochMetrics> {
        self.epochs.last()
    }

    /// 履歴をCSVで保存
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        ensure_parent_dir(path)?;
        let mut writer = csv::Writer::from_path(path)
            .with_context(|| format!("Failed to create history file: {:?}", path))?;
        for metrics in &self.epochs {
            writer.serialize(metrics)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// 学習精度・検証精度の推移をPNGで保存
    pub fn render_accuracy_chart(&self, path: &Path) -> Result<()> {
        let mut img = RgbImage::from_pixel(CHART_WIDTH, CHART_HEIGHT, BACKGROUND);

        let left = MARGIN;
        let right = CHART_WIDTH as i64 - MARGIN;
        let top = MARGIN;
        let bottom = CHART_HEIGHT as i64 - MARGIN;

        // 0.25刻みの目盛り線
        for step in 0..=4 {
            let y = bottom - (bottom - top) * step / 4;
            draw_line(&mut img, (left, y), (right, y), GRID);
        }
        draw_line(&mut img, (left, top), (left, bottom), AXIS);
        draw_line(&mut img, (left, bottom), (right, bottom), AXIS);

        let count = self.epochs.len();
        let to_point = |index: usize, accuracy: f64| -> (i64, i64) {
            let x = if count <= 1 {
                (left + right) / 2
            } else {
                left + (right - left) * index as i64 / (count as i64 - 1)
            };
            let y = bottom - ((bottom - top) as f64 * accuracy.clamp(0.0, 1.0)).round() as i64;
            (x, y)
        };

        let train: Vec<(i64, i64)> = self
            .epochs
            .iter()
            .enumerate()
            .map(|(i, m)| to_point(i, m.train_accuracy))
            .collect();
        let val: Vec<(i64, i64)> = self
            .epochs
            .iter()
            .enumerate()
            .filter_map(|(i, m)| m.val_accuracy.map(|acc| to_point(i, acc)))
            .collect();

        draw_series(&mut img, &train, TRAIN_COLOR);
        draw_series(&mut img, &val, VAL_COLOR);

        // 凡例（右上）: 青=Train, オレンジ=Val
        fill_rect(&mut img, right - 60, 12, 16, 8, TRAIN_COLOR);
        fill_rect(&mut img, right - 30, 12, 16, 8, VAL_COLOR);

        ensure_parent_dir(path)?;
        img.save(path)
            .with_context(|| format!("Failed to save accuracy chart: {:?}", path))?;
        Ok(())
    }
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create parent directory: {:?}", parent))?;
    }
    Ok(())
}

fn draw_series(img: &mut RgbImage, points: &[(i64, i64)], color: Rgb<u8>) {
    for pair in points.windows(2) {
        draw_line(img, pair[0], pair[1], color);
        draw_line(img, (pair[0].0, pair[0].1 + 1), (pair[1].0, pair[1].1 + 1), color);
    }
    for &(x, y) in points {
        fill_rect(img, x - 2, y - 2, 5, 5, color);
    }
}

fn put_pixel(img: &mut RgbImage, x: i64, y: i64, color: Rgb<u8>) {
    if x >= 0 && y >= 0 && x < img.width() as i64 && y < img.height() as i64 {
        img.put_pixel(x as u32, y as u32, color);
    }
}

fn fill_rect(img: &mut RgbImage, x: i64, y: i64, width: i64, height: i64, color: Rgb<u8>) {
    for dy in 0..height {
        for dx in 0..width {
            put_pixel(img, x + dx, y + dy, color);
        }
    }
}

/// Bresenham の直線描画
fn draw_line(img: &mut RgbImage, from: (i64, i64), to: (i64, i64), color: Rgb<u8>) {
    let (mut x, mut y) = from;
    let dx = (to.0 - x).abs();
    let dy = -(to.1 - y).abs();
    let sx = if x < to.0 { 1 } else { -1 };
    let sy = if y < to.1 { 1 } else { -1 };
    let mut err = dx + dy;

    loop {
        put_pixel(img, x, y, color);
        if x == to.0 && y == to.1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}

//! モデルとメタデータの永続化
//!
//! Tar.gz形式でモデルとメタデータを1ファイルに統合して保存・読み込みします。
//!
//! ファイル構成（tar.gz内部）:
//! - metadata.json   - メタデータ（クラス名、入力サイズ、ヘッド構成など）
//! - model.bin       - モデルの重み（バイナリ）

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tar::{Archive, Builder};

use crate::model::model_metadata::ModelMetadata;

const METADATA_ENTRY: &str = "metadata.json";
const MODEL_ENTRY: &str = "model.bin";

/// 保存先パスを正規化（.gz で終わっていなければ .tar.gz を付与）
pub fn archive_path(output_path: &Path) -> PathBuf {
    if output_path.extension().and_then(|s| s.to_str()) == Some("gz") {
        output_path.to_path_buf()
    } else {
        output_path.with_extension("tar.gz")
    }
}

/// メタデータと共にモデルをTar.gz形式で保存
///
/// 実際に書き込んだパスを返す。
pub fn save_model_with_metadata(
    output_path: &Path,
    metadata: &ModelMetadata,
    model_binary: &[u8],
) -> Result<PathBuf> {
    let tar_gz_path = archive_path(output_path);

    if let Some(parent) = tar_gz_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create parent directory: {:?}", parent))?;
    }

    let tar_gz_file = File::create(&tar_gz_path)
        .with_context(|| format!("Failed to create tar.gz file: {:?}", tar_gz_path))?;

    let encoder = GzEncoder::new(tar_gz_file, Compression::default());
    let mut tar_builder = Builder::new(encoder);

    let json_str = metadata.to_json_string()?;
    append_entry(&mut tar_builder, METADATA_ENTRY, json_str.as_bytes())?;
    append_entry(&mut tar_builder, MODEL_ENTRY, model_binary)?;

    // gzipストリームまで確実に書き切る
    let encoder = tar_builder
        .into_inner()
        .context("Failed to finalize tar.gz archive")?;
    encoder.finish().context("Failed to finish gzip stream")?;

    Ok(tar_gz_path)
}

fn append_entry<W: std::io::Write>(builder: &mut Builder<W>, name: &str, data: &[u8]) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_path(name)?;
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append(&header, data)
        .with_context(|| format!("Failed to add {} to tar", name))
}

/// メタデータとモデルバイナリを共に読み込む
///
/// パスは保存時と同じ規則で正規化するため、保存時に渡したパスをそのまま使える。
pub fn load_model_with_metadata(model_path: &Path) -> Result<(ModelMetadata, Vec<u8>)> {
    let tar_gz_path = archive_path(model_path);
    let tar_gz_file = File::open(&tar_gz_path)
        .with_context(|| format!("Failed to open tar.gz file: {:?}", tar_gz_path))?;

    let decoder = GzDecoder::new(tar_gz_file);
    let mut archive = Archive::new(decoder);

    let mut metadata = None;
    let mut binary = None;

    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.to_path_buf();

        match path.to_str() {
            Some(METADATA_ENTRY) => {
                let mut json_str = String::new();
                entry.read_to_string(&mut json_str)?;
                metadata = Some(ModelMetadata::from_json_string(&json_str)?);
            }
            Some(MODEL_ENTRY) => {
                let mut buffer = Vec::new();
                entry.read_to_end(&mut buffer)?;
                binary = Some(buffer);
            }
            _ => {}
        }

        if metadata.is_some() && binary.is_some() {
            break;
        }
    }

    match (metadata, binary) {
        (Some(metadata), Some(binary)) => Ok((metadata, binary)),
        (None, _) => Err(anyhow::anyhow!("{} not found in tar.gz archive", METADATA_ENTRY)),
        (_, None) => Err(anyhow::anyhow!("{} not found in tar.gz archive", MODEL_ENTRY)),
    }
}

/// メタデータをログに出力
pub fn log_metadata_info(metadata: &ModelMetadata) {
    tracing::info!(
        backbone = %metadata.backbone,
        classes = %metadata.class_names.join(", "),
        image_size = metadata.image_size,
        hidden_units = metadata.hidden_units,
        num_epochs = metadata.num_epochs,
        trained_at = %metadata.trained_at,
        "モデルメタデータ"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_archive_contains_metadata_and_weights() {
        let dir = tempfile::tempdir().unwrap();
        let metadata = ModelMetadata::new(vec!["bengal".into(), "siamese".into()], 224, 128, 0.3, 10, Some(0.75));
        let weights = vec![1u8, 2, 3, 4, 5];

        let written = save_model_with_metadata(&dir.path().join("models/classifier"), &metadata, &weights).unwrap();
        assert_eq!(written, dir.path().join("models/classifier.tar.gz"));

        let (loaded_metadata, loaded_weights) = load_model_with_metadata(&written).unwrap();
        assert_eq!(loaded_metadata, metadata);
        assert_eq!(loaded_metadata.num_classes(), 2);
        assert_eq!(loaded_weights, weights);
    }

    #[test]
    fn test_load_resolves_same_path_as_save() {
        let dir = tempfile::tempdir().unwrap();
        let metadata = ModelMetadata::new(vec!["a".into(), "b".into()], 64, 32, 0.2, 1, None);
        let configured = dir.path().join("models/cat.bin");

        let written = save_model_with_metadata(&configured, &metadata, &[7u8; 4]).unwrap();
        assert_eq!(written, dir.path().join("models/cat.tar.gz"));

        let (loaded, weights) = load_model_with_metadata(&configured).unwrap();
        assert_eq!(loaded, metadata);
        assert_eq!(weights, vec![7u8; 4]);
    }

    #[test]
    fn test_missing_model_entry_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.tar.gz");

        let file = File::create(&path).unwrap();
        let mut builder = Builder::new(GzEncoder::new(file, Compression::default()));
        let metadata = ModelMetadata::new(vec!["a".into(), "b".into()], 64, 32, 0.2, 1, None);
        append_entry(&mut builder, METADATA_ENTRY, metadata.to_json_string().unwrap().as_bytes()).unwrap();
        builder.into_inner().unwrap().finish().unwrap();

        let err = load_model_with_metadata(&path).unwrap_err();
        assert!(err.to_string().contains(MODEL_ENTRY));
    }
}

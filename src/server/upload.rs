//! アップロード画像の一時保存

use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

/// アップロード画像の一時ファイル（drop 時に削除）
pub struct UploadedImage {
    file: NamedTempFile,
}

impl UploadedImage {
    /// アップロード先ディレクトリに一意な名前で書き出す
    ///
    /// 元のファイル名は拡張子のみ使い、パスとしては使わない。
    pub fn persist(upload_dir: &Path, original_name: &str, bytes: &[u8]) -> std::io::Result<Self> {
        let suffix = sanitized_extension(original_name)
            .map(|ext| format!(".{ext}"))
            .unwrap_or_default();

        let mut file = tempfile::Builder::new()
            .prefix("upload-")
            .suffix(&suffix)
            .tempfile_in(upload_dir)?;
        file.write_all(bytes)?;
        file.flush()?;

        Ok(Self { file })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

fn sanitized_extension(original_name: &str) -> Option<String> {
    let ext = Path::new(original_name).extension()?.to_str()?.to_lowercase();
    (!ext.is_empty() && ext.len() <= 8 && ext.chars().all(|c| c.is_ascii_alphanumeric())).then_some(ext)
}

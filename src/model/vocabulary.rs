//! ラベル語彙（クラス名一覧）の永続化
//!
//! 1行1クラスのテキストファイル。行の順序がモデル出力のクラスインデックスに対応するため、
//! 学習時と推論時で同じファイルを使う必要がある。

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use crate::error::DatasetError;

/// クラスインデックス順のクラス名一覧
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelVocabulary {
    names: Vec<String>,
}

impl LabelVocabulary {
    /// クラス名一覧から作成（改行を含む名前は保存できないため拒否）
    pub fn new(names: Vec<String>) -> Result<Self, DatasetError> {
        if let Some(bad) = names
            .iter()
            .find(|name| name.is_empty() || name.contains(['\n', '\r']))
        {
            return Err(DatasetError::InvalidClassName(bad.clone()));
        }
        Ok(Self { names })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// クラスインデックスからクラス名を取得
    pub fn name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    /// ファイルに保存
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create parent directory: {:?}", parent))?;
        }

        let mut content = String::new();
        for name in &self.names {
            content.push_str(name);
            content.push('\n');
        }
        fs::write(path, content)
            .with_context(|| format!("Failed to write class names: {:?}", path))?;
        Ok(())
    }

    /// ファイルから読み込む（空行は無視）
    ///
    /// 除去するのは行末の改行のみで、クラス名の前後の空白はそのまま残す。
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read class names: {:?}", path))?;

        let names: Vec<String> = content
            .lines()
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();

        if names.is_empty() {
            anyhow::bail!("class names file is empty: {:?}", path);
        }

        Ok(Self::new(names)?)
    }
}

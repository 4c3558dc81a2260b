//! 推論HTTPサーバー
//!
//! 待ち受けを先に開始し、モデルはバックグラウンドで読み込む。
//! 読み込み完了までの `/predict` は 503 を返す。

pub mod handlers;
pub mod upload;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use anyhow::{Context, Result};
use burn::tensor::backend::Backend;
use tower_http::trace::TraceLayer;

use crate::ml::InferenceEngine;
use crate::model::ServerSettings;

pub use handlers::create_router;

/// ハンドラ間で共有する状態
///
/// 推論エンジンは読み込み完了後に一度だけ設定され、推論は Mutex で直列化される。
pub struct AppState<B: Backend> {
    engine: OnceLock<Arc<Mutex<InferenceEngine<B>>>>,
    upload_dir: PathBuf,
    max_upload_bytes: usize,
}

impl<B: Backend> AppState<B> {
    /// モデル未読み込みの状態を作成
    pub fn new(settings: &ServerSettings) -> Self {
        Self {
            engine: OnceLock::new(),
            upload_dir: settings.upload_dir.clone(),
            max_upload_bytes: settings.max_upload_bytes,
        }
    }

    /// 読み込み済みのエンジンを持つ状態を作成
    pub fn with_engine(settings: &ServerSettings, engine: InferenceEngine<B>) -> Result<Self> {
        let state = Self::new(settings);
        state.install(engine)?;
        Ok(state)
    }

    /// 読み込んだエンジンを登録する（2回目以降はエラー）
    pub fn install(&self, engine: InferenceEngine<B>) -> Result<()> {
        self.engine
            .set(Arc::new(Mutex::new(engine)))
            .map_err(|_| anyhow::anyhow!("推論エンジンは既に読み込まれています"))
    }

    pub fn engine(&self) -> Option<Arc<Mutex<InferenceEngine<B>>>> {
        self.engine.get().cloned()
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_bytes
    }
}

/// サーバーを起動
///
/// 待ち受けを開始してからモデルを読み込む。モデルの読み込みに失敗した場合はサーバーごと終了する。
pub async fn serve<B: Backend>(
    settings: &ServerSettings,
    model_path: PathBuf,
    class_names_path: PathBuf,
    device: B::Device,
) -> Result<()> {
    std::fs::create_dir_all(&settings.upload_dir)
        .with_context(|| format!("Failed to create upload directory: {:?}", settings.upload_dir))?;

    let state = Arc::new(AppState::<B>::new(settings));
    let app = create_router(Arc::clone(&state)).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&settings.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", settings.bind_address))?;
    tracing::info!("🚀 推論サーバーを起動しました: http://{}", listener.local_addr()?);

    let loader = {
        let state = Arc::clone(&state);
        async move {
            tracing::info!("モデルを読み込み中: {}", model_path.display());
            let engine = tokio::task::spawn_blocking(move || {
                InferenceEngine::<B>::load(&model_path, &class_names_path, device)
            })
            .await
            .context("モデル読み込みタスクが異常終了しました")??;
            state.install(engine)?;
            tracing::info!("✅ 推論の受け付けを開始します");
            Ok::<(), anyhow::Error>(())
        }
    };

    let server = async move {
        axum::serve(listener, app).await.context("HTTP server error")
    };

    tokio::try_join!(server, loader)?;
    Ok(())
}

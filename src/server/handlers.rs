//! HTTPリクエストハンドラ

use std::sync::{Arc, PoisonError};

use axum::{
    body::Bytes,
    extract::{
        multipart::{MultipartError, MultipartRejection},
        DefaultBodyLimit, Multipart, State,
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use burn::tensor::backend::Backend;

use super::upload::UploadedImage;
use super::AppState;
use crate::types::Prediction;

/// `GET /` の応答
pub const LIVENESS_MESSAGE: &str =
    "Image classifier is running. POST an image as multipart field 'file' to /predict.";

/// ルーターを作成（アップロードサイズの上限付き）
pub fn create_router<B: Backend>(state: Arc<AppState<B>>) -> Router {
    let body_limit = state.max_upload_bytes();

    Router::new()
        .route("/", get(home))
        .route("/predict", post(predict::<B>))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// `GET /` 死活確認
async fn home() -> &'static str {
    LIVENESS_MESSAGE
}

/// `POST /predict` アップロード画像を分類
async fn predict<B: Backend>(
    State(state): State<Arc<AppState<B>>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<Prediction>, ApiError> {
    let multipart = multipart.map_err(|rejection| {
        tracing::debug!(error = %rejection, "multipart以外のリクエスト");
        ApiError::NoFile
    })?;
    let (file_name, bytes) = read_file_field(multipart).await?;

    let engine = state.engine().ok_or(ApiError::ModelNotReady)?;
    let upload_dir = state.upload_dir().to_path_buf();

    let prediction = tokio::task::spawn_blocking(move || -> anyhow::Result<Prediction> {
        // 一時ファイルはこのスコープを抜けると削除される
        let upload = UploadedImage::persist(&upload_dir, &file_name, &bytes)?;
        // 推論エンジンは読み取り専用なので、他のリクエストのパニック後もそのまま使える
        let engine = engine.lock().unwrap_or_else(PoisonError::into_inner);
        let prediction = engine.classify_image(upload.path())?;
        Ok(prediction)
    })
    .await
    .map_err(|e| ApiError::Processing(e.to_string()))?
    .map_err(|e| ApiError::Processing(format!("{:#}", e)))?;

    tracing::info!(
        predicted_class = %prediction.predicted_class,
        confidence = prediction.confidence,
        "予測完了"
    );

    Ok(Json(prediction))
}

/// multipart から `file` フィールドを取り出す
async fn read_file_field(mut multipart: Multipart) -> Result<(String, Bytes), ApiError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }

        let file_name = match field.file_name() {
            None => return Err(ApiError::NoFile),
            Some("") => return Err(ApiError::EmptyFilename),
            Some(name) => name.to_string(),
        };
        let bytes = field.bytes().await?;
        return Ok((file_name, bytes));
    }

    Err(ApiError::NoFile)
}

/// APIエラー（本文は `{"error": メッセージ}` のJSON）
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("No file uploaded")]
    NoFile,

    #[error("Empty filename")]
    EmptyFilename,

    #[error("{}", .0.body_text())]
    Multipart(#[from] MultipartError),

    #[error("Model is still loading")]
    ModelNotReady,

    #[error("{0}")]
    Processing(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::NoFile | Self::EmptyFilename => StatusCode::BAD_REQUEST,
            Self::Multipart(err) => err.status(),
            Self::ModelNotReady => StatusCode::SERVICE_UNAVAILABLE,
            Self::Processing(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "リクエストの処理に失敗しました");
        } else {
            tracing::warn!(error = %self, "リクエストを拒否しました");
        }

        let body = serde_json::json!({ "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::QueryRejection;
use axum::extract::{FromRequest, Query, Request, State};
use axum::http::header::CONTENT_TYPE;
use axum_typed_multipart::TypedMultipart;
use log::info;

use super::error::{AppError, IndexBusy, Result};
use super::state::AppState;
use super::types::*;
use crate::{InputError, QueryImage};

/// 索引语料目录中的全部图片，已存在的图片会被跳过
#[utoipa::path(
    post,
    path = "/api/embed",
    responses(
        (status = 200, body = EmbedResponse),
        (status = 409, body = ErrorResponse, description = "已有索引任务正在运行"),
        (status = 500, body = ErrorResponse),
    )
)]
pub async fn embed_handler(State(state): State<Arc<AppState>>) -> Result<Json<EmbedResponse>> {
    let _guard = state.index_lock.try_lock().map_err(|_| IndexBusy)?;
    info!("收到索引请求: {}", state.corpus.display());
    let summary = state.indexer.run_index(&state.corpus, state.batch_size).await?;
    Ok(Json(summary.into()))
}

/// 搜索相似图片
///
/// 请求体可以是包含 `image` 字段的 multipart 表单，
/// 也可以是 `{"image_base64": "..."}` 形式的 JSON
#[utoipa::path(
    post,
    path = "/api/search",
    params(SearchQuery),
    request_body(content = SearchUploadForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, body = SearchResponse),
        (status = 400, body = ErrorResponse, description = "未提供图片或图片无效"),
        (status = 500, body = ErrorResponse),
    )
)]
pub async fn search_handler(
    State(state): State<Arc<AppState>>,
    query: Result<Query<SearchQuery>, QueryRejection>,
    SearchInput(image): SearchInput,
) -> Result<Json<SearchResponse>> {
    let Query(query) = query.map_err(|e| InputError::BadRequest(e.body_text()))?;
    let limit = query.limit().unwrap_or(state.top_k);
    let results = state.retriever.run_search(image, limit).await?;
    Ok(Json(SearchResponse { results }))
}

/// 从请求体中提取查询图片，multipart 与 JSON 二选一
pub struct SearchInput(pub QueryImage);

impl<S> FromRequest<S> for SearchInput
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self> {
        let content_type = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        if content_type.starts_with("multipart/form-data") {
            let TypedMultipart(form) = TypedMultipart::<SearchForm>::from_request(req, state)
                .await
                .map_err(|e| InputError::BadRequest(e.to_string()))?;
            let field = form.image.ok_or(InputError::NoImage)?;
            Ok(Self(QueryImage::Upload {
                file_name: field.metadata.file_name,
                data: field.contents.to_vec(),
            }))
        } else if content_type.starts_with("application/json") {
            let Json(body) = Json::<SearchJson>::from_request(req, state)
                .await
                .map_err(|e| InputError::BadRequest(e.body_text()))?;
            let encoded = body.image_base64.filter(|s| !s.is_empty()).ok_or(InputError::NoImage)?;
            Ok(Self(QueryImage::Base64(encoded)))
        } else {
            Err(InputError::NoImage.into())
        }
    }
}

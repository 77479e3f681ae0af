use axum::body::Bytes;
use axum_typed_multipart::{FieldData, TryFromMultipart};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::{IndexSummary, SearchHit};

/// 搜索的查询参数
#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SearchQuery {
    /// 返回的结果数量，小于等于 0 时返回空列表，无法解析时使用服务端默认值
    #[param(value_type = Option<i64>)]
    pub limit: Option<String>,
}

impl SearchQuery {
    /// 解析 limit，`None` 表示使用默认值
    pub fn limit(&self) -> Option<usize> {
        let limit = self.limit.as_deref()?.trim().parse::<i64>().ok()?;
        Some(limit.max(0) as usize)
    }
}

/// 上传图片的表单
#[derive(TryFromMultipart)]
pub struct SearchForm {
    #[form_data(limit = "10MiB")]
    pub image: Option<FieldData<Bytes>>,
}

/// 上传图片的表单（用于API文档）
#[derive(Debug, ToSchema)]
#[allow(unused)]
pub struct SearchUploadForm {
    /// 上传的图片文件
    #[schema(format = Binary, content_media_type = "application/octet-stream")]
    pub image: String,
}

/// 以 base64 提交图片
#[derive(Debug, Deserialize, ToSchema)]
pub struct SearchJson {
    /// base64 编码的图片，可以带有 `data:<mime>;base64,` 前缀
    pub image_base64: Option<String>,
}

/// 搜索响应
#[derive(Debug, Serialize, ToSchema)]
pub struct SearchResponse {
    /// 按相似度从高到低排列的结果
    pub results: Vec<SearchHit>,
}

/// 索引响应
#[derive(Debug, Serialize, ToSchema)]
pub struct EmbedResponse {
    pub success: bool,
    pub message: String,
    /// 新写入的图片数量
    pub processed: usize,
    /// 已存在而跳过的图片数量
    pub skipped: usize,
    /// 计算向量失败的图片数量
    pub failed: usize,
}

impl From<IndexSummary> for EmbedResponse {
    fn from(summary: IndexSummary) -> Self {
        Self {
            success: true,
            message: "Embedding and upload complete".to_string(),
            processed: summary.processed,
            skipped: summary.skipped,
            failed: summary.failures.len(),
        }
    }
}

/// 错误响应
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit() {
        let query = |limit: Option<&str>| SearchQuery { limit: limit.map(str::to_string) }.limit();
        assert_eq!(query(None), None);
        assert_eq!(query(Some("3")), Some(3));
        assert_eq!(query(Some(" 7 ")), Some(7));
        assert_eq!(query(Some("0")), Some(0));
        assert_eq!(query(Some("-2")), Some(0));
        assert_eq!(query(Some("abc")), None);
    }
}

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Result;
use futures::future::join_all;
use log::{debug, info, warn};
use serde::Serialize;
use tokio::task::block_in_place;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::context::Context;
use crate::embed::{Embedder, ImageInput};
use crate::metrics;
use crate::store::{ScoredPoint, VectorStore};
use crate::utils::{self, SuffixFilter};

/// 查询图片无效，属于调用者的错误
#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("未提供图片")]
    NoImage,
    #[error("文件名不能为空")]
    EmptyFileName,
    #[error("不支持的文件类型: {0}")]
    InvalidExtension(String),
    #[error("无效的 base64 图片")]
    InvalidBase64(#[from] base64::DecodeError),
    #[error("无法解析图片: {0}")]
    UndecodableImage(String),
    #[error("无效的请求: {0}")]
    BadRequest(String),
}

/// 查询图片，两种来源二选一
#[derive(Debug, Clone)]
pub enum QueryImage {
    /// 上传的图片文件
    Upload { file_name: Option<String>, data: Vec<u8> },
    /// base64 编码的图片，可以带有 data URI 前缀
    Base64(String),
}

impl QueryImage {
    fn source(&self) -> &'static str {
        match self {
            Self::Upload { .. } => "upload",
            Self::Base64(_) => "base64",
        }
    }
}

/// 单条搜索结果
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SearchHit {
    /// 相似度
    pub score: f32,
    /// 图片路径
    pub image_path: String,
    /// `data:<mime>;base64,<data>` 格式的原图，无法读取时为 null
    pub image_base64: Option<String>,
}

pub struct Retriever<E: ?Sized, S> {
    ctx: Context<E, S>,
    suffix: SuffixFilter,
    upload_dir: Option<PathBuf>,
    with_image: bool,
}

impl<E: Embedder + ?Sized, S: VectorStore> Retriever<E, S> {
    pub fn new(ctx: Context<E, S>) -> Self {
        Self { ctx, suffix: SuffixFilter::default(), upload_dir: None, with_image: true }
    }

    pub fn suffix(mut self, suffix: SuffixFilter) -> Self {
        self.suffix = suffix;
        self
    }

    /// 设置后，上传的图片会额外保存一份到该目录
    pub fn upload_dir(mut self, upload_dir: Option<PathBuf>) -> Self {
        self.upload_dir = upload_dir;
        self
    }

    /// 是否在结果中附带原图
    pub fn with_image(mut self, with_image: bool) -> Self {
        self.with_image = with_image;
        self
    }

    /// 校验查询图片，返回可以直接交给模型的输入
    pub async fn prepare(&self, query: QueryImage) -> Result<ImageInput> {
        match query {
            QueryImage::Upload { file_name, data } => {
                let file_name = file_name.filter(|name| !name.is_empty()).ok_or(InputError::EmptyFileName)?;
                if !self.suffix.is_match(&file_name) {
                    return Err(InputError::InvalidExtension(file_name).into());
                }
                if let Some(dir) = &self.upload_dir {
                    self.save_upload(dir, &file_name, &data).await?;
                }
                // 始终使用内存中的数据计算向量，保存的文件只作为记录
                Ok(ImageInput::Decoded(data))
            }
            QueryImage::Base64(encoded) => {
                let data = utils::decode_base64_image(&encoded).map_err(InputError::from)?;
                Ok(ImageInput::Decoded(data))
            }
        }
    }

    /// 保存上传的图片，文件名带有随机前缀，同名上传不会互相覆盖
    async fn save_upload(&self, dir: &Path, file_name: &str, data: &[u8]) -> Result<PathBuf> {
        let name = utils::upload_file_name(file_name, &Uuid::new_v4().simple().to_string());
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(name);
        tokio::fs::write(&path, data).await?;
        debug!("保存上传图片: {}", path.display());
        Ok(path)
    }

    /// 搜索与查询图片最相似的 `k` 张图片
    ///
    /// 结果顺序与数据库返回的顺序一致；某张图片的原图无法读取时，
    /// 该条结果的 `image_base64` 为 `None`，不影响其他结果
    pub async fn run_search(&self, query: QueryImage, k: usize) -> Result<Vec<SearchHit>> {
        let start = Instant::now();
        let source = query.source();
        let input = self.prepare(query).await?;
        if k == 0 {
            return Ok(vec![]);
        }

        info!("正在搜索 {} 图片: {}", source, input);
        let vector = block_in_place(|| self.ctx.embedder.embed_checked(&input))
            .map_err(|e| InputError::UndecodableImage(format!("{:#}", e)))?;

        let points = self.ctx.store.search(&self.ctx.collection.name, &vector, k).await?;
        let hits = join_all(points.into_iter().map(|point| self.materialize(point))).await;

        let elapsed = start.elapsed().as_secs_f32();
        debug!("搜索耗时: {:.3}s，结果数量: {}", elapsed, hits.len());
        metrics::observe_search(source, elapsed, hits.first().map(|hit| hit.score));

        Ok(hits)
    }

    async fn materialize(&self, point: ScoredPoint) -> SearchHit {
        let image_path = point.payload.image_path;
        let image_base64 = if self.with_image { read_image(&image_path).await } else { None };
        SearchHit { score: point.score, image_path, image_base64 }
    }
}

/// 读取原图并编码为 data URI
async fn read_image(path: &str) -> Option<String> {
    match tokio::fs::read(path).await {
        Ok(data) => Some(utils::to_data_uri(utils::guess_mime(path), &data)),
        Err(e) => {
            warn!("读取图片失败: {}: {}", path, e);
            None
        }
    }
}

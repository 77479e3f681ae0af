use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};
use fastembed::{ImageEmbedding, ImageEmbeddingModel, ImageInitOptions};
use log::info;

use super::{Embedder, ImageInput};

/// CLIP ViT-B/32 的输出维数
pub const CLIP_DIM: usize = 512;

/// 基于 fastembed 的 CLIP ViT-B/32 图片编码器
///
/// 模型推理需要独占访问，多个请求会在内部锁上排队
pub struct ClipEmbedder {
    model: Mutex<ImageEmbedding>,
}

impl ClipEmbedder {
    /// 加载模型，首次运行时会下载模型文件到 `cache_dir`
    pub fn new(cache_dir: impl Into<PathBuf>) -> Result<Self> {
        let cache_dir = cache_dir.into();
        info!("加载 CLIP 模型，缓存目录: {}", cache_dir.display());

        let options = ImageInitOptions::new(ImageEmbeddingModel::ClipVitB32)
            .with_cache_dir(cache_dir)
            .with_show_download_progress(true);
        let model = ImageEmbedding::try_new(options).context("加载 CLIP 模型失败")?;

        Ok(Self { model: Mutex::new(model) })
    }
}

impl Embedder for ClipEmbedder {
    fn dim(&self) -> usize {
        CLIP_DIM
    }

    fn embed(&self, image: &ImageInput) -> Result<Vec<f32>> {
        let mut model = self.model.lock().map_err(|_| anyhow!("模型锁已损坏"))?;
        let mut embeddings = match image {
            ImageInput::ByPath(path) => model.embed(vec![path], None),
            ImageInput::Decoded(data) => model.embed_bytes(&[data.as_slice()], None),
        }
        .with_context(|| format!("计算图片向量失败: {}", image))?;
        embeddings.pop().ok_or_else(|| anyhow!("模型没有返回向量: {}", image))
    }
}

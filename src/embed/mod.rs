mod clip;

use std::fmt;
use std::path::PathBuf;

use anyhow::{Result, ensure};

pub use self::clip::{CLIP_DIM, ClipEmbedder};

/// 待计算向量的图片
#[derive(Debug, Clone)]
pub enum ImageInput {
    /// 磁盘上的图片文件
    ByPath(PathBuf),
    /// 已读入内存的图片文件内容（jpeg、png 等编码）
    Decoded(Vec<u8>),
}

impl fmt::Display for ImageInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ByPath(path) => write!(f, "{}", path.display()),
            Self::Decoded(data) => write!(f, "<{} 字节>", data.len()),
        }
    }
}

/// 图片向量模型
///
/// 输入图片会被转换为 RGB 三通道后再计算，输出固定维数的稠密向量。
/// 解码或推理失败时返回错误，由调用者决定是否跳过该图片。
pub trait Embedder: Send + Sync {
    /// 输出向量的维数
    fn dim(&self) -> usize;

    /// 计算一张图片的向量
    fn embed(&self, image: &ImageInput) -> Result<Vec<f32>>;

    /// 计算向量并检查维数，维数不符的向量不允许写入数据库
    fn embed_checked(&self, image: &ImageInput) -> Result<Vec<f32>> {
        let vector = self.embed(image)?;
        ensure!(
            vector.len() == self.dim(),
            "向量维数错误: 期望 {}，实际 {}",
            self.dim(),
            vector.len()
        );
        Ok(vector)
    }
}

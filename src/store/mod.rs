//! 向量数据库抽象
//!
//! 所有后端都只提供索引和检索所需的最小操作：集合的创建、按路径判重、
//! 批量写入以及最近邻搜索。集合一旦创建，其维数和相似度度量不可修改。

mod memory;
mod qdrant;
mod sqlite;

use std::future::Future;

use anyhow::Result;
use clap::ValueEnum;
use log::info;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use self::memory::MemoryStore;
pub use self::qdrant::QdrantStore;
pub use self::sqlite::SqliteStore;
use crate::config::{ConfDir, StoreKind, StoreOptions};

/// 相似度度量，分数越高越相似
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Distance {
    /// 余弦相似度
    Cosine,
    /// 内积
    Dot,
}

impl Distance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cosine => "Cosine",
            Self::Dot => "Dot",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "Cosine" => Ok(Self::Cosine),
            "Dot" => Ok(Self::Dot),
            _ => Err(anyhow::anyhow!("未知的相似度度量: {}", s)),
        }
    }

    /// 计算两个向量的相似度
    pub fn score(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Self::Cosine => cosine(a, b),
            Self::Dot => dot(a, b),
        }
    }
}

/// 集合参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionParams {
    /// 向量维数
    pub dim: usize,
    /// 相似度度量
    pub distance: Distance,
}

/// 点的附加数据
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointPayload {
    /// 图片路径，同时也是判重的依据
    pub image_path: String,
}

/// 待写入的点
#[derive(Debug, Clone, Serialize)]
pub struct Point {
    pub id: Uuid,
    pub vector: Vec<f32>,
    pub payload: PointPayload,
}

impl Point {
    /// 使用随机生成的 ID 创建一个点
    pub fn new(vector: Vec<f32>, image_path: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            vector,
            payload: PointPayload { image_path: image_path.into() },
        }
    }
}

/// 搜索结果
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPoint {
    pub score: f32,
    pub payload: PointPayload,
}

/// 向量数据库客户端
pub trait VectorStore: Send + Sync {
    /// 集合是否存在
    fn collection_exists(&self, name: &str) -> impl Future<Output = Result<bool>> + Send;

    /// 创建集合，已存在时不做任何操作
    ///
    /// 已存在的集合参数与 `params` 不一致时返回错误
    fn create_collection(
        &self,
        name: &str,
        params: CollectionParams,
    ) -> impl Future<Output = Result<()>> + Send;

    /// 集合中是否已有该路径的图片，最多只查找一条记录
    fn exists_by_path(&self, name: &str, path: &str) -> impl Future<Output = Result<bool>> + Send;

    /// 批量写入，出错时整批视为失败
    fn upsert_batch(&self, name: &str, points: Vec<Point>) -> impl Future<Output = Result<()>> + Send;

    /// 最近邻搜索，返回最多 `limit` 个按分数降序排列的结果
    fn search(
        &self,
        name: &str,
        vector: &[f32],
        limit: usize,
    ) -> impl Future<Output = Result<Vec<ScoredPoint>>> + Send;
}

/// 根据命令行参数选择的后端
pub enum Store {
    Qdrant(QdrantStore),
    Sqlite(SqliteStore),
    Memory(MemoryStore),
}

impl Store {
    /// 连接或打开后端
    pub async fn open(opts: &StoreOptions, conf_dir: &ConfDir) -> Result<Self> {
        let store = match opts.store {
            StoreKind::Qdrant => {
                info!("使用 Qdrant 后端: {}", opts.qdrant_url);
                Self::Qdrant(QdrantStore::new(&opts.qdrant_url, opts.qdrant_api_key.clone())?)
            }
            StoreKind::Sqlite => {
                std::fs::create_dir_all(conf_dir.path())?;
                Self::Sqlite(SqliteStore::open(conf_dir.database()).await?)
            }
            StoreKind::Memory => {
                info!("使用内存后端，数据不会被保存");
                Self::Memory(MemoryStore::default())
            }
        };
        Ok(store)
    }
}

impl VectorStore for Store {
    async fn collection_exists(&self, name: &str) -> Result<bool> {
        match self {
            Self::Qdrant(s) => s.collection_exists(name).await,
            Self::Sqlite(s) => s.collection_exists(name).await,
            Self::Memory(s) => s.collection_exists(name).await,
        }
    }

    async fn create_collection(&self, name: &str, params: CollectionParams) -> Result<()> {
        match self {
            Self::Qdrant(s) => s.create_collection(name, params).await,
            Self::Sqlite(s) => s.create_collection(name, params).await,
            Self::Memory(s) => s.create_collection(name, params).await,
        }
    }

    async fn exists_by_path(&self, name: &str, path: &str) -> Result<bool> {
        match self {
            Self::Qdrant(s) => s.exists_by_path(name, path).await,
            Self::Sqlite(s) => s.exists_by_path(name, path).await,
            Self::Memory(s) => s.exists_by_path(name, path).await,
        }
    }

    async fn upsert_batch(&self, name: &str, points: Vec<Point>) -> Result<()> {
        match self {
            Self::Qdrant(s) => s.upsert_batch(name, points).await,
            Self::Sqlite(s) => s.upsert_batch(name, points).await,
            Self::Memory(s) => s.upsert_batch(name, points).await,
        }
    }

    async fn search(&self, name: &str, vector: &[f32], limit: usize) -> Result<Vec<ScoredPoint>> {
        match self {
            Self::Qdrant(s) => s.search(name, vector, limit).await,
            Self::Sqlite(s) => s.search(name, vector, limit).await,
            Self::Memory(s) => s.search(name, vector, limit).await,
        }
    }
}

/// 暴力计算所有候选向量的分数，返回按分数降序排列的前 `limit` 个
///
/// 分数相同时保持候选的原有顺序
pub fn rank<'a, I>(distance: Distance, query: &[f32], candidates: I, limit: usize) -> Vec<ScoredPoint>
where
    I: IntoParallelIterator<Item = (&'a PointPayload, &'a [f32])>,
{
    if limit == 0 {
        return vec![];
    }
    let mut scored = candidates
        .into_par_iter()
        .map(|(payload, vector)| (distance.score(query, vector), payload))
        .collect::<Vec<_>>();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0));
    scored.truncate(limit);
    scored
        .into_iter()
        .map(|(score, payload)| ScoredPoint { score, payload: payload.clone() })
        .collect()
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let norm = (dot(a, a) * dot(b, b)).sqrt();
    if norm == 0. { 0. } else { dot(a, b) / norm }
}

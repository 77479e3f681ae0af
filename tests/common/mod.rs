#![allow(dead_code)]

use std::fs;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Context as _, Result, bail, ensure};
use similar_image::context::Collection;
use similar_image::embed::{Embedder, ImageInput};
use similar_image::store::{CollectionParams, Distance, Point, ScoredPoint, VectorStore};

pub const DIM: usize = 4;
pub const COLLECTION: &str = "test_images";

/// 把文件内容当作逗号分隔的浮点数，内容无法解析时视为损坏的图片
pub struct FakeEmbedder;

impl Embedder for FakeEmbedder {
    fn dim(&self) -> usize {
        DIM
    }

    fn embed(&self, image: &ImageInput) -> Result<Vec<f32>> {
        let data = match image {
            ImageInput::ByPath(path) => fs::read(path)?,
            ImageInput::Decoded(data) => data.clone(),
        };
        let text = std::str::from_utf8(&data).context("无法解码图片")?;
        let vector = text
            .split(',')
            .map(|s| s.trim().parse::<f32>())
            .collect::<Result<Vec<_>, _>>()
            .context("无法解码图片")?;
        ensure!(!vector.is_empty(), "空图片");
        Ok(vector)
    }
}

/// 记录每次写入批量大小的数据库包装，可以让指定的操作失败
pub struct CountingStore<S> {
    pub inner: S,
    batches: Mutex<Vec<usize>>,
    upserts: AtomicUsize,
    fail_upsert_at: Option<usize>,
    fail_search: bool,
}

impl<S> CountingStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            batches: Mutex::new(vec![]),
            upserts: AtomicUsize::new(0),
            fail_upsert_at: None,
            fail_search: false,
        }
    }

    /// 第 `n` 次（从 1 开始）写入失败
    pub fn fail_upsert_at(mut self, n: usize) -> Self {
        self.fail_upsert_at = Some(n);
        self
    }

    /// 所有搜索都失败
    pub fn fail_search(mut self) -> Self {
        self.fail_search = true;
        self
    }

    /// 成功写入的每批数量
    pub fn batches(&self) -> Vec<usize> {
        self.batches.lock().unwrap().clone()
    }
}

impl<S: VectorStore> VectorStore for CountingStore<S> {
    async fn collection_exists(&self, name: &str) -> Result<bool> {
        self.inner.collection_exists(name).await
    }

    async fn create_collection(&self, name: &str, params: CollectionParams) -> Result<()> {
        self.inner.create_collection(name, params).await
    }

    async fn exists_by_path(&self, name: &str, path: &str) -> Result<bool> {
        self.inner.exists_by_path(name, path).await
    }

    async fn upsert_batch(&self, name: &str, points: Vec<Point>) -> Result<()> {
        let n = self.upserts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_upsert_at == Some(n) {
            bail!("连接数据库失败");
        }
        let len = points.len();
        self.inner.upsert_batch(name, points).await?;
        self.batches.lock().unwrap().push(len);
        Ok(())
    }

    async fn search(&self, name: &str, vector: &[f32], limit: usize) -> Result<Vec<ScoredPoint>> {
        if self.fail_search {
            bail!("连接数据库失败");
        }
        self.inner.search(name, vector, limit).await
    }
}

pub fn collection() -> Collection {
    Collection {
        name: COLLECTION.to_string(),
        params: CollectionParams { dim: DIM, distance: Distance::Cosine },
    }
}

/// 在 `dir` 下写入一张“图片”，内容即为向量
pub fn write_image(dir: &Path, name: &str, vector: &str) {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, vector).unwrap();
}

/// 绑定后立即释放一个本地端口，连接该端口会被拒绝
pub fn closed_port_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}

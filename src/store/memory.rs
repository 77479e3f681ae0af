use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{Result, anyhow, bail, ensure};
use rayon::prelude::*;

use super::{CollectionParams, Point, ScoredPoint, VectorStore, rank};

struct MemoryCollection {
    params: CollectionParams,
    points: Vec<Point>,
}

/// 进程内的向量数据库，进程退出后数据丢失
#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, MemoryCollection>>,
}

impl MemoryStore {
    /// 集合中点的数量，集合不存在时为 0
    pub fn len(&self, name: &str) -> Result<usize> {
        Ok(self.read()?.get(name).map_or(0, |c| c.points.len()))
    }

    /// 集合中所有图片路径，按写入顺序排列
    pub fn paths(&self, name: &str) -> Result<Vec<String>> {
        Ok(self
            .read()?
            .get(name)
            .map(|c| c.points.iter().map(|p| p.payload.image_path.clone()).collect())
            .unwrap_or_default())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, MemoryCollection>>> {
        self.collections.read().map_err(|_| anyhow!("内存数据库锁已损坏"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, MemoryCollection>>> {
        self.collections.write().map_err(|_| anyhow!("内存数据库锁已损坏"))
    }
}

impl VectorStore for MemoryStore {
    async fn collection_exists(&self, name: &str) -> Result<bool> {
        Ok(self.read()?.contains_key(name))
    }

    async fn create_collection(&self, name: &str, params: CollectionParams) -> Result<()> {
        let mut collections = self.write()?;
        if let Some(collection) = collections.get(name) {
            ensure!(
                collection.params == params,
                "集合 {} 已存在，但参数不一致: {:?}",
                name,
                collection.params
            );
            return Ok(());
        }
        collections.insert(name.to_owned(), MemoryCollection { params, points: vec![] });
        Ok(())
    }

    async fn exists_by_path(&self, name: &str, path: &str) -> Result<bool> {
        let collections = self.read()?;
        let Some(collection) = collections.get(name) else {
            bail!("集合不存在: {}", name);
        };
        Ok(collection.points.iter().any(|p| p.payload.image_path == path))
    }

    async fn upsert_batch(&self, name: &str, points: Vec<Point>) -> Result<()> {
        let mut collections = self.write()?;
        let Some(collection) = collections.get_mut(name) else {
            bail!("集合不存在: {}", name);
        };
        // 先检查整批数据，保证要么全部写入要么全部失败
        for point in &points {
            ensure!(
                point.vector.len() == collection.params.dim,
                "向量维数错误: 期望 {}，实际 {}",
                collection.params.dim,
                point.vector.len()
            );
        }
        for point in points {
            match collection.points.iter_mut().find(|p| p.id == point.id) {
                Some(old) => *old = point,
                None => collection.points.push(point),
            }
        }
        Ok(())
    }

    async fn search(&self, name: &str, vector: &[f32], limit: usize) -> Result<Vec<ScoredPoint>> {
        let collections = self.read()?;
        let Some(collection) = collections.get(name) else {
            bail!("集合不存在: {}", name);
        };
        ensure!(
            vector.len() == collection.params.dim,
            "查询向量维数错误: 期望 {}，实际 {}",
            collection.params.dim,
            vector.len()
        );
        let candidates = collection.points.par_iter().map(|p| (&p.payload, p.vector.as_slice()));
        Ok(rank(collection.params.distance, vector, candidates, limit))
    }
}

use std::path::Path;

use anyhow::{Result, bail, ensure};
use log::{debug, info};
use rayon::prelude::*;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqliteSynchronous};
use tokio::task::block_in_place;

use super::{CollectionParams, Distance, Point, PointPayload, ScoredPoint, VectorStore, rank};

/// 基于 SQLite 的本地向量数据库
///
/// 向量以小端 f32 数组的形式保存在 BLOB 中，搜索时全量读取并暴力计算，
/// 适合数万张以内的小图库
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// 打开数据库，不存在时自动创建
    pub async fn open(filename: impl AsRef<Path>) -> Result<Self> {
        let filename = filename.as_ref();
        info!("初始化数据库连接: {}", filename.display());

        let options = SqliteConnectOptions::new()
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .filename(filename)
            .create_if_missing(true);

        let pool = SqlitePool::connect_with(options).await?;

        info!("检查数据库迁移");
        sqlx::migrate!().run(&pool).await?;

        Ok(Self { pool })
    }

    async fn collection_params(&self, name: &str) -> Result<Option<CollectionParams>> {
        let row = sqlx::query_as::<_, (i64, String)>(
            "SELECT dim, distance FROM collection WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(dim, distance)| {
            Ok(CollectionParams { dim: dim as usize, distance: Distance::parse(&distance)? })
        })
        .transpose()
    }

    async fn require_params(&self, name: &str) -> Result<CollectionParams> {
        match self.collection_params(name).await? {
            Some(params) => Ok(params),
            None => bail!("集合不存在: {}", name),
        }
    }
}

impl VectorStore for SqliteStore {
    async fn collection_exists(&self, name: &str) -> Result<bool> {
        Ok(self.collection_params(name).await?.is_some())
    }

    async fn create_collection(&self, name: &str, params: CollectionParams) -> Result<()> {
        if let Some(old) = self.collection_params(name).await? {
            ensure!(old == params, "集合 {} 已存在，但参数不一致: {:?}", name, old);
            return Ok(());
        }
        info!("创建集合 {}: {:?}", name, params);
        sqlx::query("INSERT OR IGNORE INTO collection (name, dim, distance) VALUES (?, ?, ?)")
            .bind(name)
            .bind(params.dim as i64)
            .bind(params.distance.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn exists_by_path(&self, name: &str, path: &str) -> Result<bool> {
        let row = sqlx::query_scalar::<_, i64>(
            "SELECT 1 FROM point WHERE collection = ? AND image_path = ? LIMIT 1",
        )
        .bind(name)
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    async fn upsert_batch(&self, name: &str, points: Vec<Point>) -> Result<()> {
        let params = self.require_params(name).await?;
        for point in &points {
            ensure!(
                point.vector.len() == params.dim,
                "向量维数错误: 期望 {}，实际 {}",
                params.dim,
                point.vector.len()
            );
        }

        let mut tx = self.pool.begin().await?;
        for point in &points {
            sqlx::query(
                r#"
                INSERT INTO point (id, collection, image_path, vector)
                VALUES (?, ?, ?, ?)
                ON CONFLICT (id) DO UPDATE SET image_path = excluded.image_path, vector = excluded.vector
                "#,
            )
            .bind(point.id.to_string())
            .bind(name)
            .bind(&point.payload.image_path)
            .bind(bytemuck::cast_slice::<f32, u8>(&point.vector))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        debug!("写入 {} 个点到集合 {}", points.len(), name);
        Ok(())
    }

    async fn search(&self, name: &str, vector: &[f32], limit: usize) -> Result<Vec<ScoredPoint>> {
        let params = self.require_params(name).await?;
        ensure!(
            vector.len() == params.dim,
            "查询向量维数错误: 期望 {}，实际 {}",
            params.dim,
            vector.len()
        );
        if limit == 0 {
            return Ok(vec![]);
        }

        let rows = sqlx::query_as::<_, (String, Vec<u8>)>(
            "SELECT image_path, vector FROM point WHERE collection = ? ORDER BY rowid",
        )
        .bind(name)
        .fetch_all(&self.pool)
        .await?;

        let points = rows
            .into_iter()
            .map(|(image_path, blob)| Ok((PointPayload { image_path }, blob_to_vector(&blob)?)))
            .collect::<Result<Vec<_>>>()?;

        Ok(block_in_place(|| {
            let candidates = points.par_iter().map(|(p, v)| (p, v.as_slice()));
            rank(params.distance, vector, candidates, limit)
        }))
    }
}

fn blob_to_vector(blob: &[u8]) -> Result<Vec<f32>> {
    ensure!(blob.len() % size_of::<f32>() == 0, "向量数据长度错误: {}", blob.len());
    Ok(bytemuck::pod_collect_to_vec::<u8, f32>(blob))
}

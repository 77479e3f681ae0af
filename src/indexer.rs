//! 批量索引
//!
//! 图片路径即判重依据：已存在的路径在计算向量之前就会被跳过，
//! 因此重复运行是安全的，中断后重新运行即可继续。
//!
//! NOTE: 同一个集合上不能并发运行多个索引任务。两个任务可能同时通过判重检查，
//! 导致同一路径被写入两次，调用者需要自行保证串行执行。

use std::mem;
use std::path::{Path, PathBuf};

use anyhow::{Result, ensure};
use indicatif::ProgressBar;
use log::{debug, info, warn};
use serde::Serialize;
use tokio::task::block_in_place;
use walkdir::WalkDir;

use crate::context::Context;
use crate::embed::{Embedder, ImageInput};
use crate::metrics::{self, IndexOutcome};
use crate::store::{Point, VectorStore};
use crate::utils::SuffixFilter;

/// 单张图片处理失败的记录
#[derive(Debug, Clone, Serialize)]
pub struct ItemFailure {
    pub path: String,
    pub reason: String,
}

/// 一次索引的统计
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexSummary {
    /// 新写入的图片数量
    pub processed: usize,
    /// 已存在而跳过的图片数量
    pub skipped: usize,
    /// 计算向量失败的图片
    pub failures: Vec<ItemFailure>,
}

pub struct Indexer<E: ?Sized, S> {
    ctx: Context<E, S>,
    suffix: SuffixFilter,
    recursive: bool,
    pb: ProgressBar,
}

impl<E: Embedder + ?Sized, S: VectorStore> Indexer<E, S> {
    pub fn new(ctx: Context<E, S>) -> Self {
        Self { ctx, suffix: SuffixFilter::default(), recursive: false, pb: ProgressBar::hidden() }
    }

    pub fn suffix(mut self, suffix: SuffixFilter) -> Self {
        self.suffix = suffix;
        self
    }

    /// 是否扫描子目录
    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    pub fn progress(mut self, pb: ProgressBar) -> Self {
        self.pb = pb;
        self
    }

    /// 扫描目录，返回按文件名排序的候选图片，后缀不符的文件直接忽略
    pub fn scan(&self, root: &Path) -> Result<Vec<PathBuf>> {
        ensure!(root.is_dir(), "语料目录不存在: {}", root.display());

        let max_depth = if self.recursive { usize::MAX } else { 1 };
        let entries = WalkDir::new(root)
            .min_depth(1)
            .max_depth(max_depth)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    debug!("跳过无法访问的路径: {}", e);
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file() && self.suffix.is_match(entry.path()))
            .map(|entry| entry.into_path())
            .collect();
        Ok(entries)
    }

    /// 索引 `root` 下的图片，每 `batch_size` 张写入一次数据库
    ///
    /// 单张图片计算失败只会记录在 [`IndexSummary::failures`] 中，
    /// 数据库出错则中止整个任务
    pub async fn run_index(&self, root: impl AsRef<Path>, batch_size: usize) -> Result<IndexSummary> {
        let root = root.as_ref();
        let batch_size = batch_size.max(1);
        let name = &self.ctx.collection.name;

        self.ctx.ensure_collection().await?;

        let paths = self.scan(root)?;
        info!("开始索引: {}，共 {} 张图片", root.display(), paths.len());
        self.pb.set_length(paths.len() as u64);

        let mut summary = IndexSummary::default();
        let mut pending = Vec::with_capacity(batch_size);

        for path in paths {
            let key = path.to_string_lossy().into_owned();

            if self.ctx.store.exists_by_path(name, &key).await? {
                self.pb.set_message(format!("跳过已添加图片: {}", key));
                self.pb.inc(1);
                metrics::inc_index_image_count(IndexOutcome::Skipped);
                summary.skipped += 1;
                continue;
            }

            let input = ImageInput::ByPath(path);
            match block_in_place(|| self.ctx.embedder.embed_checked(&input)) {
                Ok(vector) => {
                    pending.push(Point::new(vector, key));
                    metrics::inc_index_image_count(IndexOutcome::Processed);
                    summary.processed += 1;
                }
                Err(e) => {
                    let reason = format!("{:#}", e);
                    self.pb.suspend(|| warn!("计算向量失败: {}: {}", key, reason));
                    metrics::inc_index_image_count(IndexOutcome::Failed);
                    summary.failures.push(ItemFailure { path: key, reason });
                }
            }
            self.pb.inc(1);

            if pending.len() >= batch_size {
                self.flush(&mut pending).await?;
            }
        }

        if !pending.is_empty() {
            self.flush(&mut pending).await?;
        }

        info!(
            "索引完成: 新增 {}，跳过 {}，失败 {}",
            summary.processed,
            summary.skipped,
            summary.failures.len()
        );
        Ok(summary)
    }

    async fn flush(&self, pending: &mut Vec<Point>) -> Result<()> {
        let batch = mem::take(pending);
        let len = batch.len();
        self.ctx.store.upsert_batch(&self.ctx.collection.name, batch).await?;
        debug!("写入 {} 张图片", len);
        self.pb.set_message(format!("已写入 {} 张图片", len));
        Ok(())
    }
}

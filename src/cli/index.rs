use std::path::PathBuf;

use anyhow::{Result, ensure};
use clap::Parser;
use indicatif::ProgressBar;

use crate::cli::SubCommandExtend;
use crate::config::{Opts, StoreOptions};
use crate::utils::{DEFAULT_SUFFIX, SuffixFilter, pb_style};
use crate::{ContextBuilder, Indexer};

#[derive(Parser, Debug, Clone)]
pub struct IndexCommand {
    #[command(flatten)]
    pub store: StoreOptions,
    /// 图片所在目录
    pub path: PathBuf,
    /// 扫描的文件后缀名，多个后缀用逗号分隔，不区分大小写
    #[arg(short, long, default_value = DEFAULT_SUFFIX)]
    pub suffix: SuffixFilter,
    /// 每批写入数据库的图片数量
    #[arg(short, long, value_name = "SIZE", default_value_t = 100, value_parser = clap::value_parser!(u32).range(1..))]
    pub batch_size: u32,
    /// 同时扫描子目录
    #[arg(short, long)]
    pub recursive: bool,
}

impl SubCommandExtend for IndexCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        // 先检查目录，避免无意义地加载模型
        ensure!(self.path.is_dir(), "语料目录不存在: {}", self.path.display());

        let ctx = ContextBuilder::new(opts.conf_dir.clone(), self.store.clone()).open().await?;

        let pb = ProgressBar::no_length().with_style(pb_style());
        let indexer = Indexer::new(ctx)
            .suffix(self.suffix.clone())
            .recursive(self.recursive)
            .progress(pb.clone());

        let summary = indexer.run_index(&self.path, self.batch_size as usize).await?;
        pb.finish_with_message("图片添加完成");

        for failure in &summary.failures {
            eprintln!("[ERR] {}: {}", failure.path, failure.reason);
        }
        println!(
            "processed: {}\tskipped: {}\tfailed: {}",
            summary.processed,
            summary.skipped,
            summary.failures.len()
        );
        Ok(())
    }
}

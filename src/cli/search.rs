use std::path::PathBuf;

use anyhow::{Context, Result, ensure};
use clap::{Parser, ValueEnum};

use crate::cli::SubCommandExtend;
use crate::config::{Opts, StoreOptions};
use crate::retriever::InputError;
use crate::utils::{DEFAULT_SUFFIX, SuffixFilter};
use crate::{ContextBuilder, QueryImage, Retriever, SearchHit};

#[derive(Parser, Debug, Clone)]
pub struct SearchCommand {
    #[command(flatten)]
    pub store: StoreOptions,
    /// 被搜索的图片路径
    pub image: PathBuf,
    /// 允许的图片后缀名，多个后缀用逗号分隔
    #[arg(short, long, default_value = DEFAULT_SUFFIX)]
    pub suffix: SuffixFilter,
    /// 显示的结果数量
    #[arg(long, value_name = "COUNT", default_value_t = 5)]
    pub count: usize,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", value_enum, default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

impl SubCommandExtend for SearchCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let file_name = self.image.file_name().map(|name| name.to_string_lossy().into_owned());
        // 先检查输入，避免无意义地加载模型
        if !self.suffix.is_match(&self.image) {
            return Err(InputError::InvalidExtension(self.image.display().to_string()).into());
        }
        ensure!(self.image.is_file(), "图片不存在: {}", self.image.display());
        let data = tokio::fs::read(&self.image)
            .await
            .with_context(|| format!("读取图片失败: {}", self.image.display()))?;

        let ctx = ContextBuilder::new(opts.conf_dir.clone(), self.store.clone()).open().await?;
        let retriever = Retriever::new(ctx).suffix(self.suffix.clone()).with_image(false);

        let result = retriever.run_search(QueryImage::Upload { file_name, data }, self.count).await?;
        print_result(&result, self)
    }
}

fn print_result(result: &[SearchHit], opts: &SearchCommand) -> Result<()> {
    match opts.output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(result)?)
        }
        OutputFormat::Table => {
            for hit in result {
                println!("{:.4}\t{}", hit.score, hit.image_path);
            }
        }
    }
    Ok(())
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum OutputFormat {
    Json,
    Table,
}


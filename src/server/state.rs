use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::cli::server::ServerCommand;
use crate::embed::Embedder;
use crate::store::Store;
use crate::{Indexer, Retriever, SharedContext};

/// 应用状态
pub struct AppState {
    pub indexer: Indexer<dyn Embedder, Store>,
    pub retriever: Retriever<dyn Embedder, Store>,
    /// 索引的图片目录
    pub corpus: PathBuf,
    pub batch_size: usize,
    /// 请求未指定 limit 时返回的结果数量
    pub top_k: usize,
    /// 同一时间只允许一个索引任务
    pub index_lock: Mutex<()>,
}

impl AppState {
    /// 创建新的应用状态
    pub fn new(ctx: SharedContext, opts: ServerCommand) -> Arc<Self> {
        let indexer = Indexer::new(ctx.clone()).suffix(opts.suffix.clone()).recursive(opts.recursive);
        let retriever = Retriever::new(ctx).suffix(opts.suffix).upload_dir(opts.upload_dir);
        Arc::new(AppState {
            indexer,
            retriever,
            corpus: opts.corpus,
            batch_size: opts.batch_size as usize,
            top_k: opts.top_k,
            index_lock: Mutex::new(()),
        })
    }
}

use std::sync::Arc;

use anyhow::{Result, ensure};
use log::info;
use tokio::task::block_in_place;

use crate::config::{ConfDir, StoreOptions};
use crate::embed::{ClipEmbedder, Embedder};
use crate::store::{CollectionParams, Store, VectorStore};

/// 集合名称及其参数
#[derive(Debug, Clone)]
pub struct Collection {
    pub name: String,
    pub params: CollectionParams,
}

/// 索引和检索共用的句柄，启动时构建一次后传给 [`Indexer`](crate::Indexer)
/// 与 [`Retriever`](crate::Retriever)
pub struct Context<E: ?Sized, S> {
    pub embedder: Arc<E>,
    pub store: Arc<S>,
    pub collection: Collection,
}

/// 服务端与命令行使用的具体类型
pub type SharedContext = Context<dyn Embedder, Store>;

impl<E: ?Sized, S> Clone for Context<E, S> {
    fn clone(&self) -> Self {
        Self {
            embedder: self.embedder.clone(),
            store: self.store.clone(),
            collection: self.collection.clone(),
        }
    }
}

impl<E: Embedder + ?Sized, S: VectorStore> Context<E, S> {
    /// 模型输出维数必须与集合维数一致
    pub fn new(embedder: Arc<E>, store: S, collection: Collection) -> Result<Self> {
        ensure!(
            embedder.dim() == collection.params.dim,
            "模型输出维数 {} 与集合维数 {} 不一致",
            embedder.dim(),
            collection.params.dim
        );
        Ok(Self { embedder, store: Arc::new(store), collection })
    }

    /// 确保集合存在，可以重复调用
    pub async fn ensure_collection(&self) -> Result<()> {
        self.store.create_collection(&self.collection.name, self.collection.params).await
    }
}

pub struct ContextBuilder {
    conf_dir: ConfDir,
    store: StoreOptions,
}

impl ContextBuilder {
    pub fn new(conf_dir: ConfDir, store: StoreOptions) -> Self {
        Self { conf_dir, store }
    }

    /// 连接数据库并加载 CLIP 模型
    pub async fn open(self) -> Result<SharedContext> {
        let store = Store::open(&self.store, &self.conf_dir).await?;
        let cache_dir = self.conf_dir.model_cache();
        let embedder = block_in_place(|| ClipEmbedder::new(cache_dir))?;
        info!("模型加载完成，向量维数: {}", embedder.dim());
        Context::new(Arc::new(embedder) as Arc<dyn Embedder>, store, self.store.collection())
    }
}

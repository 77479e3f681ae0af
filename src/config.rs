use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

use clap::{Parser, Subcommand, ValueEnum};
use directories::ProjectDirs;

use crate::cli::*;
use crate::context::Collection;
use crate::store::{CollectionParams, Distance};

static CONF_DIR: LazyLock<ConfDir> = LazyLock::new(|| {
    let proj_dirs =
        ProjectDirs::from("", "similar-image", "similar-image").expect("failed to get project dir");
    ConfDir { path: proj_dirs.config_dir().to_path_buf() }
});

fn default_config_dir() -> &'static str {
    CONF_DIR.path().to_str().expect("config dir is not valid utf-8")
}

#[derive(Parser, Debug, Clone)]
pub struct StoreOptions {
    /// 向量数据库后端
    #[arg(long, value_enum, default_value_t = StoreKind::Qdrant)]
    pub store: StoreKind,
    /// Qdrant 服务地址
    #[arg(long, value_name = "URL", default_value = "http://localhost:6333")]
    pub qdrant_url: String,
    /// Qdrant API key
    #[arg(long, value_name = "KEY")]
    pub qdrant_api_key: Option<String>,
    /// 集合名称
    #[arg(long, value_name = "NAME", default_value = "image_vectors")]
    pub collection: String,
    /// 向量维数，需要与模型输出一致
    #[arg(long, value_name = "D", default_value_t = 512)]
    pub dim: usize,
    /// 相似度度量
    #[arg(long, value_enum, default_value_t = Distance::Cosine)]
    pub distance: Distance,
}

impl StoreOptions {
    pub fn collection(&self) -> Collection {
        Collection {
            name: self.collection.clone(),
            params: CollectionParams { dim: self.dim, distance: self.distance },
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    /// Qdrant 服务
    Qdrant,
    /// 配置目录下的 SQLite 数据库
    Sqlite,
    /// 进程内存，仅用于测试
    Memory,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "similar-image", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// 配置目录，保存模型缓存与 SQLite 数据库
    #[arg(short, long, default_value = default_config_dir())]
    pub conf_dir: ConfDir,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 计算目录中图片的向量并写入数据库
    Index(IndexCommand),
    /// 从数据库中搜索相似图片
    Search(SearchCommand),
    /// 启动 HTTP 服务
    Server(ServerCommand),
}

#[derive(Debug, Clone)]
pub struct ConfDir {
    path: PathBuf,
}

impl ConfDir {
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// 返回 SQLite 数据库文件的路径
    pub fn database(&self) -> PathBuf {
        self.path.join("similar-image.db")
    }

    /// 返回模型缓存目录
    pub fn model_cache(&self) -> PathBuf {
        self.path.join("models")
    }
}

impl FromStr for ConfDir {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self { path: PathBuf::from(s) })
    }
}

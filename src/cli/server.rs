use std::path::PathBuf;

use anyhow::{Context, Result, ensure};
use clap::Parser;
use log::{error, info, warn};
use prometheus::{BasicAuthentication, labels};
use tokio::net::TcpListener;
use tokio::task::spawn_blocking;
use tokio::time::{Duration, sleep};

use crate::cli::SubCommandExtend;
use crate::config::{Opts, StoreOptions};
use crate::utils::{DEFAULT_SUFFIX, SuffixFilter};
use crate::{ContextBuilder, server};

#[derive(Parser, Debug, Clone)]
pub struct ServerCommand {
    #[command(flatten)]
    pub store: StoreOptions,
    /// 监听地址
    #[arg(long, default_value = "127.0.0.1:8080")]
    pub addr: String,
    /// `/api/embed` 索引的图片目录，同时也是搜索结果中原图的来源
    #[arg(long, value_name = "DIR")]
    pub corpus: PathBuf,
    /// 允许的图片后缀名，多个后缀用逗号分隔
    #[arg(short, long, default_value = DEFAULT_SUFFIX)]
    pub suffix: SuffixFilter,
    /// 每批写入数据库的图片数量
    #[arg(short, long, value_name = "SIZE", default_value_t = 100, value_parser = clap::value_parser!(u32).range(1..))]
    pub batch_size: u32,
    /// 同时扫描子目录
    #[arg(short, long)]
    pub recursive: bool,
    /// 请求未指定 limit 时返回的结果数量
    #[arg(long, value_name = "K", default_value_t = 5)]
    pub top_k: usize,
    /// 上传图片的保存目录，不填则不保存
    #[arg(long, value_name = "DIR")]
    pub upload_dir: Option<PathBuf>,
    /// prometheus 主动推送地址
    #[arg(long, value_name = "URL")]
    pub prometheus_push: Option<String>,
    /// 自定义 instance 标签值
    #[arg(long, value_name = "NAME")]
    pub prometheus_instance: Option<String>,
    /// prometheus 认证信息，格式为 username:password
    #[arg(long, value_name = "AUTH")]
    pub prometheus_auth: Option<String>,
}

impl ServerCommand {
    fn push_auth(&self) -> Result<Option<(String, String)>> {
        self.prometheus_auth
            .as_deref()
            .map(|s| {
                let (username, password) =
                    s.split_once(':').context("prometheus 认证信息格式应为 username:password")?;
                Ok((username.to_string(), password.to_string()))
            })
            .transpose()
    }
}

impl SubCommandExtend for ServerCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        if !self.corpus.is_dir() {
            warn!("语料目录不存在: {}，索引请求将会失败", self.corpus.display());
        }
        let auth = self.push_auth()?;
        ensure!(!self.addr.is_empty(), "监听地址不能为空");

        let ctx = ContextBuilder::new(opts.conf_dir.clone(), self.store.clone()).open().await?;
        // 启动时创建集合，避免首次搜索时集合不存在
        ctx.ensure_collection().await?;
        info!("使用集合: {}", ctx.collection.name);

        // 创建应用状态
        let state = server::AppState::new(ctx, self.clone());

        // 创建应用
        let app = server::create_app(state);

        if let Some(url) = self.prometheus_push.clone() {
            let instance = self.prometheus_instance.clone().unwrap_or_else(|| self.addr.clone());
            tokio::spawn(async move {
                loop {
                    let metric_families = prometheus::gather();
                    let url = url.clone();
                    let instance = instance.clone();
                    let auth = auth.clone();
                    let r = spawn_blocking(move || {
                        prometheus::push_metrics(
                            "similar-image",
                            labels! {
                                "instance".to_string() => instance,
                            },
                            &url,
                            metric_families,
                            auth.map(|(username, password)| BasicAuthentication {
                                username,
                                password,
                            }),
                        )
                    })
                    .await;
                    match r {
                        Ok(Err(e)) => error!("推送指标失败: {e}"),
                        Err(e) => error!("推送任务异常退出: {e}"),
                        Ok(Ok(())) => {}
                    }
                    sleep(Duration::from_secs(30)).await;
                }
            });
        }

        // 启动服务器
        info!("服务器启动：http://{}", &self.addr);
        let listener = TcpListener::bind(&self.addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}

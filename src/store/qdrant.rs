use anyhow::{Context, Result, bail, ensure};
use log::{debug, info};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{CollectionParams, Distance, Point, PointPayload, ScoredPoint, VectorStore};

/// 判重使用的 payload 字段
const PATH_FIELD: &str = "image_path";

/// 通过 REST 接口访问的 Qdrant 服务
pub struct QdrantStore {
    client: Client,
    url: String,
    api_key: Option<String>,
}

#[derive(Deserialize)]
struct QdrantResponse<T> {
    result: T,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct VectorParams {
    size: usize,
    distance: Distance,
}

#[derive(Serialize)]
struct CreateCollection {
    vectors: VectorParams,
}

#[derive(Serialize)]
struct CreateFieldIndex<'a> {
    field_name: &'a str,
    field_schema: &'a str,
}

#[derive(Deserialize)]
struct ExistsResult {
    exists: bool,
}

#[derive(Deserialize)]
struct CollectionInfo {
    config: CollectionConfig,
}

#[derive(Deserialize)]
struct CollectionConfig {
    params: CollectionConfigParams,
}

#[derive(Deserialize)]
struct CollectionConfigParams {
    vectors: VectorParams,
}

#[derive(Serialize)]
struct MatchValue<'a> {
    value: &'a str,
}

#[derive(Serialize)]
struct FieldCondition<'a> {
    key: &'a str,
    r#match: MatchValue<'a>,
}

#[derive(Serialize)]
struct Filter<'a> {
    must: Vec<FieldCondition<'a>>,
}

#[derive(Serialize)]
struct ScrollRequest<'a> {
    filter: Filter<'a>,
    limit: usize,
    with_payload: bool,
    with_vector: bool,
}

#[derive(Deserialize)]
struct ScrollResult {
    points: Vec<serde_json::Value>,
}

#[derive(Serialize)]
struct UpsertRequest<'a> {
    points: &'a [Point],
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    vector: &'a [f32],
    limit: usize,
    with_payload: bool,
}

#[derive(Deserialize)]
struct SearchPoint {
    score: f32,
    payload: Option<PointPayload>,
}

impl QdrantStore {
    pub fn new(url: &str, api_key: Option<String>) -> Result<Self> {
        let client = Client::builder().build().context("创建 HTTP 客户端失败")?;
        Ok(Self { client, url: url.trim_end_matches('/').to_owned(), api_key })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.client.request(method, format!("{}{}", self.url, path));
        match &self.api_key {
            Some(key) => builder.header("api-key", key),
            None => builder,
        }
    }

    /// 发送请求并取出响应中的 `result` 字段
    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T> {
        let response = builder.send().await.context("无法连接 Qdrant")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Qdrant 请求失败 ({}): {}", status, body);
        }
        let response: QdrantResponse<T> = response.json().await.context("无法解析 Qdrant 响应")?;
        Ok(response.result)
    }

    /// 读取已有集合的参数，集合不存在时返回 `None`
    async fn collection_params(&self, name: &str) -> Result<Option<CollectionParams>> {
        let response = self
            .request(Method::GET, &format!("/collections/{}", name))
            .send()
            .await
            .context("无法连接 Qdrant")?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Qdrant 请求失败 ({}): {}", status, body);
        }
        let info: QdrantResponse<CollectionInfo> =
            response.json().await.context("无法解析集合配置，是否使用了命名向量？")?;
        let vectors = info.result.config.params.vectors;
        Ok(Some(CollectionParams { dim: vectors.size, distance: vectors.distance }))
    }
}

impl VectorStore for QdrantStore {
    async fn collection_exists(&self, name: &str) -> Result<bool> {
        let result: ExistsResult = self
            .send(self.request(Method::GET, &format!("/collections/{}/exists", name)))
            .await?;
        Ok(result.exists)
    }

    async fn create_collection(&self, name: &str, params: CollectionParams) -> Result<()> {
        match self.collection_params(name).await? {
            Some(old) => {
                ensure!(old == params, "集合 {} 已存在，但参数不一致: {:?}", name, old);
            }
            None => {
                info!("创建集合 {}: {:?}", name, params);
                let body = CreateCollection {
                    vectors: VectorParams { size: params.dim, distance: params.distance },
                };
                let _: bool = self
                    .send(self.request(Method::PUT, &format!("/collections/{}", name)).json(&body))
                    .await?;
            }
        }

        // 为路径建立索引，使判重查询不需要全表扫描
        // 重复创建不会报错，集合已存在时也要执行，以补上之前失败的索引
        let body = CreateFieldIndex { field_name: PATH_FIELD, field_schema: "keyword" };
        let _: serde_json::Value = self
            .send(
                self.request(Method::PUT, &format!("/collections/{}/index?wait=true", name))
                    .json(&body),
            )
            .await?;
        Ok(())
    }

    async fn exists_by_path(&self, name: &str, path: &str) -> Result<bool> {
        let body = ScrollRequest {
            filter: Filter {
                must: vec![FieldCondition { key: PATH_FIELD, r#match: MatchValue { value: path } }],
            },
            limit: 1,
            with_payload: false,
            with_vector: false,
        };
        let result: ScrollResult = self
            .send(
                self.request(Method::POST, &format!("/collections/{}/points/scroll", name))
                    .json(&body),
            )
            .await?;
        Ok(!result.points.is_empty())
    }

    async fn upsert_batch(&self, name: &str, points: Vec<Point>) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }
        let body = UpsertRequest { points: &points };
        let _: serde_json::Value = self
            .send(
                self.request(Method::PUT, &format!("/collections/{}/points?wait=true", name))
                    .json(&body),
            )
            .await?;
        debug!("写入 {} 个点到集合 {}", points.len(), name);
        Ok(())
    }

    async fn search(&self, name: &str, vector: &[f32], limit: usize) -> Result<Vec<ScoredPoint>> {
        if limit == 0 {
            return Ok(vec![]);
        }
        let body = SearchRequest { vector, limit, with_payload: true };
        let points: Vec<SearchPoint> = self
            .send(
                self.request(Method::POST, &format!("/collections/{}/points/search", name))
                    .json(&body),
            )
            .await?;
        points
            .into_iter()
            .map(|point| match point.payload {
                Some(payload) => Ok(ScoredPoint { score: point.score, payload }),
                None => bail!("搜索结果缺少 {} 字段", PATH_FIELD),
            })
            .collect()
    }
}

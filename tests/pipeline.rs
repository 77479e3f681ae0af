mod common;

use std::fs;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use common::*;
use rstest::*;
use similar_image::store::MemoryStore;
use similar_image::utils::SuffixFilter;
use similar_image::{Context, Indexer, InputError, QueryImage, Retriever};
use tempfile::TempDir;

type TestContext = Context<FakeEmbedder, CountingStore<MemoryStore>>;

#[fixture]
fn corpus() -> TempDir {
    TempDir::new().unwrap()
}

#[fixture]
fn ctx() -> TestContext {
    Context::new(Arc::new(FakeEmbedder), CountingStore::new(MemoryStore::default()), collection()).unwrap()
}

/// a、b、c 三张图片与 `1,0,0,0` 的余弦相似度分别为 1.0、0.8、0.0
#[fixture]
fn three_images(corpus: TempDir) -> TempDir {
    write_image(corpus.path(), "a.jpg", "1,0,0,0");
    write_image(corpus.path(), "b.png", "0.8,0.6,0,0");
    write_image(corpus.path(), "c.jpeg", "0,1,0,0");
    corpus
}

fn base64_query(vector: &str) -> QueryImage {
    QueryImage::Base64(STANDARD.encode(vector))
}

fn input_error(err: &anyhow::Error) -> &InputError {
    err.downcast_ref::<InputError>().expect("expected input error")
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn test_index_batches_and_dedup(three_images: TempDir, ctx: TestContext) {
    let indexer = Indexer::new(ctx.clone());

    let summary = indexer.run_index(three_images.path(), 2).await.unwrap();
    assert_eq!(summary.processed, 3);
    assert_eq!(summary.skipped, 0);
    assert!(summary.failures.is_empty());
    assert_eq!(ctx.store.batches(), [2, 1]);

    // 重复运行不会写入任何数据
    let summary = indexer.run_index(three_images.path(), 2).await.unwrap();
    assert_eq!(summary.processed, 0);
    assert_eq!(summary.skipped, 3);
    assert_eq!(ctx.store.batches(), [2, 1]);
    assert_eq!(ctx.store.inner.len(COLLECTION).unwrap(), 3);
}

#[rstest]
#[case::empty(0, 2, &[])]
#[case::single(1, 1, &[1])]
#[case::exact(4, 2, &[2, 2])]
#[case::remainder(5, 2, &[2, 2, 1])]
#[case::large_batch(5, 100, &[5])]
#[tokio::test(flavor = "multi_thread")]
async fn test_index_batch_sizes(
    corpus: TempDir,
    ctx: TestContext,
    #[case] count: usize,
    #[case] batch_size: usize,
    #[case] expected: &[usize],
) {
    for i in 0..count {
        write_image(corpus.path(), &format!("{i:03}.jpg"), &format!("{},1,0,0", i + 1));
    }
    let summary = Indexer::new(ctx.clone()).run_index(corpus.path(), batch_size).await.unwrap();
    assert_eq!(summary.processed, count);
    assert_eq!(ctx.store.batches(), expected);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn test_index_isolates_failures(corpus: TempDir, ctx: TestContext) {
    write_image(corpus.path(), "a.jpg", "1,0,0,0");
    write_image(corpus.path(), "b.jpg", "not an image");
    write_image(corpus.path(), "c.jpg", "0,0,1,0");
    // 维数不符同样视为单张图片失败
    write_image(corpus.path(), "d.jpg", "1,2,3");

    let indexer = Indexer::new(ctx.clone());
    let summary = indexer.run_index(corpus.path(), 1).await.unwrap();
    assert_eq!(summary.processed, 2);
    assert_eq!(summary.failures.len(), 2);
    assert!(summary.failures[0].path.ends_with("b.jpg"));
    assert!(summary.failures[1].path.ends_with("d.jpg"));
    assert_eq!(ctx.store.inner.len(COLLECTION).unwrap(), 2);

    // 失败的图片没有写入，下次运行会重试
    let summary = indexer.run_index(corpus.path(), 1).await.unwrap();
    assert_eq!(summary.skipped, 2);
    assert_eq!(summary.failures.len(), 2);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn test_index_filters_extensions(corpus: TempDir, ctx: TestContext) {
    write_image(corpus.path(), "a.JPG", "1,0,0,0");
    write_image(corpus.path(), "b.gif", "1,0,0,0");
    write_image(corpus.path(), "notes.txt", "hello");
    write_image(corpus.path(), "sub/c.png", "1,0,0,0");

    let indexer = Indexer::new(ctx.clone());
    let summary = indexer.run_index(corpus.path(), 10).await.unwrap();
    assert_eq!(summary.processed, 1);
    let paths = ctx.store.inner.paths(COLLECTION).unwrap();
    assert_eq!(paths, [corpus.path().join("a.JPG").to_string_lossy()]);

    let indexer = indexer.recursive(true).suffix(SuffixFilter::new("png").unwrap());
    let summary = indexer.run_index(corpus.path(), 10).await.unwrap();
    assert_eq!(summary.processed, 1);
    assert_eq!(ctx.store.inner.len(COLLECTION).unwrap(), 2);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn test_index_missing_corpus(corpus: TempDir, ctx: TestContext) {
    let result = Indexer::new(ctx).run_index(corpus.path().join("missing"), 10).await;
    assert!(result.is_err());
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn test_search_order_and_payload(three_images: TempDir, ctx: TestContext) {
    Indexer::new(ctx.clone()).run_index(three_images.path(), 100).await.unwrap();
    let retriever = Retriever::new(ctx);

    let hits = retriever.run_search(base64_query("1,0,0,0"), 2).await.unwrap();
    assert_eq!(hits.len(), 2);
    assert!(hits[0].image_path.ends_with("a.jpg"));
    assert!(hits[1].image_path.ends_with("b.png"));
    assert!((hits[0].score - 1.).abs() < 1e-6);
    assert!((hits[1].score - 0.8).abs() < 1e-6);

    let jpeg = hits[0].image_base64.as_deref().unwrap();
    let payload = jpeg.strip_prefix("data:image/jpeg;base64,").unwrap();
    assert_eq!(STANDARD.decode(payload).unwrap(), b"1,0,0,0");
    assert!(hits[1].image_base64.as_deref().unwrap().starts_with("data:image/png;base64,"));
}

#[rstest]
#[case::zero(0, 0)]
#[case::one(1, 1)]
#[case::all(3, 3)]
#[case::more_than_stored(10, 3)]
#[tokio::test(flavor = "multi_thread")]
async fn test_search_limit(
    three_images: TempDir,
    ctx: TestContext,
    #[case] k: usize,
    #[case] expected: usize,
) {
    Indexer::new(ctx.clone()).run_index(three_images.path(), 100).await.unwrap();
    let hits = Retriever::new(ctx).run_search(base64_query("0,1,0,0"), k).await.unwrap();
    assert_eq!(hits.len(), expected);
    assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn test_search_missing_source_file(three_images: TempDir, ctx: TestContext) {
    Indexer::new(ctx.clone()).run_index(three_images.path(), 100).await.unwrap();
    fs::remove_file(three_images.path().join("b.png")).unwrap();

    let hits = Retriever::new(ctx).run_search(base64_query("1,0,0,0"), 3).await.unwrap();
    assert_eq!(hits.len(), 3);
    assert!(hits[0].image_base64.is_some());
    assert!(hits[1].image_path.ends_with("b.png"));
    assert!(hits[1].image_base64.is_none());
    assert!(hits[2].image_base64.is_some());
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn test_search_without_image(three_images: TempDir, ctx: TestContext) {
    Indexer::new(ctx.clone()).run_index(three_images.path(), 100).await.unwrap();
    let hits = Retriever::new(ctx).with_image(false).run_search(base64_query("1,0,0,0"), 3).await.unwrap();
    assert!(hits.iter().all(|hit| hit.image_base64.is_none()));
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn test_search_data_uri_query(three_images: TempDir, ctx: TestContext) {
    Indexer::new(ctx.clone()).run_index(three_images.path(), 100).await.unwrap();
    let retriever = Retriever::new(ctx);

    let hits = retriever.run_search(base64_query("0,1,0,0"), 1).await.unwrap();
    // 搜索结果本身可以直接作为查询
    let query = QueryImage::Base64(hits[0].image_base64.clone().unwrap());
    let again = retriever.run_search(query, 1).await.unwrap();
    assert_eq!(again[0].image_path, hits[0].image_path);
}

fn saved_uploads(dir: &std::path::Path) -> Vec<String> {
    let mut names = fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect::<Vec<_>>();
    names.sort();
    names
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn test_search_upload(three_images: TempDir, ctx: TestContext) {
    Indexer::new(ctx.clone()).run_index(three_images.path(), 100).await.unwrap();
    let upload_dir = TempDir::new().unwrap();
    let uploads = upload_dir.path().join("uploads");
    let retriever = Retriever::new(ctx).upload_dir(Some(uploads.clone()));

    let query = QueryImage::Upload {
        file_name: Some("../my query.JPG".to_string()),
        data: b"0,1,0,0".to_vec(),
    };
    let hits = retriever.run_search(query, 1).await.unwrap();
    assert!(hits[0].image_path.ends_with("c.jpeg"));

    let saved = saved_uploads(&uploads);
    assert_eq!(saved.len(), 1);
    assert!(saved[0].ends_with("_my_query.JPG"));
    assert_eq!(fs::read(uploads.join(&saved[0])).unwrap(), b"0,1,0,0");
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn test_search_upload_non_ascii_name(three_images: TempDir, ctx: TestContext) {
    Indexer::new(ctx.clone()).run_index(three_images.path(), 100).await.unwrap();
    let uploads = TempDir::new().unwrap();
    let retriever = Retriever::new(ctx).upload_dir(Some(uploads.path().to_path_buf()));

    // 同名的两次上传各自得到自己的结果，保存的文件也互不覆盖
    for (data, expected) in [(b"1,0,0,0", "a.jpg"), (b"0,1,0,0", "c.jpeg")] {
        let query = QueryImage::Upload { file_name: Some("图片.png".to_string()), data: data.to_vec() };
        let hits = retriever.run_search(query, 1).await.unwrap();
        assert!(hits[0].image_path.ends_with(expected));
    }

    let saved = saved_uploads(uploads.path());
    assert_eq!(saved.len(), 2);
    assert!(saved.iter().all(|name| name.ends_with(".png")));
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn test_index_upsert_failure(corpus: TempDir) {
    for i in 0..5 {
        write_image(corpus.path(), &format!("{i}.jpg"), &format!("{},1,0,0", i + 1));
    }
    let store = CountingStore::new(MemoryStore::default()).fail_upsert_at(2);
    let ctx = Context::new(Arc::new(FakeEmbedder), store, collection()).unwrap();
    let indexer = Indexer::new(ctx.clone());

    // 第二批写入失败时整个任务报错，不会当作成功返回
    let err = indexer.run_index(corpus.path(), 2).await.unwrap_err();
    assert!(format!("{err:#}").contains("连接数据库失败"));
    assert_eq!(ctx.store.batches(), [2]);
    assert_eq!(ctx.store.inner.len(COLLECTION).unwrap(), 2);

    // 重新运行只补写剩下的图片
    let summary = indexer.run_index(corpus.path(), 2).await.unwrap();
    assert_eq!(summary.skipped, 2);
    assert_eq!(summary.processed, 3);
    assert_eq!(ctx.store.inner.len(COLLECTION).unwrap(), 5);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn test_search_store_failure() {
    let store = CountingStore::new(MemoryStore::default()).fail_search();
    let ctx = Context::new(Arc::new(FakeEmbedder), store, collection()).unwrap();
    ctx.ensure_collection().await.unwrap();

    let err = Retriever::new(ctx).run_search(base64_query("1,0,0,0"), 3).await.unwrap_err();
    // 数据库错误不属于输入错误
    assert!(err.downcast_ref::<InputError>().is_none());
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn test_search_rejects_input(ctx: TestContext) {
    ctx.ensure_collection().await.unwrap();
    let retriever = Retriever::new(ctx);

    let upload = |name: Option<&str>| QueryImage::Upload {
        file_name: name.map(str::to_string),
        data: b"1,0,0,0".to_vec(),
    };

    let err = retriever.run_search(upload(None), 5).await.unwrap_err();
    assert!(matches!(input_error(&err), InputError::EmptyFileName));
    let err = retriever.run_search(upload(Some("")), 5).await.unwrap_err();
    assert!(matches!(input_error(&err), InputError::EmptyFileName));
    let err = retriever.run_search(upload(Some("a.gif")), 5).await.unwrap_err();
    assert!(matches!(input_error(&err), InputError::InvalidExtension(_)));
    let err = retriever.run_search(upload(Some("noext")), 5).await.unwrap_err();
    assert!(matches!(input_error(&err), InputError::InvalidExtension(_)));

    let err = retriever.run_search(QueryImage::Base64("!!!".to_string()), 5).await.unwrap_err();
    assert!(matches!(input_error(&err), InputError::InvalidBase64(_)));
    let err = retriever.run_search(base64_query("garbage"), 5).await.unwrap_err();
    assert!(matches!(input_error(&err), InputError::UndecodableImage(_)));

    // 输入无效时即使 k 为 0 也要报错
    let err = retriever.run_search(upload(Some("a.gif")), 0).await.unwrap_err();
    assert!(matches!(input_error(&err), InputError::InvalidExtension(_)));
}

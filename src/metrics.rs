use std::sync::LazyLock;

use prometheus::*;

static METRIC_INDEX_IMAGE_COUNT: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "sim_index_image_count",
        "count of the images seen by indexing runs",
        &["outcome"]
    )
    .unwrap()
});

static METRIC_SEARCH_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "sim_search_duration",
        "duration of the per-image search in seconds",
        &["source"]
    )
    .unwrap()
});

static METRIC_SEARCH_MAX_SCORE: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "sim_search_max_score",
        "max score of the per-image search",
        &["source"],
        (1..=20).map(|x| x as f64 * 0.05).collect()
    )
    .unwrap()
});

/// 索引时图片的处理结果
#[derive(Debug, Clone, Copy)]
pub enum IndexOutcome {
    Processed,
    Skipped,
    Failed,
}

impl IndexOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Processed => "processed",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        }
    }
}

pub fn inc_index_image_count(outcome: IndexOutcome) {
    METRIC_INDEX_IMAGE_COUNT.with_label_values(&[outcome.as_str()]).inc();
}

/// 记录一次搜索的耗时与最高分，没有结果时不记录分数
pub fn observe_search(source: &str, duration: f32, max_score: Option<f32>) {
    METRIC_SEARCH_DURATION.with_label_values(&[source]).observe(duration as f64);
    if let Some(score) = max_score {
        METRIC_SEARCH_MAX_SCORE.with_label_values(&[source]).observe(score as f64);
    }
}

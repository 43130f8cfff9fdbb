use std::sync::LazyLock;

use prometheus::*;

static METRIC_ASSET_COUNT: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!("imgroup_assets_total", "count of the classified assets", &["bucket"]).unwrap()
});

static METRIC_FLUSH_COUNT: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!("imgroup_flush_total", "count of the checkpoint flushes", &["result"]).unwrap()
});

static METRIC_FLUSH_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    register_histogram!("imgroup_flush_duration", "duration of the per-checkpoint flush in seconds").unwrap()
});

/// 素材的分类去向
#[derive(Debug, Clone, Copy)]
pub enum Bucket {
    Grouped,
    Unclassified,
    /// 无法计算指纹
    Unknown,
}

impl Bucket {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Grouped => "grouped",
            Self::Unclassified => "unclassified",
            Self::Unknown => "unknown",
        }
    }
}

pub fn inc_asset_count(bucket: Bucket) {
    METRIC_ASSET_COUNT.with_label_values(&[bucket.as_str()]).inc();
}

pub fn inc_flush(ok: bool, duration: f32) {
    let result = if ok { "ok" } else { "error" };
    METRIC_FLUSH_COUNT.with_label_values(&[result]).inc();
    METRIC_FLUSH_DURATION.observe(duration as f64);
}

/// 以文本格式导出所有指标
pub fn gather_text() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    Ok(encoder.encode_to_string(&prometheus::gather())?)
}

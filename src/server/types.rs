use serde::Serialize;
use utoipa::ToSchema;

use crate::asset::AssetRef;
use crate::index::SummaryRow;
use crate::scanner::{Phase, Progress, StartOutcome};

/// 扫描进度
#[derive(Debug, Serialize, ToSchema)]
pub struct ProgressResponse {
    /// 已处理的素材数量
    pub processed: usize,
    /// 素材总数
    pub total: usize,
    /// 扫描结果是否已经全部保存
    pub finished: bool,
    /// 完成比例
    pub percent: f32,
    /// 扫描器状态
    #[schema(value_type = String, example = "scanning")]
    pub phase: Phase,
}

impl ProgressResponse {
    pub fn new(progress: Progress, phase: Phase) -> Self {
        Self {
            processed: progress.processed,
            total: progress.total,
            finished: progress.finished,
            percent: progress.percent(),
            phase,
        }
    }
}

/// 分组列表中的一行
#[derive(Debug, Serialize, ToSchema)]
pub struct GroupRow {
    /// 展示名称
    pub title: String,
    /// 素材数量
    pub count: usize,
    /// 分组名，未分类为空
    pub group: Option<String>,
}

impl From<SummaryRow> for GroupRow {
    fn from(row: SummaryRow) -> Self {
        Self { title: row.title, count: row.count, group: row.group.map(|g| g.name().to_owned()) }
    }
}

/// 某个分组下的素材
#[derive(Debug, Serialize, ToSchema)]
pub struct ItemsResponse {
    /// 分组名，未分类为空
    pub group: Option<String>,
    /// 素材标识，按扫描顺序
    pub items: Vec<String>,
}

impl ItemsResponse {
    pub fn new(group: Option<String>, items: Vec<AssetRef>) -> Self {
        Self { group, items: items.into_iter().map(|a| a.as_str().to_owned()).collect() }
    }
}

/// 开始扫描的结果
#[derive(Debug, Serialize, ToSchema)]
pub struct StartResponse {
    /// started, resumed, already_running 或 denied
    pub outcome: String,
    /// 恢复时已处理的素材数量
    pub processed: Option<usize>,
    /// 素材总数
    pub total: Option<usize>,
}

impl From<StartOutcome> for StartResponse {
    fn from(outcome: StartOutcome) -> Self {
        let (outcome, processed, total) = match outcome {
            StartOutcome::Started { total } => ("started", Some(0), Some(total)),
            StartOutcome::Resumed { processed, total } => ("resumed", Some(processed), Some(total)),
            StartOutcome::AlreadyRunning => ("already_running", None, None),
            StartOutcome::Denied => ("denied", None, None),
        };
        Self { outcome: outcome.to_owned(), processed, total }
    }
}

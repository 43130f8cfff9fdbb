use std::collections::BTreeMap;
use std::sync::Arc;

use futures::Stream;
use serde::Serialize;
use tokio::sync::watch;

use crate::asset::AssetRef;
use crate::classify::Group;
use crate::index::{GroupIndex, ScanCursor, SummaryRow, summarize};

/// 进度事件
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Progress {
    pub processed: usize,
    pub total: usize,
    pub finished: bool,
}

impl Progress {
    pub fn new(processed: usize, total: usize, finished: bool) -> Self {
        Self { processed, total, finished }
    }

    /// 完成比例，范围 `[0, 1]`
    pub fn percent(&self) -> f32 {
        if self.total == 0 {
            return 0.;
        }
        (self.processed as f32 / self.total as f32).clamp(0., 1.)
    }
}

impl From<&ScanCursor> for Progress {
    fn from(cursor: &ScanCursor) -> Self {
        Self::new(cursor.processed, cursor.total, cursor.finished)
    }
}

/// 扫描器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    Authorizing,
    Resuming,
    Starting,
    Scanning,
    Flushing,
    Finished,
}

pub type GroupsSnapshot = Arc<BTreeMap<Group, Vec<AssetRef>>>;
pub type OthersSnapshot = Arc<Vec<AssetRef>>;

/// 扫描结果的发布端
///
/// 每路数据都是“最新值 + 之后的更新”，新订阅者立即拿到当前值。
/// 订阅者拿到的是不可变快照，不会引用扫描器内部状态。
#[derive(Debug)]
pub struct ScanChannel {
    progress: watch::Sender<Progress>,
    groups: watch::Sender<GroupsSnapshot>,
    others: watch::Sender<OthersSnapshot>,
    phase: watch::Sender<Phase>,
}

impl Default for ScanChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl ScanChannel {
    pub fn new() -> Self {
        Self {
            progress: watch::Sender::new(Progress::default()),
            groups: watch::Sender::new(Arc::default()),
            others: watch::Sender::new(Arc::default()),
            phase: watch::Sender::new(Phase::Idle),
        }
    }

    pub(crate) fn publish_progress(&self, progress: Progress) {
        self.progress.send_replace(progress);
    }

    pub(crate) fn publish_results(&self, index: &GroupIndex) {
        self.groups.send_replace(Arc::new(index.groups().clone()));
        self.others.send_replace(Arc::new(index.unclassified().to_vec()));
    }

    pub(crate) fn set_phase(&self, phase: Phase) {
        self.phase.send_replace(phase);
    }

    pub fn progress(&self) -> Progress {
        *self.progress.borrow()
    }

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    pub fn groups(&self) -> GroupsSnapshot {
        self.groups.borrow().clone()
    }

    pub fn others(&self) -> OthersSnapshot {
        self.others.borrow().clone()
    }

    /// 当前快照的分组列表
    pub fn summary(&self) -> Vec<SummaryRow> {
        summarize(&self.groups.borrow(), &self.others.borrow())
    }

    /// 查询某个分组的素材，`None` 返回未分类素材，结果为最近一次发布的快照
    pub fn items_for(&self, group: Option<&Group>) -> Vec<AssetRef> {
        match group {
            Some(group) => self.groups.borrow().get(group).cloned().unwrap_or_default(),
            None => self.others.borrow().to_vec(),
        }
    }

    pub fn subscribe_progress(&self) -> watch::Receiver<Progress> {
        self.progress.subscribe()
    }

    pub fn subscribe_groups(&self) -> watch::Receiver<GroupsSnapshot> {
        self.groups.subscribe()
    }

    pub fn subscribe_others(&self) -> watch::Receiver<OthersSnapshot> {
        self.others.subscribe()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    pub fn progress_stream(&self) -> impl Stream<Item = Progress> + Send + 'static {
        replay_latest(self.subscribe_progress())
    }

    pub fn groups_stream(&self) -> impl Stream<Item = GroupsSnapshot> + Send + 'static {
        replay_latest(self.subscribe_groups())
    }

    pub fn others_stream(&self) -> impl Stream<Item = OthersSnapshot> + Send + 'static {
        replay_latest(self.subscribe_others())
    }

    pub fn phase_stream(&self) -> impl Stream<Item = Phase> + Send + 'static {
        replay_latest(self.subscribe_phase())
    }
}

/// 先产出当前值，再产出之后的每次更新；中间值可能被合并，但不会乱序
fn replay_latest<T>(mut rx: watch::Receiver<T>) -> impl Stream<Item = T> + Send + 'static
where
    T: Clone + Send + Sync + 'static,
{
    rx.mark_changed();
    futures::stream::unfold(rx, |mut rx| async move {
        rx.changed().await.ok()?;
        let value = rx.borrow_and_update().clone();
        Some((value, rx))
    })
}

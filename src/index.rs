use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::asset::AssetRef;
use crate::classify::{Classifier, Group, OTHERS_TITLE};

/// 分类结果
///
/// 每个分组内的顺序即扫描顺序。`stale` 保存分类表中已不存在的分组，
/// 这些记录不参与查询，但会原样写回，避免分类表变更后丢失数据。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupIndex {
    groups: BTreeMap<Group, Vec<AssetRef>>,
    unclassified: Vec<AssetRef>,
    stale: BTreeMap<String, Vec<AssetRef>>,
}

impl GroupIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从持久化记录构建，所有分组先视为有效，之后由 `retain_known` 清理
    pub fn from_parts(groups: BTreeMap<String, Vec<AssetRef>>, unclassified: Vec<AssetRef>) -> Self {
        let groups = groups.into_iter().map(|(k, v)| (Group::new(k), v)).collect();
        Self { groups, unclassified, stale: BTreeMap::new() }
    }

    pub fn push(&mut self, group: Option<&Group>, asset: AssetRef) {
        match group {
            Some(group) => self.groups.entry(group.clone()).or_default().push(asset),
            None => self.unclassified.push(asset),
        }
    }

    /// `None` 返回未分类素材
    pub fn items_for(&self, group: Option<&Group>) -> &[AssetRef] {
        match group {
            Some(group) => self.groups.get(group).map(Vec::as_slice).unwrap_or_default(),
            None => &self.unclassified,
        }
    }

    pub fn groups(&self) -> &BTreeMap<Group, Vec<AssetRef>> {
        &self.groups
    }

    pub fn unclassified(&self) -> &[AssetRef] {
        &self.unclassified
    }

    pub fn stale(&self) -> &BTreeMap<String, Vec<AssetRef>> {
        &self.stale
    }

    /// 所有记录（含 stale）
    pub fn entries(&self) -> impl Iterator<Item = (&str, &[AssetRef])> {
        let groups = self.groups.iter().map(|(k, v)| (k.name(), v.as_slice()));
        let stale = self.stale.iter().map(|(k, v)| (k.as_str(), v.as_slice()));
        groups.chain(stale)
    }

    /// 已分配的素材总数（含 stale）
    pub fn len(&self) -> usize {
        self.entries().map(|(_, v)| v.len()).sum::<usize>() + self.unclassified.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 已分配素材的集合
    pub fn asset_set(&self) -> HashSet<AssetRef> {
        self.entries()
            .flat_map(|(_, v)| v.iter())
            .chain(self.unclassified.iter())
            .cloned()
            .collect()
    }

    /// 把分类表中不存在的分组移到 stale，返回被移动的分组名
    pub fn retain_known(&mut self, classifier: &Classifier) -> Vec<String> {
        let unknown = self
            .groups
            .keys()
            .filter(|g| classifier.group(g.name()).is_none())
            .cloned()
            .collect::<Vec<_>>();
        for group in &unknown {
            if let Some(items) = self.groups.remove(group) {
                self.stale.entry(group.name().to_owned()).or_default().extend(items);
            }
        }
        unknown.into_iter().map(|g| g.name().to_owned()).collect()
    }

    /// 只保留 `keep` 中的素材，同一素材只保留第一次出现，返回删除的数量
    pub fn retain_assets(&mut self, keep: &HashSet<AssetRef>) -> usize {
        let before = self.len();
        let mut seen = HashSet::new();
        let mut filter = |v: &mut Vec<AssetRef>| v.retain(|a| keep.contains(a) && seen.insert(a.clone()));
        self.groups.values_mut().for_each(&mut filter);
        self.stale.values_mut().for_each(&mut filter);
        filter(&mut self.unclassified);
        self.groups.retain(|_, v| !v.is_empty());
        self.stale.retain(|_, v| !v.is_empty());
        before - self.len()
    }

    /// 见 `summarize`
    pub fn summary(&self) -> Vec<SummaryRow> {
        summarize(&self.groups, &self.unclassified)
    }
}

/// 展示用的分组列表：非空分组按名称排序，未分类固定在最后
pub fn summarize(groups: &BTreeMap<Group, Vec<AssetRef>>, unclassified: &[AssetRef]) -> Vec<SummaryRow> {
    let mut rows = groups
        .iter()
        .filter(|(_, v)| !v.is_empty())
        .map(|(g, v)| SummaryRow { title: g.name().to_uppercase(), count: v.len(), group: Some(g.clone()) })
        .collect::<Vec<_>>();
    rows.sort_by_key(|row| row.title.to_lowercase());
    if !unclassified.is_empty() {
        rows.push(SummaryRow { title: OTHERS_TITLE.to_owned(), count: unclassified.len(), group: None });
    }
    rows
}

/// 分组列表中的一行
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SummaryRow {
    pub title: String,
    pub count: usize,
    pub group: Option<Group>,
}

/// 扫描进度记录
///
/// `0 <= processed <= total`，`finished` 为真时 `processed == total`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScanCursor {
    pub total: usize,
    pub processed: usize,
    pub finished: bool,
}

impl ScanCursor {
    pub fn new(total: usize) -> Self {
        Self { total, processed: 0, finished: false }
    }

    pub fn advance(&mut self) {
        debug_assert!(self.processed < self.total);
        self.processed += 1;
    }

    pub fn is_complete(&self) -> bool {
        self.processed >= self.total
    }

    pub fn is_valid(&self) -> bool {
        self.processed <= self.total && (!self.finished || self.processed == self.total)
    }
}

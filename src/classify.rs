use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use anyhow::{Context, Result, bail, ensure};
use log::info;
use serde::{Deserialize, Serialize};

use crate::fingerprint::Fingerprint;

/// 分类表格式版本
pub const TABLE_VERSION: u32 = 1;

/// 分组名，分组集合由分类表决定
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Group(String);

impl Group {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 分类表中的一条分组规则
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupRule {
    pub name: String,
    /// 精确命中的指纹
    #[serde(default)]
    pub fingerprints: Vec<u64>,
    /// `[lo, hi)` 区间，基于 `Fingerprint::unit`
    #[serde(default)]
    pub ranges: Vec<(f64, f64)>,
}

/// 分类表
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupTable {
    pub version: u32,
    pub groups: Vec<GroupRule>,
}

impl GroupTable {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path).with_context(|| format!("读取分类表失败: {}", path.display()))?;
        serde_json::from_slice(&data).with_context(|| format!("解析分类表失败: {}", path.display()))
    }

    /// 内置分类表：a 到 t 共 20 个分组，每 0.05 的前 0.035 归属该分组，其余未分类
    pub fn builtin() -> Self {
        let groups = (b'a'..=b't')
            .enumerate()
            .map(|(i, c)| {
                let lo = i as f64 * 0.05;
                GroupRule {
                    name: (c as char).to_string(),
                    fingerprints: vec![],
                    ranges: vec![(lo, lo + 0.035)],
                }
            })
            .collect();
        Self { version: TABLE_VERSION, groups }
    }
}

/// 指纹到分组的反向索引
///
/// 精确指纹优先于区间规则，区间之间不允许重叠，因此结果与调用顺序无关。
#[derive(Debug, Clone)]
pub struct Classifier {
    groups: Vec<Group>,
    exact: HashMap<u64, usize>,
    /// 按 lo 排序的 `(lo, hi, group)`
    ranges: Vec<(f64, f64, usize)>,
}

impl Classifier {
    pub fn new(table: &GroupTable) -> Result<Self> {
        ensure!(table.version == TABLE_VERSION, "不支持的分类表版本: {}", table.version);

        let mut groups: Vec<Group> = Vec::with_capacity(table.groups.len());
        let mut exact = HashMap::new();
        let mut ranges = vec![];

        for (id, rule) in table.groups.iter().enumerate() {
            let name = rule.name.trim();
            ensure!(!name.is_empty(), "分组名不能为空");
            ensure!(!name.eq_ignore_ascii_case(OTHERS_TITLE), "分组名 {} 为保留名称", name);
            if groups.iter().any(|g| g.name().eq_ignore_ascii_case(name)) {
                bail!("重复的分组名: {}", name);
            }
            groups.push(Group::new(name));

            for &fp in &rule.fingerprints {
                if let Some(prev) = exact.insert(fp, id) {
                    if prev != id {
                        bail!("指纹 {:016x} 同时属于 {} 和 {}", fp, groups[prev], name);
                    }
                }
            }
            for &(lo, hi) in &rule.ranges {
                ensure!((0.0..1.0).contains(&lo) && lo < hi && hi <= 1.0, "无效的区间: [{lo}, {hi})");
                ranges.push((lo, hi, id));
            }
        }

        ranges.sort_by(|a, b| a.0.total_cmp(&b.0));
        for w in ranges.windows(2) {
            let (_, hi, a) = w[0];
            let (lo, _, b) = w[1];
            ensure!(lo >= hi, "分组 {} 与 {} 的区间重叠", groups[a], groups[b]);
        }

        Ok(Self { groups, exact, ranges })
    }

    /// 依次尝试 `path`，`fallback`，都不存在时使用内置分类表
    pub fn load(path: Option<&Path>, fallback: &Path) -> Result<Self> {
        let table = match path {
            Some(path) => GroupTable::from_file(path)?,
            None if fallback.exists() => GroupTable::from_file(fallback)?,
            None => GroupTable::builtin(),
        };
        let classifier = Self::new(&table)?;
        info!("加载分类表，共 {} 个分组", classifier.groups.len());
        Ok(classifier)
    }

    /// 返回 `None` 表示未分类
    pub fn classify(&self, fp: Fingerprint) -> Option<&Group> {
        let value = fp.value()?;
        if let Some(&id) = self.exact.get(&value) {
            return Some(&self.groups[id]);
        }
        let x = fp.unit()?;
        let pos = self.ranges.partition_point(|r| r.0 <= x);
        let (_, hi, id) = *self.ranges.get(pos.checked_sub(1)?)?;
        (x < hi).then(|| &self.groups[id])
    }

    /// 分类表中的所有分组，按表中顺序
    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn group(&self, name: &str) -> Option<&Group> {
        self.groups.iter().find(|g| g.name() == name)
    }
}

/// 未分类素材在展示时使用的名称
pub const OTHERS_TITLE: &str = "Others";

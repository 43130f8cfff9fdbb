use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, ensure};
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::asset::AssetRef;
use crate::config::ConfDir;
use crate::index::{GroupIndex, ScanCursor};

/// 持久化记录格式版本
pub const RECORD_VERSION: u32 = 1;

/// 一次检查点：分类结果和扫描进度
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    pub index: GroupIndex,
    pub cursor: ScanCursor,
}

/// 扫描状态存储
///
/// 每条记录的写入必须是原子的。`save` 只会被扫描器串行调用。
pub trait StateStore: Send + Sync + 'static {
    /// 读取失败或记录损坏时返回 `None`
    fn load(&self) -> Option<Checkpoint>;

    /// 先写分类结果再写进度，保证进度记录不会超前于分类结果
    fn save(&self, index: &GroupIndex, cursor: &ScanCursor) -> Result<()>;

    /// 删除所有记录
    fn clear(&self) -> Result<()>;
}

#[derive(Serialize, Deserialize)]
struct GroupIndexRecord {
    version: u32,
    groups: BTreeMap<String, Vec<AssetRef>>,
    unclassified: Vec<AssetRef>,
}

#[derive(Serialize, Deserialize)]
struct ScanStateRecord {
    version: u32,
    #[serde(flatten)]
    cursor: ScanCursor,
}

/// 基于文件的存储，`group_index` 和 `scan_state` 各为一个 JSON 文件
#[derive(Debug, Clone)]
pub struct FileStore {
    group_index: PathBuf,
    scan_state: PathBuf,
}

impl FileStore {
    pub fn new(conf_dir: &ConfDir) -> Self {
        Self { group_index: conf_dir.group_index(), scan_state: conf_dir.scan_state() }
    }

    fn load_index(&self) -> Result<GroupIndex> {
        let record: GroupIndexRecord = read_record(&self.group_index)?;
        ensure!(record.version == RECORD_VERSION, "不支持的记录版本: {}", record.version);
        Ok(GroupIndex::from_parts(record.groups, record.unclassified))
    }

    fn load_cursor(&self) -> Result<ScanCursor> {
        let record: ScanStateRecord = read_record(&self.scan_state)?;
        ensure!(record.version == RECORD_VERSION, "不支持的记录版本: {}", record.version);
        Ok(record.cursor)
    }
}

impl StateStore for FileStore {
    fn load(&self) -> Option<Checkpoint> {
        if !self.group_index.exists() && !self.scan_state.exists() {
            debug!("没有已保存的扫描状态");
            return None;
        }
        match self.load_index().and_then(|index| Ok(Checkpoint { index, cursor: self.load_cursor()? })) {
            Ok(checkpoint) => Some(checkpoint),
            Err(e) => {
                warn!("读取扫描状态失败，将重新扫描: {e:#}");
                None
            }
        }
    }

    fn save(&self, index: &GroupIndex, cursor: &ScanCursor) -> Result<()> {
        let groups = index.entries().map(|(k, v)| (k.to_owned(), v.to_vec())).collect();
        let record =
            GroupIndexRecord { version: RECORD_VERSION, groups, unclassified: index.unclassified().to_vec() };
        write_atomic(&self.group_index, &serde_json::to_vec(&record)?)?;

        let record = ScanStateRecord { version: RECORD_VERSION, cursor: *cursor };
        write_atomic(&self.scan_state, &serde_json::to_vec(&record)?)?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        for path in [&self.scan_state, &self.group_index] {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e).with_context(|| format!("删除失败: {}", path.display())),
            }
        }
        Ok(())
    }
}

fn read_record<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let data = fs::read(path).with_context(|| format!("读取失败: {}", path.display()))?;
    serde_json::from_slice(&data).with_context(|| format!("解析失败: {}", path.display()))
}

/// 先写入临时文件并落盘，再重命名覆盖目标文件
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut tmp_file = path.to_path_buf();
    tmp_file.set_extension("tmp");

    let mut file = File::create(&tmp_file).with_context(|| format!("创建失败: {}", tmp_file.display()))?;
    file.write_all(data)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp_file, path).with_context(|| format!("重命名失败: {}", path.display()))?;
    Ok(())
}

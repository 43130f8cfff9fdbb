use std::fmt;
use std::future::Future;
use std::path::PathBuf;

use anyhow::{Context, Result};
use log::{info, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::task::spawn_blocking;
use walkdir::WalkDir;

/// 素材的唯一标识，由素材源提供，索引中只保存这个值
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetRef(String);

impl AssetRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AssetRef {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// 素材源
///
/// 扫描器把 `enumerate` 的顺序当作扫描顺序，`fetch` 失败的素材会被归为未分类。
pub trait AssetSource: Send + Sync + 'static {
    /// 按稳定顺序列出当前所有素材
    fn enumerate(&self) -> impl Future<Output = Result<Vec<AssetRef>>> + Send;

    /// 读取素材内容
    fn fetch(&self, asset: &AssetRef) -> impl Future<Output = Result<Vec<u8>>> + Send;

    /// 素材总数
    fn count(&self) -> impl Future<Output = Result<usize>> + Send {
        async move {
            let assets = self.enumerate().await?;
            Ok::<_, anyhow::Error>(assets.len())
        }
    }
}

/// 授权结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authorization {
    Granted,
    Denied,
}

/// 授权提供者，每次开始扫描时调用一次
pub trait Authorizer: Send + Sync + 'static {
    fn request(&self) -> impl Future<Output = Authorization> + Send;
}

/// 总是允许
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysGrant;

impl Authorizer for AlwaysGrant {
    async fn request(&self) -> Authorization {
        Authorization::Granted
    }
}

/// 以目录是否可读作为授权结果
#[derive(Debug, Clone)]
pub struct DirectoryAccess {
    path: PathBuf,
}

impl DirectoryAccess {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Authorizer for DirectoryAccess {
    async fn request(&self) -> Authorization {
        match tokio::fs::read_dir(&self.path).await {
            Ok(_) => Authorization::Granted,
            Err(e) => {
                info!("无法访问目录 {}: {}", self.path.display(), e);
                Authorization::Denied
            }
        }
    }
}

/// 本地目录素材源，素材标识为相对于根目录的路径
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
    re_suf: Regex,
}

impl DirectorySource {
    /// `suffix` 为逗号分隔的后缀名列表，不区分大小写
    pub fn new(root: impl Into<PathBuf>, suffix: &str) -> Result<Self> {
        let re_suf = format!("(?i)^({})$", suffix.replace(',', "|"));
        let re_suf = Regex::new(&re_suf).context("无效的后缀名列表")?;
        Ok(Self { root: root.into(), re_suf })
    }
}

impl AssetSource for DirectorySource {
    async fn enumerate(&self) -> Result<Vec<AssetRef>> {
        let root = self.root.clone();
        let re_suf = self.re_suf.clone();
        spawn_blocking(move || {
            info!("开始扫描目录: {}", root.display());
            // sort_by_file_name 保证每次枚举顺序一致
            let entries = WalkDir::new(&root)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|entry| {
                    let entry = match entry {
                        Ok(entry) => entry,
                        Err(e) => {
                            warn!("读取目录失败: {e}");
                            return None;
                        }
                    };
                    if !entry.file_type().is_file() {
                        return None;
                    }
                    let ext = entry.path().extension()?;
                    if !re_suf.is_match(&ext.to_string_lossy()) {
                        return None;
                    }
                    let rel = entry.path().strip_prefix(&root).ok()?;
                    Some(AssetRef::new(rel.to_string_lossy()))
                })
                .collect::<Vec<_>>();
            info!("扫描完成，共 {} 张图片", entries.len());
            entries
        })
        .await
        .context("目录扫描任务异常退出")
    }

    async fn fetch(&self, asset: &AssetRef) -> Result<Vec<u8>> {
        let path = self.root.join(asset.as_str());
        tokio::fs::read(&path).await.with_context(|| format!("读取失败: {}", path.display()))
    }
}

use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use directories::ProjectDirs;

use crate::cli::*;
use crate::fingerprint::FingerprintAlgo;

static CONF_DIR: LazyLock<ConfDir> = LazyLock::new(|| {
    let proj_dirs = ProjectDirs::from("", "imgroup", "imgroup").expect("failed to get project dir");
    ConfDir { path: proj_dirs.config_dir().to_path_buf() }
});

fn default_config_dir() -> &'static str {
    CONF_DIR.path().to_str().unwrap_or(".")
}

fn default_prefetch() -> usize {
    num_cpus::get()
}

#[derive(Parser, Debug, Clone)]
pub struct ScanOptions {
    /// 扫描的文件后缀名，多个后缀用逗号分隔
    #[arg(short, long, default_value = "jpg,jpeg,png,heic,webp")]
    pub suffix: String,
    /// 计算素材指纹使用的算法
    #[arg(short = 'H', long, value_enum, default_value_t = FingerprintAlgo::Blake3)]
    pub hash: FingerprintAlgo,
    /// 每处理多少个素材保存一次检查点
    #[arg(long, value_name = "N", default_value_t = 10)]
    pub flush_every: usize,
    /// 同时预读的素材数量
    #[arg(long, value_name = "N", default_value_t = default_prefetch())]
    pub prefetch: usize,
    /// 分类表文件，不填则使用配置目录下的 groups.json，都不存在时使用内置分类表
    #[arg(short, long, value_name = "FILE")]
    pub groups: Option<PathBuf>,
    /// 最终检查点保存失败时的重试次数
    #[arg(long, value_name = "N", default_value_t = 3)]
    pub flush_retries: u32,
}

impl ScanOptions {
    pub fn scanner_config(&self) -> ScannerConfig {
        ScannerConfig {
            flush_every: self.flush_every.max(1),
            prefetch: self.prefetch.max(1),
            flush_retries: self.flush_retries,
            ..ScannerConfig::default()
        }
    }
}

/// 扫描器参数
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// 每处理多少个素材保存一次检查点
    pub flush_every: usize,
    /// 同时预读的素材数量
    pub prefetch: usize,
    /// 最终检查点的重试次数
    pub flush_retries: u32,
    /// 两次重试之间的等待时间
    pub retry_delay: Duration,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self { flush_every: 10, prefetch: num_cpus::get(), flush_retries: 3, retry_delay: Duration::from_millis(200) }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(name = "imgroup", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// imgroup 配置文件目录
    #[arg(short, long, default_value = default_config_dir())]
    pub conf_dir: ConfDir,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 扫描目录并对图片分组，支持断点续扫
    Scan(ScanCommand),
    /// 显示分组结果
    Show(ShowCommand),
    /// 删除已保存的扫描状态
    Clean(CleanCommand),
    /// 启动 HTTP 服务
    Server(ServerCommand),
}

#[derive(Debug, Clone)]
pub struct ConfDir {
    path: PathBuf,
}

impl ConfDir {
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// 返回分类结果文件的路径
    pub fn group_index(&self) -> PathBuf {
        self.path.join("group_index.json")
    }

    /// 返回扫描进度文件的路径
    pub fn scan_state(&self) -> PathBuf {
        self.path.join("scan_state.json")
    }

    /// 返回自定义分类表的路径
    pub fn group_table(&self) -> PathBuf {
        self.path.join("groups.json")
    }
}

impl FromStr for ConfDir {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self { path: PathBuf::from(s) })
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
}

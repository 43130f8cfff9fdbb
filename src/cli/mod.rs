mod clean;
pub mod server;
mod scan;
mod show;

use std::path::Path;

use anyhow::Result;

pub use clean::*;
pub use scan::*;
pub use server::*;
pub use show::*;

use crate::asset::{DirectoryAccess, DirectorySource};
use crate::classify::Classifier;
use crate::config::{ConfDir, Opts, OutputFormat, ScanOptions};
use crate::index::SummaryRow;
use crate::scanner::{Scanner, ScannerBuilder};
use crate::store::FileStore;

pub trait SubCommandExtend {
    fn run(&self, opts: &Opts) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;
}

/// 扫描本地目录的扫描器
pub type DirectoryScanner = Scanner<DirectorySource, DirectoryAccess>;

/// 根据命令行参数构建目录扫描器，状态保存在配置目录中
pub fn open_scanner(path: &Path, opts: &ScanOptions, conf_dir: &ConfDir) -> Result<DirectoryScanner> {
    let classifier = Classifier::load(opts.groups.as_deref(), &conf_dir.group_table())?;
    let source = DirectorySource::new(path, &opts.suffix)?;
    ScannerBuilder::new(source, DirectoryAccess::new(path), FileStore::new(conf_dir))
        .fingerprinter(opts.hash)
        .classifier(classifier)
        .config(opts.scanner_config())
        .build()
}

fn print_summary(rows: &[SummaryRow], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(rows)?),
        OutputFormat::Table => {
            for row in rows {
                println!("{}\t{}", row.title, row.count);
            }
        }
    }
    Ok(())
}

use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::Parser;
use log::warn;

use super::{SubCommandExtend, print_summary};
use crate::asset::AssetRef;
use crate::classify::Classifier;
use crate::config::{Opts, OutputFormat};
use crate::store::{Checkpoint, FileStore, StateStore};

#[derive(Parser, Debug, Clone)]
pub struct ShowCommand {
    /// 分组名，不填则列出所有分组
    pub group: Option<String>,
    /// 列出未分类的图片
    #[arg(long, conflicts_with = "group")]
    pub others: bool,
    /// 输出格式
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
    pub format: OutputFormat,
    /// 分类表文件
    #[arg(short, long, value_name = "FILE")]
    pub groups: Option<PathBuf>,
}

impl SubCommandExtend for ShowCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let Some(Checkpoint { mut index, cursor }) = FileStore::new(&opts.conf_dir).load() else {
            bail!("没有已保存的扫描结果");
        };
        let classifier = Classifier::load(self.groups.as_deref(), &opts.conf_dir.group_table())?;
        index.retain_known(&classifier);
        if !cursor.finished {
            warn!("扫描尚未完成: {}/{}", cursor.processed, cursor.total);
        }

        if self.others {
            return print_items(index.items_for(None), self.format);
        }
        match &self.group {
            Some(name) => {
                // 分组列表中显示的是大写名称
                let Some(group) = classifier.groups().iter().find(|g| g.name().eq_ignore_ascii_case(name)) else {
                    bail!("未知的分组: {name}");
                };
                print_items(index.items_for(Some(group)), self.format)
            }
            None => print_summary(&index.summary(), self.format),
        }
    }
}

fn print_items(items: &[AssetRef], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(items)?),
        OutputFormat::Table => {
            for item in items {
                println!("{item}");
            }
        }
    }
    Ok(())
}

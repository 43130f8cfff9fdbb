use anyhow::Result;
use clap::Parser;
use log::info;

use crate::cli::SubCommandExtend;
use crate::store::{FileStore, StateStore};
use crate::Opts;

#[derive(Parser, Debug, Clone)]
pub struct CleanCommand {}

impl SubCommandExtend for CleanCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        info!("删除扫描状态: {}", opts.conf_dir.path().display());
        FileStore::new(&opts.conf_dir).clear()?;
        info!("清理完成");
        Ok(())
    }
}

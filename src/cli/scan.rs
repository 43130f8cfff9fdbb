use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::Parser;
use futures::StreamExt;
use indicatif::ProgressBar;
use log::{info, warn};

use super::{SubCommandExtend, open_scanner, print_summary};
use crate::config::{Opts, OutputFormat, ScanOptions};
use crate::scanner::StartOutcome;
use crate::utils;

#[derive(Parser, Debug, Clone)]
pub struct ScanCommand {
    #[command(flatten)]
    pub scan: ScanOptions,
    /// 结果输出格式
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
    pub format: OutputFormat,
    /// 图片目录
    pub path: PathBuf,
}

impl SubCommandExtend for ScanCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let scanner = open_scanner(&self.path, &self.scan, &opts.conf_dir)?;

        match scanner.start().await? {
            StartOutcome::Denied => bail!("无法访问目录: {}", self.path.display()),
            StartOutcome::Resumed { processed, total } => info!("继续上次的扫描: {}/{}", processed, total),
            StartOutcome::Started { .. } | StartOutcome::AlreadyRunning => {}
        }

        let pb = ProgressBar::new(0).with_style(utils::pb_style());
        let bar = pb.clone();
        let mut progress = Box::pin(scanner.channel().progress_stream());
        let ticker = tokio::spawn(async move {
            while let Some(p) = progress.next().await {
                bar.set_length(p.total as u64);
                bar.set_position(p.processed as u64);
                if p.finished {
                    break;
                }
            }
        });

        tokio::select! {
            _ = scanner.wait() => {}
            _ = tokio::signal::ctrl_c() => {
                warn!("收到中断信号，正在停止扫描");
                scanner.cancel();
                scanner.wait().await;
            }
        }
        ticker.abort();
        pb.finish_and_clear();

        let progress = scanner.channel().progress();
        if scanner.cancel_handle().is_cancelled() {
            info!("扫描已中断，下次运行时从最近的检查点继续");
            return Ok(());
        }
        if !progress.finished {
            bail!("扫描未能完成: {}/{}", progress.processed, progress.total);
        }

        print_summary(&scanner.channel().summary(), self.format)
    }
}

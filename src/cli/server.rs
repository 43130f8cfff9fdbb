use std::path::PathBuf;

use clap::Parser;
use log::{error, info};
use rand::distr::{Alphanumeric, SampleString};
use tokio::net::TcpListener;

use super::open_scanner;
use crate::cli::SubCommandExtend;
use crate::config::ScanOptions;
use crate::{Opts, server};

#[derive(Parser, Debug, Clone)]
pub struct ServerCommand {
    #[command(flatten)]
    pub scan: ScanOptions,
    /// 图片目录
    pub path: PathBuf,
    /// 监听地址
    #[arg(long, default_value = "127.0.0.1:8000")]
    pub addr: String,
    /// 请求验证 token，不填则随机生成
    #[arg(long, default_value_t = String::new())]
    pub token: String,
    /// 启动后立即开始扫描
    #[arg(long)]
    pub scan_on_start: bool,
}

impl SubCommandExtend for ServerCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let scanner = open_scanner(&self.path, &self.scan, &opts.conf_dir)?;

        let mut token = self.token.clone();
        if token.is_empty() {
            token = Alphanumeric.sample_string(&mut rand::rng(), 32);
            info!("鉴权 token: {}", token);
        }

        // 创建应用状态
        let state = server::AppState::new(scanner, token);

        if self.scan_on_start {
            match state.scanner.start().await {
                Ok(outcome) => info!("开始扫描: {:?}", outcome),
                Err(e) => error!("启动扫描失败: {e:#}"),
            }
        }

        // 创建应用
        let app = server::create_app(state);

        // 启动服务器
        info!("服务器启动：http://{}", &self.addr);
        let listener = TcpListener::bind(&self.addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}

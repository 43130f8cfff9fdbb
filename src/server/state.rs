use std::sync::Arc;

use crate::cli::DirectoryScanner;

/// 应用状态
pub struct AppState {
    /// 扫描器
    pub scanner: DirectoryScanner,
    /// 鉴权 token
    pub token: String,
}

impl AppState {
    /// 创建新的应用状态
    pub fn new(scanner: DirectoryScanner, token: String) -> Arc<Self> {
        Arc::new(AppState { scanner, token })
    }

    /// 比较请求携带的 token
    pub fn check_token(&self, token: &str) -> bool {
        !self.token.is_empty() && self.token == token
    }
}

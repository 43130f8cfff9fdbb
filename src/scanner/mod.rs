//! 扫描器
//!
//! 一次扫描分为两段：调用方上下文中完成授权、枚举素材和断点恢复的判定，
//! 之后所有状态整体移交给后台任务，分类结果只在后台任务中修改。

mod channel;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::Result;
use futures::StreamExt;
use log::{debug, error, info, warn};
use tokio::sync::watch;
use tokio::task::spawn_blocking;

pub use self::channel::*;
use crate::asset::{AssetRef, AssetSource, Authorization, Authorizer};
use crate::classify::{Classifier, Group, GroupTable};
use crate::config::ScannerConfig;
use crate::fingerprint::{Fingerprint, FingerprintAlgo, Fingerprinter};
use crate::index::{GroupIndex, ScanCursor};
use crate::metrics::{self, Bucket};
use crate::store::{Checkpoint, StateStore};

/// `start` 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// 从头开始扫描
    Started { total: usize },
    /// 从检查点继续扫描
    Resumed { processed: usize, total: usize },
    /// 已有扫描正在进行，本次请求被合并
    AlreadyRunning,
    /// 未获得授权
    Denied,
}

/// 取消扫描的句柄，扫描会在处理下一个素材之前停止
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::Release);
    }
}

/// 扫描结束时清除运行标记
///
/// 移交给后台任务之前被丢弃时（例如 `start` 的 future 被取消），同时把状态恢复为 `Idle`。
struct RunningGuard {
    running: Arc<watch::Sender<bool>>,
    channel: Arc<ScanChannel>,
    handed_off: bool,
}

impl RunningGuard {
    fn new(running: Arc<watch::Sender<bool>>, channel: Arc<ScanChannel>) -> Self {
        Self { running, channel, handed_off: false }
    }

    /// 之后由后台任务负责设置最终状态
    fn hand_off(mut self) -> Self {
        self.handed_off = true;
        self
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        if !self.handed_off {
            self.channel.set_phase(Phase::Idle);
        }
        self.running.send_replace(false);
    }
}

/// 未能写盘的扫描结果，同一进程内下次 `start` 优先使用
type UnsavedSlot = Arc<Mutex<Option<Checkpoint>>>;

pub struct ScannerBuilder<S, A> {
    source: S,
    authorizer: A,
    store: Arc<dyn StateStore>,
    fingerprinter: Arc<dyn Fingerprinter>,
    classifier: Option<Classifier>,
    config: ScannerConfig,
}

impl<S: AssetSource, A: Authorizer> ScannerBuilder<S, A> {
    pub fn new(source: S, authorizer: A, store: impl StateStore) -> Self {
        Self {
            source,
            authorizer,
            store: Arc::new(store),
            fingerprinter: Arc::new(FingerprintAlgo::default()),
            classifier: None,
            config: ScannerConfig::default(),
        }
    }

    pub fn fingerprinter(mut self, fingerprinter: impl Fingerprinter) -> Self {
        self.fingerprinter = Arc::new(fingerprinter);
        self
    }

    pub fn classifier(mut self, classifier: Classifier) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn config(mut self, config: ScannerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<Scanner<S, A>> {
        let classifier = match self.classifier {
            Some(classifier) => classifier,
            None => Classifier::new(&GroupTable::builtin())?,
        };
        Ok(Scanner {
            source: Arc::new(self.source),
            authorizer: self.authorizer,
            store: self.store,
            fingerprinter: self.fingerprinter,
            classifier: Arc::new(classifier),
            config: self.config,
            channel: Arc::new(ScanChannel::new()),
            running: Arc::new(watch::Sender::new(false)),
            cancel: CancelHandle::default(),
            unsaved: UnsavedSlot::default(),
        })
    }
}

/// 扫描器
///
/// 同一时间最多只有一次扫描在进行，扫描过程中再次调用 `start` 不做任何事。
pub struct Scanner<S, A> {
    source: Arc<S>,
    authorizer: A,
    store: Arc<dyn StateStore>,
    fingerprinter: Arc<dyn Fingerprinter>,
    classifier: Arc<Classifier>,
    config: ScannerConfig,
    channel: Arc<ScanChannel>,
    running: Arc<watch::Sender<bool>>,
    cancel: CancelHandle,
    unsaved: UnsavedSlot,
}

impl<S: AssetSource, A: Authorizer> Scanner<S, A> {
    /// 开始或继续扫描
    ///
    /// 授权和恢复判定在当前任务中完成，返回时后台扫描已经启动。
    /// 枚举素材失败时返回错误，已保存的状态不受影响。
    pub async fn start(&self) -> Result<StartOutcome> {
        let acquired = self.running.send_if_modified(|running| !std::mem::replace(running, true));
        if !acquired {
            info!("扫描正在进行，忽略本次请求");
            return Ok(StartOutcome::AlreadyRunning);
        }
        // 提前返回或 future 被丢弃时由 guard 恢复为 Idle
        let guard = RunningGuard::new(self.running.clone(), self.channel.clone());
        self.cancel.reset();

        self.channel.set_phase(Phase::Authorizing);
        if self.authorizer.request().await == Authorization::Denied {
            info!("未获得授权，扫描结束");
            self.channel.publish_progress(Progress::new(0, 0, true));
            return Ok(StartOutcome::Denied);
        }

        let assets = dedup(self.source.enumerate().await?);

        let checkpoint = match self.take_unsaved() {
            Some(checkpoint) => {
                info!("使用内存中未保存的扫描结果: {}/{}", checkpoint.cursor.processed, checkpoint.cursor.total);
                Some(checkpoint)
            }
            None => {
                let store = self.store.clone();
                spawn_blocking(move || store.load()).await.unwrap_or_else(|e| {
                    warn!("读取扫描状态失败，将重新扫描: {e}");
                    None
                })
            }
        };

        let (worker, outcome) = self.prepare(assets, checkpoint);
        tokio::spawn(worker.run(guard.hand_off()));
        Ok(outcome)
    }

    fn take_unsaved(&self) -> Option<Checkpoint> {
        self.unsaved.lock().ok()?.take()
    }

    /// 决定从检查点继续还是从头开始，并立即发布当前结果
    fn prepare(&self, assets: Vec<AssetRef>, checkpoint: Option<Checkpoint>) -> (Worker<S>, StartOutcome) {
        let total = assets.len();

        let resumed = match checkpoint {
            Some(checkpoint) if !checkpoint.cursor.is_valid() => {
                warn!("检查点进度无效 {:?}，忽略进度，按分类结果继续", checkpoint.cursor);
                Some(self.reconcile(checkpoint, &assets))
            }
            Some(checkpoint) if !checkpoint.cursor.finished => Some(self.reconcile(checkpoint, &assets)),
            Some(_) => {
                info!("上次扫描已完成，重新扫描");
                None
            }
            None => None,
        };

        let (index, cursor, pending, outcome) = match resumed {
            Some(index) => {
                let done = index.asset_set();
                let pending = assets.into_iter().filter(|a| !done.contains(a)).collect::<Vec<_>>();
                let cursor = ScanCursor { total, processed: index.len(), finished: false };
                self.channel.set_phase(Phase::Resuming);
                info!("从检查点继续扫描: {}/{}", cursor.processed, total);
                (index, cursor, pending, StartOutcome::Resumed { processed: cursor.processed, total })
            }
            None => {
                self.channel.set_phase(Phase::Starting);
                info!("开始扫描，共 {} 个素材", total);
                (GroupIndex::new(), ScanCursor::new(total), assets, StartOutcome::Started { total })
            }
        };

        self.channel.publish_results(&index);
        self.channel.publish_progress(Progress::from(&cursor));

        let worker = Worker {
            source: self.source.clone(),
            store: self.store.clone(),
            fingerprinter: self.fingerprinter.clone(),
            classifier: self.classifier.clone(),
            channel: self.channel.clone(),
            cancel: self.cancel.clone(),
            config: self.config.clone(),
            unsaved: self.unsaved.clone(),
            index,
            cursor,
            pending,
        };
        (worker, outcome)
    }

    /// 校正检查点：分类结果是唯一依据，进度以其中实际存在的素材数为准
    fn reconcile(&self, checkpoint: Checkpoint, assets: &[AssetRef]) -> GroupIndex {
        let Checkpoint { mut index, cursor } = checkpoint;

        let stale = index.retain_known(&self.classifier);
        if !stale.is_empty() {
            warn!("以下分组已不在分类表中，保留但不再查询: {}", stale.join(", "));
        }

        let current = assets.iter().cloned().collect::<HashSet<_>>();
        let dropped = index.retain_assets(&current);
        if dropped > 0 {
            warn!("检查点中有 {} 个素材已不存在或重复，已移除", dropped);
        }

        if cursor.processed != index.len() {
            warn!("检查点进度 {} 与分类结果 {} 不一致，以分类结果为准", cursor.processed, index.len());
        }
        if cursor.total != assets.len() {
            info!("素材总数变化: {} -> {}", cursor.total, assets.len());
        }
        index
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// 等待当前扫描结束，没有扫描时立即返回
    pub async fn wait(&self) {
        let mut rx = self.running.subscribe();
        // 发送端由扫描器持有，不会关闭
        let _ = rx.wait_for(|running| !*running).await;
    }

    pub fn is_running(&self) -> bool {
        *self.running.borrow()
    }

    pub fn channel(&self) -> &ScanChannel {
        &self.channel
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    /// 见 `ScanChannel::items_for`
    pub fn items_for(&self, group: Option<&Group>) -> Vec<AssetRef> {
        self.channel.items_for(group)
    }
}

/// 后台扫描任务，独占分类结果和进度
struct Worker<S> {
    source: Arc<S>,
    store: Arc<dyn StateStore>,
    fingerprinter: Arc<dyn Fingerprinter>,
    classifier: Arc<Classifier>,
    channel: Arc<ScanChannel>,
    cancel: CancelHandle,
    config: ScannerConfig,
    unsaved: UnsavedSlot,
    index: GroupIndex,
    cursor: ScanCursor,
    pending: Vec<AssetRef>,
}

impl<S: AssetSource> Worker<S> {
    async fn run(mut self, _guard: RunningGuard) {
        self.channel.set_phase(Phase::Scanning);

        let source = self.source.clone();
        let fingerprinter = self.fingerprinter.clone();
        let pending = std::mem::take(&mut self.pending);

        // buffered 保证结果按枚举顺序返回
        let stream = futures::stream::iter(pending)
            .map(|asset| {
                let source = source.clone();
                let fingerprinter = fingerprinter.clone();
                async move {
                    let data = match source.fetch(&asset).await {
                        Ok(data) => Some(data),
                        Err(e) => {
                            debug!("读取素材失败 {}: {e:#}", asset);
                            None
                        }
                    };
                    let fp = spawn_blocking(move || fingerprinter.fingerprint(data.as_deref()))
                        .await
                        .unwrap_or(Fingerprint::Unknown);
                    (asset, fp)
                }
            })
            .buffered(self.config.prefetch.max(1));
        let mut stream = std::pin::pin!(stream);

        while let Some((asset, fp)) = stream.next().await {
            if self.cancel.is_cancelled() {
                break;
            }
            self.classify(asset, fp);
            if self.cursor.processed % self.config.flush_every.max(1) == 0 && !self.cursor.is_complete() {
                self.flush().await;
            }
        }

        if self.cancel.is_cancelled() {
            info!("扫描已取消: {}/{}", self.cursor.processed, self.cursor.total);
            self.keep_unsaved();
            self.channel.set_phase(Phase::Idle);
            return;
        }

        self.finish().await;
    }

    fn classify(&mut self, asset: AssetRef, fp: Fingerprint) {
        let group = self.classifier.classify(fp);
        metrics::inc_asset_count(match (group, fp) {
            (Some(_), _) => Bucket::Grouped,
            (None, Fingerprint::Unknown) => Bucket::Unknown,
            (None, _) => Bucket::Unclassified,
        });
        self.index.push(group, asset);
        self.cursor.advance();
    }

    /// 批次检查点：先发布进度再写盘，写盘失败等下一个批次重试
    async fn flush(&mut self) {
        self.channel.set_phase(Phase::Flushing);
        self.channel.publish_results(&self.index);
        self.channel.publish_progress(Progress::from(&self.cursor));
        if let Err(e) = self.persist().await {
            warn!("保存检查点失败，将在下一批次重试: {e:#}");
        }
        self.channel.set_phase(Phase::Scanning);
    }

    /// 最终检查点：写盘成功后才发布完成
    async fn finish(&mut self) {
        self.channel.set_phase(Phase::Flushing);
        self.channel.publish_results(&self.index);
        self.channel.publish_progress(Progress::from(&self.cursor));

        self.cursor.finished = true;
        for attempt in 0..=self.config.flush_retries {
            if attempt > 0 {
                tokio::time::sleep(self.config.retry_delay).await;
            }
            match self.persist().await {
                Ok(()) => {
                    info!("扫描完成，共 {} 个素材", self.cursor.total);
                    self.channel.publish_progress(Progress::from(&self.cursor));
                    self.channel.set_phase(Phase::Finished);
                    return;
                }
                Err(e) => warn!("保存最终检查点失败 ({}/{}): {e:#}", attempt + 1, self.config.flush_retries + 1),
            }
        }

        error!("无法保存最终检查点，下次启动时将继续扫描");
        self.cursor.finished = false;
        self.keep_unsaved();
        self.channel.set_phase(Phase::Idle);
    }

    /// 把未写盘的结果交还给扫描器
    fn keep_unsaved(&mut self) {
        let checkpoint = Checkpoint { index: std::mem::take(&mut self.index), cursor: self.cursor };
        match self.unsaved.lock() {
            Ok(mut slot) => *slot = Some(checkpoint),
            Err(e) => warn!("无法保留未保存的扫描结果: {e}"),
        }
    }

    async fn persist(&self) -> Result<()> {
        let store = self.store.clone();
        let index = self.index.clone();
        let cursor = self.cursor;
        let start = Instant::now();
        let result = spawn_blocking(move || store.save(&index, &cursor)).await?;
        metrics::inc_flush(result.is_ok(), start.elapsed().as_secs_f32());
        result
    }
}

/// 去掉重复的素材标识，保留第一次出现的位置
fn dedup(assets: Vec<AssetRef>) -> Vec<AssetRef> {
    let mut seen = HashSet::with_capacity(assets.len());
    let before = assets.len();
    let assets = assets.into_iter().filter(|a| seen.insert(a.clone())).collect::<Vec<_>>();
    if assets.len() != before {
        warn!("素材源中有 {} 个重复标识，已忽略", before - assets.len());
    }
    assets
}

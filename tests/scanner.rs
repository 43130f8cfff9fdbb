use std::collections::{BTreeMap, HashSet};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, bail};
use futures::StreamExt;
use rstest::*;
use tokio::sync::watch;

use imgroup::asset::{AlwaysGrant, AssetRef, AssetSource, Authorization, Authorizer};
use imgroup::classify::{Classifier, Group, GroupRule, GroupTable, TABLE_VERSION};
use imgroup::config::{ConfDir, ScannerConfig};
use imgroup::fingerprint::Fingerprinter;
use imgroup::index::{GroupIndex, ScanCursor};
use imgroup::scanner::{CancelHandle, Phase, Progress, Scanner, ScannerBuilder, StartOutcome};
use imgroup::store::{Checkpoint, FileStore, StateStore};

const TOTAL: usize = 25;

/// 素材 `imgNN` 的内容就是数字 `NN`
#[derive(Clone, Default)]
struct MemSource {
    assets: Vec<AssetRef>,
    missing: HashSet<AssetRef>,
    /// 读取到第 n 个素材时取消扫描
    cancel_at: Arc<Mutex<Option<(u64, CancelHandle)>>>,
    /// 为 false 时读取会一直等待
    gate: Option<watch::Receiver<bool>>,
}

impl MemSource {
    fn new(n: usize) -> Self {
        Self { assets: (0..n).map(asset).collect(), ..Default::default() }
    }

    fn cancel_at(&self, n: u64, handle: CancelHandle) {
        *self.cancel_at.lock().unwrap() = Some((n, handle));
    }
}

impl AssetSource for MemSource {
    async fn enumerate(&self) -> Result<Vec<AssetRef>> {
        Ok(self.assets.clone())
    }

    async fn fetch(&self, asset: &AssetRef) -> Result<Vec<u8>> {
        if let Some(gate) = &self.gate {
            let mut gate = gate.clone();
            gate.wait_for(|open| *open).await?;
        }
        let n = asset.as_str().trim_start_matches("img");
        {
            let mut cancel_at = self.cancel_at.lock().unwrap();
            if matches!(&*cancel_at, Some((at, _)) if n.parse::<u64>().ok() == Some(*at)) {
                if let Some((_, handle)) = cancel_at.take() {
                    handle.cancel();
                }
            }
        }
        if self.missing.contains(asset) {
            bail!("asset unavailable: {asset}");
        }
        Ok(n.as_bytes().to_vec())
    }
}

struct DenyAll;

/// 授权请求一直不返回
struct NeverAnswers;

impl Authorizer for NeverAnswers {
    async fn request(&self) -> Authorization {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Authorization::Granted
    }
}

impl Authorizer for DenyAll {
    async fn request(&self) -> Authorization {
        Authorization::Denied
    }
}

/// 把内容当作十进制数字
struct NumberHash;

impl Fingerprinter for NumberHash {
    fn hash_bytes(&self, data: &[u8]) -> Result<u64> {
        Ok(std::str::from_utf8(data)?.parse()?)
    }
}

#[derive(Default)]
struct MemStoreInner {
    saved: Mutex<Option<Checkpoint>>,
    /// 每次成功保存的进度
    history: Mutex<Vec<ScanCursor>>,
    attempts: AtomicUsize,
    fail_next: AtomicUsize,
    fail_final: AtomicBool,
    /// 读取检查点时记录扫描器所处的阶段
    phase: Mutex<Option<watch::Receiver<Phase>>>,
    phase_at_load: Mutex<Vec<Phase>>,
}

#[derive(Clone, Default)]
struct MemStore(Arc<MemStoreInner>);

impl MemStore {
    fn with(index: GroupIndex, cursor: ScanCursor) -> Self {
        let store = Self::default();
        *store.0.saved.lock().unwrap() = Some(Checkpoint { index, cursor });
        store
    }

    fn saved(&self) -> Option<Checkpoint> {
        self.0.saved.lock().unwrap().clone()
    }

    fn history(&self) -> Vec<usize> {
        self.0.history.lock().unwrap().iter().map(|c| c.processed).collect()
    }

    fn attempts(&self) -> usize {
        self.0.attempts.load(Ordering::SeqCst)
    }

    fn watch_phase(&self, phase: watch::Receiver<Phase>) {
        *self.0.phase.lock().unwrap() = Some(phase);
    }

    fn phase_at_load(&self) -> Vec<Phase> {
        self.0.phase_at_load.lock().unwrap().clone()
    }
}

impl StateStore for MemStore {
    fn load(&self) -> Option<Checkpoint> {
        if let Some(phase) = &*self.0.phase.lock().unwrap() {
            self.0.phase_at_load.lock().unwrap().push(*phase.borrow());
        }
        self.saved()
    }

    fn save(&self, index: &GroupIndex, cursor: &ScanCursor) -> Result<()> {
        self.0.attempts.fetch_add(1, Ordering::SeqCst);
        if self.0.fail_next.load(Ordering::SeqCst) > 0 {
            self.0.fail_next.fetch_sub(1, Ordering::SeqCst);
            bail!("disk full");
        }
        if cursor.finished && self.0.fail_final.load(Ordering::SeqCst) {
            bail!("disk full");
        }
        *self.0.saved.lock().unwrap() = Some(Checkpoint { index: index.clone(), cursor: *cursor });
        self.0.history.lock().unwrap().push(*cursor);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.0.saved.lock().unwrap() = None;
        Ok(())
    }
}

fn asset(i: usize) -> AssetRef {
    AssetRef::new(format!("img{i:02}"))
}

fn assets(range: std::ops::Range<usize>) -> Vec<AssetRef> {
    range.map(asset).collect()
}

fn food() -> Group {
    Group::new("food")
}

fn travel() -> Group {
    Group::new("travel")
}

/// 0..10 为 food，20..25 为 travel，其余未分类
#[fixture]
fn classifier() -> Classifier {
    let table = GroupTable {
        version: TABLE_VERSION,
        groups: vec![
            GroupRule { name: "food".into(), fingerprints: (0..10).collect(), ranges: vec![] },
            GroupRule { name: "travel".into(), fingerprints: (20..25).collect(), ranges: vec![] },
        ],
    };
    Classifier::new(&table).unwrap()
}

#[fixture]
fn config() -> ScannerConfig {
    ScannerConfig { flush_every: 10, prefetch: 4, flush_retries: 2, retry_delay: Duration::from_millis(1) }
}

fn scanner<A: Authorizer>(
    source: MemSource,
    authorizer: A,
    store: impl StateStore,
    classifier: Classifier,
    config: ScannerConfig,
) -> Scanner<MemSource, A> {
    ScannerBuilder::new(source, authorizer, store)
        .fingerprinter(NumberHash)
        .classifier(classifier)
        .config(config)
        .build()
        .unwrap()
}

async fn run<A: Authorizer>(scanner: &Scanner<MemSource, A>) -> StartOutcome {
    let outcome = scanner.start().await.unwrap();
    tokio::time::timeout(Duration::from_secs(10), scanner.wait()).await.unwrap();
    outcome
}

fn assert_full_result<A: Authorizer>(scanner: &Scanner<MemSource, A>) {
    assert_eq!(scanner.items_for(Some(&food())), assets(0..10));
    assert_eq!(scanner.items_for(None), assets(10..20));
    assert_eq!(scanner.items_for(Some(&travel())), assets(20..25));
    assert_eq!(scanner.channel().progress(), Progress::new(TOTAL, TOTAL, true));
    assert_eq!(scanner.channel().phase(), Phase::Finished);
}

#[rstest]
#[tokio::test]
async fn full_scan(classifier: Classifier, config: ScannerConfig) {
    let store = MemStore::default();
    let scanner = scanner(MemSource::new(TOTAL), AlwaysGrant, store.clone(), classifier, config);

    assert_eq!(run(&scanner).await, StartOutcome::Started { total: TOTAL });
    assert_full_result(&scanner);

    let saved = store.saved().unwrap();
    assert_eq!(saved.cursor, ScanCursor { total: TOTAL, processed: TOTAL, finished: true });
    assert_eq!(saved.index.items_for(Some(&food())), assets(0..10).as_slice());
    assert_eq!(store.history(), vec![10, 20, 25]);
}

#[rstest]
#[tokio::test]
async fn progress_is_monotonic(classifier: Classifier, config: ScannerConfig) {
    let config = ScannerConfig { flush_every: 3, ..config };
    let scanner = scanner(MemSource::new(TOTAL), AlwaysGrant, MemStore::default(), classifier, config);
    let mut stream = Box::pin(scanner.channel().progress_stream());

    scanner.start().await.unwrap();
    let mut seen = vec![];
    let collect = async {
        while let Some(p) = stream.next().await {
            seen.push(p);
            if p.finished {
                break;
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(10), collect).await.unwrap();

    assert!(seen.windows(2).all(|w| w[0].processed <= w[1].processed));
    assert_eq!(seen.last(), Some(&Progress::new(TOTAL, TOTAL, true)));
    assert_eq!(seen.iter().filter(|p| p.finished).count(), 1);
}

#[rstest]
#[tokio::test]
async fn partition_invariant(classifier: Classifier, config: ScannerConfig) {
    let scanner = scanner(MemSource::new(TOTAL), AlwaysGrant, MemStore::default(), classifier, config);
    run(&scanner).await;

    let mut all = scanner.items_for(None);
    for group in scanner.classifier().groups() {
        all.extend(scanner.items_for(Some(group)));
    }
    let unique = all.iter().cloned().collect::<HashSet<_>>();
    assert_eq!(all.len(), TOTAL);
    assert_eq!(unique, assets(0..TOTAL).into_iter().collect());
}

#[rstest]
#[tokio::test]
async fn unavailable_asset_is_unclassified(classifier: Classifier, config: ScannerConfig) {
    let mut source = MemSource::new(TOTAL);
    source.missing.insert(asset(3));
    let scanner = scanner(source, AlwaysGrant, MemStore::default(), classifier, config);
    run(&scanner).await;

    let mut expected_food = assets(0..10);
    expected_food.remove(3);
    assert_eq!(scanner.items_for(Some(&food())), expected_food);
    assert_eq!(scanner.items_for(None).first(), Some(&asset(3)));
    assert_eq!(scanner.channel().progress(), Progress::new(TOTAL, TOTAL, true));
}

#[rstest]
#[tokio::test]
async fn interrupted_scan_resumes_from_last_flush(classifier: Classifier, config: ScannerConfig) {
    let config = ScannerConfig { prefetch: 1, ..config };
    let store = MemStore::default();
    let source = MemSource::new(TOTAL);
    let first = scanner(source.clone(), AlwaysGrant, store.clone(), classifier.clone(), config.clone());
    source.cancel_at(12, first.cancel_handle());

    assert_eq!(run(&first).await, StartOutcome::Started { total: TOTAL });
    assert_eq!(first.channel().phase(), Phase::Idle);
    assert!(!first.channel().progress().finished);
    let saved = store.saved().unwrap();
    assert_eq!(saved.cursor, ScanCursor { total: TOTAL, processed: 10, finished: false });
    assert_eq!(saved.index.len(), 10);
    drop(first);

    let second = scanner(source, AlwaysGrant, store.clone(), classifier, config);
    assert_eq!(run(&second).await, StartOutcome::Resumed { processed: 10, total: TOTAL });
    assert_full_result(&second);
    assert_eq!(store.saved().unwrap().index.len(), TOTAL);
}

#[rstest]
#[tokio::test]
async fn resume_with_file_store_matches_single_pass(
    classifier: Classifier,
    config: ScannerConfig,
) -> Result<()> {
    let config = ScannerConfig { prefetch: 1, flush_every: 5, ..config };
    let dir = tempfile::TempDir::new()?;
    let conf_dir = ConfDir::from_str(dir.path().to_str().unwrap())?;

    let source = MemSource::new(TOTAL);
    let first = scanner(source.clone(), AlwaysGrant, FileStore::new(&conf_dir), classifier.clone(), config.clone());
    source.cancel_at(17, first.cancel_handle());
    run(&first).await;
    drop(first);

    let saved = FileStore::new(&conf_dir).load().unwrap();
    assert_eq!(saved.cursor.processed, 15);

    let second = scanner(source, AlwaysGrant, FileStore::new(&conf_dir), classifier.clone(), config.clone());
    assert_eq!(run(&second).await, StartOutcome::Resumed { processed: 15, total: TOTAL });
    assert_full_result(&second);

    let single = scanner(MemSource::new(TOTAL), AlwaysGrant, MemStore::default(), classifier, config);
    run(&single).await;
    assert_eq!(*second.channel().groups(), *single.channel().groups());
    assert_eq!(*second.channel().others(), *single.channel().others());
    Ok(())
}

#[rstest]
#[tokio::test]
async fn finished_checkpoint_starts_fresh(classifier: Classifier, config: ScannerConfig) {
    let store = MemStore::default();
    let first = scanner(MemSource::new(TOTAL), AlwaysGrant, store.clone(), classifier.clone(), config.clone());
    run(&first).await;

    let second = scanner(MemSource::new(TOTAL), AlwaysGrant, store.clone(), classifier, config);
    assert_eq!(run(&second).await, StartOutcome::Started { total: TOTAL });
    assert_full_result(&second);
    assert_eq!(store.saved().unwrap().index.len(), TOTAL);

    // 同一个扫描器再次开始也是完整的新扫描
    assert_eq!(run(&second).await, StartOutcome::Started { total: TOTAL });
    assert_full_result(&second);
}

#[rstest]
#[tokio::test]
async fn cursor_ahead_of_index_is_clamped(classifier: Classifier, config: ScannerConfig) {
    let mut index = GroupIndex::new();
    for a in assets(0..5) {
        index.push(Some(&food()), a);
    }
    let store = MemStore::with(index, ScanCursor { total: TOTAL, processed: 12, finished: false });
    let scanner = scanner(MemSource::new(TOTAL), AlwaysGrant, store.clone(), classifier, config);

    assert_eq!(run(&scanner).await, StartOutcome::Resumed { processed: 5, total: TOTAL });
    assert_full_result(&scanner);
}

#[rstest]
#[tokio::test]
async fn invalid_cursor_is_discarded(classifier: Classifier, config: ScannerConfig) {
    let mut index = GroupIndex::new();
    for a in assets(0..5) {
        index.push(Some(&food()), a);
    }
    // 标记为完成但进度不足，不能当作已完成的扫描
    let store = MemStore::with(index, ScanCursor { total: TOTAL, processed: 3, finished: true });
    let scanner = scanner(MemSource::new(TOTAL), AlwaysGrant, store.clone(), classifier, config);

    assert_eq!(run(&scanner).await, StartOutcome::Resumed { processed: 5, total: TOTAL });
    assert_full_result(&scanner);
    assert_eq!(store.history(), vec![10, 20, 25]);
}

#[rstest]
#[tokio::test]
async fn index_ahead_of_cursor_is_adopted(classifier: Classifier, config: ScannerConfig) {
    let mut index = GroupIndex::new();
    for a in assets(0..10) {
        index.push(Some(&food()), a);
    }
    for a in assets(10..12) {
        index.push(None, a);
    }
    let store = MemStore::with(index, ScanCursor { total: 30, processed: 10, finished: false });
    let scanner = scanner(MemSource::new(TOTAL), AlwaysGrant, store.clone(), classifier, config);

    assert_eq!(run(&scanner).await, StartOutcome::Resumed { processed: 12, total: TOTAL });
    assert_full_result(&scanner);
    assert_eq!(store.saved().unwrap().cursor, ScanCursor { total: TOTAL, processed: TOTAL, finished: true });
}

#[rstest]
#[tokio::test]
async fn vanished_assets_are_dropped(classifier: Classifier, config: ScannerConfig) {
    let mut index = GroupIndex::new();
    index.push(Some(&food()), asset(0));
    index.push(None, AssetRef::from("deleted"));
    let store = MemStore::with(index, ScanCursor { total: 26, processed: 2, finished: false });
    let scanner = scanner(MemSource::new(TOTAL), AlwaysGrant, store, classifier, config);

    assert_eq!(run(&scanner).await, StartOutcome::Resumed { processed: 1, total: TOTAL });
    assert_full_result(&scanner);
}

#[rstest]
#[tokio::test]
async fn resume_republishes_saved_results(classifier: Classifier, config: ScannerConfig) {
    let mut index = GroupIndex::new();
    for a in assets(0..10) {
        index.push(Some(&food()), a);
    }
    let store = MemStore::with(index, ScanCursor { total: TOTAL, processed: 10, finished: false });
    let (open, gate) = watch::channel(false);
    let source = MemSource { gate: Some(gate), ..MemSource::new(TOTAL) };
    let scanner = scanner(source, AlwaysGrant, store, classifier, config);

    assert_eq!(scanner.start().await.unwrap(), StartOutcome::Resumed { processed: 10, total: TOTAL });
    assert_eq!(scanner.items_for(Some(&food())), assets(0..10));
    assert_eq!(scanner.channel().progress(), Progress::new(10, TOTAL, false));

    open.send_replace(true);
    tokio::time::timeout(Duration::from_secs(10), scanner.wait()).await.unwrap();
    assert_full_result(&scanner);
}

#[rstest]
#[tokio::test]
async fn resuming_phase_only_for_resumed_scans(classifier: Classifier, config: ScannerConfig) {
    let (open, gate) = watch::channel(false);
    let source = MemSource { gate: Some(gate), ..MemSource::new(TOTAL) };
    let store = MemStore::default();
    let fresh = scanner(source.clone(), AlwaysGrant, store.clone(), classifier.clone(), config.clone());
    store.watch_phase(fresh.channel().subscribe_phase());

    assert_eq!(fresh.start().await.unwrap(), StartOutcome::Started { total: TOTAL });
    assert_eq!(fresh.channel().phase(), Phase::Starting);
    assert_eq!(store.phase_at_load(), vec![Phase::Authorizing]);
    open.send_replace(true);
    tokio::time::timeout(Duration::from_secs(10), fresh.wait()).await.unwrap();
    assert_full_result(&fresh);

    let mut index = GroupIndex::new();
    index.push(Some(&food()), asset(0));
    let store = MemStore::with(index, ScanCursor { total: TOTAL, processed: 1, finished: false });
    open.send_replace(false);
    let resumed = scanner(source, AlwaysGrant, store.clone(), classifier, config);
    store.watch_phase(resumed.channel().subscribe_phase());

    assert_eq!(resumed.start().await.unwrap(), StartOutcome::Resumed { processed: 1, total: TOTAL });
    assert_eq!(resumed.channel().phase(), Phase::Resuming);
    assert_eq!(store.phase_at_load(), vec![Phase::Authorizing]);
    open.send_replace(true);
    tokio::time::timeout(Duration::from_secs(10), resumed.wait()).await.unwrap();
    assert_full_result(&resumed);
}

#[rstest]
#[tokio::test]
async fn stale_groups_stay_inert(classifier: Classifier, config: ScannerConfig) {
    let mut groups = BTreeMap::new();
    groups.insert("pets".to_owned(), vec![asset(3)]);
    let index = GroupIndex::from_parts(groups, vec![]);
    let store = MemStore::with(index, ScanCursor { total: TOTAL, processed: 1, finished: false });
    let scanner = scanner(MemSource::new(TOTAL), AlwaysGrant, store.clone(), classifier, config);

    assert_eq!(run(&scanner).await, StartOutcome::Resumed { processed: 1, total: TOTAL });
    assert!(scanner.items_for(Some(&Group::new("pets"))).is_empty());
    assert!(!scanner.items_for(Some(&food())).contains(&asset(3)));
    assert!(scanner.channel().summary().iter().all(|row| row.title != "PETS"));

    let saved = store.saved().unwrap();
    assert_eq!(saved.index.stale()["pets"], vec![asset(3)]);
    assert_eq!(saved.index.len(), TOTAL);
    assert!(saved.cursor.finished);
}

#[rstest]
#[tokio::test]
async fn denied_leaves_store_untouched(classifier: Classifier, config: ScannerConfig) {
    let mut index = GroupIndex::new();
    index.push(Some(&food()), asset(0));
    let cursor = ScanCursor { total: TOTAL, processed: 1, finished: false };
    let store = MemStore::with(index.clone(), cursor);
    let scanner = scanner(MemSource::new(TOTAL), DenyAll, store.clone(), classifier, config);

    assert_eq!(run(&scanner).await, StartOutcome::Denied);
    assert_eq!(scanner.channel().progress(), Progress::new(0, 0, true));
    assert_eq!(scanner.channel().phase(), Phase::Idle);
    assert!(!scanner.is_running());
    assert_eq!(store.attempts(), 0);
    assert_eq!(store.saved(), Some(Checkpoint { index, cursor }));
}

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_start_is_coalesced(classifier: Classifier, config: ScannerConfig) {
    let (open, gate) = watch::channel(false);
    let source = MemSource { gate: Some(gate), ..MemSource::new(TOTAL) };
    let store = MemStore::default();
    let scanner = scanner(source, AlwaysGrant, store.clone(), classifier, config);

    assert_eq!(scanner.start().await.unwrap(), StartOutcome::Started { total: TOTAL });
    assert!(scanner.is_running());
    assert_eq!(scanner.start().await.unwrap(), StartOutcome::AlreadyRunning);
    assert_eq!(scanner.start().await.unwrap(), StartOutcome::AlreadyRunning);

    open.send_replace(true);
    tokio::time::timeout(Duration::from_secs(10), scanner.wait()).await.unwrap();
    assert!(!scanner.is_running());
    assert_full_result(&scanner);
    assert_eq!(store.history(), vec![10, 20, 25]);
}

#[rstest]
#[tokio::test]
async fn failed_batch_flush_is_retried_at_next_boundary(
    classifier: Classifier,
    config: ScannerConfig,
) {
    let config = ScannerConfig { flush_every: 5, ..config };
    let store = MemStore::default();
    store.0.fail_next.store(1, Ordering::SeqCst);
    let scanner = scanner(MemSource::new(TOTAL), AlwaysGrant, store.clone(), classifier, config);

    run(&scanner).await;
    assert_full_result(&scanner);
    assert_eq!(store.history(), vec![10, 15, 20, 25]);
    assert_eq!(store.attempts(), 5);
}

#[rstest]
#[tokio::test]
async fn finish_is_announced_only_after_commit(classifier: Classifier, config: ScannerConfig) {
    let store = MemStore::default();
    store.0.fail_final.store(true, Ordering::SeqCst);
    let scanner = scanner(MemSource::new(TOTAL), AlwaysGrant, store.clone(), classifier, config);
    let mut stream = Box::pin(scanner.channel().progress_stream());

    run(&scanner).await;
    assert_eq!(scanner.channel().progress(), Progress::new(TOTAL, TOTAL, false));
    assert_eq!(scanner.channel().phase(), Phase::Idle);
    // 两次批次检查点 + 1 次最终检查点 + 2 次重试
    assert_eq!(store.attempts(), 5);
    assert_eq!(store.saved().unwrap().cursor, ScanCursor { total: TOTAL, processed: 20, finished: false });
    assert_eq!(stream.next().await, Some(Progress::new(TOTAL, TOTAL, false)));

    store.0.fail_final.store(false, Ordering::SeqCst);
    assert_eq!(run(&scanner).await, StartOutcome::Resumed { processed: TOTAL, total: TOTAL });
    assert_full_result(&scanner);
}

#[rstest]
#[tokio::test]
async fn uncommitted_results_are_kept_for_next_start(classifier: Classifier, config: ScannerConfig) {
    let store = MemStore::default();
    store.0.fail_final.store(true, Ordering::SeqCst);
    let scanner = scanner(MemSource::new(TOTAL), AlwaysGrant, store.clone(), classifier, config);
    run(&scanner).await;
    assert_eq!(store.saved().unwrap().cursor.processed, 20);

    store.0.fail_final.store(false, Ordering::SeqCst);
    let attempts = store.attempts();
    assert_eq!(scanner.start().await.unwrap(), StartOutcome::Resumed { processed: TOTAL, total: TOTAL });
    // 重新开始时不会退回到上一次写盘的进度
    assert_eq!(scanner.channel().progress(), Progress::new(TOTAL, TOTAL, false));
    assert_eq!(scanner.items_for(Some(&travel())), assets(20..25));

    tokio::time::timeout(Duration::from_secs(10), scanner.wait()).await.unwrap();
    assert_full_result(&scanner);
    assert_eq!(store.attempts(), attempts + 1);
    assert_eq!(store.saved().unwrap().cursor, ScanCursor { total: TOTAL, processed: TOTAL, finished: true });
}

#[rstest]
#[tokio::test]
async fn cancelled_scan_resumes_in_process(classifier: Classifier, config: ScannerConfig) {
    let config = ScannerConfig { prefetch: 1, ..config };
    let store = MemStore::default();
    let source = MemSource::new(TOTAL);
    let scanner = scanner(source.clone(), AlwaysGrant, store.clone(), classifier, config);
    source.cancel_at(12, scanner.cancel_handle());

    run(&scanner).await;
    assert_eq!(store.saved().unwrap().cursor.processed, 10);

    assert_eq!(run(&scanner).await, StartOutcome::Resumed { processed: 12, total: TOTAL });
    assert_full_result(&scanner);
    assert_eq!(store.history(), vec![10, 20, 25]);
}

#[rstest]
#[tokio::test]
async fn dropped_start_returns_to_idle(classifier: Classifier, config: ScannerConfig) {
    let store = MemStore::default();
    let scanner = scanner(MemSource::new(TOTAL), NeverAnswers, store.clone(), classifier, config);

    assert!(tokio::time::timeout(Duration::from_millis(50), scanner.start()).await.is_err());
    assert!(!scanner.is_running());
    assert_eq!(scanner.channel().phase(), Phase::Idle);
    assert_eq!(store.attempts(), 0);

    // 运行标记已释放，新的请求不会被当作重复请求
    let again = tokio::time::timeout(Duration::from_millis(50), scanner.start()).await;
    assert!(again.is_err());
    assert_eq!(scanner.channel().phase(), Phase::Idle);
}

#[rstest]
#[tokio::test]
async fn empty_source_finishes(classifier: Classifier, config: ScannerConfig) {
    let store = MemStore::default();
    let scanner = scanner(MemSource::new(0), AlwaysGrant, store.clone(), classifier, config);

    assert_eq!(run(&scanner).await, StartOutcome::Started { total: 0 });
    assert_eq!(scanner.channel().progress(), Progress::new(0, 0, true));
    assert_eq!(scanner.channel().phase(), Phase::Finished);
    assert_eq!(store.saved().unwrap().cursor, ScanCursor { total: 0, processed: 0, finished: true });
}

#[rstest]
#[tokio::test]
async fn duplicate_identifiers_are_scanned_once(classifier: Classifier, config: ScannerConfig) {
    let mut source = MemSource::new(TOTAL);
    source.assets.insert(5, asset(2));
    let scanner = scanner(source, AlwaysGrant, MemStore::default(), classifier, config);

    assert_eq!(run(&scanner).await, StartOutcome::Started { total: TOTAL });
    assert_full_result(&scanner);
}

#[rstest]
#[tokio::test]
async fn late_subscriber_sees_current_results(classifier: Classifier, config: ScannerConfig) {
    let scanner = scanner(MemSource::new(TOTAL), AlwaysGrant, MemStore::default(), classifier, config);
    run(&scanner).await;

    let mut groups = Box::pin(scanner.channel().groups_stream());
    let snapshot = groups.next().await.unwrap();
    assert_eq!(snapshot[&travel()], assets(20..25));
    let mut others = Box::pin(scanner.channel().others_stream());
    assert_eq!(others.next().await.unwrap().len(), 10);
    let mut progress = Box::pin(scanner.channel().progress_stream());
    assert_eq!(progress.next().await, Some(Progress::new(TOTAL, TOTAL, true)));
    let mut phase = Box::pin(scanner.channel().phase_stream());
    assert_eq!(phase.next().await, Some(Phase::Finished));
}

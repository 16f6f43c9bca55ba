//! 卫星注册表（GC）：引用计数 + LRU + TTL 的原生句柄缓存。
//!
//! # 模块定位（Why）
//! - 原生库的逐星初始化代价高昂，注册表负责摊销：同一编目号的重复请求
//!   复用既有句柄；容量达到上限时按 LRU 回收闲置句柄；长期无人问津的
//!   句柄由后台清扫器按 TTL 回收；
//! - 注册表是原生目录的进程内镜像，二者必须对“哪些卫星已加载”达成一致，
//!   不一致时以原生目录为准。
//!
//! # 借用协议（What）
//! - [`SatelliteRegistry::acquire`] 返回 [`SatLease`]：句柄 + 键级读锁 +
//!   引用计数的单次释放能力；`Drop` 即释放，所有退出路径（成功、错误、
//!   取消）都会归还，且对“过度释放”幂等（计数为零时再减为空操作）；
//! - `refs > 0` 的条目对 LRU 与 TTL 驱逐免疫；
//! - 全部条目在用时允许临时超过容量上限——这是显式的无背压策略：在全局
//!   串行器之下没有别的在途请求能释放槽位，等待只会死锁。
//!
//! # 锁序（How）
//! - 借用与销毁一律按 目录锁 → 键级锁 → 映射微临界区 → 门闸许可 的顺序
//!   获取；销毁在目录锁与键级写锁内对 `refs == 0` 做双重校验，输掉竞态时
//!   静默跳过。

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{Notify, OwnedRwLockReadGuard, OwnedRwLockWriteGuard};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use vega_core::config::RegistryOptions;
use vega_core::contract::CallContext;
use vega_core::error::{VegaError, codes};
use vega_core::tle::parse_catalog_number;

use crate::adapter::{SatKey, check_rc};
use crate::gate::{EngineError, EngineGate};
use crate::locks::KeyLockTable;

/// 等待引用计数归零时的轮询周期。
const RELEASE_POLL_PERIOD: Duration = Duration::from_millis(10);

/// 注册表层错误。
#[derive(Debug, Error)]
pub enum RegistryError {
    /// 注册表已关闭，不再受理借用。
    #[error("satellite registry is closed")]
    Closed,
    /// TLE 第一行的编目号字段被拒绝。
    #[error("catalog number rejected: {0}")]
    Catalog(#[source] VegaError),
    /// 原生加载（add 或 init）失败，未留下条目。
    #[error("loading satellite {sat_num} failed: {source}")]
    Load {
        sat_num: u32,
        #[source]
        source: EngineError,
    },
    /// 门闸层错误（含许可等待被取消）。
    #[error(transparent)]
    Engine(#[from] EngineError),
    /// 在注册表的等待点观察到取消。
    #[error("call cancelled while waiting on the registry")]
    Cancelled,
}

impl From<RegistryError> for VegaError {
    fn from(value: RegistryError) -> Self {
        match value {
            RegistryError::Closed => {
                VegaError::new(codes::REGISTRY_CLOSED, "satellite registry is closed")
            }
            RegistryError::Catalog(err) => err,
            RegistryError::Load { sat_num, source } => {
                let inner = VegaError::from(source);
                VegaError::new(
                    inner.code(),
                    format!("loading satellite {sat_num} failed: {}", inner.message()),
                )
            }
            RegistryError::Engine(err) => err.into(),
            RegistryError::Cancelled => VegaError::new(
                codes::CALL_CANCELLED,
                "call cancelled while waiting on the registry",
            ),
        }
    }
}

/// 注册表的记账单元。
#[derive(Clone, Copy, Debug)]
struct SatelliteEntry {
    key: SatKey,
    sat_num: u32,
    last_used: Instant,
    refs: u32,
}

/// 对外暴露的条目快照，供诊断与测试断言。
#[derive(Clone, Copy, Debug)]
pub struct EntryStats {
    pub key: SatKey,
    pub sat_num: u32,
    pub refs: u32,
    pub idle: Duration,
}

struct RegistryShared {
    gate: Arc<EngineGate>,
    locks: KeyLockTable,
    /// 目录级互斥：跨“原生存在性检查 + 创建/销毁序列”持有，保持短暂。
    catalog_mu: tokio::sync::Mutex<()>,
    /// 注册表映射的微临界区；持有期间不做任何 `await`。
    loaded: Mutex<HashMap<SatKey, SatelliteEntry>>,
    opts: RegistryOptions,
    shutdown: Notify,
    closed: AtomicBool,
}

/// 卫星注册表。
///
/// # 教案式说明
/// - **意图 (Why)**：独占持有全部 [`SatelliteEntry`] 与对应原生句柄；
///   处理器从不拥有条目，只通过 [`acquire`](Self::acquire) 借用；
/// - **契约 (What)**：
///   - 同一句柄任意时刻至多一个条目；注册表与原生目录对“已加载”达成一致；
///   - `refs >= 0` 恒成立，静止时全部为零；
///   - [`close`](Self::close) 停止清扫器并等待其退出，之后的借用以
///     [`RegistryError::Closed`] 拒绝；
/// - **风险 (Trade-offs)**：驱逐中的原生移除失败被吞掉（记日志），条目仍被
///   删除——比起原生目录里多一颗僵尸卫星，卡死一个注册表槽位更有害。
pub struct SatelliteRegistry {
    shared: Arc<RegistryShared>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl SatelliteRegistry {
    /// 创建注册表并启动 TTL 清扫器。`options` 在此规范化。
    ///
    /// 清扫器通过 `tokio::spawn` 启动，调用方必须处于 Tokio 运行时内。
    pub fn new(gate: Arc<EngineGate>, options: RegistryOptions) -> Self {
        let shared = Arc::new(RegistryShared {
            gate,
            locks: KeyLockTable::new(),
            catalog_mu: tokio::sync::Mutex::new(()),
            loaded: Mutex::new(HashMap::new()),
            opts: options.normalized(),
            shutdown: Notify::new(),
            closed: AtomicBool::new(false),
        });
        let sweeper = spawn_sweeper(Arc::clone(&shared));
        Self {
            shared,
            sweeper: Mutex::new(Some(sweeper)),
        }
    }

    /// 借用一颗卫星：已加载则复用，未加载则（可能先驱逐再）加载并初始化。
    ///
    /// # 教案式说明
    /// - **执行 (How)**：
    ///   1. 解析第一行的编目号；
    ///   2. 目录锁内询问原生目录是否已加载；
    ///   3. 命中：取键级读锁、放目录锁、`refs += 1` 并刷新 `last_used`；
    ///      注册表缺失对应条目时采纳原生目录视图补插；
    ///   4. 未命中：放目录锁、触发 `evict_lru(1)`（低于上限时为空操作）、
    ///      重取目录锁、原生 add + init（init 在键级写锁内），插入
    ///      `refs = 1` 的条目，写锁降级为读锁后返回；
    /// - **契约 (What)**：返回的 [`SatLease`] 在 `Drop` 时完成单次释放；
    ///   加载失败不留条目，且尽力撤销已入 TLE 层的卫星；
    /// - **取消 (What)**：取消在门闸许可等待处生效；已经开始的原生调用
    ///   运行到底。
    pub async fn acquire(
        &self,
        ctx: &CallContext,
        line1: &str,
        line2: &str,
    ) -> Result<SatLease, RegistryError> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(RegistryError::Closed);
        }
        let sat_num = parse_catalog_number(line1).map_err(RegistryError::Catalog)?;
        let shared = Arc::clone(&self.shared);

        let catalog = shared.catalog_mu.lock().await;
        let existing = shared
            .gate
            .with_call(ctx, |e| Ok(e.sat_key_of(sat_num)))
            .await?;
        if let Some(key) = existing {
            let lock = shared.locks.lock_for(key);
            let guard = lock.read_owned().await;
            drop(catalog);
            {
                let mut map = shared.loaded.lock();
                let now = Instant::now();
                let entry = map.entry(key).or_insert_with(|| {
                    warn!(
                        %key,
                        sat_num,
                        "registry entry missing for a natively loaded satellite; adopting the native view"
                    );
                    SatelliteEntry {
                        key,
                        sat_num,
                        last_used: now,
                        refs: 0,
                    }
                });
                entry.refs += 1;
                entry.last_used = now;
            }
            debug!(%key, sat_num, "satellite cache hit");
            return Ok(SatLease {
                shared,
                key,
                sat_num,
                guard: Some(guard),
            });
        }

        // 原生目录没有这颗卫星：清掉注册表里可能残留的陈旧条目（以原生为准）。
        {
            let mut map = shared.loaded.lock();
            let stale: Vec<SatKey> = map
                .values()
                .filter(|entry| entry.sat_num == sat_num)
                .map(|entry| entry.key)
                .collect();
            for key in stale {
                warn!(%key, sat_num, "dropping stale registry entry absent from the native catalog");
                map.remove(&key);
            }
        }
        drop(catalog);

        self.evict_lru(1).await;

        let catalog = shared.catalog_mu.lock().await;
        let key = shared
            .gate
            .with_call(ctx, |e| e.add_sat_from_lines(line1, line2))
            .await
            .map_err(|source| RegistryError::Load { sat_num, source })?;
        let lock = shared.locks.lock_for(key);
        let write = lock.write_owned().await;
        if let Err(source) = shared
            .gate
            .with_call(ctx, |e| check_rc(e.init_sat(key)))
            .await
        {
            // 初始化失败：尽力撤销已入 TLE 层的卫星，避免半初始化句柄滞留。
            let bg = CallContext::background();
            if let Err(err) = shared
                .gate
                .with_call(&bg, |e| check_rc(e.remove_sat_tle(key)))
                .await
            {
                warn!(%key, sat_num, error = %err, "TLE removal after failed init also failed");
            }
            drop(write);
            drop(catalog);
            return Err(RegistryError::Load { sat_num, source });
        }
        {
            let mut map = shared.loaded.lock();
            map.insert(
                key,
                SatelliteEntry {
                    key,
                    sat_num,
                    last_used: Instant::now(),
                    refs: 1,
                },
            );
        }
        let guard = OwnedRwLockWriteGuard::downgrade(write);
        drop(catalog);
        debug!(%key, sat_num, "satellite loaded and initialised");
        Ok(SatLease {
            shared,
            key,
            sat_num,
            guard: Some(guard),
        })
    }

    /// 为 `need` 个新条目腾出空间；低于上限时为空操作。
    ///
    /// - **契约 (What)**：只驱逐 `refs == 0` 的条目，按 `last_used` 升序选出
    ///   恰好超额的数量；候选不足时接受部分驱逐——注册表被显式允许在全员
    ///   在用时临时超限，任何调用者都不为容量等待；
    /// - **执行 (How)**：快照与选择在映射微临界区内完成，逐个销毁走
    ///   双重校验路径，输掉竞态的候选被静默跳过。
    pub async fn evict_lru(&self, need: usize) -> Vec<SatKey> {
        let victims = {
            let map = self.shared.loaded.lock();
            lru_victims(&map, need, self.shared.opts.max_loaded)
        };
        let mut evicted = Vec::new();
        for key in victims {
            if self.shared.remove_entry(key).await {
                debug!(%key, "evicted idle satellite to make room");
                evicted.push(key);
            }
        }
        evicted
    }

    /// 停止清扫器并等待其退出；随后的借用以 [`RegistryError::Closed`] 拒绝。
    pub async fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        // notify_one 会存下一个许可：清扫器即便正处于一轮清扫中，回到
        // select 时也能立即观察到关闭信号。
        self.shared.shutdown.notify_one();
        let handle = self.sweeper.lock().take();
        if let Some(handle) = handle {
            if handle.await.is_err() {
                warn!("registry sweeper terminated abnormally");
            }
        }
    }

    /// 轮询直到所有条目 `refs == 0`，或上下文取消。
    pub async fn wait_all_released(&self, ctx: &CallContext) -> Result<(), RegistryError> {
        loop {
            if self.all_released() {
                return Ok(());
            }
            tokio::select! {
                _ = ctx.cancelled() => return Err(RegistryError::Cancelled),
                _ = tokio::time::sleep(RELEASE_POLL_PERIOD) => {}
            }
        }
    }

    /// 持目录锁等待引用计数排空，然后在两层一并清空原生目录与注册表。
    pub async fn remove_all(&self, ctx: &CallContext) -> Result<(), RegistryError> {
        let shared = &self.shared;
        let _catalog = shared.catalog_mu.lock().await;
        loop {
            if self.all_released() {
                break;
            }
            tokio::select! {
                _ = ctx.cancelled() => return Err(RegistryError::Cancelled),
                _ = tokio::time::sleep(RELEASE_POLL_PERIOD) => {}
            }
        }
        shared
            .gate
            .with_call(ctx, |e| check_rc(e.remove_all_propagator()))
            .await?;
        shared
            .gate
            .with_call(ctx, |e| check_rc(e.remove_all_tle()))
            .await?;
        shared.loaded.lock().clear();
        debug!("registry cleared at both native layers");
        Ok(())
    }

    /// 当前条目数。
    pub fn len(&self) -> usize {
        self.shared.loaded.lock().len()
    }

    /// 注册表是否为空。
    pub fn is_empty(&self) -> bool {
        self.shared.loaded.lock().is_empty()
    }

    /// 条目快照，供诊断与测试断言。
    pub fn loaded(&self) -> Vec<EntryStats> {
        let now = Instant::now();
        self.shared
            .loaded
            .lock()
            .values()
            .map(|entry| EntryStats {
                key: entry.key,
                sat_num: entry.sat_num,
                refs: entry.refs,
                idle: now.saturating_duration_since(entry.last_used),
            })
            .collect()
    }

    /// 按编目号查询引用计数。
    pub fn refs_of(&self, sat_num: u32) -> Option<u32> {
        self.shared
            .loaded
            .lock()
            .values()
            .find(|entry| entry.sat_num == sat_num)
            .map(|entry| entry.refs)
    }

    fn all_released(&self) -> bool {
        self.shared.loaded.lock().values().all(|entry| entry.refs == 0)
    }
}

impl std::fmt::Debug for SatelliteRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SatelliteRegistry")
            .field("loaded", &self.len())
            .field("max_loaded", &self.shared.opts.max_loaded)
            .finish()
    }
}

impl RegistryShared {
    /// 双重校验的条目销毁：目录锁 + 键级写锁内复查 `refs == 0`。
    ///
    /// 原生两层移除失败都只记日志——条目无论如何被删除，防止槽位卡死。
    async fn remove_entry(self: &Arc<Self>, key: SatKey) -> bool {
        let _catalog = self.catalog_mu.lock().await;
        let lock = self.locks.lock_for(key);
        let _write = lock.write_owned().await;
        {
            let map = self.loaded.lock();
            match map.get(&key) {
                Some(entry) if entry.refs == 0 => {}
                // 并发借用赢得竞态，或条目已被他人移除：静默跳过。
                _ => return false,
            }
        }
        let bg = CallContext::background();
        if let Err(err) = self
            .gate
            .with_call(&bg, |e| check_rc(e.remove_sat_propagator(key)))
            .await
        {
            warn!(%key, error = %err, "propagator-layer removal failed; dropping the entry anyway");
        }
        if let Err(err) = self
            .gate
            .with_call(&bg, |e| check_rc(e.remove_sat_tle(key)))
            .await
        {
            warn!(%key, error = %err, "TLE-layer removal failed; dropping the entry anyway");
        }
        self.loaded.lock().remove(&key);
        true
    }

    /// 单轮 TTL 清扫：收集闲置超限的候选，逐个走双重校验销毁。
    async fn sweep_once(self: &Arc<Self>) {
        let now = Instant::now();
        let expired: Vec<SatKey> = {
            let map = self.loaded.lock();
            map.values()
                .filter(|entry| {
                    entry.refs == 0
                        && now.saturating_duration_since(entry.last_used) > self.opts.idle_ttl()
                })
                .map(|entry| entry.key)
                .collect()
        };
        for key in expired {
            if self.remove_entry(key).await {
                debug!(%key, "swept idle satellite past its TTL");
            }
        }
    }
}

/// LRU 选择：`refs == 0` 的候选按 `last_used` 升序取恰好超额的数量。
///
/// 纯函数，便于对选择规则做性质验证。
fn lru_victims(
    map: &HashMap<SatKey, SatelliteEntry>,
    need: usize,
    max_loaded: usize,
) -> Vec<SatKey> {
    let excess = (map.len() + need).saturating_sub(max_loaded);
    if excess == 0 {
        return Vec::new();
    }
    let mut candidates: Vec<(Instant, SatKey)> = map
        .values()
        .filter(|entry| entry.refs == 0)
        .map(|entry| (entry.last_used, entry.key))
        .collect();
    candidates.sort_by_key(|(last_used, _)| *last_used);
    candidates.truncate(excess);
    candidates.into_iter().map(|(_, key)| key).collect()
}

fn spawn_sweeper(shared: Arc<RegistryShared>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(shared.opts.sweep_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // interval 的首个 tick 立即完成，先消费掉，避免启动即清扫。
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shared.shutdown.notified() => break,
                _ = ticker.tick() => {}
            }
            if shared.closed.load(Ordering::Acquire) {
                break;
            }
            shared.sweep_once().await;
        }
        debug!("registry sweeper stopped");
    })
}

/// 卫星借用凭据：句柄 + 键级读锁 + 单次释放能力。
///
/// # 教案式说明
/// - **意图 (Why)**：把“引用计数递减 + 读锁释放”绑成一个一次性能力，
///   处理器的任何退出路径（成功、错误、取消）都经由 `Drop` 完成归还，
///   无须在各分支手工清理；
/// - **契约 (What)**：
///   - 释放恰好一次；条目已不存在时的递减为空操作而非下溢；
///   - 读锁与计数的释放顺序为先计数后读锁，清扫器拿到写锁后的复查
///     因此总能看到最新计数；
/// - **风险 (Trade-offs)**：凭据存活期间对应键的驱逐会阻塞在写锁上，
///   调用方应在传播结束后尽快丢弃。
pub struct SatLease {
    shared: Arc<RegistryShared>,
    key: SatKey,
    sat_num: u32,
    guard: Option<OwnedRwLockReadGuard<()>>,
}

impl SatLease {
    /// 原生句柄。
    pub fn key(&self) -> SatKey {
        self.key
    }

    /// 编目号。
    pub fn sat_num(&self) -> u32 {
        self.sat_num
    }

    /// 显式释放；与直接丢弃等价，提供语义化的调用点。
    pub fn release(self) {
        drop(self);
    }
}

impl std::fmt::Debug for SatLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SatLease")
            .field("key", &self.key)
            .field("sat_num", &self.sat_num)
            .finish()
    }
}

impl Drop for SatLease {
    fn drop(&mut self) {
        {
            let mut map = self.shared.loaded.lock();
            if let Some(entry) = map.get_mut(&self.key) {
                entry.refs = entry.refs.saturating_sub(1);
                entry.last_used = Instant::now();
            }
        }
        self.guard.take();
    }
}

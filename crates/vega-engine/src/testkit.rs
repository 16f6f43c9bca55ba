//! 确定性测试引擎。
//!
//! # 模块定位（Why）
//! - 真实原生库是进程级全局状态的 C ABI 封装，不适合进入测试依赖图；
//!   门闸、注册表与流式管线需要的只是一个行为可预测、可注入失败、
//!   可断言调用次数与并发度的 [`PropagationEngine`] 实现；
//! - 轨道取圆轨道解析解：位置/速度随时间连续且单调可检，足以支撑
//!   “分片时间有界、点列单调、计数一致”这类契约断言。
//!
//! # 行为约定（What）
//! - 编目号解析复用生产解析器；重复添加同一编目号返回既有句柄；
//! - 失败注入均为一次性开关（`fail_next_*`），触发后自动复位；
//! - 每次调用都记录进出，[`MockEngine::max_concurrency`] 给出历史最大
//!   并发度——门闸契约的直接观测点。

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use vega_core::model::Frame;
use vega_core::time::MINUTES_PER_DAY;
use vega_core::tle::parse_catalog_number;

use crate::adapter::{
    EngineInfo, EphemStep, NEXT_START_EPSILON_DAYS, PropagationEngine, RC_ALLOC_FAILURE, RC_OK,
    SatKey, TimeRef,
};

/// 圆轨道半径（km），约合 400 km 高度的近地轨道。
const ORBIT_RADIUS_KM: f64 = 6_778.0;

/// 轨道周期（分钟）。
const ORBIT_PERIOD_MIN: f64 = 92.0;

/// 所有测试卫星共用的根数历元（DS50 天）。
const EPOCH_DS50: f64 = 27_000.0;

/// 动态步长（哨兵 -1）下测试引擎自选的输出节奏（分钟）。
const DYNAMIC_STEP_MIN: f64 = 1.0;

/// 按编目号拼出一对形状合理的 TLE 行，供各层测试复用。
pub fn tle_lines(sat_num: u32) -> (String, String) {
    let field = if sat_num <= 99_999 {
        format!("{sat_num:05}")
    } else {
        let letter = (b'A' + ((sat_num / 10_000) - 10) as u8) as char;
        format!("{letter}{:04}", sat_num % 10_000)
    };
    (
        format!("1 {field}U 98067A   21275.52543210  .00005945  00000-0  11517-3 0  9992"),
        format!("2 {field}  51.6443 263.0484 0004084 141.8231 354.9682 15.48861755305415"),
    )
}

/// 续传判定容忍（天）。远小于任何现实步长，又远大于 DS50 量级下
/// `f64` 的最小进位，使续传起点与上次末点可靠地对上号。
const RESUME_TOLERANCE_DAYS: f64 = 1e-9;

#[derive(Debug)]
struct MockSat {
    sat_num: u32,
    initialized: bool,
    /// 生成器的逐星状态：上一次发出的末点时刻。
    ///
    /// 续传起点 `last + ε` 在 DS50 量级下可能被 `f64` 吸收为 `last` 本身，
    /// 与真实原生生成器一致地依靠逐星状态识别续传，避免重发末点。
    last_emitted: Option<f64>,
}

#[derive(Debug, Default)]
struct MockState {
    sats: HashMap<i64, MockSat>,
    by_num: HashMap<u32, i64>,
    next_key: i64,
}

/// 一次性失败注入开关。
#[derive(Debug, Default)]
struct FailurePlan {
    add_rc: Option<i32>,
    init_rc: Option<i32>,
    prop_rc: Option<i32>,
    ephem_rc: Option<i32>,
    remove_propagator_rc: Option<i32>,
    remove_tle_rc: Option<i32>,
    alloc_failure: bool,
}

/// 各原生操作的调用次数快照。
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct CallCounts {
    pub add: usize,
    pub init: usize,
    pub prop: usize,
    pub ephem: usize,
    pub remove_propagator: usize,
    pub remove_tle: usize,
    pub remove_all_propagator: usize,
    pub remove_all_tle: usize,
}

/// 确定性测试引擎。
///
/// # 教案式说明
/// - **契约 (What)**：实现 [`PropagationEngine`] 的全部操作；行为确定、
///   与真实时钟无关；
/// - **观测点 (What)**：[`calls`](Self::calls) 返回调用计数，
///   [`max_concurrency`](Self::max_concurrency) 返回历史最大并发度，
///   [`is_loaded`](Self::is_loaded) / [`loaded_count`](Self::loaded_count)
///   暴露目录视图；
/// - **风险 (Trade-offs)**：内部以 `parking_lot::Mutex` 自护，即便门闸
///   失守也不会出现数据竞争——并发违规通过 `max_concurrency` 显形，而非
///   未定义行为。
#[derive(Debug, Default)]
pub struct MockEngine {
    state: Mutex<MockState>,
    failures: Mutex<FailurePlan>,
    last_error: Mutex<String>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    counts: Mutex<CallCounts>,
}

/// 调用进出窗口，`Drop` 时退场。
struct CallWindow<'a> {
    engine: &'a MockEngine,
}

impl Drop for CallWindow<'_> {
    fn drop(&mut self) {
        self.engine.active.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockEngine {
    /// 创建空目录的测试引擎。
    pub fn new() -> Self {
        Self::default()
    }

    /// 下一次 `add_sat_from_lines` 返回 `rc`。
    pub fn fail_next_add(&self, rc: i32) {
        self.failures.lock().add_rc = Some(rc);
    }

    /// 下一次 `init_sat` 返回 `rc`。
    pub fn fail_next_init(&self, rc: i32) {
        self.failures.lock().init_rc = Some(rc);
    }

    /// 下一次 `prop_all` 返回 `rc`。
    pub fn fail_next_prop(&self, rc: i32) {
        self.failures.lock().prop_rc = Some(rc);
    }

    /// 下一次 `gen_ephems` 返回 `rc`（`count = 0`）。
    pub fn fail_next_ephem(&self, rc: i32) {
        self.failures.lock().ephem_rc = Some(rc);
    }

    /// 下一次 `remove_sat_propagator` 返回 `rc`。
    pub fn fail_next_remove_propagator(&self, rc: i32) {
        self.failures.lock().remove_propagator_rc = Some(rc);
    }

    /// 下一次 `remove_sat_tle` 返回 `rc`。
    pub fn fail_next_remove_tle(&self, rc: i32) {
        self.failures.lock().remove_tle_rc = Some(rc);
    }

    /// 下一次 `gen_ephems` 模拟输出缓冲分配失败（rc = -10）。
    pub fn fail_next_alloc(&self) {
        self.failures.lock().alloc_failure = true;
    }

    /// 写入全局 last-error 槽。
    pub fn set_last_error(&self, message: &str) {
        *self.last_error.lock() = message.to_string();
    }

    /// 调用计数快照。
    pub fn calls(&self) -> CallCounts {
        *self.counts.lock()
    }

    /// 历史最大并发调用数；门闸契约下应恒为 1。
    pub fn max_concurrency(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    /// 编目号是否仍在目录中。
    pub fn is_loaded(&self, sat_num: u32) -> bool {
        self.state.lock().by_num.contains_key(&sat_num)
    }

    /// 目录中的卫星数量。
    pub fn loaded_count(&self) -> usize {
        self.state.lock().sats.len()
    }

    fn enter(&self) -> CallWindow<'_> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        CallWindow { engine: self }
    }

    /// 圆轨道解析解：返回 `[t_ds50, t_mse, x, y, z, vx, vy, vz]`。
    fn state_at(t_ds50: f64) -> [f64; 8] {
        let mse = (t_ds50 - EPOCH_DS50) * MINUTES_PER_DAY;
        let angle = (mse / ORBIT_PERIOD_MIN) * std::f64::consts::TAU;
        let speed = ORBIT_RADIUS_KM * std::f64::consts::TAU / (ORBIT_PERIOD_MIN * 60.0);
        [
            t_ds50,
            mse,
            ORBIT_RADIUS_KM * angle.cos(),
            ORBIT_RADIUS_KM * angle.sin(),
            0.0,
            -speed * angle.sin(),
            speed * angle.cos(),
            0.0,
        ]
    }
}

impl PropagationEngine for MockEngine {
    fn info(&self) -> EngineInfo {
        let _window = self.enter();
        EngineInfo {
            astro: "MockAstroLib v1.0 (deterministic)".to_string(),
            sgp4: "MockSgp4 v1.0 (circular orbit)".to_string(),
        }
    }

    fn add_sat_from_lines(&self, line1: &str, _line2: &str) -> Result<SatKey, i32> {
        let _window = self.enter();
        self.counts.lock().add += 1;
        if let Some(rc) = self.failures.lock().add_rc.take() {
            return Err(rc);
        }
        let sat_num = match parse_catalog_number(line1) {
            Ok(num) => num,
            Err(err) => {
                *self.last_error.lock() = err.message().to_string();
                return Err(-1);
            }
        };
        let mut state = self.state.lock();
        if let Some(existing) = state.by_num.get(&sat_num) {
            return Ok(SatKey::new(*existing));
        }
        state.next_key += 1;
        let key = state.next_key;
        state.sats.insert(
            key,
            MockSat {
                sat_num,
                initialized: false,
                last_emitted: None,
            },
        );
        state.by_num.insert(sat_num, key);
        Ok(SatKey::new(key))
    }

    fn sat_key_of(&self, sat_num: u32) -> Option<SatKey> {
        let _window = self.enter();
        self.state.lock().by_num.get(&sat_num).copied().map(SatKey::new)
    }

    fn init_sat(&self, key: SatKey) -> i32 {
        let _window = self.enter();
        self.counts.lock().init += 1;
        if let Some(rc) = self.failures.lock().init_rc.take() {
            *self.last_error.lock() = format!("forced init failure rc {rc}");
            return rc;
        }
        let mut state = self.state.lock();
        match state.sats.get_mut(&key.value()) {
            Some(sat) => {
                sat.initialized = true;
                RC_OK
            }
            None => {
                drop(state);
                *self.last_error.lock() = format!("satellite key {key} not found");
                -2
            }
        }
    }

    fn remove_sat_propagator(&self, key: SatKey) -> i32 {
        let _window = self.enter();
        self.counts.lock().remove_propagator += 1;
        if let Some(rc) = self.failures.lock().remove_propagator_rc.take() {
            *self.last_error.lock() = format!("forced propagator removal failure rc {rc}");
            return rc;
        }
        let mut state = self.state.lock();
        match state.sats.get_mut(&key.value()) {
            Some(sat) => {
                sat.initialized = false;
                RC_OK
            }
            None => -2,
        }
    }

    fn remove_sat_tle(&self, key: SatKey) -> i32 {
        let _window = self.enter();
        self.counts.lock().remove_tle += 1;
        if let Some(rc) = self.failures.lock().remove_tle_rc.take() {
            *self.last_error.lock() = format!("forced TLE removal failure rc {rc}");
            return rc;
        }
        let mut state = self.state.lock();
        match state.sats.remove(&key.value()) {
            Some(sat) => {
                state.by_num.remove(&sat.sat_num);
                RC_OK
            }
            None => -2,
        }
    }

    fn remove_all_propagator(&self) -> i32 {
        let _window = self.enter();
        self.counts.lock().remove_all_propagator += 1;
        let mut state = self.state.lock();
        for sat in state.sats.values_mut() {
            sat.initialized = false;
        }
        RC_OK
    }

    fn remove_all_tle(&self) -> i32 {
        let _window = self.enter();
        self.counts.lock().remove_all_tle += 1;
        let mut state = self.state.lock();
        state.sats.clear();
        state.by_num.clear();
        RC_OK
    }

    fn prop_all(&self, key: SatKey, at: TimeRef) -> Result<[f64; 8], i32> {
        let _window = self.enter();
        self.counts.lock().prop += 1;
        if let Some(rc) = self.failures.lock().prop_rc.take() {
            *self.last_error.lock() = format!("forced propagation failure rc {rc}");
            return Err(rc);
        }
        {
            let state = self.state.lock();
            match state.sats.get(&key.value()) {
                Some(sat) if sat.initialized => {}
                Some(_) => {
                    drop(state);
                    *self.last_error.lock() = format!("satellite key {key} is not initialised");
                    return Err(-3);
                }
                None => {
                    drop(state);
                    *self.last_error.lock() = format!("satellite key {key} not found");
                    return Err(-2);
                }
            }
        }
        let t_ds50 = match at {
            TimeRef::Ds50(t) => t,
            TimeRef::MinutesSinceEpoch(mse) => EPOCH_DS50 + mse / MINUTES_PER_DAY,
        };
        Ok(Self::state_at(t_ds50))
    }

    fn gen_ephems(
        &self,
        key: SatKey,
        start_ds50: f64,
        stop_ds50: f64,
        step_minutes: f64,
        _frame: Frame,
        chunk_cap: usize,
    ) -> EphemStep {
        let _window = self.enter();
        self.counts.lock().ephem += 1;
        {
            let mut failures = self.failures.lock();
            if failures.alloc_failure {
                failures.alloc_failure = false;
                return EphemStep {
                    rc: RC_ALLOC_FAILURE,
                    ..EphemStep::default()
                };
            }
            if let Some(rc) = failures.ephem_rc.take() {
                *self.last_error.lock() = format!("forced ephemeris failure rc {rc}");
                return EphemStep {
                    rc,
                    ..EphemStep::default()
                };
            }
        }
        let mut state = self.state.lock();
        let last_emitted = match state.sats.get(&key.value()) {
            Some(sat) if sat.initialized => sat.last_emitted,
            _ => {
                drop(state);
                *self.last_error.lock() = format!("satellite key {key} is not usable");
                return EphemStep {
                    rc: -2,
                    ..EphemStep::default()
                };
            }
        };

        let step_days = if step_minutes < 0.0 {
            DYNAMIC_STEP_MIN / MINUTES_PER_DAY
        } else {
            step_minutes / MINUTES_PER_DAY
        };
        // 续传识别：起点落在上次末点的容忍带内时从下一格继续，
        // 其余情况按新网格自起点（含）生成。
        let (anchor, mut index) = match last_emitted {
            Some(last) if (start_ds50 - last).abs() <= RESUME_TOLERANCE_DAYS => (last, 1usize),
            _ => (start_ds50, 0usize),
        };

        let mut flat = Vec::new();
        let mut last = anchor;
        let mut done = true;
        loop {
            let t = anchor + index as f64 * step_days;
            // 皮秒级容忍，吸收浮点步进的量化误差。
            if t > stop_ds50 + 1e-12 {
                break;
            }
            if flat.len() / 7 == chunk_cap {
                done = false;
                break;
            }
            flat.extend_from_slice(&Self::state_at(t));
            last = t;
            index += 1;
        }
        let count = flat.len() / 7;
        if count > 0 {
            if let Some(sat) = state.sats.get_mut(&key.value()) {
                sat.last_emitted = Some(last);
            }
        }
        EphemStep {
            flat,
            count,
            next_start: last + NEXT_START_EPSILON_DAYS,
            done,
            rc: RC_OK,
        }
    }

    fn last_error_message(&self) -> String {
        self.last_error.lock().clone()
    }
}

//! 原生引擎适配层。
//!
//! # 模块定位（Why）
//! - 原生传播库以 C ABI 暴露函数式接口：整型句柄、返回码、全局 last-error
//!   槽与调用方预留的输出缓冲。本模块把这层约定收敛为一个值语义的 Rust
//!   trait —— 所有输入在边界复制、所有输出以自有缓冲返回，原生细节不再
//!   向上渗透；
//! - trait 保持同步：原生调用从不挂起，异步表面（许可等待、取消）完全由
//!   [`crate::gate::EngineGate`] 拥有。
//!
//! # 契约要点（What）
//! - 所有操作跨门闸不可重入；默认配置下任意时刻至多一次原生调用在执行；
//! - 返回码 `0` 表示成功；[`RC_ALLOC_FAILURE`]（-10）专指输出缓冲分配失败；
//! - [`PropagationEngine::gen_ephems`] 为每次调用预留 `chunk_cap × 7` 个
//!   `f64` 的输出缓冲并返回实际点数；续传起点由适配层按
//!   [`NEXT_START_EPSILON_DAYS`] 推进，保证严格前进、不重发末点。

use std::fmt;

use vega_core::model::Frame;
use vega_core::time::SECONDS_PER_DAY;

/// 原生引擎为一颗已初始化卫星返回的不透明整型句柄。
///
/// - **契约 (What)**：在条目生命周期内稳定；跨进程重启无任何含义；
/// - **风险 (Trade-offs)**：新类型封装阻止与编目号（`u32`）的意外混用。
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct SatKey(i64);

impl SatKey {
    /// 由原生返回值构造。
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    /// 取出原生层使用的原始值。
    pub const fn value(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for SatKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 原生库的识别串。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EngineInfo {
    /// 天体力学主库的版本与构建信息。
    pub astro: String,
    /// SGP4 传播库的版本与构建信息。
    pub sgp4: String,
}

/// 单点传播的时刻表达。
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TimeRef {
    /// 根数历元起算分钟数。
    MinutesSinceEpoch(f64),
    /// DS50 天数。
    Ds50(f64),
}

/// 一次星历分片调用的完整产出。
///
/// # 教案式说明
/// - **契约 (What)**：
///   - `flat`：`count × 7` 个 `f64`，按 `(t, x, y, z, vx, vy, vz)` 排列；
///   - `next_start`：续传起点，= 最后发出点的时刻 + ε；
///   - `done`：区间已经走完，调用方停止续传；
///   - `rc`：原生返回码；`rc != 0` 且 `count == 0` 时调用方应读取
///     last-error 并中止，`rc != 0` 且 `count > 0` 表示部分成功可继续；
/// - **风险 (Trade-offs)**：rc 内嵌在结构里而不是 `Result`，因为“部分成功”
///   是该原生调用的合法产出形态。
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EphemStep {
    pub flat: Vec<f64>,
    pub count: usize,
    pub next_start: f64,
    pub done: bool,
    pub rc: i32,
}

/// 成功返回码。
pub const RC_OK: i32 = 0;

/// 输出缓冲分配失败的返回码。
pub const RC_ALLOC_FAILURE: i32 = -10;

/// 分片续传起点相对最后发出点的前进量：1 纳秒换算为天。
///
/// 不加 ε 会让下一分片重发上一分片的末点。
pub const NEXT_START_EPSILON_DAYS: f64 = 1e-9 / SECONDS_PER_DAY;

/// 将裸返回码折叠为 `Result`，供只关心成败的原生调用使用。
pub fn check_rc(rc: i32) -> Result<(), i32> {
    if rc == RC_OK { Ok(()) } else { Err(rc) }
}

/// 原生传播库的类型化边界。
///
/// # 教案式说明
/// - **意图 (Why)**：注册表与编排层只面对这个 trait；真实实现包装 C ABI，
///   测试实现提供确定性轨道，两者在门闸之下不可区分；
/// - **契约 (What)**：
///   - 实现必须 `Send + Sync`——共享引用会跨线程传递，但互斥由门闸保证，
///     实现内部无须再做串行化；
///   - `add_sat_from_lines` 与 `prop_all` 以 `Err(rc)` 报告失败，其余
///     以裸 rc 返回交由调用方折叠；
///   - `last_error_message` 读取进程级 last-error 槽，必须在门闸的专用
///     错误锁内调用，避免并发读互相覆盖现场；
/// - **风险 (Trade-offs)**：trait 同步意味着长耗时的原生调用会占住一个
///   运行时线程；默认单许可配置下这正是期望的全序语义。
pub trait PropagationEngine: Send + Sync + 'static {
    /// 库识别串。
    fn info(&self) -> EngineInfo;

    /// 以两行根数向 TLE 层添加卫星，返回句柄。
    fn add_sat_from_lines(&self, line1: &str, line2: &str) -> Result<SatKey, i32>;

    /// 查询编目号是否已加载；未加载返回 `None`。
    fn sat_key_of(&self, sat_num: u32) -> Option<SatKey>;

    /// 初始化传播器层的逐星状态。
    fn init_sat(&self, key: SatKey) -> i32;

    /// 从传播器层移除卫星。
    fn remove_sat_propagator(&self, key: SatKey) -> i32;

    /// 从 TLE 层移除卫星。
    fn remove_sat_tle(&self, key: SatKey) -> i32;

    /// 清空传播器层。
    fn remove_all_propagator(&self) -> i32;

    /// 清空 TLE 层。
    fn remove_all_tle(&self) -> i32;

    /// 单点传播，返回八元组 `[t_ds50, t_mse, x, y, z, vx, vy, vz]`。
    fn prop_all(&self, key: SatKey, at: TimeRef) -> Result<[f64; 8], i32>;

    /// 生成一个星历分片；语义见 [`EphemStep`]。
    fn gen_ephems(
        &self,
        key: SatKey,
        start_ds50: f64,
        stop_ds50: f64,
        step_minutes: f64,
        frame: Frame,
        chunk_cap: usize,
    ) -> EphemStep;

    /// 读取全局 last-error 槽。
    fn last_error_message(&self) -> String;
}

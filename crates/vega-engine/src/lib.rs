//! # vega-engine
//!
//! ## 定位与职责（Why）
//! - 原生传播库持有进程级全局状态、不可重入，且每颗卫星的初始化代价高昂。
//!   本 crate 把“安全地摊销并回收原生逐星状态”做成三件协同的事：
//!   1. [`gate::EngineGate`] —— 有界许可门闸，串行化每一次原生调用并在失败时
//!      读取全局 last-error 槽；
//!   2. [`locks::KeyLockTable`] —— 键级读写锁表，传播期间持读锁以阻止驱逐，
//!      创建/初始化/销毁期间持写锁；
//!   3. [`registry::SatelliteRegistry`] —— 引用计数 + LRU + TTL 的卫星注册表，
//!      负责句柄的借用协议、容量上限与闲置回收。
//!
//! ## 锁层次（What，自外向内）
//! 1. 编排层的全局串行互斥（由 `vega-service` 持有）；
//! 2. 注册表的目录级互斥（跨“原生存在性检查 + 创建/销毁”序列，短持有）；
//! 3. 键级读写锁（传播持读、创建/销毁持写）；
//! 4. 注册表映射的微临界区（`parking_lot`）；
//! 5. 门闸许可（最终串行点）。
//!    所有获取顺序严格自外向内，销毁路径同样先取目录锁再取键级写锁。
//!
//! ## 失败语义（Trade-offs）
//! - 原生加载失败中止借用且不留下条目；驱逐中的原生移除失败只记日志，
//!   注册表条目仍然删除，避免卡死一个槽位；
//! - 注册表与原生目录不一致时以原生目录为准（补插或清除条目）。

/// 原生引擎适配层：类型化操作、返回码约定与缓冲契约。
pub mod adapter;

/// 调用门闸：有界许可 + last-error 读取锁。
pub mod gate;

/// 键级读写锁表。
pub mod locks;

/// 卫星注册表（GC）：借用协议、LRU 驱逐与 TTL 清扫。
pub mod registry;

/// 确定性测试引擎与失败注入开关。
///
/// - **意图说明 (Why)**：真实原生库不进入测试依赖图；圆轨道解析解足以驱动
///   门闸、注册表与流式管线的全部行为断言；
/// - **契约定位 (What)**：生产代码不得依赖本模块，仅供各 crate 的测试复用。
pub mod testkit;

pub use adapter::{EngineInfo, EphemStep, PropagationEngine, SatKey, TimeRef};
pub use gate::{EngineError, EngineGate};
pub use registry::{RegistryError, SatLease, SatelliteRegistry};

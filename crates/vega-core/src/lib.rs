//! # vega-core
//!
//! ## 定位与职责（Why）
//! - 作为轨道传播服务各层共享的契约 crate：调用上下文（取消/截止）、稳定错误域、
//!   DS50 时间模型、TLE 编目号解析、请求/响应数据模型与纯函数校验器都集中在此；
//! - 引擎边界层（`vega-engine`）与请求编排层（`vega-service`）只依赖这里声明的
//!   类型与错误码，避免原生库细节或传输细节向上渗透。
//!
//! ## 架构嵌入（Where）
//! - `contract` 模块提供取消与截止原语，贯穿所有可挂起的调用路径；
//! - `error` 模块定义带稳定错误码的 [`VegaError`] 与对外错误分类；
//! - `time` 模块承载 UTC ↔ DS50 换算、ISO-8601 周期解析与时间网格求解；
//! - `tle` / `model` / `validate` 三个模块共同构成请求入口的数据契约；
//! - `config` 模块声明注册表与服务的可调参数及其回退默认值。
//!
//! ## 依赖策略（Trade-offs）
//! - 本 crate 不依赖异步运行时的调度能力，仅使用 `tokio::sync` 的通知原语，
//!   以便取消等待可以被任何运行时 `await`；
//! - UTC 时间戳统一使用 `chrono::DateTime<Utc>`，DS50 换算以 `f64` 天数表达，
//!   与原生引擎的内部时标保持一致。

/// 调用上下文契约：取消原语、截止时间与二者的组合载体。
///
/// - **意图说明 (Why)**：所有长耗时操作（门闸等待、流式发送、后台轮询）必须可被
///   外部打断，统一的上下文让每个挂起点共享同一份取消/截止语义；
/// - **契约定位 (What)**：[`contract::CallContext`] 是各层公共方法的首个参数。
pub mod contract;

/// 稳定错误域：错误码、分类与带因果链的 [`VegaError`]。
///
/// - **意图说明 (Why)**：校验、解析、原生调用与流式发送的失败需要合流为统一的
///   错误码，外部传输层据此映射 RPC 状态；
/// - **风险提示 (Trade-offs)**：错误码一经发布即冻结，新增语义应新增码值。
pub mod error;

/// 时间模型：DS50 历元换算、ISO-8601 周期与时间网格求解。
pub mod time;

/// TLE 行解析：目前只负责第一行的编目号字段（legacy 数字与 Alpha-5 两种格式）。
pub mod tle;

/// 请求/响应数据模型，保持与外部传输层的线缆形状一致（可缺字段以 `Option` 表达）。
pub mod model;

/// 纯函数请求校验器：按首个违例返回稳定的 `InvalidArgument` 错误。
pub mod validate;

/// 注册表与服务的配置记录及回退默认值。
pub mod config;

pub use contract::{CallContext, Cancellation, Deadline};
pub use error::{ErrorCategory, VegaError};

//! # vega-service
//!
//! ## 定位与职责（Why）
//! - 轨道传播服务的请求编排层：对外暴露 Info / Prop / Ephem 三个操作，
//!   由外部传输层（RPC、TLS、进程装配均不在本工作区）消费；
//! - 每个请求在进程级 `global_mu` 下端到端串行执行——原生传播库持有
//!   进程级全局状态，不允许两个逻辑请求交错触碰目录。
//!
//! ## 控制流（What）
//! - 请求进入 → 校验（[`vega_core::validate`]）→ 取全局串行锁 →
//!   [`vega_engine::SatelliteRegistry::acquire`] 借出卫星（可能触发加载与
//!   驱逐）→ 经 [`vega_engine::EngineGate`] 调用原生库 → 凭据随作用域
//!   结束归还；
//! - Ephem 额外驱动“分片循环 + 后台发送任务”的有界管线，分片经 `mpsc`
//!   通道交给发送任务，发送失败被闩存、在管线排空后统一上抛。
//!
//! ## 取消语义（Trade-offs）
//! - Prop 的取消在门闸许可等待处生效；已开始的原生调用运行到底，结果
//!   被丢弃，凭据照常释放；
//! - Ephem 在每个任务前与每次分片投递前检查取消；取消即关闭通道、等待
//!   发送任务排空、以取消原因返回，已投递的分片不回收。

/// 服务结构、构建信息与 Info 操作。
pub mod service;

/// 单点传播管线。
pub mod prop;

/// 流式星历管线：分片循环、发送任务与取消处理。
pub mod ephem;

pub use ephem::EphemSink;
pub use service::{BuildInfo, PropagationService};

//! 调用门闸：原生库的最终串行点。
//!
//! # 模块定位（Why）
//! - 原生库非线程安全，必须保证任意时刻至多 N 次（默认 N = 1）调用在执行；
//! - 失败调用要读取进程级 last-error 槽，读取本身也要互斥，否则并发失败
//!   会互相覆盖对方的现场。
//!
//! # 行为契约（What）
//! - [`EngineGate::with_call`]：取一个许可（可被取消打断）→ 执行闭包 →
//!   释放许可（借助 RAII，panic 也会释放）→ 非零 rc 在错误锁内取 last-error
//!   并包装为 [`EngineError`]；
//! - 门闸只保证互斥，不保证 FIFO 公平性；调用方不得假设到达序即执行序。

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};

use vega_core::contract::CallContext;
use vega_core::error::{VegaError, codes};

use crate::adapter::{PropagationEngine, RC_ALLOC_FAILURE};

/// 门闸层错误。
///
/// # 教案式说明
/// - **意图 (Why)**：把“许可等待被取消”“原生调用失败”“缓冲分配失败”三类
///   失败显式分型，编排层据此决定对外分类；
/// - **契约 (What)**：所有变体 `Send + Sync + 'static`，经 `From` 汇入
///   [`VegaError`] 后由 `?` 直接传播。
#[derive(Debug, Error)]
pub enum EngineError {
    /// 许可等待期间观察到取消。
    #[error("call cancelled while waiting for the engine gate")]
    Cancelled,
    /// 原生调用返回非零 rc，附带 last-error 现场。
    #[error("native call failed with rc {rc}: {message}")]
    Native { rc: i32, message: String },
    /// 输出缓冲分配失败（rc = -10）。
    #[error("native output buffer allocation failed (rc {rc})")]
    Alloc { rc: i32 },
}

impl From<EngineError> for VegaError {
    fn from(value: EngineError) -> Self {
        match value {
            EngineError::Cancelled => VegaError::new(
                codes::CALL_CANCELLED,
                "call cancelled while waiting for the engine gate",
            ),
            EngineError::Native { rc, message } => VegaError::new(
                codes::ENGINE_NATIVE_CALL,
                format!("native call failed with rc {rc}: {message}"),
            ),
            EngineError::Alloc { rc } => VegaError::new(
                codes::ENGINE_NATIVE_ALLOC,
                format!("native output buffer allocation failed (rc {rc})"),
            ),
        }
    }
}

/// 有界许可门闸。
///
/// # 教案式说明
/// - **意图 (Why)**：以信号量把“原生库单调用者”建模为可配置的许可数；
///   默认 1 即全序串行，更大的许可数只为假设的可重入引擎保留；
/// - **执行 (How)**：
///   - 许可获取用 `select!` 与上下文取消组合，等待可被立即打断；
///   - 许可是 RAII guard，闭包 panic 或提前返回都会释放；
///   - last-error 读取持有专用 `err_mu`，与许可互斥相互独立；
/// - **风险 (Trade-offs)**：`Semaphore` 的唤醒顺序未指定，调用方不得依赖
///   公平性。
pub struct EngineGate {
    engine: Arc<dyn PropagationEngine>,
    permits: Semaphore,
    err_mu: Mutex<()>,
}

impl EngineGate {
    /// 创建门闸；`permits` 为 0 时按 1 处理。
    pub fn new(engine: Arc<dyn PropagationEngine>, permits: usize) -> Self {
        Self {
            engine,
            permits: Semaphore::new(permits.max(1)),
            err_mu: Mutex::new(()),
        }
    }

    /// 共享引擎句柄，供 Info 等只读路径复用。
    pub fn engine(&self) -> &Arc<dyn PropagationEngine> {
        &self.engine
    }

    /// 在一个许可内执行原生调用。
    ///
    /// # 教案式说明
    /// - **契约 (What)**：
    ///   - `f` 返回 `Err(rc)` 时，门闸在错误锁内读取 last-error 并包装；
    ///     rc = -10 直接映射为 [`EngineError::Alloc`]，不读 last-error；
    ///   - 取消只在许可等待阶段生效；闭包一旦开始执行就运行到底，结果由
    ///     调用方决定是否丢弃；
    /// - **执行 (How)**：信号量由本结构独占且从不关闭，获取失败不可达。
    pub async fn with_call<T>(
        &self,
        ctx: &CallContext,
        f: impl FnOnce(&dyn PropagationEngine) -> Result<T, i32>,
    ) -> Result<T, EngineError> {
        let permit = tokio::select! {
            _ = ctx.cancelled() => return Err(EngineError::Cancelled),
            permit = self.permits.acquire() => {
                permit.expect("engine gate semaphore is never closed")
            }
        };
        let outcome = f(self.engine.as_ref());
        drop(permit);
        match outcome {
            Ok(value) => Ok(value),
            Err(rc) => Err(self.native_error(rc).await),
        }
    }

    /// 将非零 rc 包装为 [`EngineError`]，按需读取 last-error。
    ///
    /// 星历管线在分片结构里拿到 rc 后也走这里，保证 last-error 读取始终
    /// 在同一把错误锁内。
    pub async fn native_error(&self, rc: i32) -> EngineError {
        if rc == RC_ALLOC_FAILURE {
            return EngineError::Alloc { rc };
        }
        let message = {
            let _guard = self.err_mu.lock().await;
            self.engine.last_error_message()
        };
        EngineError::Native { rc, message }
    }
}

impl std::fmt::Debug for EngineGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineGate")
            .field("available_permits", &self.permits.available_permits())
            .finish()
    }
}
